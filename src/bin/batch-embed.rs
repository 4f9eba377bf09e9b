use std::{error::Error, process::ExitCode};

use batch_embed::{PipelineConfig, cli::EmbedArgs};
use ortho_config::OrthoConfig;
use tracing::error;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "batch-embed failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    // Flags override environment, which overrides the config file.
    let args = EmbedArgs::load()?;
    let config = args.pipeline_config()?;
    if args.dry_run {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }
    embed(&args, config)
}

#[cfg(feature = "onnx")]
fn embed(args: &EmbedArgs, config: PipelineConfig) -> Result<(), Box<dyn Error>> {
    use std::io::{BufRead, Write};

    use batch_embed::EmbeddingSession;
    use tracing::info;

    let texts = std::io::stdin()
        .lock()
        .lines()
        .collect::<Result<Vec<_>, _>>()?;
    let session = EmbeddingSession::open_onnx(&args.backend_config()?, config.clone())?;
    let (results, metrics) = session.run(&texts, config.batch_size, config.worker_count)?;
    let mut out = std::io::BufWriter::new(std::io::stdout().lock());
    for result in &results {
        serde_json::to_writer(&mut out, result)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    info!(
        processed = metrics.processed,
        failed_batches = metrics.failed_batches,
        dropped_records = metrics.dropped_records,
        "embedding complete"
    );
    Ok(())
}

#[cfg(not(feature = "onnx"))]
fn embed(_args: &EmbedArgs, _config: PipelineConfig) -> Result<(), Box<dyn Error>> {
    Err(batch_embed::PipelineError::config(
        "built without the onnx feature; only --dry-run is available",
    )
    .into())
}
