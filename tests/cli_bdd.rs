//! Behaviour tests for the `batch-embed` CLI.
#![cfg(feature = "cli")]

use assert_cmd::Command;
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use std::cell::RefCell;
use std::io::Write;
use std::process::Output;
use tempfile::NamedTempFile;

#[derive(Default)]
struct CliContext {
    config_file: RefCell<Option<NamedTempFile>>,
    output: RefCell<Option<Output>>,
}

#[fixture]
fn cli_context() -> CliContext {
    CliContext::default()
}

#[given("the batch-embed binary")]
fn given_binary(#[from(cli_context)] ctx: &CliContext) {
    let _ = ctx;
}

#[given("a config file selecting {pooling} pooling")]
#[expect(
    clippy::needless_pass_by_value,
    reason = "BDD macro injects owned value"
)]
fn given_config_file(pooling: String, #[from(cli_context)] ctx: &CliContext) {
    let mut file = NamedTempFile::new().unwrap_or_else(|e| panic!("create temp file: {e}"));
    writeln!(file, "pooling = \"{pooling}\"").unwrap_or_else(|e| panic!("write config: {e}"));
    ctx.config_file.replace(Some(file));
}

#[when("running with \"{args}\"")]
#[expect(
    clippy::needless_pass_by_value,
    reason = "BDD macro injects owned value"
)]
#[expect(clippy::expect_used, reason = "tests should fail loudly")]
fn when_running(args: String, #[from(cli_context)] ctx: &CliContext) {
    let mut command = Command::cargo_bin("batch-embed")
        .unwrap_or_else(|e| panic!("failed to locate batch-embed binary: {e}"));
    command
        .args(args.split_whitespace())
        .env_remove("BATCH_EMBED_BATCH_SIZE")
        .env_remove("BATCH_EMBED_WORKER_COUNT")
        .env_remove("BATCH_EMBED_POOLING");
    if let Some(file) = ctx.config_file.borrow().as_ref() {
        command.arg("--config-path").arg(file.path());
    }
    let output = command.output().expect("failed to run batch-embed");
    *ctx.output.borrow_mut() = Some(output);
}

#[then("it exits successfully")]
#[expect(clippy::expect_used, reason = "tests should fail loudly")]
fn then_success(#[from(cli_context)] ctx: &CliContext) {
    let status = ctx.output.borrow().as_ref().expect("missing output").status;
    assert!(status.success());
}

#[then("it exits with an error")]
#[expect(clippy::expect_used, reason = "tests should fail loudly")]
fn then_error(#[from(cli_context)] ctx: &CliContext) {
    let status = ctx.output.borrow().as_ref().expect("missing output").status;
    assert!(!status.success());
}

#[then("the output mentions \"{text}\"")]
#[expect(
    clippy::needless_pass_by_value,
    reason = "BDD macro injects owned value"
)]
fn then_mentions(text: String, #[from(cli_context)] ctx: &CliContext) {
    let borrowed = ctx.output.borrow();
    let output = borrowed
        .as_ref()
        .unwrap_or_else(|| panic!("missing output"));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&text), "stdout was: {stdout}");
}

#[then("the dry run reports {pooling} pooling")]
#[expect(
    clippy::needless_pass_by_value,
    reason = "BDD macro injects owned value"
)]
fn then_reports_pooling(pooling: String, #[from(cli_context)] ctx: &CliContext) {
    let borrowed = ctx.output.borrow();
    let output = borrowed
        .as_ref()
        .unwrap_or_else(|| panic!("missing output"));
    let config: serde_json::Value = serde_json::from_slice(&output.stdout)
        .unwrap_or_else(|e| panic!("dry run did not print JSON: {e}"));
    assert_eq!(
        config.get("pooling").and_then(serde_json::Value::as_str),
        Some(pooling.as_str())
    );
}

#[scenario(path = "tests/features/cli.feature", index = 0)]
fn dry_run(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/cli.feature", index = 1)]
fn invalid_flag(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/cli.feature", index = 2)]
fn zero_workers(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/cli.feature", index = 3)]
fn unknown_pooling(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/cli.feature", index = 4)]
fn pooling_from_config_file(cli_context: CliContext) {
    let _ = cli_context;
}

#[scenario(path = "tests/features/cli.feature", index = 5)]
fn pooling_flag_overrides_config_file(cli_context: CliContext) {
    let _ = cli_context;
}
