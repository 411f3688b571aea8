//! Shared helpers for adapter implementations.

use impact_eval_core::process::{run_command, CommandOutput, CommandSpec};
use impact_eval_core::{EvalError, Result};

/// Run a configure-stage command. Non-zero exit aborts the run: a variant
/// that cannot configure means the grid itself is wrong.
pub(crate) async fn run_configure(spec: &CommandSpec) -> Result<CommandOutput> {
    let out = run_command(spec).await?;
    if !out.success() {
        return Err(EvalError::Configuration(format!(
            "{} exited with {}: {}",
            spec.stage,
            out.exit_code,
            tail(&out.stderr)
        )));
    }
    Ok(out)
}

/// Run a build-stage command. Non-zero exit is a per-cell build failure.
pub(crate) async fn run_build(spec: &CommandSpec) -> Result<CommandOutput> {
    let out = run_command(spec).await?;
    if !out.success() {
        return Err(EvalError::Build(format!(
            "{} exited with {}: {}",
            spec.stage,
            out.exit_code,
            tail(&out.stderr)
        )));
    }
    Ok(out)
}

/// Last few stderr lines, enough to identify the failure in a log.
fn tail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.trim().lines().collect();
    let start = lines.len().saturating_sub(10);
    lines[start..].join("\n")
}
