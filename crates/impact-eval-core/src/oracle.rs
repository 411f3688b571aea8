//! Interface to the external change-impact analysis tool.
//!
//! The tool is driven in two modes:
//! - **dump**: after a build, record compiled-unit provenance for one
//!   (commit, variant) into the store's `info/` area;
//! - **check**: given a change commit and the known compile-command records,
//!   predict which variants are affected.
//!
//! Check mode reports its prediction as a single marker line on stdout
//! (`[mpc] ["id", ...] affected`). That free-text scrape is the tool's
//! established wire format; parsing is isolated in [`decode_affected`] so a
//! structured protocol could replace it without touching the contract.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{EvalError, Result};
use crate::process::{run_command, CommandSpec};

/// Variant ids predicted to be impacted by a change, deduplicated and
/// sorted lexicographically.
pub type AffectedSet = Vec<String>;

const MARKER_PREFIX: &str = "[mpc] ";
const MARKER_SUFFIX: &str = " affected";

/// Handle to the external analysis tool for one evaluated repository.
pub struct ImpactOracle {
    tool: PathBuf,
    repo: PathBuf,
    info_dir: PathBuf,
    timeout_secs: u64,
}

impl ImpactOracle {
    pub fn new(
        tool: impl Into<PathBuf>,
        repo: impl Into<PathBuf>,
        info_dir: impl Into<PathBuf>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            tool: tool.into(),
            repo: repo.into(),
            info_dir: info_dir.into(),
            timeout_secs,
        }
    }

    fn base_argv(&self) -> Vec<String> {
        vec![
            self.tool.to_string_lossy().into_owned(),
            "analyze".to_string(),
            "--filter-asm".to_string(),
            self.repo.to_string_lossy().into_owned(),
        ]
    }

    /// Record build provenance for `(commit, variant_id)`.
    ///
    /// Any non-zero exit means the tool itself is broken and aborts the run.
    pub async fn dump(&self, commit: &str, variant_id: &str) -> Result<Duration> {
        let mut argv = self.base_argv();
        argv.extend([
            "--commit".to_string(),
            commit.to_string(),
            "--variant".to_string(),
            variant_id.to_string(),
            "--storage".to_string(),
            self.info_dir.to_string_lossy().into_owned(),
            "--compile-commands".to_string(),
            "--dump-only".to_string(),
        ]);

        let spec = CommandSpec::new("oracle-dump", argv)
            .cwd(&self.repo)
            .timeout_secs(self.timeout_secs);
        let out = run_command(&spec).await?;
        if !out.success() {
            return Err(EvalError::PredictionTool {
                status: out.exit_code,
                stderr: out.stderr,
            });
        }

        debug!(commit, variant_id, "provenance dumped");
        Ok(out.duration)
    }

    /// Predict the affected variant set for the change leading to `commit`.
    ///
    /// `compile_command_map` carries `variant:path` entries for the change
    /// commit's compile-command records; `alarm_list` paths are forwarded to
    /// the tool's git comparison mode when non-empty.
    pub async fn check(
        &self,
        commit: &str,
        compile_command_map: &[String],
        alarm_list: &[&str],
    ) -> Result<(AffectedSet, Duration)> {
        let mut argv = self.base_argv();
        argv.extend([
            "--commit".to_string(),
            commit.to_string(),
            "--storage".to_string(),
            self.info_dir.to_string_lossy().into_owned(),
            "--check-storage".to_string(),
        ]);
        if !compile_command_map.is_empty() {
            argv.push("--compile-commands-path-map".to_string());
            argv.extend(compile_command_map.iter().cloned());
        }
        if !alarm_list.is_empty() {
            argv.push("--compare-git".to_string());
            argv.extend(alarm_list.iter().map(|p| p.to_string()));
        }

        let spec = CommandSpec::new("oracle-check", argv)
            .cwd(&self.repo)
            .timeout_secs(self.timeout_secs);
        let out = run_command(&spec).await?;
        if !out.success() {
            return Err(EvalError::PredictionTool {
                status: out.exit_code,
                stderr: out.stderr,
            });
        }

        let affected = decode_affected(&out.stdout);
        info!(commit, affected = affected.len(), "oracle check complete");
        Ok((affected, out.duration))
    }
}

/// Decode the predicted affected set from the tool's stdout.
///
/// Scans for the first line carrying the marker and parses its
/// bracket-delimited collection of variant ids. A clean exit with no marker
/// line means nothing was predicted affected, so the empty set is returned
/// rather than an error.
pub fn decode_affected(stdout: &str) -> AffectedSet {
    for line in stdout.lines() {
        if !line.contains(MARKER_SUFFIX.trim_start()) {
            continue;
        }
        let Some(rest) = line.split_once(MARKER_PREFIX).map(|(_, rest)| rest) else {
            continue;
        };
        let Some(literal) = rest.strip_suffix(MARKER_SUFFIX) else {
            continue;
        };
        if let Some(mut ids) = parse_id_list(literal) {
            ids.sort();
            ids.dedup();
            return ids;
        }
    }
    AffectedSet::new()
}

/// Parse a `["a", "b"]`-style collection literal. Items may be single- or
/// double-quoted. Returns `None` when the brackets are malformed.
fn parse_id_list(literal: &str) -> Option<Vec<String>> {
    let inner = literal
        .trim()
        .strip_prefix('[')?
        .strip_suffix(']')?;

    let mut ids = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        let quote = match c {
            '"' | '\'' => c,
            _ => continue,
        };
        let mut item = String::new();
        for c in chars.by_ref() {
            if c == quote {
                break;
            }
            item.push(c);
        }
        ids.push(item);
    }
    Some(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_marker_line() {
        let stdout = "info: loading storage\n[mpc] [\"v1\", \"v2\"] affected\ntrailing\n";
        assert_eq!(decode_affected(stdout), vec!["v1", "v2"]);
    }

    #[test]
    fn decodes_single_quoted_items() {
        let stdout = "[mpc] ['beta', 'alpha'] affected\n";
        assert_eq!(decode_affected(stdout), vec!["alpha", "beta"]);
    }

    #[test]
    fn decodes_through_log_prefix() {
        let stdout = "2024-01-01T00:00:00 INFO [mpc] [\"aa\"] affected\n";
        assert_eq!(decode_affected(stdout), vec!["aa"]);
    }

    #[test]
    fn deduplicates_and_sorts() {
        let stdout = "[mpc] [\"v2\", \"v1\", \"v2\"] affected\n";
        assert_eq!(decode_affected(stdout), vec!["v1", "v2"]);
    }

    #[test]
    fn no_marker_means_empty_set() {
        assert!(decode_affected("nothing to report\n").is_empty());
        assert!(decode_affected("").is_empty());
    }

    #[test]
    fn empty_collection_literal() {
        assert!(decode_affected("[mpc] [] affected\n").is_empty());
    }

    #[test]
    fn only_first_marker_line_counts() {
        let stdout = "[mpc] [\"v1\"] affected\n[mpc] [\"v9\"] affected\n";
        assert_eq!(decode_affected(stdout), vec!["v1"]);
    }

    #[test]
    fn malformed_literal_is_skipped() {
        assert!(decode_affected("[mpc] not-a-list affected\n").is_empty());
    }

    #[test]
    fn parse_id_list_rejects_missing_brackets() {
        assert!(parse_id_list("\"v1\", \"v2\"").is_none());
    }
}
