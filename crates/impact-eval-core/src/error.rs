//! Error taxonomy for the evaluation engine.
//!
//! Two scopes matter here:
//! - run-scoped errors (`Configuration`, `PredictionTool`, `Git`) abort the
//!   whole evaluation with no further rows;
//! - cell-scoped errors (`Build`, `Timeout`) are recovered by the driver and
//!   surfaced as failure text inside the results table.

/// Errors produced by the evaluation engine.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    /// The external configure step exited non-zero. Fatal to the run.
    #[error("configure failed: {0}")]
    Configuration(String),

    /// Compiler or linker exited non-zero. Terminal for one cell only.
    #[error("build failed: {0}")]
    Build(String),

    /// The external analysis tool exited non-zero. A non-zero exit means the
    /// tool itself is broken, not "nothing affected", so this is fatal.
    #[error("prediction tool exited with status {status}: {stderr}")]
    PredictionTool { status: i32, stderr: String },

    /// The configuration space is smaller than the requested variant count.
    #[error("variant sampling exhausted after {attempts} attempts ({requested} distinct variants requested)")]
    GenerationExhausted { requested: usize, attempts: usize },

    #[error("git error: {0}")]
    Git(String),

    /// An external process exceeded the caller-configured timeout.
    #[error("stage `{stage}` timed out after {timeout_secs} seconds")]
    Timeout { stage: String, timeout_secs: u64 },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    /// Whether the driver may recover from this error within a single cell.
    pub fn is_cell_scoped(&self) -> bool {
        matches!(self, EvalError::Build(_) | EvalError::Timeout { .. })
    }
}

/// Result type for evaluation engine operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = EvalError::Configuration("./config exited with 2".to_string());
        assert!(err.to_string().contains("configure failed"));

        let err = EvalError::PredictionTool {
            status: 101,
            stderr: "panic".to_string(),
        };
        assert!(err.to_string().contains("101"));
        assert!(err.to_string().contains("panic"));
    }

    #[test]
    fn scope_split() {
        assert!(EvalError::Build("make".into()).is_cell_scoped());
        assert!(EvalError::Timeout {
            stage: "build".into(),
            timeout_secs: 60
        }
        .is_cell_scoped());
        assert!(!EvalError::Configuration("x".into()).is_cell_scoped());
        assert!(!EvalError::PredictionTool {
            status: 1,
            stderr: String::new()
        }
        .is_cell_scoped());
    }

    #[test]
    fn generation_exhausted_message() {
        let err = EvalError::GenerationExhausted {
            requested: 8,
            attempts: 512,
        };
        let msg = err.to_string();
        assert!(msg.contains("512"));
        assert!(msg.contains("8 distinct"));
    }
}
