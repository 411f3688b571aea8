//! impact-eval-core — evaluation engine for a change-impact prediction tool.
//!
//! Measures, over a project's commit history and a grid of build
//! configuration variants, whether the external prediction tool correctly
//! identifies the variants affected by each change. Ground truth comes from
//! actually rebuilding and diffing content hashes of compiled objects.
//!
//! Main pieces:
//! - [`variant`] — reproducible variant generation
//! - [`adapter`] — per-project build operations behind one trait
//! - [`hash_store`] — idempotent per-(commit, variant) object hash snapshots
//! - [`oracle`] — dump/check interface to the external analysis tool
//! - [`diff`] — the snapshot equality rule defining ground truth
//! - [`driver`] — the commit walker sequencing everything
//! - [`recorder`] — delimited result table output

pub mod adapter;
pub mod diff;
pub mod driver;
pub mod error;
pub mod git;
pub mod hash_store;
pub mod oracle;
pub mod process;
pub mod recorder;
pub mod telemetry;
pub mod variant;

// Re-export key types
pub use adapter::{BuildAdapter, BuildContext, BuildOutput};
pub use diff::snapshots_equal;
pub use driver::{CommitWalker, EvalMode, WalkConfig};
pub use error::{EvalError, Result};
pub use git::GitWorkspace;
pub use hash_store::{HashSnapshot, ObjectHashStore};
pub use oracle::{decode_affected, AffectedSet, ImpactOracle};
pub use recorder::{Cell, ResultRecorder};
pub use telemetry::init_tracing;
pub use variant::{Variant, VariantGenerator, VariantId};
