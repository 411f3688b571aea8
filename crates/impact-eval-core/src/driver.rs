//! Commit walker: sequences builds and checks across history.
//!
//! The walk iterates commit pairs (base, change) in first-parent order and
//! drives one working tree in place, so execution is strictly sequential per
//! (commit, variant) cell. Every cell moves through configure -> build ->
//! check -> classify; cell-scoped failures (a broken build, a timeout)
//! become failure text in the row, run-scoped failures (configure, the
//! prediction tool) abort the walk.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::adapter::{BuildAdapter, BuildContext, BuildOutput};
use crate::diff::snapshots_equal;
use crate::error::{EvalError, Result};
use crate::git::GitWorkspace;
use crate::hash_store::ObjectHashStore;
use crate::oracle::ImpactOracle;
use crate::recorder::{Cell, ResultRecorder};
use crate::variant::{Variant, VariantGenerator};

/// Evaluation mode, selecting both the per-cell work and the header shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Build each commit, persist hashes and provenance dumps, report
    /// untracked compiler inputs.
    Record,

    /// Clean/incremental rebuild timing only.
    GroundTruth,

    /// Without prediction: rebuild every variant and classify from snapshot
    /// diffs alone.
    Wop,

    /// Full evaluation: rebuild, query the prediction tool, classify ground
    /// truth across all variants.
    Check,
}

impl EvalMode {
    /// Mode-specific result columns appended after the shared prefix.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            EvalMode::Record => &["build_t", "predict_t", "untracked"],
            EvalMode::GroundTruth => &["build_t"],
            EvalMode::Wop => &["check_t", "equal", "changed", "build_fail", "notes"],
            EvalMode::Check => &[
                "check_t",
                "affected",
                "gt_equal",
                "gt_changed",
                "gt_build_fail",
                "notes",
            ],
        }
    }

    /// Whether this mode invokes the external prediction tool.
    pub fn needs_oracle(&self) -> bool {
        matches!(self, EvalMode::Record | EvalMode::Check)
    }
}

/// Inputs for one evaluation walk.
#[derive(Debug, Clone)]
pub struct WalkConfig {
    /// First-parent history, oldest first. Pairs `(commits[i], commits[i+1])`
    /// form the evaluated transitions.
    pub commits: Vec<String>,

    /// Number of variants to generate (baseline included).
    pub variant_count: usize,

    /// Seed for variant sampling.
    pub seed: u64,

    /// Reconfigure and rebuild from a clean tree for every transition
    /// instead of reusing prior build state. Forced on when more than one
    /// variant shares the working tree.
    pub clean: bool,

    /// Skip the reset/clean before the initial configure (the caller already
    /// prepared the tree).
    pub skip_initial_clean: bool,

    pub mode: EvalMode,
}

/// Outcome of a cell-scoped build attempt.
enum CellBuild {
    Ok {
        output: BuildOutput,
        duration: Duration,
    },
    Failed(String),
}

/// Outcome of cell-scoped provenance capture.
enum CellProvenance {
    Ok(Duration),
    Failed(String),
}

/// Sequences commits and variants, invoking adapter, store, oracle and diff
/// engine, and collecting timing per row.
pub struct CommitWalker<'a> {
    git: &'a GitWorkspace,
    adapter: &'a dyn BuildAdapter,
    ctx: &'a BuildContext,
    store: &'a ObjectHashStore,
    oracle: Option<&'a ImpactOracle>,
}

impl<'a> CommitWalker<'a> {
    pub fn new(
        git: &'a GitWorkspace,
        adapter: &'a dyn BuildAdapter,
        ctx: &'a BuildContext,
        store: &'a ObjectHashStore,
        oracle: Option<&'a ImpactOracle>,
    ) -> Self {
        Self {
            git,
            adapter,
            ctx,
            store,
            oracle,
        }
    }

    /// Walk the full commits x variants grid, returning the result table.
    pub async fn run(&self, config: &WalkConfig) -> Result<ResultRecorder> {
        if config.mode.needs_oracle() && self.oracle.is_none() {
            return Err(EvalError::Configuration(format!(
                "{:?} mode requires the prediction tool",
                config.mode
            )));
        }

        let variants = VariantGenerator::generate(self.adapter, config.variant_count, config.seed)?;
        // Multiple variants share one working tree; stale state from another
        // variant's build must never leak into a cell.
        let clean = config.clean || variants.len() > 1;

        let mut recorder = ResultRecorder::for_mode(config.mode);

        if config.commits.len() < 2 {
            warn!("fewer than two commits, nothing to evaluate");
            return Ok(recorder);
        }

        self.git.reset_hard()?;

        let transitions = config.commits.len() - 1;
        for (index, pair) in config.commits.windows(2).enumerate() {
            let (base, change) = (pair[0].as_str(), pair[1].as_str());
            info!(
                transition = index + 1,
                total = transitions,
                change,
                "evaluating transition"
            );

            self.git.checkout(base)?;

            for variant in &variants {
                let variant_id = variant.id();
                info!(variant = %variant_id, flags = %variant, "evaluating cell");

                let config_t = if index == 0 || clean {
                    if !(index == 0 && config.skip_initial_clean) {
                        self.git.reset_hard()?;
                        self.git.clean()?;
                        self.git.checkout(base)?;
                    }
                    let start = Instant::now();
                    self.adapter.configure(self.ctx, variant).await?;
                    start.elapsed()
                } else {
                    Duration::ZERO
                };

                let mut row = vec![
                    Cell::Index(index),
                    Cell::from(change),
                    Cell::from(variant_id.clone()),
                    Cell::seconds(config_t),
                ];

                let cells = match config.mode {
                    EvalMode::Record => self.record_cell(base, variant).await?,
                    EvalMode::GroundTruth => self.ground_truth_cell(variant).await?,
                    EvalMode::Wop => self.wop_cell(base, change, variant).await?,
                    EvalMode::Check => self.check_cell(base, change, variant).await?,
                };
                row.extend(cells);
                recorder.push(row);
            }
        }

        Ok(recorder)
    }

    /// Build, converting cell-scoped failures into a failure string.
    async fn try_build(&self, variant: &Variant, commit: &str) -> Result<CellBuild> {
        let start = Instant::now();
        match self.adapter.build(self.ctx, variant).await {
            Ok(output) => Ok(CellBuild::Ok {
                output,
                duration: start.elapsed(),
            }),
            Err(e) if e.is_cell_scoped() => {
                warn!(commit, error = %e, "build failed, cell marked failed");
                Ok(CellBuild::Failed(format!("build of {commit} failed")))
            }
            Err(e) => Err(e),
        }
    }

    /// Hash the tree and persist the snapshot for `(commit, variant)`.
    fn snapshot(&self, commit: &str, variant: &Variant) -> Result<()> {
        let ignore = self.adapter.ignore_patterns(self.ctx.repo.as_path());
        let hashes = ObjectHashStore::hash_tree(&self.ctx.repo, &ignore)?;
        self.store.persist(commit, &variant.id(), &hashes)
    }

    /// Record compile commands and provenance after a successful build.
    async fn record_provenance(
        &self,
        commit: &str,
        variant: &Variant,
        build_stdout: &str,
    ) -> Result<Duration> {
        self.adapter
            .capture_compile_commands(self.ctx, build_stdout)
            .await?;

        let cc = self.ctx.repo.join("compile_commands.json");
        if cc.exists() {
            self.store
                .store_compile_commands(commit, &variant.id(), &cc)?;
        }

        // Oracle presence was checked before the walk started.
        let oracle = self.oracle.expect("oracle required for provenance");
        oracle.dump(commit, &variant.id()).await
    }

    /// Capture provenance, converting cell-scoped failures (a broken
    /// compile-command capture) into a failure string. Prediction-tool
    /// failures stay fatal.
    async fn try_provenance(
        &self,
        commit: &str,
        variant: &Variant,
        build_stdout: &str,
    ) -> Result<CellProvenance> {
        match self.record_provenance(commit, variant, build_stdout).await {
            Ok(duration) => Ok(CellProvenance::Ok(duration)),
            Err(e) if e.is_cell_scoped() => {
                warn!(commit, error = %e, "compile-command capture failed, cell marked failed");
                Ok(CellProvenance::Failed(format!(
                    "compile commands of {commit} failed"
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// Build the base commit's snapshot when absent (first transition, or a
    /// resumed run with a partial dump directory).
    async fn ensure_base_snapshot(
        &self,
        base: &str,
        variant: &Variant,
        with_provenance: bool,
    ) -> Result<Option<String>> {
        if self.store.load(base, &variant.id())?.is_some() {
            return Ok(None);
        }

        match self.try_build(variant, base).await? {
            CellBuild::Ok { output, .. } => {
                self.snapshot(base, variant)?;
                if with_provenance {
                    if let CellProvenance::Failed(msg) =
                        self.try_provenance(base, variant, &output.stdout).await?
                    {
                        return Ok(Some(msg));
                    }
                }
                Ok(None)
            }
            CellBuild::Failed(msg) => Ok(Some(msg)),
        }
    }

    /// Tags recorded when a change touches files whose compiled-object diff
    /// may not reflect real behavioral change.
    fn change_notes(&self, diff_stat: &str) -> Vec<String> {
        let mut notes = Vec::new();
        if diff_stat.contains("Makefile") {
            notes.push("Makefile".to_string());
        }
        if diff_stat.contains("configure") {
            notes.push("Configure".to_string());
        }
        if diff_stat.contains("tools/") || diff_stat.contains("tool/") {
            notes.push("tools".to_string());
        }
        let lower = diff_stat.to_lowercase();
        if lower.contains(".s") || lower.contains(".asm") {
            notes.push("asm".to_string());
        }
        if self
            .adapter
            .alarm_list()
            .iter()
            .any(|path| diff_stat.contains(path))
        {
            // Emitted, not failed: the caller decides how much to trust the
            // prediction for alarm-listed generators.
            notes.push("alarm".to_string());
        }
        notes
    }

    /// Compiled inputs the prediction tool saw that git does not track.
    fn untracked_compiler_inputs(&self, commit: &str, variant: &Variant) -> Result<String> {
        let path = self.store.info_path(commit, &variant.id());
        if !path.exists() {
            return Ok(String::new());
        }

        let uses: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let compiled: Vec<String> = uses
            .get("used_lines")
            .and_then(|v| v.as_object())
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();

        let tracked: BTreeSet<String> = self
            .git
            .ls_files()?
            .into_iter()
            .map(|f| self.ctx.repo.join(f).to_string_lossy().into_owned())
            .collect();

        let mut untracked: Vec<String> = compiled
            .into_iter()
            .filter(|f| !tracked.contains(f))
            .collect();
        untracked.sort();

        Ok(format!("\"{untracked:?}\""))
    }

    async fn record_cell(&self, base: &str, variant: &Variant) -> Result<Vec<Cell>> {
        let (output, build_t) = match self.try_build(variant, base).await? {
            CellBuild::Ok { output, duration } => (output, duration),
            CellBuild::Failed(msg) => return Ok(vec![Cell::from(msg)]),
        };

        self.snapshot(base, variant)?;
        let predict_t = match self.try_provenance(base, variant, &output.stdout).await? {
            CellProvenance::Ok(duration) => duration,
            CellProvenance::Failed(msg) => return Ok(vec![Cell::from(msg)]),
        };
        let untracked = self.untracked_compiler_inputs(base, variant)?;

        Ok(vec![
            Cell::seconds(build_t),
            Cell::seconds(predict_t),
            Cell::from(untracked),
        ])
    }

    async fn ground_truth_cell(&self, variant: &Variant) -> Result<Vec<Cell>> {
        match self.try_build(variant, "current tree").await? {
            CellBuild::Ok { duration, .. } => Ok(vec![Cell::seconds(duration)]),
            CellBuild::Failed(msg) => Ok(vec![Cell::from(msg)]),
        }
    }

    async fn wop_cell(&self, base: &str, change: &str, variant: &Variant) -> Result<Vec<Cell>> {
        if let Some(msg) = self.ensure_base_snapshot(base, variant, false).await? {
            return Ok(vec![Cell::from(msg)]);
        }

        self.git.apply(change)?;
        let notes = self.change_notes(&self.git.diff_stat()?);

        if let CellBuild::Failed(msg) = self.try_build(variant, change).await? {
            return Ok(vec![Cell::from(msg)]);
        }
        self.snapshot(change, variant)?;

        let variant_id = variant.id();
        let start = Instant::now();
        let base_snap = self.store.load(base, &variant_id)?;
        let change_snap = self.store.load(change, &variant_id)?;

        let (check_t, equal, changed, failed) = match (base_snap, change_snap) {
            (Some(base_snap), Some(change_snap)) => {
                let equal = snapshots_equal(&base_snap, &change_snap);
                let check_t = start.elapsed();
                if equal {
                    (check_t, variant_id, String::new(), String::new())
                } else {
                    (check_t, String::new(), variant_id, String::new())
                }
            }
            _ => {
                warn!(base, variant = %variant_id, "no usable snapshot for cell");
                (Duration::ZERO, String::new(), String::new(), variant_id)
            }
        };

        Ok(vec![
            Cell::seconds(check_t),
            Cell::from(equal),
            Cell::from(changed),
            Cell::from(failed),
            Cell::from(notes.join("|")),
        ])
    }

    async fn check_cell(&self, base: &str, change: &str, variant: &Variant) -> Result<Vec<Cell>> {
        if let Some(msg) = self.ensure_base_snapshot(base, variant, true).await? {
            return Ok(vec![Cell::from(msg)]);
        }

        self.git.apply(change)?;
        let notes = self.change_notes(&self.git.diff_stat()?);

        let output = match self.try_build(variant, change).await? {
            CellBuild::Ok { output, .. } => output,
            CellBuild::Failed(msg) => return Ok(vec![Cell::from(msg)]),
        };
        self.snapshot(change, variant)?;
        if let CellProvenance::Failed(msg) =
            self.try_provenance(change, variant, &output.stdout).await?
        {
            return Ok(vec![Cell::from(msg)]);
        }

        let oracle = self.oracle.expect("oracle required for check mode");
        let compile_map = self.store.compile_command_map(change)?;
        let (affected, check_t) = oracle
            .check(base, &compile_map, self.adapter.alarm_list())
            .await?;

        // Ground truth across every variant that ever built the base commit.
        let base_variants = self.store.load_commit(base)?;
        let change_variants = self.store.load_commit(change)?;

        if base_variants.is_empty() {
            return Ok(vec![Cell::from(format!("build of {base} failed"))]);
        }

        let mut equal = Vec::new();
        let mut changed = Vec::new();
        let mut failed = Vec::new();
        for (variant_id, base_snap) in &base_variants {
            match change_variants.get(variant_id) {
                None => failed.push(variant_id.clone()),
                Some(change_snap) if snapshots_equal(base_snap, change_snap) => {
                    equal.push(variant_id.clone())
                }
                Some(_) => changed.push(variant_id.clone()),
            }
        }
        equal.sort();
        changed.sort();
        failed.sort();

        Ok(vec![
            Cell::seconds(check_t),
            Cell::from(affected.join("|")),
            Cell::from(equal.join("|")),
            Cell::from(changed.join("|")),
            Cell::from(failed.join("|")),
            Cell::from(notes.join("|")),
        ])
    }
}
