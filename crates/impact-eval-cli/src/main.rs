//! impact-eval — evaluate a change-impact prediction tool against real
//! incremental builds.
//!
//! Walks a commit range of the target project, builds each transition under
//! one or more configuration variants, and reports per-cell timing plus
//! ground-truth classification derived from object content hashes.

use std::fs::File;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, Level};

use impact_eval_core::{
    init_tracing, BuildContext, CommitWalker, EvalMode, GitWorkspace, ImpactOracle,
    ObjectHashStore, WalkConfig,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Build and record hashes/provenance for every commit.
    Record,
    /// Rebuild timing only.
    GroundTruth,
    /// Classify from snapshot diffs without the prediction tool.
    Wop,
    /// Full prediction-vs-ground-truth evaluation.
    Check,
}

impl From<Mode> for EvalMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Record => EvalMode::Record,
            Mode::GroundTruth => EvalMode::GroundTruth,
            Mode::Wop => EvalMode::Wop,
            Mode::Check => EvalMode::Check,
        }
    }
}

#[derive(Parser)]
#[command(name = "impact-eval", version, about)]
struct Cli {
    /// Path to the evaluated project's git repository
    repository: PathBuf,

    /// Commit range `base..end`, walked first-parent oldest first
    #[arg(short = 'c', long)]
    commits: String,

    /// Project adapter (bochs, linux, openssl, sqlite)
    #[arg(short = 'm', long)]
    manager: String,

    /// Compiler plugin shared object injected into build flags
    #[arg(short = 'p', long)]
    plugin: Option<PathBuf>,

    /// Path to the change-impact prediction tool
    #[arg(short = 't', long)]
    tool: Option<PathBuf>,

    /// C compiler handed to configure/make
    #[arg(long)]
    compiler: Option<String>,

    /// Reconfigure and rebuild from a clean tree for every transition
    #[arg(long)]
    clean: bool,

    /// The tree is already configured; skip the clean before the first cell
    #[arg(long)]
    skip_initial_clean: bool,

    /// Result table output path (stdout when omitted)
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Snapshot and provenance dump directory
    #[arg(long, default_value = "dump")]
    dump_dir: PathBuf,

    /// Number of configuration variants, baseline included
    #[arg(long, default_value_t = 1)]
    num_variants: usize,

    /// Variant sampling seed
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Evaluation mode
    #[arg(long, value_enum, default_value_t = Mode::Check)]
    mode: Mode,

    /// Per-stage timeout in seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    timeout_secs: u64,

    /// Parallel make jobs (defaults to available cores)
    #[arg(long)]
    jobs: Option<usize>,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,

    /// JSON log output
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let adapter = impact_eval_adapters::create(&cli.manager).with_context(|| {
        format!(
            "unknown project `{}` (known: {})",
            cli.manager,
            impact_eval_adapters::KNOWN_PROJECTS.join(", ")
        )
    })?;

    let mut ctx = BuildContext::new(&cli.repository);
    ctx.plugin = cli.plugin.clone();
    ctx.compiler = cli.compiler.clone();
    ctx.timeout_secs = cli.timeout_secs;
    if let Some(jobs) = cli.jobs {
        ctx.jobs = jobs;
    }

    let git = GitWorkspace::new(&cli.repository);
    let commits = git
        .rev_list(&cli.commits)
        .with_context(|| format!("resolving commit range `{}`", cli.commits))?;
    info!(
        commits = commits.len(),
        project = %cli.manager,
        "starting evaluation"
    );

    let store = ObjectHashStore::new(&cli.dump_dir)
        .with_context(|| format!("opening dump directory {}", cli.dump_dir.display()))?;

    let mode = EvalMode::from(cli.mode);
    let oracle = match (&cli.tool, mode.needs_oracle()) {
        (Some(tool), _) => Some(ImpactOracle::new(
            tool,
            &cli.repository,
            store.info_dir(),
            cli.timeout_secs,
        )),
        (None, true) => bail!("--tool is required for {mode:?} mode"),
        (None, false) => None,
    };

    let config = WalkConfig {
        commits,
        variant_count: cli.num_variants.max(1),
        seed: cli.seed,
        clean: cli.clean,
        skip_initial_clean: cli.skip_initial_clean,
        mode,
    };

    let walker = CommitWalker::new(&git, adapter.as_ref(), &ctx, &store, oracle.as_ref());
    let recorder = walker.run(&config).await.context("evaluation walk failed")?;

    match &cli.output {
        Some(path) => {
            let mut file = File::create(path)
                .with_context(|| format!("creating {}", path.display()))?;
            recorder.write_to(&mut file)?;
            info!(rows = recorder.len(), output = %path.display(), "results written");
        }
        None => recorder.write_to(&mut io::stdout().lock())?,
    }

    Ok(())
}
