//! Build adapter contract: per-project configure/build/clean operations.
//!
//! One adapter per target project, selected by name from a static registry.
//! The driver only ever talks to this trait; everything project-specific
//! (configure invocations, flag pools, deterministic-build pinning, alarm
//! lists) lives behind it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::rngs::StdRng;

use crate::error::Result;
use crate::process::{run_command, CommandSpec};
use crate::variant::Variant;

/// Run-wide inputs shared by every adapter invocation.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Path to the project working tree being built in place.
    pub repo: PathBuf,

    /// Compiler plugin injected into CFLAGS, when the tool requires one.
    pub plugin: Option<PathBuf>,

    /// C compiler path handed to configure/make.
    pub compiler: Option<String>,

    /// Parallel make jobs.
    pub jobs: usize,

    /// Per-stage timeout in seconds, 0 for none.
    pub timeout_secs: u64,
}

impl BuildContext {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            plugin: None,
            compiler: None,
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            timeout_secs: 0,
        }
    }

    /// The C++ compiler matching `compiler` (clang -> clang++).
    pub fn compiler_pp(&self) -> Option<String> {
        self.compiler
            .as_ref()
            .map(|cc| cc.replace("clang", "clang++"))
    }

    /// CFLAGS fragment injecting the analysis plugin and neutralizing
    /// location macros that would otherwise defeat hash stability.
    pub fn plugin_cflags(&self) -> String {
        match &self.plugin {
            Some(plugin) => format!(
                "-fplugin={} -Wno-builtin-macro-redefined -D__LINE__",
                plugin.display()
            ),
            None => String::new(),
        }
    }

    /// A command spec rooted at the working tree with the shared timeout.
    pub fn command(&self, stage: impl Into<String>, argv: Vec<String>) -> CommandSpec {
        CommandSpec::new(stage, argv)
            .cwd(&self.repo)
            .timeout_secs(self.timeout_secs)
    }
}

/// Captured output of a successful build, kept for compile-command capture.
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Per-project build operations consumed by the commit walker.
#[async_trait]
pub trait BuildAdapter: Send + Sync {
    /// Registry name of the target project.
    fn name(&self) -> &'static str;

    /// Configure the tree for `variant`. A non-zero exit is fatal to the run.
    async fn configure(&self, ctx: &BuildContext, variant: &Variant) -> Result<()>;

    /// Build the configured tree, returning captured output. A non-zero exit
    /// maps to `EvalError::Build`, which the driver records per cell.
    async fn build(&self, ctx: &BuildContext, variant: &Variant) -> Result<BuildOutput>;

    /// Remove build state. Defaults to `make clean`.
    async fn clean(&self, ctx: &BuildContext) -> Result<()> {
        let spec = ctx.command("clean", vec!["make".to_string(), "clean".to_string()]);
        let out = run_command(&spec).await?;
        if !out.success() {
            return Err(crate::error::EvalError::Build(format!(
                "make clean exited with {}",
                out.exit_code
            )));
        }
        Ok(())
    }

    /// Write `compile_commands.json` into the working tree after a build.
    /// Projects without a capture mechanism leave this as a no-op.
    async fn capture_compile_commands(
        &self,
        _ctx: &BuildContext,
        _build_stdout: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// Draw one random flag sequence from the project's option pool, with
    /// project-specific consistency rules already applied.
    fn sample_variant(&self, rng: &mut StdRng) -> Vec<String>;

    /// A fixed variant list for projects whose configurations are named
    /// rather than sampled. `Some` bypasses random sampling entirely.
    fn fixed_variants(&self, _count: usize) -> Option<Vec<Vec<String>>> {
        None
    }

    /// Path prefixes excluded from object hashing (host tooling output that
    /// does not reflect target code).
    fn ignore_patterns(&self, _repo: &Path) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Paths historically known to invalidate the analysis (generated parser
    /// tables and friends). Changes touching these get a caution note.
    fn alarm_list(&self) -> &[&'static str] {
        &[]
    }

    /// Environment pinned onto configure/build for deterministic output.
    fn deterministic_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("SOURCE_DATE_EPOCH".to_string(), "1".to_string());
        env
    }
}

/// Minimal adapters for tests.
pub mod testing {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    /// Adapter stub with a configurable option pool and no-op build steps.
    pub struct StubAdapter {
        options: Vec<String>,
        fixed: Option<Vec<Vec<String>>>,
    }

    impl StubAdapter {
        pub fn with_options(options: &[&str]) -> Self {
            Self {
                options: options.iter().map(|s| s.to_string()).collect(),
                fixed: None,
            }
        }

        pub fn fixed(variants: Vec<Vec<String>>) -> Self {
            Self {
                options: Vec::new(),
                fixed: Some(variants),
            }
        }
    }

    #[async_trait]
    impl BuildAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn configure(&self, _ctx: &BuildContext, _variant: &Variant) -> Result<()> {
            Ok(())
        }

        async fn build(&self, _ctx: &BuildContext, _variant: &Variant) -> Result<BuildOutput> {
            Ok(BuildOutput::default())
        }

        async fn clean(&self, _ctx: &BuildContext) -> Result<()> {
            Ok(())
        }

        fn sample_variant(&self, rng: &mut StdRng) -> Vec<String> {
            let count = rng.gen_range(0..=self.options.len() / 2);
            self.options
                .choose_multiple(rng, count)
                .cloned()
                .collect()
        }

        fn fixed_variants(&self, count: usize) -> Option<Vec<Vec<String>>> {
            self.fixed
                .as_ref()
                .map(|v| v.iter().take(count).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiler_pp_maps_clang() {
        let mut ctx = BuildContext::new("/tmp/repo");
        ctx.compiler = Some("/opt/llvm/bin/clang".to_string());
        assert_eq!(ctx.compiler_pp().unwrap(), "/opt/llvm/bin/clang++");
    }

    #[test]
    fn plugin_cflags_empty_without_plugin() {
        let ctx = BuildContext::new("/tmp/repo");
        assert!(ctx.plugin_cflags().is_empty());

        let mut ctx = ctx;
        ctx.plugin = Some(PathBuf::from("/opt/plugin.so"));
        let cflags = ctx.plugin_cflags();
        assert!(cflags.contains("-fplugin=/opt/plugin.so"));
        assert!(cflags.contains("-D__LINE__"));
    }

    #[test]
    fn default_deterministic_env_pins_epoch() {
        let adapter = testing::StubAdapter::with_options(&[]);
        let env = adapter.deterministic_env();
        assert_eq!(env.get("SOURCE_DATE_EPOCH").map(String::as_str), Some("1"));
    }
}
