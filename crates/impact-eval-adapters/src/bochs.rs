//! Bochs build adapter.
//!
//! The buildable tree sits in the repository's `bochs/` subdirectory.
//! Several configure options imply others; sampled variants are repaired to
//! satisfy those implications before use, so every generated variant
//! actually configures.

use std::path::PathBuf;

use async_trait::async_trait;
use impact_eval_core::adapter::{BuildAdapter, BuildContext, BuildOutput};
use impact_eval_core::{Result, Variant};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::support::{run_build, run_configure};

const OPTIONS: &[&str] = &[
    "--disable-largefile",
    "--enable-idle-hack",
    "--enable-plugins",
    "--disable-a20-pin",
    "--enable-x86-64",
    "--enable-smp",
    "--enable-long-phy-address",
    "--enable-repeat-speedups",
    "--enable-fast-function-calls",
    "--enable-handlers-chaining",
    "--enable-trace-linking",
    "--enable-configurable-msrs",
    "--disable-show-ips",
    "--enable-debugger",
    "--enable-all-optimizations",
    "--enable-readline",
    "--disable-logging",
    "--disable-stats",
    "--enable-vmx=1",
    "--enable-svm",
    "--enable-protection-keys",
    "--enable-cet",
    "--enable-uintr",
    "--enable-3dnow",
    "--enable-memtype",
    "--enable-avx",
    "--enable-evex",
    "--enable-x86-debugger",
    "--disable-pci",
    "--enable-pcidev",
    "--enable-usb",
    "--enable-usb-ohci",
    "--enable-usb-xhci",
    "--enable-ne2000",
    "--enable-pnic",
    "--enable-e1000",
    "--enable-raw-serial",
    "--enable-clgd54xx",
    "--enable-voodoo",
    "--disable-cdrom",
    "--enable-sb16",
    "--enable-es1370",
    "--enable-busmouse",
    "--disable-docbook",
    "--disable-xpm",
];

/// Options requiring the 64-bit CPU model.
const X64_OPTIONS: &[&str] = &[
    "--enable-svm",
    "--enable-protection-keys",
    "--enable-cet",
    "--enable-uintr",
    "--enable-avx",
    "--enable-evex",
];

/// Options meaningless without PCI support.
const PCI_OPTIONS: &[&str] = &[
    "--enable-pcidev",
    "--enable-usb",
    "--enable-usb-ohci",
    "--enable-usb-ehci",
    "--enable-usb-xhci",
    "--enable-es1370",
    "--enable-e1000",
    "--enable-voodoo",
    "--enable-pnic",
];

pub struct BochsAdapter;

impl BochsAdapter {
    fn source_dir(ctx: &BuildContext) -> PathBuf {
        ctx.repo.join("bochs")
    }

    fn contains(flags: &[String], wanted: &str) -> bool {
        flags.iter().any(|flag| flag == wanted)
    }
}

#[async_trait]
impl BuildAdapter for BochsAdapter {
    fn name(&self) -> &'static str {
        "bochs"
    }

    async fn configure(&self, ctx: &BuildContext, variant: &Variant) -> Result<()> {
        let mut argv = vec!["./configure".to_string()];
        if let Some(cpp) = ctx.compiler_pp() {
            argv.push(format!("CXX={cpp}"));
        }
        if let Some(cc) = &ctx.compiler {
            argv.push(format!("CC={cc}"));
        }
        // __TIME__/__DATE__ land in the C++ objects; pin them alongside the
        // plugin flags.
        argv.push(format!(
            "CXXFLAGS={} -D__TIME__=\"0\" -D__DATE__=\"0\" -DNDEBUG",
            ctx.plugin_cflags()
        ));
        argv.push(format!("CFLAGS={}", ctx.plugin_cflags()));
        argv.extend(variant.flags().iter().cloned());
        debug!(?argv, "bochs configure");

        let mut spec = ctx.command("configure", argv).cwd(Self::source_dir(ctx));
        for (key, value) in self.deterministic_env() {
            spec = spec.env(key, value);
        }
        run_configure(&spec).await?;
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext, _variant: &Variant) -> Result<BuildOutput> {
        let mut spec = ctx
            .command(
                "make",
                vec![
                    "make".to_string(),
                    "--output-sync".to_string(),
                    format!("-j{}", ctx.jobs),
                ],
            )
            .cwd(Self::source_dir(ctx));
        for (key, value) in self.deterministic_env() {
            spec = spec.env(key, value);
        }

        let out = run_build(&spec).await?;
        Ok(BuildOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn clean(&self, ctx: &BuildContext) -> Result<()> {
        let spec = ctx.command(
            "clean",
            vec![
                "git".to_string(),
                "clean".to_string(),
                "-dfx".to_string(),
            ],
        );
        run_build(&spec).await?;
        Ok(())
    }

    async fn capture_compile_commands(
        &self,
        ctx: &BuildContext,
        build_stdout: &str,
    ) -> Result<()> {
        let spec = ctx
            .command(
                "compiledb",
                vec![
                    "compiledb".to_string(),
                    "--parse".to_string(),
                    "-".to_string(),
                ],
            )
            .stdin(build_stdout.as_bytes().to_vec());
        run_build(&spec).await?;
        Ok(())
    }

    fn sample_variant(&self, rng: &mut StdRng) -> Vec<String> {
        let count = rng.gen_range(0..=OPTIONS.len() / 2);
        let mut flags: Vec<String> = OPTIONS
            .choose_multiple(rng, count)
            .map(|flag| flag.to_string())
            .collect();

        // 64-bit-only features pull in the 64-bit CPU model.
        if !Self::contains(&flags, "--enable-x86-64")
            && flags.iter().any(|f| X64_OPTIONS.contains(&f.as_str()))
        {
            flags.push("--enable-x86-64".to_string());
        }

        // Disabling PCI drops every device that hangs off the bus.
        if Self::contains(&flags, "--disable-pci") {
            flags.retain(|f| !PCI_OPTIONS.contains(&f.as_str()));
        }

        // EVEX decoding requires the AVX model.
        if Self::contains(&flags, "--enable-evex") && !Self::contains(&flags, "--enable-avx") {
            flags.push("--enable-avx".to_string());
        }

        flags
    }
}
