//! Linux kernel build adapter.
//!
//! Kernel variants are named configs (tinyconfig, defconfig, randconfig)
//! rather than sampled flag sets; each variant's single "flag" is the config
//! file name, resolved under a shared config directory and handed to make
//! via `KCONFIG_CONFIG`. Only `vmlinux` is built, and host tooling under
//! `tools/` and `scripts/` is excluded from object hashing.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use impact_eval_core::adapter::{BuildAdapter, BuildContext, BuildOutput};
use impact_eval_core::{EvalError, Result, Variant};
use rand::rngs::StdRng;
use tracing::debug;

use crate::support::run_build;

const NAMED_CONFIGS: &[&str] = &["tinyconfig", "defconfig"];

const ALARM_LIST: &[&str] = &[
    "arch/x86/entry/vdso/vdso2c.c",
    "arch/x86/entry/vdso/vdso2c.h",
    "kernel/bounds.s",
    "arch/x86/lib/x86-opcode-map.txt",
    "arch/x86/tools/gen-insn-attr-x86.awk",
    "include/asm-generic/early_ioremap.h",
    "include/asm-generic/irq_regs.h",
    "include/asm-generic/kmap_size.h",
    "include/asm-generic/local64.h",
    "include/asm-generic/mmiowb.h",
    "include/asm-generic/platform-feature.h",
    "include/asm-generic/rwonce.h",
    "include/asm-generic/syscalls_32.h",
    "include/asm-generic/unaligned.h",
    "include/uapi/asm-generic/bpf_perf_event.h",
    "include/uapi/asm-generic/errno.h",
    "include/uapi/asm-generic/fcntl.h",
    "include/uapi/asm-generic/ioctl.h",
    "include/uapi/asm-generic/ioctls.h",
    "include/uapi/asm-generic/ipcbuf.h",
    "include/uapi/asm-generic/param.h",
    "include/uapi/asm-generic/poll.h",
    "include/uapi/asm-generic/resource.h",
    "include/uapi/asm-generic/socket.h",
    "include/uapi/asm-generic/sockios.h",
    "include/uapi/asm-generic/termbits.h",
    "include/uapi/asm-generic/termios.h",
    "include/uapi/asm-generic/types.h",
    "include/uapi/asm-generic/unistd_32.h",
];

/// `BUILD_LTO_INFO` embeds toolchain details into `vmlinux`; both emitters
/// are commented out for the duration of the build.
const MODPOST_LTO: &str = r#"buf_printf(b, "BUILD_LTO_INFO;\n");"#;
const VERSION_LTO: &str = "BUILD_LTO_INFO;";

pub struct LinuxAdapter {
    config_dir: PathBuf,
}

impl LinuxAdapter {
    pub fn new() -> Self {
        Self {
            config_dir: PathBuf::from("/config"),
        }
    }

    /// Use kernel config files from `dir` instead of `/config`.
    pub fn with_config_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: dir.into(),
        }
    }
}

impl Default for LinuxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BuildAdapter for LinuxAdapter {
    fn name(&self) -> &'static str {
        "linux"
    }

    /// The config is applied by make itself via `KCONFIG_CONFIG`.
    async fn configure(&self, _ctx: &BuildContext, _variant: &Variant) -> Result<()> {
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext, variant: &Variant) -> Result<BuildOutput> {
        let config = variant.flags().first().cloned().ok_or_else(|| {
            EvalError::Configuration("linux variants must name a kernel config".to_string())
        })?;

        let mut argv = vec!["make".to_string(), format!("-j{}", ctx.jobs)];
        if let Some(cc) = &ctx.compiler {
            argv.push(format!("CC={cc}"));
        }
        argv.push(format!("KCFLAGS={}", ctx.plugin_cflags()));
        argv.push("KERNELRELEASE=\"testing\"".to_string());
        argv.push("KBUILD_BUILD_TIMESTAMP=@0".to_string());
        argv.push("KBUILD_BUILD_VERSION=0".to_string());
        argv.push(format!(
            "KCONFIG_CONFIG={}",
            self.config_dir.join(&config).display()
        ));
        argv.push("vmlinux".to_string());
        debug!(config, "linux build");

        // Neutralize BUILD_LTO_INFO for the build, then restore the tree.
        let modpost = ctx.repo.join("scripts/mod/modpost.c");
        let version = ctx.repo.join("init/version.c");
        let modpost_orig = fs::read_to_string(&modpost)?;
        let version_orig = fs::read_to_string(&version)?;
        fs::write(
            &modpost,
            modpost_orig.replace(MODPOST_LTO, &format!("//{MODPOST_LTO}")),
        )?;
        fs::write(
            &version,
            version_orig.replace(VERSION_LTO, &format!("//{VERSION_LTO}")),
        )?;

        let result = run_build(&ctx.command("make", argv)).await;
        fs::write(&modpost, modpost_orig)?;
        fs::write(&version, version_orig)?;

        let out = result?;
        Ok(BuildOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
    }

    async fn capture_compile_commands(
        &self,
        ctx: &BuildContext,
        _build_stdout: &str,
    ) -> Result<()> {
        let spec = ctx.command(
            "gen_compile_commands",
            vec!["scripts/clang-tools/gen_compile_commands.py".to_string()],
        );
        run_build(&spec).await?;
        Ok(())
    }

    fn sample_variant(&self, _rng: &mut StdRng) -> Vec<String> {
        // Never reached: fixed_variants bypasses sampling.
        Vec::new()
    }

    fn fixed_variants(&self, count: usize) -> Option<Vec<Vec<String>>> {
        let configs = (0..count)
            .map(|i| match NAMED_CONFIGS.get(i) {
                Some(name) => vec![name.to_string()],
                None => vec![format!("randconfig_{i}")],
            })
            .collect();
        Some(configs)
    }

    fn ignore_patterns(&self, repo: &Path) -> Vec<PathBuf> {
        vec![repo.join("tools"), repo.join("scripts")]
    }

    fn alarm_list(&self) -> &[&'static str] {
        ALARM_LIST
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_variants_start_with_named_configs() {
        let adapter = LinuxAdapter::new();
        let variants = adapter.fixed_variants(4).unwrap();
        assert_eq!(
            variants,
            vec![
                vec!["tinyconfig".to_string()],
                vec!["defconfig".to_string()],
                vec!["randconfig_2".to_string()],
                vec!["randconfig_3".to_string()],
            ]
        );
    }

    #[test]
    fn fixed_variants_respect_count() {
        let adapter = LinuxAdapter::new();
        assert_eq!(adapter.fixed_variants(1).unwrap().len(), 1);
        assert!(adapter.fixed_variants(0).unwrap().is_empty());
    }

    #[test]
    fn host_tooling_is_ignored_for_hashing() {
        let adapter = LinuxAdapter::new();
        let patterns = adapter.ignore_patterns(Path::new("/work/linux"));
        assert_eq!(
            patterns,
            vec![
                PathBuf::from("/work/linux/tools"),
                PathBuf::from("/work/linux/scripts"),
            ]
        );
    }

    #[test]
    fn lto_patch_round_trips() {
        let source = format!("static void f(void) {{\n\t{MODPOST_LTO}\n}}\n");
        let patched = source.replace(MODPOST_LTO, &format!("//{MODPOST_LTO}"));
        assert!(patched.contains(&format!("//{MODPOST_LTO}")));
        assert_eq!(patched.replace(&format!("//{MODPOST_LTO}"), MODPOST_LTO), source);
    }
}
