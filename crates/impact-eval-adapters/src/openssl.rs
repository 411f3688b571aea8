//! OpenSSL build adapter.
//!
//! Configures with `./config no-shared` plus sampled `-no-*` feature flags.
//! `VERSION.dat` is pinned during configure so version metadata baked into
//! objects stays identical across commits.

use std::fs;

use async_trait::async_trait;
use impact_eval_core::adapter::{BuildAdapter, BuildContext, BuildOutput};
use impact_eval_core::process::{run_command, CommandSpec};
use impact_eval_core::{EvalError, Result, Variant};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::support::{run_build, run_configure};

const OPTIONS: &[&str] = &[
    "-no-dtls",
    "-no-async",
    "-no-dh",
    "-no-secure-memory",
    "-no-dsa",
    "-no-ui-console",
    "-no-rmd160",
    "-no-ts",
    "-no-dgram",
    "-no-cmp",
    "-no-module",
    "-no-ssl-trace",
    "-no-chacha",
    "-no-asm",
    "-no-pic",
    "-no-whirlpool",
    "-no-blake2",
    "-no-aria",
    "-no-poly1305",
    "-no-des",
    "-no-ec2m",
    "-no-camellia",
    "-no-uplink",
    "-no-sm4",
    "-no-threads",
    "-no-scrypt",
    "-no-idea",
    "-no-comp",
    "-no-tls",
    "-no-rc4",
    "-no-fips-securitychecks",
    "-no-sse2",
    "-no-ocb",
    "-no-siv",
    "-no-mdc2",
    "-no-acvp-tests",
    "-no-posix-io",
    "-no-bf",
    "-no-pinshared",
    "-no-deprecated",
    "-no-sock",
    "-no-autoerrinit",
    "-no-capieng",
    "-no-afalgeng",
    "-no-dso",
    "-no-srtp",
    "-no-ssl",
    "-no-loadereng",
    "-no-err",
    "-no-dynamic-engine",
    "-no-tests",
    "-no-autoload-config",
    "-no-rfc3779",
    "-no-ec",
    "-no-md4",
    "-no-multiblock",
    "-no-siphash",
    "-no-stdio",
    "-no-psk",
    "-no-seed",
    "-no-ecdh",
    "-no-rc2",
    "-no-sm2",
    "-no-engine",
    "-no-bulk",
    "-no-makedepend",
    "-no-cms",
    "-no-filenames",
    "-no-nextprotoneg",
    "-no-padlockeng",
    "-no-cached-fetch",
    "-no-srp",
    "-no-legacy",
    "-no-gost",
    "-no-ct",
    "-no-static-engine",
    "-no-sm3",
    "-no-rdrand",
    "-no-ecdsa",
    "-no-ocsp",
    "-no-cast",
    "-no-cmac",
    "-no-autoalginit",
];

const ALARM_LIST: &[&str] = &[
    "apps/progs.pl",
    "include/crypto/bn_conf.h.in",
    "include/crypto/dso_conf.h.in",
    "include/openssl/asn1.h.in",
    "include/openssl/asn1t.h.in",
    "include/openssl/bio.h.in",
    "include/openssl/cmp.h.in",
    "include/openssl/cms.h.in",
    "include/openssl/conf.h.in",
    "include/openssl/configuration.h.in",
    "include/openssl/crmf.h.in",
    "include/openssl/crypto.h.in",
    "include/openssl/ct.h.in",
    "include/openssl/err.h.in",
    "include/openssl/ess.h.in",
    "include/openssl/fipskey.h.in",
    "include/openssl/lhash.h.in",
    "include/openssl/ocsp.h.in",
    "include/openssl/opensslv.h.in",
    "include/openssl/pkcs12.h.in",
    "include/openssl/pkcs7.h.in",
    "include/openssl/safestack.h.in",
    "include/openssl/srp.h.in",
    "include/openssl/ssl.h.in",
    "include/openssl/ui.h.in",
    "include/openssl/x509.h.in",
    "include/openssl/x509_vfy.h.in",
    "include/openssl/x509v3.h.in",
    "providers/common/der/der_digests_gen.c.in",
    "providers/common/der/der_dsa_gen.c.in",
    "providers/common/der/der_ec_gen.c.in",
    "providers/common/der/der_ecx_gen.c.in",
    "providers/common/der/der_rsa_gen.c.in",
    "providers/common/der/der_sm2_gen.c.in",
    "providers/common/der/der_wrap_gen.c.in",
    "providers/common/include/prov/der_digests.h.in",
    "providers/common/include/prov/der_dsa.h.in",
    "providers/common/include/prov/der_ec.h.in",
    "providers/common/include/prov/der_ecx.h.in",
    "providers/common/include/prov/der_rsa.h.in",
    "providers/common/include/prov/der_sm2.h.in",
    "providers/common/include/prov/der_wrap.h.in",
    "util/mkbuildinf.pl",
];

/// Version metadata written over `VERSION.dat` for the duration of
/// configure, so every commit configures as the same nominal release.
const PINNED_VERSION: &str = "MAJOR=3\n\
    MINOR=3\n\
    PATCH=3\n\
    PRE_RELEASE_TAG=beta3-dev\n\
    BUILD_METADATA=\n\
    RELEASE_DATE=\"\"\n\
    SHLIB_VERSION=3\n";

/// OpenSSL's makedepend step sometimes wants a second pass.
const RERUN_MARKER: &str = "Please run the same make command again";

pub struct OpensslAdapter;

impl OpensslAdapter {
    fn make_spec(&self, ctx: &BuildContext) -> CommandSpec {
        let mut spec = ctx.command(
            "make",
            vec!["make".to_string(), format!("-j{}", ctx.jobs)],
        );
        for (key, value) in self.deterministic_env() {
            spec = spec.env(key, value);
        }
        spec
    }
}

#[async_trait]
impl BuildAdapter for OpensslAdapter {
    fn name(&self) -> &'static str {
        "openssl"
    }

    async fn configure(&self, ctx: &BuildContext, variant: &Variant) -> Result<()> {
        let mut argv = vec!["./config".to_string()];
        if let Some(cc) = &ctx.compiler {
            argv.push(format!("CC={cc}"));
        }
        argv.push(format!("CFLAGS={}", ctx.plugin_cflags()));
        argv.push("no-shared".to_string());
        argv.extend(variant.flags().iter().cloned());
        debug!(?argv, "openssl configure");

        let mut spec = ctx.command("configure", argv);
        for (key, value) in self.deterministic_env() {
            spec = spec.env(key, value);
        }

        // Pin the version for configure, then put the commit's own file back
        // whether configure succeeded or not.
        let version = ctx.repo.join("VERSION.dat");
        let original = fs::read_to_string(&version)?;
        let mut pinned: String = original.lines().map(|line| format!("#{line}\n")).collect();
        pinned.push_str(PINNED_VERSION);
        fs::write(&version, &pinned)?;

        let result = run_configure(&spec).await;
        fs::write(&version, original)?;

        result.map(|_| ())
    }

    async fn build(&self, ctx: &BuildContext, _variant: &Variant) -> Result<BuildOutput> {
        let first = run_command(&self.make_spec(ctx)).await?;
        if first.success() {
            return Ok(BuildOutput {
                stdout: first.stdout,
                stderr: first.stderr,
            });
        }

        if format!("{}{}", first.stdout, first.stderr).contains(RERUN_MARKER) {
            debug!("makedepend requested a second make pass");
            let second = run_build(&self.make_spec(ctx)).await?;
            return Ok(BuildOutput {
                stdout: second.stdout,
                stderr: second.stderr,
            });
        }

        Err(EvalError::Build(format!(
            "make exited with {}",
            first.exit_code
        )))
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
        OPTIONS
            .choose_multiple(rng, count)
            .map(|flag| flag.to_string())
            .collect()
    }

    fn alarm_list(&self) -> &[&'static str] {
        ALARM_LIST
    }
}
