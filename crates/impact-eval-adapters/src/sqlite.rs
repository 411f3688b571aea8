//! SQLite build adapter.
//!
//! Built from the full source tree (no amalgamation) so per-unit objects
//! exist to hash. The generated `sqlite3.h` embeds version and source id
//! strings; `tool/mksqlite3h.tcl` is pinned during the build to keep those
//! out of the object hashes.

use std::fs;

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
    "--disable-threadsafe",
    "--disable-readline",
    "--disable-load-extension",
    "--disable-math",
    "--enable-memsys5",
    "--enable-memsys3",
    "--enable-fts4",
    "--enable-update-limit",
    "--enable-geopoly",
    "--enable-rtree",
    "--enable-session",
];

const ALARM_LIST: &[&str] = &[
    "config.h.in",
    "src/parse.y",
    "src/sqlite.h.in",
    "src/vdbe.c",
    "src/vdbe.h",
    "tool/mkkeywordhash.c",
];

const ZVERSION_PIN: (&str, &str) = (
    "set zVersion",
    "set zVersion \"0.0.0\" ;# set zVersion",
);
const ZSOURCEID_PIN: (&str, &str) = (
    "set zSourceId",
    "set zSourceId \"0000-00-00 00:00:00 \
     0000000000000000000000000000000000000000000000000000000000000000\" \
     ;# set zSourceId",
);

pub struct SqliteAdapter;

#[async_trait]
impl BuildAdapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    /// Nothing to do up front: the tree is reconfigured inside every build
    /// so incremental rebuilds see a consistent config for the commit.
    async fn configure(&self, _ctx: &BuildContext, _variant: &Variant) -> Result<()> {
        Ok(())
    }

    async fn build(&self, ctx: &BuildContext, variant: &Variant) -> Result<BuildOutput> {
        let mut argv = vec!["./configure".to_string()];
        if let Some(cc) = &ctx.compiler {
            argv.push(format!("CC={cc}"));
        }
        argv.push("--disable-tcl".to_string());
        argv.push("--disable-amalgamation".to_string());
        argv.push(format!("CFLAGS={}", ctx.plugin_cflags()));
        argv.extend(variant.flags().iter().cloned());
        debug!(?argv, "sqlite configure");
        run_configure(&ctx.command("configure", argv)).await?;

        // Pin the header generator, make, restore the commit's own file.
        let tcl = ctx.repo.join("tool/mksqlite3h.tcl");
        let original = fs::read_to_string(&tcl)?;
        let pinned = original
            .replacen(ZVERSION_PIN.0, ZVERSION_PIN.1, 1)
            .replacen(ZSOURCEID_PIN.0, ZSOURCEID_PIN.1, 1);
        fs::write(&tcl, pinned)?;

        let result = run_build(&ctx.command(
            "make",
            vec!["make".to_string(), format!("-j{}", ctx.jobs)],
        ))
        .await;
        fs::write(&tcl, original)?;

        let out = result?;
        Ok(BuildOutput {
            stdout: out.stdout,
            stderr: out.stderr,
        })
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

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn sampled_flags_come_from_the_pool() {
        let adapter = SqliteAdapter;
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..50 {
            let flags = adapter.sample_variant(&mut rng);
            assert!(flags.len() <= OPTIONS.len() / 2);
            for flag in &flags {
                assert!(OPTIONS.contains(&flag.as_str()));
            }
        }
    }

    #[test]
    fn header_generator_pin_round_trips() {
        let original = "set zVersion [string trim $zVersion]\n\
                        set zSourceId [string range $zSourceId 0 79]\n";
        let pinned = original
            .replacen(ZVERSION_PIN.0, ZVERSION_PIN.1, 1)
            .replacen(ZSOURCEID_PIN.0, ZSOURCEID_PIN.1, 1);

        assert!(pinned.contains("set zVersion \"0.0.0\" ;#"));
        assert!(pinned.contains(";# set zSourceId"));
        // The rest of each line survives behind the comment.
        assert!(pinned.contains("[string trim $zVersion]"));
    }

    #[test]
    fn alarm_list_covers_the_parser_generator() {
        let adapter = SqliteAdapter;
        assert!(adapter.alarm_list().contains(&"src/parse.y"));
        assert!(adapter.alarm_list().contains(&"tool/mkkeywordhash.c"));
    }
}
