//! Working-tree git plumbing for the commit walk.
//!
//! The walk mutates one working tree in place: forced checkouts move between
//! base commits while untracked build artifacts survive for incremental
//! rebuilds, and changes are applied as uncommitted cherry-picks.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{EvalError, Result};

/// Handle to the evaluated project's git working tree.
pub struct GitWorkspace {
    repo: PathBuf,
}

impl GitWorkspace {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo(&self) -> &Path {
        &self.repo
    }

    fn run(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .map_err(|e| EvalError::Git(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EvalError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Forced checkout. Tracked modifications are discarded; untracked build
    /// output stays in place.
    pub fn checkout(&self, commit: &str) -> Result<()> {
        debug!(commit, "git checkout --force");
        self.run(&["checkout", "--force", commit])?;
        Ok(())
    }

    /// Apply `commit` onto the current tree as uncommitted changes
    /// (cherry-pick without committing, then unstage). Merge commits are
    /// applied against their first parent, matching the first-parent walk.
    pub fn apply(&self, commit: &str) -> Result<()> {
        debug!(commit, "applying change");
        let parents = self.run(&["rev-list", "--parents", "-n", "1", commit])?;
        let is_merge = parents.split_whitespace().count() > 2;
        if is_merge {
            self.run(&["cherry-pick", "--no-commit", commit, "-m1"])?;
        } else {
            self.run(&["cherry-pick", "--no-commit", commit])?;
        }
        self.run(&["reset"])?;
        Ok(())
    }

    /// First-parent history for `range` (`start..end`), oldest first.
    pub fn rev_list(&self, range: &str) -> Result<Vec<String>> {
        let stdout = self.run(&["rev-list", range, "--first-parent"])?;
        let mut commits: Vec<String> = stdout.lines().map(str::to_string).collect();
        commits.reverse();
        Ok(commits)
    }

    /// Remove untracked files and directories (`git clean -dxf`).
    pub fn clean(&self) -> Result<()> {
        debug!("git clean -dxf");
        self.run(&["clean", "-dxf"])?;
        Ok(())
    }

    /// Discard all tracked modifications.
    pub fn reset_hard(&self) -> Result<()> {
        debug!("git reset --hard");
        self.run(&["reset", "--hard"])?;
        Ok(())
    }

    /// Diffstat of the current uncommitted changes.
    pub fn diff_stat(&self) -> Result<String> {
        self.run(&["diff", "--stat"])
    }

    /// All tracked file paths, relative to the repository root.
    pub fn ls_files(&self) -> Result<Vec<String>> {
        Ok(self
            .run(&["ls-files"])?
            .lines()
            .map(str::to_string)
            .collect())
    }
}
