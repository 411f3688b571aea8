//! Content-hash snapshots of compiled object artifacts.
//!
//! Persisted layout under the dump directory:
//! - `{commit}-{variantId}-hashes.json` — sorted path -> sha256 mapping
//! - `{commit}-{variantId}-compile_commands.json` — verbatim compiler
//!   invocation records copied out of the build tree
//! - `info/` — oracle provenance dumps keyed by commit + variant id
//!
//! Snapshot writes are first-write-wins: an existing file is never
//! overwritten, which makes interrupted or repeated runs resumable and lets
//! parallel runs share a dump directory safely.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::Result;
use crate::variant::VariantId;

/// Mapping from artifact path to content hash for one (commit, variant).
pub type HashSnapshot = BTreeMap<String, String>;

/// Filesystem store for per-(commit, variant) object hash snapshots.
pub struct ObjectHashStore {
    dump_dir: PathBuf,
}

impl ObjectHashStore {
    /// Open (creating if needed) a store rooted at `dump_dir`, including its
    /// `info/` provenance area.
    pub fn new(dump_dir: impl Into<PathBuf>) -> Result<Self> {
        let dump_dir = dump_dir.into();
        fs::create_dir_all(dump_dir.join("info"))?;
        Ok(Self { dump_dir })
    }

    pub fn dump_dir(&self) -> &Path {
        &self.dump_dir
    }

    /// Provenance dump area consumed by the oracle's dump mode.
    pub fn info_dir(&self) -> PathBuf {
        self.dump_dir.join("info")
    }

    /// Provenance record path for one (commit, variant).
    pub fn info_path(&self, commit: &str, variant_id: &str) -> PathBuf {
        self.info_dir().join(format!("{commit}-{variant_id}.json"))
    }

    fn snapshot_path(&self, commit: &str, variant_id: &str) -> PathBuf {
        self.dump_dir
            .join(format!("{commit}-{variant_id}-hashes.json"))
    }

    fn compile_commands_path(&self, commit: &str, variant_id: &str) -> PathBuf {
        self.dump_dir
            .join(format!("{commit}-{variant_id}-compile_commands.json"))
    }

    /// Hash every compiled object artifact under `root`.
    ///
    /// Only `.o` files count; `.mod.o` link aggregates bundle multiple
    /// translation units and would produce false "changed" signals, so they
    /// are skipped, as is anything under an ignore prefix.
    pub fn hash_tree(root: &Path, ignore_patterns: &[PathBuf]) -> Result<HashSnapshot> {
        let mut snapshot = HashSnapshot::new();

        for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            if !name.ends_with(".o") || name.ends_with(".mod.o") {
                continue;
            }
            if ignore_patterns.iter().any(|prefix| path.starts_with(prefix)) {
                continue;
            }

            let mut hasher = Sha256::new();
            hasher.update(fs::read(path)?);
            snapshot.insert(
                path.to_string_lossy().into_owned(),
                hex::encode(hasher.finalize()),
            );
        }

        Ok(snapshot)
    }

    /// Persist a snapshot, at most once per key.
    ///
    /// If a snapshot file for `(commit, variant_id)` already exists the call
    /// is a no-op, even when `snapshot` differs: the first write is the
    /// authoritative artifact.
    pub fn persist(&self, commit: &str, variant_id: &str, snapshot: &HashSnapshot) -> Result<()> {
        let path = self.snapshot_path(commit, variant_id);
        if path.exists() {
            debug!(commit, variant_id, "snapshot already persisted, skipping");
            return Ok(());
        }

        // Atomic write: temp file in the same directory, then rename.
        let mut tmp = NamedTempFile::new_in(&self.dump_dir)?;
        tmp.write_all(serde_json::to_string(snapshot)?.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;

        debug!(commit, variant_id, artifacts = snapshot.len(), "snapshot persisted");
        Ok(())
    }

    /// Load the snapshot for one key, or `None` when absent.
    pub fn load(&self, commit: &str, variant_id: &str) -> Result<Option<HashSnapshot>> {
        let path = self.snapshot_path(commit, variant_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&fs::read_to_string(path)?)?))
    }

    /// All persisted snapshots for one commit, keyed by variant id.
    pub fn load_commit(&self, commit: &str) -> Result<BTreeMap<VariantId, HashSnapshot>> {
        let mut by_variant = BTreeMap::new();

        for entry in fs::read_dir(&self.dump_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&format!("{commit}-")) else {
                continue;
            };
            let Some(variant_id) = rest.strip_suffix("-hashes.json") else {
                continue;
            };

            let snapshot: HashSnapshot =
                serde_json::from_str(&fs::read_to_string(entry.path())?)?;
            by_variant.insert(variant_id.to_string(), snapshot);
        }

        Ok(by_variant)
    }

    /// Copy the build's `compile_commands.json` into the dump layout.
    /// Unlike snapshots this is refreshed on every call.
    pub fn store_compile_commands(
        &self,
        commit: &str,
        variant_id: &str,
        source: &Path,
    ) -> Result<()> {
        fs::copy(source, self.compile_commands_path(commit, variant_id))?;
        Ok(())
    }

    /// `variant:path` entries for every compile-command record of `commit`,
    /// in the form the analysis tool's `--compile-commands-path-map` expects.
    pub fn compile_command_map(&self, commit: &str) -> Result<Vec<String>> {
        let mut entries = Vec::new();

        for entry in fs::read_dir(&self.dump_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&format!("{commit}-")) else {
                continue;
            };
            let Some(variant_id) = rest.strip_suffix("-compile_commands.json") else {
                continue;
            };
            entries.push(format!("{variant_id}:{}", entry.path().display()));
        }

        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, ObjectHashStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ObjectHashStore::new(dir.path().join("dump")).unwrap();
        (dir, store)
    }

    fn sample_snapshot() -> HashSnapshot {
        let mut snap = HashSnapshot::new();
        snap.insert("src/a.o".to_string(), "aa11".to_string());
        snap.insert("src/b.o".to_string(), "bb22".to_string());
        snap
    }

    #[test]
    fn creates_info_dir() {
        let (_dir, store) = make_store();
        assert!(store.info_dir().is_dir());
    }

    #[test]
    fn persist_then_load_roundtrip() {
        let (_dir, store) = make_store();
        let snap = sample_snapshot();
        store.persist("abc123", "0011aabb", &snap).unwrap();
        let loaded = store.load("abc123", "0011aabb").unwrap().unwrap();
        assert_eq!(loaded, snap);
    }

    #[test]
    fn load_missing_is_none() {
        let (_dir, store) = make_store();
        assert!(store.load("nope", "00000000").unwrap().is_none());
    }

    #[test]
    fn persist_is_idempotent_first_write_wins() {
        let (_dir, store) = make_store();
        let first = sample_snapshot();
        store.persist("abc123", "0011aabb", &first).unwrap();

        let mut second = sample_snapshot();
        second.insert("src/c.o".to_string(), "cc33".to_string());
        store.persist("abc123", "0011aabb", &second).unwrap();

        let loaded = store.load("abc123", "0011aabb").unwrap().unwrap();
        assert_eq!(loaded, first, "second persist must not clobber the first");
    }

    #[test]
    fn snapshot_json_has_sorted_keys() {
        let (_dir, store) = make_store();
        let mut snap = HashSnapshot::new();
        snap.insert("z.o".to_string(), "1".to_string());
        snap.insert("a.o".to_string(), "2".to_string());
        store.persist("c1", "v1", &snap).unwrap();

        let raw = fs::read_to_string(store.snapshot_path("c1", "v1")).unwrap();
        assert!(raw.find("a.o").unwrap() < raw.find("z.o").unwrap());
    }

    #[test]
    fn hash_tree_filters_objects() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("tools")).unwrap();
        fs::write(root.join("src/a.o"), b"object a").unwrap();
        fs::write(root.join("src/a.c"), b"source a").unwrap();
        fs::write(root.join("src/all.mod.o"), b"aggregate").unwrap();
        fs::write(root.join("tools/helper.o"), b"host tool").unwrap();

        let ignore = vec![root.join("tools")];
        let snap = ObjectHashStore::hash_tree(root, &ignore).unwrap();

        assert_eq!(snap.len(), 1);
        let key = snap.keys().next().unwrap();
        assert!(key.ends_with("src/a.o"));
    }

    #[test]
    fn hash_tree_is_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("x.o"), b"payload").unwrap();
        let first = ObjectHashStore::hash_tree(dir.path(), &[]).unwrap();

        // Same content, same hash.
        let again = ObjectHashStore::hash_tree(dir.path(), &[]).unwrap();
        assert_eq!(first, again);

        fs::write(dir.path().join("x.o"), b"payload changed").unwrap();
        let changed = ObjectHashStore::hash_tree(dir.path(), &[]).unwrap();
        assert_ne!(first, changed);
    }

    #[test]
    fn load_commit_scans_only_that_commit() {
        let (_dir, store) = make_store();
        store.persist("c1", "v1", &sample_snapshot()).unwrap();
        store.persist("c1", "v2", &sample_snapshot()).unwrap();
        store.persist("c2", "v1", &sample_snapshot()).unwrap();

        let by_variant = store.load_commit("c1").unwrap();
        assert_eq!(by_variant.len(), 2);
        assert!(by_variant.contains_key("v1"));
        assert!(by_variant.contains_key("v2"));
    }

    #[test]
    fn compile_command_map_format() {
        let (dir, store) = make_store();
        let src = dir.path().join("compile_commands.json");
        fs::write(&src, b"[]").unwrap();

        store.store_compile_commands("c9", "deadbeef", &src).unwrap();
        let map = store.compile_command_map("c9").unwrap();
        assert_eq!(map.len(), 1);
        assert!(map[0].starts_with("deadbeef:"));
        assert!(map[0].ends_with("c9-deadbeef-compile_commands.json"));
    }
}
