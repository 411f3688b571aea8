//! Snapshot comparison: the ground-truth "equal vs changed" rule.

use tracing::debug;

use crate::hash_store::HashSnapshot;

/// True iff every artifact in `base` exists in `other` with an identical
/// hash and `other` introduces no artifacts absent from `base`.
///
/// The rule is deliberately sensitive in both directions: a removed or
/// rehashed artifact makes the snapshots unequal, and so does a newly added
/// one even when everything pre-existing is untouched. This defines the
/// ground-truth labeling and must not be loosened.
pub fn snapshots_equal(base: &HashSnapshot, other: &HashSnapshot) -> bool {
    let mut equal = true;

    for (path, base_hash) in base {
        match other.get(path) {
            None => {
                debug!(path, "artifact removed");
                equal = false;
            }
            Some(other_hash) if other_hash != base_hash => {
                debug!(path, "artifact changed");
                equal = false;
            }
            Some(_) => {}
        }
    }

    for path in other.keys() {
        if !base.contains_key(path) {
            debug!(path, "artifact added");
            equal = false;
        }
    }

    equal
}
