//! Build configuration variants and reproducible variant generation.
//!
//! A variant is an ordered sequence of enabled feature flags. Its id hashes
//! the flags in the order they were sampled; two permutations of the same
//! flag set therefore get different ids. That is long-standing behavior —
//! snapshot files on disk are keyed by these ids, so the ordering must not
//! be canonicalized here.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::adapter::BuildAdapter;
use crate::error::{EvalError, Result};

/// Short content-derived identifier of a variant (8 hex chars).
pub type VariantId = String;

/// One build configuration: an ordered list of enabled feature flags.
///
/// The empty-flag variant is the canonical baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    flags: Vec<String>,
}

impl Variant {
    pub fn new(flags: Vec<String>) -> Self {
        Self { flags }
    }

    /// The canonical baseline variant: no flags enabled.
    pub fn baseline() -> Self {
        Self { flags: Vec::new() }
    }

    pub fn is_baseline(&self) -> bool {
        self.flags.is_empty()
    }

    /// Flags in sampled order.
    pub fn flags(&self) -> &[String] {
        &self.flags
    }

    /// Content-derived id: sha256 of the space-joined flags, truncated to
    /// 8 hex chars. Order-sensitive on purpose (see module docs).
    pub fn id(&self) -> VariantId {
        let mut hasher = Sha256::new();
        hasher.update(self.flags.join(" ").as_bytes());
        hex::encode(hasher.finalize())[..8].to_string()
    }

    /// The flags as an unordered multiset key, used for distinctness checks.
    fn set_key(&self) -> Vec<String> {
        let mut key = self.flags.clone();
        key.sort();
        key
    }
}

impl std::fmt::Display for Variant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.flags.join(" "))
    }
}

/// Attempt budget multiplier before sampling gives up.
const RETRY_BUDGET_PER_VARIANT: usize = 64;

/// Reproducible variant set generation.
pub struct VariantGenerator;

impl VariantGenerator {
    /// Produce `count` pairwise-distinct variants for `adapter`.
    ///
    /// The first entry is always the baseline. Distinctness is judged on the
    /// unordered flag set, not on ids. Non-baseline variants are returned in
    /// lexicographic order of their flag sequences so the generated grid is
    /// fully determined by `(seed, count)`.
    ///
    /// Adapters with a fixed configuration list (the kernel's named configs)
    /// bypass sampling entirely.
    pub fn generate(adapter: &dyn BuildAdapter, count: usize, seed: u64) -> Result<Vec<Variant>> {
        if let Some(fixed) = adapter.fixed_variants(count) {
            return Ok(fixed.into_iter().map(Variant::new).collect());
        }

        let mut rng = StdRng::seed_from_u64(seed);

        let mut chosen: Vec<Variant> = vec![Variant::baseline()];
        let mut seen: BTreeSet<Vec<String>> = BTreeSet::new();
        seen.insert(Vec::new());

        let budget = RETRY_BUDGET_PER_VARIANT * count.max(1);
        let mut attempts = 0;

        while chosen.len() < count {
            if attempts >= budget {
                return Err(EvalError::GenerationExhausted {
                    requested: count,
                    attempts,
                });
            }
            attempts += 1;

            let candidate = Variant::new(adapter.sample_variant(&mut rng));
            if seen.insert(candidate.set_key()) {
                debug!(variant = %candidate, id = %candidate.id(), "sampled variant");
                chosen.push(candidate);
            }
        }

        // Baseline stays first; everything else sorts by flag sequence.
        chosen[1..].sort_by(|a, b| a.flags.cmp(&b.flags));

        Ok(chosen)
    }
}
