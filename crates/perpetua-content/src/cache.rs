//! Validation cache keyed by a fingerprint of the raw pack bytes.
//!
//! Repeated validation of the same pack (hot-reload loops, multi-slot save
//! restores) is common enough that the validator accepts a pluggable cache.
//! The fingerprint is a blake3 hash over the canonical JSON serialization of
//! the raw value; `serde_json` maps are ordered, so two structurally equal
//! packs fingerprint identically regardless of authoring key order.

use std::collections::HashMap;
use std::sync::Arc;

use crate::issues::ValidationIssue;
use crate::normalize::NormalizedContentPack;

/// A cached validation result.
#[derive(Debug, Clone)]
pub struct CachedValidation {
    /// The normalized pack for `Validated` results, `None` for `Invalid`.
    pub pack: Option<Arc<NormalizedContentPack>>,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

/// Fingerprint-keyed validation cache with hit/miss counters.
#[derive(Debug, Default)]
pub struct ValidationCache {
    entries: HashMap<String, CachedValidation>,
    hits: u64,
    misses: u64,
}

/// Fingerprint of a raw pack value: blake3 over its canonical JSON bytes.
pub fn fingerprint(raw: &serde_json::Value) -> String {
    let canonical = serde_json::to_vec(raw).expect("JSON values always serialize");
    blake3::hash(&canonical).to_hex().to_string()
}

impl ValidationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached result, counting the hit or miss.
    pub fn get(&mut self, fingerprint: &str) -> Option<CachedValidation> {
        match self.entries.get(fingerprint) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.clone())
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a validation result under its fingerprint.
    pub fn insert(&mut self, fingerprint: String, result: CachedValidation) {
        self.entries.insert(fingerprint, result);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    /// Hit ratio over all lookups so far, `0.0` before any lookup.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
