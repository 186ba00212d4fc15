//! Stable content digest over ordered resource id sequences.
//!
//! The digest keys save compatibility and the migration graph, so it must be
//! bit-exact across platforms and versions. The algorithm is FNV-1a over each
//! id's UTF-16 code units, with a `0xFF` separator folded in after every id.
//! The separator byte-distinguishes `["ab"]` from `["a", "b"]`, which would
//! otherwise collide.

use serde::{Deserialize, Serialize};

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET_BASIS: u32 = 0x811C_9DC5;
/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;
/// Separator folded in after each id.
const ID_SEPARATOR: u32 = 0xFF;

// ---------------------------------------------------------------------------
// ResourceDefinitionDigest
// ---------------------------------------------------------------------------

/// Digest of an ordered resource definition set.
///
/// `version` is always `ids.len()`; `hash` is `"fnv1a-"` followed by eight
/// lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDefinitionDigest {
    /// Ordered resource ids the digest was computed over.
    pub ids: Vec<String>,
    /// Number of ids (redundant with `ids.len()`, kept on the wire for
    /// cheap sanity checks during hydration).
    pub version: usize,
    /// `"fnv1a-" + hex8` hash over the id sequence.
    pub hash: String,
}

impl ResourceDefinitionDigest {
    /// Compute the digest for an ordered id sequence.
    pub fn from_ids<S: AsRef<str>>(ids: &[S]) -> Self {
        let ids: Vec<String> = ids.iter().map(|s| s.as_ref().to_owned()).collect();
        let hash = compute_stable_digest(&ids);
        Self {
            version: ids.len(),
            ids,
            hash,
        }
    }

    /// Whether this digest is internally consistent: `version` matches the
    /// id count and `hash` matches a recomputation over `ids`.
    pub fn is_self_consistent(&self) -> bool {
        self.version == self.ids.len() && self.hash == compute_stable_digest(&self.ids)
    }
}

/// Compute the stable `"fnv1a-" + hex8` digest over an ordered id sequence.
///
/// The hash runs over each id's UTF-16 code units followed by a `0xFF`
/// separator, so element boundaries are part of the hash input.
pub fn compute_stable_digest<S: AsRef<str>>(ids: &[S]) -> String {
    let mut h = FNV_OFFSET_BASIS;
    for id in ids {
        for unit in id.as_ref().encode_utf16() {
            h = (h ^ unit as u32).wrapping_mul(FNV_PRIME);
        }
        h = (h ^ ID_SEPARATOR).wrapping_mul(FNV_PRIME);
    }
    format!("fnv1a-{h:08x}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
