//! ---
//! ptf_section: "02-identity-derivation"
//! ptf_subsection: "module"
//! ptf_type: "source"
//! ptf_scope: "code"
//! ptf_description: "Deterministic case identities and derived values."
//! ptf_version: "v0.0.0-prealpha"
//! ptf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use ptf_common::{FrameworkError, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::ports::{self, PortRegistry};

/// Shortest accepted length for [`Tag::as_hash_string`].
pub const MIN_HASH_LENGTH: usize = 5;

const DIGEST_HEX_PAIRS: usize = 32;

const MIN_PRUNE_THRESHOLD: usize = 1024;

static SEEDS: Lazy<Mutex<SeedTable>> = Lazy::new(|| Mutex::new(SeedTable::default()));

/// Live seed allocations. While any tag holds a seed, every tag built from
/// equal text shares that one allocation.
#[derive(Default)]
struct SeedTable {
    seeds: HashMap<Box<str>, Weak<str>>,
    prune_at: usize,
}

impl SeedTable {
    fn intern(&mut self, seed: &str) -> Arc<str> {
        if let Some(live) = self.seeds.get(seed).and_then(Weak::upgrade) {
            return live;
        }
        if self.seeds.len() >= self.prune_at {
            self.seeds.retain(|_, weak| weak.strong_count() > 0);
            self.prune_at = (self.seeds.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }
        let shared: Arc<str> = Arc::from(seed);
        self.seeds.insert(seed.into(), Arc::downgrade(&shared));
        shared
    }
}

/// Immutable `(seed, index)` identity of a case.
///
/// Two tags are equal when both the seed text and the derivation index match.
/// Seeds are interned: every live tag of one seed, whatever its index or
/// origin, shares a single allocation. The simulated clock registry counts
/// those handles to tell when no case references a seed any more.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag {
    seed: Arc<str>,
    index: i32,
}

impl Tag {
    /// Root tag for `seed`. Fails when the seed is empty or whitespace.
    pub fn from_seed(seed: impl AsRef<str>) -> Result<Self> {
        let seed = seed.as_ref();
        if seed.trim().is_empty() {
            return Err(FrameworkError::argument(
                "seed",
                "value cannot be null or empty",
            ));
        }
        Ok(Self {
            seed: SEEDS.lock().intern(seed),
            index: 0,
        })
    }

    /// The seed text.
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Derivation index, `0` for a root tag.
    pub fn index(&self) -> i32 {
        self.index
    }

    /// Tag derived `increment` steps further from the same seed.
    ///
    /// `t.next(a).next(b) == t.next(a + b)`; the index wraps on overflow.
    #[must_use]
    pub fn next(&self, increment: i32) -> Self {
        Self {
            seed: self.seed.clone(),
            index: self.index.wrapping_add(increment),
        }
    }

    /// Shorthand for `next(1)`.
    #[must_use]
    pub fn next_one(&self) -> Self {
        self.next(1)
    }

    /// Lowercase hex SHA-256 of `"{seed}_{index}"`, truncated to `length`
    /// hex pairs (at most the 32 pairs of the digest).
    pub fn as_hash_string(&self, length: usize) -> Result<String> {
        if length < MIN_HASH_LENGTH {
            return Err(FrameworkError::argument(
                "length",
                format!("must be at least {MIN_HASH_LENGTH}, got {length}"),
            ));
        }
        let digest = Sha256::digest(self.to_string().as_bytes());
        let pairs = length.min(DIGEST_HEX_PAIRS);
        Ok(hex::encode(&digest[..pairs]))
    }

    /// 32-bit combination of seed and index.
    ///
    /// Only 2^32 values exist, so unlike the other projections this one is
    /// not collision-free across large populations.
    pub fn as_integer(&self) -> i32 {
        let mut hash: i32 = 17;
        for unit in self.seed.encode_utf16() {
            hash = hash.wrapping_mul(31).wrapping_add(i32::from(unit));
        }
        hash.wrapping_mul(31).wrapping_add(self.index)
    }

    /// Non-negative 63-bit value: base-31 polynomial over the seed's UTF-16
    /// code units, XOR the index.
    pub fn as_long(&self) -> i64 {
        let mut hash: i64 = 0;
        for unit in self.seed.encode_utf16() {
            hash = hash.wrapping_mul(31).wrapping_add(i64::from(unit));
        }
        (hash ^ i64::from(self.index)) & i64::MAX
    }

    /// First 16 bytes of SHA-256 over the UTF-8 seed followed by the
    /// little-endian index.
    pub fn as_guid(&self) -> Uuid {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.as_bytes());
        hasher.update(self.index.to_le_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes_le(bytes)
    }

    /// Reserve a TCP port for this tag from the process-wide registry.
    pub fn reserve_tcp_port(&self) -> Result<u16> {
        ports::global().reserve(self)
    }

    /// Reserve a TCP port from an explicit registry.
    pub fn reserve_tcp_port_in(&self, registry: &PortRegistry) -> Result<u16> {
        registry.reserve(self)
    }

    /// Number of live tags with this tag's seed, across all indices.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.seed)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.seed, self.index)
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("seed", &&*self.seed)
            .field("index", &self.index)
            .finish()
    }
}
