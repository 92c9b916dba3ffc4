//! Series identity and fingerprinting.
//!
//! A series identity is the triple (measurement name, tag set, timestamp).
//! Two records with the same identity are the same logical data point and
//! their fields belong in one record.
//!
//! # Fingerprint Encoding
//!
//! The fingerprint is a 64-bit FNV-1a hash over a canonical byte stream:
//!
//! ```text
//! name \n
//! key_1 \n value_1 \n        <- tags sorted ascending by key
//! ...
//! key_n \n value_n \n
//! \n
//! <timestamp as decimal nanoseconds>
//! ```
//!
//! Every entry point (whole records and single fields alike) uses this one
//! encoding, so records built either way merge with each other.
//!
//! [`SeriesKey`] hashes to exactly this stream, and the grouper stores it
//! structurally in a map built with [`FnvBuildHasher`]. Lookups therefore
//! compare full identities and a fingerprint collision can never merge two
//! distinct series.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use seriesmerge::series::{fingerprint, SeriesKey};
//!
//! let tags = BTreeMap::from([("cpu".to_string(), "cpu0".to_string())]);
//! let key = SeriesKey::new("cpu", &tags, 0);
//!
//! assert_eq!(key.fingerprint(), fingerprint("cpu", &tags, 0));
//! ```

use std::collections::BTreeMap;
use std::hash::{BuildHasherDefault, Hash, Hasher};

use crate::metric::Metric;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Streaming 64-bit FNV-1a hasher.
#[derive(Debug, Clone, Copy)]
pub struct Fnv1aHasher {
    state: u64,
}

impl Default for Fnv1aHasher {
    fn default() -> Self {
        Self { state: FNV_OFFSET }
    }
}

impl Hasher for Fnv1aHasher {
    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(&self) -> u64 {
        self.state
    }
}

/// `BuildHasher` producing [`Fnv1aHasher`]s.
pub type FnvBuildHasher = BuildHasherDefault<Fnv1aHasher>;

/// Computes the fingerprint of a series identity.
///
/// Tags are visited in ascending key order; a `BTreeMap` already iterates
/// that way.
pub fn fingerprint(name: &str, tags: &BTreeMap<String, String>, timestamp: i64) -> u64 {
    let mut hasher = Fnv1aHasher::default();
    write_identity(&mut hasher, name, tags.iter(), timestamp);
    hasher.finish()
}

fn write_identity<'a, H, I>(state: &mut H, name: &str, tags: I, timestamp: i64)
where
    H: Hasher,
    I: Iterator<Item = (&'a String, &'a String)>,
{
    state.write(name.as_bytes());
    state.write(b"\n");
    for (key, value) in tags {
        state.write(key.as_bytes());
        state.write(b"\n");
        state.write(value.as_bytes());
        state.write(b"\n");
    }
    state.write(b"\n");
    state.write(timestamp.to_string().as_bytes());
}

/// Structural series identity used as a grouping key.
///
/// Equality compares the full identity; hashing feeds the canonical
/// fingerprint stream, so under [`Fnv1aHasher`] the hash of a key equals
/// [`fingerprint`] of the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesKey {
    name: String,
    tags: Vec<(String, String)>,
    timestamp: i64,
}

impl SeriesKey {
    /// Creates a key from an identity triple.
    pub fn new(name: &str, tags: &BTreeMap<String, String>, timestamp: i64) -> Self {
        Self {
            name: name.to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            timestamp,
        }
    }

    /// Creates the key identifying `metric`.
    pub fn of(metric: &Metric) -> Self {
        Self::new(metric.name(), metric.tags(), metric.timestamp())
    }

    /// Returns the 64-bit fingerprint of this identity.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = Fnv1aHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }

    /// Returns the measurement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the timestamp in nanoseconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

impl Hash for SeriesKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        write_identity(
            state,
            &self.name,
            self.tags.iter().map(|(k, v)| (k, v)),
            self.timestamp,
        );
    }
}
