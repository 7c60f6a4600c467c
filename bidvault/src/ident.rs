//! Correlation and impression identifier generation.
//!
//! Every fetch carries a correlation id and every requested slot an
//! impression id, both produced here: 32 bytes rendered as 64 lowercase hex
//! characters. The first 8 bytes are the current UNIX time in seconds
//! (big-endian), the remaining 24 bytes come from a cryptographically secure
//! random source. The two RFC 4122 format-marker positions of the trailing
//! 16-byte half (offsets 22 and 24, the version and variant slots) are then
//! overwritten with two further random draws; existing backend parsers
//! expect random content there rather than fixed marker nibbles.
//!
//! With an injected [`Clock`] and [`RandomSource`] the output is
//! byte-for-byte reproducible, which the tests rely on.

use crate::time::Clock;
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use std::sync::{Arc, Mutex};

/// Number of raw bytes in a generated identifier.
const ID_LEN: usize = 32;

/// RFC 4122 version slot of the trailing 16-byte half.
const MARKER_VERSION_OFFSET: usize = 22;

/// RFC 4122 variant slot of the trailing 16-byte half.
const MARKER_VARIANT_OFFSET: usize = 24;

/// Source of random bytes.
///
/// Production uses the OS CSPRNG; tests inject a seeded generator to make
/// identifiers reproducible.
pub trait RandomSource: Send {
    /// Fill `dest` with random bytes.
    fn fill(&mut self, dest: &mut [u8]);
}

/// Cryptographically secure random source backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill(&mut self, dest: &mut [u8]) {
        OsRng.fill_bytes(dest);
    }
}

/// Deterministic random source for tests and reproducible runs.
#[derive(Debug)]
pub struct SeededRandom(StdRng);

impl SeededRandom {
    /// Create a source producing the same byte stream for the same seed.
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn fill(&mut self, dest: &mut [u8]) {
        self.0.fill_bytes(dest);
    }
}

/// Generator of globally-distinguishable identifiers.
pub struct IdGenerator {
    clock: Arc<dyn Clock>,
    random: Mutex<Box<dyn RandomSource>>,
}

impl IdGenerator {
    /// Create a generator from a clock and a random source.
    pub fn new(clock: Arc<dyn Clock>, random: Box<dyn RandomSource>) -> Self {
        Self {
            clock,
            random: Mutex::new(random),
        }
    }

    /// Generate one identifier: 64 lowercase hex characters.
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; ID_LEN];

        let seconds = self.clock.now().timestamp().max(0) as u64;
        bytes[..8].copy_from_slice(&seconds.to_be_bytes());

        let mut random = self.random.lock().unwrap();
        random.fill(&mut bytes[8..]);

        let mut markers = [0u8; 2];
        random.fill(&mut markers);
        bytes[MARKER_VERSION_OFFSET] = markers[0];
        bytes[MARKER_VARIANT_OFFSET] = markers[1];

        hex::encode(bytes)
    }
}
