// Collision-free sequence IDs
//
// Tokens look like `k3q7zt2a-00000000000004d2`: a random base-32 prefix, a
// separator, and a zero-padded hex counter. The common path is a single
// atomic increment. Once the counter passes 2^63 the prefix is redrawn and the
// counter restarts at zero under a mutex, so tokens stay unique for the life
// of the process.

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

use super::lock;

const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";
const SEPARATOR: char = '-';
const RESET_THRESHOLD: u64 = 1 << 63;

/// Longest prefix whose random bits (5 per character) fit in one atomic word.
pub const MAX_PREFIX_LEN: usize = 12;
pub const DEFAULT_PREFIX_LEN: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("prefix length must be between 1 and {max}, got {0}", max = MAX_PREFIX_LEN)]
    PrefixLength(usize),
}

/// Lock-free generator of unique, prefixed, monotonically increasing tokens.
#[derive(Debug)]
pub struct Sequence {
    prefix_len: usize,
    prefix: AtomicU64,
    counter: AtomicU64,
    reset: Mutex<()>,
}

impl Sequence {
    pub fn new(prefix_len: usize) -> Result<Self, SequenceError> {
        Self::starting_at(prefix_len, 0)
    }

    fn starting_at(prefix_len: usize, counter: u64) -> Result<Self, SequenceError> {
        if !(1..=MAX_PREFIX_LEN).contains(&prefix_len) {
            return Err(SequenceError::PrefixLength(prefix_len));
        }
        Ok(Self::with_state(prefix_len, counter))
    }

    fn with_state(prefix_len: usize, counter: u64) -> Self {
        Self {
            prefix_len,
            prefix: AtomicU64::new(random_prefix(prefix_len)),
            counter: AtomicU64::new(counter),
            reset: Mutex::new(()),
        }
    }

    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    /// Current prefix as it appears in tokens.
    pub fn prefix(&self) -> String {
        encode_prefix(self.prefix.load(Ordering::Acquire), self.prefix_len)
    }

    /// Next token. Safe to call from any number of threads at once.
    ///
    /// The prefix is loaded after the counter increment, so a caller that
    /// drew the last value of an epoch and is preempted across a reset can
    /// pair that value with the new prefix. That token can only repeat once
    /// the new epoch has issued another 2^63 values, which no process reaches.
    pub fn next_id(&self) -> String {
        loop {
            let n = self.counter.fetch_add(1, Ordering::AcqRel);
            if n < RESET_THRESHOLD {
                let prefix = self.prefix.load(Ordering::Acquire);
                return format!(
                    "{}{SEPARATOR}{n:016x}",
                    encode_prefix(prefix, self.prefix_len)
                );
            }
            self.start_new_epoch();
        }
    }

    fn start_new_epoch(&self) {
        let _guard = lock(&self.reset);
        // Another caller may have reset while we waited for the lock.
        if self.counter.load(Ordering::Acquire) < RESET_THRESHOLD {
            return;
        }
        let mut fresh = random_prefix(self.prefix_len);
        while fresh == self.prefix.load(Ordering::Acquire) {
            fresh = random_prefix(self.prefix_len);
        }
        self.prefix.store(fresh, Ordering::Release);
        self.counter.store(0, Ordering::Release);
        debug!(
            prefix = %encode_prefix(fresh, self.prefix_len),
            "Sequence counter wrapped; new prefix drawn"
        );
    }
}

impl Default for Sequence {
    fn default() -> Self {
        Self::with_state(DEFAULT_PREFIX_LEN, 0)
    }
}

fn random_prefix(len: usize) -> u64 {
    let bits = 5 * len as u32;
    OsRng.next_u64() & ((1u64 << bits) - 1)
}

fn encode_prefix(value: u64, len: usize) -> String {
    (0..len)
        .rev()
        .map(|i| ALPHABET[((value >> (5 * i)) & 0x1f) as usize] as char)
        .collect()
}
