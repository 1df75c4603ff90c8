//! Sequence ID tests: format, ordering, and uniqueness across threads.

use lanes::{Sequence, SequenceError};
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

fn split(token: &str) -> (&str, u64) {
    let (prefix, hex) = token.split_once('-').expect("token has a separator");
    (prefix, u64::from_str_radix(hex, 16).expect("suffix is hex"))
}

#[test]
fn test_tokens_share_prefix_and_count_up() {
    let sequence = Sequence::new(8).unwrap();
    let tokens: Vec<String> = (0..1_000).map(|_| sequence.next_id()).collect();

    let (prefix, first) = split(&tokens[0]);
    assert_eq!(prefix.len(), 8);
    assert_eq!(first, 0);

    for (i, token) in tokens.iter().enumerate() {
        let (p, n) = split(token);
        assert_eq!(p, prefix);
        assert_eq!(n, i as u64);
    }
}

#[test]
fn test_prefix_uses_lowercase_base32() {
    for len in 1..=lanes::scheduling::MAX_PREFIX_LEN {
        let sequence = Sequence::new(len).unwrap();
        let prefix = sequence.prefix();
        assert_eq!(prefix.len(), len);
        assert!(prefix
            .chars()
            .all(|c| c.is_ascii_lowercase() || ('2'..='7').contains(&c)));
    }
}

#[test]
fn test_independent_sequences_draw_independent_prefixes() {
    // 40 random bits each; a collision among a handful is vanishingly unlikely.
    let prefixes: HashSet<String> = (0..16).map(|_| Sequence::default().prefix()).collect();
    assert!(prefixes.len() > 1);
}

#[test]
fn test_invalid_prefix_length() {
    let err = Sequence::new(0).unwrap_err();
    assert_eq!(err, SequenceError::PrefixLength(0));
    assert!(err.to_string().contains("between 1 and"));
}

#[test]
fn test_threads_never_see_duplicates() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 10_000;
    let sequence = Arc::new(Sequence::default());

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let sequence = Arc::clone(&sequence);
            thread::spawn(move || {
                (0..PER_THREAD)
                    .map(|_| sequence.next_id())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut seen = HashSet::with_capacity(THREADS * PER_THREAD);
    for handle in handles {
        let tokens = handle.join().expect("generator thread panicked");
        // Within one thread the counter only moves forward.
        for pair in tokens.windows(2) {
            assert!(split(&pair[1]).1 > split(&pair[0]).1);
        }
        for token in tokens {
            assert!(seen.insert(token), "duplicate token");
        }
    }
    assert_eq!(seen.len(), THREADS * PER_THREAD);

    // Every counter value in 0..total was handed out exactly once.
    let mut counters: Vec<u64> = seen.iter().map(|t| split(t).1).collect();
    counters.sort_unstable();
    assert!(counters.iter().enumerate().all(|(i, &n)| n == i as u64));
}
