//! Sortable ordinal keys.
//!
//! An ordinal is a sequence of non-empty base-52 segments (`A..Z a..z`)
//! joined by `':'`. A root entry carries a single segment; a child's ordinal
//! is its parent's ordinal plus `':'` plus its own sibling segment. Every
//! alphabet byte sorts above the separator, so byte-lexicographic order over
//! full ordinals is exactly the depth-first traversal order, including when
//! one sibling segment is a prefix of another.
//!
//! Segments are minted by midpoint insertion and never end in the minimum
//! digit `'A'`, so a freshly minted key always leaves room on its right.
//! Segment length is capped; a midpoint that would exceed the cap signals
//! `OrdinalExhausted` and is recovered by rebalancing.

use std::cmp::Ordering;

use tracing::instrument;

use crate::config::CanopyConfig;
use crate::errors::{TreeError, TreeResult};

/// Separator between the parent prefix and the sibling segment.
pub const SEPARATOR: char = ':';

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: isize = 52;

/// Builds the ordinal of a child of `parent` from a sibling segment.
pub fn join(parent: Option<&str>, segment: &str) -> String {
    match parent {
        Some(p) => format!("{p}{SEPARATOR}{segment}"),
        None => segment.to_string(),
    }
}

/// The sibling segment of an ordinal (everything after the last separator).
pub fn segment_of(ordinal: &str) -> &str {
    ordinal.rsplit(SEPARATOR).next().unwrap_or(ordinal)
}

/// True when `ordinal` lies strictly inside the subtree rooted at `ancestor`.
pub fn is_descendant(ordinal: &str, ancestor: &str) -> bool {
    ordinal.len() > ancestor.len()
        && ordinal.starts_with(ancestor)
        && ordinal.as_bytes()[ancestor.len()] == SEPARATOR as u8
}

fn digit_of(byte: u8) -> Option<isize> {
    match byte {
        b'A'..=b'Z' => Some((byte - b'A') as isize),
        b'a'..=b'z' => Some((byte - b'a') as isize + 26),
        _ => None,
    }
}

fn decode(segment: &str) -> Option<Vec<isize>> {
    segment.bytes().map(digit_of).collect()
}

fn encode(digits: &[isize]) -> String {
    digits.iter().map(|&d| ALPHABET[d as usize] as char).collect()
}

/// Mints and compares sibling segments.
#[derive(Debug, Clone)]
pub struct OrdinalCodec {
    max_segment_len: usize,
}

impl Default for OrdinalCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl OrdinalCodec {
    pub fn new() -> Self {
        Self::with_config(&CanopyConfig::default())
    }

    pub fn with_config(config: &CanopyConfig) -> Self {
        Self {
            max_segment_len: config.max_segment_len,
        }
    }

    /// Byte-lexicographic comparison; a total order over all issued ordinals.
    pub fn compare(&self, a: &str, b: &str) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }

    /// A segment strictly between `low` and `high`, either of which may be an
    /// open end. Fails with `OrdinalExhausted` when the bounds are adjacent
    /// under the alphabet or the midpoint would exceed the segment cap;
    /// callers recover by rebalancing the surrounding sibling range.
    #[instrument(level = "trace", skip(self))]
    pub fn key_between(&self, low: Option<&str>, high: Option<&str>) -> TreeResult<String> {
        let exhausted = || TreeError::OrdinalExhausted {
            low: low.map(str::to_string),
            high: high.map(str::to_string),
        };

        if let (Some(l), Some(h)) = (low, high) {
            if l >= h {
                return Err(exhausted());
            }
        }

        // Out-of-alphabet neighbors (foreign keys handed in through the
        // store boundary) are treated as exhausted so the rebalancer can
        // re-spread them into canonical segments.
        let a = match low {
            Some(l) => decode(l).ok_or_else(exhausted)?,
            None => Vec::new(),
        };
        let b = match high {
            Some(h) => Some(decode(h).ok_or_else(exhausted)?),
            None => None,
        };

        let digits = Self::midpoint(&a, b.as_deref()).ok_or_else(exhausted)?;
        if digits.len() > self.max_segment_len {
            return Err(exhausted());
        }
        debug_assert_ne!(digits.last(), Some(&0), "segments must not end in 'A'");
        Ok(encode(&digits))
    }

    /// Digits strictly between `a` and `b` (`a` empty is the open floor,
    /// `b` None the open ceiling). None means no such segment exists without
    /// minting a key ending in the minimum digit.
    fn midpoint(a: &[isize], b: Option<&[isize]>) -> Option<Vec<isize>> {
        let Some(b) = b else {
            // Open ceiling: always room above.
            let Some(&da) = a.first() else {
                return Some(vec![BASE / 2]);
            };
            return if da < BASE - 1 {
                Some(vec![da + (BASE - da) / 2])
            } else {
                let mut out = vec![da];
                out.extend(Self::midpoint(&a[1..], None)?);
                Some(out)
            };
        };

        let common = a
            .iter()
            .zip(b.iter())
            .take_while(|(x, y)| x == y)
            .count();
        if common > 0 {
            let mut out = b[..common].to_vec();
            out.extend(Self::midpoint(&a[common..], Some(&b[common..]))?);
            return Some(out);
        }
        let Some(&db) = b.first() else {
            // b is a strict prefix of a, so a >= b: misordered bounds.
            return None;
        };
        let da = a.first().copied().unwrap_or(-1);
        if db <= da {
            return None;
        }

        if db - da > 1 {
            // Ceil biases the pick away from the minimum digit.
            let m = da + (db - da + 1) / 2;
            if m > 0 {
                return Some(vec![m]);
            }
            // Only 'A' fits between the floor and b: take it and extend
            // right so the result does not end in the minimum digit.
            let mut out = vec![0];
            out.extend(Self::midpoint(&[], None)?);
            return Some(out);
        }

        // First digits are adjacent.
        if da >= 0 {
            // Keep a's digit and grow a midpoint over its tail.
            let mut out = vec![da];
            out.extend(Self::midpoint(&a[1..], None)?);
            Some(out)
        } else if b.len() > 1 {
            // b starts with the minimum digit: descend under it.
            let mut out = vec![0];
            out.extend(Self::midpoint(&[], Some(&b[1..]))?);
            Some(out)
        } else {
            // Nothing sorts below a bare minimum-digit segment.
            None
        }
    }

    /// Deterministic short key for position `index` in a bulk population:
    /// an overflow run of the maximum digit followed by one stepped digit.
    /// Strictly monotone in `index` and never exhausting, which makes it the
    /// rebalancer's re-spread scheme.
    pub fn initial_key_at(&self, index: usize) -> String {
        let stride = (BASE - 1) as usize;
        let mut key = String::with_capacity(index / stride + 1);
        for _ in 0..index / stride {
            key.push(ALPHABET[(BASE - 1) as usize] as char);
        }
        key.push(ALPHABET[index % stride + 1] as char);
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn codec() -> OrdinalCodec {
        OrdinalCodec::new()
    }

    #[test]
    fn first_key_lands_mid_alphabet() {
        assert_eq!(codec().key_between(None, None).unwrap(), "a");
    }

    #[rstest]
    #[case(Some("b"), Some("d"), "c")]
    #[case(None, Some("a"), "N")]
    #[case(Some("a"), None, "n")]
    #[case(Some("b"), Some("c"), "ba")]
    fn key_between_picks_expected_midpoints(
        #[case] low: Option<&str>,
        #[case] high: Option<&str>,
        #[case] expected: &str,
    ) {
        assert_eq!(codec().key_between(low, high).unwrap(), expected);
    }

    #[test]
    fn key_between_respects_bounds_under_repeated_front_insertion() {
        let codec = codec();
        let mut high = codec.key_between(None, None).unwrap();
        for _ in 0..200 {
            match codec.key_between(None, Some(&high)) {
                Ok(key) => {
                    assert!(key.as_str() < high.as_str(), "{key} !< {high}");
                    assert!(key.len() <= 16);
                    high = key;
                }
                Err(TreeError::OrdinalExhausted { .. }) => return,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        panic!("front insertion never hit the segment cap");
    }

    #[test]
    fn nothing_sorts_below_the_minimum_segment() {
        let err = codec().key_between(None, Some("A")).unwrap_err();
        assert!(matches!(err, TreeError::OrdinalExhausted { .. }));
    }

    #[test]
    fn misordered_bounds_are_exhausted_not_panicking() {
        let err = codec().key_between(Some("d"), Some("b")).unwrap_err();
        assert!(matches!(err, TreeError::OrdinalExhausted { .. }));
    }

    #[test]
    fn initial_keys_are_strictly_monotone() {
        let codec = codec();
        let keys: Vec<String> = (0..200).map(|i| codec.initial_key_at(i)).collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn prefix_scheme_orders_depth_first() {
        // A parent sorts before its subtree; the subtree sorts before the
        // next sibling even when that sibling's segment extends the parent's.
        let parent = "m";
        let child = join(Some(parent), "a");
        let next_sibling = "mb";
        assert!(parent < child.as_str());
        assert!(child.as_str() < next_sibling);
        assert!(is_descendant(&child, parent));
        assert!(!is_descendant(next_sibling, parent));
        assert_eq!(segment_of(&child), "a");
    }
}
