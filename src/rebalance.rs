//! Scoped sibling rebalancing.
//!
//! When the codec finds no segment between two neighbors, the manager picks
//! the smallest contiguous sibling window covering the insertion point whose
//! outer bounds still admit an evenly spread set of fresh segments, and plans
//! a rekey of just that window. Windows double outward until they fit; the
//! full sibling group re-spreads with the short `initial_key_at` keys.
//! Rebalancing never leaves the sibling group: rows elsewhere in the tree
//! are untouched (descendants of rekeyed siblings only follow their parent
//! prefix).

use itertools::Itertools;
use tracing::{debug, instrument};

use crate::config::CanopyConfig;
use crate::entry::Entry;
use crate::errors::{TreeError, TreeResult};
use crate::ordinal::{join, segment_of, OrdinalCodec};

/// A planned sibling-range rekey, committed by
/// `EntryStore::rekey_siblings` in the same transaction as the operation
/// that triggered it.
#[derive(Debug, Clone)]
pub struct RebalancePlan {
    /// `(old_ordinal, new_ordinal)` per window member, in sibling order.
    pub rekeys: Vec<(String, String)>,
    /// Fresh ordinal for the entry whose insertion triggered the rebalance.
    pub new_ordinal: String,
}

/// Plans recovery from `OrdinalExhausted`.
#[derive(Debug, Clone)]
pub struct RebalanceManager {
    min_window: usize,
}

impl Default for RebalanceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RebalanceManager {
    pub fn new() -> Self {
        Self::with_config(&CanopyConfig::default())
    }

    pub fn with_config(config: &CanopyConfig) -> Self {
        Self {
            min_window: config.rebalance.min_window.max(2),
        }
    }

    /// Plan fresh ordinals for the minimal sibling window covering
    /// `insert_at`. `is_free` reports whether a candidate ordinal has never
    /// been issued; colliding candidates are nudged toward their successor.
    #[instrument(level = "debug", skip_all, fields(siblings = siblings.len(), insert_at))]
    pub fn plan(
        &self,
        codec: &OrdinalCodec,
        parent: Option<&str>,
        siblings: &[Entry],
        insert_at: usize,
        is_free: impl Fn(&str) -> bool,
    ) -> TreeResult<RebalancePlan> {
        let len = siblings.len();
        let insert_at = insert_at.min(len);
        let mut window = self.min_window;
        loop {
            let mut lo = insert_at.saturating_sub(window / 2);
            let mut hi = lo + window;
            if hi > len {
                hi = len;
                lo = hi.saturating_sub(window);
            }
            let full = lo == 0 && hi == len;
            match self.try_window(codec, parent, siblings, insert_at, lo, hi, full, &is_free) {
                Ok(plan) => {
                    debug!(lo, hi, rekeys = plan.rekeys.len(), "rebalance window planned");
                    return Ok(plan);
                }
                Err(TreeError::OrdinalExhausted { .. }) if !full => {
                    window *= 2;
                    debug!(window, "window too tight, widening");
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn try_window(
        &self,
        codec: &OrdinalCodec,
        parent: Option<&str>,
        siblings: &[Entry],
        insert_at: usize,
        lo: usize,
        hi: usize,
        full: bool,
        is_free: &impl Fn(&str) -> bool,
    ) -> TreeResult<RebalancePlan> {
        // Window members plus the slot for the entry being inserted.
        let count = hi - lo + 1;
        let low_bound = (lo > 0).then(|| segment_of(&siblings[lo - 1].ordinal));
        let high_bound = (hi < siblings.len()).then(|| segment_of(&siblings[hi].ordinal));

        let mut segments = if full {
            // Open window: stride keys, skipping any ordinal ever issued.
            let mut out = Vec::with_capacity(count);
            let mut index = 0;
            while out.len() < count {
                let key = codec.initial_key_at(index);
                index += 1;
                if is_free(&join(parent, &key)) {
                    out.push(key);
                }
            }
            out
        } else {
            let mut out = Vec::with_capacity(count);
            spread(codec, low_bound, high_bound, count, &mut out)?;
            // Nudge collisions toward the successor; order stays strict.
            for i in 0..out.len() {
                let next = out
                    .get(i + 1)
                    .map(String::as_str)
                    .or(high_bound)
                    .map(str::to_string);
                while !is_free(&join(parent, &out[i])) {
                    out[i] = codec.key_between(Some(&out[i]), next.as_deref())?;
                }
            }
            out
        };

        let slot = insert_at - lo;
        let insert_segment = segments.remove(slot);
        let rekeys = siblings[lo..hi]
            .iter()
            .zip_eq(&segments)
            .map(|(member, segment)| (member.ordinal.clone(), join(parent, segment)))
            .collect();
        Ok(RebalancePlan {
            rekeys,
            new_ordinal: join(parent, &insert_segment),
        })
    }
}

/// Evenly spread `n` fresh segments between the bounds by recursive
/// bisection, appended to `out` in ascending order.
fn spread(
    codec: &OrdinalCodec,
    low: Option<&str>,
    high: Option<&str>,
    n: usize,
    out: &mut Vec<String>,
) -> TreeResult<()> {
    if n == 0 {
        return Ok(());
    }
    let mid = codec.key_between(low, high)?;
    spread(codec, low, Some(&mid), n / 2, out)?;
    out.push(mid.clone());
    spread(codec, Some(&mid), high, n - n / 2 - 1, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sibling(ordinal: &str) -> Entry {
        Entry {
            ordinal: ordinal.into(),
            parent: None,
            ancestor: false,
            slug: format!("s-{ordinal}"),
            title: String::new(),
            difficulty: None,
            content: String::new(),
        }
    }

    #[test]
    fn spread_yields_sorted_distinct_segments() {
        let codec = OrdinalCodec::new();
        let mut out = Vec::new();
        spread(&codec, Some("b"), Some("x"), 9, &mut out).unwrap();
        assert_eq!(out.len(), 9);
        for pair in out.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
        assert!(out.iter().all(|s| s.as_str() > "b" && s.as_str() < "x"));
    }

    #[test]
    fn plan_keeps_window_between_outer_neighbors() {
        let manager = RebalanceManager::new();
        let codec = OrdinalCodec::new();
        let siblings: Vec<Entry> = ["b", "c", "d", "e", "f", "g", "h", "i", "j", "k"]
            .iter()
            .map(|s| sibling(s))
            .collect();
        let plan = manager
            .plan(&codec, None, &siblings, 4, |_| true)
            .unwrap();
        // Partial window: the outer siblings keep their keys and every fresh
        // key stays below the first untouched neighbor.
        assert!(plan.rekeys.len() < siblings.len());
        let mut fresh: Vec<&str> = plan.rekeys.iter().map(|(_, new)| new.as_str()).collect();
        fresh.push(plan.new_ordinal.as_str());
        fresh.sort_unstable();
        fresh.dedup();
        assert_eq!(fresh.len(), plan.rekeys.len() + 1, "keys must be distinct");
        assert!(fresh.iter().all(|k| *k < "j"));
    }

    #[test]
    fn full_window_respreads_with_stride_keys() {
        let manager = RebalanceManager::new();
        let codec = OrdinalCodec::new();
        let siblings = vec![sibling("m:AAb"), sibling("m:AAc")];
        let plan = manager
            .plan(&codec, Some("m"), &siblings, 0, |_| true)
            .unwrap();
        assert_eq!(plan.rekeys.len(), 2);
        assert_eq!(plan.new_ordinal, "m:B");
        assert_eq!(plan.rekeys[0], ("m:AAb".to_string(), "m:C".to_string()));
        assert_eq!(plan.rekeys[1], ("m:AAc".to_string(), "m:D".to_string()));
    }

    #[test]
    fn colliding_candidates_are_nudged_not_reused() {
        let manager = RebalanceManager::new();
        let codec = OrdinalCodec::new();
        let siblings: Vec<Entry> = (0..12)
            .map(|i| sibling(&codec.initial_key_at(i * 3)))
            .collect();
        // Block one key the unconstrained plan would mint and re-plan.
        let unconstrained = manager.plan(&codec, None, &siblings, 6, |_| true).unwrap();
        let taken = unconstrained.new_ordinal.clone();
        let plan = manager
            .plan(&codec, None, &siblings, 6, |candidate| candidate != taken)
            .unwrap();
        assert_ne!(plan.new_ordinal, taken);
        assert!(plan.rekeys.iter().all(|(_, new)| *new != taken));
        let mut fresh: Vec<&str> = plan.rekeys.iter().map(|(_, new)| new.as_str()).collect();
        fresh.insert(6 - plan_window_lo(&plan, &siblings), plan.new_ordinal.as_str());
        for pair in fresh.windows(2) {
            assert!(pair[0] < pair[1], "{} !< {}", pair[0], pair[1]);
        }
    }

    fn plan_window_lo(plan: &RebalancePlan, siblings: &[Entry]) -> usize {
        siblings
            .iter()
            .position(|s| s.ordinal == plan.rekeys[0].0)
            .unwrap_or(0)
    }
}
