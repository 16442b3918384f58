//! Index-positional tree operations.
//!
//! Callers address positions ("third child of X"), never raw ordinals. Each
//! mutation snapshots the sibling neighborhood and the commit version under
//! one read lock, mints keys outside the lock, and commits with the version
//! as an optimistic guard. A commit that loses the race is re-planned from a
//! fresh snapshot exactly once before `ConcurrentModification` surfaces.
//! `OrdinalExhausted` never surfaces: the insertion point is handed to the
//! rebalancer and the rekeyed plan commits in the same transaction.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::config::CanopyConfig;
use crate::entry::{Entry, EntryDraft};
use crate::errors::{TreeError, TreeResult};
use crate::ordinal::{is_descendant, join, segment_of, OrdinalCodec};
use crate::rebalance::RebalanceManager;
use crate::store::{EntryStore, RekeyFollow};

/// Tree-shaped operations over an [`EntryStore`].
pub struct TreeOps {
    store: Arc<EntryStore>,
    codec: OrdinalCodec,
    rebalance: RebalanceManager,
}

impl TreeOps {
    pub fn new(store: Arc<EntryStore>) -> Self {
        Self::with_config(store, &CanopyConfig::default())
    }

    pub fn with_config(store: Arc<EntryStore>, config: &CanopyConfig) -> Self {
        Self {
            store,
            codec: OrdinalCodec::with_config(config),
            rebalance: RebalanceManager::with_config(config),
        }
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Insert a draft as the `at_index`-th child of `parent` (`None` for a
    /// new root). An index beyond the current count appends.
    #[instrument(level = "debug", skip(self, draft), fields(slug = %draft.slug))]
    pub fn insert_child(
        &self,
        parent: Option<&str>,
        at_index: usize,
        draft: EntryDraft,
    ) -> TreeResult<Entry> {
        self.retry_once(|| self.try_insert(parent, at_index, &draft))
    }

    /// Relocate `ordinal` (with its subtree) to the `at_index`-th position
    /// under `new_parent`. Fails with `CycleDetected` when the destination
    /// lies inside the moved subtree.
    #[instrument(level = "debug", skip(self))]
    pub fn move_entry(
        &self,
        ordinal: &str,
        new_parent: Option<&str>,
        at_index: usize,
    ) -> TreeResult<Entry> {
        self.retry_once(|| self.try_move(ordinal, new_parent, at_index))
    }

    /// Move `ordinal` to position `at_index` within its current sibling
    /// list. An existing sibling has no position past the end, so
    /// `at_index >= sibling_count` is `InvalidIndex`.
    #[instrument(level = "debug", skip(self))]
    pub fn reorder(&self, ordinal: &str, at_index: usize) -> TreeResult<Entry> {
        let entry = self.store.get(ordinal)?;
        let siblings = self.store.children_of(entry.parent.as_deref())?;
        if at_index >= siblings.len() {
            return Err(TreeError::InvalidIndex(at_index));
        }
        self.move_entry(ordinal, entry.parent.as_deref(), at_index)
    }

    /// Delete an entry; `cascade` removes the whole subtree, otherwise an
    /// entry with children fails with `HasChildren`. Returns the number of
    /// removed entries.
    #[instrument(level = "debug", skip(self))]
    pub fn delete_subtree(&self, ordinal: &str, cascade: bool) -> TreeResult<usize> {
        self.store.delete(ordinal, cascade)
    }

    /// Bulk population preserving the drafts' order, using the stride keys
    /// of `initial_key_at` when the parent is empty. Assumes no concurrent
    /// writers under the same parent during the load.
    #[instrument(level = "debug", skip(self, drafts), fields(count = drafts.len()))]
    pub fn populate(
        &self,
        parent: Option<&str>,
        drafts: Vec<EntryDraft>,
    ) -> TreeResult<Vec<Entry>> {
        let (_, existing) = self.snapshot(parent)?;
        if !existing.is_empty() {
            return drafts
                .into_iter()
                .map(|draft| self.insert_child(parent, usize::MAX, draft))
                .collect();
        }
        let mut out = Vec::with_capacity(drafts.len());
        let mut index = 0;
        for draft in drafts {
            let ordinal = loop {
                let candidate = join(parent, &self.codec.initial_key_at(index));
                index += 1;
                if self.store.is_free(&candidate) {
                    break candidate;
                }
            };
            out.push(self.store.create(draft.into_entry(ordinal, parent), None)?);
        }
        Ok(out)
    }

    fn retry_once<T>(&self, attempt: impl Fn() -> TreeResult<T>) -> TreeResult<T> {
        match attempt() {
            Err(TreeError::ConcurrentModification) => {
                debug!("snapshot went stale, retrying once");
                attempt()
            }
            other => other,
        }
    }

    /// Sibling snapshot for planning; a missing parent is the caller's
    /// `DanglingParent`, not a bare lookup failure.
    fn snapshot(&self, parent: Option<&str>) -> TreeResult<(u64, Vec<Entry>)> {
        self.store.snapshot_children(parent).map_err(|e| match e {
            TreeError::NotFound(p) => TreeError::DanglingParent(p),
            other => other,
        })
    }

    /// Mint a full ordinal between two sibling segments. Ordinals are never
    /// reused, so candidates issued in a previous life are stepped over.
    fn mint(
        &self,
        parent: Option<&str>,
        low: Option<&str>,
        high: Option<&str>,
    ) -> TreeResult<String> {
        let mut segment = self.codec.key_between(low, high)?;
        while !self.store.is_free(&join(parent, &segment)) {
            segment = self.codec.key_between(Some(&segment), high)?;
        }
        Ok(join(parent, &segment))
    }

    fn try_insert(
        &self,
        parent: Option<&str>,
        at_index: usize,
        draft: &EntryDraft,
    ) -> TreeResult<Entry> {
        let (version, siblings) = self.snapshot(parent)?;
        let at = at_index.min(siblings.len());
        let low = at.checked_sub(1).map(|i| segment_of(&siblings[i].ordinal));
        let high = siblings.get(at).map(|e| segment_of(&e.ordinal));

        match self.mint(parent, low, high) {
            Ok(ordinal) => self
                .store
                .create(draft.clone().into_entry(ordinal, parent), Some(version)),
            Err(TreeError::OrdinalExhausted { .. }) => {
                debug!(?parent, at, "keyspace exhausted, rebalancing siblings");
                let plan = self.rebalance.plan(&self.codec, parent, &siblings, at, |o| {
                    self.store.is_free(o)
                })?;
                let entry = draft.clone().into_entry(plan.new_ordinal.clone(), parent);
                let created = self.store.rekey_siblings(
                    &plan.rekeys,
                    Some(RekeyFollow::Create(entry)),
                    Some(version),
                )?;
                match created {
                    Some(entry) => Ok(entry),
                    None => self.store.get(&plan.new_ordinal),
                }
            }
            Err(e) => Err(e),
        }
    }

    fn try_move(
        &self,
        ordinal: &str,
        new_parent: Option<&str>,
        at_index: usize,
    ) -> TreeResult<Entry> {
        self.store.get(ordinal)?;
        if let Some(np) = new_parent {
            if np == ordinal || is_descendant(np, ordinal) {
                return Err(TreeError::CycleDetected {
                    ordinal: ordinal.to_string(),
                    target: np.to_string(),
                });
            }
        }
        let (version, siblings) = self.snapshot(new_parent)?;
        // Position among the destination siblings without the moved entry
        // itself (relevant when moving within the same parent).
        let others: Vec<&Entry> = siblings.iter().filter(|e| e.ordinal != ordinal).collect();
        let at = at_index.min(others.len());
        let low = at.checked_sub(1).map(|i| segment_of(&others[i].ordinal));
        let high = others.get(at).map(|e| segment_of(&e.ordinal));

        match self.mint(new_parent, low, high) {
            Ok(new_ordinal) => {
                self.store
                    .reparent_and_rekey(ordinal, new_parent, &new_ordinal, Some(version))
            }
            Err(TreeError::OrdinalExhausted { .. }) => {
                debug!(?new_parent, at, "keyspace exhausted, rebalancing destination");
                let dest: Vec<Entry> = siblings
                    .into_iter()
                    .filter(|e| e.ordinal != ordinal)
                    .collect();
                let plan = self.rebalance.plan(&self.codec, new_parent, &dest, at, |o| {
                    self.store.is_free(o)
                })?;
                let moved = self.store.rekey_siblings(
                    &plan.rekeys,
                    Some(RekeyFollow::Reparent {
                        ordinal: ordinal.to_string(),
                        new_parent: new_parent.map(str::to_string),
                        new_ordinal: plan.new_ordinal.clone(),
                    }),
                    Some(version),
                )?;
                match moved {
                    Some(entry) => Ok(entry),
                    None => self.store.get(&plan.new_ordinal),
                }
            }
            Err(e) => Err(e),
        }
    }
}
