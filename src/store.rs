//! Arena-backed entry storage.
//!
//! Flat storage in the `TreeArena` style: every entry lives in a
//! generational arena, a `BTreeMap` maps ordinals to arena indices, and
//! parent/child links are arena indices with each child list kept sorted by
//! ordinal. The store is the sole writer of rows and maintains the
//! parent/ancestor invariants incrementally.
//!
//! Every mutator validates the complete operation under the write lock
//! before touching any row, so a failed call leaves the store exactly as it
//! was. A commit version counter supports the optimistic guards used by the
//! tree operations.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use generational_arena::{Arena, Index};
use tracing::{debug, instrument};

use crate::entry::{Entry, FieldPatch};
use crate::errors::{TreeError, TreeResult};
use crate::ordinal::is_descendant;

#[derive(Debug)]
struct EntryNode {
    entry: Entry,
    parent: Option<Index>,
    /// Child indices, sorted by the children's ordinals.
    children: Vec<Index>,
}

#[derive(Debug, Default)]
struct StoreState {
    arena: Arena<EntryNode>,
    /// Ordinal to arena index; iteration order is the global DFS order.
    index: BTreeMap<String, Index>,
    /// Root indices, sorted by ordinal.
    roots: Vec<Index>,
    /// Ordinals that were issued once and must never come back.
    retired: BTreeSet<String>,
    /// Bumped on every committed mutation.
    version: u64,
}

/// Follow-up action committed in the same transaction as a sibling rekey.
#[derive(Debug, Clone)]
pub enum RekeyFollow {
    /// The insert that triggered the rebalance.
    Create(Entry),
    /// The relocation that triggered the rebalance.
    Reparent {
        ordinal: String,
        new_parent: Option<String>,
        new_ordinal: String,
    },
}

/// Durable CRUD over the entry rows with enforced invariants.
#[derive(Debug, Default)]
pub struct EntryStore {
    state: RwLock<StoreState>,
}

fn swap_prefix(full: &str, old_prefix_len: usize, new_prefix: &str) -> String {
    format!("{new_prefix}{}", &full[old_prefix_len..])
}

impl StoreState {
    fn guard(&self, expected: Option<u64>) -> TreeResult<()> {
        match expected {
            Some(v) if v != self.version => Err(TreeError::ConcurrentModification),
            _ => Ok(()),
        }
    }

    fn resolve(&self, ordinal: &str) -> TreeResult<Index> {
        self.index
            .get(ordinal)
            .copied()
            .ok_or_else(|| TreeError::NotFound(ordinal.to_string()))
    }

    fn sibling_ixs(&self, parent: Option<Index>) -> &[Index] {
        match parent {
            Some(p) => &self.arena[p].children,
            None => &self.roots,
        }
    }

    fn slug_taken(&self, parent: Option<Index>, slug: &str, exclude: Option<Index>) -> bool {
        self.sibling_ixs(parent)
            .iter()
            .any(|&ix| Some(ix) != exclude && self.arena[ix].entry.slug == slug)
    }

    fn sorted_position(&self, list: &[Index], ordinal: &str) -> usize {
        list.binary_search_by(|&ix| self.arena[ix].entry.ordinal.as_str().cmp(ordinal))
            .unwrap_or_else(|pos| pos)
    }

    fn attach(&mut self, ix: Index, parent: Option<Index>) {
        let ordinal = self.arena[ix].entry.ordinal.clone();
        match parent {
            Some(p) => {
                let pos = self.sorted_position(&self.arena[p].children, &ordinal);
                self.arena[p].children.insert(pos, ix);
                self.arena[p].entry.ancestor = true;
            }
            None => {
                let pos = self.sorted_position(&self.roots, &ordinal);
                self.roots.insert(pos, ix);
            }
        }
    }

    fn detach(&mut self, ix: Index) {
        match self.arena[ix].parent {
            Some(p) => self.arena[p].children.retain(|&c| c != ix),
            None => self.roots.retain(|&r| r != ix),
        }
    }

    fn refresh_ancestor(&mut self, parent: Index) {
        let flag = !self.arena[parent].children.is_empty();
        self.arena[parent].entry.ancestor = flag;
    }

    fn resort_siblings(&mut self, parent: Option<Index>) {
        let mut list = match parent {
            Some(p) => std::mem::take(&mut self.arena[p].children),
            None => std::mem::take(&mut self.roots),
        };
        list.sort_by(|&a, &b| {
            self.arena[a]
                .entry
                .ordinal
                .cmp(&self.arena[b].entry.ordinal)
        });
        match parent {
            Some(p) => self.arena[p].children = list,
            None => self.roots = list,
        }
    }

    /// Depth-first subtree indices, the root of the subtree first.
    /// Children are pushed reversed so the traversal runs left to right.
    fn subtree_ixs(&self, root: Index) -> Vec<Index> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(ix) = stack.pop() {
            out.push(ix);
            for &child in self.arena[ix].children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    fn ordinal_taken(&self, ordinal: &str) -> bool {
        self.index.contains_key(ordinal) || self.retired.contains(ordinal)
    }

    fn validate_create(&self, entry: &Entry) -> TreeResult<Option<Index>> {
        if self.ordinal_taken(&entry.ordinal) {
            return Err(TreeError::DuplicateOrdinal(entry.ordinal.clone()));
        }
        let parent_ix = match entry.parent.as_deref() {
            Some(p) => Some(
                self.index
                    .get(p)
                    .copied()
                    .ok_or_else(|| TreeError::DanglingParent(p.to_string()))?,
            ),
            None => None,
        };
        if let Some(p) = entry.parent.as_deref() {
            debug_assert!(
                is_descendant(&entry.ordinal, p),
                "child ordinal must extend the parent prefix"
            );
        }
        if self.slug_taken(parent_ix, &entry.slug, None) {
            return Err(TreeError::DuplicateSlug {
                parent: entry.parent.clone(),
                slug: entry.slug.clone(),
            });
        }
        Ok(parent_ix)
    }

    fn apply_create(&mut self, mut entry: Entry, parent_ix: Option<Index>) -> Index {
        // The flag is derived state; a fresh ordinal cannot have children.
        entry.ancestor = false;
        let ordinal = entry.ordinal.clone();
        let ix = self.arena.insert(EntryNode {
            entry,
            parent: parent_ix,
            children: Vec::new(),
        });
        self.index.insert(ordinal, ix);
        self.attach(ix, parent_ix);
        ix
    }

    /// Checks a relocation without touching anything.
    fn validate_move(
        &self,
        ordinal: &str,
        new_parent: Option<&str>,
        new_ordinal: &str,
    ) -> TreeResult<(Index, Option<Index>)> {
        let ix = self.resolve(ordinal)?;
        if let Some(np) = new_parent {
            if np == ordinal || is_descendant(np, ordinal) {
                return Err(TreeError::CycleDetected {
                    ordinal: ordinal.to_string(),
                    target: np.to_string(),
                });
            }
        }
        if new_ordinal == ordinal || is_descendant(new_ordinal, ordinal) {
            return Err(TreeError::CycleDetected {
                ordinal: ordinal.to_string(),
                target: new_ordinal.to_string(),
            });
        }
        let new_parent_ix = match new_parent {
            Some(np) => Some(
                self.index
                    .get(np)
                    .copied()
                    .ok_or_else(|| TreeError::DanglingParent(np.to_string()))?,
            ),
            None => None,
        };
        let slug = &self.arena[ix].entry.slug;
        if self.slug_taken(new_parent_ix, slug, Some(ix)) {
            return Err(TreeError::DuplicateSlug {
                parent: new_parent.map(str::to_string),
                slug: slug.clone(),
            });
        }
        for &d in &self.subtree_ixs(ix) {
            let rewritten = swap_prefix(&self.arena[d].entry.ordinal, ordinal.len(), new_ordinal);
            if self.ordinal_taken(&rewritten) {
                return Err(TreeError::DuplicateOrdinal(rewritten));
            }
        }
        Ok((ix, new_parent_ix))
    }

    /// Relocates a validated subtree: swaps the ordinal prefix on every
    /// member, retires the vacated ordinals, and fixes both parents' flags.
    fn apply_move(
        &mut self,
        ix: Index,
        old_ordinal: &str,
        new_parent: Option<&str>,
        new_parent_ix: Option<Index>,
        new_ordinal: &str,
    ) {
        let old_parent_ix = self.arena[ix].parent;
        self.detach(ix);
        self.rewrite_subtree(ix, old_ordinal.len(), new_ordinal);
        self.arena[ix].parent = new_parent_ix;
        self.arena[ix].entry.parent = new_parent.map(str::to_string);
        self.attach(ix, new_parent_ix);
        if let Some(op) = old_parent_ix {
            self.refresh_ancestor(op);
        }
    }

    /// Swaps the ordinal prefix of a subtree in place, keeping the index and
    /// retired set consistent and rewriting descendants' parent references.
    fn rewrite_subtree(&mut self, root: Index, old_prefix_len: usize, new_prefix: &str) {
        for d in self.subtree_ixs(root) {
            let old = self.arena[d].entry.ordinal.clone();
            let new = swap_prefix(&old, old_prefix_len, new_prefix);
            self.index.remove(&old);
            self.retired.insert(old);
            self.arena[d].entry.ordinal = new.clone();
            if d != root {
                if let Some(parent_old) = self.arena[d].entry.parent.take() {
                    self.arena[d].entry.parent =
                        Some(swap_prefix(&parent_old, old_prefix_len, new_prefix));
                }
            }
            self.index.insert(new, d);
        }
    }
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit counter; bumped once per successful mutation.
    pub fn version(&self) -> u64 {
        self.read().version
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().index.is_empty()
    }

    /// True when `ordinal` has never been issued (neither live nor retired).
    pub fn is_free(&self, ordinal: &str) -> bool {
        !self.read().ordinal_taken(ordinal)
    }

    #[instrument(level = "trace", skip(self))]
    pub fn get(&self, ordinal: &str) -> TreeResult<Entry> {
        let s = self.read();
        let ix = s.resolve(ordinal)?;
        Ok(s.arena[ix].entry.clone())
    }

    /// Children of `parent`, ordinal ascending. `None` lists the roots.
    /// An existing childless parent yields an empty vector; an unknown
    /// parent is `NotFound`.
    #[instrument(level = "trace", skip(self))]
    pub fn children_of(&self, parent: Option<&str>) -> TreeResult<Vec<Entry>> {
        let s = self.read();
        let ixs: Vec<Index> = match parent {
            Some(p) => s.arena[s.resolve(p)?].children.clone(),
            None => s.roots.clone(),
        };
        Ok(ixs.into_iter().map(|ix| s.arena[ix].entry.clone()).collect())
    }

    /// Children plus the commit version, read atomically. The version is the
    /// optimistic guard for a mutation planned from this snapshot.
    pub fn snapshot_children(&self, parent: Option<&str>) -> TreeResult<(u64, Vec<Entry>)> {
        let s = self.read();
        let ixs: Vec<Index> = match parent {
            Some(p) => s.arena[s.resolve(p)?].children.clone(),
            None => s.roots.clone(),
        };
        let entries = ixs.into_iter().map(|ix| s.arena[ix].entry.clone()).collect();
        Ok((s.version, entries))
    }

    /// The subtree rooted at `ordinal` in depth-first order, root first.
    #[instrument(level = "trace", skip(self))]
    pub fn subtree(&self, ordinal: &str) -> TreeResult<Vec<Entry>> {
        let s = self.read();
        let root = s.resolve(ordinal)?;
        Ok(s.subtree_ixs(root)
            .into_iter()
            .map(|ix| s.arena[ix].entry.clone())
            .collect())
    }

    /// Inserts a new row. Fails with `DuplicateOrdinal` (live or retired
    /// key), `DuplicateSlug` (within the sibling set), or `DanglingParent`.
    /// Sets the parent's ancestor flag as a side effect of the same commit.
    #[instrument(level = "debug", skip(self, entry), fields(ordinal = %entry.ordinal))]
    pub fn create(&self, entry: Entry, expected: Option<u64>) -> TreeResult<Entry> {
        let mut s = self.write();
        s.guard(expected)?;
        let parent_ix = s.validate_create(&entry)?;
        let ix = s.apply_create(entry, parent_ix);
        s.version += 1;
        Ok(s.arena[ix].entry.clone())
    }

    /// Partial update of the payload fields; never touches `ordinal`,
    /// `parent`, or `slug`.
    #[instrument(level = "debug", skip(self, patch))]
    pub fn update_fields(&self, ordinal: &str, patch: FieldPatch) -> TreeResult<Entry> {
        let mut s = self.write();
        let ix = s.resolve(ordinal)?;
        let entry = &mut s.arena[ix].entry;
        if let Some(title) = patch.title {
            entry.title = title;
        }
        if let Some(difficulty) = patch.difficulty {
            entry.difficulty = difficulty;
        }
        if let Some(content) = patch.content {
            entry.content = content;
        }
        let updated = entry.clone();
        s.version += 1;
        Ok(updated)
    }

    /// Atomic relocation of a subtree under a new parent with a new ordinal.
    /// Fails with `CycleDetected` when the target lies inside the subtree
    /// (including the entry itself). Retires every vacated ordinal.
    #[instrument(level = "debug", skip(self))]
    pub fn reparent_and_rekey(
        &self,
        ordinal: &str,
        new_parent: Option<&str>,
        new_ordinal: &str,
        expected: Option<u64>,
    ) -> TreeResult<Entry> {
        let mut s = self.write();
        s.guard(expected)?;
        let (ix, new_parent_ix) = s.validate_move(ordinal, new_parent, new_ordinal)?;
        s.apply_move(ix, ordinal, new_parent, new_parent_ix, new_ordinal);
        s.version += 1;
        Ok(s.arena[ix].entry.clone())
    }

    /// Rebalance commit: rewrites a sibling range to fresh ordinals (their
    /// descendants' prefixes follow) and performs the triggering follow-up
    /// action, all in one transaction. `rekeys` pairs are
    /// `(old_ordinal, new_ordinal)` for entries sharing one parent.
    #[instrument(level = "debug", skip(self, rekeys, follow), fields(rekeys = rekeys.len()))]
    pub fn rekey_siblings(
        &self,
        rekeys: &[(String, String)],
        follow: Option<RekeyFollow>,
        expected: Option<u64>,
    ) -> TreeResult<Option<Entry>> {
        let mut s = self.write();
        s.guard(expected)?;

        // Validate everything before the first write.
        let mut parent_ix: Option<Option<Index>> = None;
        for (old, new) in rekeys {
            let ix = s.resolve(old)?;
            let this_parent = s.arena[ix].parent;
            if let Some(expected_parent) = parent_ix {
                debug_assert_eq!(
                    expected_parent, this_parent,
                    "rekey range must be sibling-local"
                );
            }
            parent_ix = Some(this_parent);
            for &d in &s.subtree_ixs(ix) {
                let rewritten = swap_prefix(&s.arena[d].entry.ordinal, old.len(), new);
                if s.ordinal_taken(&rewritten) {
                    return Err(TreeError::DuplicateOrdinal(rewritten));
                }
            }
        }
        enum FollowPlan {
            Create {
                entry: Entry,
                parent_ix: Option<Index>,
            },
            Reparent {
                ix: Index,
                new_parent_ix: Option<Index>,
                ordinal: String,
                new_parent: Option<String>,
                new_ordinal: String,
            },
        }
        let plan = match follow {
            Some(RekeyFollow::Create(entry)) => {
                let create_parent = s.validate_create(&entry)?;
                Some(FollowPlan::Create {
                    entry,
                    parent_ix: create_parent,
                })
            }
            Some(RekeyFollow::Reparent {
                ordinal,
                new_parent,
                new_ordinal,
            }) => {
                let (ix, new_parent_ix) =
                    s.validate_move(&ordinal, new_parent.as_deref(), &new_ordinal)?;
                Some(FollowPlan::Reparent {
                    ix,
                    new_parent_ix,
                    ordinal,
                    new_parent,
                    new_ordinal,
                })
            }
            None => None,
        };

        // Apply.
        for (old, new) in rekeys {
            let ix = s.resolve(old)?;
            s.rewrite_subtree(ix, old.len(), new);
        }
        if let Some(parent) = parent_ix {
            s.resort_siblings(parent);
        }
        let result = match plan {
            Some(FollowPlan::Create { entry, parent_ix }) => {
                let ix = s.apply_create(entry, parent_ix);
                Some(s.arena[ix].entry.clone())
            }
            Some(FollowPlan::Reparent {
                ix,
                new_parent_ix,
                ordinal: _,
                new_parent,
                new_ordinal,
            }) => {
                // A rekeyed sibling may have been an ancestor of the moved
                // entry, in which case its ordinal just changed: swap against
                // the current prefix, not the one captured at validation.
                let current = s.arena[ix].entry.ordinal.clone();
                s.apply_move(ix, &current, new_parent.as_deref(), new_parent_ix, &new_ordinal);
                Some(s.arena[ix].entry.clone())
            }
            None => None,
        };
        s.version += 1;
        debug!(version = s.version, "sibling range rekeyed");
        Ok(result)
    }

    /// Removes an entry. Without cascade, an entry with children fails with
    /// `HasChildren` and nothing changes; with cascade, the whole subtree
    /// goes in one transaction. The former parent's ancestor flag is cleared
    /// when it becomes childless. All removed ordinals are retired.
    #[instrument(level = "debug", skip(self))]
    pub fn delete(&self, ordinal: &str, cascade: bool) -> TreeResult<usize> {
        let mut s = self.write();
        let ix = s.resolve(ordinal)?;
        if !cascade && !s.arena[ix].children.is_empty() {
            return Err(TreeError::HasChildren(ordinal.to_string()));
        }
        let doomed = s.subtree_ixs(ix);
        let parent_ix = s.arena[ix].parent;
        s.detach(ix);
        let mut removed = 0;
        for d in doomed {
            if let Some(node) = s.arena.remove(d) {
                s.index.remove(&node.entry.ordinal);
                s.retired.insert(node.entry.ordinal);
                removed += 1;
            }
        }
        if let Some(p) = parent_ix {
            s.refresh_ancestor(p);
        }
        s.version += 1;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ordinal: &str, parent: Option<&str>, slug: &str) -> Entry {
        Entry {
            ordinal: ordinal.into(),
            parent: parent.map(str::to_string),
            ancestor: false,
            slug: slug.into(),
            title: slug.to_uppercase(),
            difficulty: None,
            content: String::new(),
        }
    }

    #[test]
    fn create_sets_parent_ancestor_flag() {
        let store = EntryStore::new();
        store.create(entry("m", None, "root"), None).unwrap();
        assert!(!store.get("m").unwrap().ancestor);
        store.create(entry("m:d", Some("m"), "child"), None).unwrap();
        assert!(store.get("m").unwrap().ancestor);
    }

    #[test]
    fn retired_ordinals_never_come_back() {
        let store = EntryStore::new();
        store.create(entry("m", None, "root"), None).unwrap();
        store.delete("m", false).unwrap();
        let err = store.create(entry("m", None, "root"), None).unwrap_err();
        assert!(matches!(err, TreeError::DuplicateOrdinal(_)));
    }

    #[test]
    fn version_guard_rejects_stale_commits() {
        let store = EntryStore::new();
        let stale = store.version();
        store.create(entry("m", None, "root"), None).unwrap();
        let err = store
            .create(entry("n", None, "other"), Some(stale))
            .unwrap_err();
        assert!(matches!(err, TreeError::ConcurrentModification));
        // Nothing from the failed call leaked.
        assert_eq!(store.len(), 1);
    }
}
