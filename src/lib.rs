//! canopy — an ordered-tree maintenance engine.
//!
//! Maintains a hierarchy of content entries identified by sortable string
//! ordinals. Siblings keep a stable, gap-tolerant total order under
//! arbitrary insertion, deletion, and re-parenting; byte-lexicographic order
//! over all ordinals is the depth-first traversal order of the whole tree.
//!
//! The moving parts, leaves first:
//! - [`OrdinalCodec`] mints and compares sibling keys by midpoint insertion.
//! - [`EntryStore`] owns the rows: arena-backed flat storage with enforced
//!   primary-key, parent, slug, and ancestor-flag invariants.
//! - [`TreeOps`] exposes position-based operations (insert-as-child, move,
//!   reorder, delete-subtree) with optimistic concurrency.
//! - [`RebalanceManager`] recovers from key exhaustion by rekeying the
//!   smallest sibling window that restores room, never the whole tree.
//!
//! ```
//! use std::sync::Arc;
//! use canopy::{EntryDraft, EntryStore, TreeOps};
//!
//! let store = Arc::new(EntryStore::new());
//! let ops = TreeOps::new(store.clone());
//!
//! let root = ops.insert_child(None, 0, EntryDraft::new("calculus", "Calculus"))?;
//! let limits = ops.insert_child(Some(&root.ordinal), 0, EntryDraft::new("limits", "Limits"))?;
//! ops.insert_child(Some(&root.ordinal), 0, EntryDraft::new("sets", "Sets"))?;
//!
//! let children = store.children_of(Some(&root.ordinal))?;
//! assert_eq!(children[1].ordinal, limits.ordinal);
//! # Ok::<(), canopy::TreeError>(())
//! ```

pub mod config;
pub mod entry;
pub mod errors;
pub mod ops;
pub mod ordinal;
pub mod rebalance;
pub mod render;
pub mod store;
pub mod util;

pub use config::CanopyConfig;
pub use entry::{Entry, EntryDraft, FieldPatch};
pub use errors::{TreeError, TreeResult};
pub use ops::TreeOps;
pub use ordinal::OrdinalCodec;
pub use rebalance::{RebalanceManager, RebalancePlan};
pub use render::{render_forest, render_subtree};
pub use store::{EntryStore, RekeyFollow};
