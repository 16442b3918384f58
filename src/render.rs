//! Ascii rendering of the hierarchy for diagnostics; content bodies are
//! never rendered.

use termtree::Tree;

use crate::entry::Entry;
use crate::errors::TreeResult;
use crate::store::EntryStore;

/// Render every root and its subtree, one block per root.
pub fn render_forest(store: &EntryStore) -> TreeResult<String> {
    let mut out = String::new();
    for root in store.children_of(None)? {
        out.push_str(&render_subtree(store, &root.ordinal)?);
    }
    Ok(out)
}

/// Render the subtree rooted at `ordinal`.
pub fn render_subtree(store: &EntryStore, ordinal: &str) -> TreeResult<String> {
    let entry = store.get(ordinal)?;
    Ok(build_tree(store, &entry)?.to_string())
}

fn build_tree(store: &EntryStore, entry: &Entry) -> TreeResult<Tree<String>> {
    let mut node = Tree::new(label(entry));
    for child in store.children_of(Some(&entry.ordinal))? {
        node.push(build_tree(store, &child)?);
    }
    Ok(node)
}

fn label(entry: &Entry) -> String {
    format!("{} [{}]", entry.slug, entry.ordinal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::EntryDraft;
    use crate::ops::TreeOps;
    use std::sync::Arc;

    #[test]
    fn rendering_lists_children_in_sibling_order() {
        let store = Arc::new(EntryStore::new());
        let ops = TreeOps::new(store.clone());
        let root = ops
            .insert_child(None, 0, EntryDraft::new("algebra", "Algebra"))
            .unwrap();
        ops.insert_child(Some(&root.ordinal), 0, EntryDraft::new("groups", "Groups"))
            .unwrap();
        ops.insert_child(Some(&root.ordinal), 0, EntryDraft::new("rings", "Rings"))
            .unwrap();

        let rendered = render_forest(&store).unwrap();
        let groups = rendered.find("groups").unwrap();
        let rings = rendered.find("rings").unwrap();
        assert!(rendered.starts_with("algebra"));
        assert!(rings < groups, "rings was inserted before groups");
    }
}
