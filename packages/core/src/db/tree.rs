//! Node Tree
//!
//! Owned, in-memory index of a document's node hierarchy: an arena of nodes
//! keyed by id, each with its parent and an ordered child list. Backends build
//! it once when a document is opened; afterwards every navigation and
//! structural check runs against this index instead of the storage.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::{Node, NodeId};

#[derive(Debug, Clone, PartialEq)]
pub struct TreeEntry {
    pub node: Node,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Ordered child list of one parent (`None` = top level)
///
/// Structural store operations receive the sibling list as it is *after* the
/// change so that backends can rewrite their ordering records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Placement {
    pub parent: Option<NodeId>,
    pub siblings: Vec<NodeId>,
}

impl Placement {
    pub fn position_of(&self, id: NodeId) -> Option<usize> {
        self.siblings.iter().position(|&s| s == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeTree {
    entries: HashMap<NodeId, TreeEntry>,
    roots: Vec<NodeId>,
    bookmarks: Vec<NodeId>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.entries.get(&id).map(|e| &e.node)
    }

    pub fn entry(&self, id: NodeId) -> Option<&TreeEntry> {
        self.entries.get(&id)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.entries.get(&id).and_then(|e| e.parent)
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Children of `parent`, or the top-level nodes for `None`
    pub fn children(&self, parent: Option<NodeId>) -> &[NodeId] {
        match parent {
            None => &self.roots,
            Some(id) => self
                .entries
                .get(&id)
                .map(|e| e.children.as_slice())
                .unwrap_or(&[]),
        }
    }

    pub fn placement(&self, parent: Option<NodeId>) -> Placement {
        Placement {
            parent,
            siblings: self.children(parent).to_vec(),
        }
    }

    /// Smallest id larger than every id in use
    pub fn next_id(&self) -> NodeId {
        self.entries.keys().copied().max().unwrap_or(0) + 1
    }

    /// Insert `node` under `parent` at `index` (appended when `None` or past the end)
    ///
    /// A missing parent puts the node at the top level. Returns `false` when
    /// the id is already present.
    pub fn insert(&mut self, node: Node, parent: Option<NodeId>, index: Option<usize>) -> bool {
        if self.entries.contains_key(&node.id) {
            return false;
        }
        let parent = parent.filter(|p| self.entries.contains_key(p));
        let id = node.id;
        self.entries.insert(
            id,
            TreeEntry {
                node,
                parent,
                children: Vec::new(),
            },
        );
        self.attach(id, parent, index);
        true
    }

    /// Replace a node's metadata; structure is unchanged
    pub fn update(&mut self, node: Node) -> bool {
        match self.entries.get_mut(&node.id) {
            Some(entry) => {
                entry.node = node;
                true
            }
            None => false,
        }
    }

    fn siblings_mut(&mut self, parent: Option<NodeId>) -> Option<&mut Vec<NodeId>> {
        match parent {
            None => Some(&mut self.roots),
            Some(id) => self.entries.get_mut(&id).map(|e| &mut e.children),
        }
    }

    fn attach(&mut self, id: NodeId, parent: Option<NodeId>, index: Option<usize>) {
        if let Some(siblings) = self.siblings_mut(parent) {
            let index = index.unwrap_or(siblings.len()).min(siblings.len());
            siblings.insert(index, id);
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.parent = parent;
        }
    }

    fn detach(&mut self, id: NodeId) {
        let parent = self.parent(id);
        if let Some(siblings) = self.siblings_mut(parent) {
            siblings.retain(|&s| s != id);
        }
    }

    /// Move `id` under `parent` at `index`; the caller checks for cycles
    pub fn move_to(&mut self, id: NodeId, parent: Option<NodeId>, index: Option<usize>) {
        if !self.contains(id) {
            return;
        }
        self.detach(id);
        self.attach(id, parent, index);
    }

    /// Remove `id` and its descendants, returning their ids in pre-order
    pub fn remove_subtree(&mut self, id: NodeId) -> Vec<NodeId> {
        let removed = self.subtree(id);
        if removed.is_empty() {
            return removed;
        }
        self.detach(id);
        for gone in &removed {
            self.entries.remove(gone);
        }
        self.bookmarks.retain(|b| !removed.contains(b));
        removed
    }

    /// `id` followed by all its descendants, pre-order
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        if !self.contains(id) {
            return out;
        }
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            if let Some(entry) = self.entries.get(&next) {
                stack.extend(entry.children.iter().rev());
            }
        }
        out
    }

    /// Every node in document order
    pub fn preorder(&self) -> Vec<NodeId> {
        self.roots.iter().flat_map(|&r| self.subtree(r)).collect()
    }

    /// Whether `candidate` lies strictly below `ancestor`
    pub fn is_descendant(&self, candidate: NodeId, ancestor: NodeId) -> bool {
        let mut current = self.parent(candidate);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Depth below the top level (top-level nodes have depth 0)
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.parent(id);
        while let Some(parent) = current {
            depth += 1;
            current = self.parent(parent);
        }
        depth
    }

    /// Nodes aliasing `owner`, in document order
    pub fn aliases_of(&self, owner: NodeId) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| self.get(*id).and_then(|n| n.master_id) == Some(owner))
            .collect()
    }

    pub fn bookmarks(&self) -> &[NodeId] {
        &self.bookmarks
    }

    /// Replace the bookmark list, dropping unknown ids and duplicates
    pub fn set_bookmarks(&mut self, bookmarks: Vec<NodeId>) {
        let mut kept: Vec<NodeId> = Vec::with_capacity(bookmarks.len());
        for id in bookmarks {
            if self.contains(id) && !kept.contains(&id) {
                kept.push(id);
            }
        }
        self.bookmarks = kept;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeKind;

    fn node(id: NodeId) -> Node {
        Node::new(id, format!("n{id}"), NodeKind::RichText)
    }

    /// 1 ─ 2 ─ 4
    ///   └ 3
    /// 5
    fn sample() -> NodeTree {
        let mut tree = NodeTree::new();
        tree.insert(node(1), None, None);
        tree.insert(node(2), Some(1), None);
        tree.insert(node(3), Some(1), None);
        tree.insert(node(4), Some(2), None);
        tree.insert(node(5), None, None);
        tree
    }

    #[test]
    fn test_preorder_and_subtree() {
        let tree = sample();
        assert_eq!(tree.preorder(), vec![1, 2, 4, 3, 5]);
        assert_eq!(tree.subtree(2), vec![2, 4]);
        assert!(tree.subtree(99).is_empty());
        assert_eq!(tree.next_id(), 6);
        assert_eq!(tree.depth(4), 2);
    }

    #[test]
    fn test_descendant_check() {
        let tree = sample();
        assert!(tree.is_descendant(4, 1));
        assert!(!tree.is_descendant(1, 4));
        assert!(!tree.is_descendant(1, 1));
        assert!(!tree.is_descendant(5, 1));
    }

    #[test]
    fn test_insert_at_index_and_move() {
        let mut tree = sample();
        tree.insert(node(6), Some(1), Some(0));
        assert_eq!(tree.children(Some(1)), &[6, 2, 3]);

        tree.move_to(3, None, Some(0));
        assert_eq!(tree.roots(), &[3, 1, 5]);
        assert_eq!(tree.children(Some(1)), &[6, 2]);
        assert_eq!(tree.parent(3), None);
    }

    #[test]
    fn test_remove_subtree_drops_bookmarks() {
        let mut tree = sample();
        tree.set_bookmarks(vec![4, 5, 4, 42]);
        assert_eq!(tree.bookmarks(), &[4, 5]);

        let removed = tree.remove_subtree(2);
        assert_eq!(removed, vec![2, 4]);
        assert!(!tree.contains(4));
        assert_eq!(tree.children(Some(1)), &[3]);
        assert_eq!(tree.bookmarks(), &[5]);
    }

    #[test]
    fn test_aliases_in_document_order() {
        let mut tree = sample();
        let mut alias = node(6);
        alias.master_id = Some(4);
        tree.insert(alias, Some(5), None);
        let mut alias = node(7);
        alias.master_id = Some(4);
        tree.insert(alias, Some(1), Some(0));
        assert_eq!(tree.aliases_of(4), vec![7, 6]);
    }
}
