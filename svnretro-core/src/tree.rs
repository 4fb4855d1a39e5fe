//! Path-indexed view of the repository across revisions.
//!
//! Stored as an arena of `TreeNode`s addressed by integer id, sidestepping
//! the parent/child ownership cycle a pointer-based tree would need. Each
//! `TreeNode` tracks every [`NodeRef`] that
//! touched its path, distinguishing explicit touches from ones inherited
//! through a directory copy.

use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};

use crate::node::{Ancestry, Node, NodeAction, NodeKind};

pub type TreeId = usize;
pub const ROOT: TreeId = 0;

/// A lightweight, cloneable summary of a [`Node`] sufficient for tree
/// bookkeeping — the tree records *that* and *how* a path was touched, not
/// the node's full properties/content.
#[derive(Debug, Clone)]
pub struct NodeRef {
    pub revision: i64,
    pub path: String,
    pub action: NodeAction,
    pub kind: Option<NodeKind>,
    pub ancestry: Option<Ancestry>,
}

impl From<&Node> for NodeRef {
    fn from(node: &Node) -> Self {
        Self {
            revision: node.revision_number,
            path: node.path().to_string(),
            action: node.action,
            kind: node.kind,
            ancestry: node.ancestry.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct TreeNode {
    pub path: String,
    pub parent: Option<TreeId>,
    /// Every node that touched this path, in revision order.
    pub revisions: Vec<NodeRef>,
    /// Revision numbers for which the touch was explicit rather than
    /// inherited via a directory copy.
    pub explicit: HashSet<i64>,
    pub children: HashMap<String, TreeId>,
}

impl TreeNode {
    pub fn last(&self) -> Option<&NodeRef> {
        self.revisions.last()
    }
}

pub struct Tree {
    arena: Vec<TreeNode>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            arena: vec![TreeNode::default()],
        }
    }

    pub fn node(&self, id: TreeId) -> &TreeNode {
        &self.arena[id]
    }

    fn split(path: &str) -> Vec<&str> {
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    /// Exact path-component lookup. Returns the deepest node reached and
    /// whether the full path matched.
    pub fn lookup(&self, path: &str) -> (TreeId, bool) {
        let mut cur = ROOT;
        for comp in Self::split(path) {
            match self.arena[cur].children.get(comp) {
                Some(&child) => cur = child,
                None => return (cur, false),
            }
        }
        (cur, true)
    }

    /// Returns the node defining `path`'s state at `rev`: its explicit touch
    /// at `rev` if any, else the most recent earlier explicit-or-inherited
    /// touch.
    pub fn at(&self, id: TreeId, rev: i64) -> Option<&NodeRef> {
        let node = &self.arena[id];
        if node.explicit.contains(&rev) {
            return node.revisions.iter().rev().find(|n| n.revision == rev);
        }
        let mut last = None;
        for n in &node.revisions {
            match n.revision.cmp(&rev) {
                std::cmp::Ordering::Less => last = Some(n),
                std::cmp::Ordering::Equal => return Some(n),
                std::cmp::Ordering::Greater => break,
            }
        }
        last
    }

    fn add_revision(&mut self, id: TreeId, node_ref: NodeRef, explicit: bool) {
        let t = &mut self.arena[id];
        match t.revisions.last_mut() {
            Some(back) if back.revision == node_ref.revision => *back = node_ref.clone(),
            _ => t.revisions.push(node_ref.clone()),
        }
        if explicit {
            t.explicit.insert(node_ref.revision);
        }
    }

    /// Inserts a node's effect into the tree:
    /// walk to the path (creating the final component if this is its first
    /// appearance), record the touch, then propagate copy-from ancestry or a
    /// directory delete to descendants/children.
    pub fn insert(&mut self, node_ref: NodeRef) -> Result<()> {
        let path = node_ref.path.clone();
        let target = self.insert_below(ROOT, &path, &node_ref)?;

        self.add_revision(target, node_ref.clone(), true);

        if let Some(ancestry) = node_ref.ancestry.clone() {
            let (branch_id, found) = self.lookup(&ancestry.path);
            if !found {
                bail!("missing branch node {}", ancestry.path);
            }
            self.copy_branch(target, ancestry.rev, branch_id, &node_ref)?;
        } else if node_ref.action == NodeAction::Delete {
            let children: Vec<TreeId> = self.arena[target].children.values().copied().collect();
            for child in children {
                self.add_revision(child, node_ref.clone(), false);
            }
        }

        Ok(())
    }

    fn insert_below(&mut self, mut cur: TreeId, path: &str, node_ref: &NodeRef) -> Result<TreeId> {
        let comps = Self::split(path);
        if comps.is_empty() {
            return Ok(ROOT);
        }
        for (idx, comp) in comps.iter().enumerate() {
            if let Some(&child) = self.arena[cur].children.get(*comp) {
                cur = child;
                continue;
            }
            if idx != comps.len() - 1 {
                bail!("missing intermediate node for {}: {}", path, comp);
            }
            if node_ref.action == NodeAction::Delete {
                bail!("deleting non-existent node {}/{}", self.arena[cur].path, comp);
            }
            let full_path = format!("{}/{}", self.arena[cur].path, comp);
            let new_id = self.arena.len();
            self.arena.push(TreeNode {
                path: full_path,
                parent: Some(cur),
                ..TreeNode::default()
            });
            self.arena[cur].children.insert((*comp).to_string(), new_id);
            cur = new_id;
        }
        Ok(cur)
    }

    /// Recursively copies every live-at-`branch_rev` descendant of
    /// `branch_id` into `dest_id`, appending `node_ref` to each copied
    /// descendant's revision list as an *implicit* touch.
    fn copy_branch(
        &mut self,
        dest_id: TreeId,
        branch_rev: i64,
        branch_id: TreeId,
        node_ref: &NodeRef,
    ) -> Result<()> {
        let branch_live = self
            .at(branch_id, branch_rev)
            .map(|n| n.action != NodeAction::Delete)
            .unwrap_or(false);
        if !branch_live {
            return Ok(());
        }

        let branch_children: Vec<(String, TreeId)> = self.arena[branch_id]
            .children
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();

        for (comp, branch_child_id) in branch_children {
            let child_snapshot = self.at(branch_child_id, branch_rev).cloned();
            let live = child_snapshot
                .as_ref()
                .map(|n| n.action != NodeAction::Delete)
                .unwrap_or(false);
            if !live {
                continue;
            }

            let dest_child_id = match self.arena[dest_id].children.get(&comp) {
                Some(&existing) => existing,
                None => {
                    let dest_path = format!("{}/{}", self.arena[dest_id].path, comp);
                    let new_id = self.arena.len();
                    self.arena.push(TreeNode {
                        path: dest_path,
                        parent: Some(dest_id),
                        revisions: vec![child_snapshot.clone().unwrap()],
                        ..TreeNode::default()
                    });
                    self.arena[dest_id].children.insert(comp.clone(), new_id);
                    new_id
                }
            };

            self.add_revision(dest_child_id, node_ref.clone(), false);

            if !self.arena[branch_child_id].children.is_empty() {
                self.copy_branch(dest_child_id, branch_rev, branch_child_id, node_ref)?;
            }
        }

        Ok(())
    }

    /// Unordered traversal of the subtree rooted at `id`.
    pub fn walk(&self, id: TreeId) -> Vec<TreeId> {
        let mut out = vec![id];
        for &child in self.arena[id].children.values() {
            out.extend(self.walk(child));
        }
        out
    }
}

/// Path-component match: a prefix match that respects `/` boundaries.
/// `Model` matches `Model` and `Model/x` but never `Models`.
pub fn match_path_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Rewrites `path` if it begins, on a path-component boundary, with `prefix`;
/// otherwise returns it unchanged.
pub fn replace_path_prefix(path: &str, prefix: &str, replacement: &str) -> String {
    let trimmed_prefix = prefix.trim_end_matches('/');
    if !match_path_prefix(path, trimmed_prefix) {
        return path.to_string();
    }
    let rest = &path[trimmed_prefix.len()..];
    format!("{}{}", replacement.trim_end_matches('/'), rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nref(rev: i64, path: &str, action: NodeAction) -> NodeRef {
        NodeRef {
            revision: rev,
            path: path.to_string(),
            action,
            kind: Some(NodeKind::Dir),
            ancestry: None,
        }
    }

    #[test]
    fn match_path_prefix_respects_component_boundary() {
        assert!(match_path_prefix("/Model", "/Model"));
        assert!(match_path_prefix("/Model/x", "/Model"));
        assert!(!match_path_prefix("/Models", "/Model"));
        assert!(!match_path_prefix("/Models/x", "/Model"));
    }

    #[test]
    fn replace_path_prefix_rewrites_only_boundary_matches() {
        assert_eq!(replace_path_prefix("/a/b", "/a", "/x"), "/x/b");
        assert_eq!(replace_path_prefix("/ab", "/a", "/x"), "/ab");
        assert_eq!(replace_path_prefix("/a", "/a", "/x"), "/x");
    }

    #[test]
    fn insert_requires_intermediate_to_exist() {
        let mut tree = Tree::new();
        let err = tree.insert(nref(1, "/a/b", NodeAction::Add));
        assert!(err.is_err());
    }

    #[test]
    fn insert_creates_path_incrementally() {
        let mut tree = Tree::new();
        tree.insert(nref(1, "/a", NodeAction::Add)).unwrap();
        tree.insert(nref(2, "/a/b", NodeAction::Add)).unwrap();
        let (id, found) = tree.lookup("/a/b");
        assert!(found);
        assert_eq!(tree.node(id).path, "/a/b");
    }

    #[test]
    fn at_returns_most_recent_earlier_explicit_touch() {
        let mut tree = Tree::new();
        tree.insert(nref(1, "/a", NodeAction::Add)).unwrap();
        tree.insert(nref(5, "/a", NodeAction::Change)).unwrap();
        let (id, _) = tree.lookup("/a");
        assert_eq!(tree.at(id, 3).unwrap().revision, 1);
        assert_eq!(tree.at(id, 5).unwrap().revision, 5);
        assert_eq!(tree.at(id, 10).unwrap().revision, 5);
    }

    #[test]
    fn copy_from_ancestry_propagates_live_children() {
        let mut tree = Tree::new();
        tree.insert(nref(1, "/src", NodeAction::Add)).unwrap();
        tree.insert(nref(1, "/src/x", NodeAction::Add)).unwrap();

        let mut copy = nref(2, "/dst", NodeAction::Add);
        copy.ancestry = Some(Ancestry {
            rev: 1,
            path: "/src".to_string(),
        });
        tree.insert(copy).unwrap();

        let (id, found) = tree.lookup("/dst/x");
        assert!(found, "copy should have propagated /src/x into /dst/x");
        assert!(!tree.node(id).explicit.contains(&2));
    }

    #[test]
    fn copy_skips_children_deleted_before_branch_revision() {
        let mut tree = Tree::new();
        tree.insert(nref(1, "/src", NodeAction::Add)).unwrap();
        tree.insert(nref(1, "/src/x", NodeAction::Add)).unwrap();
        tree.insert(nref(2, "/src/x", NodeAction::Delete)).unwrap();

        let mut copy = nref(3, "/dst", NodeAction::Add);
        copy.ancestry = Some(Ancestry {
            rev: 2,
            path: "/src".to_string(),
        });
        tree.insert(copy).unwrap();

        let (_, found) = tree.lookup("/dst/x");
        assert!(!found, "deleted child should not be copied");
    }
}
