use crate::error::{Error, Result};
use crate::node::{Node, Version};
use std::collections::{HashMap, HashSet};

/// A node with its resolved children. Derived from the flat list, never
/// stored; rebuilt from scratch on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub node: Node,
    pub children: Vec<TreeNode>,
    pub expandable: bool,
}

/// One row of the flattened projection: node fields plus depth.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatNode {
    pub id: String,
    pub name: String,
    pub level: usize,
    pub expandable: bool,
    pub is_folder: bool,
    pub parent_id: Option<String>,
    pub versions: Vec<Version>,
}

impl FlatNode {
    fn from_tree(tree: &TreeNode, level: usize) -> Self {
        Self {
            id: tree.node.id.clone(),
            name: tree.node.name.clone(),
            level,
            expandable: tree.expandable,
            is_folder: tree.node.is_folder,
            parent_id: tree.node.parent_id.clone(),
            versions: tree.node.versions.clone(),
        }
    }
}

/// Build the forest rooted at `parent_id` (`None` = top level).
///
/// Deterministic given the input order, does not mutate the input. A node
/// whose parent id does not resolve to anything in the list is treated as a
/// root rather than rejected. A parent→children index is built once up front
/// so the recursion stays linear in the node count.
pub fn build_under(nodes: &[Node], parent_id: Option<&str>) -> Vec<TreeNode> {
    let ids: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
    let mut children_of: HashMap<&str, Vec<&Node>> = HashMap::new();
    let mut roots: Vec<&Node> = Vec::new();

    for node in nodes {
        match node.parent_id.as_deref() {
            Some(p) if ids.contains(p) && p != node.id => {
                children_of.entry(p).or_default().push(node)
            }
            _ => roots.push(node),
        }
    }

    let top: Vec<&Node> = match parent_id {
        None => roots,
        Some(p) => children_of.get(p).cloned().unwrap_or_default(),
    };
    top.into_iter().map(|n| attach(n, &children_of)).collect()
}

/// Build the full forest from the roots.
pub fn build_tree(nodes: &[Node]) -> Vec<TreeNode> {
    build_under(nodes, None)
}

fn attach(node: &Node, children_of: &HashMap<&str, Vec<&Node>>) -> TreeNode {
    let children: Vec<TreeNode> = children_of
        .get(node.id.as_str())
        .map(|kids| kids.iter().map(|k| attach(k, children_of)).collect())
        .unwrap_or_default();
    TreeNode {
        expandable: !children.is_empty(),
        node: node.clone(),
        children,
    }
}

/// Full pre-order flattening with depth levels, ignoring expand state.
pub fn flatten(tree: &[TreeNode]) -> Vec<FlatNode> {
    fn walk(nodes: &[TreeNode], level: usize, out: &mut Vec<FlatNode>) {
        for t in nodes {
            out.push(FlatNode::from_tree(t, level));
            walk(&t.children, level + 1, out);
        }
    }
    let mut out = Vec::new();
    walk(tree, 0, &mut out);
    out
}

/// Pre-order traversal back into a flat node list.
pub fn collect_nodes(tree: &[TreeNode]) -> Vec<Node> {
    fn walk(nodes: &[TreeNode], out: &mut Vec<Node>) {
        for t in nodes {
            out.push(t.node.clone());
            walk(&t.children, out);
        }
    }
    let mut out = Vec::new();
    walk(tree, &mut out);
    out
}

/// id → node lookup over the whole tree, pre-order.
pub fn node_map(tree: &[TreeNode]) -> HashMap<String, Node> {
    let mut map = HashMap::new();
    fn walk(nodes: &[TreeNode], map: &mut HashMap<String, Node>) {
        for t in nodes {
            map.insert(t.node.id.clone(), t.node.clone());
            walk(&t.children, map);
        }
    }
    walk(tree, &mut map);
    map
}

/// Ancestor chain for `id`, root first, ending in the node itself.
///
/// The walk stops at the first missing parent. A repeated id means the parent
/// chain loops, which is corrupt data and must not hang the caller.
pub fn breadcrumb(id: &str, map: &HashMap<String, Node>) -> Result<Vec<Node>> {
    let mut chain: Vec<Node> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = map.get(id);

    while let Some(node) = current {
        if !seen.insert(node.id.clone()) {
            return Err(Error::DataCorruption(format!(
                "parent cycle through node {}",
                node.id
            )));
        }
        chain.insert(0, node.clone());
        current = node.parent_id.as_deref().and_then(|p| map.get(p));
    }
    Ok(chain)
}

/// Expand/collapse state, held apart from the tree so it survives rebuilds
/// for as long as the node ids do.
#[derive(Debug, Clone, Default)]
pub struct TreeView {
    expanded: HashSet<String>,
}

impl TreeView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_expanded(&self, id: &str) -> bool {
        self.expanded.contains(id)
    }

    pub fn expand(&mut self, id: &str) {
        self.expanded.insert(id.to_string());
    }

    pub fn collapse(&mut self, id: &str) {
        self.expanded.remove(id);
    }

    pub fn toggle(&mut self, id: &str) {
        if !self.expanded.remove(id) {
            self.expanded.insert(id.to_string());
        }
    }

    /// Drop expand state for ids that no longer exist. Not an error.
    pub fn retain_known(&mut self, known: &HashSet<String>) {
        self.expanded.retain(|id| known.contains(id));
    }

    /// The currently visible rows: a node is emitted, then its children only
    /// if it is expanded.
    pub fn visible(&self, tree: &[TreeNode]) -> Vec<FlatNode> {
        fn walk(view: &TreeView, nodes: &[TreeNode], level: usize, out: &mut Vec<FlatNode>) {
            for t in nodes {
                out.push(FlatNode::from_tree(t, level));
                if view.is_expanded(&t.node.id) {
                    walk(view, &t.children, level + 1, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(self, tree, 0, &mut out);
        out
    }
}

/// Re-parent a dragged node onto the row at `drop_index` in the visible list.
///
/// Works on a deep copy so a rejected drop leaves the live tree untouched.
/// Returns `Ok(None)` when the drop lands outside any row (a no-op, not an
/// error). The destination must be a folder, and a node may not be dropped
/// into itself or its own subtree.
pub fn reparent(
    tree: &[TreeNode],
    visible: &[FlatNode],
    drop_index: usize,
    dragged_id: &str,
) -> Result<Option<Vec<TreeNode>>> {
    let Some(dest) = visible.get(drop_index) else {
        return Ok(None);
    };
    if dest.id == dragged_id {
        return Ok(None);
    }
    if !dest.is_folder {
        return Err(Error::InvalidDrop(format!(
            "{} is not a folder",
            dest.name
        )));
    }

    let mut copy = tree.to_vec();
    let Some(mut dragged) = detach(&mut copy, dragged_id) else {
        return Err(Error::NotFound(dragged_id.to_string()));
    };
    if subtree_contains(&dragged, &dest.id) {
        return Err(Error::InvalidDrop(format!(
            "{} is inside the dragged subtree",
            dest.name
        )));
    }

    dragged.node.parent_id = Some(dest.id.clone());
    let target = find_mut(&mut copy, &dest.id)
        .ok_or_else(|| Error::NotFound(dest.id.clone()))?;
    target.children.push(dragged);
    target.expandable = true;
    Ok(Some(copy))
}

fn detach(nodes: &mut Vec<TreeNode>, id: &str) -> Option<TreeNode> {
    if let Some(pos) = nodes.iter().position(|t| t.node.id == id) {
        return Some(nodes.remove(pos));
    }
    for t in nodes.iter_mut() {
        if let Some(found) = detach(&mut t.children, id) {
            t.expandable = !t.children.is_empty();
            return Some(found);
        }
    }
    None
}

fn find_mut<'a>(nodes: &'a mut [TreeNode], id: &str) -> Option<&'a mut TreeNode> {
    for t in nodes.iter_mut() {
        if t.node.id == id {
            return Some(t);
        }
        if let Some(found) = find_mut(&mut t.children, id) {
            return Some(found);
        }
    }
    None
}

fn subtree_contains(tree: &TreeNode, id: &str) -> bool {
    tree.node.id == id || tree.children.iter().any(|c| subtree_contains(c, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, parent: Option<&str>, is_folder: bool) -> Node {
        Node {
            id: id.to_string(),
            name: format!("{id}-name"),
            parent_id: parent.map(|p| p.to_string()),
            is_folder,
            date: "2026-01-01".to_string(),
            size: None,
            kind: None,
            content: None,
            tags: vec![],
            versions: vec![],
        }
    }

    /// root
    /// ├── docs
    /// │   ├── q1
    /// │   │   └── plan.txt
    /// │   └── notes.txt
    /// └── misc.txt
    fn sample() -> Vec<Node> {
        vec![
            node("root", None, true),
            node("docs", Some("root"), true),
            node("q1", Some("docs"), true),
            node("plan", Some("q1"), false),
            node("notes", Some("docs"), false),
            node("misc", Some("root"), false),
        ]
    }

    #[test]
    fn build_tree_resolves_children_and_expandable() {
        let tree = build_tree(&sample());
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert!(root.expandable);
        assert_eq!(root.children.len(), 2);
        let docs = &root.children[0];
        assert_eq!(docs.node.id, "docs");
        assert!(docs.expandable);
        let misc = &root.children[1];
        assert!(!misc.expandable);
    }

    #[test]
    fn build_under_returns_only_that_parents_children() {
        let tree = build_under(&sample(), Some("docs"));
        let ids: Vec<&str> = tree.iter().map(|t| t.node.id.as_str()).collect();
        assert_eq!(ids, vec!["q1", "notes"]);
    }

    #[test]
    fn dangling_parent_becomes_root() {
        let mut nodes = sample();
        nodes.push(node("orphan", Some("vanished"), false));
        let tree = build_tree(&nodes);
        let top: Vec<&str> = tree.iter().map(|t| t.node.id.as_str()).collect();
        assert_eq!(top, vec!["root", "orphan"]);
    }

    #[test]
    fn flatten_round_trip_preserves_ids_once_each() {
        let nodes = sample();
        let flat = flatten(&build_tree(&nodes));
        assert_eq!(flat.len(), nodes.len());
        let mut seen = HashSet::new();
        for row in &flat {
            assert!(seen.insert(row.id.clone()), "{} emitted twice", row.id);
        }
        // Stable depth-first order: parent always precedes child
        let order: Vec<&str> = flat.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(order, vec!["root", "docs", "q1", "plan", "notes", "misc"]);
        // Deterministic across runs with the same input order
        assert_eq!(flatten(&build_tree(&nodes)), flat);
    }

    #[test]
    fn flatten_levels_match_depth() {
        let flat = flatten(&build_tree(&sample()));
        let levels: HashMap<&str, usize> =
            flat.iter().map(|f| (f.id.as_str(), f.level)).collect();
        assert_eq!(levels["root"], 0);
        assert_eq!(levels["docs"], 1);
        assert_eq!(levels["plan"], 3);
    }

    #[test]
    fn breadcrumb_is_root_first_and_depth_plus_one() {
        let tree = build_tree(&sample());
        let map = node_map(&tree);
        let crumbs = breadcrumb("plan", &map).unwrap();
        let ids: Vec<&str> = crumbs.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["root", "docs", "q1", "plan"]);
        // plan sits at depth 3, so 4 crumbs
        assert_eq!(crumbs.len(), 4);
    }

    #[test]
    fn breadcrumb_of_missing_id_is_empty() {
        let map = node_map(&build_tree(&sample()));
        assert!(breadcrumb("ghost", &map).unwrap().is_empty());
    }

    #[test]
    fn breadcrumb_detects_parent_cycle() {
        // Corrupt map: a → b → a
        let mut map = HashMap::new();
        map.insert("a".to_string(), node("a", Some("b"), true));
        map.insert("b".to_string(), node("b", Some("a"), true));
        assert!(matches!(
            breadcrumb("a", &map),
            Err(Error::DataCorruption(_))
        ));
    }

    #[test]
    fn visible_respects_expand_state() {
        let tree = build_tree(&sample());
        let mut view = TreeView::new();

        let rows = view.visible(&tree);
        assert_eq!(rows.len(), 1); // only root, collapsed

        view.expand("root");
        let ids: Vec<String> = view.visible(&tree).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["root", "docs", "misc"]);

        view.expand("docs");
        let ids: Vec<String> = view.visible(&tree).into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["root", "docs", "q1", "notes", "misc"]);
    }

    #[test]
    fn expand_state_survives_rebuild() {
        let mut nodes = sample();
        let mut view = TreeView::new();
        view.expand("root");
        view.expand("docs");

        nodes.push(node("extra", Some("docs"), false));
        let tree = build_tree(&nodes);
        let ids: Vec<String> = view.visible(&tree).into_iter().map(|f| f.id).collect();
        assert!(ids.contains(&"extra".to_string()));
    }

    #[test]
    fn retain_known_silently_drops_stale_ids() {
        let mut view = TreeView::new();
        view.expand("root");
        view.expand("deleted");
        let known: HashSet<String> = ["root".to_string()].into();
        view.retain_known(&known);
        assert!(view.is_expanded("root"));
        assert!(!view.is_expanded("deleted"));
    }

    #[test]
    fn reparent_moves_node_under_new_folder() {
        let tree = build_tree(&sample());
        let mut view = TreeView::new();
        view.expand("root");
        view.expand("docs");
        let visible = view.visible(&tree);
        let q1_index = visible.iter().position(|f| f.id == "q1").unwrap();

        let updated = reparent(&tree, &visible, q1_index, "misc").unwrap().unwrap();
        let nodes = collect_nodes(&updated);
        let misc = nodes.iter().find(|n| n.id == "misc").unwrap();
        assert_eq!(misc.parent_id.as_deref(), Some("q1"));

        // misc no longer appears under root in a rebuilt tree
        let rebuilt = build_tree(&nodes);
        let root_children: Vec<&str> = rebuilt[0]
            .children
            .iter()
            .map(|t| t.node.id.as_str())
            .collect();
        assert!(!root_children.contains(&"misc"));
    }

    #[test]
    fn reparent_outside_rows_is_noop() {
        let tree = build_tree(&sample());
        let view = TreeView::new();
        let visible = view.visible(&tree);
        let result = reparent(&tree, &visible, visible.len() + 3, "misc").unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn reparent_rejects_file_destination() {
        let tree = build_tree(&sample());
        let mut view = TreeView::new();
        view.expand("root");
        let visible = view.visible(&tree);
        let misc_index = visible.iter().position(|f| f.id == "misc").unwrap();
        assert!(matches!(
            reparent(&tree, &visible, misc_index, "docs"),
            Err(Error::InvalidDrop(_))
        ));
    }

    #[test]
    fn reparent_rejects_own_descendant() {
        let tree = build_tree(&sample());
        let mut view = TreeView::new();
        view.expand("root");
        view.expand("docs");
        let visible = view.visible(&tree);
        let q1_index = visible.iter().position(|f| f.id == "q1").unwrap();
        assert!(matches!(
            reparent(&tree, &visible, q1_index, "docs"),
            Err(Error::InvalidDrop(_))
        ));
    }

    #[test]
    fn reparent_leaves_original_tree_untouched() {
        let tree = build_tree(&sample());
        let mut view = TreeView::new();
        view.expand("root");
        view.expand("docs");
        let visible = view.visible(&tree);
        let q1_index = visible.iter().position(|f| f.id == "q1").unwrap();
        let before = tree.clone();
        let _ = reparent(&tree, &visible, q1_index, "misc").unwrap();
        assert_eq!(tree, before);
    }

    #[test]
    fn reparent_unknown_dragged_id() {
        let tree = build_tree(&sample());
        let view = TreeView::new();
        let visible = view.visible(&tree);
        assert!(matches!(
            reparent(&tree, &visible, 0, "ghost"),
            Err(Error::NotFound(_))
        ));
    }
}
