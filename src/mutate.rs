use crate::error::{Error, Result};
use crate::node::{Node, NodePatch, Version};
use std::collections::HashSet;

/// Display date for newly minted nodes.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// ISO-8601 timestamp for version history entries.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Byte count to kilobytes, rounded to two decimals.
pub fn round_kb(bytes: u64) -> f64 {
    (bytes as f64 / 1024.0 * 100.0).round() / 100.0
}

pub fn find<'a>(nodes: &'a [Node], id: &str) -> Result<&'a Node> {
    nodes
        .iter()
        .find(|n| n.id == id)
        .ok_or_else(|| Error::NotFound(id.to_string()))
}

/// Replace the node with the same id, or append if it is new.
pub fn upsert(nodes: &mut Vec<Node>, node: Node) {
    match nodes.iter_mut().find(|n| n.id == node.id) {
        Some(slot) => *slot = node,
        None => nodes.push(node),
    }
}

/// A fresh folder node under `parent_id` (`None` = root).
pub fn new_folder(name: &str, parent_id: Option<String>) -> Node {
    Node {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        parent_id,
        is_folder: true,
        date: today(),
        size: None,
        kind: None,
        content: None,
        tags: vec![],
        versions: vec![],
    }
}

/// A fresh file node from an uploaded payload. Size is stored in kilobytes
/// with two decimals; the type falls back to a guess from the file name.
pub fn new_upload(
    name: &str,
    parent_id: &str,
    size_bytes: u64,
    kind: Option<String>,
    content: Option<String>,
) -> Node {
    let kind = kind.or_else(|| mime_guess::from_path(name).first().map(|m| m.to_string()));
    Node {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        parent_id: Some(parent_id.to_string()),
        is_folder: false,
        date: today(),
        size: Some(round_kb(size_bytes)),
        kind,
        content,
        tags: vec![],
        versions: vec![],
    }
}

/// Rename a node, prepending the old name to its version history.
pub fn rename(nodes: &[Node], id: &str, new_name: &str) -> Result<(Node, NodePatch)> {
    let node = find(nodes, id)?;
    let mut versions = Vec::with_capacity(node.versions.len() + 1);
    versions.push(Version {
        name: node.name.clone(),
        date: now_iso(),
    });
    versions.extend(node.versions.iter().cloned());

    let patch = NodePatch {
        name: Some(new_name.to_string()),
        versions: Some(versions),
        ..Default::default()
    };
    let mut updated = node.clone();
    updated.apply(&patch);
    Ok((updated, patch))
}

/// Reassign a node's parent.
pub fn move_to(nodes: &[Node], id: &str, new_parent_id: &str) -> Result<(Node, NodePatch)> {
    let node = find(nodes, id)?;
    let patch = NodePatch {
        parent_id: Some(new_parent_id.to_string()),
        ..Default::default()
    };
    let mut updated = node.clone();
    updated.apply(&patch);
    Ok((updated, patch))
}

/// Replace a node's tag set wholesale.
pub fn retag(nodes: &[Node], id: &str, tags: Vec<String>) -> Result<(Node, NodePatch)> {
    let node = find(nodes, id)?;
    let patch = NodePatch {
        tags: Some(tags),
        ..Default::default()
    };
    let mut updated = node.clone();
    updated.apply(&patch);
    Ok((updated, patch))
}

/// Pop the most recent version back into `name`. Fails when there is nothing
/// to revert to.
pub fn revert(nodes: &[Node], id: &str) -> Result<(Node, NodePatch)> {
    let node = find(nodes, id)?;
    let Some((last, older)) = node.versions.split_first() else {
        return Err(Error::NotFound(format!("no versions recorded for {id}")));
    };
    let patch = NodePatch {
        name: Some(last.name.clone()),
        versions: Some(older.to_vec()),
        ..Default::default()
    };
    let mut updated = node.clone();
    updated.apply(&patch);
    Ok((updated, patch))
}

/// Duplicate a node under a new parent: same fields, new id, new date.
pub fn copy_of(nodes: &[Node], id: &str, new_parent_id: &str) -> Result<Node> {
    let source = find(nodes, id)?;
    let mut copy = source.clone();
    copy.id = uuid::Uuid::new_v4().to_string();
    copy.parent_id = Some(new_parent_id.to_string());
    copy.date = today();
    Ok(copy)
}

/// The targets plus every transitive descendant, each id once, targets before
/// their descendants.
pub fn cascade_ids(nodes: &[Node], targets: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    fn descend(nodes: &[Node], parent: &str, out: &mut Vec<String>, seen: &mut HashSet<String>) {
        for child in nodes.iter().filter(|n| n.parent_id.as_deref() == Some(parent)) {
            if seen.insert(child.id.clone()) {
                out.push(child.id.clone());
                descend(nodes, &child.id, out, seen);
            }
        }
    }

    for target in targets {
        if seen.insert(target.clone()) {
            out.push(target.clone());
        }
        descend(nodes, target, &mut out, &mut seen);
    }
    out
}

/// The list with every id in `ids` removed.
pub fn without(nodes: &[Node], ids: &HashSet<String>) -> Vec<Node> {
    nodes.iter().filter(|n| !ids.contains(&n.id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, parent: Option<&str>) -> Node {
        let mut n = new_folder(id, parent.map(|p| p.to_string()));
        n.id = id.to_string();
        n.name = format!("{id}-name");
        n
    }

    fn file(id: &str, parent: &str) -> Node {
        let mut n = new_upload(&format!("{id}.txt"), parent, 2048, None, None);
        n.id = id.to_string();
        n
    }

    #[test]
    fn upload_size_is_kilobytes_two_decimals() {
        let n = new_upload("photo.png", "f1", 3333, None, None);
        assert_eq!(n.size, Some(3.25));
        assert_eq!(n.kind.as_deref(), Some("image/png"));
        assert!(!n.is_folder);
    }

    #[test]
    fn round_kb_rounds_half_up() {
        assert_eq!(round_kb(1024), 1.0);
        assert_eq!(round_kb(1536), 1.5);
        assert_eq!(round_kb(5), 0.0);
    }

    #[test]
    fn rename_prepends_version() {
        let nodes = vec![file("f1", "root")];
        let (updated, patch) = rename(&nodes, "f1", "new.txt").unwrap();
        assert_eq!(updated.name, "new.txt");
        assert_eq!(updated.versions[0].name, "f1.txt");
        assert_eq!(patch.name.as_deref(), Some("new.txt"));
    }

    #[test]
    fn rename_stacks_history_most_recent_first() {
        let mut nodes = vec![file("f1", "root")];
        let (updated, _) = rename(&nodes, "f1", "second.txt").unwrap();
        nodes[0] = updated;
        let (updated, _) = rename(&nodes, "f1", "third.txt").unwrap();
        assert_eq!(updated.name, "third.txt");
        assert_eq!(updated.versions[0].name, "second.txt");
        assert_eq!(updated.versions[1].name, "f1.txt");
    }

    #[test]
    fn rename_unknown_id_is_not_found() {
        let nodes = vec![file("f1", "root")];
        assert!(matches!(
            rename(&nodes, "ghost", "x"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn revert_consumes_one_version_per_call() {
        let mut nodes = vec![file("f1", "root")];
        for name in ["b.txt", "c.txt", "d.txt"] {
            let (updated, _) = rename(&nodes, "f1", name).unwrap();
            nodes[0] = updated;
        }
        assert_eq!(nodes[0].versions.len(), 3);

        // Revert exactly versions.len() times, then fail
        for expected in ["c.txt", "b.txt", "f1.txt"] {
            let before = nodes[0].versions.len();
            let (updated, _) = revert(&nodes, "f1").unwrap();
            assert_eq!(updated.name, expected);
            assert_eq!(updated.versions.len(), before - 1);
            nodes[0] = updated;
        }
        assert!(matches!(revert(&nodes, "f1"), Err(Error::NotFound(_))));
    }

    #[test]
    fn move_patch_only_touches_parent() {
        let nodes = vec![folder("a", None), file("f1", "a")];
        let (updated, patch) = move_to(&nodes, "f1", "b").unwrap();
        assert_eq!(updated.parent_id.as_deref(), Some("b"));
        assert!(patch.name.is_none());
        assert!(patch.versions.is_none());
    }

    #[test]
    fn copy_gets_new_identity() {
        let nodes = vec![file("f1", "a")];
        let copy = copy_of(&nodes, "f1", "b").unwrap();
        assert_ne!(copy.id, "f1");
        assert_eq!(copy.parent_id.as_deref(), Some("b"));
        assert_eq!(copy.name, nodes[0].name);
        assert_eq!(copy.size, nodes[0].size);
    }

    #[test]
    fn cascade_collects_transitive_descendants() {
        let nodes = vec![
            folder("a", None),
            folder("b", Some("a")),
            file("f1", "b"),
            file("f2", "a"),
            folder("other", None),
        ];
        let ids = cascade_ids(&nodes, &["a".to_string()]);
        assert_eq!(ids.len(), 4);
        assert!(ids.contains(&"f1".to_string()));
        assert!(!ids.contains(&"other".to_string()));
        // Target comes first
        assert_eq!(ids[0], "a");
    }

    #[test]
    fn cascade_removal_leaves_no_dangling_parent() {
        let nodes = vec![
            folder("a", None),
            folder("b", Some("a")),
            file("f1", "b"),
            folder("keep", None),
            file("f2", "keep"),
        ];
        let ids: HashSet<String> = cascade_ids(&nodes, &["a".to_string()]).into_iter().collect();
        let remaining = without(&nodes, &ids);
        assert_eq!(remaining.len(), 2);
        for node in &remaining {
            if let Some(parent) = &node.parent_id {
                assert!(!ids.contains(parent), "{} still references deleted {parent}", node.id);
            }
        }
    }

    #[test]
    fn cascade_dedupes_overlapping_targets() {
        let nodes = vec![folder("a", None), folder("b", Some("a")), file("f1", "b")];
        let ids = cascade_ids(&nodes, &["a".to_string(), "b".to_string()]);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn upsert_replaces_in_place() {
        let mut nodes = vec![file("f1", "a"), file("f2", "a")];
        let mut changed = nodes[0].clone();
        changed.name = "other.txt".to_string();
        upsert(&mut nodes, changed);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name, "other.txt");
    }
}
