use serde::{Deserialize, Serialize};

/// A single file or folder record.
///
/// The flat list of these is the canonical state everywhere: the remote store
/// serves it, the local cache mirrors it, and every tree or visible row is a
/// derived projection that gets thrown away and rebuilt on change. No tree
/// pointers are ever persisted; hierarchy lives in `parent_id` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    pub name: String,
    /// `None` means the node sits at the root.
    pub parent_id: Option<String>,
    pub is_folder: bool,
    /// Display date, assigned at creation/copy time.
    pub date: String,
    /// Kilobytes, two decimals. Files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    /// MIME-like type string. Files only.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Inline payload, base64 or plain text. Files only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Prior names, most recent first. Append-only except for revert.
    #[serde(default)]
    pub versions: Vec<Version>,
}

/// A prior name/timestamp pair. `versions[0]` is the name the node carried
/// immediately before its current one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub name: String,
    pub date: String,
}

/// Partial node for PATCH bodies and queued updates. Absent fields are left
/// untouched by the server and omitted from the wire body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub versions: Option<Vec<Version>>,
}

impl Node {
    /// Apply a patch in place, field by field.
    pub fn apply(&mut self, patch: &NodePatch) {
        if let Some(name) = &patch.name {
            self.name = name.clone();
        }
        if let Some(parent_id) = &patch.parent_id {
            self.parent_id = Some(parent_id.clone());
        }
        if let Some(tags) = &patch.tags {
            self.tags = tags.clone();
        }
        if let Some(versions) = &patch.versions {
            self.versions = versions.clone();
        }
    }
}

/// A mutation applied locally while offline, waiting to be replayed against
/// the remote store. Queue order is causal application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    /// Target node id.
    pub id: String,
    #[serde(flatten)]
    pub action: ChangeAction,
    /// Creation instant, unix milliseconds.
    pub timestamp: i64,
}

/// What a pending change does when replayed. Closed union: each variant
/// carries exactly the payload its replay call needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum ChangeAction {
    Create(Node),
    Update(NodePatch),
    Delete,
}
