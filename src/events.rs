use crate::node::Node;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

/// A user-initiated mutation request. Closed union keyed by action name;
/// each variant carries only the fields that action needs.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionRequest {
    Create {
        name: String,
        parent_id: Option<String>,
    },
    Rename {
        id: String,
        new_name: String,
    },
    Delete {
        ids: Vec<String>,
    },
    Upload {
        parent_id: String,
        name: String,
        size_bytes: u64,
        kind: Option<String>,
        content: Option<String>,
    },
    Move {
        id: String,
        dest_id: String,
    },
    Copy {
        id: String,
        dest_id: String,
    },
    Tags {
        id: String,
        tags: Vec<String>,
    },
    Compress {
        id: String,
        archive_name: String,
    },
    Revert {
        id: String,
    },
}

/// Events carried between the view layer and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A folder row was selected; carries the folder id.
    FolderSelected(String),
    /// An action was triggered against a node (or set of nodes).
    Action(ActionRequest),
    /// A breadcrumb was clicked; carries the node to navigate to.
    BreadcrumbClick(Node),
    /// The cache was rewritten by some process; observers should re-read.
    CacheChangedExternally,
}

/// Fan-out pub/sub channel. Each subscriber gets its own queue; delivery is
/// at-least-once per subscriber, with no ordering guarantee across
/// independent subscribers. Disconnected subscribers are pruned on publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<UiEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<UiEvent> {
        let (tx, rx) = channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(tx);
        }
        rx
    }

    pub fn publish(&self, event: UiEvent) {
        let Ok(mut subs) = self.subscribers.lock() else {
            return;
        };
        subs.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
