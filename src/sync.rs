use crate::api::RemoteStore;
use crate::archive;
use crate::cache::LocalStore;
use crate::error::{Error, Result};
use crate::mutate::{self, now_millis};
use crate::node::{ChangeAction, Node, NodePatch, PendingChange};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::collections::HashSet;

/// Outcome of replaying the pending queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayReport {
    pub applied: usize,
    pub failed: usize,
}

/// Reconciles the local cache with the remote store.
///
/// Online reads replace the cache; offline writes patch the cache and queue a
/// pending change; going online replays the queue FIFO and then lets server
/// truth overwrite everything. The cache therefore always holds either the
/// last known server state or a speculative state whose reconciliation intent
/// sits in the queue.
pub struct SyncEngine<R: RemoteStore> {
    remote: R,
    store: LocalStore,
    online: bool,
}

impl<R: RemoteStore> SyncEngine<R> {
    pub fn new(remote: R, store: LocalStore, online: bool) -> Self {
        Self {
            remote,
            store,
            online,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Last-known list without touching the network.
    pub fn cached(&self) -> Vec<Node> {
        self.store.read_cache()
    }

    /// Flip connectivity. The offline→online transition is the reconnect
    /// event: it replays the queue and refreshes from server truth.
    pub async fn set_online(&mut self, online: bool) -> Result<Option<ReplayReport>> {
        let was_online = self.online;
        self.online = online;
        if online && !was_online {
            return Ok(Some(self.replay_pending().await?));
        }
        Ok(None)
    }

    /// Startup warm-up: serve the cache immediately, then refresh from the
    /// remote and rewrite only when the payload actually changed.
    pub async fn initialize(&self) -> Vec<Node> {
        let cached = self.store.read_cache();
        if self.online {
            match self.remote.fetch_all().await {
                Ok(fresh) => {
                    if fresh != cached {
                        if let Err(e) = self.store.write_cache(&fresh) {
                            tracing::warn!("failed to persist initial refresh: {e}");
                        }
                        return fresh;
                    }
                }
                Err(e) => tracing::debug!("initial refresh failed, using cache: {e}"),
            }
        }
        cached
    }

    /// Full node list. Online fetches overwrite the cache; a failed fetch
    /// falls back to the cache silently.
    pub async fn get_data_tree(&self) -> Result<Vec<Node>> {
        if !self.online {
            return Ok(self.store.read_cache());
        }
        match self.remote.fetch_all().await {
            Ok(data) => {
                self.store.write_cache(&data)?;
                Ok(data)
            }
            Err(e) => {
                tracing::debug!("fetch failed, serving cache: {e}");
                Ok(self.store.read_cache())
            }
        }
    }

    /// Direct children of a folder.
    pub async fn get_children(&self, folder_id: &str) -> Result<Vec<Node>> {
        if self.online {
            return self.remote.fetch_children(folder_id).await;
        }
        Ok(self
            .store
            .read_cache()
            .into_iter()
            .filter(|n| n.parent_id.as_deref() == Some(folder_id))
            .collect())
    }

    pub async fn create_folder(&self, name: &str, parent_id: Option<String>) -> Result<Node> {
        self.commit_create(mutate::new_folder(name, parent_id)).await
    }

    #[allow(dead_code)]
    pub async fn upload(
        &self,
        parent_id: &str,
        name: &str,
        bytes: &[u8],
        kind: Option<String>,
    ) -> Result<Node> {
        self.upload_node(
            parent_id,
            name,
            bytes.len() as u64,
            kind,
            Some(STANDARD.encode(bytes)),
        )
        .await
    }

    /// Upload with a pre-encoded payload and caller-supplied byte size.
    pub async fn upload_node(
        &self,
        parent_id: &str,
        name: &str,
        size_bytes: u64,
        kind: Option<String>,
        content: Option<String>,
    ) -> Result<Node> {
        let node = mutate::new_upload(name, parent_id, size_bytes, kind, content);
        self.commit_create(node).await
    }

    pub async fn rename(&self, id: &str, new_name: &str) -> Result<Node> {
        let nodes = self.store.read_cache();
        let (updated, patch) = mutate::rename(&nodes, id, new_name)?;
        self.commit_update(id, updated, patch).await
    }

    pub async fn move_node(&self, id: &str, dest_id: &str) -> Result<Node> {
        let nodes = self.store.read_cache();
        let (updated, patch) = mutate::move_to(&nodes, id, dest_id)?;
        self.commit_update(id, updated, patch).await
    }

    pub async fn add_tags(&self, id: &str, tags: Vec<String>) -> Result<Node> {
        let nodes = self.store.read_cache();
        let (updated, patch) = mutate::retag(&nodes, id, tags)?;
        self.commit_update(id, updated, patch).await
    }

    pub async fn revert(&self, id: &str) -> Result<Node> {
        let nodes = self.store.read_cache();
        let (updated, patch) = mutate::revert(&nodes, id)?;
        self.commit_update(id, updated, patch).await
    }

    pub async fn copy_node(&self, id: &str, dest_id: &str) -> Result<Node> {
        let nodes = self.store.read_cache();
        let copy = mutate::copy_of(&nodes, id, dest_id)?;
        self.commit_create(copy).await
    }

    /// Delete the targets and every transitive descendant in one batch.
    /// Returns the removed ids.
    pub async fn delete(&self, ids: &[String]) -> Result<Vec<String>> {
        let nodes = self.store.read_cache();
        let doomed = mutate::cascade_ids(&nodes, ids);
        let doomed_set: HashSet<String> = doomed.iter().cloned().collect();

        if self.online {
            for id in &doomed {
                self.remote.delete(id).await?;
            }
            self.store.write_cache(&mutate::without(&nodes, &doomed_set))?;
        } else {
            self.store.write_cache(&mutate::without(&nodes, &doomed_set))?;
            let timestamp = now_millis();
            for id in &doomed {
                self.store.enqueue(&PendingChange {
                    id: id.clone(),
                    action: ChangeAction::Delete,
                    timestamp,
                })?;
            }
        }
        Ok(doomed)
    }

    /// Compress a file into a sibling zip node. Online only: there is no
    /// queued fallback for this operation.
    pub async fn compress(&self, id: &str, archive_name: &str) -> Result<Node> {
        if !self.online {
            return Err(Error::Offline);
        }
        let mut nodes = self.store.read_cache();
        let source = mutate::find(&nodes, id)?;
        let archive = archive::compress_node(source, archive_name)?;
        let created = self.remote.create(&archive).await?;
        mutate::upsert(&mut nodes, created.clone());
        self.store.write_cache(&nodes)?;
        Ok(created)
    }

    /// Replay the pending queue in FIFO order. A failing entry stays queued
    /// and does not block the ones behind it. Afterwards one full fetch
    /// overwrites the cache with server truth.
    pub async fn replay_pending(&self) -> Result<ReplayReport> {
        let pending = self.store.list_pending()?;
        let mut report = ReplayReport::default();

        for (seq, change) in pending {
            let outcome = match &change.action {
                ChangeAction::Create(node) => self.remote.create(node).await.map(|_| ()),
                ChangeAction::Update(patch) => {
                    self.remote.update(&change.id, patch).await.map(|_| ())
                }
                ChangeAction::Delete => self.remote.delete(&change.id).await,
            };
            match outcome {
                Ok(()) => {
                    self.store.dequeue(seq)?;
                    report.applied += 1;
                }
                Err(e) => {
                    tracing::warn!(node = %change.id, "replay failed, keeping queued: {e}");
                    report.failed += 1;
                }
            }
        }

        match self.remote.fetch_all().await {
            Ok(fresh) => self.store.write_cache(&fresh)?,
            Err(e) => tracing::warn!("refresh after replay failed: {e}"),
        }
        Ok(report)
    }

    /// Online write path for freshly created nodes: server response wins.
    /// Offline: apply locally and queue the create.
    async fn commit_create(&self, node: Node) -> Result<Node> {
        if self.online {
            let created = self.remote.create(&node).await?;
            let mut nodes = self.store.read_cache();
            mutate::upsert(&mut nodes, created.clone());
            self.store.write_cache(&nodes)?;
            return Ok(created);
        }

        let mut nodes = self.store.read_cache();
        nodes.push(node.clone());
        self.store.write_cache(&nodes)?;
        self.store.enqueue(&PendingChange {
            id: node.id.clone(),
            action: ChangeAction::Create(node.clone()),
            timestamp: now_millis(),
        })?;
        Ok(node)
    }

    async fn commit_update(&self, id: &str, updated: Node, patch: NodePatch) -> Result<Node> {
        if self.online {
            let confirmed = self.remote.update(id, &patch).await?;
            let mut nodes = self.store.read_cache();
            mutate::upsert(&mut nodes, confirmed.clone());
            self.store.write_cache(&nodes)?;
            return Ok(confirmed);
        }

        let mut nodes = self.store.read_cache();
        mutate::upsert(&mut nodes, updated.clone());
        self.store.write_cache(&nodes)?;
        self.store.enqueue(&PendingChange {
            id: id.to_string(),
            action: ChangeAction::Update(patch),
            timestamp: now_millis(),
        })?;
        Ok(updated)
    }
}
