use crate::error::{Error, Result};
use crate::mutate::now_millis;
use crate::node::{Node, PendingChange};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

const SNAPSHOT_KEY: &str = "nodes";

/// Durable local mirror of the node list plus the pending-change queue.
///
/// The snapshot is a full-replacement blob under a fixed key; pending changes
/// keep their insertion order through an autoincrement sequence. Every cache
/// write touches a marker file beside the database so other processes holding
/// the same data can notice and re-read.
pub struct LocalStore {
    conn: Mutex<Connection>,
    marker: Option<PathBuf>,
}

impl LocalStore {
    pub fn open_default() -> Result<Self> {
        let db_path = Self::db_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(&db_path)
    }

    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let marker = path.with_extension("marker");
        let store = Self {
            conn: Mutex::new(conn),
            marker: Some(marker),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn db_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no home directory")
        })?;
        Ok(home.join(".local/share/cabinet/cabinet.db"))
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::Lock)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshot (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pending_changes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                node_id TEXT NOT NULL,
                change TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Last-known node list, or empty when nothing is stored or the stored
    /// blob cannot be read back. Never fails the caller.
    pub fn read_cache(&self) -> Vec<Node> {
        let Ok(conn) = self.conn() else {
            return Vec::new();
        };
        let blob: Option<String> = conn
            .query_row(
                "SELECT value FROM snapshot WHERE key = ?",
                [SNAPSHOT_KEY],
                |row| row.get(0),
            )
            .ok();
        match blob {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("discarding unreadable cache snapshot: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        }
    }

    /// Full-snapshot replacement. Idempotent; touches the broadcast marker.
    pub fn write_cache(&self, nodes: &[Node]) -> Result<()> {
        let blob = serde_json::to_string(nodes)?;
        {
            let conn = self.conn()?;
            conn.execute(
                "INSERT OR REPLACE INTO snapshot (key, value) VALUES (?, ?)",
                (SNAPSHOT_KEY, &blob),
            )?;
        }
        self.touch_marker();
        Ok(())
    }

    pub fn enqueue(&self, change: &PendingChange) -> Result<()> {
        let payload = serde_json::to_string(change)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO pending_changes (node_id, change, created_at) VALUES (?, ?, ?)",
            (&change.id, &payload, change.timestamp),
        )?;
        Ok(())
    }

    /// Queued changes in insertion order, each with its queue sequence number.
    pub fn list_pending(&self) -> Result<Vec<(i64, PendingChange)>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT seq, change FROM pending_changes ORDER BY seq")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (seq, raw) = row?;
            match serde_json::from_str(&raw) {
                Ok(change) => out.push((seq, change)),
                Err(e) => tracing::warn!(seq, "dropping unreadable pending change: {e}"),
            }
        }
        Ok(out)
    }

    pub fn dequeue(&self, seq: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM pending_changes WHERE seq = ?", [seq])?;
        Ok(())
    }

    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_changes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Path of the marker file other processes watch, when backed by disk.
    pub fn marker_path(&self) -> Option<&Path> {
        self.marker.as_deref()
    }

    /// Unix-millisecond timestamp of the last broadcast, if any.
    pub fn last_broadcast(&self) -> Option<i64> {
        let path = self.marker.as_deref()?;
        std::fs::read_to_string(path).ok()?.trim().parse().ok()
    }

    fn touch_marker(&self) {
        if let Some(path) = &self.marker {
            if let Err(e) = std::fs::write(path, now_millis().to_string()) {
                tracing::warn!("failed to touch broadcast marker: {e}");
            }
        }
    }

    /// In-memory store without a marker file (for testing).
    #[cfg(test)]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
            marker: None,
        };
        store.init_schema()?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate::new_folder;
    use crate::node::ChangeAction;

    fn change(id: &str, ts: i64) -> PendingChange {
        PendingChange {
            id: id.to_string(),
            action: ChangeAction::Delete,
            timestamp: ts,
        }
    }

    #[test]
    fn empty_store_reads_empty_list() {
        let store = LocalStore::open_memory().unwrap();
        assert!(store.read_cache().is_empty());
    }

    #[test]
    fn snapshot_roundtrip() {
        let store = LocalStore::open_memory().unwrap();
        let nodes = vec![new_folder("Reports", None)];
        store.write_cache(&nodes).unwrap();
        assert_eq!(store.read_cache(), nodes);

        // Replacement, not accumulation
        let replacement = vec![new_folder("Other", None)];
        store.write_cache(&replacement).unwrap();
        assert_eq!(store.read_cache(), replacement);
    }

    #[test]
    fn corrupt_snapshot_degrades_to_empty() {
        let store = LocalStore::open_memory().unwrap();
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "INSERT OR REPLACE INTO snapshot (key, value) VALUES (?, ?)",
                (SNAPSHOT_KEY, "{not json"),
            )
            .unwrap();
        }
        assert!(store.read_cache().is_empty());
    }

    #[test]
    fn queue_preserves_insertion_order() {
        let store = LocalStore::open_memory().unwrap();
        store.enqueue(&change("a", 3)).unwrap();
        store.enqueue(&change("b", 1)).unwrap();
        store.enqueue(&change("c", 2)).unwrap();

        let pending = store.list_pending().unwrap();
        let ids: Vec<&str> = pending.iter().map(|(_, c)| c.id.as_str()).collect();
        // FIFO by insertion, not by timestamp
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn dequeue_removes_only_that_entry() {
        let store = LocalStore::open_memory().unwrap();
        store.enqueue(&change("a", 1)).unwrap();
        store.enqueue(&change("b", 2)).unwrap();
        let pending = store.list_pending().unwrap();
        store.dequeue(pending[0].0).unwrap();

        let rest = store.list_pending().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].1.id, "b");
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    #[test]
    fn on_disk_write_touches_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::open(&dir.path().join("cache.db")).unwrap();
        assert!(store.last_broadcast().is_none());

        store.write_cache(&[new_folder("Reports", None)]).unwrap();
        let first = store.last_broadcast().expect("marker should exist");
        assert!(first > 0);
    }
}
