use crate::events::{EventBus, UiEvent};
use notify::{Event, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keeps the filesystem watcher alive; dropping it stops the notifications.
pub struct MarkerWatcher {
    _watcher: notify::RecommendedWatcher,
}

/// Watch the broadcast marker and publish `CacheChangedExternally` when some
/// process rewrites the cache.
///
/// Bursts of filesystem events are debounced into a single notification.
/// Delivery is best-effort and unordered relative to the write itself; the
/// subscriber is expected to simply re-read the cache.
pub fn start_watching(marker: &Path, bus: Arc<EventBus>) -> notify::Result<MarkerWatcher> {
    let (tx, rx) = channel();
    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;

    // The marker may not exist yet; watch its directory and filter.
    let dir = marker
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    let marker = marker.to_path_buf();
    std::thread::spawn(move || {
        let debounce = Duration::from_millis(300);
        let mut dirty = false;
        let mut last_event = Instant::now();

        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(event) => {
                    if event.paths.iter().any(|p| p == &marker) {
                        dirty = true;
                        last_event = Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if dirty && last_event.elapsed() >= debounce {
                        dirty = false;
                        bus.publish(UiEvent::CacheChangedExternally);
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
    });

    Ok(MarkerWatcher { _watcher: watcher })
}
