//! Local filesystem watcher: per-path debounce, ignore-marker suppression,
//! and a readiness gate that drops events seen before the initial scan
//! completes.
//!
//! Built on `notify`, the same crate the reference codebase's own watcher
//! uses, but the debounce here is per-path rather than global: a burst of
//! events on one path must not swallow a genuine event on another.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::warn;

/// One collapsed, debounced filesystem event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Add(PathBuf),
    Change(PathBuf),
    Unlink(PathBuf),
    AddDir(PathBuf),
    UnlinkDir(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Add(p)
            | WatchEvent::Change(p)
            | WatchEvent::Unlink(p)
            | WatchEvent::AddDir(p)
            | WatchEvent::UnlinkDir(p) => p,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RawKind {
    Add,
    Change,
    Unlink,
    AddDir,
    UnlinkDir,
    /// Synthetic marker injected by `LocalWatcher::ignore` to suppress the
    /// next debounce-fire for this path.
    Ignore,
}

struct PendingPath {
    buffer: Vec<RawKind>,
    last_event: Instant,
}

/// Owns the live `notify` watcher and the debounce coordinator thread.
/// Dropping it stops watching.
pub struct LocalWatcher {
    _watcher: RecommendedWatcher,
    raw_tx: std_mpsc::Sender<(PathBuf, RawKind)>,
    ready: Arc<AtomicBool>,
}

impl LocalWatcher {
    /// Start watching `root` recursively. Returns the watcher handle and the
    /// channel of collapsed events; call `mark_ready` once the initial scan
    /// (bootstrap or a fresh load) has finished walking `root`.
    pub fn start(
        root: &Path,
        debounce: Duration,
    ) -> notify::Result<(Self, mpsc::UnboundedReceiver<WatchEvent>)> {
        let (raw_tx, raw_rx) = std_mpsc::channel::<(PathBuf, RawKind)>();
        let ready = Arc::new(AtomicBool::new(false));

        let notify_tx = raw_tx.clone();
        let notify_ready = ready.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if !notify_ready.load(Ordering::Acquire) {
                return;
            }
            let event = match res {
                Ok(e) => e,
                Err(e) => {
                    warn!("watcher error: {}", e);
                    return;
                }
            };
            for path in event.paths.clone() {
                if let Some(kind) = classify(&event.kind, &path) {
                    let _ = notify_tx.send((path, kind));
                }
            }
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || debounce_loop(raw_rx, out_tx, debounce));

        Ok((
            LocalWatcher {
                _watcher: watcher,
                raw_tx,
                ready,
            },
            out_rx,
        ))
    }

    /// The initial scan has completed; start delivering real events.
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Inject a synthetic ignore marker for `path`. Must be called
    /// immediately before the reconciler performs a disk write at `path` so
    /// the in-flight debounce window discards the self-induced events. The
    /// suppression is scoped to the next debounce-fire only.
    pub fn ignore(&self, path: PathBuf) {
        let _ = self.raw_tx.send((path, RawKind::Ignore));
    }
}

fn classify(kind: &EventKind, path: &Path) -> Option<RawKind> {
    use notify::event::{CreateKind, RemoveKind};
    Some(match kind {
        EventKind::Create(CreateKind::Folder) => RawKind::AddDir,
        EventKind::Create(_) => {
            if path.is_dir() {
                RawKind::AddDir
            } else {
                RawKind::Add
            }
        }
        EventKind::Modify(_) => RawKind::Change,
        EventKind::Remove(RemoveKind::Folder) => RawKind::UnlinkDir,
        EventKind::Remove(_) => RawKind::Unlink,
        _ => return None,
    })
}

/// Runs on a dedicated thread: collapses each path's buffered raw events
/// into at most one `WatchEvent` per 1-second quiescent window.
fn debounce_loop(
    raw_rx: std_mpsc::Receiver<(PathBuf, RawKind)>,
    out_tx: mpsc::UnboundedSender<WatchEvent>,
    debounce: Duration,
) {
    let mut pending: HashMap<PathBuf, PendingPath> = HashMap::new();

    loop {
        match raw_rx.recv_timeout(Duration::from_millis(50)) {
            Ok((path, kind)) => {
                let entry = pending.entry(path).or_insert_with(|| PendingPath {
                    buffer: Vec::new(),
                    last_event: Instant::now(),
                });
                entry.buffer.push(kind);
                entry.last_event = Instant::now();
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let fired: Vec<PathBuf> = pending
            .iter()
            .filter(|(_, p)| p.last_event.elapsed() >= debounce)
            .map(|(k, _)| k.clone())
            .collect();

        for path in fired {
            if let Some(p) = pending.remove(&path) {
                if let Some(event) = collapse(&path, &p.buffer) {
                    if out_tx.send(event).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

/// Collapse one path's buffered raw events: drop the path entirely if an
/// ignore marker is present; otherwise prefer the last
/// structural event, falling back to the last buffered event.
fn collapse(path: &Path, buffer: &[RawKind]) -> Option<WatchEvent> {
    if buffer.contains(&RawKind::Ignore) {
        return None;
    }
    let last_structural = buffer.iter().rev().find(|k| **k != RawKind::Change);
    let kind = last_structural.or_else(|| buffer.last())?;
    Some(match kind {
        RawKind::Add => WatchEvent::Add(path.to_path_buf()),
        RawKind::Change => WatchEvent::Change(path.to_path_buf()),
        RawKind::Unlink => WatchEvent::Unlink(path.to_path_buf()),
        RawKind::AddDir => WatchEvent::AddDir(path.to_path_buf()),
        RawKind::UnlinkDir => WatchEvent::UnlinkDir(path.to_path_buf()),
        RawKind::Ignore => unreachable!("filtered above"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_marker_drops_the_whole_path() {
        let buffer = vec![RawKind::Add, RawKind::Change, RawKind::Ignore];
        assert_eq!(collapse(Path::new("/a"), &buffer), None);
    }

    #[test]
    fn structural_event_wins_over_trailing_change() {
        let buffer = vec![RawKind::Change, RawKind::Unlink, RawKind::Change];
        assert_eq!(
            collapse(Path::new("/a"), &buffer),
            Some(WatchEvent::Unlink(PathBuf::from("/a")))
        );
    }

    #[test]
    fn plain_changes_collapse_to_last_change() {
        let buffer = vec![RawKind::Change, RawKind::Change];
        assert_eq!(
            collapse(Path::new("/a"), &buffer),
            Some(WatchEvent::Change(PathBuf::from("/a")))
        );
    }

    #[test]
    fn empty_buffer_collapses_to_nothing() {
        assert_eq!(collapse(Path::new("/a"), &[]), None);
    }

    #[tokio::test]
    async fn events_before_ready_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, mut rx) = LocalWatcher::start(dir.path(), Duration::from_millis(100)).unwrap();
        // Not marked ready yet: this write must produce no event.
        std::fs::write(dir.path().join("early.txt"), b"x").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        watcher.mark_ready();
        std::fs::write(dir.path().join("late.txt"), b"y").unwrap();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event within timeout")
            .expect("channel open");
        assert_eq!(event.path(), dir.path().join("late.txt"));
    }
}
