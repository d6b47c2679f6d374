//! Wires the metadata cache, state store, remote client, local watcher,
//! work queue, reconciler, change loop, and bootstrap together. Owns
//! `start(notify)` and the shutdown signal.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::bootstrap;
use crate::cache::MetadataCache;
use crate::change_loop::{ChangeLoop, EngineState};
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::remote::RemoteClient;
use crate::state_store::StateStore;
use crate::watcher::{LocalWatcher, WatchEvent};

/// Google-Drive-style services reserve this id as an alias for the
/// authenticated user's root folder; it doubles as this engine's `rootId`
/// for an account that has never completed bootstrap.
pub const ROOT_ALIAS: &str = "root";

pub struct Engine {
    account_id: String,
    remote: Arc<RemoteClient>,
    store: Arc<dyn StateStore>,
    state: Arc<Mutex<EngineState>>,
    watcher: Arc<LocalWatcher>,
    watch_events: tokio::sync::mpsc::UnboundedReceiver<WatchEvent>,
    work_queue: WorkQueue,
    queue_handle: JoinHandle<()>,
    bootstrapping: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    poll_interval: Duration,
}

impl Engine {
    pub async fn new(
        account_id: String,
        local_root: PathBuf,
        remote: Arc<RemoteClient>,
        store: Arc<dyn StateStore>,
        poll_interval: Duration,
        debounce: Duration,
    ) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&local_root).await?;
        let loaded = store.load(&account_id).await?;

        let (cache, change_token, synced, changes_to_execute) = match loaded {
            Some(doc) => (
                MetadataCache::from_file_info(local_root.clone(), doc.root_id, doc.file_info),
                doc.change_token,
                doc.synced,
                doc.changes_to_execute,
            ),
            None => (
                MetadataCache::new(local_root.clone(), ROOT_ALIAS.to_string()),
                None,
                false,
                None,
            ),
        };

        let (watcher, watch_events) = LocalWatcher::start(&local_root, debounce)?;
        let watcher = Arc::new(watcher);
        let reconciler = Reconciler::new(cache, remote.clone(), watcher.clone());

        let state = Arc::new(Mutex::new(EngineState {
            reconciler,
            change_token,
            synced,
            changes_to_execute,
        }));

        let (work_queue, queue_handle) = WorkQueue::start();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Engine {
            account_id,
            remote,
            store,
            state,
            watcher,
            watch_events,
            work_queue,
            queue_handle,
            bootstrapping: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            poll_interval,
        })
    }

    /// Handle callers use to request shutdown (`shutdown_tx.send(true)`).
    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Runs bootstrap if needed, then the change loop and the local-event
    /// dispatch loop concurrently until a shutdown is requested.
    pub async fn start(mut self, notify: Arc<dyn Fn(&str) + Send + Sync>) -> anyhow::Result<()> {
        let needs_bootstrap = self.prepare_change_token().await?;

        // Local and remote watching must both be live before bootstrap's
        // listing begins, or changes that land mid-walk would be lost.
        self.watcher.mark_ready();
        (notify.as_ref())("Watching changes in the remote folder...");

        if needs_bootstrap {
            self.bootstrapping.store(true, Ordering::Release);
            self.run_bootstrap(notify.as_ref()).await?;
            self.bootstrapping.store(false, Ordering::Release);
        }

        let change_loop = ChangeLoop::new(
            self.account_id.clone(),
            self.remote.clone(),
            self.store.clone(),
            self.state.clone(),
            self.bootstrapping.clone(),
            self.shutdown_rx.clone(),
            self.poll_interval,
        );
        let change_loop_handle = tokio::spawn(change_loop.run());

        self.run_watch_dispatch().await;

        self.work_queue.stop_accepting();
        drop(self.work_queue);
        let _ = self.queue_handle.await;
        let _ = change_loop_handle.await;

        Self::persist(self.store.as_ref(), &self.account_id, &self.state).await?;
        Ok(())
    }

    async fn prepare_change_token(&self) -> anyhow::Result<bool> {
        let (needs_bootstrap, needs_token) = {
            let state = self.state.lock().await;
            (!state.synced, state.change_token.is_none())
        };
        if needs_token {
            let token = self.remote.changes_start_token().await?;
            let mut state = self.state.lock().await;
            state.change_token = Some(token);
        }
        Ok(needs_bootstrap)
    }

    async fn run_bootstrap(&self, notify: &(dyn Fn(&str) + Send + Sync)) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        bootstrap::run(&mut state.reconciler, &self.remote, notify).await?;
        state.synced = true;
        let doc = state.to_document(&self.account_id);
        drop(state);
        self.store.save(&self.account_id, &doc).await?;
        Ok(())
    }

    /// Takes individual fields rather than `&self` so it can still be
    /// called after `start` has partially moved other fields out of `self`
    /// during shutdown.
    async fn persist(
        store: &dyn StateStore,
        account_id: &str,
        state: &Mutex<EngineState>,
    ) -> anyhow::Result<()> {
        let guard = state.lock().await;
        let doc = guard.to_document(account_id);
        drop(guard);
        store.save(account_id, &doc).await?;
        Ok(())
    }

    async fn run_watch_dispatch(&mut self) {
        loop {
            tokio::select! {
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        return;
                    }
                }
                event = self.watch_events.recv() => {
                    match event {
                        Some(event) => self.dispatch_event(event),
                        None => return,
                    }
                }
            }
        }
    }

    fn dispatch_event(&self, event: WatchEvent) {
        let state = self.state.clone();
        self.work_queue.enqueue(async move {
            let mut state = state.lock().await;
            let result = match event {
                WatchEvent::Add(path) => state.reconciler.add_local_file(&path).await,
                WatchEvent::Change(path) => state.reconciler.update_local_file(&path).await,
                WatchEvent::Unlink(path) => state.reconciler.remove_local(&path).await,
                WatchEvent::AddDir(path) => state.reconciler.add_local_dir(&path).await,
                WatchEvent::UnlinkDir(path) => state.reconciler.remove_local(&path).await,
            };
            if let Err(e) = result {
                warn!("local event reconciliation failed: {}", e);
            }
        });
    }
}
