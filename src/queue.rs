//! A strict FIFO over thunks.
//!
//! At most one thunk is in progress; thunks run in enqueue order; a
//! producer enqueuing a thunk never blocks on a later thunk's completion —
//! `enqueue` only has to push onto an unbounded channel. Local watcher
//! emissions and bootstrap-time operations both enqueue here; the change
//! loop applies remote changes without going through this queue (it holds
//! the reconciler mutex directly instead, see `engine.rs`).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Thunk = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<Thunk>,
    accepting: Arc<AtomicBool>,
}

impl WorkQueue {
    /// Spawns the single consumer task and returns the queue handle plus
    /// that task's `JoinHandle` (for shutdown to await drain completion).
    pub fn start() -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Thunk>();
        let handle = tokio::spawn(async move {
            while let Some(thunk) = rx.recv().await {
                thunk.await;
            }
        });
        (
            WorkQueue {
                tx,
                accepting: Arc::new(AtomicBool::new(true)),
            },
            handle,
        )
    }

    /// Enqueue a thunk. A no-op if the queue has been shut down.
    pub fn enqueue<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if !self.accepting.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(Box::pin(fut));
    }

    /// Stop accepting new thunks. Whatever is already enqueued still drains
    /// — the consumer task only stops once every sender (including clones)
    /// has been dropped, so callers should drop their `WorkQueue` handles
    /// after calling this to let the `JoinHandle` from `start` resolve.
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }
}
