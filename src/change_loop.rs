//! Timer-driven consumer of the change feed.
//!
//! Runs only while `synced && !bootstrapping`. Each cycle buffers the fetched
//! batch into `changes_to_execute` and persists it *before* applying anything,
//! so a crash mid-batch leaves the remainder recorded for the next run
//! instead of silently dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{error, info};

use crate::error::EngineError;
use crate::reconciler::Reconciler;
use crate::remote::RemoteClient;
use crate::state_store::StateStore;

/// Everything a save needs to persist, held behind one mutex so the
/// reconciler, the change token, and the pending-batch buffer can never be
/// observed out of sync with each other.
pub struct EngineState {
    pub reconciler: Reconciler,
    pub change_token: Option<String>,
    pub synced: bool,
    pub changes_to_execute: Option<Vec<crate::model::Change>>,
}

impl EngineState {
    pub fn to_document(&self, account_id: &str) -> crate::model::State {
        let mut doc = crate::model::State::new(account_id, self.reconciler.cache().root_id());
        doc.change_token = self.change_token.clone();
        doc.file_info = self.reconciler.cache().snapshot();
        doc.synced = self.synced;
        doc.changes_to_execute = self.changes_to_execute.clone();
        doc
    }
}

pub struct ChangeLoop {
    account_id: String,
    remote: Arc<RemoteClient>,
    store: Arc<dyn StateStore>,
    state: Arc<Mutex<EngineState>>,
    bootstrapping: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
}

impl ChangeLoop {
    pub fn new(
        account_id: String,
        remote: Arc<RemoteClient>,
        store: Arc<dyn StateStore>,
        state: Arc<Mutex<EngineState>>,
        bootstrapping: Arc<AtomicBool>,
        shutdown: watch::Receiver<bool>,
        poll_interval: Duration,
    ) -> Self {
        ChangeLoop {
            account_id,
            remote,
            store,
            state,
            bootstrapping,
            shutdown,
            poll_interval,
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }
            if self.bootstrapping.load(Ordering::Acquire) || !self.is_synced().await {
                if self.sleep_or_shutdown().await {
                    return;
                }
                continue;
            }

            if let Err(e) = self.run_cycle().await {
                error!("change loop cycle failed: {}", e);
                if e.is_fatal() {
                    return;
                }
            }

            if self.sleep_or_shutdown().await {
                return;
            }
        }
    }

    async fn is_synced(&self) -> bool {
        self.state.lock().await.synced
    }

    /// Sleeps `poll_interval` unless shutdown fires first. Returns whether
    /// the loop should stop.
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => false,
            result = self.shutdown.changed() => result.is_err() || *self.shutdown.borrow(),
        }
    }

    async fn run_cycle(&mut self) -> Result<(), EngineError> {
        let pending = {
            let mut state = self.state.lock().await;
            state.changes_to_execute.take()
        };

        let batch = match pending {
            Some(batch) if !batch.is_empty() => batch,
            _ => self.fetch_next_batch().await?,
        };

        self.apply_batch(batch).await
    }

    async fn fetch_next_batch(&mut self) -> Result<Vec<crate::model::Change>, EngineError> {
        let start_token = {
            let state = self.state.lock().await;
            state
                .change_token
                .clone()
                .ok_or_else(|| EngineError::Invariant("change loop running with no change token".into()))?
        };

        let (changes, new_token) = self.remote.changes_list(&start_token).await?;

        let mut state = self.state.lock().await;
        state.changes_to_execute = Some(changes.clone());
        if let Some(tok) = new_token {
            state.change_token = Some(tok);
        }
        let doc = state.to_document(&self.account_id);
        drop(state);
        self.store.save(&self.account_id, &doc).await?;

        Ok(changes)
    }

    async fn apply_batch(&mut self, mut batch: Vec<crate::model::Change>) -> Result<(), EngineError> {
        while !batch.is_empty() {
            if *self.shutdown.borrow() {
                let mut state = self.state.lock().await;
                state.changes_to_execute = Some(batch);
                let doc = state.to_document(&self.account_id);
                drop(state);
                self.store.save(&self.account_id, &doc).await?;
                return Ok(());
            }

            let change = batch.remove(0);
            let file_id = change.file_id.clone();
            let mut state = self.state.lock().await;
            let result = state.reconciler.apply_remote_change(change).await;
            state.changes_to_execute = Some(batch.clone());

            match result {
                Ok(effect) => {
                    if effect {
                        info!("applied remote change for {}", file_id);
                        let doc = state.to_document(&self.account_id);
                        drop(state);
                        self.store.save(&self.account_id, &doc).await?;
                    }
                }
                // A local filesystem error costs only this one change's
                // effect; the token still advances and the rest of the
                // batch is not blocked behind it.
                Err(EngineError::LocalFs { path, source }) => {
                    error!(
                        "dropping remote change for {} after local filesystem error at {}: {}",
                        file_id, path, source
                    );
                    let doc = state.to_document(&self.account_id);
                    drop(state);
                    self.store.save(&self.account_id, &doc).await?;
                }
                Err(e) => return Err(e),
            }
        }

        let mut state = self.state.lock().await;
        state.changes_to_execute = None;
        let doc = state.to_document(&self.account_id);
        drop(state);
        self.store.save(&self.account_id, &doc).await
    }
}
