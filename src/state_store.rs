//! Contract for the external persistent document store, plus one reference
//! implementation so the binary runs without a real KV document store
//! wired in.
//!
//! Save frequency is *not* this module's concern — the Engine decides when
//! to call `save` (after every applied change, at least every 30s while
//! changes are pending, and after bootstrap). This module only guarantees
//! that one `save` call is atomic.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::State;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, account_id: &str) -> Result<Option<State>, EngineError>;
    async fn save(&self, account_id: &str, state: &State) -> Result<(), EngineError>;
}

/// Reference `StateStore`: one JSON document per account, written with a
/// temp-file-then-rename so a crash mid-write can never leave a torn
/// document on disk.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStateStore { dir: dir.into() }
    }

    fn doc_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(format!("{account_id}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, account_id: &str) -> Result<Option<State>, EngineError> {
        let path = self.doc_path(account_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| EngineError::StateStoreIo(e.to_string()))?;
        let state: State = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::StateStoreIo(e.to_string()))?;
        Ok(Some(state))
    }

    async fn save(&self, account_id: &str, state: &State) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| EngineError::StateStoreIo(e.to_string()))?;
        let path = self.doc_path(account_id);
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| EngineError::StateStoreIo(e.to_string()))?;

        let dir = self.dir.clone();
        let final_path = path.clone();
        tokio::task::spawn_blocking(move || atomic_write(&dir, &final_path, &json))
            .await
            .map_err(|e| EngineError::StateStoreIo(e.to_string()))?
            .map_err(|e| EngineError::StateStoreIo(e.to_string()))
    }
}

fn atomic_write(dir: &Path, final_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(final_path)
        .map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_is_atomic_and_identical() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut state = State::new("acct-1", "root-id");
        state.change_token = Some("tok-1".into());
        state.synced = true;

        store.save("acct-1", &state).await.unwrap();
        let loaded = store.load("acct-1").await.unwrap().unwrap();

        assert_eq!(loaded.change_token, state.change_token);
        assert_eq!(loaded.root_id, state.root_id);
        assert_eq!(loaded.synced, state.synced);
    }

    #[tokio::test]
    async fn missing_account_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        assert!(store.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overwrite_replaces_whole_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());

        let mut state = State::new("acct-1", "root-id");
        state.change_token = Some("tok-1".into());
        store.save("acct-1", &state).await.unwrap();

        state.change_token = Some("tok-2".into());
        store.save("acct-1", &state).await.unwrap();

        let loaded = store.load("acct-1").await.unwrap().unwrap();
        assert_eq!(loaded.change_token, Some("tok-2".into()));
    }
}
