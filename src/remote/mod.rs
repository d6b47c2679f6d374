//! The remote side of the sync engine.
//!
//! `DriveApi` models the assumed external HTTP client: the eight raw
//! operations a cloud-drive REST surface is taken to already provide
//! (`files.list`, `files.get`, content download, `files.create`,
//! `files.update`, `files.delete`, `changes.getStartPageToken`,
//! `changes.list`). It is an out-of-scope collaborator — this crate ships
//! one concrete implementation of it (`http`) purely so the binary runs
//! end to end, and one in-memory test double (`mock`) used by every test
//! in this crate.
//!
//! `RemoteClient` wraps a `DriveApi` and adds exactly the retry and
//! pagination behavior this layer owns, nothing the transport itself is
//! responsible for.

pub mod http;
#[cfg(test)]
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::error::EngineError;
use crate::model::{ChangesPage, FileInfo, FileListPage};

/// Delay between pages of a structural (folder) walk.
pub const STRUCTURE_WALK_DELAY: Duration = Duration::from_millis(100);
/// Delay between pages of a `changes.list` walk.
pub const CHANGE_LIST_DELAY: Duration = Duration::from_millis(500);
/// `tryTwice`'s wait before the single retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// The assumed external HTTP client's primitives. An implementation may
/// fail with `EngineError::TransientRemote` for a connection-reset-class
/// fault (eligible for `tryTwice`'s single retry) or
/// `EngineError::PermanentRemote` for anything else (auth, not-found,
/// quota — never retried).
#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn files_list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, EngineError>;

    async fn files_get(&self, id: &str) -> Result<FileInfo, EngineError>;

    /// The underlying transport is assumed to stream; this contract only
    /// needs the fully-read bytes, the same shape the reference codebase's
    /// own `download_file` exposes over its HTTP client.
    async fn files_get_content(&self, id: &str) -> Result<Vec<u8>, EngineError>;

    /// `content` is `None` when creating a folder (`files.create` with no
    /// media body).
    async fn files_create(
        &self,
        parent_id: &str,
        name: &str,
        is_folder: bool,
        content: Option<Vec<u8>>,
    ) -> Result<FileInfo, EngineError>;

    async fn files_update(&self, id: &str, content: Vec<u8>) -> Result<FileInfo, EngineError>;

    async fn files_delete(&self, id: &str) -> Result<(), EngineError>;

    async fn changes_start_token(&self) -> Result<String, EngineError>;

    async fn changes_list(&self, page_token: &str) -> Result<ChangesPage, EngineError>;
}

/// Thin adapter over a `DriveApi`: `tryTwice` retry-once, pagination
/// draining, and the inter-page rate-limit delays this layer specifies.
pub struct RemoteClient {
    api: Box<dyn DriveApi>,
}

impl RemoteClient {
    pub fn new(api: Box<dyn DriveApi>) -> Self {
        RemoteClient { api }
    }

    /// Wait 2s and retry once on a transient fault; any other failure (or a
    /// second transient failure) propagates immediately.
    async fn try_twice<T, F, Fut>(op: F) -> Result<T, EngineError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, EngineError>>,
    {
        match op().await {
            Ok(v) => Ok(v),
            Err(EngineError::TransientRemote(msg)) => {
                sleep(RETRY_DELAY).await;
                op().await.map_err(|e| match e {
                    EngineError::TransientRemote(_) => EngineError::TransientRemote(msg),
                    other => other,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// List every file directly under `folder_id`, draining all pages.
    pub async fn list_folder(&self, folder_id: &str) -> Result<Vec<FileInfo>, EngineError> {
        let mut out = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page_token_ref = page_token.as_deref();
            let page = Self::try_twice(|| self.api.files_list(folder_id, page_token_ref)).await?;
            out.extend(page.files);
            match page.next_page_token {
                Some(tok) => {
                    page_token = Some(tok);
                    sleep(STRUCTURE_WALK_DELAY).await;
                }
                None => break,
            }
        }
        Ok(out)
    }

    pub async fn get_metadata(&self, id: &str) -> Result<FileInfo, EngineError> {
        Self::try_twice(|| self.api.files_get(id)).await
    }

    pub async fn get_content(&self, id: &str) -> Result<Vec<u8>, EngineError> {
        Self::try_twice(|| self.api.files_get_content(id)).await
    }

    pub async fn create_file(
        &self,
        parent_id: &str,
        name: &str,
        is_folder: bool,
        content: Option<Vec<u8>>,
    ) -> Result<FileInfo, EngineError> {
        Self::try_twice(|| {
            self.api
                .files_create(parent_id, name, is_folder, content.clone())
        })
        .await
    }

    pub async fn update_file(&self, id: &str, content: Vec<u8>) -> Result<FileInfo, EngineError> {
        Self::try_twice(|| self.api.files_update(id, content.clone())).await
    }

    pub async fn delete_file(&self, id: &str) -> Result<(), EngineError> {
        Self::try_twice(|| self.api.files_delete(id)).await
    }

    pub async fn changes_start_token(&self) -> Result<String, EngineError> {
        Self::try_twice(|| self.api.changes_start_token()).await
    }

    /// Drain every page of `changes.list` from `start_token`, returning the
    /// flattened change list plus the token to resume from next time.
    pub async fn changes_list(
        &self,
        start_token: &str,
    ) -> Result<(Vec<crate::model::Change>, Option<String>), EngineError> {
        let mut changes = Vec::new();
        let mut page_token = start_token.to_string();
        let mut new_token = None;
        loop {
            let page = Self::try_twice(|| self.api.changes_list(&page_token)).await?;
            changes.extend(page.changes);
            if let Some(tok) = page.new_start_page_token {
                new_token = Some(tok);
            }
            match page.next_page_token {
                Some(tok) => {
                    page_token = tok;
                    sleep(CHANGE_LIST_DELAY).await;
                }
                None => break,
            }
        }
        Ok((changes, new_token))
    }
}
