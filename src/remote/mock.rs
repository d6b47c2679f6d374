//! In-memory `DriveApi` test double. Used by every test in this crate so
//! none of them touch the network.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::EngineError;
use crate::model::{Change, ChangesPage, FileInfo, FileListPage};
use crate::remote::DriveApi;

type PageKey = (String, Option<String>);

#[derive(Default)]
struct Inner {
    files: HashMap<String, FileInfo>,
    content: HashMap<String, Vec<u8>>,
    folder_pages: HashMap<PageKey, (Vec<String>, Option<String>)>,
    changes_pages: HashMap<String, (Vec<Change>, Option<String>, Option<String>)>,
    start_token: String,
    next_id: usize,
    transient_once: std::collections::HashSet<String>,
}

pub struct MockDriveApi {
    inner: Mutex<Inner>,
}

impl MockDriveApi {
    pub fn new() -> Self {
        let mut inner = Inner::default();
        inner.start_token = "token-0".to_string();
        MockDriveApi {
            inner: Mutex::new(inner),
        }
    }

    pub fn make_file(id: &str, name: &str, parents: &[&str]) -> FileInfo {
        FileInfo {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "text/plain".to_string(),
            md5_checksum: Some(format!("{:x}", md5::compute(id.as_bytes()))),
            size: Some(3),
            modified_time: Utc::now(),
            parents: parents.iter().map(|p| p.to_string()).collect(),
            trashed: false,
        }
    }

    pub fn make_folder(id: &str, name: &str, parents: &[&str]) -> FileInfo {
        FileInfo {
            mime_type: "application/vnd.google-apps.folder".to_string(),
            md5_checksum: None,
            size: None,
            ..Self::make_file(id, name, parents)
        }
    }

    /// Register a file/folder's metadata and, for convenience, its
    /// single-page listing under each of its parents.
    pub fn insert(&self, info: FileInfo) {
        let mut inner = self.inner.lock().unwrap();
        let id = info.id.clone();
        let parents = info.parents.clone();
        inner.files.insert(id.clone(), info);
        for parent in parents {
            let key = (parent, None);
            let entry = inner.folder_pages.entry(key).or_insert((Vec::new(), None));
            if !entry.0.contains(&id) {
                entry.0.push(id.clone());
            }
        }
    }

    pub fn set_content(&self, id: &str, data: Vec<u8>) {
        self.inner.lock().unwrap().content.insert(id.to_string(), data);
    }

    pub fn remove(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(id);
        inner.content.remove(id);
    }

    pub fn seed_folder_page(&self, folder_id: &str, ids: Vec<&str>, next_token: Option<&str>) {
        let mut inner = self.inner.lock().unwrap();
        inner.folder_pages.insert(
            (folder_id.to_string(), None),
            (
                ids.into_iter().map(|s| s.to_string()).collect(),
                next_token.map(|s| s.to_string()),
            ),
        );
    }

    pub fn seed_folder_page_token(
        &self,
        folder_id: &str,
        token: &str,
        ids: Vec<&str>,
        next_token: Option<&str>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.folder_pages.insert(
            (folder_id.to_string(), Some(token.to_string())),
            (
                ids.into_iter().map(|s| s.to_string()).collect(),
                next_token.map(|s| s.to_string()),
            ),
        );
        // Files referenced only from a seeded page (not via `insert`) still
        // need metadata; callers are expected to `insert` them separately.
        let _ = folder_id;
    }

    pub fn set_start_token(&self, token: &str) {
        self.inner.lock().unwrap().start_token = token.to_string();
    }

    pub fn push_changes_page(
        &self,
        page_token: &str,
        changes: Vec<Change>,
        next_page_token: Option<&str>,
        new_start_page_token: Option<&str>,
    ) {
        self.inner.lock().unwrap().changes_pages.insert(
            page_token.to_string(),
            (
                changes,
                next_page_token.map(|s| s.to_string()),
                new_start_page_token.map(|s| s.to_string()),
            ),
        );
    }

    /// Next `files_list`/`files_create`/`files_update` call against `id`
    /// fails with a transient error once (exercises `tryTwice`).
    pub fn fail_once_transient(&self, op_key: &str) {
        self.inner
            .lock()
            .unwrap()
            .transient_once
            .insert(op_key.to_string());
    }

    fn maybe_fail(&self, op_key: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.transient_once.remove(op_key) {
            return Err(EngineError::TransientRemote("connection reset".into()));
        }
        Ok(())
    }
}

impl Default for MockDriveApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DriveApi for MockDriveApi {
    async fn files_list(
        &self,
        folder_id: &str,
        page_token: Option<&str>,
    ) -> Result<FileListPage, EngineError> {
        self.maybe_fail(&format!("files_list:{folder_id}"))?;
        let inner = self.inner.lock().unwrap();
        let key = (folder_id.to_string(), page_token.map(|s| s.to_string()));
        let (ids, next) = inner.folder_pages.get(&key).cloned().unwrap_or_default();
        let files = ids
            .into_iter()
            .filter_map(|id| inner.files.get(&id).cloned())
            .collect();
        Ok(FileListPage {
            files,
            next_page_token: next,
        })
    }

    async fn files_get(&self, id: &str) -> Result<FileInfo, EngineError> {
        let inner = self.inner.lock().unwrap();
        inner
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::PermanentRemote(format!("no such file: {id}")))
    }

    async fn files_get_content(&self, id: &str) -> Result<Vec<u8>, EngineError> {
        let inner = self.inner.lock().unwrap();
        inner
            .content
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::PermanentRemote(format!("no content for: {id}")))
    }

    async fn files_create(
        &self,
        parent_id: &str,
        name: &str,
        is_folder: bool,
        content: Option<Vec<u8>>,
    ) -> Result<FileInfo, EngineError> {
        self.maybe_fail(&format!("files_create:{parent_id}/{name}"))?;
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("gen-{}", inner.next_id);
        let info = FileInfo {
            id: id.clone(),
            name: name.to_string(),
            mime_type: if is_folder {
                "application/vnd.google-apps.folder".to_string()
            } else {
                "text/plain".to_string()
            },
            md5_checksum: content.as_ref().map(|c| format!("{:x}", md5::compute(c))),
            size: content.as_ref().map(|c| c.len() as u64),
            modified_time: Utc::now(),
            parents: vec![parent_id.to_string()],
            trashed: false,
        };
        inner.files.insert(id.clone(), info.clone());
        if let Some(content) = content {
            inner.content.insert(id.clone(), content);
        }
        let key = (parent_id.to_string(), None);
        inner
            .folder_pages
            .entry(key)
            .or_insert((Vec::new(), None))
            .0
            .push(id);
        Ok(info)
    }

    async fn files_update(&self, id: &str, content: Vec<u8>) -> Result<FileInfo, EngineError> {
        self.maybe_fail(&format!("files_update:{id}"))?;
        let mut inner = self.inner.lock().unwrap();
        let info = inner
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::PermanentRemote(format!("no such file: {id}")))?;
        let updated = FileInfo {
            md5_checksum: Some(format!("{:x}", md5::compute(&content))),
            size: Some(content.len() as u64),
            modified_time: Utc::now(),
            ..info
        };
        inner.files.insert(id.to_string(), updated.clone());
        inner.content.insert(id.to_string(), content);
        Ok(updated)
    }

    async fn files_delete(&self, id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.files.remove(id);
        inner.content.remove(id);
        Ok(())
    }

    async fn changes_start_token(&self) -> Result<String, EngineError> {
        Ok(self.inner.lock().unwrap().start_token.clone())
    }

    async fn changes_list(&self, page_token: &str) -> Result<ChangesPage, EngineError> {
        let inner = self.inner.lock().unwrap();
        let (changes, next_page_token, new_start_page_token) = inner
            .changes_pages
            .get(page_token)
            .cloned()
            .unwrap_or((Vec::new(), None, Some(page_token.to_string())));
        Ok(ChangesPage {
            changes,
            next_page_token,
            new_start_page_token,
        })
    }
}
