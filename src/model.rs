//! Wire and persistence types shared by every component: the canonical
//! remote metadata record, a single change-feed event, and the document
//! that is persisted across restarts.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical remote metadata for one file or folder.
///
/// `parents` is an ordered set of ids: a file with more than one parent is
/// materialized at one local path per parent (see `MetadataCache::paths_of`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub md5_checksum: Option<String>,
    pub size: Option<u64>,
    pub modified_time: DateTime<Utc>,
    pub parents: Vec<String>,
    pub trashed: bool,
}

impl FileInfo {
    /// The literal "folder" substring in `mimeType` denotes a directory.
    pub fn is_folder(&self) -> bool {
        self.mime_type.contains("folder")
    }

    pub fn has_size(&self) -> bool {
        self.size.is_some()
    }
}

/// One event from the change feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    pub file_id: String,
    pub removed: bool,
    pub file: Option<FileInfo>,
}

/// `noChange(a, b)`: true iff name, parents (as a set) and modifiedTime are
/// unchanged. The `modifiedTime` comparison is deliberately asymmetric — a
/// strictly newer timestamp counts as a change, an equal or older one does
/// not. This is the guard against time-regressed updates from the feed.
pub fn no_change(a: &FileInfo, b: &FileInfo) -> bool {
    let a_parents: HashSet<&String> = a.parents.iter().collect();
    let b_parents: HashSet<&String> = b.parents.iter().collect();
    a.name == b.name && a_parents == b_parents && !(b.modified_time > a.modified_time)
}

/// One page of the changes feed, as returned by `changes.list`.
#[derive(Debug, Clone)]
pub struct ChangesPage {
    pub changes: Vec<Change>,
    pub next_page_token: Option<String>,
    pub new_start_page_token: Option<String>,
}

/// One page of a folder listing, as returned by `files.list`.
#[derive(Debug, Clone)]
pub struct FileListPage {
    pub files: Vec<FileInfo>,
    pub next_page_token: Option<String>,
}

/// The engine's persisted state document, keyed by `accountId` in the
/// external KV document store:
/// `{type:"sync", accountId, _id, rootId, changeToken, fileInfo, synced, changesToExecute?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    #[serde(rename = "type")]
    pub doc_type: String,
    pub account_id: String,
    #[serde(rename = "_id")]
    pub id: String,
    pub root_id: String,
    pub change_token: Option<String>,
    pub file_info: HashMap<String, FileInfo>,
    pub synced: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes_to_execute: Option<Vec<Change>>,
}

impl State {
    pub fn new(account_id: impl Into<String>, root_id: impl Into<String>) -> Self {
        let account_id = account_id.into();
        State {
            doc_type: "sync".to_string(),
            id: format!("sync:{account_id}"),
            account_id,
            root_id: root_id.into(),
            change_token: None,
            file_info: HashMap::new(),
            synced: false,
            changes_to_execute: None,
        }
    }
}
