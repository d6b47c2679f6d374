//! In-memory mapping of file-id -> `FileInfo` and path -> file-id.
//!
//! `paths` is a pure function of `(fileInfo, rootId, localRoot)`; this
//! module owns that derivation and never performs I/O. It is only ever
//! touched from the reconciler's single execution context, so it needs no
//! locking of its own.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::model::FileInfo;

/// Recursion is bounded rather than cycle-detected: the remote service is
/// not expected to hand back a cyclic parent graph, but a resolver that
/// could loop forever on one is still a bug waiting to happen.
const MAX_PATH_DEPTH: usize = 64;

pub struct MetadataCache {
    local_root: PathBuf,
    root_id: String,
    file_info: HashMap<String, FileInfo>,
    paths: HashMap<PathBuf, String>,
}

impl MetadataCache {
    pub fn new(local_root: PathBuf, root_id: String) -> Self {
        MetadataCache {
            local_root,
            root_id,
            file_info: HashMap::new(),
            paths: HashMap::new(),
        }
    }

    /// Rebuild the cache from a loaded state document.
    pub fn from_file_info(
        local_root: PathBuf,
        root_id: String,
        file_info: HashMap<String, FileInfo>,
    ) -> Self {
        let mut cache = MetadataCache {
            local_root,
            root_id,
            file_info,
            paths: HashMap::new(),
        };
        cache.recompute_paths();
        cache
    }

    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// `getInfo(id)`. `forceRefresh` is the caller's cue to re-fetch via the
    /// remote client first; the cache itself only ever serves what it holds.
    pub fn get_info(&self, id: &str) -> Option<&FileInfo> {
        self.file_info.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.file_info.contains_key(id)
    }

    /// id -> its known local paths, recomputed fresh each call is avoided:
    /// `paths` is kept in sync by `store_info`/`remove_info`/`recompute_paths`.
    pub fn id_for_path(&self, path: &Path) -> Option<&str> {
        self.paths.get(path).map(|s| s.as_str())
    }

    pub fn all_paths(&self) -> impl Iterator<Item = (&PathBuf, &String)> {
        self.paths.iter()
    }

    /// `storeInfo(FileInfo)`: insert/replace and refresh the `paths` entries
    /// that resolve through it.
    pub fn store_info(&mut self, info: FileInfo) {
        let id = info.id.clone();
        self.file_info.insert(id, info);
        self.recompute_paths();
    }

    /// `removeInfo(id) -> removedPaths`: evict the id and delete every
    /// `paths` entry that resolved through it, returning those paths so the
    /// caller can delete them on disk.
    pub fn remove_info(&mut self, id: &str) -> Vec<PathBuf> {
        let removed_paths: Vec<PathBuf> = self
            .paths
            .iter()
            .filter(|(_, v)| v.as_str() == id)
            .map(|(k, _)| k.clone())
            .collect();
        self.file_info.remove(id);
        self.recompute_paths();
        removed_paths
    }

    /// `pathsOf(FileInfo) -> [path]`.
    pub fn paths_of(&self, info: &FileInfo) -> Vec<PathBuf> {
        self.paths_of_id(&info.id, 0)
    }

    pub fn paths_of_id(&self, id: &str, depth: usize) -> Vec<PathBuf> {
        if depth > MAX_PATH_DEPTH {
            return Vec::new();
        }
        if id == self.root_id {
            return vec![self.local_root.clone()];
        }
        let Some(info) = self.file_info.get(id) else {
            return Vec::new();
        };
        if info.parents.is_empty() {
            // Outside the tracked tree.
            return Vec::new();
        }
        let mut result = Vec::new();
        for parent in &info.parents {
            for parent_path in self.paths_of_id(parent, depth + 1) {
                result.push(parent_path.join(&info.name));
            }
        }
        result
    }

    /// `recomputePaths()`: rebuild the whole path -> id index from scratch.
    /// Cheap enough to call after every mutation given the scale this
    /// engine targets (a single account's worth of metadata in memory).
    pub fn recompute_paths(&mut self) {
        self.paths.clear();
        let ids: Vec<String> = self.file_info.keys().cloned().collect();
        for id in ids {
            let info = &self.file_info[&id];
            for path in self.paths_of(info) {
                self.paths.insert(path, id.clone());
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileInfo> {
        self.file_info.values()
    }

    pub fn snapshot(&self) -> HashMap<String, FileInfo> {
        self.file_info.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn folder(id: &str, name: &str, parents: &[&str]) -> FileInfo {
        FileInfo {
            id: id.into(),
            name: name.into(),
            mime_type: "application/vnd.google-apps.folder".into(),
            md5_checksum: None,
            size: None,
            modified_time: Utc::now(),
            parents: parents.iter().map(|s| s.to_string()).collect(),
            trashed: false,
        }
    }

    fn file(id: &str, name: &str, parents: &[&str]) -> FileInfo {
        FileInfo {
            mime_type: "text/plain".into(),
            size: Some(3),
            md5_checksum: Some("aaa".into()),
            ..folder(id, name, parents)
        }
    }

    #[test]
    fn single_parent_path() {
        let mut cache = MetadataCache::new(PathBuf::from("/root"), "root".into());
        cache.store_info(folder("A", "A", &["root"]));
        cache.store_info(file("x", "x.txt", &["A"]));
        let paths = cache.paths_of(cache.get_info("x").unwrap());
        assert_eq!(paths, vec![PathBuf::from("/root/A/x.txt")]);
        assert_eq!(cache.id_for_path(Path::new("/root/A/x.txt")), Some("x"));
    }

    #[test]
    fn multi_parent_file_materializes_at_every_path() {
        let mut cache = MetadataCache::new(PathBuf::from("/root"), "root".into());
        cache.store_info(folder("A", "A", &["root"]));
        cache.store_info(folder("B", "B", &["root"]));
        cache.store_info(file("z", "z", &["A", "B"]));
        let mut paths = cache.paths_of(cache.get_info("z").unwrap());
        paths.sort();
        assert_eq!(
            paths,
            vec![PathBuf::from("/root/A/z"), PathBuf::from("/root/B/z")]
        );
    }

    #[test]
    fn orphan_with_no_parents_resolves_to_no_paths() {
        let mut cache = MetadataCache::new(PathBuf::from("/root"), "root".into());
        cache.store_info(file("x", "x.txt", &[]));
        assert!(cache.paths_of(cache.get_info("x").unwrap()).is_empty());
    }

    #[test]
    fn remove_info_evicts_paths_and_returns_them() {
        let mut cache = MetadataCache::new(PathBuf::from("/root"), "root".into());
        cache.store_info(folder("A", "A", &["root"]));
        cache.store_info(file("x", "x.txt", &["A"]));
        let removed = cache.remove_info("x");
        assert_eq!(removed, vec![PathBuf::from("/root/A/x.txt")]);
        assert!(cache.get_info("x").is_none());
        assert!(cache.id_for_path(Path::new("/root/A/x.txt")).is_none());
    }

    #[test]
    fn cyclic_parent_graph_bounds_recursion_instead_of_looping() {
        let mut cache = MetadataCache::new(PathBuf::from("/root"), "root".into());
        // A cycle unreachable from root: it must never hang, and since it
        // never reaches root it should resolve to zero paths.
        cache.store_info(folder("A", "A", &["B"]));
        cache.store_info(folder("B", "B", &["A"]));
        let paths = cache.paths_of(cache.get_info("A").unwrap());
        assert!(paths.is_empty());
    }
}
