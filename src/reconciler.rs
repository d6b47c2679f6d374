//! Single writer over state, disk, and remote. Every method here assumes
//! it is the only thing touching the `MetadataCache` and the local root at
//! the time it runs — structural exclusivity is the engine's job
//! (`engine.rs`), not this module's.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::MetadataCache;
use crate::error::EngineError;
use crate::model::{no_change, Change, FileInfo};
use crate::remote::RemoteClient;
use crate::watcher::LocalWatcher;

/// `shouldIgnore(info) := info.id == rootId || (!isFolder(info) && !hasSize(info))`.
/// The root itself is never materialized as a child entry, and a non-folder
/// with no size is a native editor document with no downloadable content.
pub fn should_ignore(info: &FileInfo, root_id: &str) -> bool {
    info.id == root_id || (!info.is_folder() && !info.has_size())
}

pub struct Reconciler {
    cache: MetadataCache,
    remote: Arc<RemoteClient>,
    watcher: Arc<LocalWatcher>,
}

impl Reconciler {
    pub fn new(cache: MetadataCache, remote: Arc<RemoteClient>, watcher: Arc<LocalWatcher>) -> Self {
        Reconciler {
            cache,
            remote,
            watcher,
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut MetadataCache {
        &mut self.cache
    }

    // ---- entry point 1: apply-remote-change -----------------------------

    /// Returns whether this change produced any effect (cache, disk, or
    /// both) — used by the change loop to decide whether a save is due.
    pub async fn apply_remote_change(&mut self, change: Change) -> Result<bool, EngineError> {
        let trashed = change.file.as_ref().map(|f| f.trashed).unwrap_or(false);
        if change.removed || trashed {
            let removed_paths = self.cache.remove_info(&change.file_id);
            for path in &removed_paths {
                self.remove_path_from_disk(path).await?;
            }
            return Ok(!removed_paths.is_empty());
        }

        let new_info = change
            .file
            .ok_or_else(|| EngineError::Invariant("change is not removed but carries no file".into()))?;

        let Some(old_info) = self.cache.get_info(&change.file_id).cloned() else {
            self.cache.store_info(new_info.clone());
            self.download_if_needed(&new_info).await?;
            return Ok(true);
        };

        let old_paths = self.cache.paths_of(&old_info);
        self.cache.store_info(new_info.clone());
        let new_paths = self.cache.paths_of(&new_info);

        if no_change(&old_info, &new_info) {
            return Ok(false);
        }
        if old_paths.is_empty() && new_paths.is_empty() {
            // Lies outside the mirrored tree entirely.
            return Ok(false);
        }
        if old_info.md5_checksum != new_info.md5_checksum {
            for path in &old_paths {
                self.remove_path_from_disk(path).await?;
            }
            self.download_if_needed(&new_info).await?;
            return Ok(true);
        }
        if old_paths.is_empty() && !new_paths.is_empty() {
            self.download_if_needed(&new_info).await?;
            return Ok(true);
        }
        if should_ignore(&new_info, self.cache.root_id()) {
            return Ok(false);
        }
        if old_paths != new_paths {
            self.change_paths(&old_paths, &new_paths).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Download policy: skip ignorable ids; materialize folders at every
    /// path; download a file once and copy the bytes to any additional
    /// paths. Partial writes are removed on error so the watcher does not
    /// later re-upload them.
    async fn download_if_needed(&self, info: &FileInfo) -> Result<(), EngineError> {
        if should_ignore(info, self.cache.root_id()) {
            return Ok(());
        }
        let paths = self.cache.paths_of(info);
        if paths.is_empty() {
            return Ok(());
        }

        if info.is_folder() {
            for path in &paths {
                self.materialize_dir(path).await?;
            }
            return Ok(());
        }

        let content = self.remote.get_content(&info.id).await?;
        for path in &paths {
            if let Err(e) = self.write_file_ignored(path, &content).await {
                let _ = tokio::fs::remove_file(path).await;
                return Err(e);
            }
        }
        Ok(())
    }

    // ---- entry point 2: changePaths --------------------------------------

    /// `removed = old \ new`, `added = new \ old` (order-preserving). Pair
    /// them off as renames; extra removals delete, extra additions copy
    /// from `new[0]`. Every destination directory is created first and
    /// every touched path is ignore-marked before its operation.
    pub async fn change_paths(
        &self,
        old_paths: &[PathBuf],
        new_paths: &[PathBuf],
    ) -> Result<(), EngineError> {
        let old_set: HashSet<&PathBuf> = old_paths.iter().collect();
        let new_set: HashSet<&PathBuf> = new_paths.iter().collect();
        let removed: Vec<PathBuf> = old_paths
            .iter()
            .filter(|p| !new_set.contains(p))
            .cloned()
            .collect();
        let added: Vec<PathBuf> = new_paths
            .iter()
            .filter(|p| !old_set.contains(p))
            .cloned()
            .collect();

        let pairs = removed.len().min(added.len());
        for i in 0..pairs {
            let from = &removed[i];
            let to = &added[i];
            self.ensure_parent_dir(to).await?;
            self.watcher.ignore(from.clone());
            self.watcher.ignore(to.clone());
            tokio::fs::rename(from, to)
                .await
                .map_err(|e| EngineError::LocalFs {
                    path: to.display().to_string(),
                    source: e,
                })?;
            info!("moved {} -> {}", from.display(), to.display());
        }

        for extra in &removed[pairs..] {
            self.watcher.ignore(extra.clone());
            self.remove_path_from_disk(extra).await?;
        }

        if let Some(source) = new_paths.first() {
            for extra in &added[pairs..] {
                self.ensure_parent_dir(extra).await?;
                self.watcher.ignore(extra.clone());
                self.copy_path(source, extra).await?;
            }
        }

        Ok(())
    }

    // ---- entry point 3: add-local-file -----------------------------------

    pub async fn add_local_file(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.cache.id_for_path(path).is_some() {
            return self.update_local_file(path).await;
        }
        let parent_id = self.parent_id_for(path)?;
        let name = file_name_of(path)?;
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::LocalFs {
                path: path.display().to_string(),
                source: e,
            })?;
        let info = self
            .remote
            .create_file(&parent_id, &name, false, Some(data))
            .await?;
        info!("uploaded {}", path.display());
        self.cache.store_info(info);
        Ok(())
    }

    /// `path`'s parent, as a known remote id. The local root itself resolves
    /// to the root id directly since `MetadataCache` never indexes it as an
    /// ordinary path entry.
    fn parent_id_for(&self, path: &Path) -> Result<String, EngineError> {
        let parent_dir = path
            .parent()
            .ok_or_else(|| EngineError::Invariant(format!("{} has no parent", path.display())))?;
        if parent_dir == self.cache.local_root() {
            return Ok(self.cache.root_id().to_string());
        }
        self.cache
            .id_for_path(parent_dir)
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::Invariant(format!(
                    "parent path {} is not known to the cache",
                    parent_dir.display()
                ))
            })
    }

    /// The folder counterpart of `add_local_file`, for `addDir` watcher
    /// events.
    pub async fn add_local_dir(&mut self, path: &Path) -> Result<(), EngineError> {
        if self.cache.id_for_path(path).is_some() {
            return Ok(());
        }
        let parent_id = self.parent_id_for(path)?;
        let name = file_name_of(path)?;
        let info = self
            .remote
            .create_file(&parent_id, &name, true, None)
            .await?;
        info!("created remote folder for {}", path.display());
        self.cache.store_info(info);
        Ok(())
    }

    // ---- entry point 4: update-local-file ---------------------------------

    pub async fn update_local_file(&mut self, path: &Path) -> Result<(), EngineError> {
        let Some(id) = self.cache.id_for_path(path).map(|s| s.to_string()) else {
            warn!("update for unknown path {}, dropping", path.display());
            return Ok(());
        };
        let data = tokio::fs::read(path)
            .await
            .map_err(|e| EngineError::LocalFs {
                path: path.display().to_string(),
                source: e,
            })?;
        let new_hash = format!("{:x}", md5::compute(&data));
        if let Some(cached) = self.cache.get_info(&id) {
            if cached.md5_checksum.as_deref() == Some(new_hash.as_str()) {
                return Ok(());
            }
        }
        let updated = self.remote.update_file(&id, data.clone()).await?;
        self.cache.store_info(updated.clone());
        info!("uploaded change to {}", path.display());

        for alias in self.cache.paths_of(&updated) {
            if alias == path {
                continue;
            }
            self.write_file_ignored(&alias, &data).await?;
        }
        Ok(())
    }

    // ---- entry point 5: remove-local ---------------------------------------

    /// Also used for directory removal: local-fs guarantees recursive
    /// `unlinkDir` events arrive in child-first order, so by the time the
    /// directory's own event fires every child has already been reconciled.
    pub async fn remove_local(&mut self, path: &Path) -> Result<(), EngineError> {
        let Some(id) = self.cache.id_for_path(path).map(|s| s.to_string()) else {
            return Ok(());
        };
        let removed_paths = self.cache.remove_info(&id);
        for alias in &removed_paths {
            if alias == path {
                continue;
            }
            self.watcher.ignore(alias.clone());
            self.remove_path_from_disk(alias).await?;
        }
        self.remote.delete_file(&id).await?;
        info!("deleted remote {} ({})", path.display(), id);
        Ok(())
    }

    // ---- disk helpers -------------------------------------------------------

    async fn materialize_dir(&self, path: &Path) -> Result<(), EngineError> {
        self.watcher.ignore(path.to_path_buf());
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| EngineError::LocalFs {
                path: path.display().to_string(),
                source: e,
            })
    }

    async fn write_file_ignored(&self, path: &Path, content: &[u8]) -> Result<(), EngineError> {
        self.ensure_parent_dir(path).await?;
        self.watcher.ignore(path.to_path_buf());
        tokio::fs::write(path, content)
            .await
            .map_err(|e| EngineError::LocalFs {
                path: path.display().to_string(),
                source: e,
            })
    }

    async fn ensure_parent_dir(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::LocalFs {
                    path: parent.display().to_string(),
                    source: e,
                })?;
        }
        Ok(())
    }

    async fn remove_path_from_disk(&self, path: &Path) -> Result<(), EngineError> {
        self.watcher.ignore(path.to_path_buf());
        let meta = match tokio::fs::symlink_metadata(path).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(EngineError::LocalFs {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(EngineError::LocalFs {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn copy_path(&self, source: &Path, dest: &Path) -> Result<(), EngineError> {
        let meta = tokio::fs::metadata(source)
            .await
            .map_err(|e| EngineError::LocalFs {
                path: source.display().to_string(),
                source: e,
            })?;
        if meta.is_dir() {
            tokio::fs::create_dir_all(dest)
                .await
                .map_err(|e| EngineError::LocalFs {
                    path: dest.display().to_string(),
                    source: e,
                })
        } else {
            tokio::fs::copy(source, dest)
                .await
                .map(|_| ())
                .map_err(|e| EngineError::LocalFs {
                    path: dest.display().to_string(),
                    source: e,
                })
        }
    }
}

fn file_name_of(path: &Path) -> Result<String, EngineError> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| EngineError::Invariant(format!("{} has no file name", path.display())))
}
