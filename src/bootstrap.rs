//! First-run full directory download.
//!
//! Precondition: the engine state is not yet `synced`. Walks every folder
//! reachable from the root breadth-first, feeding each listed entry through
//! the reconciler's ordinary new-id path (store + download), so bootstrap
//! shares its download/ignore policy with the steady-state change loop
//! instead of duplicating it.

use std::collections::VecDeque;

use crate::error::EngineError;
use crate::model::Change;
use crate::reconciler::{should_ignore, Reconciler};
use crate::remote::RemoteClient;

/// Emit a progress `notify` line after this many files have been processed.
const PROGRESS_BATCH: usize = 50;

pub struct BootstrapSummary {
    pub downloaded: usize,
    pub ignored: usize,
}

pub async fn run(
    reconciler: &mut Reconciler,
    remote: &RemoteClient,
    notify: &(dyn Fn(&str) + Send + Sync),
) -> Result<BootstrapSummary, EngineError> {
    notify("Getting files info...");

    let root_id = reconciler.cache().root_id().to_string();
    let mut downloaded = 0usize;
    let mut ignored = 0usize;
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(root_id.clone());

    while let Some(folder_id) = queue.pop_front() {
        let children = remote.list_folder(&folder_id).await?;
        for info in children {
            let is_folder = info.is_folder();
            let ignorable = should_ignore(&info, &root_id);
            if is_folder {
                queue.push_back(info.id.clone());
            } else if ignorable {
                ignored += 1;
            } else {
                downloaded += 1;
            }

            reconciler
                .apply_remote_change(Change {
                    file_id: info.id.clone(),
                    removed: false,
                    file: Some(info),
                })
                .await?;

            if !is_folder && (downloaded + ignored) % PROGRESS_BATCH == 0 {
                notify(&format!(
                    "{downloaded} files downloaded, {ignored} files ignored..."
                ));
            }
        }
    }

    notify(&format!(
        "All done! {downloaded} files downloaded and {ignored} ignored."
    ));
    Ok(BootstrapSummary { downloaded, ignored })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetadataCache;
    use crate::remote::mock::MockDriveApi;
    use crate::watcher::LocalWatcher;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[tokio::test]
    async fn walks_tree_downloads_files_and_skips_native_docs() {
        let dir = tempfile::tempdir().unwrap();
        let api = MockDriveApi::new();

        let folder_a = MockDriveApi::make_folder("A", "A", &["root"]);
        api.insert(folder_a);
        let file_x = MockDriveApi::make_file("x", "x.txt", &["A"]);
        api.insert(file_x);
        api.set_content("x", b"abc".to_vec());
        let mut doc = MockDriveApi::make_file("doc", "doc", &["A"]);
        doc.size = None;
        doc.md5_checksum = None;
        doc.mime_type = "application/vnd.google-apps.document".into();
        api.insert(doc);

        api.seed_folder_page("root", vec!["A"], None);
        api.seed_folder_page("A", vec!["x", "doc"], None);

        let remote = Arc::new(RemoteClient::new(Box::new(api)));
        let (watcher, _rx) = LocalWatcher::start(dir.path(), Duration::from_millis(50)).unwrap();
        let cache = MetadataCache::new(dir.path().to_path_buf(), "root".to_string());
        let mut reconciler = Reconciler::new(cache, remote.clone(), Arc::new(watcher));

        let messages = Arc::new(Mutex::new(Vec::new()));
        let messages2 = messages.clone();
        let notify = move |msg: &str| messages2.lock().unwrap().push(msg.to_string());

        let summary = run(&mut reconciler, &remote, &notify).await.unwrap();
        assert_eq!(summary.downloaded, 1);
        assert_eq!(summary.ignored, 1);

        assert!(dir.path().join("A/x.txt").exists());
        assert!(!dir.path().join("A/doc").exists());

        let last = messages.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last, "All done! 1 files downloaded and 1 ignored.");
    }
}
