//! Filesystem watcher feeding the reload coordinator.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::coordinator::Trigger;
use crate::error::Result;

/// Watches extension directories and forwards change bursts as
/// [`Trigger::FsEvent`]. Dropping it stops watching.
pub struct ExtensionWatcher {
    _watcher: RecommendedWatcher,
    paths: Vec<PathBuf>,
}

impl ExtensionWatcher {
    /// Watch every existing directory in `paths` recursively.
    pub fn start(paths: &[PathBuf], tx: mpsc::Sender<Trigger>) -> Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_relevant(&event) => {
                // A full channel means a cycle is already queued.
                if tx.try_send(Trigger::FsEvent(event.paths)).is_err() {
                    debug!(category = "extensions", "Trigger channel full, change folded into pending cycle");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(category = "extensions", error = %e, "File watcher error"),
        })?;

        let mut watched = Vec::new();
        for path in paths {
            if !path.is_dir() {
                warn!(category = "extensions", path = %path.display(), "Extension directory missing, not watched");
                continue;
            }
            watcher.watch(path, RecursiveMode::Recursive)?;
            watched.push(path.clone());
        }

        info!(category = "extensions", directories = watched.len(), "Watching extension directories");
        Ok(Self {
            _watcher: watcher,
            paths: watched,
        })
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

fn is_relevant(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) && event.paths.iter().any(|p| !is_ignored(p))
}

/// Editor swap files, dotfiles and VCS internals.
fn is_ignored(path: &Path) -> bool {
    let in_vcs = path.components().any(|c| c.as_os_str() == ".git");
    let scratch = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || n.ends_with('~') || n.ends_with(".swp"));
    in_vcs || scratch
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};
    use std::time::Duration;
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> Event {
        Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_relevant_events() {
        assert!(is_relevant(&event(EventKind::Create(CreateKind::File), "/ext/panels/a/index.js")));
        assert!(!is_relevant(&event(EventKind::Access(AccessKind::Any), "/ext/panels/a/index.js")));
        assert!(!is_relevant(&event(EventKind::Create(CreateKind::File), "/ext/.git/index")));
        assert!(!is_relevant(&event(EventKind::Create(CreateKind::File), "/ext/panels/a/index.js.swp")));
    }

    #[tokio::test]
    async fn test_missing_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let watcher = ExtensionWatcher::start(&[dir.path().to_path_buf(), dir.path().join("missing")], tx).unwrap();
        assert_eq!(watcher.paths(), &[dir.path().to_path_buf()]);
    }

    #[tokio::test]
    async fn test_file_change_sends_trigger() {
        let dir = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        let _watcher = ExtensionWatcher::start(&[dir.path().to_path_buf()], tx).unwrap();

        std::fs::write(dir.path().join("index.js"), "export default {};").unwrap();

        let trigger = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(matches!(trigger, Some(Trigger::FsEvent(_))));
    }
}
