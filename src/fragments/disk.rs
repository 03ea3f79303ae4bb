//! Fragments stored as files in one directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use notify::RecommendedWatcher;
use tokio::sync::broadcast;

use crate::config::loader::FragmentFormat;
use crate::config::watcher::FragmentDirWatcher;
use crate::fragments::{
    change_event, event_channel, load_fragment, ContentVersion, FragmentError, FragmentErrorKind,
    FragmentEvent, FragmentId, FragmentStore, FragmentSubscription, LoadedFragment, StoreError,
};

/// A directory of `*.toml` / `*.json` fragment files.
///
/// The file name is the fragment id. Dot-files and other extensions are ignored.
pub struct DiskFragmentStore {
    dir: PathBuf,
    poll_interval: Duration,
    tx: broadcast::Sender<FragmentEvent>,
    known: Arc<Mutex<HashMap<FragmentId, ContentVersion>>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl DiskFragmentStore {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
            tx: event_channel(),
            known: Arc::new(Mutex::new(HashMap::new())),
            watcher: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn start_watcher(&self) -> Result<(), StoreError> {
        let mut slot = self.watcher.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.is_some() {
            return Ok(());
        }

        // Baseline so that only changes after this point are reported.
        let baseline = scan_versions(&self.dir, &HashMap::new())?;
        *self.known.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = baseline;

        let dir = self.dir.clone();
        let known = Arc::clone(&self.known);
        let tx = self.tx.clone();
        let watcher = FragmentDirWatcher::new(&self.dir, self.poll_interval).run(move || {
            let mut known = known.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            match scan_versions(&dir, &known) {
                Ok(current) => {
                    for event in diff(&known, &current) {
                        tracing::debug!(event = ?event, "Fragment change");
                        // No receivers is fine; events are only hints.
                        let _ = tx.send(event);
                    }
                    *known = current;
                }
                Err(e) => tracing::error!(dir = ?dir, error = %e, "Failed to rescan fragment directory"),
            }
        })?;

        *slot = Some(watcher);
        Ok(())
    }
}

impl FragmentStore for DiskFragmentStore {
    fn list(&self) -> Result<Vec<LoadedFragment>, StoreError> {
        let files = fragment_files(&self.dir)?;
        let loaded = files
            .into_iter()
            .map(|(id, path, format)| match fs::read_to_string(&path) {
                Ok(content) => load_fragment(id, format, &content),
                Err(e) => Err(FragmentError {
                    fragment: id,
                    version: None,
                    kind: FragmentErrorKind::Io(e.to_string()),
                }),
            })
            .collect();
        Ok(loaded)
    }

    fn subscribe(&self) -> Result<FragmentSubscription, StoreError> {
        let rx = self.tx.subscribe();
        self.start_watcher()?;
        Ok(FragmentSubscription::new(rx))
    }
}

/// Fragment files in `dir`, sorted by id.
fn fragment_files(dir: &Path) -> std::io::Result<Vec<(FragmentId, PathBuf, FragmentFormat)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Some(format) = FragmentFormat::from_path(&path) {
            files.push((FragmentId::new(name), path.clone(), format));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

fn scan_versions(
    dir: &Path,
    previous: &HashMap<FragmentId, ContentVersion>,
) -> std::io::Result<HashMap<FragmentId, ContentVersion>> {
    let mut versions = HashMap::new();
    for (id, path, _) in fragment_files(dir)? {
        let read = fs::read(&path);
        record_version(&mut versions, previous, id, read);
    }
    Ok(versions)
}

/// A listed file that cannot be read keeps its previous version, so a
/// transient read failure is not reported as a removal. A file that
/// vanished is dropped by the next listing.
fn record_version(
    versions: &mut HashMap<FragmentId, ContentVersion>,
    previous: &HashMap<FragmentId, ContentVersion>,
    id: FragmentId,
    read: std::io::Result<Vec<u8>>,
) {
    match read {
        Ok(bytes) => {
            versions.insert(id, ContentVersion::of(&bytes));
        }
        Err(e) => {
            tracing::debug!(fragment = %id, error = %e, "Fragment unreadable, keeping last version");
            if let Some(version) = previous.get(&id) {
                versions.insert(id, *version);
            }
        }
    }
}

fn diff(
    before: &HashMap<FragmentId, ContentVersion>,
    after: &HashMap<FragmentId, ContentVersion>,
) -> Vec<FragmentEvent> {
    let mut events: Vec<FragmentEvent> = after
        .iter()
        .filter_map(|(id, version)| change_event(id.clone(), *version, before.get(id).copied()))
        .collect();
    events.extend(
        before
            .keys()
            .filter(|id| !after.contains_key(*id))
            .map(|id| FragmentEvent::Removed { id: id.clone() }),
    );
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("fragment-store-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_list_reports_malformed_fragment_separately() {
        let dir = temp_dir();
        fs::write(
            dir.join("users.toml"),
            r#"
            [[routes]]
            upstream_path = "/users"
            downstream_path = "/users"
            downstream_hosts = ["svc-users:8080"]
            "#,
        )
        .unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();
        fs::write(dir.join(".hidden.toml"), "ignored").unwrap();

        let store = DiskFragmentStore::new(&dir, Duration::from_secs(1));
        let listed = store.list().unwrap();

        assert_eq!(listed.len(), 2);
        let err = listed[0].as_ref().unwrap_err();
        assert_eq!(err.fragment.as_str(), "broken.json");
        let ok = listed[1].as_ref().unwrap();
        assert_eq!(ok.id.as_str(), "users.toml");
        assert_eq!(ok.document.routes.len(), 1);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_directory_is_store_error() {
        let store = DiskFragmentStore::new("/definitely/not/here", Duration::from_secs(1));
        assert!(matches!(store.list(), Err(StoreError::Unavailable(_))));
    }

    #[test]
    fn test_diff_reports_add_update_remove() {
        let a = FragmentId::new("a.toml");
        let b = FragmentId::new("b.toml");
        let c = FragmentId::new("c.toml");
        let before = HashMap::from([
            (a.clone(), ContentVersion::of(b"1")),
            (b.clone(), ContentVersion::of(b"1")),
        ]);
        let after = HashMap::from([
            (a.clone(), ContentVersion::of(b"1")),
            (c.clone(), ContentVersion::of(b"1")),
        ]);

        let events = diff(&before, &after);
        assert_eq!(events.len(), 2);
        assert!(events.contains(&FragmentEvent::Added { id: c, version: ContentVersion::of(b"1") }));
        assert!(events.contains(&FragmentEvent::Removed { id: b }));

        let touched = HashMap::from([(a.clone(), ContentVersion::of(b"2"))]);
        let events = diff(&HashMap::from([(a.clone(), ContentVersion::of(b"1"))]), &touched);
        assert_eq!(events, vec![FragmentEvent::Updated { id: a, version: ContentVersion::of(b"2") }]);
    }

    #[test]
    fn test_unreadable_listed_file_keeps_previous_version() {
        let a = FragmentId::new("a.toml");
        let b = FragmentId::new("b.toml");
        let previous = HashMap::from([(a.clone(), ContentVersion::of(b"1"))]);
        let denied = || -> std::io::Result<Vec<u8>> { Err(std::io::ErrorKind::PermissionDenied.into()) };

        let mut current = HashMap::new();
        record_version(&mut current, &previous, a.clone(), denied());
        record_version(&mut current, &previous, b.clone(), denied());

        assert_eq!(current, previous);
        assert!(diff(&previous, &current).is_empty());

        record_version(&mut current, &previous, a.clone(), Ok(b"2".to_vec()));
        assert_eq!(diff(&previous, &current), vec![FragmentEvent::Updated { id: a, version: ContentVersion::of(b"2") }]);
    }

    #[test]
    fn test_rescan_reports_only_real_changes() {
        let dir = temp_dir();
        fs::write(dir.join("a.toml"), "").unwrap();
        fs::write(dir.join("b.toml"), "").unwrap();
        let baseline = scan_versions(&dir, &HashMap::new()).unwrap();

        fs::remove_file(dir.join("b.toml")).unwrap();
        let current = scan_versions(&dir, &baseline).unwrap();

        assert_eq!(diff(&baseline, &current), vec![FragmentEvent::Removed { id: FragmentId::new("b.toml") }]);
        fs::remove_dir_all(dir).unwrap();
    }
}
