//! Route fragment sources.
//!
//! # Data Flow
//! ```text
//! backing store (directory of files, in-memory entries)
//!     → list(): snapshot of parsed fragments, parse failures tagged per fragment
//!     → subscribe(): Added / Updated / Removed events, deduplicated by content version
//!     → consumed by routing::reloader
//! ```
//!
//! # Design Decisions
//! - A fragment that fails to parse is an entry-level error, never a store error
//! - Content version is a hash of the raw bytes, so touching a file without
//!   changing it produces no event
//! - Every subscriber gets its own receiver; resubscribing restarts the stream

pub mod disk;
pub mod memory;

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::config::loader::{parse_fragment, FragmentFormat};
use crate::config::schema::FragmentDocument;

pub use disk::DiskFragmentStore;
pub use memory::MemoryFragmentStore;

/// Capacity of each store's event channel.
const EVENT_CAPACITY: usize = 256;

/// Stable identity of a fragment: its file or entry name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FragmentId(String);

impl FragmentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FragmentId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for FragmentId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Hash of a fragment's raw content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentVersion(u64);

impl ContentVersion {
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for ContentVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl Serialize for ContentVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A successfully parsed fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFragment {
    pub id: FragmentId,
    pub version: ContentVersion,
    pub document: FragmentDocument,
}

impl ConfigFragment {
    pub fn precedence(&self) -> i32 {
        self.document.precedence
    }
}

/// Why a single fragment could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FragmentErrorKind {
    #[error("unreadable: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

/// A fragment that was excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fragment {fragment}: {kind}")]
pub struct FragmentError {
    pub fragment: FragmentId,
    pub version: Option<ContentVersion>,
    pub kind: FragmentErrorKind,
}

/// One entry of a store listing.
pub type LoadedFragment = Result<ConfigFragment, FragmentError>;

/// Failure of the store as a whole.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fragment store unreadable: {0}")]
    Unavailable(#[from] std::io::Error),

    #[error("fragment watch failed: {0}")]
    Watch(#[from] notify::Error),
}

/// Change notification from a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentEvent {
    Added { id: FragmentId, version: ContentVersion },
    Updated { id: FragmentId, version: ContentVersion },
    Removed { id: FragmentId },
    /// The subscriber fell behind and missed events; re-list everything.
    Resync,
}

/// A per-subscriber event stream. Ends only when the store is dropped.
#[derive(Debug)]
pub struct FragmentSubscription {
    rx: broadcast::Receiver<FragmentEvent>,
}

impl FragmentSubscription {
    fn new(rx: broadcast::Receiver<FragmentEvent>) -> Self {
        Self { rx }
    }

    /// Wait for the next event.
    pub async fn next(&mut self) -> Option<FragmentEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Fragment subscriber lagged, requesting resync");
                Some(FragmentEvent::Resync)
            }
            Err(RecvError::Closed) => None,
        }
    }
}

/// A source of route fragments.
pub trait FragmentStore: Send + Sync + 'static {
    /// Snapshot of every fragment currently in the store, sorted by id.
    fn list(&self) -> Result<Vec<LoadedFragment>, StoreError>;

    /// Open a new change stream.
    fn subscribe(&self) -> Result<FragmentSubscription, StoreError>;
}

/// Parse raw fragment content into a [`ConfigFragment`].
pub fn load_fragment(id: FragmentId, format: FragmentFormat, content: &str) -> LoadedFragment {
    let version = ContentVersion::of(content.as_bytes());
    match parse_fragment(format, content) {
        Ok(document) => Ok(ConfigFragment { id, version, document }),
        Err(reason) => Err(FragmentError {
            fragment: id,
            version: Some(version),
            kind: FragmentErrorKind::Parse(reason),
        }),
    }
}

/// Event emitted when `id` is now at `version` and was previously at `previous`.
fn change_event(id: FragmentId, version: ContentVersion, previous: Option<ContentVersion>) -> Option<FragmentEvent> {
    match previous {
        None => Some(FragmentEvent::Added { id, version }),
        Some(prev) if prev != version => Some(FragmentEvent::Updated { id, version }),
        Some(_) => None,
    }
}

fn event_channel() -> broadcast::Sender<FragmentEvent> {
    broadcast::channel(EVENT_CAPACITY).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_version_tracks_bytes() {
        let a = ContentVersion::of(b"precedence = 1");
        assert_eq!(a, ContentVersion::of(b"precedence = 1"));
        assert_ne!(a, ContentVersion::of(b"precedence = 2"));
    }

    #[test]
    fn test_load_fragment_tags_parse_errors() {
        let err = load_fragment("broken.toml".into(), FragmentFormat::Toml, "[[routes]]\nkey = ")
            .unwrap_err();
        assert_eq!(err.fragment.as_str(), "broken.toml");
        assert!(matches!(err.kind, FragmentErrorKind::Parse(_)));
        assert!(err.version.is_some());
    }

    #[test]
    fn test_change_event_dedups_same_version() {
        let v = ContentVersion::of(b"x");
        assert!(change_event("a".into(), v, Some(v)).is_none());
        assert!(matches!(change_event("a".into(), v, None), Some(FragmentEvent::Added { .. })));
        assert!(matches!(
            change_event("a".into(), v, Some(ContentVersion::of(b"y"))),
            Some(FragmentEvent::Updated { .. })
        ));
    }
}
