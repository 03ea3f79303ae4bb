//! In-process key-value fragment source.

use std::collections::BTreeMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

use crate::config::loader::FragmentFormat;
use crate::fragments::{
    change_event, event_channel, load_fragment, ContentVersion, FragmentEvent, FragmentId,
    FragmentStore, FragmentSubscription, LoadedFragment, StoreError,
};

#[derive(Debug, Clone)]
struct Entry {
    format: FragmentFormat,
    content: String,
    version: ContentVersion,
}

/// Fragments held in memory, keyed by id. Useful for embedding the gateway
/// behind another configuration source.
#[derive(Debug)]
pub struct MemoryFragmentStore {
    entries: RwLock<BTreeMap<FragmentId, Entry>>,
    tx: broadcast::Sender<FragmentEvent>,
}

impl MemoryFragmentStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            tx: event_channel(),
        }
    }

    /// Insert or replace a fragment. Returns false when the content is unchanged.
    pub fn put(&self, id: impl Into<FragmentId>, format: FragmentFormat, content: impl Into<String>) -> bool {
        let id = id.into();
        let content = content.into();
        let version = ContentVersion::of(content.as_bytes());

        let mut entries = self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let previous = entries.get(&id).map(|entry| entry.version);
        let Some(event) = change_event(id.clone(), version, previous) else {
            return false;
        };
        entries.insert(id, Entry { format, content, version });
        drop(entries);

        let _ = self.tx.send(event);
        true
    }

    /// Remove a fragment. Returns false when it wasn't present.
    pub fn remove(&self, id: &FragmentId) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(id)
            .is_some();
        if removed {
            let _ = self.tx.send(FragmentEvent::Removed { id: id.clone() });
        }
        removed
    }
}

impl Default for MemoryFragmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FragmentStore for MemoryFragmentStore {
    fn list(&self) -> Result<Vec<LoadedFragment>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries
            .iter()
            .map(|(id, entry)| load_fragment(id.clone(), entry.format, &entry.content))
            .collect())
    }

    fn subscribe(&self) -> Result<FragmentSubscription, StoreError> {
        Ok(FragmentSubscription::new(self.tx.subscribe()))
    }
}
