//! Local preference documents.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// A stored preference document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceDoc {
    pub id: String,
    pub value: Value,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

/// Where synced preferences land.
pub trait PreferenceStore: Send + Sync {
    /// Insert or replace the document `id`.
    fn upsert(&self, id: &str, value: Value) -> PreferenceDoc;

    fn get_by_id(&self, id: &str) -> Option<Value>;

    /// Every document, re-published after each change.
    fn watch_all_changes(&self) -> watch::Receiver<Vec<PreferenceDoc>>;
}

/// In-memory [`PreferenceStore`].
pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, PreferenceDoc>>,
    changes: watch::Sender<Vec<PreferenceDoc>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(Vec::new());
        Self {
            docs: Mutex::new(BTreeMap::new()),
            changes,
        }
    }

    pub fn len(&self) -> usize {
        self.docs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl PreferenceStore for MemoryStore {
    fn upsert(&self, id: &str, value: Value) -> PreferenceDoc {
        let mut docs = self.docs.lock().unwrap_or_else(PoisonError::into_inner);
        let doc = PreferenceDoc {
            id: id.to_string(),
            value,
            updated_at: now_ms(),
        };
        docs.insert(doc.id.clone(), doc.clone());
        self.changes.send_replace(docs.values().cloned().collect());
        doc
    }

    fn get_by_id(&self, id: &str) -> Option<Value> {
        self.docs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|doc| doc.value.clone())
    }

    fn watch_all_changes(&self) -> watch::Receiver<Vec<PreferenceDoc>> {
        self.changes.subscribe()
    }
}
