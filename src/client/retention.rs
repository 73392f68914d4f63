//! Local retention of session messages, keyed by case id.
//!
//! Stands in for whatever device-local storage the embedding UI provides.
//! Entries exist so a session can resume recent history after a restart,
//! and so secure cleanup has something concrete to erase: wiping removes
//! every key that references the case id.

use std::collections::HashMap;
use std::sync::Mutex;

use super::session::LocalMessage;

/// Storage key for a case's retained messages
pub fn storage_key(case_id: &str) -> String {
    format!("session-{}", case_id)
}

/// In-memory retention store shared by the sessions of one process
#[derive(Default)]
pub struct RetentionStore {
    entries: Mutex<HashMap<String, Vec<LocalMessage>>>,
}

impl RetentionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the retained messages under a key
    pub fn save(&self, key: &str, messages: Vec<LocalMessage>) {
        let mut entries = self.entries.lock().expect("retention lock poisoned");
        entries.insert(key.to_string(), messages);
    }

    /// Load the retained messages under a key, empty when absent
    pub fn load(&self, key: &str) -> Vec<LocalMessage> {
        let entries = self.entries.lock().expect("retention lock poisoned");
        entries.get(key).cloned().unwrap_or_default()
    }

    /// Remove every entry whose key references the case id.
    ///
    /// Returns the number of entries removed. Security-critical: called by
    /// secure cleanup so no message content survives on a shared device.
    pub fn wipe_matching(&self, case_id: &str) -> usize {
        let mut entries = self.entries.lock().expect("retention lock poisoned");
        let keys: Vec<String> = entries
            .keys()
            .filter(|key| key.contains(case_id))
            .cloned()
            .collect();
        for key in &keys {
            entries.remove(key);
        }
        keys.len()
    }

    /// Number of retained entries (used by tests)
    pub fn len(&self) -> usize {
        self.entries.lock().expect("retention lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{MessageStatus, SenderClass};

    fn message(id: &str) -> LocalMessage {
        LocalMessage {
            id: id.to_string(),
            text: "hola".to_string(),
            sender: SenderClass::User,
            timestamp: 1000,
            status: MessageStatus::Sent,
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        // given:
        let store = RetentionStore::new();
        let key = storage_key("case-001");

        // when:
        store.save(&key, vec![message("m1")]);

        // then:
        let loaded = store.load(&key);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "m1");
    }

    #[test]
    fn test_load_missing_key_is_empty() {
        // given:
        let store = RetentionStore::new();

        // when / then:
        assert!(store.load(&storage_key("case-404")).is_empty());
    }

    #[test]
    fn test_wipe_matching_removes_only_the_case_entries() {
        // given: entries for two different cases
        let store = RetentionStore::new();
        store.save(&storage_key("case-001"), vec![message("m1")]);
        store.save(&storage_key("case-002"), vec![message("m2")]);

        // when:
        let removed = store.wipe_matching("case-001");

        // then:
        assert_eq!(removed, 1);
        assert!(store.load(&storage_key("case-001")).is_empty());
        assert_eq!(store.load(&storage_key("case-002")).len(), 1);
    }
}
