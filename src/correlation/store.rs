use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::token::CorrelationToken;
use crate::har::Entry;
use crate::timing::Timestamps;
use crate::transport::BodyProgress;

/// An entry between "response headers observed" and "request settled".
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub entry: Entry,
    pub timestamps: Timestamps,
    /// Raw transferred body bytes, fed by the instrumented response body.
    pub progress: Arc<BodyProgress>,
    /// The request this one superseded when a redirect reused the token.
    pub parent: Option<Box<PendingEntry>>,
}

impl PendingEntry {
    pub fn new(entry: Entry, timestamps: Timestamps, progress: Arc<BodyProgress>) -> Self {
        Self {
            entry,
            timestamps,
            progress,
            parent: None,
        }
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.entry.response.status)
            && !self.entry.response.redirect_url.is_empty()
    }
}

/// Maps correlation tokens to in-flight entries.
///
/// One store belongs to one capture wrapper; clones share the same table so
/// the wrapper and every transport it instruments see the same entries.
/// The lock is only held for single operations, never across an await.
#[derive(Debug, Clone, Default)]
pub struct CorrelationStore {
    entries: Arc<Mutex<HashMap<CorrelationToken, PendingEntry>>>,
}

impl CorrelationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CorrelationToken, PendingEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert an entry, returning whatever was stored under the token before.
    pub fn set(&self, token: CorrelationToken, entry: PendingEntry) -> Option<PendingEntry> {
        self.lock().insert(token, entry)
    }

    pub fn get(&self, token: &CorrelationToken) -> Option<PendingEntry> {
        self.lock().get(token).cloned()
    }

    pub fn delete(&self, token: &CorrelationToken) -> bool {
        self.lock().remove(token).is_some()
    }

    /// Remove and return the entry, so exactly one caller finalizes it.
    pub fn take(&self, token: &CorrelationToken) -> Option<PendingEntry> {
        self.lock().remove(token)
    }

    /// Swap the entry under `token` for the one built from the previous
    /// value, atomically.
    pub fn replace_with<F>(&self, token: CorrelationToken, build: F)
    where
        F: FnOnce(Option<PendingEntry>) -> PendingEntry,
    {
        let mut entries = self.lock();
        let previous = entries.remove(&token);
        let next = build(previous);
        entries.insert(token, next);
    }

    pub fn contains(&self, token: &CorrelationToken) -> bool {
        self.lock().contains_key(token)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(url: &str) -> PendingEntry {
        let mut entry = Entry::default();
        entry.request.url = url.to_string();
        PendingEntry::new(entry, Timestamps::now(), Arc::new(BodyProgress::default()))
    }

    #[test]
    fn set_get_delete() {
        let store = CorrelationStore::new();
        let token = CorrelationToken::generate();

        assert!(store.set(token.clone(), pending("http://a/")).is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&token).unwrap().entry.request.url, "http://a/");
        assert!(store.delete(&token));
        assert!(!store.delete(&token));
        assert!(store.is_empty());
    }

    #[test]
    fn take_removes_exactly_once() {
        let store = CorrelationStore::new();
        let token = CorrelationToken::generate();
        store.set(token.clone(), pending("http://a/"));

        assert!(store.take(&token).is_some());
        assert!(store.take(&token).is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn clones_share_the_table_but_instances_do_not() {
        let store = CorrelationStore::new();
        let shared = store.clone();
        let other = CorrelationStore::new();
        let token = CorrelationToken::generate();

        shared.set(token.clone(), pending("http://a/"));
        assert!(store.contains(&token));
        assert!(!other.contains(&token));
    }
}
