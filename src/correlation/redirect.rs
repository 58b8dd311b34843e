//! Linking and flattening of the physical requests behind one logical call.
//!
//! A fetch implementation that follows redirects reissues the request with
//! the same headers, so every hop carries the same correlation token. When a
//! hop's response arrives while the previous hop is still stored under that
//! token, the previous hop becomes the new one's parent.

use super::store::{CorrelationStore, PendingEntry};
use super::token::CorrelationToken;

/// Insert `entry` under `token`, chaining any redirect hop already stored
/// there as its parent.
pub fn link(store: &CorrelationStore, token: &CorrelationToken, mut entry: PendingEntry) {
    store.replace_with(token.clone(), |stale| {
        match stale {
            Some(previous) if previous.is_redirect() => {
                tracing::debug!(
                    token = %token,
                    from = %previous.entry.request.url,
                    to = %entry.entry.request.url,
                    "linking redirect hop"
                );
                entry.parent = Some(Box::new(previous));
            }
            Some(previous) => {
                tracing::warn!(
                    token = %token,
                    dropped = %previous.entry.request.url,
                    kept = %entry.entry.request.url,
                    "two in-flight requests share one correlation token; keeping the latest"
                );
            }
            None => {}
        }
        entry
    });
}

/// Walk the parent links, oldest hop first. The returned entries no longer
/// reference each other.
pub fn flatten(mut last: PendingEntry) -> Vec<PendingEntry> {
    let mut chain = Vec::new();
    let mut next = last.parent.take();
    while let Some(mut hop) = next {
        next = hop.parent.take();
        chain.push(*hop);
    }
    chain.reverse();
    chain.push(last);
    chain
}

pub fn apply_page_ref(chain: &mut [PendingEntry], page_ref: &str) {
    for hop in chain {
        hop.entry.pageref = Some(page_ref.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::har::Entry;
    use crate::timing::Timestamps;
    use crate::transport::BodyProgress;
    use std::sync::Arc;

    fn hop(url: &str, status: u16, location: &str) -> PendingEntry {
        let mut entry = Entry::default();
        entry.request.url = url.to_string();
        entry.response.status = status;
        entry.response.redirect_url = location.to_string();
        PendingEntry::new(entry, Timestamps::now(), Arc::new(BodyProgress::default()))
    }

    #[test]
    fn chains_redirect_hops_oldest_first() {
        let store = CorrelationStore::new();
        let token = CorrelationToken::generate();

        link(&store, &token, hop("http://a/1", 302, "/2"));
        link(&store, &token, hop("http://a/2", 301, "/3"));
        link(&store, &token, hop("http://a/3", 200, ""));
        assert_eq!(store.len(), 1);

        let last = store.take(&token).unwrap();
        let mut chain = flatten(last);
        apply_page_ref(&mut chain, "page_7");

        let urls: Vec<&str> = chain.iter().map(|h| h.entry.request.url.as_str()).collect();
        assert_eq!(urls, vec!["http://a/1", "http://a/2", "http://a/3"]);
        assert!(chain.iter().all(|h| h.parent.is_none()));
        assert!(chain
            .iter()
            .all(|h| h.entry.pageref.as_deref() == Some("page_7")));
    }

    #[test]
    fn non_redirect_collision_keeps_last_writer() {
        let store = CorrelationStore::new();
        let token = CorrelationToken::generate();

        link(&store, &token, hop("http://a/first", 200, ""));
        link(&store, &token, hop("http://a/second", 200, ""));

        let last = store.take(&token).unwrap();
        assert_eq!(last.entry.request.url, "http://a/second");
        assert_eq!(flatten(last).len(), 1);
    }
}
