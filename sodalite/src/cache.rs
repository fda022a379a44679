//! Short-lived metadata cache.
//!
//! Entries are keyed by the SHA-256 of the raw source URL and live for
//! [`DEFAULT_TTL`]. Concurrent misses for the same key are coalesced into a
//! single extraction whose result is shared with every waiter; failures are
//! shared too but never stored.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sha2::{Digest, Sha256};
use tokio::sync::{Notify, OnceCell};
use tracing::{debug, trace};

use crate::extractor::ExtractionError;
use crate::media::StreamDescription;

/// Stream URLs are signed and expire quickly upstream.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct CacheEntry {
    description: Arc<StreamDescription>,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.cached_at) < ttl
    }
}

type InFlightResult = Result<Arc<StreamDescription>, ExtractionError>;

struct InFlightState {
    result: OnceCell<InFlightResult>,
    notify: Notify,
}

impl InFlightState {
    fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
        }
    }

    fn set_result(&self, result: InFlightResult) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> InFlightResult {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }
}

/// Removes the in-flight slot if the leader is dropped before finishing.
struct LeaderGuard<'a> {
    cache: &'a MetadataCache,
    key: &'a str,
    state: Arc<InFlightState>,
    finished: bool,
}

impl LeaderGuard<'_> {
    fn finish(mut self, result: InFlightResult) {
        self.finished = true;
        self.cache.release_in_flight(self.key, &self.state, result);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.cache.release_in_flight(
                self.key,
                &self.state,
                Err(ExtractionError::Failed("extraction was cancelled".to_string())),
            );
        }
    }
}

/// Source URL → [`StreamDescription`] cache.
#[derive(Clone)]
pub struct MetadataCache {
    entries: Arc<DashMap<String, CacheEntry>>,
    in_flight: Arc<DashMap<String, Arc<InFlightState>>>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            in_flight: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Stable cache key for a URL.
    pub fn key_for(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    pub fn get(&self, url: &str) -> Option<Arc<StreamDescription>> {
        self.get_at(url, Instant::now())
    }

    pub fn put(&self, url: &str, description: StreamDescription) -> Arc<StreamDescription> {
        self.put_at(url, description, Instant::now())
    }

    fn get_at(&self, url: &str, now: Instant) -> Option<Arc<StreamDescription>> {
        let key = Self::key_for(url);
        let hit = self
            .entries
            .get(&key)
            .map(|entry| (entry.is_fresh(now, self.ttl), entry.description.clone()));

        match hit {
            Some((true, description)) => {
                trace!(key = %key, "Metadata cache hit");
                Some(description)
            }
            Some((false, _)) => {
                self.entries
                    .remove_if(&key, |_, entry| !entry.is_fresh(now, self.ttl));
                debug!(key = %key, "Evicted expired metadata entry");
                None
            }
            None => None,
        }
    }

    fn put_at(
        &self,
        url: &str,
        description: StreamDescription,
        now: Instant,
    ) -> Arc<StreamDescription> {
        let description = Arc::new(description);
        self.insert_arc(Self::key_for(url), description.clone(), now);
        description
    }

    fn insert_arc(&self, key: String, description: Arc<StreamDescription>, now: Instant) {
        self.entries.insert(
            key,
            CacheEntry {
                description,
                cached_at: now,
            },
        );
    }

    pub fn invalidate(&self, url: &str) {
        self.entries.remove(&Self::key_for(url));
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    fn cleanup_expired_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now, self.ttl));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return a fresh cached description, or run `extract` once for all
    /// concurrent callers asking for the same URL.
    pub async fn get_or_extract<F, Fut>(
        &self,
        url: &str,
        extract: F,
    ) -> Result<Arc<StreamDescription>, ExtractionError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<StreamDescription, ExtractionError>>,
    {
        if let Some(hit) = self.get(url) {
            return Ok(hit);
        }

        let key = Self::key_for(url);
        let (state, is_leader) = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), false),
            Entry::Vacant(entry) => {
                // A leader may have finished between the first lookup and here.
                if let Some(hit) = self.get(url) {
                    return Ok(hit);
                }
                let state = Arc::new(InFlightState::new());
                entry.insert(state.clone());
                (state, true)
            }
        };

        if !is_leader {
            debug!(key = %key, "Joining in-flight extraction");
            return state.wait().await;
        }

        let guard = LeaderGuard {
            cache: self,
            key: &key,
            state: state.clone(),
            finished: false,
        };

        let result = extract().await.map(Arc::new);
        guard.finish(result.clone());
        result
    }

    fn release_in_flight(&self, key: &str, state: &Arc<InFlightState>, result: InFlightResult) {
        // Publish before releasing the slot so a newcomer finds the entry.
        if let Ok(description) = &result {
            self.insert_arc(key.to_string(), description.clone(), Instant::now());
        }
        self.in_flight
            .remove_if(key, |_, current| Arc::ptr_eq(current, state));
        state.set_result(result);
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
