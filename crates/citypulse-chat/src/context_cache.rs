//! Short-lived per-session memory of the last resolved search.
//!
//! Entries expire `ttl` after their `resolved_at` timestamp. Expiry is
//! enforced on read (an expired entry is never returned) and actively via
//! [`ContextStore::evict_expired`], which the service runs on a timer.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use citypulse_core::types::SearchContext;

/// Key-value store for cached search contexts.
pub trait ContextStore: Send + Sync {
    /// The entry for `session_id` if it is still fresh at `now`.
    fn get(&self, session_id: &str, now: DateTime<Utc>) -> Option<SearchContext>;

    /// Insert or overwrite the entry for `session_id`.
    fn put(&self, session_id: &str, context: SearchContext);

    /// Remove every entry that is expired at `now`. Returns the count.
    fn evict_expired(&self, now: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-local [`ContextStore`] backed by a mutex-guarded map.
#[derive(Debug)]
pub struct InMemoryContextStore {
    entries: Mutex<HashMap<String, SearchContext>>,
    ttl: Duration,
}

impl InMemoryContextStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub fn with_ttl_secs(secs: i64) -> Self {
        Self::new(Duration::seconds(secs))
    }

    /// An entry is fresh while its age is at most `ttl`.
    fn is_fresh(&self, context: &SearchContext, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(context.resolved_at) <= self.ttl
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::with_ttl_secs(1800)
    }
}

impl ContextStore for InMemoryContextStore {
    fn get(&self, session_id: &str, now: DateTime<Utc>) -> Option<SearchContext> {
        let entries = self.entries.lock().ok()?;
        entries
            .get(session_id)
            .filter(|ctx| self.is_fresh(ctx, now))
            .cloned()
    }

    fn put(&self, session_id: &str, context: SearchContext) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(session_id.to_string(), context);
        }
    }

    fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let Ok(mut entries) = self.entries.lock() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, ctx| now.signed_duration_since(ctx.resolved_at) <= self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "Evicted expired search contexts");
        }
        evicted
    }

    fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}
