//! Per-turn orchestration of the search-resolution pipeline.
//!
//! A turn flows message -> intent -> (search: slots -> context repair ->
//! location -> place search -> analysis -> reply) or (chat: trimmed
//! history -> completion), and ends with the assistant message appended to
//! the session. Turns for one session are serialised by [`SessionLocks`];
//! SQLite access runs on the blocking pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use citypulse_core::config::{CityPulseConfig, SessionConfig};
use citypulse_core::error::CityPulseError;
use citypulse_core::types::{Intent, Message, Place, ResolvedQuery, Role};
use citypulse_storage::{generate_session_id, SessionRepository};

use crate::analysis::PlaceAnalyzer;
use crate::collaborator::{
    CallLimiter, CollaboratorError, CompletionRequest, PlaceSummary, PlacesService,
    TextCompletion,
};
use crate::context::ContextResolver;
use crate::context_cache::{ContextStore, InMemoryContextStore};
use crate::error::ChatError;
use crate::extractor::SlotExtractor;
use crate::intent::IntentClassifier;
use crate::location::LocationResolver;
use crate::response::ResponseComposer;

/// Reply to an empty message.
pub const EMPTY_MESSAGE_REPLY: &str = "I didn't receive a message. How can I help you?";
/// Reply when the chat completion fails.
pub const CHAT_FAILURE_REPLY: &str =
    "I'm sorry, I encountered an error processing your request. Please try again.";

// =============================================================================
// Session locks
// =============================================================================

/// One async mutex per session id.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `session_id`, created on first use.
    pub fn lock_for(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.locks.lock() {
            Ok(mut locks) => locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone(),
            // A poisoned registry still hands out a private lock.
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Drop locks nobody holds or waits on. Returns the count removed.
    pub fn prune(&self) -> usize {
        let Ok(mut locks) = self.locks.lock() else {
            return 0;
        };
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Outcome of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnReply {
    pub response: String,
    /// Enriched places, for search turns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub places: Option<Vec<Place>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

impl TurnReply {
    fn text(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            places: None,
            intent: None,
        }
    }
}

pub struct ChatOrchestrator {
    sessions: SessionRepository,
    completion: Option<Arc<dyn TextCompletion>>,
    places: Option<Arc<dyn PlacesService>>,
    classifier: IntentClassifier,
    extractor: SlotExtractor,
    context: ContextResolver,
    location: LocationResolver,
    analyzer: PlaceAnalyzer,
    composer: ResponseComposer,
    locks: SessionLocks,
    limiter: CallLimiter,
    session_config: SessionConfig,
    temperature: f32,
    max_tokens: u32,
    places_analyzed: usize,
    last_cleanup: AtomicI64,
}

impl ChatOrchestrator {
    /// Build the pipeline. Collaborators are wrapped in a shared
    /// [`CallLimiter`] sized by `pipeline.max_concurrent_calls`.
    pub fn new(
        sessions: SessionRepository,
        completion: Option<Arc<dyn TextCompletion>>,
        places: Option<Arc<dyn PlacesService>>,
        config: &CityPulseConfig,
    ) -> Self {
        let limiter = CallLimiter::new(config.pipeline.max_concurrent_calls);
        let completion = completion.map(|c| limiter.wrap_completion(c));
        let places = places.map(|p| limiter.wrap_places(p));
        let store: Arc<dyn ContextStore> = Arc::new(InMemoryContextStore::with_ttl_secs(
            config.session.context_ttl_secs,
        ));

        Self {
            sessions,
            classifier: IntentClassifier::new(completion.clone()),
            extractor: SlotExtractor::new(completion.clone()),
            context: ContextResolver::new(store),
            location: LocationResolver::new(places.clone(), config.search.clone(), &config.maps),
            analyzer: PlaceAnalyzer::new(completion.clone()),
            composer: ResponseComposer::new(config.search.places_described),
            completion,
            places,
            locks: SessionLocks::new(),
            limiter,
            session_config: config.session.clone(),
            temperature: config.completion.temperature,
            max_tokens: config.completion.max_tokens,
            places_analyzed: config.search.places_analyzed,
            last_cleanup: AtomicI64::new(0),
        }
    }

    /// Replace the context cache backend.
    pub fn with_context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context = ContextResolver::new(store);
        self
    }

    pub fn with_composer(mut self, composer: ResponseComposer) -> Self {
        self.composer = composer;
        self
    }

    pub fn context_store(&self) -> Arc<dyn ContextStore> {
        self.context.store().clone()
    }

    pub fn sessions(&self) -> &SessionRepository {
        &self.sessions
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    pub fn has_places(&self) -> bool {
        self.places.is_some()
    }

    pub fn limiter(&self) -> &CallLimiter {
        &self.limiter
    }

    pub fn mint_session_id(&self, ip: Option<&str>, user_agent: Option<&str>) -> String {
        generate_session_id(ip, user_agent)
    }

    /// Handle one user turn.
    pub async fn handle_turn(
        &self,
        message: &str,
        session_id: Option<&str>,
    ) -> Result<TurnReply, ChatError> {
        let message = message.trim();
        if message.is_empty() {
            return Ok(TurnReply::text(EMPTY_MESSAGE_REPLY));
        }
        let session_id = session_id
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ChatError::MissingInput("No session ID provided".to_string()))?;
        if message.chars().count() > self.session_config.max_message_length {
            return Err(ChatError::MessageTooLong(
                self.session_config.max_message_length,
            ));
        }

        let now = Utc::now();
        self.maybe_cleanup(now).await;

        let lock = self.locks.lock_for(session_id);
        let _guard = lock.lock().await;

        let result = self.run_turn(session_id, message, now).await;
        if let Err(ChatError::StorageUnavailable(e)) = &result {
            error!(session_id, error = %e, "Session storage failed, turn aborted");
        }
        result
    }

    async fn run_turn(
        &self,
        session_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<TurnReply, ChatError> {
        let previous = self.read_history(session_id).await?;
        let history = self.append(session_id, Role::User, message).await?;

        let intent = self.classifier.classify(message, &previous).await;
        info!(session_id, intent = ?intent, "Handling turn");

        if intent.is_search() {
            self.search_turn(session_id, message, intent, &history, now)
                .await
        } else {
            self.chat_turn(session_id, intent).await
        }
    }

    async fn search_turn(
        &self,
        session_id: &str,
        message: &str,
        intent: Intent,
        history: &[Message],
        now: DateTime<Utc>,
    ) -> Result<TurnReply, ChatError> {
        let places = self.places.as_ref().ok_or_else(|| {
            warn!(session_id, "Place search requested but no places service configured");
            ChatError::CollaboratorUnavailable("place search".to_string())
        })?;

        let slots = self.extractor.extract(message).await;
        let slots = self
            .context
            .resolve(session_id, message, slots, intent, history, now);
        let location = self.location.resolve(&slots.location).await;
        let context = slots.to_context(message, now);

        let resolved = ResolvedQuery {
            amenity: slots.amenity,
            requirements: slots.requirements,
            location: location.location,
            coordinates: location.coordinates,
            radius: location.radius,
            specificity: location.specificity,
            keyword: slots.keyword,
        };
        info!(
            session_id,
            keyword = %resolved.keyword,
            location = %resolved.location,
            radius = resolved.radius,
            specificity = resolved.specificity.as_str(),
            "Resolved search"
        );

        let summaries = places
            .nearby_search(resolved.coordinates, resolved.radius, &resolved.keyword)
            .await
            .map_err(|e| {
                warn!(session_id, error = %e, "Place search failed");
                search_failure(e)
            })?;
        self.context.store().put(session_id, context);

        if summaries.is_empty() {
            let reply = self.composer.no_results(&resolved);
            self.append(session_id, Role::Assistant, &reply).await?;
            return Ok(TurnReply {
                response: reply,
                places: Some(Vec::new()),
                intent: Some(intent),
            });
        }

        let mut enriched = Vec::new();
        for summary in summaries.into_iter().take(self.places_analyzed) {
            enriched.push(enrich(places.as_ref(), summary).await);
        }

        let label = resolved.location_label();
        let analysis = self
            .analyzer
            .analyze(message, &resolved.keyword, &resolved.requirements, &label, &enriched)
            .await;
        let reply = self.composer.compose(&resolved, &enriched, &analysis);

        self.append(session_id, Role::Assistant, &self.composer.summary_line(&resolved))
            .await?;

        Ok(TurnReply {
            response: reply,
            places: Some(enriched),
            intent: Some(intent),
        })
    }

    async fn chat_turn(&self, session_id: &str, intent: Intent) -> Result<TurnReply, ChatError> {
        let budget = self.session_config.max_context_tokens;
        let id = session_id.to_string();
        let history = self
            .blocking(move |repo| repo.trim(&id, budget, true))
            .await?;

        let Some(completion) = &self.completion else {
            warn!(session_id, "Chat requested but no completion service configured");
            return Ok(TurnReply {
                response: CHAT_FAILURE_REPLY.to_string(),
                places: None,
                intent: Some(intent),
            });
        };

        let request = CompletionRequest::new(history)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens);
        let response = match completion.complete(request).await {
            Ok(reply) => {
                self.append(session_id, Role::Assistant, &reply).await?;
                reply
            }
            Err(e) => {
                warn!(session_id, error = %e, "Chat completion failed");
                CHAT_FAILURE_REPLY.to_string()
            }
        };

        Ok(TurnReply {
            response,
            places: None,
            intent: Some(intent),
        })
    }

    /// Run the retention sweep, cache eviction and lock pruning if the
    /// cleanup interval has elapsed since the last run. Returns whether
    /// this call ran them.
    pub async fn maybe_cleanup(&self, now: DateTime<Utc>) -> bool {
        let interval = i64::try_from(self.session_config.cleanup_interval_secs).unwrap_or(i64::MAX);
        let last = self.last_cleanup.load(Ordering::SeqCst);
        if now.timestamp().saturating_sub(last) < interval {
            return false;
        }
        if self
            .last_cleanup
            .compare_exchange(last, now.timestamp(), Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let cutoff = now - Duration::days(i64::from(self.session_config.retention_days));
        match self.blocking(move |repo| repo.cleanup_before(cutoff)).await {
            Ok(deleted) => debug!(deleted, "Retention sweep finished"),
            Err(e) => warn!(error = %e, "Retention sweep failed"),
        }
        let evicted = self.context.store().evict_expired(now);
        let pruned = self.locks.prune();
        debug!(evicted, pruned, "Cleanup finished");
        true
    }

    async fn read_history(&self, session_id: &str) -> Result<Vec<Message>, ChatError> {
        let id = session_id.to_string();
        self.blocking(move |repo| repo.read(&id)).await
    }

    async fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Vec<Message>, ChatError> {
        let id = session_id.to_string();
        let content = content.to_string();
        self.blocking(move |repo| repo.append(&id, role, &content))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(SessionRepository) -> Result<T, CityPulseError> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.sessions.clone();
        Ok(tokio::task::spawn_blocking(move || f(repo)).await??)
    }
}

/// Only a refused or unconfigured place search makes the service
/// unavailable; other failures are internal.
fn search_failure(err: CollaboratorError) -> ChatError {
    match err {
        CollaboratorError::Denied(_) | CollaboratorError::NotConfigured(_) => {
            ChatError::CollaboratorUnavailable(err.to_string())
        }
        other => ChatError::Internal(format!("place search failed: {}", other)),
    }
}

/// Fetch details for one search hit, falling back to the summary.
async fn enrich(places: &dyn PlacesService, summary: PlaceSummary) -> Place {
    let place_id = summary.place_id.clone();
    let fallback = Place::from(summary);
    match places.place_details(&place_id).await {
        Ok(mut place) => {
            if place.place_id.is_empty() {
                place.place_id = fallback.place_id;
            }
            if place.name.is_empty() {
                place.name = fallback.name;
            }
            if place.address.is_empty() {
                place.address = fallback.address;
            }
            if place.rating.is_none() {
                place.rating = fallback.rating;
            }
            if place.location.is_none() {
                place.location = fallback.location;
            }
            place
        }
        Err(e) => {
            warn!(place_id = %place_id, error = %e, "Place details failed, using search summary");
            fallback
        }
    }
}
