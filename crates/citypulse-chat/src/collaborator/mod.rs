//! Contracts for the remote services the pipeline depends on.
//!
//! The pipeline only sees the [`TextCompletion`] and [`PlacesService`]
//! traits. HTTP implementations live in [`openai`] and [`google_maps`];
//! scripted doubles for tests live in [`mock`]. Every client handed to the
//! orchestrator is wrapped by a [`CallLimiter`] so that a burst of slow
//! calls cannot monopolise the runtime.

pub mod google_maps;
pub mod mock;
pub mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use citypulse_core::types::{Coordinates, Message, Place};

pub use google_maps::GoogleMapsClient;
pub use openai::OpenAiCompletion;

/// Errors returned by collaborator clients.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("request denied: {0}")]
    Denied(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for CollaboratorError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CollaboratorError::Decode(err.to_string())
        } else {
            CollaboratorError::Request(err.to_string())
        }
    }
}

// =============================================================================
// Text completion
// =============================================================================

/// A single chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Overrides the client's configured model when set.
    pub model: Option<String>,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            model: None,
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// A request with a single user message.
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::new(vec![Message::user(text)])
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Content of the last message, which carries the instruction for
    /// single-prompt requests.
    pub fn last_content(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Text-completion service.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError>;
}

// =============================================================================
// Geocoding and place search
// =============================================================================

/// Best geocoding match for an address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub coordinates: Coordinates,
    /// Place-type tags such as `locality` or `route`.
    pub types: Vec<String>,
    pub formatted_address: String,
}

/// A nearby-search hit, before enrichment with a details call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaceSummary {
    pub place_id: String,
    pub name: String,
    pub vicinity: String,
    pub rating: Option<f32>,
    pub total_ratings: Option<u32>,
    pub types: Vec<String>,
    pub location: Option<Coordinates>,
}

impl From<PlaceSummary> for Place {
    fn from(summary: PlaceSummary) -> Self {
        Place {
            place_id: summary.place_id,
            name: summary.name,
            address: summary.vicinity,
            rating: summary.rating,
            total_ratings: summary.total_ratings,
            types: summary.types,
            location: summary.location,
            ..Place::default()
        }
    }
}

/// Geocoding and nearby-place-search service.
#[async_trait]
pub trait PlacesService: Send + Sync {
    /// Geocode free text. `Ok(None)` means no match.
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeResult>, CollaboratorError>;

    /// Places within `radius` metres of `center` matching `keyword`.
    async fn nearby_search(
        &self,
        center: Coordinates,
        radius: u32,
        keyword: &str,
    ) -> Result<Vec<PlaceSummary>, CollaboratorError>;

    async fn place_details(&self, place_id: &str) -> Result<Place, CollaboratorError>;
}

// =============================================================================
// Call limiting
// =============================================================================

/// Bounds the number of in-flight collaborator calls across all sessions.
#[derive(Debug, Clone)]
pub struct CallLimiter {
    permits: Arc<Semaphore>,
}

impl CallLimiter {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn wrap_completion(&self, inner: Arc<dyn TextCompletion>) -> Arc<dyn TextCompletion> {
        Arc::new(LimitedCompletion {
            inner,
            limiter: self.clone(),
        })
    }

    pub fn wrap_places(&self, inner: Arc<dyn PlacesService>) -> Arc<dyn PlacesService> {
        Arc::new(LimitedPlaces {
            inner,
            limiter: self.clone(),
        })
    }

    async fn acquire(&self) -> Result<tokio::sync::SemaphorePermit<'_>, CollaboratorError> {
        self.permits
            .acquire()
            .await
            .map_err(|_| CollaboratorError::Request("call limiter closed".to_string()))
    }
}

struct LimitedCompletion {
    inner: Arc<dyn TextCompletion>,
    limiter: CallLimiter,
}

#[async_trait]
impl TextCompletion for LimitedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CollaboratorError> {
        let _permit = self.limiter.acquire().await?;
        self.inner.complete(request).await
    }
}

struct LimitedPlaces {
    inner: Arc<dyn PlacesService>,
    limiter: CallLimiter,
}

#[async_trait]
impl PlacesService for LimitedPlaces {
    async fn geocode(&self, address: &str) -> Result<Option<GeocodeResult>, CollaboratorError> {
        let _permit = self.limiter.acquire().await?;
        self.inner.geocode(address).await
    }

    async fn nearby_search(
        &self,
        center: Coordinates,
        radius: u32,
        keyword: &str,
    ) -> Result<Vec<PlaceSummary>, CollaboratorError> {
        let _permit = self.limiter.acquire().await?;
        self.inner.nearby_search(center, radius, keyword).await
    }

    async fn place_details(&self, place_id: &str) -> Result<Place, CollaboratorError> {
        let _permit = self.limiter.acquire().await?;
        self.inner.place_details(place_id).await
    }
}
