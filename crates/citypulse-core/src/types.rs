use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persona message seeded at index 0 of every new session.
pub const SYSTEM_PROMPT: &str = "You are CityPulse, a helpful assistant for finding local \
information and answering questions about places in Sydney. Provide detailed and helpful responses.";

/// Phrases that mark an assistant message as announcing search results.
pub const RESULTS_MARKERS: &[&str] = &[
    "I found some places",
    "I found information about",
    "Here's what I found",
    "places matching your search",
];

// =============================================================================
// Conversation
// =============================================================================

/// Author of a conversation message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation message. Immutable once appended to a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// True for assistant messages containing one of [`RESULTS_MARKERS`].
    pub fn announces_results(&self) -> bool {
        self.role == Role::Assistant
            && RESULTS_MARKERS.iter().any(|m| self.content.contains(m))
    }

    /// Approximate size used for token budgeting.
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// A persisted conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

// =============================================================================
// Search resolution
// =============================================================================

/// Classification of a user turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    NewSearch,
    FollowupMoreInfo,
    FollowupNewSearch,
    GeneralChat,
}

impl Intent {
    /// Whether this intent runs the place-search branch of the pipeline.
    pub fn is_search(&self) -> bool {
        matches!(self, Intent::NewSearch | Intent::FollowupNewSearch)
    }
}

/// Last resolved search parameters for a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchContext {
    pub amenity: String,
    pub requirements: String,
    pub query: String,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Radius bucket assigned to a resolved location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSpecificity {
    GeocodedSuburb,
    GeocodedBroadArea,
    GeocodedSpecific,
    DefaultCbd,
}

impl LocationSpecificity {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSpecificity::GeocodedSuburb => "geocoded_suburb",
            LocationSpecificity::GeocodedBroadArea => "geocoded_broad_area",
            LocationSpecificity::GeocodedSpecific => "geocoded_specific",
            LocationSpecificity::DefaultCbd => "default_cbd",
        }
    }
}

/// Fully resolved parameters for one search turn. Never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedQuery {
    pub amenity: String,
    pub requirements: String,
    /// Lowercased location text, or `default`.
    pub location: String,
    pub coordinates: Coordinates,
    /// Search radius in metres.
    pub radius: u32,
    pub specificity: LocationSpecificity,
    /// Keyword sent to the place-search service.
    pub keyword: String,
}

impl ResolvedQuery {
    /// Human-readable name of the searched area.
    pub fn location_label(&self) -> String {
        if self.specificity == LocationSpecificity::DefaultCbd || self.location == "default" {
            "Sydney CBD".to_string()
        } else {
            title_case(&self.location)
        }
    }
}

// =============================================================================
// Places
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub author: String,
    pub rating: Option<f32>,
    pub text: String,
}

/// A place record as returned by the place-search collaborator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub place_id: String,
    pub name: String,
    pub address: String,
    pub rating: Option<f32>,
    pub total_ratings: Option<u32>,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    pub location: Option<Coordinates>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub price_level: Option<u8>,
    #[serde(default)]
    pub opening_hours: Vec<String>,
}

/// Capitalise the first letter of each whitespace-separated word.
pub fn title_case(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
