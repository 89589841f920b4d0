//! Follow-up repair.
//!
//! Fills slots the extractor left empty, in order: the session's cached
//! search context, then a scan of the session history, then static
//! fallbacks. Every resolved search is written back to the cache.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info};

use citypulse_core::types::{Intent, Message, Role, SearchContext};

use crate::context_cache::ContextStore;
use crate::extractor::ExtractedSlots;

// =============================================================================
// Keyword tables
// =============================================================================

/// Primary amenity keywords, checked in order.
const PRIMARY_AMENITIES: &[(&str, &str)] = &[
    ("beer garden", "beer garden"),
    ("pub", "beer garden"),
    ("cafe", "cafe"),
    ("coffee", "cafe"),
    ("restaurant", "restaurant"),
    ("food", "restaurant"),
    ("bar", "bar"),
];

/// Broader categories consulted when no primary keyword matches.
const BROAD_AMENITIES: &[(&str, &str)] = &[
    ("park", "park"),
    ("gym", "gym"),
    ("shop", "shop"),
    ("store", "shop"),
    ("bakery", "bakery"),
    ("bakeries", "bakery"),
    ("beach", "beach"),
    ("museum", "museum"),
    ("gallery", "gallery"),
];

const CUISINES: &[&str] = &[
    "thai",
    "italian",
    "chinese",
    "japanese",
    "indian",
    "vietnamese",
    "mexican",
    "korean",
    "greek",
    "lebanese",
];

struct KeywordTables {
    primary: Vec<(Regex, &'static str)>,
    broad: Vec<(Regex, String)>,
    requirements: Vec<(Regex, &'static str)>,
}

static TABLES: LazyLock<KeywordTables> = LazyLock::new(|| {
    let word = |kw: &str| {
        Regex::new(&format!(r"(?i)\b{}(?:s|es)?\b", regex::escape(kw)))
            .expect("Invalid amenity regex")
    };

    let mut broad: Vec<(Regex, String)> = BROAD_AMENITIES
        .iter()
        .map(|(kw, amenity)| (word(kw), amenity.to_string()))
        .collect();
    broad.extend(
        CUISINES
            .iter()
            .map(|c| (word(c), format!("{} restaurant", c))),
    );

    KeywordTables {
        primary: PRIMARY_AMENITIES
            .iter()
            .map(|(kw, amenity)| (word(kw), *amenity))
            .collect(),
        broad,
        requirements: vec![
            (
                Regex::new(r"(?i)\b(?:dogs?|pets?)\b").expect("Invalid requirement regex"),
                "dog-friendly",
            ),
            (
                Regex::new(r"(?i)\b(?:family|families|kids?|child|children)\b")
                    .expect("Invalid requirement regex"),
                "family-friendly",
            ),
            (
                Regex::new(r"(?i)\b(?:wi-?fi|internet)\b").expect("Invalid requirement regex"),
                "wifi",
            ),
        ],
    }
});

/// Map free text to an amenity using the primary, then the broad table.
pub fn amenity_from_text(text: &str) -> Option<String> {
    TABLES
        .primary
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, amenity)| amenity.to_string())
        .or_else(|| {
            TABLES
                .broad
                .iter()
                .find(|(re, _)| re.is_match(text))
                .map(|(_, amenity)| amenity.clone())
        })
}

/// Map free text to a requirement keyword.
pub fn requirement_from_text(text: &str) -> Option<&'static str> {
    TABLES
        .requirements
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, req)| *req)
}

/// Build the place-search keyword, appending the requirement unless its
/// leading word already appears in the amenity.
pub fn build_keyword(amenity: &str, requirements: &str) -> String {
    let req = requirements.trim();
    if req.is_empty() {
        return amenity.to_string();
    }
    let marker = req
        .split(|c: char| c == '-' || c.is_whitespace())
        .find(|s| !s.is_empty())
        .unwrap_or(req)
        .to_lowercase();
    if amenity.to_lowercase().contains(&marker) {
        amenity.to_string()
    } else if amenity.is_empty() {
        req.replace('-', " ")
    } else {
        format!("{} {}", amenity, req.replace('-', " "))
    }
}

fn is_unspecified(slots: &ExtractedSlots) -> bool {
    let a = slots.amenity.trim().to_lowercase();
    a.is_empty() || a == "not specified" || slots.defaulted
}

// =============================================================================
// Resolver
// =============================================================================

/// Where the final amenity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    Extracted,
    Cache,
    History,
    Fallback,
}

/// Slots after follow-up repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSlots {
    pub amenity: String,
    pub requirements: String,
    /// Lowercased location text, or `default`.
    pub location: String,
    /// Place-search keyword built from amenity and requirements.
    pub keyword: String,
    pub source: SlotSource,
}

impl ResolvedSlots {
    /// The cache entry recorded once a search for these slots succeeds.
    pub fn to_context(&self, query: &str, now: DateTime<Utc>) -> SearchContext {
        SearchContext {
            amenity: self.amenity.clone(),
            requirements: self.requirements.clone(),
            query: query.to_string(),
            resolved_at: now,
        }
    }
}

pub struct ContextResolver {
    store: Arc<dyn ContextStore>,
}

impl ContextResolver {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    /// Repair `slots` for the turn carrying `query`. The cache is only
    /// read here; callers record the outcome with
    /// [`ResolvedSlots::to_context`] after the search runs.
    ///
    /// `history` may end with the current query; that message is skipped
    /// during the history scan.
    pub fn resolve(
        &self,
        session_id: &str,
        query: &str,
        slots: ExtractedSlots,
        intent: Intent,
        history: &[Message],
        now: DateTime<Utc>,
    ) -> ResolvedSlots {
        let mut amenity = slots.amenity.trim().to_string();
        let mut requirements = slots.requirements.trim().to_string();
        if requirements.is_empty() {
            if let Some(req) = requirement_from_text(query) {
                debug!(requirement = req, "Requirement found in query text");
                requirements = req.to_string();
            }
        }

        let unspecified = is_unspecified(&slots);
        let needs_context = unspecified || slots.follow_up || intent == Intent::FollowupNewSearch;
        let mut source = SlotSource::Extracted;

        if needs_context {
            if unspecified {
                amenity.clear();
            }
            if let Some(cached) = self.store.get(session_id, now) {
                info!(session_id, amenity = %cached.amenity, "Filling slots from cached context");
                fill(&mut amenity, &cached.amenity);
                fill(&mut requirements, &cached.requirements);
                source = SlotSource::Cache;
            } else if let Some(prior) = prior_search_text(query, history) {
                let before = (amenity.is_empty(), requirements.is_empty());
                if let Some(found) = amenity_from_text(prior) {
                    fill(&mut amenity, &found);
                }
                if let Some(req) = requirement_from_text(prior) {
                    fill(&mut requirements, req);
                }
                if before != (amenity.is_empty(), requirements.is_empty()) {
                    info!(session_id, amenity = %amenity, "Filling slots from session history");
                    source = SlotSource::History;
                }
            }
            if amenity.is_empty() {
                amenity = "places".to_string();
                source = SlotSource::Fallback;
            }
        }

        let location = match slots.location.trim().to_lowercase() {
            l if l.is_empty() => "default".to_string(),
            l => l,
        };
        let keyword = build_keyword(&amenity, &requirements);

        ResolvedSlots {
            amenity,
            requirements,
            location,
            keyword,
            source,
        }
    }
}

fn fill(slot: &mut String, value: &str) {
    if slot.is_empty() && !value.trim().is_empty() {
        *slot = value.trim().to_string();
    }
}

/// The user message that led to the most recent results announcement.
fn prior_search_text<'a>(query: &str, history: &'a [Message]) -> Option<&'a str> {
    let prior = match history.split_last() {
        Some((last, rest)) if last.role == Role::User && last.content == query => rest,
        _ => history,
    };
    let results_idx = prior.iter().rposition(Message::announces_results)?;
    prior[..results_idx]
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.as_str())
}
