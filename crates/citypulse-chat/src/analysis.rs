//! Place analysis requested from the text-completion collaborator.
//!
//! The reply is asked to be JSON but is never trusted to be: parsing tries
//! a fenced ```json block, then the raw text, then the outermost braces,
//! and finally keeps the first 500 characters as a plain summary.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use citypulse_core::types::{Message, Place};

use crate::collaborator::{CompletionRequest, TextCompletion};
use crate::error::ChatError;

const SUMMARY_FALLBACK_CHARS: usize = 500;
const REVIEWS_PER_PLACE: usize = 2;

const ANALYST_SYSTEM: &str = "You are a knowledgeable local expert who provides clear, \
practical recommendations based on real experiences and reviews.";

static JSON_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("Invalid fence regex"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceHighlight {
    pub place: String,
    pub features: Vec<String>,
}

/// Structured analysis of a set of places. Every field may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisPayload {
    pub summary: String,
    pub highlights: Vec<PlaceHighlight>,
    pub comparisons: Vec<String>,
    /// Place name to notable amenities.
    pub amenities: HashMap<String, Vec<String>>,
    /// Place name to practical notes (hours, booking, parking).
    pub practical_info: HashMap<String, String>,
}

impl AnalysisPayload {
    /// Parse a reply as structured analysis.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let mut candidates: Vec<&str> = Vec::new();
        if let Some(fenced) = JSON_FENCE.captures(text).and_then(|c| c.get(1)) {
            candidates.push(fenced.as_str());
        }
        candidates.push(text.trim());
        if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
            if start < end {
                candidates.push(&text[start..=end]);
            }
        }

        candidates
            .into_iter()
            .filter_map(|c| serde_json::from_str::<Value>(c.trim()).ok())
            .find(Value::is_object)
            .map(|v| Self::from_value(&v))
            .ok_or_else(|| ChatError::AnalysisParse("reply contained no JSON object".to_string()))
    }

    /// [`parse`](Self::parse), falling back to a summary-only payload.
    pub fn parse_or_fallback(text: &str) -> Self {
        match Self::parse(text) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Analysis was not structured, keeping it as summary");
                Self {
                    summary: text.trim().chars().take(SUMMARY_FALLBACK_CHARS).collect(),
                    ..Self::default()
                }
            }
        }
    }

    /// Lenient conversion: accepts strings where lists are expected and
    /// `name` where `place` is expected.
    fn from_value(value: &Value) -> Self {
        let summary = value
            .get("summary")
            .map(text_of)
            .unwrap_or_default();

        let highlights = value
            .get("highlights")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        let place = item
                            .get("place")
                            .or_else(|| item.get("name"))
                            .and_then(Value::as_str)?;
                        Some(PlaceHighlight {
                            place: place.to_string(),
                            features: item.get("features").map(list_of).unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let comparisons = value.get("comparisons").map(list_of).unwrap_or_default();

        let amenities = value
            .get("amenities")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(place, v)| (place.clone(), list_of(v)))
                    .filter(|(_, list)| !list.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let practical_info = value
            .get("practical_info")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(place, v)| (place.clone(), text_of(v)))
                    .filter(|(_, text)| !text.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            summary,
            highlights,
            comparisons,
            amenities,
            practical_info,
        }
    }

    /// Highlight features for `place`, matched case-insensitively.
    pub fn features_for(&self, place: &str) -> Option<&[String]> {
        self.highlights
            .iter()
            .find(|h| h.place.eq_ignore_ascii_case(place))
            .map(|h| h.features.as_slice())
            .filter(|f| !f.is_empty())
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn list_of(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .map(text_of)
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

// =============================================================================
// Analyzer
// =============================================================================

/// Requests and parses the analysis of enriched places.
pub struct PlaceAnalyzer {
    completion: Option<Arc<dyn TextCompletion>>,
}

impl PlaceAnalyzer {
    pub fn new(completion: Option<Arc<dyn TextCompletion>>) -> Self {
        Self { completion }
    }

    /// Analyse `places` for `query`. Collaborator failure yields an empty
    /// payload; the composer copes with every field missing.
    pub async fn analyze(
        &self,
        query: &str,
        keyword: &str,
        requirements: &str,
        location_label: &str,
        places: &[Place],
    ) -> AnalysisPayload {
        let Some(completion) = &self.completion else {
            return AnalysisPayload::default();
        };

        let prompt = build_prompt(query, keyword, requirements, location_label, places);
        let request = CompletionRequest::new(vec![
            Message::system(ANALYST_SYSTEM),
            Message::user(prompt),
        ])
        .with_temperature(0.7);

        match completion.complete(request).await {
            Ok(reply) => {
                let payload = AnalysisPayload::parse_or_fallback(&reply);
                debug!(
                    highlights = payload.highlights.len(),
                    comparisons = payload.comparisons.len(),
                    "Parsed analysis"
                );
                payload
            }
            Err(e) => {
                warn!(error = %e, "Analysis request failed");
                AnalysisPayload::default()
            }
        }
    }
}

fn build_prompt(
    query: &str,
    keyword: &str,
    requirements: &str,
    location_label: &str,
    places: &[Place],
) -> String {
    let listing: Vec<String> = places
        .iter()
        .map(|p| {
            let rating = p
                .rating
                .map(|r| format!("{:.1}", r))
                .unwrap_or_else(|| "N/A".to_string());
            let price = p
                .price_level
                .map(|n| "$".repeat(n as usize))
                .unwrap_or_else(|| "N/A".to_string());
            let reviews: Vec<String> = p
                .reviews
                .iter()
                .take(REVIEWS_PER_PLACE)
                .map(|r| format!("- \"{}\"", r.text))
                .collect();
            format!(
                "=== {} ===\nRating: {} ({} reviews)\nAddress: {}\nPrice: {}\nReviews:\n{}",
                p.name,
                rating,
                p.total_ratings.unwrap_or(0),
                p.address,
                price,
                reviews.join("\n")
            )
        })
        .collect();

    format!(
        "As a local expert, analyse these places in response to: \"{query}\"\n\n\
         The user is looking for: {keyword}\n\
         With these requirements: {requirements}\n\
         In this location: {location_label}\n\n\
         Places:\n{places}\n\n\
         Respond with a JSON object inside a ```json block with these keys:\n\
         \"summary\": 2-3 sentences answering the query,\n\
         \"highlights\": [{{\"place\": name, \"features\": [short phrases matching the requirements]}}],\n\
         \"comparisons\": [short sentences comparing places],\n\
         \"amenities\": {{place name: [notable amenities]}},\n\
         \"practical_info\": {{place name: opening hours, booking or parking notes}}",
        places = listing.join("\n\n")
    )
}
