//! Slot extraction from free text via the text-completion collaborator.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use citypulse_core::types::Message;

use crate::collaborator::{CompletionRequest, TextCompletion};
use crate::error::ChatError;

const EXTRACTION_SYSTEM: &str = "You are a helpful assistant that extracts search criteria \
(amenity, requirements, location) from user queries about finding places.";

/// Structured search slots pulled out of one query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedSlots {
    pub amenity: String,
    pub requirements: String,
    /// Location text or the literal `default`.
    pub location: String,
    pub follow_up: bool,
    /// Set only on [`ExtractedSlots::fallback`]; its `places` amenity is a
    /// placeholder rather than something the user asked for.
    #[serde(skip)]
    pub defaulted: bool,
}

impl ExtractedSlots {
    /// Values used whenever extraction cannot run or cannot be parsed.
    pub fn fallback() -> Self {
        Self {
            amenity: "places".to_string(),
            requirements: String::new(),
            location: "default".to_string(),
            follow_up: false,
            defaulted: true,
        }
    }
}

pub struct SlotExtractor {
    completion: Option<Arc<dyn TextCompletion>>,
}

impl SlotExtractor {
    pub fn new(completion: Option<Arc<dyn TextCompletion>>) -> Self {
        Self { completion }
    }

    /// Extract slots. Never fails: any collaborator or parse failure yields
    /// [`ExtractedSlots::fallback`].
    pub async fn extract(&self, query: &str) -> ExtractedSlots {
        match self.try_extract(query).await {
            Ok(slots) => {
                debug!(
                    amenity = %slots.amenity,
                    requirements = %slots.requirements,
                    location = %slots.location,
                    follow_up = slots.follow_up,
                    "Extracted slots"
                );
                slots
            }
            Err(e) => {
                warn!(error = %e, "Slot extraction failed, using fallback slots");
                ExtractedSlots::fallback()
            }
        }
    }

    async fn try_extract(&self, query: &str) -> Result<ExtractedSlots, ChatError> {
        let completion = self
            .completion
            .as_ref()
            .ok_or_else(|| ChatError::CollaboratorUnavailable("text completion".to_string()))?;

        let request = CompletionRequest::new(vec![
            Message::system(EXTRACTION_SYSTEM),
            Message::user(extraction_prompt(query)),
        ])
        .with_temperature(0.0);

        let reply = completion.complete(request).await?;
        parse_reply(&reply)
    }
}

fn extraction_prompt(query: &str) -> String {
    format!(
        "Extract search information from this query: \"{}\"\n\
         Format your response EXACTLY like this, with ONLY these lines:\n\
         amenity: [the specific type of place or business being sought, e.g. 'cafe', 'restaurant', 'park']\n\
         requirements: [specific requirements or preferences mentioned, e.g. 'dog-friendly', 'outdoor seating', 'cheap']\n\
         location: [the specific suburb or area, or 'Sydney' if general. Use 'default' ONLY if no location is mentioned.]\n\
         follow_up: [yes if the query refers back to an earlier search, otherwise no]",
        query
    )
}

/// Parse the labelled-lines reply.
///
/// Each line is split on its first `": "`. `none`, `[none]`, `[]` and
/// `not specified` become empty; other values lose surrounding brackets
/// and whitespace but keep their case. A reply without any recognised
/// label is a parse failure.
pub fn parse_reply(reply: &str) -> Result<ExtractedSlots, ChatError> {
    let mut amenity = None;
    let mut requirements = None;
    let mut location = None;
    let mut follow_up = false;

    for line in reply.lines() {
        let Some((key, value)) = line.split_once(": ") else {
            continue;
        };
        let value = normalize_value(value);
        match key.trim().trim_start_matches(['-', '*', ' ']).to_lowercase().as_str() {
            "amenity" => amenity = Some(value),
            "requirements" => requirements = Some(value),
            "location" => location = Some(value),
            "follow_up" | "follow-up" => {
                follow_up = matches!(value.to_lowercase().as_str(), "yes" | "true")
            }
            _ => {}
        }
    }

    if amenity.is_none() && requirements.is_none() && location.is_none() {
        return Err(ChatError::ExtractionParse(format!(
            "no labelled lines in reply: {:.80}",
            reply
        )));
    }

    Ok(ExtractedSlots {
        amenity: amenity.unwrap_or_default(),
        requirements: requirements.unwrap_or_default(),
        location: location
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| "default".to_string()),
        follow_up,
        defaulted: false,
    })
}

fn normalize_value(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "none" | "[none]" | "[]" | "not specified" | "[not specified]" => String::new(),
        _ => trimmed
            .trim_matches(|c| c == '[' || c == ']')
            .trim()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::mock::ScriptedCompletion;

    #[test]
    fn test_parse_full_reply() {
        let slots = parse_reply(
            "amenity: [Cafe]\nrequirements: [dog-friendly]\nlocation: [Newtown]\nfollow_up: no",
        )
        .unwrap();
        assert_eq!(slots.amenity, "Cafe");
        assert_eq!(slots.requirements, "dog-friendly");
        assert_eq!(slots.location, "Newtown");
        assert!(!slots.follow_up);
        assert!(!slots.defaulted);
    }

    #[test]
    fn test_parsed_places_is_not_defaulted() {
        let slots = parse_reply("amenity: places
requirements: none
location: Glebe").unwrap();
        assert_eq!(slots.amenity, "places");
        assert!(!slots.defaulted);
        assert!(ExtractedSlots::fallback().defaulted);
    }

    #[test]
    fn test_parse_normalizes_empty_markers() {
        let slots = parse_reply(
            "amenity: none\nrequirements: [none]\nlocation: Surry Hills\nfollow_up: yes",
        )
        .unwrap();
        assert_eq!(slots.amenity, "");
        assert_eq!(slots.requirements, "");
        assert!(slots.follow_up);

        let slots = parse_reply("amenity: Not Specified\nrequirements: []\nlocation: Glebe").unwrap();
        assert_eq!(slots.amenity, "");
        assert_eq!(slots.requirements, "");
    }

    #[test]
    fn test_parse_missing_location_defaults() {
        let slots = parse_reply("amenity: bar\nrequirements: rooftop").unwrap();
        assert_eq!(slots.location, "default");

        let slots = parse_reply("amenity: bar\nlocation: none").unwrap();
        assert_eq!(slots.location, "default");
    }

    #[test]
    fn test_parse_splits_on_first_separator_only() {
        let slots = parse_reply("amenity: bar: rooftop\nlocation: CBD").unwrap();
        assert_eq!(slots.amenity, "bar: rooftop");
    }

    #[test]
    fn test_parse_free_text_is_error() {
        let result = parse_reply("Sure! You are looking for a cafe.");
        assert!(matches!(result, Err(ChatError::ExtractionParse(_))));
    }

    #[tokio::test]
    async fn test_extract_uses_completion() {
        let completion = Arc::new(ScriptedCompletion::always(
            "amenity: beer garden\nrequirements: none\nlocation: Paddington",
        ));
        let extractor = SlotExtractor::new(Some(completion.clone()));
        let slots = extractor.extract("beer gardens in Paddington").await;

        assert_eq!(slots.amenity, "beer garden");
        assert_eq!(slots.location, "Paddington");
        let request = &completion.requests()[0];
        assert!(request.last_content().contains("beer gardens in Paddington"));
    }

    #[tokio::test]
    async fn test_extract_failure_falls_back() {
        let extractor = SlotExtractor::new(Some(Arc::new(ScriptedCompletion::failing())));
        assert_eq!(extractor.extract("anything").await, ExtractedSlots::fallback());

        let extractor = SlotExtractor::new(None);
        assert_eq!(extractor.extract("anything").await, ExtractedSlots::fallback());

        let extractor =
            SlotExtractor::new(Some(Arc::new(ScriptedCompletion::always("I can't help"))));
        assert_eq!(extractor.extract("anything").await, ExtractedSlots::fallback());
    }
}
