//! Reply composition for search turns.
//!
//! Produces one markdown narrative from the resolved query, the enriched
//! places and the analysis payload. Structure is deterministic; only the
//! closing line is drawn from the composer's random source, which can be
//! seeded.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use citypulse_core::types::{Place, ResolvedQuery};

use crate::analysis::AnalysisPayload;

/// Friendly closing invitations.
pub const CLOSINGS: &[&str] = &[
    "Let me know if you'd like more details about any of these places!",
    "Want me to look somewhere else or narrow things down?",
    "Happy to dig deeper into any of these if you're curious.",
    "Enjoy your outing, and tell me if you need anything else!",
    "Would you like similar options in a different area?",
];

const MAX_FEATURES: usize = 3;

pub struct ResponseComposer {
    rng: Mutex<StdRng>,
    places_described: usize,
}

impl ResponseComposer {
    pub fn new(places_described: usize) -> Self {
        Self::with_seed(places_described, rand::rng().random())
    }

    /// A composer whose closing-line choices are reproducible.
    pub fn with_seed(places_described: usize, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            places_described,
        }
    }

    /// Compose the reply for a search that found `places`.
    pub fn compose(
        &self,
        resolved: &ResolvedQuery,
        places: &[Place],
        analysis: &AnalysisPayload,
    ) -> String {
        let mut sections = Vec::new();
        sections.push(format!(
            "I found some places matching your search for {} in {}.",
            describe(&resolved.amenity, &resolved.requirements),
            resolved.location_label()
        ));
        if !analysis.summary.is_empty() {
            sections.push(analysis.summary.clone());
        }

        for place in places.iter().take(self.places_described) {
            sections.push(describe_place(place, analysis));
        }

        if let Some(comparison) = analysis.comparisons.iter().find(|c| !c.trim().is_empty()) {
            sections.push(ensure_period(comparison.trim()));
        }
        sections.push(self.closing().to_string());

        sections.join("\n\n")
    }

    /// Narrative persisted as the assistant turn of a search.
    pub fn summary_line(&self, resolved: &ResolvedQuery) -> String {
        format!(
            "Based on your query, I found information about {} in {}. Here's what I found:",
            resolved.keyword,
            resolved.location_label()
        )
    }

    /// Reply for a search that returned nothing.
    pub fn no_results(&self, resolved: &ResolvedQuery) -> String {
        format!(
            "I searched for {} within {}km of {}, but couldn't find any matches. \
             Try broadening your search or trying a different location.",
            resolved.keyword,
            f64::from(resolved.radius) / 1000.0,
            resolved.location_label()
        )
    }

    fn closing(&self) -> &'static str {
        let index = match self.rng.lock() {
            Ok(mut rng) => rng.random_range(0..CLOSINGS.len()),
            Err(_) => 0,
        };
        CLOSINGS[index]
    }
}

impl Default for ResponseComposer {
    fn default() -> Self {
        Self::new(4)
    }
}

/// "dog-friendly cafe", unless the amenity already carries the requirement.
fn describe(amenity: &str, requirements: &str) -> String {
    let req = requirements.trim();
    let marker = req
        .split(|c: char| c == '-' || c.is_whitespace())
        .find(|s| !s.is_empty())
        .map(str::to_lowercase);
    match marker {
        Some(m) if !amenity.to_lowercase().contains(&m) => format!("{} {}", req, amenity),
        _ => amenity.to_string(),
    }
}

fn describe_place(place: &Place, analysis: &AnalysisPayload) -> String {
    let mut lines = vec![format!("**{}**", place.name)];

    let mut blurb = match analysis.features_for(&place.name) {
        Some(features) => {
            let mut text = format!("Highlights include {}.", join_list(features));
            if let Some(rating) = place.rating {
                text.push_str(&format!(" It holds a {:.1}-star rating.", rating));
            }
            text
        }
        None => rating_comment(place.rating),
    };
    if !place.address.is_empty() {
        blurb.push_str(&format!(" You'll find it at {}.", place.address.trim_end_matches('.')));
    }
    lines.push(blurb);

    if let Some(amenities) = analysis
        .amenities
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&place.name))
        .map(|(_, list)| list)
    {
        lines.push(format!("Amenities: {}.", amenities.join(", ")));
    }
    if let Some(info) = analysis
        .practical_info
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(&place.name))
        .map(|(_, info)| info)
    {
        lines.push(format!("Good to know: {}", ensure_period(info)));
    }

    lines.join("\n")
}

fn rating_comment(rating: Option<f32>) -> String {
    match rating {
        Some(r) if r >= 4.5 => format!("A local favourite with an excellent {:.1}-star rating.", r),
        Some(r) if r >= 4.0 => format!("Well regarded, with a solid {:.1}-star rating.", r),
        Some(r) => format!("Rated {:.1} stars by visitors.", r),
        None => "A local option worth a look.".to_string(),
    }
}

fn join_list(items: &[String]) -> String {
    let items: Vec<&str> = items
        .iter()
        .map(|s| s.trim().trim_end_matches('.'))
        .filter(|s| !s.is_empty())
        .take(MAX_FEATURES)
        .collect();
    match items.as_slice() {
        [] => String::new(),
        [one] => one.to_string(),
        [init @ .., last] => format!("{} and {}", init.join(", "), last),
    }
}

fn ensure_period(text: &str) -> String {
    if text.ends_with(['.', '!', '?']) {
        text.to_string()
    } else {
        format!("{}.", text)
    }
}
