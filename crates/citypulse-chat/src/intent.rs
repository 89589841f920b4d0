//! Turn classification.
//!
//! Classification runs as a small state machine. Each [`Stage`] produces an
//! [`Outcome`], and [`transition`] maps `(stage, outcome, screening)` to the
//! next stage or a final [`Intent`]:
//!
//! ```text
//! KeywordScreen -> FollowUpScreen -> IndicatorScreen -> CompletionScreen
//!                        |                 |                  |
//!                        +---- leaning ----+---- leaning -----+--> MoreInfoCheck
//!                                                                    |
//!                                            MoreInfoDisambiguation <+
//! ```
//!
//! Cheap regex stages run first; the text-completion collaborator is only
//! consulted for ambiguous long messages and for more-info phrasing.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, warn};

use citypulse_core::types::{Intent, Message, Role};

use crate::collaborator::{CompletionRequest, TextCompletion};

/// Messages with more words than this are escalated to the completion
/// service when no regex stage fired.
const ESCALATION_MIN_WORDS: usize = 3;
/// Prior messages included in the disambiguation prompt.
const DISAMBIGUATION_HISTORY: usize = 6;

// =============================================================================
// Compiled regex sets
// =============================================================================

struct ScreenPatterns {
    keywords: Regex,
    follow_up: Vec<Regex>,
    location: Regex,
    place_type: Regex,
    amenity: Regex,
    verb: Regex,
    preposition: Regex,
    more_info: Vec<Regex>,
}

static PATTERNS: LazyLock<ScreenPatterns> = LazyLock::new(|| {
    let mk = |pats: &[&str]| -> Vec<Regex> {
        pats.iter()
            .map(|p| Regex::new(p).expect("Invalid intent regex"))
            .collect()
    };
    let one = |p: &str| Regex::new(p).expect("Invalid intent regex");

    ScreenPatterns {
        keywords: one(
            r"(?i)\b(?:find|where|locations?|places?|nearby|restaurants?|cafes?|bars?)\b",
        ),
        follow_up: mk(&[
            r"(?i)\b(?:what|how)\s+about\s+(?:in|at|near|around)\s+\w+",
            r"(?i)\b(?:any|anything|some)\s+(?:in|at|near|around)\s+\w+",
            r"(?i)\bsimilar\s+(?:ones?\s+|places?\s+)?(?:in|at|near|around)\s+\w+",
            r"(?i)\b(?:and|also)\s+in\s+\w+\s*\??$",
        ]),
        location: one(
            r"\b(?:in|at|near|around)\s+(?:the\s+)?[A-Z][a-zA-Z]+|(?i:\bnear\s+(?:me|here)\b)|(?i:\b(?:in|around)\s+(?:the\s+)?(?:city|cbd|sydney)\b)",
        ),
        place_type: one(
            r"(?i)\b(?:restaurants?|cafes?|coffee|bars?|pubs?|parks?|gyms?|shops?|stores?|bakery|bakeries|beach(?:es)?|museums?|galler(?:y|ies)|hotels?|spots?|venues?|brewer(?:y|ies)|beer\s+gardens?)\b",
        ),
        amenity: one(
            r"(?i)\b(?:dog[\s-]?friendly|pet[\s-]?friendly|family[\s-]?friendly|kid[\s-]?friendly|cheap|affordable|outdoor|rooftop|quiet|cos[yz]|vegan|vegetarian|gluten[\s-]?free|wi-?fi|open\s+late|best|popular)\b",
        ),
        verb: one(
            r"(?i)\b(?:find|search(?:ing)?\s+for|look(?:ing)?\s+for|recommend|suggest|show\s+me|where\s+(?:can|should|is|are))\b",
        ),
        preposition: one(r"(?i)\b(?:in|at|near|around)\b"),
        more_info: mk(&[
            r"(?i)\btell\s+me\s+more\b",
            r"(?i)\bwhat\s+do\s+you\s+know\s+about\b",
            r"(?i)\bmore\s+(?:info|information|details)\b",
            r"(?i)\bcan\s+you\s+tell\s+me\s+about\b",
            r"(?i)\bwhat(?:'s|\s+is)\s+(?:it|that(?:\s+place)?)\s+like\b",
        ]),
    }
});

// =============================================================================
// State machine
// =============================================================================

/// Classification stages, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    KeywordScreen,
    FollowUpScreen,
    IndicatorScreen,
    CompletionScreen,
    MoreInfoCheck,
    MoreInfoDisambiguation,
}

/// Result of evaluating one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Match,
    NoMatch,
    /// Disambiguation answered "new search".
    NewSearch,
    /// Disambiguation answered "more info about a mentioned place".
    MoreInfo,
    /// Disambiguation reply was missing or unrecognised.
    Unclear,
}

/// Flags accumulated while screening.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Screening {
    pub search_leaning: bool,
    pub follow_up: bool,
}

impl Screening {
    fn search_intent(&self) -> Intent {
        if self.follow_up {
            Intent::FollowupNewSearch
        } else {
            Intent::NewSearch
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Goto(Stage),
    Finish(Intent),
}

/// The transition table.
pub fn transition(stage: Stage, outcome: Outcome, screening: Screening) -> (Screening, Transition) {
    use Outcome::*;
    use Stage::*;
    use Transition::*;

    let mut s = screening;
    let screen = matches!(
        stage,
        KeywordScreen | FollowUpScreen | IndicatorScreen | CompletionScreen
    );
    if screen && outcome == Match {
        s.search_leaning = true;
    }
    if stage == FollowUpScreen && outcome == Match {
        s.follow_up = true;
    }

    let next = match (stage, outcome) {
        (KeywordScreen, _) => Goto(FollowUpScreen),
        (FollowUpScreen, _) | (IndicatorScreen, _) if s.search_leaning => Goto(MoreInfoCheck),
        (FollowUpScreen, _) => Goto(IndicatorScreen),
        (IndicatorScreen, _) => Goto(CompletionScreen),
        (CompletionScreen, Match) => Goto(MoreInfoCheck),
        (CompletionScreen, _) => Finish(Intent::GeneralChat),
        (MoreInfoCheck, Match) => Goto(MoreInfoDisambiguation),
        (MoreInfoCheck, _) => Finish(s.search_intent()),
        (MoreInfoDisambiguation, NewSearch) => Finish(s.search_intent()),
        (MoreInfoDisambiguation, MoreInfo) => Finish(Intent::FollowupMoreInfo),
        (MoreInfoDisambiguation, _) => Finish(Intent::GeneralChat),
    };
    (s, next)
}

/// Final classification plus the path taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub intent: Intent,
    /// A follow-up pattern ("what about in X") matched.
    pub follow_up: bool,
    pub visited: Vec<Stage>,
}

// =============================================================================
// Classifier
// =============================================================================

/// Decides what kind of turn a message is.
#[derive(Clone)]
pub struct IntentClassifier {
    completion: Option<Arc<dyn TextCompletion>>,
}

impl IntentClassifier {
    pub fn new(completion: Option<Arc<dyn TextCompletion>>) -> Self {
        Self { completion }
    }

    pub async fn classify(&self, message: &str, history: &[Message]) -> Intent {
        self.classify_detailed(message, history).await.intent
    }

    /// Run the state machine to completion.
    ///
    /// `history` is the session history before `message` was appended.
    pub async fn classify_detailed(&self, message: &str, history: &[Message]) -> Classification {
        let mut stage = Stage::KeywordScreen;
        let mut screening = Screening::default();
        let mut visited = Vec::new();

        loop {
            visited.push(stage);
            let outcome = self.evaluate(stage, message, history).await;
            let (next_screening, next) = transition(stage, outcome, screening);
            screening = next_screening;
            match next {
                Transition::Goto(next_stage) => stage = next_stage,
                Transition::Finish(intent) => {
                    debug!(?intent, follow_up = screening.follow_up, stages = visited.len(), "Classified message");
                    return Classification {
                        intent,
                        follow_up: screening.follow_up,
                        visited,
                    };
                }
            }
        }
    }

    async fn evaluate(&self, stage: Stage, message: &str, history: &[Message]) -> Outcome {
        let hit = |b: bool| if b { Outcome::Match } else { Outcome::NoMatch };
        match stage {
            Stage::KeywordScreen => hit(PATTERNS.keywords.is_match(message)),
            Stage::FollowUpScreen => hit(is_follow_up(message)),
            Stage::IndicatorScreen => hit(indicators_confirm_search(message)),
            Stage::CompletionScreen => {
                if message.split_whitespace().count() > ESCALATION_MIN_WORDS {
                    hit(self.ask_is_search(message).await)
                } else {
                    Outcome::NoMatch
                }
            }
            Stage::MoreInfoCheck => hit(PATTERNS.more_info.iter().any(|re| re.is_match(message))),
            Stage::MoreInfoDisambiguation => self.disambiguate(message, history).await,
        }
    }

    async fn ask_is_search(&self, message: &str) -> bool {
        let Some(completion) = &self.completion else {
            return PATTERNS.preposition.is_match(message);
        };
        let prompt = format!(
            "Is the following message asking to find a place, venue or business, or for \
             information about one? Answer with only \"yes\" or \"no\".\n\nMessage: \"{}\"",
            message
        );
        let request = CompletionRequest::prompt(prompt)
            .with_temperature(0.0)
            .with_max_tokens(3);
        match completion.complete(request).await {
            Ok(reply) => reply.to_lowercase().contains("yes"),
            Err(e) => {
                warn!(error = %e, "Search check failed, using preposition heuristic");
                PATTERNS.preposition.is_match(message)
            }
        }
    }

    async fn disambiguate(&self, message: &str, history: &[Message]) -> Outcome {
        let Some(completion) = &self.completion else {
            return Outcome::Unclear;
        };

        let context: Vec<String> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .rev()
            .take(DISAMBIGUATION_HISTORY)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect();

        let prompt = format!(
            "Conversation so far:\n{}\n\nLatest user message: \"{}\"\n\n\
             Classify the latest message:\n\
             A = a new search for places\n\
             B = a request for more information about a place already mentioned\n\
             Respond with a single letter: A or B.",
            context.join("\n"),
            message
        );
        let request = CompletionRequest::prompt(prompt)
            .with_temperature(0.0)
            .with_max_tokens(1);

        match completion.complete(request).await {
            Ok(reply) => parse_letter(&reply),
            Err(e) => {
                warn!(error = %e, "More-info disambiguation failed");
                Outcome::Unclear
            }
        }
    }
}

/// True when a follow-up phrase such as "what about in Newtown" matches.
pub fn is_follow_up(message: &str) -> bool {
    PATTERNS.follow_up.iter().any(|re| re.is_match(message))
}

/// The weighted indicator rule over the four regex categories.
pub fn indicators_confirm_search(message: &str) -> bool {
    let location = PATTERNS.location.is_match(message);
    let place_type = PATTERNS.place_type.is_match(message);
    let amenity = PATTERNS.amenity.is_match(message);
    let verb = PATTERNS.verb.is_match(message);
    let matched = [location, place_type, amenity, verb]
        .iter()
        .filter(|m| **m)
        .count();

    matched >= 2 || location || (place_type && amenity) || verb
}

fn parse_letter(reply: &str) -> Outcome {
    match reply.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
        Some('A') => Outcome::NewSearch,
        Some('B') => Outcome::MoreInfo,
        _ => Outcome::Unclear,
    }
}
