//! Session repository.
//!
//! Each session is one row holding the ordered message history as a JSON
//! array. History is append-only; the only other mutation is [`trim`],
//! which drops the oldest non-protected messages and persists the result.
//!
//! [`trim`]: SessionRepository::trim

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::OptionalExtension;
use tracing::{debug, info};
use uuid::Uuid;

use citypulse_core::error::CityPulseError;
use citypulse_core::types::{Message, Role, Session, SYSTEM_PROMPT};

use crate::db::Database;

/// Messages always kept by a places-preserving trim, counted from the end.
const PRESERVED_TAIL: usize = 4;
/// Messages always kept by a plain trim, counted from the end.
const MIN_TAIL: usize = 2;

/// Repository for conversation sessions.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    db: Arc<Database>,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a message, creating the session (seeded with the system
    /// message) if it does not exist. Returns the updated history.
    pub fn append(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
    ) -> Result<Vec<Message>, CityPulseError> {
        self.append_at(session_id, role, content, Utc::now())
    }

    /// [`append`](Self::append) with an explicit activity timestamp.
    pub fn append_at(
        &self,
        session_id: &str,
        role: Role,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>, CityPulseError> {
        self.db.with_conn(|conn| {
            let existing = load_row(conn, session_id)?;
            let (created_at, mut messages) = match existing {
                Some((created_at, messages)) => (created_at, messages),
                None => {
                    debug!(session_id, "Creating session");
                    (now.timestamp(), vec![Message::system(SYSTEM_PROMPT)])
                }
            };
            messages.push(Message::new(role, content));
            upsert_row(conn, session_id, created_at, now.timestamp(), &messages)?;
            Ok(messages)
        })
    }

    /// Read the ordered history. Unknown sessions yield an empty list.
    pub fn read(&self, session_id: &str) -> Result<Vec<Message>, CityPulseError> {
        self.db.with_conn(|conn| {
            Ok(load_row(conn, session_id)?
                .map(|(_, messages)| messages)
                .unwrap_or_default())
        })
    }

    /// Read the full session record including timestamps.
    pub fn session(&self, session_id: &str) -> Result<Option<Session>, CityPulseError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT created_at, last_activity, conversation_json
                 FROM sessions WHERE session_id = ?1",
                rusqlite::params![session_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| CityPulseError::Storage(format!("Failed to load session: {}", e)))?
            .map(|(created, last, json)| -> Result<Session, CityPulseError> {
                Ok(Session {
                    id: session_id.to_string(),
                    messages: serde_json::from_str(&json)?,
                    created_at: from_epoch(created),
                    last_activity: from_epoch(last),
                })
            })
            .transpose()
        })
    }

    /// Trim history to roughly `max_tokens` (estimated as characters / 4)
    /// and persist the result.
    ///
    /// The leading system message is always kept. With `preserve_places`,
    /// the latest results-announcing assistant message, the user message
    /// before it and the last four messages all survive regardless of
    /// budget. Otherwise at least the last two messages survive. Eviction
    /// proceeds from the oldest remaining message.
    pub fn trim(
        &self,
        session_id: &str,
        max_tokens: usize,
        preserve_places: bool,
    ) -> Result<Vec<Message>, CityPulseError> {
        self.db.with_conn(|conn| {
            let Some((created_at, messages)) = load_row(conn, session_id)? else {
                return Ok(Vec::new());
            };

            let trimmed = trim_messages(&messages, max_tokens, preserve_places);
            if trimmed.len() != messages.len() {
                debug!(
                    session_id,
                    before = messages.len(),
                    after = trimmed.len(),
                    "Trimmed session history"
                );
                let last_activity = last_activity_of(conn, session_id)?;
                upsert_row(conn, session_id, created_at, last_activity, &trimmed)?;
            }
            Ok(trimmed)
        })
    }

    /// Delete sessions idle for more than `days` days. Returns the count.
    pub fn cleanup_older_than(&self, days: u32) -> Result<usize, CityPulseError> {
        self.cleanup_before(Utc::now() - Duration::days(i64::from(days)))
    }

    /// Delete sessions whose last activity is strictly before `cutoff`.
    pub fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<usize, CityPulseError> {
        let deleted = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM sessions WHERE last_activity < ?1",
                rusqlite::params![cutoff.timestamp()],
            )
            .map_err(|e| CityPulseError::Storage(format!("Failed to clean up sessions: {}", e)))
        })?;
        if deleted > 0 {
            info!(deleted, "Removed idle sessions");
        }
        Ok(deleted)
    }
}

/// Mint an opaque 32-hex-character session id from the client identity,
/// the current time and a random nonce.
pub fn generate_session_id(ip: Option<&str>, user_agent: Option<&str>) -> String {
    let material = format!(
        "{}-{}-{}-{}",
        Utc::now().timestamp_micros(),
        ip.unwrap_or("unknown"),
        user_agent.unwrap_or(""),
        Uuid::new_v4()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, material.as_bytes())
        .simple()
        .to_string()
}

// =============================================================================
// Helpers
// =============================================================================

fn trim_messages(messages: &[Message], max_tokens: usize, preserve_places: bool) -> Vec<Message> {
    let (system, rest) = match messages.first() {
        Some(first) if first.role == Role::System => (Some(first), &messages[1..]),
        _ => (None, messages),
    };

    let budget = max_tokens.saturating_mul(4);
    let mut total: usize = rest.iter().map(Message::char_len).sum();
    if total <= budget {
        return messages.to_vec();
    }

    let n = rest.len();
    let mut protected = vec![false; n];
    let tail = if preserve_places { PRESERVED_TAIL } else { MIN_TAIL };
    for flag in protected.iter_mut().skip(n.saturating_sub(tail)) {
        *flag = true;
    }
    if preserve_places {
        if let Some(results_idx) = rest.iter().rposition(Message::announces_results) {
            protected[results_idx] = true;
            if let Some(user_idx) = rest[..results_idx]
                .iter()
                .rposition(|m| m.role == Role::User)
            {
                protected[user_idx] = true;
            }
        }
    }

    let mut keep = vec![true; n];
    for (i, message) in rest.iter().enumerate() {
        if total <= budget {
            break;
        }
        if !protected[i] {
            keep[i] = false;
            total -= message.char_len();
        }
    }

    system
        .into_iter()
        .cloned()
        .chain(
            rest.iter()
                .zip(keep)
                .filter_map(|(m, k)| k.then(|| m.clone())),
        )
        .collect()
}

fn load_row(
    conn: &rusqlite::Connection,
    session_id: &str,
) -> Result<Option<(i64, Vec<Message>)>, CityPulseError> {
    let row = conn
        .query_row(
            "SELECT created_at, conversation_json FROM sessions WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()
        .map_err(|e| CityPulseError::Storage(format!("Failed to load session: {}", e)))?;

    match row {
        Some((created_at, json)) => Ok(Some((created_at, serde_json::from_str(&json)?))),
        None => Ok(None),
    }
}

fn last_activity_of(conn: &rusqlite::Connection, session_id: &str) -> Result<i64, CityPulseError> {
    conn.query_row(
        "SELECT last_activity FROM sessions WHERE session_id = ?1",
        rusqlite::params![session_id],
        |row| row.get(0),
    )
    .map_err(|e| CityPulseError::Storage(format!("Failed to load session: {}", e)))
}

fn upsert_row(
    conn: &rusqlite::Connection,
    session_id: &str,
    created_at: i64,
    last_activity: i64,
    messages: &[Message],
) -> Result<(), CityPulseError> {
    let json = serde_json::to_string(messages)?;
    conn.execute(
        "INSERT INTO sessions (session_id, created_at, last_activity, conversation_json)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(session_id) DO UPDATE SET
            conversation_json = excluded.conversation_json,
            last_activity = excluded.last_activity",
        rusqlite::params![session_id, created_at, last_activity, json],
    )
    .map_err(|e| CityPulseError::Storage(format!("Failed to save session: {}", e)))?;
    Ok(())
}

fn from_epoch(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> SessionRepository {
        SessionRepository::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn filler(n: usize) -> String {
        "x".repeat(n)
    }

    // ---- append / read ----

    #[test]
    fn test_append_seeds_system_message() {
        let repo = repo();
        let history = repo.append("s1", Role::User, "hello").unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::System);
        assert_eq!(history[0].content, SYSTEM_PROMPT);
        assert_eq!(history[1], Message::user("hello"));
    }

    #[test]
    fn test_append_preserves_order() {
        let repo = repo();
        repo.append("s1", Role::User, "one").unwrap();
        repo.append("s1", Role::Assistant, "two").unwrap();
        let history = repo.append("s1", Role::User, "three").unwrap();

        let contents: Vec<&str> = history.iter().skip(1).map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(history.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[test]
    fn test_read_unknown_session_is_empty() {
        let repo = repo();
        assert!(repo.read("nope").unwrap().is_empty());
        assert!(repo.session("nope").unwrap().is_none());
    }

    #[test]
    fn test_consecutive_reads_identical() {
        let repo = repo();
        repo.append("s1", Role::User, "cafes in Newtown").unwrap();
        repo.append("s1", Role::Assistant, "I found some places").unwrap();

        let first = repo.read("s1").unwrap();
        let second = repo.read("s1").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let repo = repo();
        repo.append("a", Role::User, "alpha").unwrap();
        repo.append("b", Role::User, "beta").unwrap();

        assert_eq!(repo.read("a").unwrap()[1].content, "alpha");
        assert_eq!(repo.read("b").unwrap()[1].content, "beta");
    }

    #[test]
    fn test_session_timestamps() {
        let repo = repo();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        let t1 = t0 + Duration::minutes(5);
        repo.append_at("s1", Role::User, "hi", t0).unwrap();
        repo.append_at("s1", Role::Assistant, "hello", t1).unwrap();

        let session = repo.session("s1").unwrap().unwrap();
        assert_eq!(session.id, "s1");
        assert_eq!(session.created_at, t0);
        assert_eq!(session.last_activity, t1);
        assert_eq!(session.messages.len(), 3);
    }

    // ---- trim ----

    #[test]
    fn test_trim_under_budget_is_unchanged() {
        let repo = repo();
        repo.append("s1", Role::User, "short").unwrap();
        let before = repo.read("s1").unwrap();
        let trimmed = repo.trim("s1", 3000, true).unwrap();
        assert_eq!(trimmed, before);
    }

    #[test]
    fn test_trim_unknown_session_is_empty() {
        let repo = repo();
        assert!(repo.trim("missing", 10, true).unwrap().is_empty());
    }

    #[test]
    fn test_trim_without_preservation_keeps_last_two() {
        let repo = repo();
        for i in 0..6 {
            repo.append("s1", Role::User, &format!("{}{}", i, filler(99)))
                .unwrap();
        }
        let trimmed = repo.trim("s1", 1, false).unwrap();

        assert_eq!(trimmed.len(), 3);
        assert_eq!(trimmed[0].role, Role::System);
        assert!(trimmed[1].content.starts_with('4'));
        assert!(trimmed[2].content.starts_with('5'));
    }

    #[test]
    fn test_trim_evicts_oldest_first() {
        let repo = repo();
        // Three messages of 40 chars each: 120 chars, budget 20 tokens = 80 chars.
        repo.append("s1", Role::User, &format!("a{}", filler(39))).unwrap();
        repo.append("s1", Role::Assistant, &format!("b{}", filler(39))).unwrap();
        repo.append("s1", Role::User, &format!("c{}", filler(39))).unwrap();

        let trimmed = repo.trim("s1", 20, false).unwrap();
        assert_eq!(trimmed.len(), 3);
        assert!(trimmed[1].content.starts_with('b'));
        assert!(trimmed[2].content.starts_with('c'));
    }

    #[test]
    fn test_trim_preserves_results_pair() {
        let repo = repo();
        repo.append("s1", Role::User, "dog friendly cafes in Newtown").unwrap();
        repo.append(
            "s1",
            Role::Assistant,
            "I found some places matching your search in Newtown...",
        )
        .unwrap();
        for i in 0..8 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            repo.append("s1", role, &format!("chatter {} {}", i, filler(200)))
                .unwrap();
        }

        let trimmed = repo.trim("s1", 50, true).unwrap();

        assert_eq!(trimmed[0].role, Role::System);
        assert!(trimmed
            .iter()
            .any(|m| m.content == "dog friendly cafes in Newtown"));
        assert!(trimmed.iter().any(|m| m.announces_results()));
        // Results pair plus the last four messages.
        assert_eq!(trimmed.len(), 1 + 2 + 4);
        assert!(trimmed.last().unwrap().content.starts_with("chatter 7"));
    }

    #[test]
    fn test_trim_persists_result() {
        let repo = repo();
        for i in 0..6 {
            repo.append("s1", Role::User, &format!("{}{}", i, filler(99)))
                .unwrap();
        }
        let trimmed = repo.trim("s1", 1, false).unwrap();
        assert_eq!(repo.read("s1").unwrap(), trimmed);
    }

    #[test]
    fn test_trim_keeps_last_activity() {
        let repo = repo();
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();
        for i in 0..5 {
            repo.append_at("s1", Role::User, &format!("{}{}", i, filler(99)), t0)
                .unwrap();
        }
        repo.trim("s1", 1, false).unwrap();
        assert_eq!(repo.session("s1").unwrap().unwrap().last_activity, t0);
    }

    // ---- cleanup ----

    #[test]
    fn test_cleanup_before_removes_idle_sessions() {
        let repo = repo();
        let old = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let recent = old + Duration::days(10);
        repo.append_at("old", Role::User, "hi", old).unwrap();
        repo.append_at("recent", Role::User, "hi", recent).unwrap();

        let deleted = repo.cleanup_before(old + Duration::days(7)).unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.read("old").unwrap().is_empty());
        assert_eq!(repo.read("recent").unwrap().len(), 2);
    }

    #[test]
    fn test_cleanup_older_than_keeps_active_sessions() {
        let repo = repo();
        repo.append("fresh", Role::User, "hi").unwrap();
        repo.append_at(
            "stale",
            Role::User,
            "hi",
            Utc::now() - Duration::days(8),
        )
        .unwrap();

        assert_eq!(repo.cleanup_older_than(7).unwrap(), 1);
        assert_eq!(repo.read("fresh").unwrap().len(), 2);
    }

    // ---- session ids ----

    #[test]
    fn test_generate_session_id_format() {
        let id = generate_session_id(Some("10.0.0.1"), Some("Mozilla/5.0"));
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_session_id_unique() {
        let a = generate_session_id(Some("10.0.0.1"), Some("ua"));
        let b = generate_session_id(Some("10.0.0.1"), Some("ua"));
        assert_ne!(a, b);
        assert_eq!(generate_session_id(None, None).len(), 32);
    }
}
