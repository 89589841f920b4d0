//! Error types for the search-resolution pipeline.

use citypulse_core::error::CityPulseError;

use crate::collaborator::CollaboratorError;

/// Errors from a chat turn.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("extraction parse failure: {0}")]
    ExtractionParse(String),
    #[error("analysis parse failure: {0}")]
    AnalysisParse(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CityPulseError> for ChatError {
    fn from(err: CityPulseError) -> Self {
        match err {
            CityPulseError::Storage(_) | CityPulseError::Io(_) | CityPulseError::Serialization(_) => {
                ChatError::StorageUnavailable(err.to_string())
            }
            other => ChatError::Internal(other.to_string()),
        }
    }
}

impl From<CollaboratorError> for ChatError {
    fn from(err: CollaboratorError) -> Self {
        ChatError::CollaboratorUnavailable(err.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Internal(format!("background task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        let err = ChatError::MissingInput("No session ID provided".to_string());
        assert_eq!(err.to_string(), "missing input: No session ID provided");

        let err = ChatError::MessageTooLong(2000);
        assert_eq!(
            err.to_string(),
            "message exceeds maximum length of 2000 characters"
        );

        let err = ChatError::CollaboratorUnavailable("maps".to_string());
        assert_eq!(err.to_string(), "collaborator unavailable: maps");

        let err = ChatError::ExtractionParse("no amenity line".to_string());
        assert_eq!(err.to_string(), "extraction parse failure: no amenity line");

        let err = ChatError::AnalysisParse("not json".to_string());
        assert_eq!(err.to_string(), "analysis parse failure: not json");
    }

    #[test]
    fn test_storage_errors_map_to_storage_unavailable() {
        let chat_err: ChatError = CityPulseError::Storage("connection lost".to_string()).into();
        assert!(matches!(chat_err, ChatError::StorageUnavailable(_)));
        assert!(chat_err.to_string().contains("connection lost"));

        let chat_err: ChatError = CityPulseError::Serialization("bad json".to_string()).into();
        assert!(matches!(chat_err, ChatError::StorageUnavailable(_)));
    }

    #[test]
    fn test_other_core_errors_map_to_internal() {
        let chat_err: ChatError = CityPulseError::Config("bad".to_string()).into();
        assert!(matches!(chat_err, ChatError::Internal(_)));
    }

    #[test]
    fn test_collaborator_error_maps_to_unavailable() {
        let chat_err: ChatError = CollaboratorError::NotConfigured("maps").into();
        assert!(matches!(chat_err, ChatError::CollaboratorUnavailable(_)));
    }
}
