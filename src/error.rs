use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The identity service or data store rejected the request.
    #[error("{operation} failed: {detail}")]
    Service {
        operation: &'static str,
        status: Option<u16>,
        detail: String,
    },
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("Rate limited by the remote service")]
    RateLimited,
    /// An operation that needs a session was called without one.
    #[error("No active session")]
    MissingSession,
    #[error("Storage error: {0}")]
    Storage(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Text suitable for showing to the person using the app.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Service { detail, .. } if !detail.is_empty() => detail.clone(),
            Self::Timeout { .. } => "The request took too long. Please try again.".into(),
            Self::RateLimited => "Too many attempts. Please wait a moment and try again.".into(),
            Self::MissingSession => "You are not signed in.".into(),
            #[cfg(feature = "http")]
            Self::Http(_) => "Could not reach the server. Check your connection.".into(),
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_detail_is_shown_to_user() {
        let err = Error::Service {
            operation: "sign in",
            status: Some(400),
            detail: "Invalid login credentials".into(),
        };
        assert_eq!(err.user_message(), "Invalid login credentials");
        assert_eq!(err.to_string(), "sign in failed: Invalid login credentials");
    }

    #[test]
    fn empty_service_detail_falls_back() {
        let err = Error::Service {
            operation: "sign in",
            status: Some(500),
            detail: String::new(),
        };
        assert_eq!(err.user_message(), "Something went wrong. Please try again.");
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = Error::Timeout {
            operation: "get session",
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "get session timed out after 30s");
        assert!(err.user_message().contains("too long"));
    }
}
