//! Identity provider error types.

use serde::Deserialize;
use thiserror::Error;

use crate::validation::ValidationError;

/// Errors from the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Email/password did not match.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// The account exists but its email address was never confirmed.
    #[error("email address not confirmed")]
    EmailNotConfirmed,

    /// No valid session, or the session was rejected.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The operation targets a different identity than the active session.
    #[error("identity {requested} does not match the active session")]
    SessionMismatch {
        /// Identity the caller asked to modify.
        requested: String,
    },

    /// The requested record does not exist.
    #[error("{what} not found")]
    NotFound {
        /// What was looked up.
        what: String,
    },

    /// Input failed validation before any request was made.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The provider rejected the request.
    #[error("identity provider error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// Network failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response body could not be parsed.
    #[error("malformed response: {0}")]
    Parse(String),
}

/// Fields the provider uses to describe an error, across its auth and
/// REST surfaces.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn text(&self) -> Option<&str> {
        self.error_description
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.message.as_deref())
            .or(self.error.as_deref())
    }

    fn code(&self) -> Option<&str> {
        self.error_code
            .as_deref()
            .or_else(|| self.code.as_ref().and_then(serde_json::Value::as_str))
            .or(self.error.as_deref())
    }
}

impl AuthError {
    /// Classifies a non-success HTTP response.
    ///
    /// `what` names the resource for [`AuthError::NotFound`].
    #[must_use]
    pub fn from_response(status: u16, body: &str, what: &str) -> Self {
        let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
        let text = parsed.text().unwrap_or(body).trim().to_string();
        let lowered = text.to_ascii_lowercase();
        let code = parsed.code().unwrap_or_default();

        if code == "email_not_confirmed" || lowered.contains("email not confirmed") {
            return Self::EmailNotConfirmed;
        }
        if code == "invalid_credentials"
            || (status == 400 && code == "invalid_grant")
            || lowered.contains("invalid login credentials")
        {
            return Self::InvalidCredentials;
        }
        match status {
            401 | 403 => Self::NotAuthenticated,
            // PostgREST answers 406 when a single-object request matched no row
            404 | 406 => Self::NotFound {
                what: what.to_string(),
            },
            _ => Self::Api {
                status,
                message: if text.is_empty() {
                    format!("http {status}")
                } else {
                    text
                },
            },
        }
    }

    /// Returns `true` for [`AuthError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_grant_is_bad_credentials() {
        let body = r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#;
        assert_eq!(
            AuthError::from_response(400, body, "user"),
            AuthError::InvalidCredentials
        );
    }

    #[test]
    fn test_unconfirmed_email() {
        let body = r#"{"code":400,"error_code":"email_not_confirmed","msg":"Email not confirmed"}"#;
        assert_eq!(
            AuthError::from_response(400, body, "user"),
            AuthError::EmailNotConfirmed
        );
    }

    #[test]
    fn test_postgrest_single_row_miss_is_not_found() {
        let body = r#"{"code":"PGRST116","message":"JSON object requested, multiple (or no) rows returned"}"#;
        let err = AuthError::from_response(406, body, "doctor profile");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "doctor profile not found");
    }

    #[test]
    fn test_unauthorized_and_other_statuses() {
        assert_eq!(
            AuthError::from_response(401, "{}", "user"),
            AuthError::NotAuthenticated
        );
        assert_eq!(
            AuthError::from_response(503, "upstream unavailable", "profile"),
            AuthError::Api {
                status: 503,
                message: "upstream unavailable".into()
            }
        );
        assert_eq!(
            AuthError::from_response(500, "", "profile"),
            AuthError::Api {
                status: 500,
                message: "http 500".into()
            }
        );
    }
}
