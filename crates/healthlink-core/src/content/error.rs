//! Content store error types.

use thiserror::Error;

/// Errors from the pinning service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PinError {
    /// API credentials are missing; no request was made.
    #[error("content store credentials are not configured")]
    NotConfigured,

    /// The service rejected the credentials.
    #[error("content store rejected the credentials")]
    Unauthorized,

    /// The content identifier is not pinned.
    #[error("content {cid} not found")]
    NotFound {
        /// Content identifier.
        cid: String,
    },

    /// The service rejected the request.
    #[error("content store error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Service message.
        message: String,
    },

    /// Network failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A response body could not be parsed.
    #[error("malformed response: {0}")]
    Parse(String),
}

impl PinError {
    /// Classifies a non-success HTTP response.
    #[must_use]
    pub fn from_status(status: u16, body: &str, cid: Option<&str>) -> Self {
        match (status, cid) {
            (401 | 403, _) => Self::Unauthorized,
            (404, Some(cid)) => Self::NotFound {
                cid: cid.to_string(),
            },
            _ => Self::Api {
                status,
                message: body.trim().chars().take(512).collect(),
            },
        }
    }
}

impl From<reqwest::Error> for PinError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for PinError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(PinError::from_status(401, "", None), PinError::Unauthorized);
        assert_eq!(
            PinError::from_status(404, "", Some("Qm1")),
            PinError::NotFound { cid: "Qm1".into() }
        );
        assert_eq!(
            PinError::from_status(404, " gone ", None),
            PinError::Api {
                status: 404,
                message: "gone".into()
            }
        );
    }
}
