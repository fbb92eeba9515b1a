//! Identity, role and auth-session types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use crate::ledger::WalletAddress;

/// Opaque identifier assigned by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Wraps a provider-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account role, fixed at sign-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A patient who owns health records.
    Patient,
    /// A doctor who reads records shared with them.
    Doctor,
}

impl Role {
    /// Decodes the role stored in identity metadata.
    ///
    /// A missing role means [`Role::Patient`]. Unknown values also fall back
    /// to `Patient` and are logged, since the metadata bag is free-form.
    #[must_use]
    pub fn from_metadata(value: Option<&str>) -> Self {
        match value {
            None => Self::Patient,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(role = raw, "unknown role in identity metadata, using patient");
                Self::Patient
            }),
        }
    }

    /// Lowercase wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Doctor => "doctor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "patient" => Ok(Self::Patient),
            "doctor" => Ok(Self::Doctor),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The canonical account record held by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Immutable provider id.
    pub id: IdentityId,
    /// Sign-in email.
    pub email: String,
    /// Role decoded from metadata.
    pub role: Role,
    /// Wallet address attributed to this account, if any.
    pub wallet_address: Option<WalletAddress>,
    /// Account creation time.
    pub created_at: DateTime<Utc>,
}

/// An authenticated session.
///
/// Tokens are held as [`SecretString`] and never appear in `Debug` output.
#[derive(Clone)]
pub struct AuthSession {
    /// Bearer token for provider requests.
    pub access_token: SecretString,
    /// Token used to obtain a new access token.
    pub refresh_token: SecretString,
    /// When the access token expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// The signed-in identity.
    pub identity: Identity,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Kind of session transition reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEventKind {
    /// A user signed in.
    SignedIn,
    /// The user signed out or the session was invalidated.
    SignedOut,
    /// The access token was refreshed.
    TokenRefreshed,
    /// The user's account record changed.
    UserUpdated,
    /// A password-recovery link was followed.
    PasswordRecovery,
}

/// A session-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    /// What happened.
    pub kind: AuthEventKind,
    /// Identity of the session after the change, `None` when signed out.
    pub identity: Option<Identity>,
}

impl AuthEvent {
    /// Builds an event carrying a session.
    #[must_use]
    pub fn with_identity(kind: AuthEventKind, identity: Identity) -> Self {
        Self {
            kind,
            identity: Some(identity),
        }
    }

    /// Builds a signed-out event.
    #[must_use]
    pub const fn signed_out() -> Self {
        Self {
            kind: AuthEventKind::SignedOut,
            identity: None,
        }
    }
}

/// Why a [`SessionSubscription`] stopped yielding an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The receiver fell behind and missed this many events.
    Lagged(u64),
    /// The provider dropped its sender.
    Closed,
}

/// Handle returned by `on_session_change`.
///
/// Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct SessionSubscription {
    receiver: broadcast::Receiver<AuthEvent>,
}

impl SessionSubscription {
    /// Wraps a broadcast receiver.
    #[must_use]
    pub fn new(receiver: broadcast::Receiver<AuthEvent>) -> Self {
        Self { receiver }
    }

    /// Waits for the next event.
    pub async fn recv(&mut self) -> Result<AuthEvent, SubscriptionError> {
        self.receiver.recv().await.map_err(|err| match err {
            broadcast::error::RecvError::Lagged(missed) => SubscriptionError::Lagged(missed),
            broadcast::error::RecvError::Closed => SubscriptionError::Closed,
        })
    }

    /// Unsubscribes explicitly.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
