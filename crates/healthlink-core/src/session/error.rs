//! Wallet connection outcomes.

use thiserror::Error;

use crate::ledger::ChainError;

/// Why `connect_wallet` did not produce an address.
///
/// Declining the wallet prompt is an expected user action, so each cause is
/// distinguishable and none of them is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum WalletConnectError {
    /// No wallet bridge is installed or reachable.
    #[error("no wallet available")]
    BridgeUnavailable,

    /// The user declined the connection prompt.
    #[error("wallet connection declined")]
    UserDeclined,

    /// The bridge connected but reported no account.
    #[error("wallet has no account")]
    NoAccount,

    /// Any other bridge failure.
    #[error("wallet error: {0}")]
    Bridge(ChainError),
}

impl WalletConnectError {
    /// Short machine-readable reason.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::BridgeUnavailable => "unavailable",
            Self::UserDeclined => "declined",
            Self::NoAccount => "no_account",
            Self::Bridge(_) => "bridge_error",
        }
    }
}

impl From<ChainError> for WalletConnectError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::BridgeUnavailable => Self::BridgeUnavailable,
            ChainError::UserRejected | ChainError::Unauthorized => Self::UserDeclined,
            ChainError::NotConnected => Self::NoAccount,
            other => Self::Bridge(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_not_declined() {
        let unavailable = WalletConnectError::from(ChainError::BridgeUnavailable);
        let declined = WalletConnectError::from(ChainError::UserRejected);
        assert_eq!(unavailable.reason(), "unavailable");
        assert_eq!(declined.reason(), "declined");
        assert_ne!(unavailable, declined);
    }

    #[test]
    fn test_other_errors_wrapped() {
        let err = WalletConnectError::from(ChainError::RequestPending);
        assert_eq!(err, WalletConnectError::Bridge(ChainError::RequestPending));
        assert_eq!(err.reason(), "bridge_error");
    }
}
