//! Ledger error types.

use thiserror::Error;

use super::abi::{AbiError, decode_revert_reason};

/// EIP-1193: the user rejected the request.
pub const USER_REJECTED_CODE: i64 = 4001;

/// EIP-1193: the requested account or method is not authorized.
pub const UNAUTHORIZED_CODE: i64 = 4100;

/// A request of the same kind is already pending in the wallet.
pub const REQUEST_PENDING_CODE: i64 = -32002;

/// JSON-RPC code nodes use for `eth_call` reverts.
pub const EXECUTION_REVERTED_CODE: i64 = 3;

/// Errors from the wallet bridge or the health-record contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ChainError {
    /// No wallet bridge is configured or reachable.
    #[error("no wallet bridge available")]
    BridgeUnavailable,

    /// The bridge has no connected account.
    #[error("wallet is not connected")]
    NotConnected,

    /// The user declined the request in their wallet.
    #[error("request rejected by user")]
    UserRejected,

    /// The wallet refused to expose the account or method.
    #[error("wallet request unauthorized")]
    Unauthorized,

    /// The wallet already has an identical request awaiting the user.
    #[error("a wallet request is already pending")]
    RequestPending,

    /// The contract reverted the call.
    #[error("contract reverted{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    Reverted {
        /// Decoded revert message, when the node returned one.
        reason: Option<String>,
    },

    /// The transaction was mined but its status is failure.
    #[error("transaction {tx_hash} failed")]
    TransactionFailed {
        /// Transaction hash.
        tx_hash: String,
    },

    /// No receipt appeared within the polling window.
    #[error("no receipt for transaction {tx_hash} after {attempts} attempts")]
    ReceiptTimeout {
        /// Transaction hash.
        tx_hash: String,
        /// Number of polls made.
        attempts: u32,
    },

    /// Any other JSON-RPC error.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the node or wallet.
        message: String,
    },

    /// Network failure talking to the bridge.
    #[error("transport error: {0}")]
    Transport(String),

    /// The bridge returned a response of the wrong shape.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Contract return data could not be decoded.
    #[error("abi decode error: {0}")]
    Abi(#[from] AbiError),
}

impl ChainError {
    /// Classifies a JSON-RPC error object.
    ///
    /// `data` is the optional `error.data` field; for reverts it usually
    /// carries the hex-encoded `Error(string)` payload.
    #[must_use]
    pub fn from_rpc(code: i64, message: &str, data: Option<&serde_json::Value>) -> Self {
        match code {
            USER_REJECTED_CODE => Self::UserRejected,
            UNAUTHORIZED_CODE => Self::Unauthorized,
            REQUEST_PENDING_CODE => Self::RequestPending,
            _ if code == EXECUTION_REVERTED_CODE || message.contains("revert") => {
                let reason = data
                    .and_then(serde_json::Value::as_str)
                    .and_then(|raw| hex::decode(raw.trim_start_matches("0x")).ok())
                    .and_then(|payload| decode_revert_reason(&payload))
                    .or_else(|| {
                        message
                            .split_once("reverted:")
                            .map(|(_, reason)| reason.trim().to_string())
                    });
                Self::Reverted { reason }
            },
            _ => Self::Rpc {
                code,
                message: message.to_string(),
            },
        }
    }

    /// Returns `true` if the user declined the request.
    #[must_use]
    pub const fn is_user_rejection(&self) -> bool {
        matches!(self, Self::UserRejected)
    }
}

impl From<reqwest::Error> for ChainError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}
