//! Ledger access: the health-record contract behind a wallet bridge.
//!
//! # Architecture
//!
//! ```text
//! LedgerClient (trait)
//!     |
//!     +-- ContractLedgerClient
//!     |       |
//!     |       +-- WalletBridge (trait, EIP-1193 request channel)
//!     |       |       +-- JsonRpcBridge (HTTP JSON-RPC)
//!     |       |
//!     |       +-- contract (call encoders / return decoders)
//!     |               +-- abi (Solidity ABI codec)
//!     |
//!     +-- InMemoryLedger (tests, offline use)
//! ```
//!
//! The contract is the system of record for vitals, document indexes and
//! doctor access lists. Writes are attributed to the wallet's active
//! account; there is no way to act on behalf of another address.

pub mod abi;
pub mod address;
mod bridge;
mod client;
pub mod contract;
mod error;
mod memory;
mod types;

pub use address::{AddressError, WalletAddress};
pub use bridge::{JsonRpcBridge, WalletBridge};
pub use client::{
    ContractLedgerClient, DEFAULT_RECEIPT_POLL_ATTEMPTS, DEFAULT_RECEIPT_POLL_INTERVAL,
    LedgerClient,
};
pub use error::{
    ChainError, EXECUTION_REVERTED_CODE, REQUEST_PENDING_CODE, UNAUTHORIZED_CODE,
    USER_REJECTED_CODE,
};
pub use memory::{InMemoryLedger, LedgerOp};
pub use types::{
    DEFAULT_HEIGHT_CM, DoctorDetails, DoctorRegistration, DocumentRecord, PatientDetails,
    TxReceipt, VitalRecord,
};
