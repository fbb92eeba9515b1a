//! Session reconciliation between the identity provider and the wallet.
//!
//! [`SessionManager`] is the one process-wide session object. It composes an
//! [`IdentityProviderClient`](crate::identity::IdentityProviderClient) with a
//! [`LedgerClient`](crate::ledger::LedgerClient) and exposes a single
//! [`SessionSnapshot`] that is always role-consistent.
//!
//! # State Machine
//!
//! ```text
//!  ┌───────────────┐  init   ┌─────────┐  identity fetch settles
//!  │ Uninitialized │────────►│ Loading │──────────────┬──────────────┐
//!  └───────────────┘         └─────────┘              │              │
//!                                                     ▼              ▼
//!                                   ┌────────────────────────┐  ┌───────────┐
//!                    sign-in /      │ Authenticated          │  │ Anonymous │
//!                    refresh   ┌───►│   Loaded | Missing(..) │◄─┤           │
//!                              │    └───────────┬────────────┘  └───────────┘
//!                              │                │ sign-out           ▲
//!                              └────────────────┴────────────────────┘
//!
//!  wallet (orthogonal):  Disconnected ──probe / connect_wallet──► Connected(addr)
//! ```
//!
//! # Ordering
//!
//! | Flow | Guard | Stale result |
//! |------|-------|--------------|
//! | `refresh()` | ticket drawn at start | dropped if a newer refresh committed |
//! | session event | refresh, or anonymous commit with a ticket | same |
//! | wallet probe | snapshot generation at spawn | dropped if the identity changed |
//!
//! Probes are read-only (`active_address`); only
//! [`SessionManager::connect_wallet`] prompts the user. Sign-out leaves the
//! wallet sub-state untouched.

mod error;
mod manager;
mod state;

#[cfg(test)]
mod tests;

pub use error::WalletConnectError;
pub use manager::SessionManager;
pub use state::{MissingReason, ProfileStatus, SessionPhase, SessionSnapshot, WalletState};
