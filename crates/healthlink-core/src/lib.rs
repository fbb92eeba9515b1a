#![allow(clippy::doc_markdown)]
#![allow(clippy::too_long_first_doc_paragraph)]

//! healthlink-core - patient/doctor health records over an identity
//! provider, a smart-contract ledger and a content store.
//!
//! Three external systems back the record flows:
//!
//! | System | Trait | Production client | Holds |
//! |--------|-------|-------------------|-------|
//! | Identity provider | [`identity::IdentityProviderClient`] | [`identity::SupabaseIdentityClient`] | accounts, role profiles, access audit rows |
//! | Ledger | [`ledger::LedgerClient`] | [`ledger::ContractLedgerClient`] | vitals, document index, access lists |
//! | Content store | [`content::ContentStoreClient`] | [`content::PinataClient`] | document bytes |
//!
//! Each trait has an in-memory implementation with failure injection so the
//! flows can be exercised without network access.
//!
//! # Modules
//!
//! - [`validation`]: field validators shared by forms and drafts
//! - [`identity`]: accounts, sessions, role profiles
//! - [`ledger`]: wallet bridge, ABI codec and contract client
//! - [`content`]: document pinning
//! - [`access`]: off-chain audit trail of access grants
//! - [`session`]: reconciliation of identity, profile and wallet state
//! - [`records`]: role-checked patient and doctor actions
//! - [`config`]: TOML configuration with environment overrides
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use healthlink_core::access::InMemoryAccessStore;
//! use healthlink_core::content::InMemoryContentStore;
//! use healthlink_core::identity::InMemoryIdentityProvider;
//! use healthlink_core::ledger::InMemoryLedger;
//! use healthlink_core::records::HealthRecordService;
//! use healthlink_core::session::SessionManager;
//!
//! # async fn demo() {
//! let identity = Arc::new(InMemoryIdentityProvider::new());
//! let ledger = Arc::new(InMemoryLedger::new());
//! let session = SessionManager::start(identity.clone(), ledger.clone()).await;
//! let service = HealthRecordService::new(
//!     session,
//!     identity,
//!     ledger,
//!     Arc::new(InMemoryContentStore::new()),
//!     Arc::new(InMemoryAccessStore::new()),
//! );
//! # let _ = service;
//! # }
//! ```

pub mod access;
pub mod config;
pub mod content;
pub mod identity;
pub mod ledger;
pub mod records;
pub mod session;
pub mod validation;
