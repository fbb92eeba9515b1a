//! Content store: content-addressed pinning of uploaded documents.
//!
//! # Architecture
//!
//! ```text
//! ContentStoreClient (trait)
//!     |
//!     +-- PinataClient (pinFileToIPFS / pinList / unpin over HTTPS)
//!     |
//!     +-- InMemoryContentStore (tests, offline use)
//! ```
//!
//! Document bytes live here; the ledger only stores the content identifier
//! next to the document's title, category and notes.

mod error;
mod memory;
mod pinata;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use error::PinError;
pub use memory::InMemoryContentStore;
pub use pinata::{DEFAULT_PINATA_API_URL, DEFAULT_PINATA_GATEWAY_URL, PinataClient, PinataSettings};

/// A file to pin.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentBlob {
    /// Original file name.
    pub file_name: String,
    /// File contents.
    pub bytes: Vec<u8>,
}

impl ContentBlob {
    /// Wraps a file.
    #[must_use]
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for an empty file.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl std::fmt::Debug for ContentBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentBlob")
            .field("file_name", &self.file_name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Metadata stored alongside a pin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMetadata {
    /// Display name given at upload.
    pub name: String,
    /// Document category.
    pub category: Option<String>,
    /// Upload time, as recorded at upload.
    pub upload_date: Option<DateTime<Utc>>,
    /// Pinned size in bytes, when the service reports it.
    pub size: Option<u64>,
}

/// Capability interface over the pinning service.
#[async_trait]
pub trait ContentStoreClient: Send + Sync {
    /// Pins a file and returns its content identifier.
    async fn upload(
        &self,
        blob: ContentBlob,
        name: &str,
        category: &str,
    ) -> Result<String, PinError>;

    /// Looks up the metadata of a pin; `Ok(None)` if it is not pinned.
    async fn metadata(&self, cid: &str) -> Result<Option<PinMetadata>, PinError>;

    /// Removes a pin.
    async fn unpin(&self, cid: &str) -> Result<(), PinError>;

    /// Public gateway URL for a content identifier.
    fn resolve_url(&self, cid: &str) -> String;
}
