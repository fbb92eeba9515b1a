//! Identity provider: accounts, sessions and role profiles.
//!
//! # Architecture
//!
//! ```text
//! IdentityProviderClient (trait)
//!     |
//!     +-- SupabaseIdentityClient
//!     |       GoTrue auth endpoints + PostgREST profile tables
//!     |       + storage bucket for profile photos
//!     |
//!     +-- InMemoryIdentityProvider (tests, offline use)
//! ```
//!
//! The provider owns the canonical [`Identity`]. Its role is decoded once,
//! at the boundary, with [`Role::from_metadata`]; nothing downstream looks at
//! the raw metadata again.

mod error;
mod memory;
mod profile;
mod supabase;
mod types;

use async_trait::async_trait;
use secrecy::SecretString;

pub use error::AuthError;
pub use memory::{IdentityOp, InMemoryIdentityProvider};
pub use profile::{
    AADHAAR_DIGITS, DoctorDraft, DoctorProfile, MIN_DOCTOR_FIELD_LEN, MIN_DOCTOR_PHONE_DIGITS,
    MIN_PATIENT_NAME_LEN, PATIENT_PHONE_DIGITS, PatientDraft, PatientProfile, Profile,
    ProfileDraft, ProfileId,
};
pub use supabase::{SupabaseIdentityClient, SupabaseSettings};
pub use types::{
    AuthEvent, AuthEventKind, AuthSession, Identity, IdentityId, Role, SessionSubscription,
    SubscriptionError,
};

use crate::ledger::WalletAddress;

/// Capability interface over the identity provider.
///
/// Every method either returns the requested value or a classified
/// [`AuthError`]; recovery policy belongs to the caller.
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// Creates an account. The role and optional wallet are stored in the
    /// account metadata.
    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        role: Role,
        wallet_address: Option<WalletAddress>,
    ) -> Result<Identity, AuthError>;

    /// Signs in with email and password.
    async fn sign_in(&self, email: &str, password: &SecretString)
    -> Result<AuthSession, AuthError>;

    /// Ends the active session.
    async fn sign_out(&self) -> Result<(), AuthError>;

    /// Returns the identity of the active session, `Ok(None)` if there is
    /// none.
    async fn current_identity(&self) -> Result<Option<Identity>, AuthError>;

    /// Sends a password-reset email.
    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError>;

    /// Changes the password of the signed-in account.
    async fn update_password(&self, new_password: &SecretString) -> Result<(), AuthError>;

    /// Subscribes to session changes.
    fn on_session_change(&self) -> SessionSubscription;

    /// Fetches the profile of the given kind for an identity.
    ///
    /// A missing row is [`AuthError::NotFound`].
    async fn get_profile(&self, kind: Role, identity_id: &IdentityId)
    -> Result<Profile, AuthError>;

    /// Creates or updates the identity's profile. The draft is validated
    /// before any request is made.
    async fn upsert_profile(
        &self,
        identity_id: &IdentityId,
        draft: &ProfileDraft,
    ) -> Result<Profile, AuthError>;

    /// Records a wallet address on the identity.
    async fn set_wallet_address(
        &self,
        identity_id: &IdentityId,
        address: &WalletAddress,
    ) -> Result<(), AuthError>;

    /// Uploads a profile photo and returns its public URL.
    async fn upload_profile_photo(
        &self,
        identity_id: &IdentityId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AuthError>;

    /// Returns the provider name for logging.
    fn name(&self) -> &'static str;
}
