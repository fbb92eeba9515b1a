//! In-memory identity provider for tests and offline use.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::broadcast;

use super::IdentityProviderClient;
use super::error::AuthError;
use super::profile::{Profile, ProfileDraft, ProfileId};
use super::types::{
    AuthEvent, AuthEventKind, AuthSession, Identity, IdentityId, Role, SessionSubscription,
};
use crate::ledger::WalletAddress;
use crate::validation;

/// Identity operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityOp {
    /// [`IdentityProviderClient::sign_up`]
    SignUp,
    /// [`IdentityProviderClient::sign_in`]
    SignIn,
    /// [`IdentityProviderClient::sign_out`]
    SignOut,
    /// [`IdentityProviderClient::current_identity`]
    CurrentIdentity,
    /// [`IdentityProviderClient::request_password_reset`]
    PasswordReset,
    /// [`IdentityProviderClient::update_password`]
    UpdatePassword,
    /// [`IdentityProviderClient::get_profile`]
    GetProfile,
    /// [`IdentityProviderClient::upsert_profile`]
    UpsertProfile,
    /// [`IdentityProviderClient::set_wallet_address`]
    SetWalletAddress,
    /// [`IdentityProviderClient::upload_profile_photo`]
    UploadPhoto,
}

#[derive(Debug)]
struct Account {
    identity: Identity,
    password: SecretString,
}

#[derive(Debug, Default)]
struct ProviderState {
    accounts: HashMap<String, Account>,
    session: Option<IdentityId>,
    profiles: HashMap<(IdentityId, Role), Profile>,
    failures: HashMap<IdentityOp, AuthError>,
    calls: HashMap<IdentityOp, usize>,
    wallet_writes: Vec<(IdentityId, WalletAddress)>,
    password_resets: Vec<String>,
}

impl ProviderState {
    fn enter(&mut self, op: IdentityOp) -> Result<(), AuthError> {
        *self.calls.entry(op).or_default() += 1;
        self.failures.get(&op).cloned().map_or(Ok(()), Err)
    }

    fn account_by_id(&mut self, id: &IdentityId) -> Option<&mut Account> {
        self.accounts.values_mut().find(|a| &a.identity.id == id)
    }

    fn session_identity(&self) -> Option<Identity> {
        let id = self.session.as_ref()?;
        self.accounts
            .values()
            .find(|a| &a.identity.id == id)
            .map(|a| a.identity.clone())
    }
}

/// [`IdentityProviderClient`] backed by process memory.
///
/// Accounts sign in immediately (no email confirmation). Session changes
/// are broadcast exactly like the hosted provider's, so the session manager
/// can be driven through sign-in, sign-out and user updates. Individual
/// operations can be made to fail with [`InMemoryIdentityProvider::fail`].
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    state: Mutex<ProviderState>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for InMemoryIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryIdentityProvider {
    /// Creates a provider with no accounts.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(ProviderState::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    /// Creates an account without signing it in.
    pub fn add_account(
        &self,
        id: &str,
        email: &str,
        password: &str,
        role: Role,
        wallet_address: Option<WalletAddress>,
    ) -> Identity {
        let identity = Identity {
            id: IdentityId::new(id),
            email: email.to_string(),
            role,
            wallet_address,
            created_at: Utc::now(),
        };
        self.lock().accounts.insert(
            email.to_ascii_lowercase(),
            Account {
                identity: identity.clone(),
                password: SecretString::from(password),
            },
        );
        identity
    }

    /// Stores a profile row directly.
    pub fn insert_profile(&self, profile: Profile) {
        self.lock()
            .profiles
            .insert((profile.user_id().clone(), profile.role()), profile);
    }

    /// Makes `op` fail with `error` until cleared.
    pub fn fail(&self, op: IdentityOp, error: AuthError) {
        self.lock().failures.insert(op, error);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Ends the session as if it expired remotely.
    pub fn expire_session(&self) {
        let had_session = self.lock().session.take().is_some();
        if had_session {
            self.emit(AuthEvent::signed_out());
        }
    }

    /// Broadcasts an arbitrary event.
    pub fn emit_event(&self, event: AuthEvent) {
        self.emit(event);
    }

    /// Number of calls made to `op`, including failed ones.
    #[must_use]
    pub fn call_count(&self, op: IdentityOp) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or_default()
    }

    /// Every successful `set_wallet_address` call, in order.
    #[must_use]
    pub fn wallet_writes(&self) -> Vec<(IdentityId, WalletAddress)> {
        self.lock().wallet_writes.clone()
    }

    /// Emails that requested a password reset, in order.
    #[must_use]
    pub fn password_resets(&self) -> Vec<String> {
        self.lock().password_resets.clone()
    }

    /// Looks up an account by id.
    #[must_use]
    pub fn identity(&self, id: &IdentityId) -> Option<Identity> {
        self.lock().account_by_id(id).map(|a| a.identity.clone())
    }

    /// Stored profile of the given kind, if any.
    #[must_use]
    pub fn profile(&self, kind: Role, id: &IdentityId) -> Option<Profile> {
        self.lock().profiles.get(&(id.clone(), kind)).cloned()
    }
}

#[async_trait]
impl IdentityProviderClient for InMemoryIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        role: Role,
        wallet_address: Option<WalletAddress>,
    ) -> Result<Identity, AuthError> {
        self.lock().enter(IdentityOp::SignUp)?;
        validation::validate_email(email)?;
        validation::validate_password(password.expose_secret())?;

        let key = email.trim().to_ascii_lowercase();
        if self.lock().accounts.contains_key(&key) {
            return Err(AuthError::Api {
                status: 422,
                message: "User already registered".into(),
            });
        }
        let id = uuid::Uuid::new_v4().to_string();
        let identity = self.add_account(&id, email.trim(), password.expose_secret(), role, wallet_address);
        self.lock().session = Some(identity.id.clone());
        self.emit(AuthEvent::with_identity(AuthEventKind::SignedIn, identity.clone()));
        Ok(identity)
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthSession, AuthError> {
        let identity = {
            let mut state = self.lock();
            state.enter(IdentityOp::SignIn)?;
            let account = state
                .accounts
                .get(&email.trim().to_ascii_lowercase())
                .filter(|a| a.password.expose_secret() == password.expose_secret())
                .ok_or(AuthError::InvalidCredentials)?;
            let identity = account.identity.clone();
            state.session = Some(identity.id.clone());
            identity
        };
        self.emit(AuthEvent::with_identity(AuthEventKind::SignedIn, identity.clone()));
        Ok(AuthSession {
            access_token: SecretString::from(uuid::Uuid::new_v4().to_string()),
            refresh_token: SecretString::from(uuid::Uuid::new_v4().to_string()),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
            identity,
        })
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let had_session = {
            let mut state = self.lock();
            state.enter(IdentityOp::SignOut)?;
            state.session.take().is_some()
        };
        if had_session {
            self.emit(AuthEvent::signed_out());
        }
        Ok(())
    }

    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        let mut state = self.lock();
        state.enter(IdentityOp::CurrentIdentity)?;
        Ok(state.session_identity())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let mut state = self.lock();
        state.enter(IdentityOp::PasswordReset)?;
        validation::validate_email(email)?;
        // unknown emails succeed too, so the endpoint cannot enumerate accounts
        state.password_resets.push(email.trim().to_string());
        Ok(())
    }

    async fn update_password(&self, new_password: &SecretString) -> Result<(), AuthError> {
        let identity = {
            let mut state = self.lock();
            state.enter(IdentityOp::UpdatePassword)?;
            validation::validate_password(new_password.expose_secret())?;
            let id = state.session.clone().ok_or(AuthError::NotAuthenticated)?;
            let account = state.account_by_id(&id).ok_or(AuthError::NotAuthenticated)?;
            account.password = new_password.clone();
            account.identity.clone()
        };
        self.emit(AuthEvent::with_identity(AuthEventKind::UserUpdated, identity));
        Ok(())
    }

    fn on_session_change(&self) -> SessionSubscription {
        SessionSubscription::new(self.events.subscribe())
    }

    async fn get_profile(
        &self,
        kind: Role,
        identity_id: &IdentityId,
    ) -> Result<Profile, AuthError> {
        let mut state = self.lock();
        state.enter(IdentityOp::GetProfile)?;
        state
            .profiles
            .get(&(identity_id.clone(), kind))
            .cloned()
            .ok_or_else(|| AuthError::NotFound {
                what: format!("{kind} profile"),
            })
    }

    async fn upsert_profile(
        &self,
        identity_id: &IdentityId,
        draft: &ProfileDraft,
    ) -> Result<Profile, AuthError> {
        let mut state = self.lock();
        state.enter(IdentityOp::UpsertProfile)?;
        draft.validate()?;

        let key = (identity_id.clone(), draft.kind());
        let (id, created_at) = state.profiles.get(&key).map_or_else(
            || (ProfileId::new(uuid::Uuid::new_v4().to_string()), Utc::now()),
            |existing| {
                let created_at = match existing {
                    Profile::Patient(p) => p.created_at,
                    Profile::Doctor(d) => d.created_at,
                };
                (existing.id().clone(), created_at)
            },
        );
        let profile = match draft.clone() {
            ProfileDraft::Patient(d) => {
                Profile::Patient(d.into_profile(id, identity_id.clone(), created_at))
            },
            ProfileDraft::Doctor(d) => {
                Profile::Doctor(d.into_profile(id, identity_id.clone(), created_at))
            },
        };
        state.profiles.insert(key, profile.clone());
        Ok(profile)
    }

    async fn set_wallet_address(
        &self,
        identity_id: &IdentityId,
        address: &WalletAddress,
    ) -> Result<(), AuthError> {
        let identity = {
            let mut state = self.lock();
            state.enter(IdentityOp::SetWalletAddress)?;
            match &state.session {
                None => return Err(AuthError::NotAuthenticated),
                Some(active) if active != identity_id => {
                    return Err(AuthError::SessionMismatch {
                        requested: identity_id.to_string(),
                    });
                },
                Some(_) => {},
            }
            let account = state
                .account_by_id(identity_id)
                .ok_or(AuthError::NotAuthenticated)?;
            account.identity.wallet_address = Some(*address);
            let identity = account.identity.clone();
            state.wallet_writes.push((identity_id.clone(), *address));
            identity
        };
        self.emit(AuthEvent::with_identity(AuthEventKind::UserUpdated, identity));
        Ok(())
    }

    async fn upload_profile_photo(
        &self,
        identity_id: &IdentityId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AuthError> {
        self.lock().enter(IdentityOp::UploadPhoto)?;
        if bytes.is_empty() {
            return Err(AuthError::Validation(validation::ValidationError::Required {
                field: "profile photo",
            }));
        }
        Ok(format!("memory://profile_photos/profiles/{identity_id}-{file_name}"))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::identity::{DoctorDraft, PatientDraft};

    fn password() -> SecretString {
        SecretString::from("Passw0rdX")
    }

    #[tokio::test]
    async fn test_sign_in_emits_and_resolves_identity() {
        let provider = InMemoryIdentityProvider::new();
        provider.add_account("u1", "a@example.com", "Passw0rdX", Role::Doctor, None);
        let mut events = provider.on_session_change();

        let session = provider.sign_in("A@example.com", &password()).await.unwrap();
        assert_eq!(session.identity.id, IdentityId::new("u1"));
        assert_eq!(events.recv().await.unwrap().kind, AuthEventKind::SignedIn);
        assert_eq!(
            provider.current_identity().await.unwrap().map(|i| i.role),
            Some(Role::Doctor)
        );

        provider.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::signed_out());
        assert_eq!(provider.current_identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let provider = InMemoryIdentityProvider::new();
        provider.add_account("u1", "a@example.com", "Passw0rdX", Role::Patient, None);
        let err = provider
            .sign_in("a@example.com", &SecretString::from("nope"))
            .await
            .unwrap_err();
        assert_eq!(err, AuthError::InvalidCredentials);
    }

    #[tokio::test]
    async fn test_sign_up_validates_before_creating() {
        let provider = InMemoryIdentityProvider::new();
        let err = provider
            .sign_up("a@example.com", &SecretString::from("short"), Role::Patient, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(provider.current_identity().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_upsert_keeps_row_identity() {
        let provider = InMemoryIdentityProvider::new();
        let user = IdentityId::new("u1");
        let mut draft = DoctorDraft {
            full_name: "Dr Rao".into(),
            qualification: "MBBS".into(),
            specialized_areas: vec!["Cardiology".into()],
            phone_number: "9876543210".into(),
            wallet_address: None,
            profile_photo_url: None,
        };
        let first = provider
            .upsert_profile(&user, &ProfileDraft::Doctor(draft.clone()))
            .await
            .unwrap();
        draft.qualification = "MD".into();
        let second = provider
            .upsert_profile(&user, &ProfileDraft::Doctor(draft))
            .await
            .unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(
            provider.get_profile(Role::Doctor, &user).await.unwrap(),
            second
        );
        assert!(
            provider
                .get_profile(Role::Patient, &user)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_invalid_draft_not_stored() {
        let provider = InMemoryIdentityProvider::new();
        let user = IdentityId::new("u1");
        let draft = PatientDraft {
            full_name: "Al".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            blood_group: "O+".into(),
            weight: 70,
            aadhar_number: "123412341234".into(),
            phone_number: "9876543210".into(),
            is_married: false,
            wallet_address: None,
            profile_photo_url: None,
        };
        assert!(
            provider
                .upsert_profile(&user, &ProfileDraft::Patient(draft))
                .await
                .is_err()
        );
        assert_eq!(provider.profile(Role::Patient, &user), None);
    }

    #[tokio::test]
    async fn test_set_wallet_checks_session() {
        let provider = InMemoryIdentityProvider::new();
        provider.add_account("u1", "a@example.com", "Passw0rdX", Role::Patient, None);
        let address = WalletAddress::from_bytes([0xab; 20]);
        let user = IdentityId::new("u1");

        assert_eq!(
            provider.set_wallet_address(&user, &address).await,
            Err(AuthError::NotAuthenticated)
        );
        provider.sign_in("a@example.com", &password()).await.unwrap();
        assert!(matches!(
            provider
                .set_wallet_address(&IdentityId::new("u9"), &address)
                .await,
            Err(AuthError::SessionMismatch { .. })
        ));
        provider.set_wallet_address(&user, &address).await.unwrap();
        assert_eq!(provider.wallet_writes(), vec![(user.clone(), address)]);
        assert_eq!(
            provider.identity(&user).and_then(|i| i.wallet_address),
            Some(address)
        );
    }

    #[tokio::test]
    async fn test_injected_failure_counts_call() {
        let provider = InMemoryIdentityProvider::new();
        provider.fail(
            IdentityOp::GetProfile,
            AuthError::Api {
                status: 503,
                message: "unavailable".into(),
            },
        );
        let err = provider
            .get_profile(Role::Doctor, &IdentityId::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Api { status: 503, .. }));
        assert_eq!(provider.call_count(IdentityOp::GetProfile), 1);
    }
}
