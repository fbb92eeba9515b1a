//! Supabase implementation of the identity provider and grant store.
//!
//! Auth goes through the GoTrue endpoints under `/auth/v1`, profile and
//! grant rows through PostgREST under `/rest/v1`, and profile photos through
//! the storage API under `/storage/v1`. The session (access and refresh
//! tokens) is held in memory; callers that outlive the process persist it
//! with [`SupabaseIdentityClient::current_session`] and hand it back with
//! [`SupabaseIdentityClient::restore_session`].

use std::fmt;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::profile::{DoctorProfile, PatientProfile, Profile, ProfileDraft, ProfileId};
use super::types::{
    AuthEvent, AuthEventKind, AuthSession, Identity, IdentityId, Role, SessionSubscription,
};
use super::IdentityProviderClient;
use crate::access::{AccessGrant, AccessGrantStore};
use crate::ledger::{WalletAddress, address};
use crate::validation;

const PATIENTS_TABLE: &str = "patients";
const DOCTORS_TABLE: &str = "doctors";
const ACCESS_TABLE: &str = "patient_doctor_access";
const PHOTO_BUCKET: &str = "profile_photos";

/// PostgREST media type for single-object responses.
const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Connection settings for a Supabase project.
#[derive(Clone)]
pub struct SupabaseSettings {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public anon key.
    pub anon_key: SecretString,
    /// Where password-reset emails send the user.
    pub password_reset_redirect: Option<String>,
}

impl fmt::Debug for SupabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseSettings")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .field("password_reset_redirect", &self.password_reset_redirect)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    eth_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoTrueUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: UserMetadata,
    created_at: DateTime<Utc>,
}

impl GoTrueUser {
    fn into_identity(self) -> Identity {
        let wallet_address = address::parse_optional(self.user_metadata.eth_address.as_deref())
            .unwrap_or_else(|err| {
                warn!(identity_id = %self.id, error = %err, "ignoring malformed eth_address metadata");
                None
            });
        Identity {
            role: Role::from_metadata(self.user_metadata.role.as_deref()),
            id: IdentityId::new(self.id),
            email: self.email.unwrap_or_default(),
            wallet_address,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: GoTrueUser,
}

impl TokenResponse {
    fn into_session(self) -> AuthSession {
        let expires_at = self
            .expires_at
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .or_else(|| {
                self.expires_in
                    .map(|secs| Utc::now() + chrono::Duration::seconds(secs))
            });
        AuthSession {
            access_token: SecretString::from(self.access_token),
            refresh_token: SecretString::from(self.refresh_token),
            expires_at,
            identity: self.user.into_identity(),
        }
    }
}

/// [`IdentityProviderClient`] and [`AccessGrantStore`] backed by a Supabase
/// project.
pub struct SupabaseIdentityClient {
    settings: SupabaseSettings,
    http_client: reqwest::Client,
    session: RwLock<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl fmt::Debug for SupabaseIdentityClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseIdentityClient")
            .field("settings", &self.settings)
            .field("signed_in", &self.current_session().is_some())
            .finish_non_exhaustive()
    }
}

impl SupabaseIdentityClient {
    /// Creates a client.
    pub fn new(settings: SupabaseSettings) -> Result<Self, AuthError> {
        if settings.url.trim().is_empty() {
            return Err(AuthError::Validation(validation::ValidationError::Required {
                field: "identity url",
            }));
        }
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            settings,
            http_client,
            session: RwLock::new(None),
            events,
        })
    }

    /// Returns a copy of the active session.
    #[must_use]
    pub fn current_session(&self) -> Option<AuthSession> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Installs a previously persisted session without notifying
    /// subscribers.
    pub fn restore_session(&self, session: AuthSession) {
        debug!(identity_id = %session.identity.id, "restoring persisted session");
        self.replace_session(Some(session));
    }

    fn replace_session(&self, session: Option<AuthSession>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = session;
    }

    fn emit(&self, event: AuthEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.url.trim_end_matches('/'), path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let bearer = self.current_session().map_or_else(
            || self.settings.anon_key.expose_secret().to_string(),
            |s| s.access_token.expose_secret().to_string(),
        );
        self.http_client
            .request(method, self.endpoint(path))
            .header("apikey", self.settings.anon_key.expose_secret())
            .bearer_auth(bearer)
    }

    fn require_session(&self) -> Result<AuthSession, AuthError> {
        self.current_session().ok_or(AuthError::NotAuthenticated)
    }

    async fn send_json<T: DeserializeOwned>(
        request: RequestBuilder,
        what: &str,
    ) -> Result<T, AuthError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::from_response(status.as_u16(), &body, what));
        }
        Ok(response.json().await?)
    }

    async fn send_empty(request: RequestBuilder, what: &str) -> Result<(), AuthError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::from_response(status.as_u16(), &body, what));
        }
        Ok(())
    }

    async fn fetch_user(&self) -> Result<Identity, AuthError> {
        let user: GoTrueUser =
            Self::send_json(self.request(Method::GET, "auth/v1/user"), "user").await?;
        Ok(user.into_identity())
    }

    async fn refresh_session(&self, refresh_token: &SecretString) -> Result<AuthSession, AuthError> {
        let tokens: TokenResponse = Self::send_json(
            self.request(Method::POST, "auth/v1/token")
                .query(&[("grant_type", "refresh_token")])
                .json(&json!({ "refresh_token": refresh_token.expose_secret() })),
            "session",
        )
        .await?;
        let session = tokens.into_session();
        self.replace_session(Some(session.clone()));
        self.emit(AuthEvent::with_identity(
            AuthEventKind::TokenRefreshed,
            session.identity.clone(),
        ));
        Ok(session)
    }

    fn update_cached_identity(&self, identity: &Identity) {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = guard.as_mut().filter(|s| s.identity.id == identity.id) {
            session.identity = identity.clone();
        }
    }

    const fn table(kind: Role) -> &'static str {
        match kind {
            Role::Patient => PATIENTS_TABLE,
            Role::Doctor => DOCTORS_TABLE,
        }
    }

    fn photo_path(identity_id: &IdentityId, file_name: &str) -> String {
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
            .unwrap_or_else(|| "bin".to_string());
        format!("profiles/{identity_id}-{}.{ext}", uuid::Uuid::new_v4().simple())
    }

    fn content_type(path: &str) -> &'static str {
        match path.rsplit_once('.').map(|(_, ext)| ext) {
            Some("png") => "image/png",
            Some("jpg" | "jpeg") => "image/jpeg",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }

    async fn grant_rows(&self, filters: &[(&str, String)]) -> Result<Vec<AccessGrant>, AuthError> {
        let mut query: Vec<(&str, String)> = vec![
            ("select", "*".to_string()),
            ("is_active", "eq.true".to_string()),
            ("access_revoked_at", "is.null".to_string()),
        ];
        query.extend(filters.iter().cloned());
        Self::send_json(
            self.request(Method::GET, &format!("rest/v1/{ACCESS_TABLE}"))
                .query(&query),
            "access grants",
        )
        .await
    }
}

#[async_trait]
impl IdentityProviderClient for SupabaseIdentityClient {
    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        role: Role,
        wallet_address: Option<WalletAddress>,
    ) -> Result<Identity, AuthError> {
        validation::validate_email(email)?;
        validation::validate_password(password.expose_secret())?;

        let body = json!({
            "email": email.trim(),
            "password": password.expose_secret(),
            "data": {
                "role": role.as_str(),
                "eth_address": wallet_address.map(|a| a.to_string()),
            },
        });
        let response: Value =
            Self::send_json(self.request(Method::POST, "auth/v1/signup").json(&body), "user")
                .await?;

        // with email confirmation disabled the provider returns a session
        if response.get("access_token").is_some() {
            let session = serde_json::from_value::<TokenResponse>(response)?.into_session();
            let identity = session.identity.clone();
            self.replace_session(Some(session));
            self.emit(AuthEvent::with_identity(AuthEventKind::SignedIn, identity.clone()));
            info!(identity_id = %identity.id, role = %identity.role, "signed up and signed in");
            return Ok(identity);
        }

        let user = response.get("user").cloned().unwrap_or(response);
        let identity = serde_json::from_value::<GoTrueUser>(user)?.into_identity();
        info!(identity_id = %identity.id, role = %identity.role, "signed up, awaiting email confirmation");
        Ok(identity)
    }

    async fn sign_in(
        &self,
        email: &str,
        password: &SecretString,
    ) -> Result<AuthSession, AuthError> {
        validation::validate_email(email)?;
        let tokens: TokenResponse = Self::send_json(
            self.request(Method::POST, "auth/v1/token")
                .query(&[("grant_type", "password")])
                .json(&json!({ "email": email.trim(), "password": password.expose_secret() })),
            "user",
        )
        .await?;
        let session = tokens.into_session();
        self.replace_session(Some(session.clone()));
        self.emit(AuthEvent::with_identity(
            AuthEventKind::SignedIn,
            session.identity.clone(),
        ));
        info!(identity_id = %session.identity.id, "signed in");
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(session) = self.current_session() else {
            return Ok(());
        };
        let request = self.request(Method::POST, "auth/v1/logout");
        self.replace_session(None);
        self.emit(AuthEvent::signed_out());
        info!(identity_id = %session.identity.id, "signed out");
        // the local session is gone either way; report a failed remote revoke
        Self::send_empty(request, "session").await
    }

    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        let Some(session) = self.current_session() else {
            return Ok(None);
        };
        match self.fetch_user().await {
            Ok(identity) => {
                self.update_cached_identity(&identity);
                Ok(Some(identity))
            },
            Err(AuthError::NotAuthenticated) => {
                debug!(identity_id = %session.identity.id, "access token rejected, refreshing");
                match self.refresh_session(&session.refresh_token).await {
                    Ok(refreshed) => Ok(Some(refreshed.identity)),
                    Err(err) => {
                        warn!(error = %err, "session refresh failed, signing out locally");
                        self.replace_session(None);
                        self.emit(AuthEvent::signed_out());
                        Err(AuthError::NotAuthenticated)
                    },
                }
            },
            Err(err) => Err(err),
        }
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        validation::validate_email(email)?;
        let mut request = self
            .request(Method::POST, "auth/v1/recover")
            .json(&json!({ "email": email.trim() }));
        if let Some(redirect) = &self.settings.password_reset_redirect {
            request = request.query(&[("redirect_to", redirect)]);
        }
        Self::send_empty(request, "user").await?;
        info!("password reset requested");
        Ok(())
    }

    async fn update_password(&self, new_password: &SecretString) -> Result<(), AuthError> {
        validation::validate_password(new_password.expose_secret())?;
        let session = self.require_session()?;
        let user: GoTrueUser = Self::send_json(
            self.request(Method::PUT, "auth/v1/user")
                .json(&json!({ "password": new_password.expose_secret() })),
            "user",
        )
        .await?;
        let identity = user.into_identity();
        self.update_cached_identity(&identity);
        self.emit(AuthEvent::with_identity(AuthEventKind::UserUpdated, identity));
        info!(identity_id = %session.identity.id, "password updated");
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
        let table = Self::table(kind);
        let request = self
            .request(Method::GET, &format!("rest/v1/{table}"))
            .header("Accept", SINGLE_OBJECT)
            .query(&[("select", "*".to_string()), ("user_id", format!("eq.{identity_id}"))]);
        let what = format!("{kind} profile");
        let profile = match kind {
            Role::Patient => Profile::Patient(Self::send_json::<PatientProfile>(request, &what).await?),
            Role::Doctor => Profile::Doctor(Self::send_json::<DoctorProfile>(request, &what).await?),
        };
        debug!(identity_id = %identity_id, kind = %kind, profile_id = %profile.id(), "profile fetched");
        Ok(profile)
    }

    async fn upsert_profile(
        &self,
        identity_id: &IdentityId,
        draft: &ProfileDraft,
    ) -> Result<Profile, AuthError> {
        draft.validate()?;
        let kind = draft.kind();
        let mut row = match draft {
            ProfileDraft::Patient(d) => serde_json::to_value(d)?,
            ProfileDraft::Doctor(d) => serde_json::to_value(d)?,
        };
        row["user_id"] = json!(identity_id);

        let table = Self::table(kind);
        let request = self
            .request(Method::POST, &format!("rest/v1/{table}"))
            .query(&[("on_conflict", "user_id")])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .header("Accept", SINGLE_OBJECT)
            .json(&row);
        let what = format!("{kind} profile");
        let profile = match kind {
            Role::Patient => Profile::Patient(Self::send_json::<PatientProfile>(request, &what).await?),
            Role::Doctor => Profile::Doctor(Self::send_json::<DoctorProfile>(request, &what).await?),
        };
        info!(identity_id = %identity_id, kind = %kind, profile_id = %profile.id(), "profile saved");
        Ok(profile)
    }

    async fn set_wallet_address(
        &self,
        identity_id: &IdentityId,
        address: &WalletAddress,
    ) -> Result<(), AuthError> {
        let session = self.require_session()?;
        if &session.identity.id != identity_id {
            return Err(AuthError::SessionMismatch {
                requested: identity_id.to_string(),
            });
        }
        let user: GoTrueUser = Self::send_json(
            self.request(Method::PUT, "auth/v1/user")
                .json(&json!({ "data": { "eth_address": address.to_string() } })),
            "user",
        )
        .await?;
        let identity = user.into_identity();
        self.update_cached_identity(&identity);
        self.emit(AuthEvent::with_identity(AuthEventKind::UserUpdated, identity));
        info!(identity_id = %identity_id, address = %address, "wallet address recorded");
        Ok(())
    }

    async fn upload_profile_photo(
        &self,
        identity_id: &IdentityId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AuthError> {
        if bytes.is_empty() {
            return Err(AuthError::Validation(validation::ValidationError::Required {
                field: "profile photo",
            }));
        }
        let path = Self::photo_path(identity_id, file_name);
        Self::send_empty(
            self.request(Method::POST, &format!("storage/v1/object/{PHOTO_BUCKET}/{path}"))
                .header("Content-Type", Self::content_type(&path))
                .body(bytes),
            "storage bucket",
        )
        .await?;
        let url = self.endpoint(&format!("storage/v1/object/public/{PHOTO_BUCKET}/{path}"));
        info!(identity_id = %identity_id, url = %url, "profile photo uploaded");
        Ok(url)
    }

    fn name(&self) -> &'static str {
        "supabase"
    }
}

#[async_trait]
impl AccessGrantStore for SupabaseIdentityClient {
    async fn grant(
        &self,
        patient_id: &ProfileId,
        doctor_id: &ProfileId,
    ) -> Result<AccessGrant, AuthError> {
        let row = json!({
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "is_active": true,
            "access_granted_at": Utc::now(),
            "access_revoked_at": null,
        });
        let rows: Vec<AccessGrant> = Self::send_json(
            self.request(Method::POST, &format!("rest/v1/{ACCESS_TABLE}"))
                .query(&[("on_conflict", "patient_id,doctor_id")])
                .header("Prefer", "resolution=merge-duplicates,return=representation")
                .json(&row),
            "access grant",
        )
        .await?;
        let grant = rows
            .into_iter()
            .next()
            .ok_or_else(|| AuthError::Parse("empty grant response".into()))?;
        info!(patient_id = %patient_id, doctor_id = %doctor_id, "access grant recorded");
        Ok(grant)
    }

    async fn revoke(
        &self,
        patient_id: &ProfileId,
        doctor_id: &ProfileId,
    ) -> Result<AccessGrant, AuthError> {
        let rows: Vec<AccessGrant> = Self::send_json(
            self.request(Method::PATCH, &format!("rest/v1/{ACCESS_TABLE}"))
                .query(&[
                    ("patient_id", format!("eq.{patient_id}")),
                    ("doctor_id", format!("eq.{doctor_id}")),
                ])
                .header("Prefer", "return=representation")
                .json(&json!({ "is_active": false, "access_revoked_at": Utc::now() })),
            "access grant",
        )
        .await?;
        let grant = rows.into_iter().next().ok_or_else(|| AuthError::NotFound {
            what: "access grant".into(),
        })?;
        info!(patient_id = %patient_id, doctor_id = %doctor_id, "access grant revoked");
        Ok(grant)
    }

    async fn patients_of(&self, doctor_id: &ProfileId) -> Result<Vec<AccessGrant>, AuthError> {
        self.grant_rows(&[("doctor_id", format!("eq.{doctor_id}"))])
            .await
    }

    async fn doctors_of(&self, patient_id: &ProfileId) -> Result<Vec<AccessGrant>, AuthError> {
        self.grant_rows(&[("patient_id", format!("eq.{patient_id}"))])
            .await
    }
}
