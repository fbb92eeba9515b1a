//! Patient-to-doctor access grants.
//!
//! The contract holds the authoritative access list; this store keeps the
//! audit trail beside the profiles. Grants are keyed by
//! `(patient_id, doctor_id)` and are never deleted: revoking soft-closes the
//! row (`is_active = false`, `access_revoked_at` set), and granting again
//! reopens it.
//!
//! ```text
//!            grant                 revoke
//!   (none) --------> Active ----------------> Revoked
//!                      ^                         |
//!                      +------------ grant ------+
//! ```

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::{AuthError, ProfileId};

/// One patient-to-doctor grant row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    /// Row id, when the store assigns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Patient profile id.
    pub patient_id: ProfileId,
    /// Doctor profile id.
    pub doctor_id: ProfileId,
    /// When access was (last) granted.
    pub access_granted_at: DateTime<Utc>,
    /// When access was revoked, if it was.
    #[serde(default)]
    pub access_revoked_at: Option<DateTime<Utc>>,
    /// Whether the grant is in force.
    pub is_active: bool,
}

impl AccessGrant {
    /// A grant is effective while active and not revoked.
    #[must_use]
    pub const fn is_effective(&self) -> bool {
        self.is_active && self.access_revoked_at.is_none()
    }
}

/// Capability interface over the grant audit table.
#[async_trait]
pub trait AccessGrantStore: Send + Sync {
    /// Opens (or reopens) the grant for the pair.
    async fn grant(
        &self,
        patient_id: &ProfileId,
        doctor_id: &ProfileId,
    ) -> Result<AccessGrant, AuthError>;

    /// Soft-closes the grant for the pair. A pair that was never granted is
    /// [`AuthError::NotFound`].
    async fn revoke(
        &self,
        patient_id: &ProfileId,
        doctor_id: &ProfileId,
    ) -> Result<AccessGrant, AuthError>;

    /// Effective grants held by a doctor.
    async fn patients_of(&self, doctor_id: &ProfileId) -> Result<Vec<AccessGrant>, AuthError>;

    /// Effective grants issued by a patient.
    async fn doctors_of(&self, patient_id: &ProfileId) -> Result<Vec<AccessGrant>, AuthError>;
}

/// [`AccessGrantStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryAccessStore {
    grants: Mutex<BTreeMap<(ProfileId, ProfileId), AccessGrant>>,
}

impl InMemoryAccessStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<(ProfileId, ProfileId), AccessGrant>> {
        self.grants.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every row, including revoked ones.
    #[must_use]
    pub fn all(&self) -> Vec<AccessGrant> {
        self.lock().values().cloned().collect()
    }
}

#[async_trait]
impl AccessGrantStore for InMemoryAccessStore {
    async fn grant(
        &self,
        patient_id: &ProfileId,
        doctor_id: &ProfileId,
    ) -> Result<AccessGrant, AuthError> {
        let mut grants = self.lock();
        let key = (patient_id.clone(), doctor_id.clone());
        let id = grants
            .get(&key)
            .and_then(|g| g.id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let grant = AccessGrant {
            id: Some(id),
            patient_id: patient_id.clone(),
            doctor_id: doctor_id.clone(),
            access_granted_at: Utc::now(),
            access_revoked_at: None,
            is_active: true,
        };
        grants.insert(key, grant.clone());
        Ok(grant)
    }

    async fn revoke(
        &self,
        patient_id: &ProfileId,
        doctor_id: &ProfileId,
    ) -> Result<AccessGrant, AuthError> {
        let mut grants = self.lock();
        let grant = grants
            .get_mut(&(patient_id.clone(), doctor_id.clone()))
            .ok_or_else(|| AuthError::NotFound {
                what: "access grant".into(),
            })?;
        grant.is_active = false;
        grant.access_revoked_at = Some(Utc::now());
        Ok(grant.clone())
    }

    async fn patients_of(&self, doctor_id: &ProfileId) -> Result<Vec<AccessGrant>, AuthError> {
        Ok(self
            .lock()
            .values()
            .filter(|g| &g.doctor_id == doctor_id && g.is_effective())
            .cloned()
            .collect())
    }

    async fn doctors_of(&self, patient_id: &ProfileId) -> Result<Vec<AccessGrant>, AuthError> {
        Ok(self
            .lock()
            .values()
            .filter(|g| &g.patient_id == patient_id && g.is_effective())
            .cloned()
            .collect())
    }
}
