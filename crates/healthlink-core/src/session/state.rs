//! Observable session state.

use crate::identity::{DoctorProfile, Identity, PatientProfile, Profile, Role};
use crate::ledger::WalletAddress;

/// Why an authenticated session has no profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingReason {
    /// The provider has no profile row for this identity yet.
    NotCreated,
    /// The profile could not be read; it may exist.
    Unavailable,
}

/// Profile sub-state of an authenticated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileStatus {
    /// The role-matched profile is loaded.
    Loaded,
    /// No profile is available.
    Missing(MissingReason),
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// The manager has not booted.
    Uninitialized,
    /// The first identity fetch is in flight.
    Loading,
    /// An identity is present.
    Authenticated(ProfileStatus),
    /// No identity.
    Anonymous,
}

/// Wallet sub-state, orthogonal to the phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalletState {
    /// No account seen on the bridge.
    #[default]
    Disconnected,
    /// The bridge reported this account.
    Connected(WalletAddress),
}

impl WalletState {
    /// The connected address, if any.
    #[must_use]
    pub const fn address(&self) -> Option<WalletAddress> {
        match self {
            Self::Connected(address) => Some(*address),
            Self::Disconnected => None,
        }
    }

    /// Returns `true` when connected.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

/// One consistent view of the session.
///
/// `identity` and `profile` are only ever replaced together, so a profile is
/// either absent or matches the identity's role and id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Canonical identity, with any adopted wallet address.
    pub identity: Option<Identity>,
    /// Role-matched profile.
    pub profile: Option<Profile>,
    /// Wallet sub-state.
    pub wallet: WalletState,
    /// Incremented on every identity change.
    pub generation: u64,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

impl SessionSnapshot {
    /// State before boot.
    #[must_use]
    pub const fn initial() -> Self {
        Self {
            phase: SessionPhase::Uninitialized,
            identity: None,
            profile: None,
            wallet: WalletState::Disconnected,
            generation: 0,
        }
    }

    /// Role of the identity.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.identity.as_ref().map(|i| i.role)
    }

    /// Returns `true` once an identity is present.
    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self.phase, SessionPhase::Authenticated(_))
    }

    /// Returns `true` while the first identity fetch is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self.phase, SessionPhase::Uninitialized | SessionPhase::Loading)
    }

    /// The patient profile slot.
    #[must_use]
    pub fn patient_profile(&self) -> Option<&PatientProfile> {
        self.profile.as_ref().and_then(Profile::as_patient)
    }

    /// The doctor profile slot.
    #[must_use]
    pub fn doctor_profile(&self) -> Option<&DoctorProfile> {
        self.profile.as_ref().and_then(Profile::as_doctor)
    }

    /// Address attributed to the identity, falling back to the connected
    /// wallet.
    #[must_use]
    pub fn wallet_address(&self) -> Option<WalletAddress> {
        self.identity
            .as_ref()
            .and_then(|i| i.wallet_address)
            .or_else(|| self.wallet.address())
    }

    /// Checks the phase, identity and profile agree.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let profile_matches = match (&self.identity, &self.profile) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(identity), Some(profile)) => {
                profile.role() == identity.role && profile.user_id() == &identity.id
            },
        };
        let phase_matches = match self.phase {
            SessionPhase::Uninitialized | SessionPhase::Loading => self.profile.is_none(),
            SessionPhase::Anonymous => self.identity.is_none() && self.profile.is_none(),
            SessionPhase::Authenticated(ProfileStatus::Loaded) => {
                self.identity.is_some() && self.profile.is_some()
            },
            SessionPhase::Authenticated(ProfileStatus::Missing(_)) => {
                self.identity.is_some() && self.profile.is_none()
            },
        };
        profile_matches && phase_matches
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::identity::{DoctorDraft, IdentityId, ProfileId};

    fn doctor_identity() -> Identity {
        Identity {
            id: IdentityId::new("u1"),
            email: "doc@example.com".into(),
            role: Role::Doctor,
            wallet_address: None,
            created_at: Utc::now(),
        }
    }

    fn doctor_profile(user: &str) -> Profile {
        Profile::Doctor(
            DoctorDraft {
                full_name: "Dr Rao".into(),
                qualification: "MBBS".into(),
                specialized_areas: vec!["Cardiology".into()],
                phone_number: "9876543210".into(),
                wallet_address: None,
                profile_photo_url: None,
            }
            .into_profile(ProfileId::new("d1"), IdentityId::new(user), Utc::now()),
        )
    }

    #[test]
    fn test_initial_is_consistent() {
        let snapshot = SessionSnapshot::initial();
        assert!(snapshot.is_consistent());
        assert!(snapshot.is_loading());
        assert_eq!(snapshot.wallet_address(), None);
    }

    #[test]
    fn test_loaded_requires_matching_profile() {
        let mut snapshot = SessionSnapshot {
            phase: SessionPhase::Authenticated(ProfileStatus::Loaded),
            identity: Some(doctor_identity()),
            profile: Some(doctor_profile("u1")),
            wallet: WalletState::Disconnected,
            generation: 1,
        };
        assert!(snapshot.is_consistent());
        assert!(snapshot.doctor_profile().is_some());
        assert!(snapshot.patient_profile().is_none());

        snapshot.profile = Some(doctor_profile("someone-else"));
        assert!(!snapshot.is_consistent());

        snapshot.profile = None;
        assert!(!snapshot.is_consistent());
        snapshot.phase = SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::NotCreated));
        assert!(snapshot.is_consistent());
    }

    #[test]
    fn test_anonymous_with_profile_is_inconsistent() {
        let snapshot = SessionSnapshot {
            phase: SessionPhase::Anonymous,
            identity: None,
            profile: Some(doctor_profile("u1")),
            wallet: WalletState::Disconnected,
            generation: 0,
        };
        assert!(!snapshot.is_consistent());
    }

    #[test]
    fn test_identity_wallet_preferred() {
        let attributed = WalletAddress::from_bytes([1; 20]);
        let connected = WalletAddress::from_bytes([2; 20]);
        let mut identity = doctor_identity();
        identity.wallet_address = Some(attributed);
        let snapshot = SessionSnapshot {
            phase: SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::Unavailable)),
            identity: Some(identity),
            profile: None,
            wallet: WalletState::Connected(connected),
            generation: 1,
        };
        assert_eq!(snapshot.wallet_address(), Some(attributed));
        assert_eq!(snapshot.wallet.address(), Some(connected));
    }
}
