//! Scenario and property tests for the session manager.
//!
//! These tests verify:
//! - Role consistency of the exposed identity/profile pair
//! - Refresh idempotence
//! - Stale wallet probes never mutate the snapshot
//! - Superseded refreshes never write a wallet back
//! - Wallet attribution across sign-in, and wallet failure reasons

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use proptest::prelude::*;
use secrecy::SecretString;
use tokio::sync::Semaphore;

use super::{MissingReason, ProfileStatus, SessionManager, SessionPhase, WalletConnectError, WalletState};
use crate::identity::{
    AuthError, AuthSession, DoctorDraft, Identity, IdentityId, IdentityOp,
    IdentityProviderClient, InMemoryIdentityProvider, PatientDraft, Profile, ProfileDraft,
    ProfileId, Role, SessionSubscription,
};
use crate::ledger::{ChainError, InMemoryLedger, LedgerOp, WalletAddress};

// ============================================================================
// Test Helpers
// ============================================================================

const PASSWORD: &str = "Passw0rdX";

fn addr(byte: u8) -> WalletAddress {
    WalletAddress::from_bytes([byte; 20])
}

fn patient_profile(user: &str) -> Profile {
    Profile::Patient(
        PatientDraft {
            full_name: "Asha Verma".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12).unwrap(),
            blood_group: "B+".into(),
            weight: 62,
            aadhar_number: "123412341234".into(),
            phone_number: "9876543210".into(),
            is_married: false,
            wallet_address: None,
            profile_photo_url: None,
        }
        .into_profile(ProfileId::new(format!("p-{user}")), IdentityId::new(user), Utc::now()),
    )
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
        .into_profile(ProfileId::new(format!("d-{user}")), IdentityId::new(user), Utc::now()),
    )
}

/// A provider with patient `u1`, doctor `u3` (both with profiles) and
/// patient `u2` (no profile, no wallet).
fn provider() -> Arc<InMemoryIdentityProvider> {
    let provider = InMemoryIdentityProvider::new();
    provider.add_account("u1", "patient@example.com", PASSWORD, Role::Patient, None);
    provider.add_account("u2", "new@example.com", PASSWORD, Role::Patient, None);
    provider.add_account("u3", "doctor@example.com", PASSWORD, Role::Doctor, None);
    provider.insert_profile(patient_profile("u1"));
    provider.insert_profile(doctor_profile("u3"));
    Arc::new(provider)
}

async fn sign_in(provider: &InMemoryIdentityProvider, email: &str) {
    provider
        .sign_in(email, &SecretString::from(PASSWORD))
        .await
        .unwrap();
}

async fn sign_out(provider: &InMemoryIdentityProvider) {
    provider.sign_out().await.unwrap();
}

/// Delegates to an in-memory provider, holding `get_profile` while armed.
struct GatedProfiles {
    inner: Arc<InMemoryIdentityProvider>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    started: AtomicUsize,
    done: AtomicUsize,
}

impl GatedProfiles {
    fn new(inner: Arc<InMemoryIdentityProvider>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
            started: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        }
    }

    fn hold(&self) {
        *self.gate.lock().unwrap() = Some(Arc::new(Semaphore::new(0)));
    }

    fn release(&self) {
        if let Some(gate) = self.gate.lock().unwrap().take() {
            gate.close();
        }
    }

    fn reads_started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    fn reads_done(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProviderClient for GatedProfiles {
    async fn sign_up(
        &self,
        email: &str,
        password: &SecretString,
        role: Role,
        wallet_address: Option<WalletAddress>,
    ) -> Result<Identity, AuthError> {
        self.inner.sign_up(email, password, role, wallet_address).await
    }

    async fn sign_in(&self, email: &str, password: &SecretString) -> Result<AuthSession, AuthError> {
        self.inner.sign_in(email, password).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.sign_out().await
    }

    async fn current_identity(&self) -> Result<Option<Identity>, AuthError> {
        self.inner.current_identity().await
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.inner.request_password_reset(email).await
    }

    async fn update_password(&self, new_password: &SecretString) -> Result<(), AuthError> {
        self.inner.update_password(new_password).await
    }

    fn on_session_change(&self) -> SessionSubscription {
        self.inner.on_session_change()
    }

    async fn get_profile(&self, kind: Role, identity_id: &IdentityId) -> Result<Profile, AuthError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        let result = self.inner.get_profile(kind, identity_id).await;
        self.done.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn upsert_profile(
        &self,
        identity_id: &IdentityId,
        draft: &ProfileDraft,
    ) -> Result<Profile, AuthError> {
        self.inner.upsert_profile(identity_id, draft).await
    }

    async fn set_wallet_address(
        &self,
        identity_id: &IdentityId,
        address: &WalletAddress,
    ) -> Result<(), AuthError> {
        self.inner.set_wallet_address(identity_id, address).await
    }

    async fn upload_profile_photo(
        &self,
        identity_id: &IdentityId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String, AuthError> {
        self.inner.upload_profile_photo(identity_id, file_name, bytes).await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

// ============================================================================
// Boot
// ============================================================================

#[tokio::test]
async fn test_new_manager_is_uninitialized() {
    let manager = SessionManager::new(provider(), Arc::new(InMemoryLedger::new()));
    assert_eq!(manager.snapshot().phase, SessionPhase::Uninitialized);

    let mut updates = manager.watch();
    manager.init().await;
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().phase, SessionPhase::Anonymous);
}

#[tokio::test]
async fn test_boot_anonymous_probe_connects_without_prompt() {
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0xab), true));
    let manager = SessionManager::start(provider(), ledger.clone()).await;

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(snapshot.identity.is_none());

    manager.settle().await;
    assert_eq!(manager.snapshot().wallet, WalletState::Connected(addr(0xab)));
    assert_eq!(ledger.prompt_count(), 0);
    assert!(ledger.probe_count() >= 1);
}

#[tokio::test]
async fn test_boot_authenticated_loads_role_profile() {
    let provider = provider();
    sign_in(&provider, "patient@example.com").await;
    let manager = SessionManager::start(provider, Arc::new(InMemoryLedger::new())).await;

    let snapshot = manager.snapshot();
    assert_eq!(
        snapshot.phase,
        SessionPhase::Authenticated(ProfileStatus::Loaded)
    );
    assert_eq!(snapshot.role(), Some(Role::Patient));
    assert!(snapshot.patient_profile().is_some());
    assert!(snapshot.doctor_profile().is_none());
    assert!(snapshot.is_consistent());
}

#[tokio::test]
async fn test_second_init_is_noop() {
    let provider = provider();
    let manager = SessionManager::start(provider.clone(), Arc::new(InMemoryLedger::new())).await;
    let calls = provider.call_count(IdentityOp::CurrentIdentity);
    manager.init().await;
    assert_eq!(provider.call_count(IdentityOp::CurrentIdentity), calls);
}

// ============================================================================
// Refresh
// ============================================================================

#[tokio::test]
async fn test_doctor_profile_outage_keeps_identity() {
    let provider = provider();
    provider.add_account("d1", "outage@example.com", PASSWORD, Role::Doctor, None);
    provider.fail(
        IdentityOp::GetProfile,
        AuthError::Api {
            status: 503,
            message: "service unavailable".into(),
        },
    );
    sign_in(&provider, "outage@example.com").await;
    let manager = SessionManager::start(provider, Arc::new(InMemoryLedger::new())).await;

    let snapshot = manager.snapshot();
    assert_eq!(
        snapshot.phase,
        SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::Unavailable))
    );
    assert_eq!(
        snapshot.identity.as_ref().map(|i| i.id.as_str()),
        Some("d1")
    );
    assert!(snapshot.doctor_profile().is_none());
    assert!(snapshot.patient_profile().is_none());
}

#[tokio::test]
async fn test_missing_profile_is_not_created() {
    let provider = provider();
    sign_in(&provider, "new@example.com").await;
    let manager = SessionManager::start(provider, Arc::new(InMemoryLedger::new())).await;
    assert_eq!(
        manager.snapshot().phase,
        SessionPhase::Authenticated(ProfileStatus::Missing(MissingReason::NotCreated))
    );
}

#[tokio::test]
async fn test_identity_fetch_failure_is_anonymous() {
    let provider = provider();
    sign_in(&provider, "patient@example.com").await;
    provider.fail(IdentityOp::CurrentIdentity, AuthError::Transport("offline".into()));
    let manager = SessionManager::start(provider, Arc::new(InMemoryLedger::new())).await;
    assert_eq!(manager.snapshot().phase, SessionPhase::Anonymous);
}

#[tokio::test]
async fn test_refresh_is_idempotent() {
    let provider = provider();
    sign_in(&provider, "doctor@example.com").await;
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(7), true));
    let manager = SessionManager::start(provider, ledger).await;
    manager.settle().await;

    manager.refresh().await;
    let first = manager.snapshot();
    manager.refresh().await;
    let second = manager.snapshot();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_profile_wallet_adopted() {
    let provider = provider();
    let mut profile = patient_profile("u2");
    if let Profile::Patient(p) = &mut profile {
        p.wallet_address = Some(addr(0x42));
    }
    provider.insert_profile(profile);
    sign_in(&provider, "new@example.com").await;

    let manager = SessionManager::start(provider.clone(), Arc::new(InMemoryLedger::without_bridge())).await;
    let snapshot = manager.snapshot();
    assert_eq!(
        snapshot.identity.and_then(|i| i.wallet_address),
        Some(addr(0x42))
    );
    // profile-sourced addresses are not written back
    assert!(provider.wallet_writes().is_empty());
}

#[tokio::test]
async fn test_sign_out_is_anonymous_and_keeps_wallet() {
    let provider = provider();
    sign_in(&provider, "patient@example.com").await;
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(9), true));
    let manager = SessionManager::start(provider.clone(), ledger).await;
    manager.settle().await;
    assert_eq!(manager.snapshot().wallet, WalletState::Connected(addr(9)));

    sign_out(&provider).await;
    manager.refresh().await;
    manager.settle().await;

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert!(snapshot.patient_profile().is_none());
    assert!(snapshot.doctor_profile().is_none());
    assert_eq!(snapshot.wallet, WalletState::Connected(addr(9)));
}

#[tokio::test]
async fn test_session_events_drive_refresh() {
    let provider = provider();
    let manager = SessionManager::start(provider.clone(), Arc::new(InMemoryLedger::new())).await;

    sign_in(&provider, "doctor@example.com").await;
    manager.settle().await;
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.role(), Some(Role::Doctor));
    assert!(snapshot.doctor_profile().is_some());

    provider.expire_session();
    manager.settle().await;
    assert_eq!(manager.snapshot().phase, SessionPhase::Anonymous);
}

#[tokio::test]
async fn test_role_switch_never_mixes_profiles() {
    let provider = provider();
    sign_in(&provider, "patient@example.com").await;
    let manager = SessionManager::start(provider.clone(), Arc::new(InMemoryLedger::new())).await;
    assert!(manager.snapshot().patient_profile().is_some());

    sign_out(&provider).await;
    sign_in(&provider, "doctor@example.com").await;
    manager.refresh().await;

    let snapshot = manager.snapshot();
    assert!(snapshot.doctor_profile().is_some());
    assert!(snapshot.patient_profile().is_none());
    assert!(snapshot.is_consistent());
}

// ============================================================================
// Wallet
// ============================================================================

#[tokio::test]
async fn test_stale_probe_is_discarded() {
    let provider = provider();
    sign_in(&provider, "patient@example.com").await;
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0xcd), true));
    ledger.hold_probes();

    let manager = SessionManager::start(provider.clone(), ledger.clone()).await;
    // let the boot probes observe 0xcd and block on the gate
    tokio::task::yield_now().await;
    let generation = manager.snapshot().generation;
    let probes = ledger.probe_count();

    ledger.set_account(Some(addr(0xef)), true);
    sign_out(&provider).await;
    manager.refresh().await;
    assert!(manager.snapshot().generation > generation);

    ledger.release_probes();
    manager.settle().await;
    assert!(ledger.probe_count() > probes);

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert_eq!(snapshot.wallet, WalletState::Connected(addr(0xef)));
    assert!(provider.wallet_writes().is_empty());
}

#[tokio::test]
async fn test_sign_out_reprobes_wallet() {
    let provider = provider();
    sign_in(&provider, "patient@example.com").await;
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0x77), false));
    let manager = SessionManager::start(provider.clone(), ledger.clone()).await;
    manager.settle().await;
    assert_eq!(manager.snapshot().wallet, WalletState::Disconnected);
    let probes = ledger.probe_count();

    ledger.set_account(Some(addr(0x77)), true);
    sign_out(&provider).await;
    manager.refresh().await;
    manager.settle().await;

    let snapshot = manager.snapshot();
    assert_eq!(snapshot.phase, SessionPhase::Anonymous);
    assert_eq!(snapshot.wallet, WalletState::Connected(addr(0x77)));
    assert_eq!(ledger.probe_count(), probes + 1);
    assert_eq!(ledger.prompt_count(), 0);
}

#[tokio::test]
async fn test_superseded_refresh_skips_wallet_write() {
    let inner = provider();
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0xab), true));
    let provider = Arc::new(GatedProfiles::new(inner.clone()));
    let manager = SessionManager::start(provider.clone(), ledger).await;
    manager.settle().await;
    assert_eq!(manager.snapshot().wallet, WalletState::Connected(addr(0xab)));

    // the listener's refresh for this sign-in blocks on the profile read
    provider.hold();
    sign_in(&inner, "new@example.com").await;
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
    assert_eq!(provider.reads_started(), 1);

    sign_out(&inner).await;
    manager.refresh().await;
    assert_eq!(manager.snapshot().phase, SessionPhase::Anonymous);

    provider.release();
    while provider.reads_done() == 0 {
        tokio::task::yield_now().await;
    }
    manager.settle().await;

    assert_eq!(manager.snapshot().phase, SessionPhase::Anonymous);
    assert_eq!(inner.call_count(IdentityOp::SetWalletAddress), 0);
}

#[tokio::test]
async fn test_anonymous_wallet_attributed_after_sign_in() {
    let provider = provider();
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0xab), true));
    let manager = SessionManager::start(provider.clone(), ledger.clone()).await;
    manager.settle().await;
    assert_eq!(manager.snapshot().wallet, WalletState::Connected(addr(0xab)));

    sign_in(&provider, "new@example.com").await;
    manager.refresh().await;
    manager.settle().await;

    let snapshot = manager.snapshot();
    assert_eq!(
        snapshot.identity.as_ref().and_then(|i| i.wallet_address),
        Some(addr(0xab))
    );
    assert_eq!(
        provider.wallet_writes(),
        vec![(IdentityId::new("u2"), addr(0xab))]
    );
    assert_eq!(ledger.prompt_count(), 0);
}

#[tokio::test]
async fn test_connect_wallet_without_bridge_is_unavailable() {
    let manager = SessionManager::start(provider(), Arc::new(InMemoryLedger::without_bridge())).await;
    let err = manager.connect_wallet().await.unwrap_err();
    assert_eq!(err, WalletConnectError::BridgeUnavailable);
    assert_eq!(err.reason(), "unavailable");
}

#[tokio::test]
async fn test_connect_wallet_declined() {
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(1), false));
    ledger.fail(LedgerOp::Connect, ChainError::UserRejected);
    let manager = SessionManager::start(provider(), ledger.clone()).await;

    let err = manager.connect_wallet().await.unwrap_err();
    assert_eq!(err, WalletConnectError::UserDeclined);
    assert_eq!(manager.snapshot().wallet, WalletState::Disconnected);
    assert_eq!(ledger.prompt_count(), 1);
}

#[tokio::test]
async fn test_connect_wallet_persists_for_identity() {
    let provider = provider();
    sign_in(&provider, "new@example.com").await;
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0x11), false));
    let manager = SessionManager::start(provider.clone(), ledger.clone()).await;
    manager.settle().await;
    // not yet authorized, so the probe saw nothing
    assert_eq!(manager.snapshot().wallet, WalletState::Disconnected);

    let address = manager.connect_wallet().await.unwrap();
    assert_eq!(address, addr(0x11));
    assert_eq!(manager.snapshot().wallet, WalletState::Connected(address));
    assert_eq!(
        provider.wallet_writes(),
        vec![(IdentityId::new("u2"), address)]
    );
}

#[tokio::test]
async fn test_connect_wallet_persist_failure_keeps_connection() {
    let provider = provider();
    sign_in(&provider, "new@example.com").await;
    provider.fail(
        IdentityOp::SetWalletAddress,
        AuthError::Api {
            status: 500,
            message: "boom".into(),
        },
    );
    let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0x22), false));
    let manager = SessionManager::start(provider.clone(), ledger).await;

    let address = manager.connect_wallet().await.unwrap();
    let snapshot = manager.snapshot();
    assert_eq!(snapshot.wallet, WalletState::Connected(address));
    assert_eq!(
        snapshot.identity.and_then(|i| i.wallet_address),
        Some(address)
    );
    assert!(provider.wallet_writes().is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_listening() {
    let provider = provider();
    let manager = SessionManager::start(provider.clone(), Arc::new(InMemoryLedger::new())).await;
    manager.shutdown();

    sign_in(&provider, "patient@example.com").await;
    manager.settle().await;
    assert_eq!(manager.snapshot().phase, SessionPhase::Anonymous);
}

// ============================================================================
// Properties
// ============================================================================

#[derive(Debug, Clone)]
enum Step {
    SignIn(&'static str),
    SignOut,
    Refresh,
    ProfileOutage(bool),
    Settle,
    ConnectWallet,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        prop::sample::select(&["patient@example.com", "doctor@example.com", "new@example.com"][..])
            .prop_map(Step::SignIn),
        Just(Step::SignOut),
        Just(Step::Refresh),
        any::<bool>().prop_map(Step::ProfileOutage),
        Just(Step::Settle),
        Just(Step::ConnectWallet),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_snapshot_always_role_consistent(steps in prop::collection::vec(arb_step(), 1..16)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(async {
            let provider = provider();
            let ledger = Arc::new(InMemoryLedger::new().with_account(addr(0x5a), false));
            let manager = SessionManager::start(provider.clone(), ledger).await;
            let mut updates = manager.watch();

            for step in steps {
                match step {
                    Step::SignIn(email) => sign_in(&provider, email).await,
                    Step::SignOut => sign_out(&provider).await,
                    Step::Refresh => manager.refresh().await,
                    Step::ProfileOutage(true) => provider.fail(
                        IdentityOp::GetProfile,
                        AuthError::Api { status: 503, message: "down".into() },
                    ),
                    Step::ProfileOutage(false) => provider.clear_failures(),
                    Step::Settle => manager.settle().await,
                    Step::ConnectWallet => {
                        let _ = manager.connect_wallet().await;
                    },
                }
                let snapshot = updates.borrow_and_update().clone();
                prop_assert!(snapshot.is_consistent(), "inconsistent: {snapshot:?}");
            }

            manager.settle().await;
            manager.refresh().await;
            let before = manager.snapshot();
            manager.refresh().await;
            prop_assert_eq!(before.clone(), manager.snapshot());
            prop_assert!(before.is_consistent());
            Ok(())
        })?;
    }
}
