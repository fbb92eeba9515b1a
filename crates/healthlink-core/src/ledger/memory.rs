//! In-memory ledger for tests and offline use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use super::address::WalletAddress;
use super::client::LedgerClient;
use super::error::ChainError;
use super::types::{
    DoctorDetails, DoctorRegistration, DocumentRecord, PatientDetails, TxReceipt, VitalRecord,
};

/// Ledger operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerOp {
    /// [`LedgerClient::connect`]
    Connect,
    /// [`LedgerClient::active_address`]
    ActiveAddress,
    /// Any transaction.
    Write,
    /// [`LedgerClient::patient_details`]
    PatientDetails,
    /// [`LedgerClient::doctor_details`]
    DoctorDetails,
    /// [`LedgerClient::vital_records`]
    VitalRecords,
    /// [`LedgerClient::document_records`]
    DocumentRecords,
}

#[derive(Debug, Default)]
struct LedgerState {
    account: Option<WalletAddress>,
    authorized: bool,
    patients: HashMap<WalletAddress, PatientDetails>,
    doctors: HashMap<WalletAddress, DoctorDetails>,
    vitals: HashMap<WalletAddress, Vec<VitalRecord>>,
    documents: HashMap<WalletAddress, Vec<DocumentRecord>>,
    failures: HashMap<(LedgerOp, Option<WalletAddress>), ChainError>,
    probe_gate: Option<Arc<Semaphore>>,
}

/// [`LedgerClient`] backed by process memory.
///
/// Mirrors the contract's observable behavior (registration, append-only
/// records, access lists) and the wallet's (account authorization, user
/// rejection). Probes can be held open with [`InMemoryLedger::hold_probes`]
/// to exercise out-of-order completion: a held
/// [`LedgerClient::active_address`] call reports the account as it was when
/// the call started.
#[derive(Debug)]
pub struct InMemoryLedger {
    bridge_available: bool,
    state: Mutex<LedgerState>,
    tx_counter: AtomicU64,
    prompts: AtomicU64,
    probes: AtomicU64,
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLedger {
    /// Creates a ledger with a wallet bridge but no account.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bridge_available: true,
            state: Mutex::new(LedgerState::default()),
            tx_counter: AtomicU64::new(0),
            prompts: AtomicU64::new(0),
            probes: AtomicU64::new(0),
        }
    }

    /// Creates a ledger that behaves as if no wallet is installed.
    #[must_use]
    pub fn without_bridge() -> Self {
        Self {
            bridge_available: false,
            ..Self::new()
        }
    }

    /// Sets the wallet's account. `authorized` means the user has already
    /// granted this application access, so probes see it without a prompt.
    #[must_use]
    pub fn with_account(self, address: WalletAddress, authorized: bool) -> Self {
        self.set_account(Some(address), authorized);
        self
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replaces the wallet's account.
    pub fn set_account(&self, address: Option<WalletAddress>, authorized: bool) {
        let mut state = self.lock();
        state.account = address;
        state.authorized = authorized && address.is_some();
    }

    /// Makes `op` fail with `error` until cleared.
    pub fn fail(&self, op: LedgerOp, error: ChainError) {
        self.lock().failures.insert((op, None), error);
    }

    /// Makes `op` fail with `error` for one address only.
    pub fn fail_for(&self, op: LedgerOp, address: WalletAddress, error: ChainError) {
        self.lock().failures.insert((op, Some(address)), error);
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Holds every subsequent `active_address` call until
    /// [`InMemoryLedger::release_probes`].
    pub fn hold_probes(&self) {
        self.lock().probe_gate = Some(Arc::new(Semaphore::new(0)));
    }

    /// Releases held `active_address` calls.
    pub fn release_probes(&self) {
        if let Some(gate) = self.lock().probe_gate.take() {
            gate.close();
        }
    }

    /// Number of times the user was prompted.
    #[must_use]
    pub fn prompt_count(&self) -> u64 {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Number of `active_address` calls.
    #[must_use]
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::SeqCst)
    }

    /// Seeds a registered patient.
    pub fn insert_patient(&self, address: WalletAddress, details: PatientDetails) {
        self.lock().patients.insert(address, details);
    }

    /// Seeds a registered doctor.
    pub fn insert_doctor(&self, address: WalletAddress, registration: DoctorRegistration) {
        self.lock().doctors.insert(
            address,
            DoctorDetails {
                registration,
                shared_patients: Vec::new(),
            },
        );
    }

    fn check(&self, op: LedgerOp, address: Option<&WalletAddress>) -> Result<(), ChainError> {
        let state = self.lock();
        if let Some(err) = address.and_then(|a| state.failures.get(&(op, Some(*a)))) {
            return Err(err.clone());
        }
        match state.failures.get(&(op, None)) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn require_bridge(&self) -> Result<(), ChainError> {
        if self.bridge_available {
            Ok(())
        } else {
            Err(ChainError::BridgeUnavailable)
        }
    }

    fn sender(&self) -> Result<WalletAddress, ChainError> {
        self.require_bridge()?;
        self.check(LedgerOp::Write, None)?;
        let state = self.lock();
        match state.account {
            Some(account) if state.authorized => Ok(account),
            _ => Err(ChainError::NotConnected),
        }
    }

    fn receipt(&self) -> TxReceipt {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst) + 1;
        TxReceipt {
            tx_hash: format!("0x{n:064x}"),
            block_number: Some(n),
            gas_used: Some(21_000),
        }
    }

    fn reverted(reason: &str) -> ChainError {
        ChainError::Reverted {
            reason: Some(reason.to_string()),
        }
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    fn is_bridge_available(&self) -> bool {
        self.bridge_available
    }

    async fn connect(&self) -> Result<(), ChainError> {
        self.require_bridge()?;
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.check(LedgerOp::Connect, None)?;
        let mut state = self.lock();
        if state.account.is_none() {
            return Err(ChainError::NotConnected);
        }
        state.authorized = true;
        Ok(())
    }

    async fn active_address(&self) -> Result<Option<WalletAddress>, ChainError> {
        self.require_bridge()?;
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.check(LedgerOp::ActiveAddress, None)?;
        let (answer, gate) = {
            let state = self.lock();
            let answer = state.account.filter(|_| state.authorized);
            (answer, state.probe_gate.clone())
        };
        if let Some(gate) = gate {
            // closed on release; the permit itself is never granted
            let _ = gate.acquire().await;
        }
        Ok(answer)
    }

    async fn register_patient(&self, details: &PatientDetails) -> Result<TxReceipt, ChainError> {
        let sender = self.sender()?;
        self.lock().patients.insert(sender, details.clone());
        Ok(self.receipt())
    }

    async fn register_doctor(
        &self,
        registration: &DoctorRegistration,
    ) -> Result<TxReceipt, ChainError> {
        let sender = self.sender()?;
        let mut state = self.lock();
        let entry = state.doctors.entry(sender).or_insert_with(|| DoctorDetails {
            registration: registration.clone(),
            shared_patients: Vec::new(),
        });
        entry.registration = registration.clone();
        drop(state);
        Ok(self.receipt())
    }

    async fn add_vital_record(&self, vitals: &VitalRecord) -> Result<TxReceipt, ChainError> {
        let sender = self.sender()?;
        let mut state = self.lock();
        if !state.patients.contains_key(&sender) {
            return Err(Self::reverted("Patient not registered"));
        }
        state.vitals.entry(sender).or_default().push(vitals.clone());
        drop(state);
        Ok(self.receipt())
    }

    async fn add_document_record(
        &self,
        document: &DocumentRecord,
    ) -> Result<TxReceipt, ChainError> {
        let sender = self.sender()?;
        let mut state = self.lock();
        if !state.patients.contains_key(&sender) {
            return Err(Self::reverted("Patient not registered"));
        }
        state
            .documents
            .entry(sender)
            .or_default()
            .push(document.clone());
        drop(state);
        Ok(self.receipt())
    }

    async fn grant_access(&self, doctor: &WalletAddress) -> Result<TxReceipt, ChainError> {
        let sender = self.sender()?;
        let mut state = self.lock();
        if !state.patients.contains_key(&sender) {
            return Err(Self::reverted("Patient not registered"));
        }
        let details = state
            .doctors
            .get_mut(doctor)
            .ok_or_else(|| Self::reverted("Doctor not registered"))?;
        if !details.shared_patients.contains(&sender) {
            details.shared_patients.push(sender);
        }
        drop(state);
        Ok(self.receipt())
    }

    async fn revoke_access(&self, doctor: &WalletAddress) -> Result<TxReceipt, ChainError> {
        let sender = self.sender()?;
        let mut state = self.lock();
        let details = state
            .doctors
            .get_mut(doctor)
            .ok_or_else(|| Self::reverted("Doctor not registered"))?;
        details.shared_patients.retain(|p| *p != sender);
        drop(state);
        Ok(self.receipt())
    }

    async fn patient_details(&self, patient: &WalletAddress) -> Result<PatientDetails, ChainError> {
        self.require_bridge()?;
        self.check(LedgerOp::PatientDetails, Some(patient))?;
        self.lock()
            .patients
            .get(patient)
            .cloned()
            .ok_or_else(|| Self::reverted("Patient not registered"))
    }

    async fn doctor_details(&self, doctor: &WalletAddress) -> Result<DoctorDetails, ChainError> {
        self.require_bridge()?;
        self.check(LedgerOp::DoctorDetails, Some(doctor))?;
        self.lock()
            .doctors
            .get(doctor)
            .cloned()
            .ok_or_else(|| Self::reverted("Doctor not registered"))
    }

    async fn vital_records(&self, patient: &WalletAddress) -> Result<Vec<VitalRecord>, ChainError> {
        self.require_bridge()?;
        self.check(LedgerOp::VitalRecords, Some(patient))?;
        Ok(self.lock().vitals.get(patient).cloned().unwrap_or_default())
    }

    async fn document_records(
        &self,
        patient: &WalletAddress,
    ) -> Result<Vec<DocumentRecord>, ChainError> {
        self.require_bridge()?;
        self.check(LedgerOp::DocumentRecords, Some(patient))?;
        Ok(self
            .lock()
            .documents
            .get(patient)
            .cloned()
            .unwrap_or_default())
    }

    async fn is_patient(&self, address: &WalletAddress) -> Result<bool, ChainError> {
        self.require_bridge()?;
        Ok(self.lock().patients.contains_key(address))
    }

    async fn is_doctor(&self, address: &WalletAddress) -> Result<bool, ChainError> {
        self.require_bridge()?;
        Ok(self.lock().doctors.contains_key(address))
    }
}
