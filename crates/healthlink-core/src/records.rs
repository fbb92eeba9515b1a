//! User-initiated actions over the session and the three backends.
//!
//! Passive failures are absorbed by the [`SessionManager`]; everything here
//! is an explicit action, so every failure comes back as an [`ActionError`]
//! for the caller to report.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::access::{AccessGrant, AccessGrantStore};
use crate::content::{ContentBlob, ContentStoreClient, PinError};
use crate::identity::{
    AuthError, DoctorDraft, Identity, IdentityProviderClient, PatientDraft, Profile, ProfileDraft,
    ProfileId, Role,
};
use crate::ledger::{
    ChainError, DEFAULT_HEIGHT_CM, DocumentRecord, DoctorRegistration, LedgerClient,
    PatientDetails, TxReceipt, VitalRecord, WalletAddress,
};
use crate::session::{SessionManager, SessionSnapshot, WalletConnectError};
use crate::validation::{self, ValidationError};

/// Minimum document title length.
pub const MIN_DOCUMENT_TITLE_LEN: usize = 3;

/// Minimum document category length.
pub const MIN_DOCUMENT_CATEGORY_LEN: usize = 2;

/// Whether profile submission needs a connected wallet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WalletRequirement {
    /// Save the profile; register on chain only if a wallet is connected.
    #[default]
    Optional,
    /// Refuse to save without a connected wallet.
    Required,
}

/// Errors from user-initiated actions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ActionError {
    /// No one is signed in.
    #[error("not signed in")]
    NotSignedIn,

    /// The action belongs to the other role.
    #[error("this action requires a {required} account")]
    WrongRole {
        /// Role the action needs.
        required: Role,
        /// Role of the signed-in identity.
        actual: Role,
    },

    /// The action needs the caller's profile, which is not loaded.
    #[error("complete your profile first")]
    ProfileRequired,

    /// The action needs a connected wallet.
    #[error("connect a wallet first")]
    WalletRequired,

    /// Input failed validation; nothing was sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Identity provider failure.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Ledger failure.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Content store failure.
    #[error(transparent)]
    Pin(#[from] PinError),

    /// Wallet connection failure.
    #[error(transparent)]
    Wallet(#[from] WalletConnectError),
}

/// Outcome of a profile submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSubmission {
    /// The stored profile.
    pub profile: Profile,
    /// Registration receipt, `None` if no wallet was connected.
    pub registration: Option<TxReceipt>,
}

/// One blood-pressure/sugar/pulse reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VitalReading {
    /// Systolic pressure (mmHg).
    pub systolic: u32,
    /// Diastolic pressure (mmHg).
    pub diastolic: u32,
    /// Blood sugar (mg/dL).
    pub blood_sugar: u32,
    /// Heart rate (bpm).
    pub heart_rate: u32,
}

/// A document to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpload {
    /// Title.
    pub title: String,
    /// Category.
    pub category: String,
    /// Free-form notes.
    pub notes: String,
    /// The file.
    pub file: ContentBlob,
}

impl DocumentUpload {
    /// Checks field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_min_len("title", &self.title, MIN_DOCUMENT_TITLE_LEN)?;
        validation::validate_min_len("category", &self.category, MIN_DOCUMENT_CATEGORY_LEN)?;
        if self.file.is_empty() {
            return Err(ValidationError::Required { field: "file" });
        }
        Ok(())
    }
}

/// A ledger document entry with its gateway URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentView {
    /// The ledger entry.
    pub record: DocumentRecord,
    /// Where the content can be fetched.
    pub url: String,
}

/// Result of granting or revoking a doctor's access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessChange {
    /// The ledger transaction.
    pub receipt: TxReceipt,
    /// The audit row write; `None` when no doctor profile was named.
    pub audit: Option<Result<AccessGrant, AuthError>>,
}

/// A patient as seen by a doctor they share records with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedPatient {
    /// Patient wallet.
    pub address: WalletAddress,
    /// On-chain registration.
    pub details: PatientDetails,
    /// Vital records; empty if they could not be read.
    pub vitals: Vec<VitalRecord>,
    /// Documents; empty if they could not be read.
    pub documents: Vec<DocumentView>,
}

/// Actions a signed-in patient or doctor can take.
pub struct HealthRecordService {
    session: Arc<SessionManager>,
    identity: Arc<dyn IdentityProviderClient>,
    ledger: Arc<dyn LedgerClient>,
    content: Arc<dyn ContentStoreClient>,
    grants: Arc<dyn AccessGrantStore>,
    wallet_requirement: WalletRequirement,
}

impl std::fmt::Debug for HealthRecordService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthRecordService")
            .field("session", &self.session)
            .field("wallet_requirement", &self.wallet_requirement)
            .finish_non_exhaustive()
    }
}

impl HealthRecordService {
    /// Creates a service with [`WalletRequirement::Optional`].
    #[must_use]
    pub fn new(
        session: Arc<SessionManager>,
        identity: Arc<dyn IdentityProviderClient>,
        ledger: Arc<dyn LedgerClient>,
        content: Arc<dyn ContentStoreClient>,
        grants: Arc<dyn AccessGrantStore>,
    ) -> Self {
        Self {
            session,
            identity,
            ledger,
            content,
            grants,
            wallet_requirement: WalletRequirement::default(),
        }
    }

    /// Sets the wallet policy for profile submission.
    #[must_use]
    pub const fn with_wallet_requirement(mut self, requirement: WalletRequirement) -> Self {
        self.wallet_requirement = requirement;
        self
    }

    /// The session this service acts for.
    #[must_use]
    pub const fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    // ========================================================================
    // Profiles
    // ========================================================================

    /// Saves the patient profile and registers the patient on chain when a
    /// wallet is connected.
    ///
    /// The profile row is written first. A failed registration is returned
    /// after the session has been refreshed, so the saved profile is visible
    /// either way.
    pub async fn submit_patient_profile(
        &self,
        mut draft: PatientDraft,
        photo: Option<ContentBlob>,
    ) -> Result<ProfileSubmission, ActionError> {
        let snapshot = self.session.snapshot();
        let identity = require_role(&snapshot, Role::Patient)?;
        draft.validate()?;
        let wallet = self.profile_wallet(&snapshot)?;
        draft.wallet_address = draft.wallet_address.or(wallet).or(identity.wallet_address);

        let mut draft = ProfileDraft::Patient(draft);
        self.attach_photo(identity, &mut draft, photo).await?;
        let profile = self.identity.upsert_profile(&identity.id, &draft).await?;
        info!(identity_id = %identity.id, profile_id = %profile.id(), "patient profile saved");

        let registration = match (wallet, profile.as_patient()) {
            (Some(address), Some(patient)) => {
                let details = PatientDetails {
                    full_name: patient.full_name.clone(),
                    date_of_birth: patient.date_of_birth.to_string(),
                    weight_kg: patient.weight,
                    height_cm: DEFAULT_HEIGHT_CM,
                    aadhar_number: patient.aadhar_number.clone(),
                    blood_group: patient.blood_group.clone(),
                    phone_number: patient.phone_number.clone(),
                    is_married: patient.is_married,
                };
                debug!(address = %address, "registering patient on chain");
                Some(self.ledger.register_patient(&details).await)
            },
            _ => {
                info!(identity_id = %identity.id, "no wallet connected, on-chain registration deferred");
                None
            },
        };

        self.session.refresh().await;
        Ok(ProfileSubmission {
            profile,
            registration: registration.transpose()?,
        })
    }

    /// Saves the doctor profile and registers the doctor on chain when a
    /// wallet is connected.
    pub async fn submit_doctor_profile(
        &self,
        mut draft: DoctorDraft,
        photo: Option<ContentBlob>,
    ) -> Result<ProfileSubmission, ActionError> {
        let snapshot = self.session.snapshot();
        let identity = require_role(&snapshot, Role::Doctor)?;
        draft.specialized_areas = draft
            .specialized_areas
            .iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();
        draft.validate()?;
        let wallet = self.profile_wallet(&snapshot)?;
        draft.wallet_address = draft.wallet_address.or(wallet).or(identity.wallet_address);

        let mut draft = ProfileDraft::Doctor(draft);
        self.attach_photo(identity, &mut draft, photo).await?;
        let profile = self.identity.upsert_profile(&identity.id, &draft).await?;
        info!(identity_id = %identity.id, profile_id = %profile.id(), "doctor profile saved");

        let registration = match (wallet, profile.as_doctor()) {
            (Some(address), Some(doctor)) => {
                let registration = DoctorRegistration {
                    name: doctor.full_name.clone(),
                    qualification: doctor.qualification.clone(),
                    email: identity.email.clone(),
                    phone: doctor.phone_number.clone(),
                };
                debug!(address = %address, "registering doctor on chain");
                Some(self.ledger.register_doctor(&registration).await)
            },
            _ => {
                info!(identity_id = %identity.id, "no wallet connected, on-chain registration deferred");
                None
            },
        };

        self.session.refresh().await;
        Ok(ProfileSubmission {
            profile,
            registration: registration.transpose()?,
        })
    }

    fn profile_wallet(&self, snapshot: &SessionSnapshot) -> Result<Option<WalletAddress>, ActionError> {
        let wallet = snapshot.wallet.address();
        if wallet.is_none() && self.wallet_requirement == WalletRequirement::Required {
            return Err(ActionError::WalletRequired);
        }
        Ok(wallet)
    }

    async fn attach_photo(
        &self,
        identity: &Identity,
        draft: &mut ProfileDraft,
        photo: Option<ContentBlob>,
    ) -> Result<(), ActionError> {
        let Some(photo) = photo else {
            return Ok(());
        };
        let url = self
            .identity
            .upload_profile_photo(&identity.id, &photo.file_name, photo.bytes)
            .await?;
        draft.set_profile_photo_url(Some(url));
        Ok(())
    }

    // ========================================================================
    // Vitals and documents
    // ========================================================================

    /// Appends a vitals reading to the patient's ledger record.
    pub async fn record_vitals(
        &self,
        reading: VitalReading,
    ) -> Result<(VitalRecord, TxReceipt), ActionError> {
        let record = VitalRecord {
            recorded_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            systolic: reading.systolic,
            diastolic: reading.diastolic,
            blood_sugar: reading.blood_sugar,
            heart_rate: reading.heart_rate,
        };
        record.validate()?;
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Patient)?;
        let address = connected_wallet(&snapshot)?;

        let receipt = self.ledger.add_vital_record(&record).await?;
        info!(address = %address, tx_hash = %receipt.tx_hash, "vitals recorded");
        Ok((record, receipt))
    }

    /// Vital records of `patient`, or of the signed-in patient.
    pub async fn vitals(&self, patient: Option<WalletAddress>) -> Result<Vec<VitalRecord>, ActionError> {
        let address = self.subject(patient)?;
        Ok(self.ledger.vital_records(&address).await?)
    }

    /// Pins a document and records it on the patient's ledger record.
    ///
    /// If the ledger write fails the new pin is removed again.
    pub async fn upload_document(
        &self,
        upload: DocumentUpload,
    ) -> Result<(DocumentView, TxReceipt), ActionError> {
        upload.validate()?;
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Patient)?;
        let address = connected_wallet(&snapshot)?;

        let DocumentUpload {
            title,
            category,
            notes,
            file,
        } = upload;
        let cid = self.content.upload(file, title.trim(), category.trim()).await?;
        let record = DocumentRecord {
            content_id: cid.clone(),
            name: title.trim().to_string(),
            category: category.trim().to_string(),
            uploaded_on: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            notes,
        };

        let receipt = match self.ledger.add_document_record(&record).await {
            Ok(receipt) => receipt,
            Err(err) => {
                warn!(cid = %cid, error = %err, "ledger write failed, unpinning document");
                if let Err(unpin_err) = self.content.unpin(&cid).await {
                    warn!(cid = %cid, error = %unpin_err, "failed to unpin orphaned document");
                }
                return Err(err.into());
            },
        };
        info!(address = %address, cid = %cid, tx_hash = %receipt.tx_hash, "document recorded");
        let url = self.content.resolve_url(&cid);
        Ok((DocumentView { record, url }, receipt))
    }

    /// Documents of `patient`, or of the signed-in patient.
    pub async fn documents(
        &self,
        patient: Option<WalletAddress>,
    ) -> Result<Vec<DocumentView>, ActionError> {
        let address = self.subject(patient)?;
        let records = self.ledger.document_records(&address).await?;
        Ok(self.views(records))
    }

    /// Removes a document's pin. The ledger entry is append-only and stays.
    pub async fn unpin_document(&self, cid: &str) -> Result<(), ActionError> {
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Patient)?;
        self.content.unpin(cid).await?;
        Ok(())
    }

    fn views(&self, records: Vec<DocumentRecord>) -> Vec<DocumentView> {
        records
            .into_iter()
            .map(|record| DocumentView {
                url: self.content.resolve_url(&record.content_id),
                record,
            })
            .collect()
    }

    fn subject(&self, patient: Option<WalletAddress>) -> Result<WalletAddress, ActionError> {
        if let Some(address) = patient {
            return Ok(address);
        }
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Patient)?;
        snapshot.wallet_address().ok_or(ActionError::WalletRequired)
    }

    // ========================================================================
    // Access
    // ========================================================================

    /// Lets a doctor read the signed-in patient's records.
    ///
    /// `doctor_profile` names the doctor's profile row for the audit trail.
    pub async fn grant_access(
        &self,
        doctor: &WalletAddress,
        doctor_profile: Option<&ProfileId>,
    ) -> Result<AccessChange, ActionError> {
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Patient)?;
        connected_wallet(&snapshot)?;

        let receipt = self.ledger.grant_access(doctor).await?;
        info!(doctor = %doctor, tx_hash = %receipt.tx_hash, "access granted");
        let audit = match doctor_profile {
            Some(doctor_id) => Some(match snapshot.patient_profile() {
                Some(patient) => self.grants.grant(&patient.id, doctor_id).await,
                None => Err(missing_patient_profile()),
            }),
            None => None,
        };
        log_audit(audit.as_ref());
        Ok(AccessChange { receipt, audit })
    }

    /// Withdraws a doctor's access to the signed-in patient's records.
    pub async fn revoke_access(
        &self,
        doctor: &WalletAddress,
        doctor_profile: Option<&ProfileId>,
    ) -> Result<AccessChange, ActionError> {
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Patient)?;
        connected_wallet(&snapshot)?;

        let receipt = self.ledger.revoke_access(doctor).await?;
        info!(doctor = %doctor, tx_hash = %receipt.tx_hash, "access revoked");
        let audit = match doctor_profile {
            Some(doctor_id) => Some(match snapshot.patient_profile() {
                Some(patient) => self.grants.revoke(&patient.id, doctor_id).await,
                None => Err(missing_patient_profile()),
            }),
            None => None,
        };
        log_audit(audit.as_ref());
        Ok(AccessChange { receipt, audit })
    }

    /// Effective grants of the signed-in user: doctors for a patient,
    /// patients for a doctor.
    pub async fn access_grants(&self) -> Result<Vec<AccessGrant>, ActionError> {
        let snapshot = self.session.snapshot();
        if snapshot.identity.is_none() {
            return Err(ActionError::NotSignedIn);
        }
        let grants = match &snapshot.profile {
            Some(Profile::Patient(patient)) => self.grants.doctors_of(&patient.id).await?,
            Some(Profile::Doctor(doctor)) => self.grants.patients_of(&doctor.id).await?,
            None => return Err(ActionError::ProfileRequired),
        };
        Ok(grants)
    }

    /// Patients who shared their records with the signed-in doctor.
    ///
    /// A patient whose details cannot be read is left out; failed vitals or
    /// document reads come back as empty lists.
    pub async fn shared_patients(&self) -> Result<Vec<SharedPatient>, ActionError> {
        let snapshot = self.session.snapshot();
        require_role(&snapshot, Role::Doctor)?;
        let address = snapshot.wallet_address().ok_or(ActionError::WalletRequired)?;
        let doctor = self.ledger.doctor_details(&address).await?;

        let loads = doctor
            .shared_patients
            .iter()
            .map(|patient| self.shared_patient(*patient));
        let patients: Vec<SharedPatient> = join_all(loads).await.into_iter().flatten().collect();
        debug!(
            doctor = %address,
            shared = doctor.shared_patients.len(),
            loaded = patients.len(),
            "shared patients loaded"
        );
        Ok(patients)
    }

    async fn shared_patient(&self, address: WalletAddress) -> Option<SharedPatient> {
        let (details, vitals, documents) = futures::join!(
            self.ledger.patient_details(&address),
            self.ledger.vital_records(&address),
            self.ledger.document_records(&address),
        );
        let details = details
            .inspect_err(|err| warn!(patient = %address, error = %err, "skipping unreadable patient"))
            .ok()?;
        let vitals = vitals.unwrap_or_else(|err| {
            warn!(patient = %address, error = %err, "vital records unavailable");
            Vec::new()
        });
        let documents = documents.unwrap_or_else(|err| {
            warn!(patient = %address, error = %err, "documents unavailable");
            Vec::new()
        });
        Some(SharedPatient {
            address,
            details,
            vitals,
            documents: self.views(documents),
        })
    }
}

fn require_role(snapshot: &SessionSnapshot, required: Role) -> Result<&Identity, ActionError> {
    let identity = snapshot.identity.as_ref().ok_or(ActionError::NotSignedIn)?;
    if identity.role != required {
        return Err(ActionError::WrongRole {
            required,
            actual: identity.role,
        });
    }
    Ok(identity)
}

fn connected_wallet(snapshot: &SessionSnapshot) -> Result<WalletAddress, ActionError> {
    snapshot.wallet.address().ok_or(ActionError::WalletRequired)
}

fn missing_patient_profile() -> AuthError {
    AuthError::NotFound {
        what: "patient profile".into(),
    }
}

fn log_audit(audit: Option<&Result<AccessGrant, AuthError>>) {
    match audit {
        Some(Ok(grant)) => debug!(
            patient_id = %grant.patient_id,
            doctor_id = %grant.doctor_id,
            active = grant.is_active,
            "access audit recorded"
        ),
        Some(Err(err)) => warn!(error = %err, "access audit not recorded"),
        None => debug!("no doctor profile named, access audit skipped"),
    }
}
