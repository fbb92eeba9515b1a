//! Role-specific profile records and the drafts used to write them.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::types::{IdentityId, Role};
use crate::ledger::{WalletAddress, address};
use crate::validation::{self, ValidationError};

/// Minimum patient name length.
pub const MIN_PATIENT_NAME_LEN: usize = 3;

/// Minimum doctor name and qualification length.
pub const MIN_DOCTOR_FIELD_LEN: usize = 2;

/// Patient phone numbers are exactly this many digits.
pub const PATIENT_PHONE_DIGITS: usize = 10;

/// Doctor phone numbers have at least this many digits.
pub const MIN_DOCTOR_PHONE_DIGITS: usize = 10;

/// Aadhaar numbers are exactly this many digits.
pub const AADHAAR_DIGITS: usize = 12;

/// Identifier of a profile row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    /// Wraps a row id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads an address column that may be null, empty, or garbage.
fn lenient_address<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<WalletAddress>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(address::parse_optional(raw.as_deref()).unwrap_or_else(|err| {
        debug!(error = %err, "ignoring malformed wallet address column");
        None
    }))
}

/// Reads a text column where empty means unset.
fn non_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()))
}

/// Patient profile row (`patients`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientProfile {
    /// Row id.
    pub id: ProfileId,
    /// Owning identity.
    pub user_id: IdentityId,
    /// Full name.
    pub full_name: String,
    /// Date of birth.
    pub date_of_birth: NaiveDate,
    /// Blood group, e.g. `AB-`.
    pub blood_group: String,
    /// Weight in kilograms.
    pub weight: u32,
    /// Aadhaar number.
    pub aadhar_number: String,
    /// Phone number.
    pub phone_number: String,
    /// Marital status.
    pub is_married: bool,
    /// Wallet recorded with the profile.
    #[serde(rename = "eth_address", default, deserialize_with = "lenient_address")]
    pub wallet_address: Option<WalletAddress>,
    /// Public URL of the profile photo.
    #[serde(default, deserialize_with = "non_empty")]
    pub profile_photo_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Doctor profile row (`doctors`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorProfile {
    /// Row id.
    pub id: ProfileId,
    /// Owning identity.
    pub user_id: IdentityId,
    /// Full name.
    pub full_name: String,
    /// Qualification.
    pub qualification: String,
    /// Areas of specialization.
    #[serde(default)]
    pub specialized_areas: Vec<String>,
    /// Phone number.
    pub phone_number: String,
    /// Wallet recorded with the profile.
    #[serde(rename = "eth_address", default, deserialize_with = "lenient_address")]
    pub wallet_address: Option<WalletAddress>,
    /// Public URL of the profile photo.
    #[serde(default, deserialize_with = "non_empty")]
    pub profile_photo_url: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A role profile. The variant always matches the owning identity's role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Profile {
    /// Patient profile.
    Patient(PatientProfile),
    /// Doctor profile.
    Doctor(DoctorProfile),
}

impl Profile {
    /// Role this profile belongs to.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::Patient(_) => Role::Patient,
            Self::Doctor(_) => Role::Doctor,
        }
    }

    /// Row id.
    #[must_use]
    pub const fn id(&self) -> &ProfileId {
        match self {
            Self::Patient(p) => &p.id,
            Self::Doctor(d) => &d.id,
        }
    }

    /// Owning identity.
    #[must_use]
    pub const fn user_id(&self) -> &IdentityId {
        match self {
            Self::Patient(p) => &p.user_id,
            Self::Doctor(d) => &d.user_id,
        }
    }

    /// Wallet recorded with the profile.
    #[must_use]
    pub const fn wallet_address(&self) -> Option<&WalletAddress> {
        match self {
            Self::Patient(p) => p.wallet_address.as_ref(),
            Self::Doctor(d) => d.wallet_address.as_ref(),
        }
    }

    /// Returns the patient profile, if this is one.
    #[must_use]
    pub const fn as_patient(&self) -> Option<&PatientProfile> {
        match self {
            Self::Patient(p) => Some(p),
            Self::Doctor(_) => None,
        }
    }

    /// Returns the doctor profile, if this is one.
    #[must_use]
    pub const fn as_doctor(&self) -> Option<&DoctorProfile> {
        match self {
            Self::Doctor(d) => Some(d),
            Self::Patient(_) => None,
        }
    }
}

/// Fields submitted to create or update a patient profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatientDraft {
    /// Full name.
    pub full_name: String,
    /// Date of birth.
    pub date_of_birth: NaiveDate,
    /// Blood group.
    pub blood_group: String,
    /// Weight in kilograms.
    pub weight: u32,
    /// Aadhaar number.
    pub aadhar_number: String,
    /// Phone number.
    pub phone_number: String,
    /// Marital status.
    pub is_married: bool,
    /// Wallet to record with the profile.
    #[serde(rename = "eth_address")]
    pub wallet_address: Option<WalletAddress>,
    /// Public URL of an uploaded photo.
    pub profile_photo_url: Option<String>,
}

impl PatientDraft {
    /// Validates against today's date.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_on(Utc::now().date_naive())
    }

    /// Validates with an explicit notion of "today".
    pub fn validate_on(&self, today: NaiveDate) -> Result<(), ValidationError> {
        validation::validate_min_len("full name", &self.full_name, MIN_PATIENT_NAME_LEN)?;
        if self.date_of_birth > today {
            return Err(ValidationError::Invalid {
                field: "date of birth",
                reason: "must not be in the future".into(),
            });
        }
        validation::validate_blood_group(&self.blood_group)?;
        if self.weight == 0 {
            return Err(ValidationError::Invalid {
                field: "weight",
                reason: "must be greater than zero".into(),
            });
        }
        validation::validate_digits("aadhaar number", &self.aadhar_number, AADHAAR_DIGITS)?;
        validation::validate_digits("phone number", &self.phone_number, PATIENT_PHONE_DIGITS)
    }

    /// Materializes the row the store would hold for this draft.
    #[must_use]
    pub fn into_profile(
        self,
        id: ProfileId,
        user_id: IdentityId,
        created_at: DateTime<Utc>,
    ) -> PatientProfile {
        PatientProfile {
            id,
            user_id,
            full_name: self.full_name,
            date_of_birth: self.date_of_birth,
            blood_group: self.blood_group,
            weight: self.weight,
            aadhar_number: self.aadhar_number,
            phone_number: self.phone_number,
            is_married: self.is_married,
            wallet_address: self.wallet_address,
            profile_photo_url: self.profile_photo_url,
            created_at,
        }
    }
}

/// Fields submitted to create or update a doctor profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorDraft {
    /// Full name.
    pub full_name: String,
    /// Qualification.
    pub qualification: String,
    /// Areas of specialization.
    pub specialized_areas: Vec<String>,
    /// Phone number.
    pub phone_number: String,
    /// Wallet to record with the profile.
    #[serde(rename = "eth_address")]
    pub wallet_address: Option<WalletAddress>,
    /// Public URL of an uploaded photo.
    pub profile_photo_url: Option<String>,
}

impl DoctorDraft {
    /// Checks field constraints.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_min_len("full name", &self.full_name, MIN_DOCTOR_FIELD_LEN)?;
        validation::validate_min_len("qualification", &self.qualification, MIN_DOCTOR_FIELD_LEN)?;
        if self.specialized_areas.iter().all(|a| a.trim().is_empty()) {
            return Err(ValidationError::Required {
                field: "specialized areas",
            });
        }
        let digits = self
            .phone_number
            .chars()
            .filter(char::is_ascii_digit)
            .count();
        if digits < MIN_DOCTOR_PHONE_DIGITS {
            return Err(ValidationError::TooShort {
                field: "phone number",
                min: MIN_DOCTOR_PHONE_DIGITS,
            });
        }
        Ok(())
    }

    /// Materializes the row the store would hold for this draft.
    #[must_use]
    pub fn into_profile(
        self,
        id: ProfileId,
        user_id: IdentityId,
        created_at: DateTime<Utc>,
    ) -> DoctorProfile {
        DoctorProfile {
            id,
            user_id,
            full_name: self.full_name,
            qualification: self.qualification,
            specialized_areas: self.specialized_areas,
            phone_number: self.phone_number,
            wallet_address: self.wallet_address,
            profile_photo_url: self.profile_photo_url,
            created_at,
        }
    }
}

/// A profile write, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProfileDraft {
    /// Patient fields.
    Patient(PatientDraft),
    /// Doctor fields.
    Doctor(DoctorDraft),
}

impl ProfileDraft {
    /// Profile kind being written.
    #[must_use]
    pub const fn kind(&self) -> Role {
        match self {
            Self::Patient(_) => Role::Patient,
            Self::Doctor(_) => Role::Doctor,
        }
    }

    /// Checks field constraints for either kind.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Patient(draft) => draft.validate(),
            Self::Doctor(draft) => draft.validate(),
        }
    }

    /// Sets the wallet recorded with the profile.
    pub fn set_wallet_address(&mut self, address: Option<WalletAddress>) {
        match self {
            Self::Patient(draft) => draft.wallet_address = address,
            Self::Doctor(draft) => draft.wallet_address = address,
        }
    }

    /// Sets the photo URL recorded with the profile.
    pub fn set_profile_photo_url(&mut self, url: Option<String>) {
        match self {
            Self::Patient(draft) => draft.profile_photo_url = url,
            Self::Doctor(draft) => draft.profile_photo_url = url,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn patient_draft() -> PatientDraft {
        PatientDraft {
            full_name: "Asha Verma".into(),
            date_of_birth: NaiveDate::from_ymd_opt(1990, 4, 12).unwrap(),
            blood_group: "B+".into(),
            weight: 61,
            aadhar_number: "123412341234".into(),
            phone_number: "9876543210".into(),
            is_married: true,
            wallet_address: None,
            profile_photo_url: None,
        }
    }

    fn doctor_draft() -> DoctorDraft {
        DoctorDraft {
            full_name: "Dr. Rao".into(),
            qualification: "MD".into(),
            specialized_areas: validation::split_list("Cardiology, Internal Medicine"),
            phone_number: "+91 91234 56780".into(),
            wallet_address: None,
            profile_photo_url: None,
        }
    }

    #[test]
    fn test_patient_draft_valid() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        assert!(patient_draft().validate_on(today).is_ok());
    }

    #[test]
    fn test_patient_draft_rejects_future_birth_date() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let mut draft = patient_draft();
        draft.date_of_birth = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        assert!(matches!(
            draft.validate_on(today),
            Err(ValidationError::Invalid {
                field: "date of birth",
                ..
            })
        ));
    }

    #[test]
    fn test_patient_draft_field_rules() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();

        let mut draft = patient_draft();
        draft.aadhar_number = "1234".into();
        assert!(draft.validate_on(today).is_err());

        let mut draft = patient_draft();
        draft.weight = 0;
        assert!(draft.validate_on(today).is_err());

        let mut draft = patient_draft();
        draft.blood_group = "Z".into();
        assert!(draft.validate_on(today).is_err());
    }

    #[test]
    fn test_doctor_draft_rules() {
        assert!(doctor_draft().validate().is_ok());

        let mut draft = doctor_draft();
        draft.specialized_areas = validation::split_list(" , ");
        assert_eq!(
            draft.validate(),
            Err(ValidationError::Required {
                field: "specialized areas"
            })
        );

        let mut draft = doctor_draft();
        draft.phone_number = "12345".into();
        assert!(draft.validate().is_err());
    }

    #[test]
    fn test_row_with_empty_columns_parses() {
        let row = json!({
            "id": "p-1",
            "user_id": "u-1",
            "full_name": "Asha Verma",
            "date_of_birth": "1990-04-12",
            "blood_group": "B+",
            "weight": 61,
            "aadhar_number": "123412341234",
            "phone_number": "9876543210",
            "is_married": false,
            "eth_address": "",
            "profile_photo_url": "",
            "created_at": "2024-05-01T10:00:00+00:00"
        });
        let profile: PatientProfile = serde_json::from_value(row).unwrap();
        assert_eq!(profile.wallet_address, None);
        assert_eq!(profile.profile_photo_url, None);
        assert_eq!(profile.user_id, IdentityId::new("u-1"));
    }

    #[test]
    fn test_profile_accessors() {
        let profile = Profile::Patient(patient_draft().into_profile(
            ProfileId::new("p-1"),
            IdentityId::new("u-1"),
            Utc::now(),
        ));
        assert_eq!(profile.role(), Role::Patient);
        assert!(profile.as_doctor().is_none());
        assert_eq!(profile.user_id().as_str(), "u-1");
    }
}
