//! Records exchanged with the health-record contract.

use serde::{Deserialize, Serialize};

use super::address::WalletAddress;
use crate::validation::{
    self, BLOOD_SUGAR_RANGE, DIASTOLIC_RANGE, HEART_RATE_RANGE, SYSTOLIC_RANGE, ValidationError,
};

/// Height registered on chain when the patient has not supplied one.
pub const DEFAULT_HEIGHT_CM: u32 = 170;

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash (`0x`-prefixed hex).
    pub tx_hash: String,
    /// Block the transaction was included in.
    pub block_number: Option<u64>,
    /// Gas consumed.
    pub gas_used: Option<u64>,
}

/// Patient demographics as stored by `registerPatient` and returned by
/// `getPatientDetails`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    /// Full name.
    pub full_name: String,
    /// Date of birth (`YYYY-MM-DD`).
    pub date_of_birth: String,
    /// Weight in kilograms.
    pub weight_kg: u32,
    /// Height in centimetres.
    pub height_cm: u32,
    /// Aadhaar number.
    pub aadhar_number: String,
    /// Blood group, e.g. `O+`.
    pub blood_group: String,
    /// Phone number.
    pub phone_number: String,
    /// Marital status.
    pub is_married: bool,
}

/// Doctor registration fields for `registerDoctor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorRegistration {
    /// Display name.
    pub name: String,
    /// Qualification, e.g. `MBBS, MD`.
    pub qualification: String,
    /// Contact email.
    pub email: String,
    /// Contact phone.
    pub phone: String,
}

/// Doctor record returned by `getDoctorDetails`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoctorDetails {
    /// Registration fields.
    #[serde(flatten)]
    pub registration: DoctorRegistration,
    /// Patients that granted this doctor access.
    pub shared_patients: Vec<WalletAddress>,
}

/// One daily vitals report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VitalRecord {
    /// When the reading was taken (RFC 3339).
    pub recorded_at: String,
    /// Systolic pressure in mmHg.
    pub systolic: u32,
    /// Diastolic pressure in mmHg.
    pub diastolic: u32,
    /// Blood sugar in mg/dL.
    pub blood_sugar: u32,
    /// Heart rate in bpm.
    pub heart_rate: u32,
}

impl VitalRecord {
    /// Checks every reading against its accepted range.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validation::validate_range("systolic pressure", self.systolic, &SYSTOLIC_RANGE, "mmHg")?;
        validation::validate_range(
            "diastolic pressure",
            self.diastolic,
            &DIASTOLIC_RANGE,
            "mmHg",
        )?;
        validation::validate_range("blood sugar", self.blood_sugar, &BLOOD_SUGAR_RANGE, "mg/dL")?;
        validation::validate_range("heart rate", self.heart_rate, &HEART_RATE_RANGE, "bpm")
    }
}

/// Index entry for a document pinned to the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Content identifier of the pinned file.
    pub content_id: String,
    /// Document title.
    pub name: String,
    /// Category, e.g. `Lab Report`.
    pub category: String,
    /// Upload date (RFC 3339).
    pub uploaded_on: String,
    /// Free-form notes.
    pub notes: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vitals() -> VitalRecord {
        VitalRecord {
            recorded_at: "2024-05-01T08:00:00Z".into(),
            systolic: 120,
            diastolic: 80,
            blood_sugar: 95,
            heart_rate: 72,
        }
    }

    #[test]
    fn test_vitals_in_range() {
        assert!(vitals().validate().is_ok());
    }

    #[test]
    fn test_vitals_out_of_range_names_field() {
        let mut record = vitals();
        record.diastolic = 130;
        let err = record.validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: "diastolic pressure",
                min: 40,
                max: 120,
                unit: "mmHg",
            }
        );

        let mut record = vitals();
        record.blood_sugar = 29;
        assert!(record.validate().is_err());
    }
}
