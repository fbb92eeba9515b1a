//! Bindings for the health-record contract.
//!
//! Each write method has a call encoder and each view method a call encoder
//! plus a return-data decoder. Selectors are the first four bytes of the
//! Keccak-256 hash of the canonical signature.

use super::abi::{self, ParamType, Selector, Token};
use super::address::WalletAddress;
use super::error::ChainError;
use super::types::{DoctorDetails, DoctorRegistration, DocumentRecord, PatientDetails, VitalRecord};

/// Function selectors.
pub mod selectors {
    use super::Selector;

    /// `registerPatient(string,string,uint256,uint256,string,string,string,bool)`
    pub const REGISTER_PATIENT: Selector = [0x05, 0xce, 0xd8, 0xa8];
    /// `registerDoctor(string,string,string,string)`
    pub const REGISTER_DOCTOR: Selector = [0x33, 0xa8, 0x58, 0x7f];
    /// `addDailyReport(string,uint256,uint256,uint256,uint256)`
    pub const ADD_DAILY_REPORT: Selector = [0x33, 0xe1, 0x97, 0x52];
    /// `uploadFile(string,string,string,string,string)`
    pub const UPLOAD_FILE: Selector = [0xef, 0x8b, 0x38, 0x39];
    /// `grantAccess(address)`
    pub const GRANT_ACCESS: Selector = [0x0a, 0xe5, 0xe7, 0x39];
    /// `revokeAccess(address)`
    pub const REVOKE_ACCESS: Selector = [0x85, 0xe6, 0x85, 0x31];
    /// `getPatientDetails(address)`
    pub const GET_PATIENT_DETAILS: Selector = [0xef, 0xe2, 0xcc, 0xc1];
    /// `getDoctorDetails(address)`
    pub const GET_DOCTOR_DETAILS: Selector = [0xba, 0xb9, 0x0d, 0xbd];
    /// `getDailyReports(address)`
    pub const GET_DAILY_REPORTS: Selector = [0xb2, 0x9f, 0xcc, 0x2f];
    /// `getFiles(address)`
    pub const GET_FILES: Selector = [0x43, 0x3b, 0xf3, 0x7b];
    /// `isPatient(address)`
    pub const IS_PATIENT: Selector = [0x8f, 0x9c, 0x79, 0xed];
    /// `isDoctor(address)`
    pub const IS_DOCTOR: Selector = [0x99, 0x64, 0x40, 0xc6];
}

// =============================================================================
// Call encoders
// =============================================================================

/// Encodes `registerPatient`.
#[must_use]
pub fn register_patient(details: &PatientDetails) -> Vec<u8> {
    abi::encode_call(
        selectors::REGISTER_PATIENT,
        &[
            Token::String(details.full_name.clone()),
            Token::String(details.date_of_birth.clone()),
            Token::Uint(details.weight_kg.into()),
            Token::Uint(details.height_cm.into()),
            Token::String(details.aadhar_number.clone()),
            Token::String(details.blood_group.clone()),
            Token::String(details.phone_number.clone()),
            Token::Bool(details.is_married),
        ],
    )
}

/// Encodes `registerDoctor`.
#[must_use]
pub fn register_doctor(registration: &DoctorRegistration) -> Vec<u8> {
    abi::encode_call(
        selectors::REGISTER_DOCTOR,
        &[
            Token::String(registration.name.clone()),
            Token::String(registration.qualification.clone()),
            Token::String(registration.email.clone()),
            Token::String(registration.phone.clone()),
        ],
    )
}

/// Encodes `addDailyReport`.
#[must_use]
pub fn add_daily_report(vitals: &VitalRecord) -> Vec<u8> {
    abi::encode_call(
        selectors::ADD_DAILY_REPORT,
        &[
            Token::String(vitals.recorded_at.clone()),
            Token::Uint(vitals.systolic.into()),
            Token::Uint(vitals.diastolic.into()),
            Token::Uint(vitals.blood_sugar.into()),
            Token::Uint(vitals.heart_rate.into()),
        ],
    )
}

/// Encodes `uploadFile`.
#[must_use]
pub fn upload_file(document: &DocumentRecord) -> Vec<u8> {
    abi::encode_call(
        selectors::UPLOAD_FILE,
        &[
            Token::String(document.content_id.clone()),
            Token::String(document.name.clone()),
            Token::String(document.category.clone()),
            Token::String(document.uploaded_on.clone()),
            Token::String(document.notes.clone()),
        ],
    )
}

/// Encodes a single-address call such as `grantAccess` or `getFiles`.
#[must_use]
pub fn address_call(selector: Selector, address: &WalletAddress) -> Vec<u8> {
    abi::encode_call(selector, &[Token::Address(*address)])
}

// =============================================================================
// Return decoders
// =============================================================================

/// Sequential reader over decoded return values.
struct Fields(std::vec::IntoIter<Token>);

impl Fields {
    fn next(&mut self, what: &'static str) -> Result<Token, ChainError> {
        self.0
            .next()
            .ok_or_else(|| ChainError::MalformedResponse(format!("missing {what}")))
    }

    fn string(&mut self, what: &'static str) -> Result<String, ChainError> {
        Ok(self.next(what)?.into_string()?)
    }

    fn uint(&mut self, what: &'static str) -> Result<u32, ChainError> {
        let value = self.next(what)?.into_uint()?;
        u32::try_from(value)
            .map_err(|_| ChainError::MalformedResponse(format!("{what} out of range: {value}")))
    }

    fn bool(&mut self, what: &'static str) -> Result<bool, ChainError> {
        Ok(self.next(what)?.into_bool()?)
    }
}

fn patient_details_types() -> Vec<ParamType> {
    vec![
        ParamType::String,
        ParamType::String,
        ParamType::Uint,
        ParamType::Uint,
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::Bool,
    ]
}

fn daily_report_type() -> ParamType {
    ParamType::Tuple(vec![
        ParamType::String,
        ParamType::Uint,
        ParamType::Uint,
        ParamType::Uint,
        ParamType::Uint,
    ])
}

fn file_type() -> ParamType {
    ParamType::Tuple(vec![ParamType::String; 5])
}

/// Decodes `getPatientDetails` return data.
pub fn decode_patient_details(data: &[u8]) -> Result<PatientDetails, ChainError> {
    let mut fields = Fields(abi::decode(&patient_details_types(), data)?.into_iter());
    Ok(PatientDetails {
        full_name: fields.string("full name")?,
        date_of_birth: fields.string("date of birth")?,
        weight_kg: fields.uint("weight")?,
        height_cm: fields.uint("height")?,
        aadhar_number: fields.string("aadhaar number")?,
        blood_group: fields.string("blood group")?,
        phone_number: fields.string("phone number")?,
        is_married: fields.bool("marital status")?,
    })
}

/// Decodes `getDoctorDetails` return data.
pub fn decode_doctor_details(data: &[u8]) -> Result<DoctorDetails, ChainError> {
    let types = [
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::String,
        ParamType::Array(Box::new(ParamType::Address)),
    ];
    let mut fields = Fields(abi::decode(&types, data)?.into_iter());
    let registration = DoctorRegistration {
        name: fields.string("name")?,
        qualification: fields.string("qualification")?,
        email: fields.string("email")?,
        phone: fields.string("phone")?,
    };
    let shared_patients = fields
        .next("shared patients")?
        .into_array()?
        .into_iter()
        .map(Token::into_address)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DoctorDetails {
        registration,
        shared_patients,
    })
}

/// Decodes `getDailyReports` return data.
pub fn decode_daily_reports(data: &[u8]) -> Result<Vec<VitalRecord>, ChainError> {
    let reports = abi::decode_one(&ParamType::Array(Box::new(daily_report_type())), data)?;
    reports
        .into_array()?
        .into_iter()
        .map(|report| -> Result<VitalRecord, ChainError> {
            let mut fields = Fields(report.into_tuple()?.into_iter());
            Ok(VitalRecord {
                recorded_at: fields.string("recorded at")?,
                systolic: fields.uint("systolic")?,
                diastolic: fields.uint("diastolic")?,
                blood_sugar: fields.uint("blood sugar")?,
                heart_rate: fields.uint("heart rate")?,
            })
        })
        .collect()
}

/// Decodes `getFiles` return data.
pub fn decode_files(data: &[u8]) -> Result<Vec<DocumentRecord>, ChainError> {
    let files = abi::decode_one(&ParamType::Array(Box::new(file_type())), data)?;
    files
        .into_array()?
        .into_iter()
        .map(|file| -> Result<DocumentRecord, ChainError> {
            let mut fields = Fields(file.into_tuple()?.into_iter());
            Ok(DocumentRecord {
                content_id: fields.string("cid")?,
                name: fields.string("name")?,
                category: fields.string("category")?,
                uploaded_on: fields.string("upload date")?,
                notes: fields.string("description")?,
            })
        })
        .collect()
}

/// Decodes a `bool` view result (`isPatient`, `isDoctor`).
pub fn decode_bool(data: &[u8]) -> Result<bool, ChainError> {
    Ok(abi::decode_one(&ParamType::Bool, data)?.into_bool()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::abi::encode;

    fn patient() -> PatientDetails {
        PatientDetails {
            full_name: "Asha Verma".into(),
            date_of_birth: "1990-04-12".into(),
            weight_kg: 61,
            height_cm: 170,
            aadhar_number: "123412341234".into(),
            blood_group: "B+".into(),
            phone_number: "9876543210".into(),
            is_married: true,
        }
    }

    #[test]
    fn test_register_patient_layout() {
        let call = register_patient(&patient());
        assert_eq!(&call[..4], &selectors::REGISTER_PATIENT);
        let args = &call[4..];
        // weight and height are static words in the head
        assert_eq!(args[2 * 32 + 31], 61);
        assert_eq!(args[3 * 32 + 31], 170);
        // is_married is the last head word
        assert_eq!(args[7 * 32 + 31], 1);
    }

    #[test]
    fn test_patient_details_decodes_contract_output() {
        let details = patient();
        let data = encode(&[
            Token::String(details.full_name.clone()),
            Token::String(details.date_of_birth.clone()),
            Token::Uint(61),
            Token::Uint(170),
            Token::String(details.aadhar_number.clone()),
            Token::String(details.blood_group.clone()),
            Token::String(details.phone_number.clone()),
            Token::Bool(true),
        ]);
        assert_eq!(decode_patient_details(&data).unwrap(), details);
    }

    #[test]
    fn test_doctor_details_with_shared_patients() {
        let p1 = WalletAddress::from_bytes([1; 20]);
        let p2 = WalletAddress::from_bytes([2; 20]);
        let data = encode(&[
            Token::String("Dr. Rao".into()),
            Token::String("MD".into()),
            Token::String("rao@clinic.in".into()),
            Token::String("9123456780".into()),
            Token::Array(vec![Token::Address(p1), Token::Address(p2)]),
        ]);
        let details = decode_doctor_details(&data).unwrap();
        assert_eq!(details.registration.name, "Dr. Rao");
        assert_eq!(details.shared_patients, vec![p1, p2]);
    }

    #[test]
    fn test_daily_reports_decode() {
        let data = encode(&[Token::Array(vec![Token::Tuple(vec![
            Token::String("2024-05-01T08:00:00Z".into()),
            Token::Uint(118),
            Token::Uint(79),
            Token::Uint(101),
            Token::Uint(70),
        ])])]);
        let reports = decode_daily_reports(&data).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].systolic, 118);
        assert_eq!(reports[0].heart_rate, 70);
    }

    #[test]
    fn test_files_decode_empty() {
        let data = encode(&[Token::Array(Vec::new())]);
        assert!(decode_files(&data).unwrap().is_empty());
    }

    #[test]
    fn test_oversized_uint_reported_as_malformed() {
        let data = encode(&[Token::Array(vec![Token::Tuple(vec![
            Token::String("t".into()),
            Token::Uint(u128::from(u32::MAX) + 1),
            Token::Uint(1),
            Token::Uint(1),
            Token::Uint(1),
        ])])]);
        assert!(matches!(
            decode_daily_reports(&data),
            Err(ChainError::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_bool_view() {
        assert!(decode_bool(&encode(&[Token::Bool(true)])).unwrap());
        assert!(decode_bool(&[]).is_err());
    }
}
