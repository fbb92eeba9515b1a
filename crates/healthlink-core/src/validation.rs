//! Field validation applied before any external call.
//!
//! Every user-supplied record (sign-up credentials, profile drafts, vitals,
//! document uploads) is checked here first so that a malformed value never
//! reaches the identity provider, the ledger, or the content store.

use std::ops::RangeInclusive;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Minimum password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Accepted blood groups.
pub const BLOOD_GROUPS: [&str; 8] = ["A+", "A-", "B+", "B-", "AB+", "AB-", "O+", "O-"];

/// Systolic pressure range in mmHg.
pub const SYSTOLIC_RANGE: RangeInclusive<u32> = 70..=220;

/// Diastolic pressure range in mmHg.
pub const DIASTOLIC_RANGE: RangeInclusive<u32> = 40..=120;

/// Blood sugar range in mg/dL.
pub const BLOOD_SUGAR_RANGE: RangeInclusive<u32> = 30..=600;

/// Heart rate range in bpm.
pub const HEART_RATE_RANGE: RangeInclusive<u32> = 40..=220;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid regex"));

/// A field constraint violation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ValidationError {
    /// The field is empty.
    #[error("{field} is required")]
    Required {
        /// Field name.
        field: &'static str,
    },

    /// The field is shorter than allowed.
    #[error("{field} must be at least {min} characters")]
    TooShort {
        /// Field name.
        field: &'static str,
        /// Minimum length.
        min: usize,
    },

    /// The field must consist of an exact number of digits.
    #[error("{field} must be exactly {len} digits")]
    DigitCount {
        /// Field name.
        field: &'static str,
        /// Required digit count.
        len: usize,
    },

    /// A numeric value falls outside its accepted range.
    #[error("{field} must be between {min} and {max} {unit}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Lower bound (inclusive).
        min: u32,
        /// Upper bound (inclusive).
        max: u32,
        /// Unit of measure.
        unit: &'static str,
    },

    /// The field has the wrong format.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Checks an email address.
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ValidationError::Required { field: "email" });
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ValidationError::Invalid {
            field: "email",
            reason: "not a valid email address".into(),
        });
    }
    Ok(())
}

/// Checks password strength: minimum length plus lower case, upper case
/// and a digit.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ValidationError::TooShort {
            field: "password",
            min: MIN_PASSWORD_LEN,
        });
    }
    let has_lower = password.chars().any(char::is_lowercase);
    let has_upper = password.chars().any(char::is_uppercase);
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !(has_lower && has_upper && has_digit) {
        return Err(ValidationError::Invalid {
            field: "password",
            reason: "must contain a lowercase letter, an uppercase letter and a digit".into(),
        });
    }
    Ok(())
}

/// Checks that a trimmed text field has at least `min` characters.
pub fn validate_min_len(field: &'static str, value: &str, min: usize) -> Result<(), ValidationError> {
    let len = value.trim().chars().count();
    if len == 0 {
        return Err(ValidationError::Required { field });
    }
    if len < min {
        return Err(ValidationError::TooShort { field, min });
    }
    Ok(())
}

/// Checks that a field is exactly `len` ASCII digits.
pub fn validate_digits(field: &'static str, value: &str, len: usize) -> Result<(), ValidationError> {
    let value = value.trim();
    if value.len() != len || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::DigitCount { field, len });
    }
    Ok(())
}

/// Checks a blood group against [`BLOOD_GROUPS`].
pub fn validate_blood_group(value: &str) -> Result<(), ValidationError> {
    if BLOOD_GROUPS.contains(&value.trim()) {
        Ok(())
    } else {
        Err(ValidationError::Invalid {
            field: "blood group",
            reason: format!("expected one of {}", BLOOD_GROUPS.join(", ")),
        })
    }
}

/// Checks a measurement against an inclusive range.
pub fn validate_range(
    field: &'static str,
    value: u32,
    range: &RangeInclusive<u32>,
    unit: &'static str,
) -> Result<(), ValidationError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field,
            min: *range.start(),
            max: *range.end(),
            unit,
        })
    }
}

/// Splits a comma-separated list, trimming entries and dropping empties.
#[must_use]
pub fn split_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_email() {
        assert!(validate_email("jane@example.com").is_ok());
        assert_eq!(
            validate_email("  "),
            Err(ValidationError::Required { field: "email" })
        );
        assert!(validate_email("jane@example").is_err());
        assert!(validate_email("jane example@x.io").is_err());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Secret123").is_ok());
        assert_eq!(
            validate_password("Ab1"),
            Err(ValidationError::TooShort {
                field: "password",
                min: 8
            })
        );
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("ALLUPPERCASE1").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
    }

    #[test]
    fn test_digits() {
        assert!(validate_digits("aadhaar number", "123456789012", 12).is_ok());
        assert!(validate_digits("aadhaar number", "12345678901", 12).is_err());
        assert!(validate_digits("phone number", "98765x3210", 10).is_err());
    }

    #[test]
    fn test_blood_group() {
        for group in BLOOD_GROUPS {
            assert!(validate_blood_group(group).is_ok());
        }
        assert!(validate_blood_group("C+").is_err());
        assert!(validate_blood_group("ab+").is_err());
    }

    #[test]
    fn test_range_bounds_inclusive() {
        assert!(validate_range("systolic", 70, &SYSTOLIC_RANGE, "mmHg").is_ok());
        assert!(validate_range("systolic", 220, &SYSTOLIC_RANGE, "mmHg").is_ok());
        let err = validate_range("systolic", 221, &SYSTOLIC_RANGE, "mmHg").unwrap_err();
        assert_eq!(err.to_string(), "systolic must be between 70 and 220 mmHg");
    }

    #[test]
    fn test_min_len_trims() {
        assert!(validate_min_len("full name", " Al ", 3).is_err());
        assert!(validate_min_len("full name", "Ali", 3).is_ok());
        assert_eq!(
            validate_min_len("full name", "", 3),
            Err(ValidationError::Required { field: "full name" })
        );
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" Cardiology, ,Neurology ,"),
            vec!["Cardiology".to_string(), "Neurology".to_string()]
        );
        assert!(split_list(" , ").is_empty());
    }
}
