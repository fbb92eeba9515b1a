//! Wallet/contract address type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length of an account address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Error returned when a string is not a valid `0x`-prefixed address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The `0x` prefix is missing.
    #[error("address must start with 0x: {0}")]
    MissingPrefix(String),

    /// Wrong number of hex digits.
    #[error("address must have {expected} hex digits, got {actual}")]
    InvalidLength {
        /// Expected digit count.
        expected: usize,
        /// Actual digit count.
        actual: usize,
    },

    /// Non-hex characters.
    #[error("address contains non-hex characters: {0}")]
    InvalidHex(String),
}

/// A 20-byte account address.
///
/// Parsing accepts any letter case (checksummed or not); display is always
/// lowercase, so two addresses compare equal regardless of how the wallet
/// or the identity provider spelled them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WalletAddress([u8; ADDRESS_LEN]);

impl WalletAddress {
    /// The all-zero address.
    pub const ZERO: Self = Self([0; ADDRESS_LEN]);

    /// Creates an address from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    /// Returns `true` for the all-zero address.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_LEN]
    }

    /// Abbreviated form for display, e.g. `0x1234...abcd`.
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl FromStr for WalletAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| AddressError::MissingPrefix(trimmed.to_string()))?;

        if digits.len() != ADDRESS_LEN * 2 {
            return Err(AddressError::InvalidLength {
                expected: ADDRESS_LEN * 2,
                actual: digits.len(),
            });
        }

        let mut bytes = [0u8; ADDRESS_LEN];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|_| AddressError::InvalidHex(trimmed.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for WalletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WalletAddress({self})")
    }
}

impl Serialize for WalletAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WalletAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses an optional address field where empty strings mean "unset".
///
/// Profile rows and user metadata store `""` when no wallet was connected.
pub fn parse_optional(raw: Option<&str>) -> Result<Option<WalletAddress>, AddressError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_parse_mixed_case_normalizes() {
        let addr: WalletAddress = "0xAbCdEf0123456789abcdef0123456789ABCDEF01".parse().unwrap();
        assert_eq!(
            addr.to_string(),
            "0xabcdef0123456789abcdef0123456789abcdef01"
        );
        let lower: WalletAddress = "0xabcdef0123456789abcdef0123456789abcdef01".parse().unwrap();
        assert_eq!(addr, lower);
    }

    #[test]
    fn test_parse_rejects_missing_prefix() {
        let err = "abcdef0123456789abcdef0123456789abcdef01"
            .parse::<WalletAddress>()
            .unwrap_err();
        assert!(matches!(err, AddressError::MissingPrefix(_)));
    }

    #[test]
    fn test_parse_rejects_bad_length_and_hex() {
        assert!(matches!(
            "0x1234".parse::<WalletAddress>(),
            Err(AddressError::InvalidLength { actual: 4, .. })
        ));
        assert!(matches!(
            "0xzz23456789abcdef0123456789abcdef01234567".parse::<WalletAddress>(),
            Err(AddressError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_short_form() {
        let addr: WalletAddress = "0xab00000000000000000000000000000000001234".parse().unwrap();
        assert_eq!(addr.short(), "0xab00...1234");
    }

    #[test]
    fn test_parse_optional_treats_empty_as_unset() {
        assert_eq!(parse_optional(None).unwrap(), None);
        assert_eq!(parse_optional(Some("")).unwrap(), None);
        assert_eq!(parse_optional(Some("   ")).unwrap(), None);
        assert!(parse_optional(Some("0x12")).is_err());
    }

    #[test]
    fn test_serde_uses_string_form() {
        let addr = WalletAddress::from_bytes([0x11; ADDRESS_LEN]);
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"0x1111111111111111111111111111111111111111\"");
        let back: WalletAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    proptest! {
        #[test]
        fn prop_display_parses_back(bytes in proptest::array::uniform20(any::<u8>())) {
            let addr = WalletAddress::from_bytes(bytes);
            let parsed: WalletAddress = addr.to_string().parse().unwrap();
            prop_assert_eq!(parsed, addr);
        }

        #[test]
        fn prop_parse_never_panics(input in ".{0,64}") {
            let _ = input.parse::<WalletAddress>();
        }
    }
}
