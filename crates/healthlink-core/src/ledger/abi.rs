//! Contract ABI encoding and decoding.
//!
//! Covers the subset of the Solidity ABI used by the health-record
//! contract: `address`, `uint256` (bounded to `u128`), `bool`, `string`,
//! dynamic arrays and tuples.
//!
//! # Layout
//!
//! ```text
//! tuple := head(T1) .. head(Tn) tail(T1) .. tail(Tn)
//!
//! static T   head = 32-byte word(s), no tail
//! dynamic T  head = offset of tail, relative to the tuple start
//! string     tail = length word, bytes padded to 32
//! T[]        tail = length word, tuple(T, T, ..)
//! ```
//!
//! The decoder is total: any input either decodes or yields an
//! [`AbiError`]. Offsets and lengths are bounds-checked before use, so
//! malformed return data from a node can never panic or over-allocate.

use thiserror::Error;

use super::address::{ADDRESS_LEN, WalletAddress};

/// Size of an ABI word.
pub const WORD: usize = 32;

/// A 4-byte function selector.
pub type Selector = [u8; 4];

/// Selector of the standard `Error(string)` revert payload.
pub const ERROR_STRING_SELECTOR: Selector = [0x08, 0xc3, 0x79, 0xa0];

/// Errors produced while decoding ABI data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum AbiError {
    /// The data ended before a value could be read.
    #[error("abi data truncated: need {needed} bytes at offset {offset}, have {available}")]
    Truncated {
        /// Offset of the read.
        offset: usize,
        /// Bytes required.
        needed: usize,
        /// Total bytes available.
        available: usize,
    },

    /// An offset or length word does not fit in memory.
    #[error("abi offset or length out of range at offset {offset}")]
    OutOfRange {
        /// Offset of the offending word.
        offset: usize,
    },

    /// An integer exceeds the supported width.
    #[error("uint at offset {offset} exceeds 128 bits")]
    ValueOverflow {
        /// Offset of the word.
        offset: usize,
    },

    /// A bool word was neither 0 nor 1.
    #[error("invalid bool encoding at offset {offset}")]
    InvalidBool {
        /// Offset of the word.
        offset: usize,
    },

    /// An address word had non-zero padding.
    #[error("invalid address padding at offset {offset}")]
    InvalidAddress {
        /// Offset of the word.
        offset: usize,
    },

    /// A string was not valid UTF-8.
    #[error("string at offset {offset} is not valid utf-8")]
    InvalidUtf8 {
        /// Offset of the string tail.
        offset: usize,
    },

    /// A decoded token had a different type than the caller expected.
    #[error("expected {expected} token, found {found}")]
    UnexpectedToken {
        /// Expected token kind.
        expected: &'static str,
        /// Actual token kind.
        found: &'static str,
    },
}

/// An ABI parameter type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    /// `address`
    Address,
    /// `uint256`
    Uint,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// `T[]`
    Array(Box<ParamType>),
    /// `(T1, .., Tn)`
    Tuple(Vec<ParamType>),
}

impl ParamType {
    /// Returns `true` if values of this type are encoded in the tail.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        match self {
            Self::String | Self::Array(_) => true,
            Self::Tuple(items) => items.iter().any(Self::is_dynamic),
            Self::Address | Self::Uint | Self::Bool => false,
        }
    }

    /// Size of this type's head in bytes.
    fn head_size(&self) -> usize {
        match self {
            Self::Tuple(items) if !self.is_dynamic() => items.iter().map(Self::head_size).sum(),
            _ => WORD,
        }
    }
}

/// A decoded or to-be-encoded ABI value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `address`
    Address(WalletAddress),
    /// `uint256`, limited to values that fit in 128 bits.
    Uint(u128),
    /// `bool`
    Bool(bool),
    /// `string`
    String(String),
    /// `T[]`
    Array(Vec<Token>),
    /// `(T1, .., Tn)`
    Tuple(Vec<Token>),
}

impl Token {
    /// Short name of the token kind, used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Uint(_) => "uint",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Tuple(_) => "tuple",
        }
    }

    fn is_dynamic(&self) -> bool {
        match self {
            Self::String(_) | Self::Array(_) => true,
            Self::Tuple(items) => items.iter().any(Self::is_dynamic),
            Self::Address(_) | Self::Uint(_) | Self::Bool(_) => false,
        }
    }

    fn head_size(&self) -> usize {
        match self {
            Self::Tuple(items) if !self.is_dynamic() => items.iter().map(Self::head_size).sum(),
            _ => WORD,
        }
    }

    const fn unexpected(&self, expected: &'static str) -> AbiError {
        AbiError::UnexpectedToken {
            expected,
            found: self.kind(),
        }
    }

    /// Extracts an address.
    pub fn into_address(self) -> Result<WalletAddress, AbiError> {
        match self {
            Self::Address(addr) => Ok(addr),
            other => Err(other.unexpected("address")),
        }
    }

    /// Extracts an unsigned integer.
    pub fn into_uint(self) -> Result<u128, AbiError> {
        match self {
            Self::Uint(value) => Ok(value),
            other => Err(other.unexpected("uint")),
        }
    }

    /// Extracts a bool.
    pub fn into_bool(self) -> Result<bool, AbiError> {
        match self {
            Self::Bool(value) => Ok(value),
            other => Err(other.unexpected("bool")),
        }
    }

    /// Extracts a string.
    pub fn into_string(self) -> Result<String, AbiError> {
        match self {
            Self::String(value) => Ok(value),
            other => Err(other.unexpected("string")),
        }
    }

    /// Extracts array elements.
    pub fn into_array(self) -> Result<Vec<Self>, AbiError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(other.unexpected("array")),
        }
    }

    /// Extracts tuple fields.
    pub fn into_tuple(self) -> Result<Vec<Self>, AbiError> {
        match self {
            Self::Tuple(items) => Ok(items),
            other => Err(other.unexpected("tuple")),
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a function call: selector followed by the encoded arguments.
#[must_use]
pub fn encode_call(selector: Selector, args: &[Token]) -> Vec<u8> {
    let mut out = selector.to_vec();
    out.extend(encode(args));
    out
}

/// Encodes a list of tokens as a tuple.
#[must_use]
pub fn encode(tokens: &[Token]) -> Vec<u8> {
    let head_len: usize = tokens.iter().map(Token::head_size).sum();
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for token in tokens {
        if token.is_dynamic() {
            head.extend(uint_word((head_len + tail.len()) as u128));
            tail.extend(encode_token(token));
        } else {
            head.extend(encode_token(token));
        }
    }

    head.extend(tail);
    head
}

fn encode_token(token: &Token) -> Vec<u8> {
    match token {
        Token::Address(addr) => {
            let mut word = vec![0u8; WORD - ADDRESS_LEN];
            word.extend_from_slice(addr.as_bytes());
            word
        },
        Token::Uint(value) => uint_word(*value).to_vec(),
        Token::Bool(value) => uint_word(u128::from(*value)).to_vec(),
        Token::String(value) => {
            let bytes = value.as_bytes();
            let mut out = uint_word(bytes.len() as u128).to_vec();
            out.extend_from_slice(bytes);
            out.resize(WORD + padded_len(bytes.len()), 0);
            out
        },
        Token::Array(items) => {
            let mut out = uint_word(items.len() as u128).to_vec();
            out.extend(encode(items));
            out
        },
        Token::Tuple(items) => encode(items),
    }
}

fn uint_word(value: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&value.to_be_bytes());
    word
}

const fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes `data` as a tuple of the given types.
pub fn decode(types: &[ParamType], data: &[u8]) -> Result<Vec<Token>, AbiError> {
    decode_items(types.iter(), data, 0)
}

/// Decodes a single value of type `ty` from return data.
pub fn decode_one(ty: &ParamType, data: &[u8]) -> Result<Token, AbiError> {
    let mut tokens = decode(std::slice::from_ref(ty), data)?;
    // decode of one type yields exactly one token
    tokens.pop().ok_or(AbiError::Truncated {
        offset: 0,
        needed: WORD,
        available: data.len(),
    })
}

/// Extracts the message from an `Error(string)` revert payload.
#[must_use]
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let payload = data.strip_prefix(&ERROR_STRING_SELECTOR)?;
    decode_one(&ParamType::String, payload)
        .and_then(Token::into_string)
        .ok()
}

fn decode_items<'a>(
    types: impl Iterator<Item = &'a ParamType>,
    data: &[u8],
    base: usize,
) -> Result<Vec<Token>, AbiError> {
    let mut tokens = Vec::new();
    let mut head = base;

    for ty in types {
        if ty.is_dynamic() {
            let offset = read_usize(data, head)?;
            let start = base
                .checked_add(offset)
                .ok_or(AbiError::OutOfRange { offset: head })?;
            tokens.push(decode_at(ty, data, start)?);
            head = advance(head, WORD)?;
        } else {
            tokens.push(decode_at(ty, data, head)?);
            head = advance(head, ty.head_size())?;
        }
    }

    Ok(tokens)
}

fn decode_at(ty: &ParamType, data: &[u8], pos: usize) -> Result<Token, AbiError> {
    match ty {
        ParamType::Address => {
            let word = read_word(data, pos)?;
            if word[..WORD - ADDRESS_LEN].iter().any(|b| *b != 0) {
                return Err(AbiError::InvalidAddress { offset: pos });
            }
            let mut bytes = [0u8; ADDRESS_LEN];
            bytes.copy_from_slice(&word[WORD - ADDRESS_LEN..]);
            Ok(Token::Address(WalletAddress::from_bytes(bytes)))
        },
        ParamType::Uint => read_u128(data, pos).map(Token::Uint),
        ParamType::Bool => match read_u128(data, pos) {
            Ok(0) => Ok(Token::Bool(false)),
            Ok(1) => Ok(Token::Bool(true)),
            Ok(_) | Err(AbiError::ValueOverflow { .. }) => Err(AbiError::InvalidBool { offset: pos }),
            Err(other) => Err(other),
        },
        ParamType::String => {
            let len = read_usize(data, pos)?;
            let start = advance(pos, WORD)?;
            let bytes = read_slice(data, start, len)?;
            String::from_utf8(bytes.to_vec())
                .map(Token::String)
                .map_err(|_| AbiError::InvalidUtf8 { offset: pos })
        },
        ParamType::Array(inner) => {
            let len = read_usize(data, pos)?;
            let start = advance(pos, WORD)?;
            // every element occupies at least one head word
            let remaining = data.len().saturating_sub(start) / WORD;
            if len > remaining {
                return Err(AbiError::OutOfRange { offset: pos });
            }
            decode_items(std::iter::repeat_n(inner.as_ref(), len), data, start).map(Token::Array)
        },
        ParamType::Tuple(items) => decode_items(items.iter(), data, pos).map(Token::Tuple),
    }
}

fn advance(pos: usize, by: usize) -> Result<usize, AbiError> {
    pos.checked_add(by)
        .ok_or(AbiError::OutOfRange { offset: pos })
}

fn read_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], AbiError> {
    let truncated = AbiError::Truncated {
        offset,
        needed: len,
        available: data.len(),
    };
    let end = offset.checked_add(len).ok_or_else(|| truncated.clone())?;
    data.get(offset..end).ok_or(truncated)
}

fn read_word(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    read_slice(data, offset, WORD)
}

fn read_u128(data: &[u8], offset: usize) -> Result<u128, AbiError> {
    let word = read_word(data, offset)?;
    if word[..16].iter().any(|b| *b != 0) {
        return Err(AbiError::ValueOverflow { offset });
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

fn read_usize(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    let value = read_u128(data, offset).map_err(|err| match err {
        AbiError::ValueOverflow { offset } => AbiError::OutOfRange { offset },
        other => other,
    })?;
    usize::try_from(value).map_err(|_| AbiError::OutOfRange { offset })
}
