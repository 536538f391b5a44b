//! Text and byte codecs for BN254 scalar-field elements.
//!
//! Commitments, roots and nullifier hashes travel as decimal strings (the
//! snarkjs convention) or `0x` hex. Values at or above the field modulus are
//! rejected rather than reduced, since a reduced value would name a
//! different leaf than the one the client computed.

use ark_bn254::Fr;
use ark_ff::{BigInteger, PrimeField};
use num_bigint::BigUint;
use serde_json::Value as JsonValue;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FieldError {
    #[error("empty field element")]
    Empty,
    #[error("field element contains invalid digits: {0}")]
    InvalidDigits(String),
    #[error("value exceeds the BN254 scalar modulus")]
    OutOfRange,
    #[error("expected a string or non-negative integer, got {0}")]
    UnsupportedJson(String),
}

/// Parse a decimal or `0x`-prefixed hex string into a field element.
pub fn parse_field(text: &str) -> Result<Fr, FieldError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(FieldError::Empty);
    }

    let (digits, radix) = match trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        Some(hex) => (hex, 16),
        None => (trimmed, 10),
    };

    let valid = !digits.is_empty()
        && digits.chars().all(|c| match radix {
            16 => c.is_ascii_hexdigit(),
            _ => c.is_ascii_digit(),
        });
    if !valid {
        return Err(FieldError::InvalidDigits(trimmed.to_string()));
    }

    let value = BigUint::parse_bytes(digits.as_bytes(), radix)
        .ok_or_else(|| FieldError::InvalidDigits(trimmed.to_string()))?;
    if value >= BigUint::from(Fr::MODULUS) {
        return Err(FieldError::OutOfRange);
    }

    Ok(Fr::from_le_bytes_mod_order(&value.to_bytes_le()))
}

/// Parse a JSON string or unsigned integer into a field element.
pub fn parse_field_json(value: &JsonValue) -> Result<Fr, FieldError> {
    match value {
        JsonValue::String(s) => parse_field(s),
        JsonValue::Number(n) => n
            .as_u64()
            .map(Fr::from)
            .ok_or_else(|| FieldError::UnsupportedJson(n.to_string())),
        other => Err(FieldError::UnsupportedJson(other.to_string())),
    }
}

/// Canonical decimal rendering.
pub fn format_field(value: &Fr) -> String {
    BigUint::from(value.into_bigint()).to_string()
}

/// Leading decimal digits followed by `...`, for log lines.
pub fn abbreviate_field(value: &Fr) -> String {
    let text = format_field(value);
    match text.get(..16) {
        Some(head) if text.len() > 16 => format!("{}...", head),
        _ => text,
    }
}

/// 32-byte big-endian encoding.
pub fn field_to_be_bytes(value: &Fr) -> [u8; 32] {
    let bytes = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    out[32 - bytes.len()..].copy_from_slice(&bytes);
    out
}
