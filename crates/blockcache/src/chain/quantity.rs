//! Parsing of `0x`-prefixed JSON-RPC quantities.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum QuantityError {
    #[error("missing 0x prefix: {0}")]
    MissingPrefix(String),
    #[error("invalid quantity: {0}")]
    Invalid(String),
}

fn digits(s: &str) -> Result<&str, QuantityError> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .ok_or_else(|| QuantityError::MissingPrefix(s.to_string()))?;
    if digits.is_empty() {
        return Err(QuantityError::Invalid(s.to_string()));
    }
    Ok(digits)
}

/// Parse a hex quantity into `u64` (heights, gas, nonces, timestamps).
pub fn parse_quantity(s: &str) -> Result<u64, QuantityError> {
    let d = digits(s)?;
    u64::from_str_radix(d, 16).map_err(|_| QuantityError::Invalid(s.to_string()))
}

/// Parse a hex quantity into `u128` (wei amounts).
pub fn parse_quantity_u128(s: &str) -> Result<u128, QuantityError> {
    let d = digits(s)?;
    u128::from_str_radix(d, 16).map_err(|_| QuantityError::Invalid(s.to_string()))
}
