//! Phone number validation.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Minimum number of digits in a country-code-prefixed number.
pub const MIN_DIGITS: usize = 10;

/// Maximum number of digits allowed by E.164.
pub const MAX_DIGITS: usize = 15;

/// Reasons a phone number is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Phone number is required")]
    Empty,

    #[error("Phone number too short: {0} digits (minimum {MIN_DIGITS})")]
    TooShort(usize),

    #[error("Phone number too long: {0} digits (maximum {MAX_DIGITS})")]
    TooLong(usize),

    #[error("Phone number must start with a country code")]
    MissingCountryCode,
}

/// A phone number reduced to its digits and checked for plausibility.
///
/// The leading digits are the country code; there is no `+` prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ValidatedPhone(String);

impl ValidatedPhone {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ValidatedPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Strip every non-digit character and validate what is left.
pub fn validate(raw: &str) -> Result<ValidatedPhone, ValidationError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.is_empty() {
        return Err(ValidationError::Empty);
    }

    if digits.len() < MIN_DIGITS {
        return Err(ValidationError::TooShort(digits.len()));
    }

    if digits.len() > MAX_DIGITS {
        return Err(ValidationError::TooLong(digits.len()));
    }

    // Country codes never start with 0
    if digits.starts_with('0') {
        return Err(ValidationError::MissingCountryCode);
    }

    Ok(ValidatedPhone(digits))
}
