//! Phone number normalization.
//!
//! Every phone string entering the system passes through [`normalize`] before
//! any lookup, store write, or send. Downstream components only ever see the
//! canonical `+254XXXXXXXXX` form and never re-validate format.

use crate::error::ShambaError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kenyan country code, without the leading `+`.
pub const COUNTRY_CODE: &str = "254";

/// Subscriber number length after the country code.
const SUBSCRIBER_DIGITS: usize = 9;

/// A normalized phone number: country code + 9 subscriber digits,
/// stored without the `+`, rendered with it.
///
/// The only producer is [`normalize`]; construction is otherwise private so
/// an un-normalized string cannot masquerade as a phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Digits only, including the country code (e.g. `254712345678`).
    pub fn digits(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}", self.0)
    }
}

/// Normalize an arbitrary phone string into canonical form.
///
/// Accepted shapes, after stripping every non-digit character:
/// - `0XXXXXXXXX` (national trunk prefix + 9 digits) → trunk digit replaced
///   with the country code
/// - `XXXXXXXXX` (bare 9-digit subscriber number) → country code prepended
/// - `254XXXXXXXXX` (already prefixed) → accepted as-is
///
/// Anything else fails with [`ShambaError::Phone`].
pub fn normalize(raw: &str) -> Result<PhoneNumber, ShambaError> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    let canonical = if digits.len() == SUBSCRIBER_DIGITS + 1 && digits.starts_with('0') {
        format!("{COUNTRY_CODE}{}", &digits[1..])
    } else if digits.len() == SUBSCRIBER_DIGITS {
        format!("{COUNTRY_CODE}{digits}")
    } else if digits.len() == COUNTRY_CODE.len() + SUBSCRIBER_DIGITS
        && digits.starts_with(COUNTRY_CODE)
    {
        digits
    } else {
        return Err(ShambaError::Phone(format!(
            "'{raw}' is not a valid subscriber number"
        )));
    };

    Ok(PhoneNumber(canonical))
}
