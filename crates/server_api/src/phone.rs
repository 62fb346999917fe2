//! Recipient number normalization.

/// Turns caller-supplied phone input into the digits-only form the session's
/// number lookup expects.
pub trait PhoneNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> String;
}

pub fn digits(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Strips everything but digits.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigitsOnly;

impl PhoneNormalizer for DigitsOnly {
    fn normalize(&self, raw: &str) -> String {
        digits(raw)
    }
}

/// Strips non-digits and prepends a country code to bare national numbers:
/// exactly ten digits not already starting with the code. Anything else
/// passes through as-is.
#[derive(Debug, Clone)]
pub struct CountryCodePrefix {
    prefix: String,
}

pub const DEFAULT_COUNTRY_CODE: &str = "1";
const NATIONAL_NUMBER_DIGITS: usize = 10;

impl CountryCodePrefix {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: digits(&prefix.into()),
        }
    }
}

impl Default for CountryCodePrefix {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY_CODE)
    }
}

impl PhoneNormalizer for CountryCodePrefix {
    fn normalize(&self, raw: &str) -> String {
        let cleaned = digits(raw);
        if cleaned.len() == NATIONAL_NUMBER_DIGITS && !cleaned.starts_with(&self.prefix) {
            format!("{}{cleaned}", self.prefix)
        } else {
            cleaned
        }
    }
}

#[cfg(test)]
#[path = "tests/phone_tests.rs"]
mod tests;
