//! Currency code
//!
//! Three-letter currency code attached to every account and money movement.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// ISO-4217 style currency code, always stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CurrencyError {
    #[error("Missing currency")]
    Missing,

    #[error("Invalid currency code: {0} (expected three letters)")]
    Invalid(String),
}

impl Currency {
    pub fn new(code: &str) -> Result<Self, CurrencyError> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CurrencyError::Missing);
        }
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(CurrencyError::Invalid(code.to_string()));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Currency {
    type Err = CurrencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::new(s)
    }
}

impl TryFrom<String> for Currency {
    type Error = CurrencyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Currency::new(&value)
    }
}

impl From<Currency> for String {
    fn from(currency: Currency) -> Self {
        currency.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_currency_normalized() {
        let currency = Currency::new(" usd ").unwrap();
        assert_eq!(currency.as_str(), "USD");
        assert_eq!(currency, "USD".parse().unwrap());
    }

    #[test]
    fn test_currency_missing() {
        assert_eq!(Currency::new("   "), Err(CurrencyError::Missing));
    }

    #[test]
    fn test_currency_invalid() {
        assert!(matches!(Currency::new("US"), Err(CurrencyError::Invalid(_))));
        assert!(matches!(Currency::new("U$D"), Err(CurrencyError::Invalid(_))));
        assert!(matches!(Currency::new("EURO"), Err(CurrencyError::Invalid(_))));
    }
}
