use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated ISO 4217-style currency code.
///
/// Amounts throughout the engine are integers in minor units; this type only
/// validates codes and knows the minor-unit exponent for display purposes.
/// Stored rows keep the code as an opaque uppercase string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of minor-unit decimal places for known zero-decimal
    /// currencies; 2 otherwise.
    pub fn minor_unit_exponent(&self) -> u8 {
        match self.0.as_str() {
            "JPY" | "KRW" | "VND" | "CLP" => 0,
            _ => 2,
        }
    }

    /// Formats a minor-unit amount as a major-unit string, e.g. 97100 EUR
    /// becomes "971.00".
    pub fn format_minor(&self, amount: i64) -> String {
        let exp = self.minor_unit_exponent() as u32;
        if exp == 0 {
            return amount.to_string();
        }
        let scale = 10i64.pow(exp);
        let sign = if amount < 0 { "-" } else { "" };
        let abs = amount.unsigned_abs() as i64;
        format!("{}{}.{:0width$}", sign, abs / scale, abs % scale, width = exp as usize)
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CurrencyParseError(String);

impl fmt::Display for CurrencyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid currency code: {}", self.0)
    }
}

impl std::error::Error for CurrencyParseError {}

impl FromStr for CurrencyCode {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_uppercase();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(CurrencyParseError(s.to_string()));
        }
        Ok(CurrencyCode(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_normalizes_case() {
        assert_eq!(CurrencyCode::from_str("eur").unwrap().as_str(), "EUR");
        assert_eq!(CurrencyCode::from_str(" USD ").unwrap().as_str(), "USD");
    }

    #[test]
    fn test_parse_rejects_bad_codes() {
        assert!(CurrencyCode::from_str("EU").is_err());
        assert!(CurrencyCode::from_str("EUR2").is_err());
        assert!(CurrencyCode::from_str("").is_err());
    }

    #[test]
    fn test_minor_unit_exponent() {
        assert_eq!(CurrencyCode::from_str("EUR").unwrap().minor_unit_exponent(), 2);
        assert_eq!(CurrencyCode::from_str("JPY").unwrap().minor_unit_exponent(), 0);
    }

    #[test]
    fn test_format_minor() {
        let eur = CurrencyCode::from_str("EUR").unwrap();
        assert_eq!(eur.format_minor(97100), "971.00");
        assert_eq!(eur.format_minor(-100000), "-1000.00");
        assert_eq!(eur.format_minor(5), "0.05");

        let jpy = CurrencyCode::from_str("JPY").unwrap();
        assert_eq!(jpy.format_minor(1500), "1500");
    }
}
