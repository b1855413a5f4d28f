//! Currency token matching.

use crate::error::MatchError;
use crate::schema::Currency;
use regex::Regex;

/// Finds the first currency token in free text ("EUR", "gbp", "£", ...).
#[derive(Debug, Clone)]
pub struct CurrencyMatcher {
    pattern: Regex,
}

impl CurrencyMatcher {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(r"(?i)(?P<currency>eur|gbp|€|£)")?,
        })
    }

    /// Resolve the currency named in `text`. Only the first match counts.
    pub fn resolve(&self, text: &str) -> Result<Currency, MatchError> {
        let token = self
            .pattern
            .captures(text)
            .and_then(|caps| caps.name("currency"))
            .map(|m| m.as_str().to_lowercase())
            .ok_or_else(|| MatchError::UnknownCurrency(text.to_string()))?;

        match token.as_str() {
            "eur" | "€" => Ok(Currency::Eur),
            "gbp" | "£" => Ok(Currency::Gbp),
            _ => Err(MatchError::UnknownCurrency(text.to_string())),
        }
    }
}
