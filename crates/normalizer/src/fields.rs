//! Per-field rules producing a [`NormalizedItem`] from a [`RawItem`].

use crate::currency::CurrencyMatcher;
use crate::dimensions::DimensionMatcher;
use crate::error::{NormalizationError, Result};
use crate::schema::{Dimension, Lang, NormalizedItem, Price, RawItem};
use crate::traits::ItemNormalizer;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Language assigned to every item until it is derived from content.
pub const DEFAULT_LANG: Lang = Lang::En;

/// Default catalog item normalizer.
///
/// Owns its registries; build one per process (or per test) and share it.
#[derive(Debug, Clone)]
pub struct FieldNormalizer {
    dimensions: DimensionMatcher,
    currencies: CurrencyMatcher,
}

impl FieldNormalizer {
    pub fn new() -> std::result::Result<Self, regex::Error> {
        Ok(Self {
            dimensions: DimensionMatcher::new()?,
            currencies: CurrencyMatcher::new()?,
        })
    }

    fn normalize_dimensions(&self, item: &RawItem) -> Vec<Dimension> {
        self.dimensions.match_dimensions(
            item.dimensions
                .iter()
                .map(|(label, value)| (label.as_str(), value.as_str())),
        )
    }

    fn normalize_price(&self, item: &RawItem) -> Result<Price> {
        let amount = parse_amount(&item.price)?;
        let currency_text = item.price_currency.trim();

        if amount.is_zero() && currency_text.is_empty() {
            return Ok(Price::unspecified());
        }

        let currency = self.currencies.resolve(currency_text)?;
        Ok(Price::new(amount, currency))
    }
}

impl ItemNormalizer for FieldNormalizer {
    const NAME: &'static str = "catalog";

    fn normalize(&self, item: &RawItem) -> Result<NormalizedItem> {
        let price = self.normalize_price(item)?;

        Ok(NormalizedItem {
            id: item.id.trim().to_string(),
            source: item.source.clone(),
            name: item.name.trim().to_string(),
            description: item.description.trim().to_string(),
            categories: item.categories.iter().map(|c| c.trim().to_string()).collect(),
            lang: DEFAULT_LANG as i32,
            urls: item.urls.clone(),
            image_urls: item.image_urls.clone(),
            dimensions: self.normalize_dimensions(item),
            price: Some(price),
        })
    }
}

/// Parse a free-text amount. Empty means zero. Commas grouping thousands
/// ("1,200.50") are dropped; otherwise a lone comma is a decimal point.
fn parse_amount(raw: &str) -> Result<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Decimal::ZERO);
    }

    let candidate = if is_thousands_grouped(trimmed) {
        trimmed.replace(',', "")
    } else if trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replacen(',', ".", 1)
    } else {
        trimmed.to_string()
    };

    Decimal::from_str(&candidate).map_err(|_| NormalizationError::InvalidPrice {
        amount: raw.to_string(),
    })
}

/// `1,234` or `12,345,678.9`: a 1-3 digit head, then `,ddd` groups.
fn is_thousands_grouped(text: &str) -> bool {
    let integer = match text.split_once('.') {
        Some((integer, fraction)) => {
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return false;
            }
            integer
        }
        None => text,
    };

    let mut groups = integer.split(',');
    let head_ok = groups
        .next()
        .map_or(false, |g| (1..=3).contains(&g.len()) && g.chars().all(|c| c.is_ascii_digit()));

    let mut tail = 0;
    for group in groups {
        if group.len() != 3 || !group.chars().all(|c| c.is_ascii_digit()) {
            return false;
        }
        tail += 1;
    }
    head_ok && tail > 0
}
