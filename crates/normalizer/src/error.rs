//! Error types for normalization.

use crate::schema::DimensionName;
use thiserror::Error;

/// Sub-field lookup failures. Dimension-level ones are logged and the value
/// dropped; a currency failure is promoted to [`NormalizationError`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("Label '{label}' matches several dimensions: {candidates:?}")]
    Ambiguous {
        label: String,
        candidates: Vec<DimensionName>,
    },

    #[error("No dimension found for label '{0}'")]
    NoPattern(String),

    #[error("No {dimension:?} value and unit found in '{value}'")]
    NoValue {
        dimension: DimensionName,
        value: String,
    },

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Unknown currency: {0}")]
    UnknownCurrency(String),
}

/// Failure that aborts normalization of a whole item.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizationError {
    #[error("Invalid price amount: '{amount}'")]
    InvalidPrice { amount: String },

    #[error("Currency error: {0}")]
    Currency(#[from] MatchError),
}

pub type Result<T> = std::result::Result<T, NormalizationError>;
