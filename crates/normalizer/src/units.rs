//! Unit token registry.

use crate::error::MatchError;
use crate::schema::DimensionUnit;
use std::collections::HashMap;

/// Physical quantity a unit measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuantityKind {
    Length,
    Mass,
    Volume,
    Area,
}

const UNIT_TOKENS: &[(&str, DimensionUnit)] = &[
    ("mm", DimensionUnit::Mm),
    ("millimeter", DimensionUnit::Mm),
    ("millimetre", DimensionUnit::Mm),
    ("cm", DimensionUnit::Cm),
    ("centimeter", DimensionUnit::Cm),
    ("centimetre", DimensionUnit::Cm),
    ("m", DimensionUnit::M),
    ("meter", DimensionUnit::M),
    ("metre", DimensionUnit::M),
    ("g", DimensionUnit::G),
    ("gram", DimensionUnit::G),
    ("gramme", DimensionUnit::G),
    ("kg", DimensionUnit::Kg),
    ("kilo", DimensionUnit::Kg),
    ("kilogram", DimensionUnit::Kg),
    ("kilogramme", DimensionUnit::Kg),
    ("ml", DimensionUnit::Ml),
    ("milliliter", DimensionUnit::Ml),
    ("millilitre", DimensionUnit::Ml),
    ("cl", DimensionUnit::Cl),
    ("centiliter", DimensionUnit::Cl),
    ("centilitre", DimensionUnit::Cl),
    ("l", DimensionUnit::L),
    ("liter", DimensionUnit::L),
    ("litre", DimensionUnit::L),
    ("mm2", DimensionUnit::Mm2),
    ("mm²", DimensionUnit::Mm2),
    ("cm2", DimensionUnit::Cm2),
    ("cm²", DimensionUnit::Cm2),
    ("m2", DimensionUnit::M2),
    ("m²", DimensionUnit::M2),
];

impl DimensionUnit {
    /// Quantity measured by this unit, `None` for `Unspecified`.
    pub fn kind(self) -> Option<QuantityKind> {
        match self {
            DimensionUnit::Unspecified => None,
            DimensionUnit::Mm | DimensionUnit::Cm | DimensionUnit::M => Some(QuantityKind::Length),
            DimensionUnit::G | DimensionUnit::Kg => Some(QuantityKind::Mass),
            DimensionUnit::Ml | DimensionUnit::Cl | DimensionUnit::L => Some(QuantityKind::Volume),
            DimensionUnit::Mm2 | DimensionUnit::Cm2 | DimensionUnit::M2 => Some(QuantityKind::Area),
        }
    }
}

/// Maps unit tokens ("mm", "kg", "l", ...) to canonical units.
///
/// Lookups are case-insensitive and accept a plural `s`.
#[derive(Debug, Clone)]
pub struct UnitTable {
    units: HashMap<&'static str, DimensionUnit>,
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitTable {
    pub fn new() -> Self {
        Self {
            units: UNIT_TOKENS.iter().copied().collect(),
        }
    }

    /// Resolve a unit token.
    pub fn resolve(&self, token: &str) -> Result<DimensionUnit, MatchError> {
        let token = token.trim().to_lowercase();

        if let Some(unit) = self.units.get(token.as_str()) {
            return Ok(*unit);
        }

        let singular = token
            .strip_suffix('s')
            .and_then(|singular| self.units.get(singular))
            .copied();
        singular.ok_or(MatchError::UnknownUnit(token))
    }

    /// Tokens of one quantity kind, longest first, so that a regex
    /// alternation built from them prefers "mm" over "m".
    pub fn tokens(&self, kind: QuantityKind) -> Vec<&'static str> {
        let mut tokens: Vec<&'static str> = self
            .units
            .iter()
            .filter(|(_, unit)| unit.kind() == Some(kind))
            .map(|(token, _)| *token)
            .collect();
        tokens.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
        tokens
    }
}
