//! Named-dimension patterns and the matcher that reduces free-text
//! dimension labels and values to one [`Dimension`] per canonical name.
//!
//! # Algorithm
//!
//! 1. Each raw label is tested against every pattern's name rules. Labels
//!    matching zero or several patterns are dropped with a warning.
//! 2. Each value of a matched label goes in that pattern's bucket, and
//!    `(number, unit)` is extracted from it with a regex limited to the units
//!    of the pattern's quantity kind. Values without a match are dropped.
//! 3. The pair with the largest raw number wins. Units are not converted
//!    before comparing, so "120 mm" beats "12 cm". Ties keep the first pair.

use crate::error::MatchError;
use crate::schema::{Dimension, DimensionName, DimensionUnit, Lang};
use crate::units::{QuantityKind, UnitTable};
use metrics::counter;
use regex::Regex;
use std::collections::HashMap;
use tracing::{debug, warn};

type NameTable = &'static [(Lang, &'static str)];

/// Canonical dimensions in output order, with their quantity kind and
/// per-language label patterns.
const DIMENSIONS: &[(DimensionName, QuantityKind, NameTable)] = &[
    (
        DimensionName::Height,
        QuantityKind::Length,
        &[(Lang::En, "height"), (Lang::Fr, "hauteur")],
    ),
    (
        DimensionName::Width,
        QuantityKind::Length,
        &[(Lang::En, "width"), (Lang::Fr, "largeur")],
    ),
    (
        DimensionName::Depth,
        QuantityKind::Length,
        &[(Lang::En, "depth"), (Lang::Fr, "profondeur")],
    ),
    (
        DimensionName::Length,
        QuantityKind::Length,
        &[(Lang::En, "length"), (Lang::Fr, "longueur")],
    ),
    (
        DimensionName::Diameter,
        QuantityKind::Length,
        &[(Lang::En, "diameter"), (Lang::Fr, "diam[eè]tre")],
    ),
    (
        DimensionName::Thickness,
        QuantityKind::Length,
        &[(Lang::En, "thickness"), (Lang::Fr, "[eé]paisseur")],
    ),
    (
        DimensionName::Volume,
        QuantityKind::Volume,
        &[
            (Lang::En, "volume|capacity"),
            (Lang::Fr, "volume|contenance|capacit[eé]"),
        ],
    ),
    (
        DimensionName::Weight,
        QuantityKind::Mass,
        &[(Lang::En, "weight"), (Lang::Fr, "poids")],
    ),
];

/// Label rule for one language.
#[derive(Debug, Clone)]
pub struct NameRule {
    pub lang: Lang,
    regex: Regex,
}

/// A canonical dimension with its label rules and value extractor.
#[derive(Debug, Clone)]
pub struct DimensionPattern {
    pub name: DimensionName,
    pub kind: QuantityKind,
    name_rules: Vec<NameRule>,
    value_unit: Regex,
}

impl DimensionPattern {
    /// Language of the first rule matching `label`, if any.
    pub fn matching_lang(&self, label: &str) -> Option<Lang> {
        self.name_rules
            .iter()
            .find(|rule| rule.regex.is_match(label))
            .map(|rule| rule.lang)
    }

    /// Extract the first `<number> <unit>` pair from `value`.
    ///
    /// A comma followed by groups of exactly three digits ("1,200") separates
    /// thousands; any other comma ("12,5") is a decimal point.
    pub fn extract(
        &self,
        value: &str,
        units: &UnitTable,
    ) -> Result<(f64, DimensionUnit), MatchError> {
        let no_value = || MatchError::NoValue {
            dimension: self.name,
            value: value.to_string(),
        };

        let caps = self.value_unit.captures(value).ok_or_else(no_value)?;
        let digits = if caps.name("grouped").is_some() {
            caps["value"].replace(',', "")
        } else {
            caps["value"].replace(',', ".")
        };
        let number: f64 = digits.parse().map_err(|_| no_value())?;
        let unit = units.resolve(&caps["unit"])?;
        Ok((number, unit))
    }
}

/// Resolves raw dimension labels/values against the canonical patterns.
#[derive(Debug, Clone)]
pub struct DimensionMatcher {
    patterns: Vec<DimensionPattern>,
    units: UnitTable,
}

impl DimensionMatcher {
    /// Build the matcher with the default unit table.
    pub fn new() -> Result<Self, regex::Error> {
        Self::with_units(UnitTable::new())
    }

    pub fn with_units(units: UnitTable) -> Result<Self, regex::Error> {
        let mut value_regexes: HashMap<QuantityKind, Regex> = HashMap::new();
        let mut patterns = Vec::with_capacity(DIMENSIONS.len());

        for (name, kind, names) in DIMENSIONS {
            let value_unit = match value_regexes.get(kind) {
                Some(regex) => regex.clone(),
                None => {
                    let regex = value_unit_regex(&units.tokens(*kind))?;
                    value_regexes.insert(*kind, regex.clone());
                    regex
                }
            };

            let name_rules = names
                .iter()
                .map(|(lang, pattern)| {
                    Ok(NameRule {
                        lang: *lang,
                        regex: Regex::new(&format!("(?i){}", pattern))?,
                    })
                })
                .collect::<Result<Vec<_>, regex::Error>>()?;

            patterns.push(DimensionPattern {
                name: *name,
                kind: *kind,
                name_rules,
                value_unit,
            });
        }

        Ok(Self { patterns, units })
    }

    pub fn patterns(&self) -> &[DimensionPattern] {
        &self.patterns
    }

    /// The single pattern matching `label`.
    pub fn find_pattern(&self, label: &str) -> Result<&DimensionPattern, MatchError> {
        self.find_index(label).map(|i| &self.patterns[i])
    }

    /// Reduce `(label, value)` pairs to at most one dimension per name, in
    /// canonical order. Unusable labels and values are logged and skipped.
    pub fn match_dimensions<'a, I>(&self, raw: I) -> Vec<Dimension>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut buckets: Vec<Vec<&'a str>> = vec![Vec::new(); self.patterns.len()];

        for (label, value) in raw {
            match self.find_index(label) {
                Ok(i) => buckets[i].push(value),
                Err(e) => {
                    warn!("Dropping dimension '{}' = '{}': {}", label, value, e);
                    record_drop(&e);
                }
            }
        }

        self.patterns
            .iter()
            .zip(buckets)
            .filter_map(|(pattern, values)| self.select(pattern, &values))
            .collect()
    }

    fn find_index(&self, label: &str) -> Result<usize, MatchError> {
        let matches: Vec<(usize, Lang)> = self
            .patterns
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.matching_lang(label).map(|lang| (i, lang)))
            .collect();

        match matches.as_slice() {
            [] => Err(MatchError::NoPattern(label.to_string())),
            [(i, lang)] => {
                debug!(
                    "Label '{}' matched {:?} ({:?})",
                    label, self.patterns[*i].name, lang
                );
                Ok(*i)
            }
            many => Err(MatchError::Ambiguous {
                label: label.to_string(),
                candidates: many.iter().map(|(i, _)| self.patterns[*i].name).collect(),
            }),
        }
    }

    /// Pick the largest raw value of a bucket.
    fn select(&self, pattern: &DimensionPattern, values: &[&str]) -> Option<Dimension> {
        let mut best: Option<(f64, DimensionUnit)> = None;

        for value in values {
            match pattern.extract(value, &self.units) {
                Ok((number, unit)) => {
                    if best.map_or(true, |(max, _)| number > max) {
                        best = Some((number, unit));
                    }
                }
                Err(e) => {
                    warn!("Skipping {:?} value: {}", pattern.name, e);
                    record_drop(&e);
                }
            }
        }

        best.map(|(number, unit)| Dimension::new(pattern.name, number, unit))
    }
}

/// `<decimal><optional whitespace><unit>[s]`, where the unit must not run on
/// into another letter or digit. Thousands-grouped numbers are tried first.
fn value_unit_regex(tokens: &[&str]) -> Result<Regex, regex::Error> {
    let units = tokens
        .iter()
        .map(|t| regex::escape(t))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        concat!(
            r"(?i)(?P<value>(?P<grouped>[0-9]{{1,3}}(?:,[0-9]{{3}})+(?:\.[0-9]+)?)",
            r"|[0-9]+(?:[.,][0-9]+)?|[.,][0-9]+)",
            r"\s*(?P<unit>{})s?(?:$|[^\p{{L}}\p{{N}}])",
        ),
        units
    ))
}

fn record_drop(e: &MatchError) {
    let reason = match e {
        MatchError::Ambiguous { .. } => "ambiguous",
        MatchError::NoPattern(_) => "no_pattern",
        MatchError::NoValue { .. } => "no_value",
        MatchError::UnknownUnit(_) => "unknown_unit",
        MatchError::UnknownCurrency(_) => "unknown_currency",
    };
    counter!("normalizer_dimension_values_dropped_total", "reason" => reason).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> DimensionMatcher {
        DimensionMatcher::new().unwrap()
    }

    fn single(dims: &[Dimension]) -> (DimensionName, f64, DimensionUnit) {
        assert_eq!(dims.len(), 1, "expected one dimension, got {:?}", dims);
        (dims[0].name(), dims[0].value, dims[0].unit())
    }

    #[test]
    fn test_empty_input_gives_no_dimensions() {
        assert!(matcher().match_dimensions(Vec::new()).is_empty());
    }

    #[test]
    fn test_one_label_per_dimension() {
        let dims = matcher().match_dimensions(vec![
            ("Height", "12 cm"),
            ("Width", "30.5cm"),
            ("Poids", "2 kg"),
            ("Capacity", "1,5 L"),
        ]);

        assert_eq!(
            dims,
            vec![
                Dimension::new(DimensionName::Height, 12.0, DimensionUnit::Cm),
                Dimension::new(DimensionName::Width, 30.5, DimensionUnit::Cm),
                Dimension::new(DimensionName::Volume, 1.5, DimensionUnit::L),
                Dimension::new(DimensionName::Weight, 2.0, DimensionUnit::Kg),
            ]
        );
    }

    #[test]
    fn test_max_raw_value_wins_across_units() {
        let dims = matcher().match_dimensions(vec![("height", "12 cm"), ("Height", "120 mm")]);
        assert_eq!(single(&dims), (DimensionName::Height, 120.0, DimensionUnit::Mm));
    }

    #[test]
    fn test_tie_keeps_first_seen() {
        let dims = matcher().match_dimensions(vec![("Hauteur", "10 cm"), ("Height", "10 m")]);
        assert_eq!(single(&dims), (DimensionName::Height, 10.0, DimensionUnit::Cm));
    }

    #[test]
    fn test_ambiguous_label_is_dropped() {
        let m = matcher();
        let dims = m.match_dimensions(vec![("Height x Width", "10 cm"), ("Depth", "4 cm")]);
        assert_eq!(single(&dims), (DimensionName::Depth, 4.0, DimensionUnit::Cm));

        match m.find_pattern("Height x Width") {
            Err(MatchError::Ambiguous { candidates, .. }) => {
                assert_eq!(candidates, vec![DimensionName::Height, DimensionName::Width])
            }
            other => panic!("expected ambiguous match, got {:?}", other.map(|p| p.name)),
        }
    }

    #[test]
    fn test_unknown_label_is_dropped() {
        let m = matcher();
        assert!(m.match_dimensions(vec![("Colour", "red")]).is_empty());
        assert_eq!(
            m.find_pattern("Colour").map(|p| p.name),
            Err(MatchError::NoPattern("Colour".to_string()))
        );
    }

    #[test]
    fn test_value_without_unit_skipped_bucket_survives() {
        let dims = matcher().match_dimensions(vec![("Height", "tall"), ("height (cm)", "42 cm")]);
        assert_eq!(single(&dims), (DimensionName::Height, 42.0, DimensionUnit::Cm));
    }

    #[test]
    fn test_bucket_without_any_value_contributes_nothing() {
        assert!(matcher().match_dimensions(vec![("Height", "n/a")]).is_empty());
    }

    #[test]
    fn test_units_restricted_to_quantity_kind() {
        let m = matcher();
        // kg is not a length
        assert!(m.match_dimensions(vec![("Height", "3 kg")]).is_empty());
        // cm is not a mass
        assert!(m.match_dimensions(vec![("Weight", "3 cm")]).is_empty());
        // m2 is an area, not metres
        assert!(m.match_dimensions(vec![("Length", "2 m2")]).is_empty());
    }

    #[test]
    fn test_extract_prefers_longest_unit_and_plurals() {
        let m = matcher();
        let height = m.find_pattern("height").unwrap();
        let units = UnitTable::new();

        assert_eq!(height.extract("5 mm", &units).unwrap(), (5.0, DimensionUnit::Mm));
        assert_eq!(height.extract("5 m", &units).unwrap(), (5.0, DimensionUnit::M));
        assert_eq!(height.extract("2 metres", &units).unwrap(), (2.0, DimensionUnit::M));
        assert_eq!(height.extract(".5cms", &units).unwrap(), (0.5, DimensionUnit::Cm));
        assert_eq!(
            height.extract("approx. 12 x 30 CM", &units).unwrap(),
            (30.0, DimensionUnit::Cm)
        );
    }

    #[test]
    fn test_comma_thousands_and_decimal_comma() {
        let m = matcher();
        let height = m.find_pattern("height").unwrap();
        let units = UnitTable::new();

        assert_eq!(height.extract("1,200 mm", &units).unwrap(), (1200.0, DimensionUnit::Mm));
        assert_eq!(height.extract("12,5 cm", &units).unwrap(), (12.5, DimensionUnit::Cm));
        assert_eq!(
            height.extract("1,250,000.5 mm", &units).unwrap(),
            (1_250_000.5, DimensionUnit::Mm)
        );
        // Four digits after the comma is not a thousands group
        assert_eq!(height.extract("1,2500 m", &units).unwrap(), (1.25, DimensionUnit::M));
    }

    #[test]
    fn test_thousands_value_wins_bucket() {
        let dims = matcher().match_dimensions(vec![("Height", "1,200 mm"), ("hauteur", "15 mm")]);
        assert_eq!(single(&dims), (DimensionName::Height, 1200.0, DimensionUnit::Mm));
    }

    #[test]
    fn test_french_labels() {
        let m = matcher();
        assert_eq!(m.find_pattern("Épaisseur").unwrap().name, DimensionName::Thickness);
        assert_eq!(m.find_pattern("Diamètre").unwrap().name, DimensionName::Diameter);
        assert_eq!(m.find_pattern("Contenance").unwrap().name, DimensionName::Volume);
        assert_eq!(
            m.find_pattern("Profondeur").unwrap().matching_lang("Profondeur"),
            Some(Lang::Fr)
        );
    }

    #[test]
    fn test_patterns_in_canonical_order() {
        let names: Vec<DimensionName> = matcher().patterns().iter().map(|p| p.name).collect();
        assert_eq!(
            names,
            vec![
                DimensionName::Height,
                DimensionName::Width,
                DimensionName::Depth,
                DimensionName::Length,
                DimensionName::Diameter,
                DimensionName::Thickness,
                DimensionName::Volume,
                DimensionName::Weight,
            ]
        );
    }
}
