//! Raw and normalized catalog item records (protobuf wire format).

use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Catalog item as scraped upstream. Nothing in it is normalized.
#[derive(Clone, PartialEq, prost::Message)]
pub struct RawItem {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub description: String,
    #[prost(string, repeated, tag = "5")]
    pub categories: Vec<String>,
    /// Language tag as sent by the source (e.g., "en", "fr-FR").
    #[prost(string, tag = "6")]
    pub lang: String,
    #[prost(string, repeated, tag = "7")]
    pub urls: Vec<String>,
    #[prost(string, repeated, tag = "8")]
    pub image_urls: Vec<String>,
    /// Free-text dimension label to free-text value (e.g., "Height" => "12 cm").
    #[prost(btree_map = "string, string", tag = "9")]
    pub dimensions: BTreeMap<String, String>,
    /// Free-text price amount (e.g., "19.99").
    #[prost(string, tag = "10")]
    pub price: String,
    /// Free-text currency token (e.g., "EUR", "£").
    #[prost(string, tag = "11")]
    pub price_currency: String,
}

/// Canonical catalog item published for size matching.
#[derive(Clone, PartialEq, prost::Message)]
pub struct NormalizedItem {
    #[prost(string, tag = "1")]
    pub id: String,
    #[prost(string, tag = "2")]
    pub source: String,
    #[prost(string, tag = "3")]
    pub name: String,
    #[prost(string, tag = "4")]
    pub description: String,
    #[prost(string, repeated, tag = "5")]
    pub categories: Vec<String>,
    #[prost(enumeration = "Lang", tag = "6")]
    pub lang: i32,
    #[prost(string, repeated, tag = "7")]
    pub urls: Vec<String>,
    #[prost(string, repeated, tag = "8")]
    pub image_urls: Vec<String>,
    /// At most one entry per dimension name, in canonical dimension order.
    #[prost(message, repeated, tag = "9")]
    pub dimensions: Vec<Dimension>,
    #[prost(message, optional, tag = "10")]
    pub price: Option<Price>,
}

/// One measured dimension.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Dimension {
    #[prost(enumeration = "DimensionName", tag = "1")]
    pub name: i32,
    #[prost(double, tag = "2")]
    pub value: f64,
    #[prost(enumeration = "DimensionUnit", tag = "3")]
    pub unit: i32,
}

impl Dimension {
    pub fn new(name: DimensionName, value: f64, unit: DimensionUnit) -> Self {
        Self {
            name: name as i32,
            value,
            unit: unit as i32,
        }
    }
}

/// Price with its currency. The amount is a canonical decimal string.
#[derive(Clone, PartialEq, prost::Message)]
pub struct Price {
    #[prost(string, tag = "1")]
    pub amount: String,
    #[prost(enumeration = "Currency", tag = "2")]
    pub currency: i32,
}

impl Price {
    pub fn new(amount: Decimal, currency: Currency) -> Self {
        Self {
            amount: amount.normalize().to_string(),
            currency: currency as i32,
        }
    }

    /// Zero amount with no currency, used when the source gives no price.
    pub fn unspecified() -> Self {
        Self::new(Decimal::ZERO, Currency::Unspecified)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Lang {
    Unspecified = 0,
    En = 1,
    Fr = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DimensionName {
    Unspecified = 0,
    Height = 1,
    Width = 2,
    Depth = 3,
    Length = 4,
    Diameter = 5,
    Thickness = 6,
    Volume = 7,
    Weight = 8,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum DimensionUnit {
    Unspecified = 0,
    Mm = 1,
    Cm = 2,
    M = 3,
    G = 4,
    Kg = 5,
    Ml = 6,
    Cl = 7,
    L = 8,
    Mm2 = 9,
    Cm2 = 10,
    M2 = 11,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Currency {
    Unspecified = 0,
    Eur = 1,
    Gbp = 2,
}
