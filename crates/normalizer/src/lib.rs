//! Normalizer service for catalog items.
//!
//! Raw items arrive as protobuf messages on a consumer queue, are normalized
//! field by field and republished to an exchange. Free-text dimensions are
//! recognised by label (English or French), reduced to one value per
//! dimension and mapped onto a closed unit vocabulary.
//!
//! # Architecture
//!
//! ```text
//! RawItem (NATS) --> ItemNormalizer --> NormalizedItem --> NATS
//!                    (fields, dimensions, price)
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use normalizer::{FieldNormalizer, NormalizerServiceBuilder};
//!
//! let service = NormalizerServiceBuilder::new(FieldNormalizer::new()?)
//!     .consumer_queue("items")
//!     .exchange("normalized")
//!     .routing_key("normalized.items")
//!     .build(channel, shutdown_rx);
//! service.run().await?;
//! ```

pub mod currency;
pub mod dimensions;
pub mod error;
pub mod fields;
pub mod schema;
pub mod service;
pub mod traits;
pub mod units;

pub use currency::CurrencyMatcher;
pub use dimensions::{DimensionMatcher, DimensionPattern};
pub use error::{MatchError, NormalizationError, Result};
pub use fields::{FieldNormalizer, DEFAULT_LANG};
pub use schema::{
    Currency, Dimension, DimensionName, DimensionUnit, Lang, NormalizedItem, Price, RawItem,
};
pub use service::{
    NormalizerService, NormalizerServiceBuilder, Pipeline, PipelineConfig, ProcessError,
};
pub use traits::ItemNormalizer;
pub use units::{QuantityKind, UnitTable};
