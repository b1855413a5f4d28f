//! Normalization seam the pipeline is generic over.

use crate::error::Result;
use crate::schema::{NormalizedItem, RawItem};

/// Turns one raw item into one normalized item, or fails for the whole item.
///
/// Implementations must be pure with respect to shared state: the pipeline
/// calls them once per delivery and never concurrently on the same item.
pub trait ItemNormalizer: Send + Sync + 'static {
    /// Short name used in log lines.
    const NAME: &'static str;

    fn normalize(&self, item: &RawItem) -> Result<NormalizedItem>;
}
