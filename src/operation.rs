use crate::error::PitwallError;
use crate::operations;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Trait for reduction operations over chunked data.
///
/// This forms the contract between the chunk executor and the reduction algebra. Each chunk
/// is folded into a partial result by a worker, and the ordered partials are then combined
/// into a single scalar.
pub trait Operation {
    /// Partial result for a chunk with no elements.
    fn identity() -> f64;

    /// Fold the samples of one chunk into a partial result.
    ///
    /// Returns [Operation::identity] for an empty chunk.
    fn fold_chunk(chunk: &[f64]) -> f64;

    /// Combine per-chunk partial results, ordered by chunk index.
    ///
    /// # Arguments
    ///
    /// * `partials`: One partial result per chunk
    /// * `total`: Size of the whole unit of work
    fn combine(partials: &[f64], total: usize) -> f64;
}

/// Reduction applied to a run, fixed for its lifetime.
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reduction {
    /// Unweighted sum divided by the size of the unit of work
    SumNormalize,
    /// Smallest partial
    Min,
    /// Largest partial
    Max,
    /// Unweighted mean of per-chunk means
    Average,
}

impl Reduction {
    /// Partial result for a chunk with no elements.
    pub fn identity(self) -> f64 {
        match self {
            Self::SumNormalize => operations::SumNormalize::identity(),
            Self::Min => operations::Min::identity(),
            Self::Max => operations::Max::identity(),
            Self::Average => operations::Average::identity(),
        }
    }

    /// Fold the samples of one chunk into a partial result.
    pub fn fold_chunk(self, chunk: &[f64]) -> f64 {
        match self {
            Self::SumNormalize => operations::SumNormalize::fold_chunk(chunk),
            Self::Min => operations::Min::fold_chunk(chunk),
            Self::Max => operations::Max::fold_chunk(chunk),
            Self::Average => operations::Average::fold_chunk(chunk),
        }
    }

    /// Combine per-chunk partial results into the final aggregate.
    ///
    /// There must be at least one partial, and `total` must be non-zero.
    pub fn combine(self, partials: &[f64], total: usize) -> Result<f64, PitwallError> {
        if partials.is_empty() || total == 0 {
            return Err(PitwallError::EmptyPartition {
                total,
                workers: partials.len(),
            });
        }
        let result = match self {
            Self::SumNormalize => operations::SumNormalize::combine(partials, total),
            Self::Min => operations::Min::combine(partials, total),
            Self::Max => operations::Max::combine(partials, total),
            Self::Average => operations::Average::combine(partials, total),
        };
        Ok(result)
    }
}
