//! Numerical integration of `4 / (1 + x²)` over `[0, 1]`, which gives pi.

use crate::error::PitwallError;
use crate::executor::Executor;
use crate::operation::Reduction;
use crate::partition::partition;

use std::ops::Range;

use tokio_util::sync::CancellationToken;

/// Sum the integrand at the midpoints of the intervals in `range`.
///
/// `[0, 1]` is divided into `total` intervals of equal width; the range selects which of them
/// to evaluate.
pub fn midpoint_sum(range: Range<usize>, total: usize) -> f64 {
    let step = 1.0 / total as f64;
    range
        .map(|j| {
            let x = (j as f64 + 0.5) * step;
            4.0 / (1.0 + x * x)
        })
        .sum()
}

/// Estimate pi with the midpoint rule, splitting the intervals across `threads` chunks.
#[tracing::instrument(level = "DEBUG", skip(executor, cancel))]
pub async fn estimate_pi(
    executor: &Executor,
    iterations: usize,
    threads: usize,
    cancel: &CancellationToken,
) -> Result<f64, PitwallError> {
    let chunks = partition(iterations, threads)?;
    let partials = executor
        .map_blocking(chunks, cancel, move |_, range| {
            midpoint_sum(range, iterations)
        })
        .await?;
    Reduction::SumNormalize.combine(&partials, iterations)
}
