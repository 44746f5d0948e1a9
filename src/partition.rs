//! Partitioning of a unit of work into contiguous chunks.

use crate::error::PitwallError;

use std::ops::Range;

/// Split `[0, total)` into `workers` contiguous half-open ranges.
///
/// Every chunk except the last has length `total / workers`. The last chunk ends at `total`
/// and so absorbs the remainder of the integer division. When there are more workers than
/// units, the leading chunks are empty but are still returned so that every worker receives
/// exactly one chunk.
///
/// # Arguments
///
/// * `total`: Number of units of work
/// * `workers`: Number of workers to partition across
pub fn partition(total: usize, workers: usize) -> Result<Vec<Range<usize>>, PitwallError> {
    if total == 0 || workers == 0 {
        return Err(PitwallError::EmptyPartition { total, workers });
    }
    let chunk_size = total / workers;
    let chunks = (0..workers)
        .map(|index| {
            let start = index * chunk_size;
            let end = if index == workers - 1 {
                total
            } else {
                start + chunk_size
            };
            start..end
        })
        .collect();
    Ok(chunks)
}

/// Split a slice into `workers` contiguous sub-slices, following [partition].
pub fn split<T>(data: &[T], workers: usize) -> Result<Vec<&[T]>, PitwallError> {
    let chunks = partition(data.len(), workers)?
        .into_iter()
        .map(|range| &data[range])
        .collect();
    Ok(chunks)
}
