//! Reduction operations.
//!
//! Each operation is implemented as a struct that implements the
//! [Operation](crate::operation::Operation) trait.

use crate::operation::Operation;

/// Sum of all samples, normalised by the size of the unit of work.
///
/// Used for the midpoint-rule estimate of pi, where each partial is the sum of `4/(1+x²)`
/// over a chunk of the integration range.
pub struct SumNormalize {}

impl Operation for SumNormalize {
    fn identity() -> f64 {
        0.0
    }

    fn fold_chunk(chunk: &[f64]) -> f64 {
        chunk.iter().sum()
    }

    fn combine(partials: &[f64], total: usize) -> f64 {
        // Summed in chunk order so the result does not depend on completion order.
        let sum: f64 = partials.iter().sum();
        sum / total as f64
    }
}

/// Return the minimum of the samples.
pub struct Min {}

impl Operation for Min {
    fn identity() -> f64 {
        f64::INFINITY
    }

    fn fold_chunk(chunk: &[f64]) -> f64 {
        chunk.iter().copied().fold(Self::identity(), f64::min)
    }

    fn combine(partials: &[f64], _total: usize) -> f64 {
        Self::fold_chunk(partials)
    }
}

/// Return the maximum of the samples.
pub struct Max {}

impl Operation for Max {
    fn identity() -> f64 {
        f64::NEG_INFINITY
    }

    fn fold_chunk(chunk: &[f64]) -> f64 {
        chunk.iter().copied().fold(Self::identity(), f64::max)
    }

    fn combine(partials: &[f64], _total: usize) -> f64 {
        Self::fold_chunk(partials)
    }
}

/// Return the mean of the per-chunk means.
///
/// The combination is unweighted: a short final chunk counts as much as a full one. This is
/// only exact when every chunk has the same length. An empty chunk has no mean, so its partial
/// is NaN and it is left out of the combination.
pub struct Average {}

impl Operation for Average {
    fn identity() -> f64 {
        f64::NAN
    }

    fn fold_chunk(chunk: &[f64]) -> f64 {
        if chunk.is_empty() {
            return Self::identity();
        }
        chunk.iter().sum::<f64>() / chunk.len() as f64
    }

    fn combine(partials: &[f64], _total: usize) -> f64 {
        let (sum, count) = partials
            .iter()
            .filter(|partial| !partial.is_nan())
            .fold((0.0_f64, 0_u32), |(sum, count), partial| {
                (sum + partial, count + 1)
            });
        sum / f64::from(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::operation::Reduction;
    use crate::partition;

    /// Fold each chunk then combine, as a run would.
    fn reduce(reduction: Reduction, data: &[f64], workers: usize) -> f64 {
        let partials = partition::split(data, workers)
            .unwrap()
            .into_iter()
            .map(|chunk| reduction.fold_chunk(chunk))
            .collect::<Vec<f64>>();
        reduction.combine(&partials, data.len()).unwrap()
    }

    #[test]
    fn max_two_workers() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let partials = partition::split(&data, 2)
            .unwrap()
            .into_iter()
            .map(Max::fold_chunk)
            .collect::<Vec<f64>>();
        assert_eq!(vec![3.0, 6.0], partials);
        assert_eq!(6.0, Max::combine(&partials, data.len()));
    }

    #[test]
    fn min_two_workers() {
        let data = [4.0, 2.0, 9.0, 1.5, 8.0, 6.0];
        assert_eq!(1.5, reduce(Reduction::Min, &data, 2));
    }

    #[test]
    fn average_equal_chunks() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(3.5, reduce(Reduction::Average, &data, 2));
    }

    #[test]
    fn average_is_unweighted() {
        // Chunks [1, 2] and [3, 4, 5] have means 1.5 and 4, so the result is 2.75 rather than 3.
        let data = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(2.75, reduce(Reduction::Average, &data, 2));
    }

    #[test]
    fn sum_normalize() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(2.5, reduce(Reduction::SumNormalize, &data, 3));
    }

    #[test]
    fn identities() {
        assert_eq!(0.0, SumNormalize::fold_chunk(&[]));
        assert_eq!(f64::INFINITY, Min::fold_chunk(&[]));
        assert_eq!(f64::NEG_INFINITY, Max::fold_chunk(&[]));
        assert!(Average::fold_chunk(&[]).is_nan());
    }

    #[test]
    fn empty_chunks_do_not_change_result() {
        let data = [3.0, -1.0, 7.5, 2.0];
        for reduction in [
            Reduction::SumNormalize,
            Reduction::Min,
            Reduction::Max,
            Reduction::Average,
        ] {
            let exact = reduce(reduction, &data, data.len());
            let over = reduce(reduction, &data, data.len() * 3);
            assert_eq!(exact.to_bits(), over.to_bits(), "{reduction}");
        }
    }

    #[test]
    fn deterministic() {
        let data = (0..10_000)
            .map(|i| (i as f64 * 0.37).sin())
            .collect::<Vec<f64>>();
        for reduction in [
            Reduction::SumNormalize,
            Reduction::Min,
            Reduction::Max,
            Reduction::Average,
        ] {
            let first = reduce(reduction, &data, 7);
            let second = reduce(reduction, &data, 7);
            assert_eq!(first.to_bits(), second.to_bits(), "{reduction}");
        }
    }
}
