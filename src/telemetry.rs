//! Telemetry parsing and parallel analysis.

use crate::error::PitwallError;
use crate::executor::Executor;
use crate::operation::Reduction;
use crate::partition::partition;

use std::io::Read;
use std::sync::Arc;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Slowest speed in a synthetic trace, in km/h
const MIN_SPEED: f64 = 60.0;
/// Fastest speed in a synthetic trace, in km/h
const MAX_SPEED: f64 = 340.0;

/// Read samples from a headerless CSV file.
///
/// Rows whose `column` is missing or is not a finite number are skipped, which also skips a
/// header row if there is one.
///
/// # Arguments
///
/// * `reader`: CSV data
/// * `column`: Zero-based index of the column holding the samples
pub fn parse_samples<R: Read>(reader: R, column: usize) -> Result<Vec<f64>, PitwallError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record
            .get(column)
            .and_then(|field| field.parse::<f64>().ok())
            .filter(|value| value.is_finite())
        {
            samples.push(value);
        }
    }
    if samples.is_empty() {
        return Err(PitwallError::NoSamples { column });
    }
    Ok(samples)
}

/// Reduce samples in parallel, one chunk per worker.
#[tracing::instrument(level = "DEBUG", skip(executor, samples, cancel), fields(samples = samples.len()))]
pub async fn analyse(
    executor: &Executor,
    samples: Arc<Vec<f64>>,
    workers: usize,
    reduction: Reduction,
    cancel: &CancellationToken,
) -> Result<f64, PitwallError> {
    let total = samples.len();
    let chunks = partition(total, workers)?;
    let partials = executor
        .map_blocking(chunks, cancel, move |_, range| {
            reduction.fold_chunk(&samples[range])
        })
        .await?;
    reduction.combine(&partials, total)
}

/// Generate a synthetic speed trace as a bounded random walk.
pub fn synthetic_trace<R: Rng>(rng: &mut R, samples: usize) -> Vec<f64> {
    let mut speed = rng.gen_range(MIN_SPEED..MAX_SPEED);
    (0..samples)
        .map(|_| {
            speed = (speed + rng.gen_range(-15.0..15.0)).clamp(MIN_SPEED, MAX_SPEED);
            (speed * 100.0).round() / 100.0
        })
        .collect()
}
