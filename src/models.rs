//! Request and response data for the HTTP API.

use crate::operation::Reduction;

use serde::{Deserialize, Serialize};
use strum_macros::Display;
use validator::Validate;

/// Telemetry analyses selectable by clients
#[derive(Clone, Copy, Debug, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AnalysisType {
    /// Largest sample
    Max,
    /// Smallest sample
    Min,
    /// Mean of per-chunk means
    Avg,
}

impl From<AnalysisType> for Reduction {
    fn from(analysis: AnalysisType) -> Self {
        match analysis {
            AnalysisType::Max => Reduction::Max,
            AnalysisType::Min => Reduction::Min,
            AnalysisType::Avg => Reduction::Average,
        }
    }
}

impl std::str::FromStr for AnalysisType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "max" => Ok(Self::Max),
            "min" => Ok(Self::Min),
            "avg" => Ok(Self::Avg),
            other => Err(format!("expected one of max, min, avg, found {other:?}")),
        }
    }
}

/// Request data for a pi estimation
#[derive(Debug, Deserialize, PartialEq, Validate)]
#[serde(deny_unknown_fields)]
pub struct PiRequest {
    /// Number of midpoint-rule intervals
    #[validate(range(min = 1, message = "iterations must be greater than 0"))]
    pub iterations: usize,
    /// Number of chunks to compute in parallel
    #[validate(range(min = 1, message = "threads must be greater than 0"))]
    pub threads: usize,
}

/// Result of a pi estimation
#[derive(Debug, Deserialize, PartialEq, Serialize)]
pub struct PiResponse {
    /// Estimated value of pi
    pub pi: f64,
    /// Elapsed time in milliseconds
    pub time: u128,
    /// Number of midpoint-rule intervals
    pub iterations: usize,
    /// Number of chunks computed in parallel
    pub threads: usize,
    /// Relative error against [std::f64::consts::PI], as a percentage
    pub error: f64,
}

impl PiResponse {
    /// Return a PiResponse, computing the error metric from the estimate.
    pub fn new(pi: f64, time: u128, iterations: usize, threads: usize) -> Self {
        let error = (pi - std::f64::consts::PI).abs() / std::f64::consts::PI * 100.0;
        Self {
            pi,
            time,
            iterations,
            threads,
            error,
        }
    }
}

/// Result of a telemetry analysis
#[derive(Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryResponse {
    /// Aggregate value
    pub result: f64,
    /// Number of chunks analysed in parallel
    pub processors: usize,
    /// Number of samples analysed
    pub data_points: usize,
}
