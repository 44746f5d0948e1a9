//! Commands received from socket sessions.

use crate::error::PitwallError;
use crate::events::Topic;
use crate::models::AnalysisType;

use serde::Deserialize;

/// A command as sent by the client.
///
/// Counts are signed so that non-positive values reach validation rather than failing to parse.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Command {
    StartMpi {
        #[serde(default, alias = "sectores")]
        sectors: Option<i64>,
        #[serde(default, alias = "vueltas")]
        laps: Option<i64>,
    },
    StartOpenmp {
        #[serde(default, alias = "autos")]
        cars: Option<i64>,
        #[serde(default, alias = "vueltas")]
        laps: Option<i64>,
    },
    StartTelemetry {
        #[serde(default)]
        samples: Option<i64>,
        #[serde(default)]
        workers: Option<i64>,
        #[serde(default)]
        analysis: Option<AnalysisType>,
    },
}

/// Upper bounds applied when validating commands.
#[derive(Clone, Copy, Debug)]
pub struct RunLimits {
    /// Largest accepted chunk count (sectors, cars or workers)
    pub max_workers: usize,
    /// Largest accepted synthetic telemetry trace
    pub max_samples: usize,
    /// Largest accepted lap count
    pub max_laps: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MpiParams {
    pub sectors: usize,
    pub laps: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OpenMpParams {
    pub cars: usize,
    pub laps: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TelemetryParams {
    pub samples: usize,
    pub workers: usize,
    pub analysis: AnalysisType,
}

/// Validated parameters of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunSpec {
    Mpi(MpiParams),
    OpenMp(OpenMpParams),
    Telemetry(TelemetryParams),
}

impl RunSpec {
    pub fn topic(&self) -> Topic {
        match self {
            Self::Mpi(_) => Topic::Mpi,
            Self::OpenMp(_) => Topic::OpenMp,
            Self::Telemetry(_) => Topic::Telemetry,
        }
    }
}

impl Command {
    /// Parse a command from a text frame.
    pub fn parse(text: &str) -> Result<Self, PitwallError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Topic of the run this command starts.
    pub fn topic(&self) -> Topic {
        match self {
            Self::StartMpi { .. } => Topic::Mpi,
            Self::StartOpenmp { .. } => Topic::OpenMp,
            Self::StartTelemetry { .. } => Topic::Telemetry,
        }
    }

    /// Apply defaults and check parameters.
    ///
    /// Counts below one or above the configured limits are rejected. Lap counts below one are
    /// raised to one, but are still rejected above the limit.
    pub fn validate(&self, limits: &RunLimits) -> Result<RunSpec, PitwallError> {
        let spec = match *self {
            Self::StartMpi { sectors, laps } => RunSpec::Mpi(MpiParams {
                sectors: count("sectors", sectors, 1, limits.max_workers)?,
                laps: lap_count(laps, 1, limits.max_laps)?,
            }),
            Self::StartOpenmp { cars, laps } => RunSpec::OpenMp(OpenMpParams {
                cars: count("cars", cars, 3, limits.max_workers)?,
                laps: lap_count(laps, 5, limits.max_laps)?,
            }),
            Self::StartTelemetry {
                samples,
                workers,
                analysis,
            } => RunSpec::Telemetry(TelemetryParams {
                samples: count("samples", samples, 1000, limits.max_samples)?,
                workers: count("workers", workers, 4, limits.max_workers)?,
                analysis: analysis.unwrap_or(AnalysisType::Max),
            }),
        };
        Ok(spec)
    }
}

fn count(
    name: &'static str,
    value: Option<i64>,
    default: usize,
    max: usize,
) -> Result<usize, PitwallError> {
    let value = match value {
        Some(value) if value < 1 => {
            return Err(PitwallError::OutOfRange {
                name,
                requirement: ">= 1".to_string(),
            })
        }
        Some(value) => usize::try_from(value)?,
        None => default,
    };
    if value > max {
        return Err(PitwallError::OutOfRange {
            name,
            requirement: format!("<= {max}"),
        });
    }
    Ok(value)
}

fn lap_count(value: Option<i64>, default: usize, max: usize) -> Result<usize, PitwallError> {
    count("laps", value.map(|laps| laps.max(1)), default, max)
}
