//! Progress events sent to socket sessions.
//!
//! Every event is a JSON object tagged by `kind`:
//!
//! ```json
//! {"kind": "log", "topic": "mpi", "text": "Lap 1: 64.21 s"}
//! {"kind": "summary", "topic": "mpi", "payload": {"message": "...", "laps": [...]}}
//! {"kind": "finished", "topic": "mpi"}
//! ```
//!
//! A run's last event is always `finished`, and its `summary` (if any) comes before it.

use crate::error::PitwallError;
use crate::models::AnalysisType;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

/// Identifies the run an event belongs to.
#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, Hash, PartialEq, Serialize)]
pub enum Topic {
    #[serde(rename = "mpi")]
    #[strum(serialize = "mpi")]
    Mpi,
    #[serde(rename = "openmp")]
    #[strum(serialize = "openmp")]
    OpenMp,
    #[serde(rename = "telemetry")]
    #[strum(serialize = "telemetry")]
    Telemetry,
    /// Session diagnostics not tied to any run
    #[default]
    #[serde(rename = "")]
    #[strum(serialize = "")]
    None,
}

/// A single progress event.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Event {
    /// Human-readable progress line
    Log {
        #[serde(default)]
        topic: Topic,
        text: String,
    },
    /// Structured result of a whole run
    Summary {
        #[serde(default)]
        topic: Topic,
        payload: Payload,
    },
    /// Sign-off of a run
    Finished {
        #[serde(default)]
        topic: Topic,
    },
    /// A kind this version does not know about
    #[serde(other)]
    Unknown,
}

impl Event {
    pub fn log(topic: Topic, text: impl Into<String>) -> Self {
        Self::Log {
            topic,
            text: text.into(),
        }
    }

    /// Log event reporting a failed command or run.
    pub fn error(topic: Topic, error: &PitwallError) -> Self {
        Self::log(topic, format!("Error: {}", error.describe()))
    }

    pub fn summary(topic: Topic, payload: impl Into<Payload>) -> Self {
        Self::Summary {
            topic,
            payload: payload.into(),
        }
    }

    pub fn finished(topic: Topic) -> Self {
        Self::Finished { topic }
    }

    /// Topic of the event, or [Topic::None] for unknown kinds.
    pub fn topic(&self) -> Topic {
        match self {
            Self::Log { topic, .. } | Self::Summary { topic, .. } | Self::Finished { topic } => {
                *topic
            }
            Self::Unknown => Topic::None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

/// Summary payloads, one shape per run type.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Mpi(MpiSummary),
    OpenMp(OpenMpSummary),
    Telemetry(TelemetrySummary),
}

/// Time of a single lap, in seconds.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct LapTime {
    pub lap: usize,
    pub time: f64,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct MpiSummary {
    pub message: String,
    pub laps: Vec<LapTime>,
    pub best_lap: Option<LapTime>,
}

/// A car's best lap and all of its lap times.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct CarResult {
    pub car_id: usize,
    pub best_lap: f64,
    pub laps: Vec<f64>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct OpenMpSummary {
    pub best_per_car: Vec<CarResult>,
    pub best_overall: Option<CarResult>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct TelemetrySummary {
    pub analysis: AnalysisType,
    pub result: f64,
    pub workers: usize,
    pub samples: usize,
}

impl From<MpiSummary> for Payload {
    fn from(summary: MpiSummary) -> Self {
        Self::Mpi(summary)
    }
}

impl From<OpenMpSummary> for Payload {
    fn from(summary: OpenMpSummary) -> Self {
        Self::OpenMp(summary)
    }
}

impl From<TelemetrySummary> for Payload {
    fn from(summary: TelemetrySummary) -> Self {
        Self::Telemetry(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use serde_test::{assert_tokens, Token};

    #[test]
    fn topic_tokens() {
        assert_tokens(
            &Topic::OpenMp,
            &[Token::UnitVariant {
                name: "Topic",
                variant: "openmp",
            }],
        );
        assert_tokens(
            &Topic::None,
            &[Token::UnitVariant {
                name: "Topic",
                variant: "",
            }],
        );
    }

    #[test]
    fn topic_display() {
        assert_eq!("telemetry", Topic::Telemetry.to_string());
        assert_eq!("", Topic::None.to_string());
    }

    #[test]
    fn log_wire_format() {
        let event = Event::log(Topic::Mpi, "Lap 1: 64.21 s");
        assert_eq!(
            json!({"kind": "log", "topic": "mpi", "text": "Lap 1: 64.21 s"}),
            serde_json::to_value(&event).unwrap()
        );
    }

    #[test]
    fn finished_wire_format() {
        let event = Event::finished(Topic::OpenMp);
        assert_eq!(
            r#"{"kind":"finished","topic":"openmp"}"#,
            serde_json::to_string(&event).unwrap()
        );
        assert!(event.is_finished());
    }

    #[test]
    fn error_event() {
        let error = PitwallError::OutOfRange {
            name: "sectors",
            requirement: ">= 1".to_string(),
        };
        let event = Event::error(Topic::Mpi, &error);
        assert_eq!(Event::log(Topic::Mpi, "Error: sectors must be >= 1"), event);
    }

    #[test]
    fn summary_wire_format() {
        let event = Event::summary(
            Topic::Mpi,
            MpiSummary {
                message: "MPI finished".to_string(),
                laps: vec![LapTime { lap: 1, time: 40.5 }],
                best_lap: Some(LapTime { lap: 1, time: 40.5 }),
            },
        );
        assert_eq!(
            json!({
                "kind": "summary",
                "topic": "mpi",
                "payload": {
                    "message": "MPI finished",
                    "laps": [{"lap": 1, "time": 40.5}],
                    "best_lap": {"lap": 1, "time": 40.5}
                }
            }),
            serde_json::to_value(&event).unwrap()
        );
    }

    #[test]
    fn payload_shapes_are_distinguished() {
        let openmp = json!({
            "best_per_car": [{"car_id": 2, "best_lap": 76.1, "laps": [80.0, 76.1]}],
            "best_overall": {"car_id": 2, "best_lap": 76.1, "laps": [80.0, 76.1]}
        });
        let payload = serde_json::from_value::<Payload>(openmp).unwrap();
        assert!(matches!(payload, Payload::OpenMp(_)));

        let telemetry = json!({"analysis": "avg", "result": 3.5, "workers": 2, "samples": 6});
        let payload = serde_json::from_value::<Payload>(telemetry).unwrap();
        assert_eq!(
            Payload::Telemetry(TelemetrySummary {
                analysis: AnalysisType::Avg,
                result: 3.5,
                workers: 2,
                samples: 6,
            }),
            payload
        );
    }

    #[test]
    fn unknown_kind_is_tolerated() {
        let event =
            serde_json::from_str::<Event>(r#"{"kind": "heartbeat", "topic": "mpi", "seq": 4}"#)
                .unwrap();
        assert_eq!(Event::Unknown, event);
        assert_eq!(Topic::None, event.topic());
    }

    #[test]
    fn missing_topic_defaults_to_none() {
        let event = serde_json::from_str::<Event>(r#"{"kind": "log", "text": "hello"}"#).unwrap();
        assert_eq!(Event::log(Topic::None, "hello"), event);
    }
}
