//! Error handling.

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    http::header,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::error::Error;
use thiserror::Error;
use tokio::sync::AcquireError;
use tracing::{event, Level};

/// Pitwall error type
///
/// This type encapsulates the various errors that may occur.
/// Each variant may result in a different API error response, or an error-bearing event on a
/// socket session.
#[derive(Debug, Error)]
pub enum PitwallError {
    /// A chunk worker panicked during computation
    #[error("chunk {index} failed: {message}")]
    ChunkPanicked { index: usize, message: String },

    /// Error parsing a socket command
    #[error("unrecognised command")]
    CommandJson(#[from] serde_json::Error),

    /// Error reading an uploaded telemetry file
    #[error("failed to parse telemetry file")]
    Csv(#[from] csv::Error),

    /// Attempt to partition an empty unit of work, or to partition across zero workers
    #[error("cannot partition {total} units across {workers} workers")]
    EmptyPartition { total: usize, workers: usize },

    /// The fan-in channel closed before every chunk reported back
    #[error("received {received} of {expected} chunk results")]
    FanInIncomplete { received: usize, expected: usize },

    /// Insufficient memory to process request
    #[error("Insufficient memory to process request ({requested} > {total})")]
    InsufficientMemory { requested: usize, total: usize },

    /// A form field could not be interpreted
    #[error("invalid form field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    /// A required form field was not provided
    #[error("missing form field {field}")]
    MissingField { field: &'static str },

    /// Error reading a multipart request
    #[error("failed to read multipart request")]
    Multipart(#[from] MultipartError),

    /// The uploaded telemetry file contained no usable samples
    #[error("no numeric samples found in column {column}")]
    NoSamples { column: usize },

    /// A numeric run parameter was outside its accepted range
    #[error("{name} must be {requirement}")]
    OutOfRange {
        name: &'static str,
        requirement: String,
    },

    /// The run was cancelled before it completed
    #[error("run was cancelled")]
    Cancelled,

    /// Error deserialising request data
    #[error("request data is not valid")]
    RequestDataJsonRejection(#[from] JsonRejection),

    /// Error validating request data (single error)
    #[error("request data is not valid")]
    RequestDataValidationSingle(#[from] validator::ValidationError),

    /// Error validating request data (multiple errors)
    #[error("request data is not valid")]
    RequestDataValidation(#[from] validator::ValidationErrors),

    /// Error acquiring a semaphore
    #[error("error acquiring resources")]
    SemaphoreAcquireError(#[from] AcquireError),

    /// The session's outbound connection is gone
    #[error("session connection closed")]
    SessionClosed,

    /// A spawned task failed to complete
    #[error("task failed to complete")]
    TaskJoin(#[from] tokio::task::JoinError),

    /// Error converting between integer types
    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),
}

impl PitwallError {
    /// Whether the error means the owning session can no longer receive events.
    ///
    /// Runs failing with one of these are abandoned quietly rather than reported.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::SessionClosed | Self::Cancelled)
    }

    /// Render the error and its chain of causes on a single line.
    pub fn describe(&self) -> String {
        let body = ErrorBody::new(self);
        match body.caused_by {
            Some(causes) => format!("{}: {}", body.message, causes.join(": ")),
            None => body.message,
        }
    }
}

impl IntoResponse for PitwallError {
    /// Convert from a `PitwallError` into an [axum::response::Response].
    fn into_response(self) -> Response {
        ErrorResponse::from(self).into_response()
    }
}

/// Body of error response
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorBody {
    /// Main error message
    message: String,

    /// Optional list of causes
    #[serde(skip_serializing_if = "Option::is_none")]
    caused_by: Option<Vec<String>>,
}

impl ErrorBody {
    /// Return a new ErrorBody
    ///
    /// # Arguments
    ///
    /// * `error`: The error that occurred
    fn new<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        let message = error.to_string();
        let mut caused_by = None;
        let mut current = error.source();
        while let Some(source) = current {
            let mut causes: Vec<String> = caused_by.unwrap_or_default();
            causes.push(source.to_string());
            caused_by = Some(causes);
            current = source.source();
        }
        // Remove duplicate entries.
        if let Some(caused_by) = caused_by.as_mut() {
            caused_by.dedup()
        }
        ErrorBody { message, caused_by }
    }
}

/// A response to send in error cases
///
/// Implements serde (de)serialise.
#[derive(Deserialize, Serialize)]
struct ErrorResponse {
    /// HTTP status of the response
    #[serde(skip)]
    status: StatusCode,

    /// Response body
    error: ErrorBody,
}

impl ErrorResponse {
    /// Return a new ErrorResponse
    ///
    /// # Arguments
    ///
    /// * `status`: HTTP status of the response
    /// * `error`: The error that occurred. This will be formatted into a suitable `ErrorBody`
    fn new<E>(status: StatusCode, error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        ErrorResponse {
            status,
            error: ErrorBody::new(error),
        }
    }

    /// Return a 400 bad request ErrorResponse
    fn bad_request<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    /// Return a 500 internal server error ErrorResponse
    fn internal_server_error<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    /// Return a 503 service unavailable ErrorResponse
    fn service_unavailable<E>(error: &E) -> Self
    where
        E: std::error::Error + Send + Sync,
    {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error)
    }
}

impl From<PitwallError> for ErrorResponse {
    /// Convert from a `PitwallError` into an `ErrorResponse`.
    fn from(error: PitwallError) -> Self {
        let response = match &error {
            // Bad request
            PitwallError::CommandJson(_)
            | PitwallError::Csv(_)
            | PitwallError::EmptyPartition { .. }
            | PitwallError::InsufficientMemory { .. }
            | PitwallError::InvalidField { .. }
            | PitwallError::MissingField { .. }
            | PitwallError::Multipart(_)
            | PitwallError::NoSamples { .. }
            | PitwallError::OutOfRange { .. }
            | PitwallError::RequestDataJsonRejection(_)
            | PitwallError::RequestDataValidationSingle(_)
            | PitwallError::RequestDataValidation(_) => Self::bad_request(&error),

            // Service unavailable
            PitwallError::Cancelled | PitwallError::SessionClosed => {
                Self::service_unavailable(&error)
            }

            // Internal server error
            PitwallError::ChunkPanicked { .. }
            | PitwallError::FanInIncomplete { .. }
            | PitwallError::SemaphoreAcquireError(_)
            | PitwallError::TaskJoin(_)
            | PitwallError::TryFromInt(_) => Self::internal_server_error(&error),
        };

        // Log server errors.
        if response.status.is_server_error() {
            event!(Level::ERROR, "{}", error.to_string());
            let mut current = error.source();
            while let Some(source) = current {
                event!(Level::ERROR, "Caused by: {}", source.to_string());
                current = source.source();
            }
        }

        response
    }
}

impl IntoResponse for ErrorResponse {
    /// Convert from an `ErrorResponse` into an `axum::response::Response`.
    ///
    /// Renders the response as JSON.
    fn into_response(self) -> Response {
        let json_body = serde_json::to_string_pretty(&self);
        match json_body {
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to serialise error response: {}", err),
            )
                .into_response(),
            Ok(json_body) => (
                self.status,
                [(&header::CONTENT_TYPE, mime::APPLICATION_JSON.to_string())],
                json_body,
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hyper::HeaderMap;

    // Jump through the hoops to get the body as a string.
    async fn body_string(response: Response) -> String {
        String::from_utf8(
            hyper::body::to_bytes(response.into_body())
                .await
                .unwrap()
                .to_vec(),
        )
        .unwrap()
    }

    async fn test_pitwall_error(
        error: PitwallError,
        status: StatusCode,
        message: &str,
        caused_by: Option<Vec<&'static str>>,
    ) {
        let response = error.into_response();
        assert_eq!(status, response.status());
        let mut headers = HeaderMap::new();
        headers.insert(&header::CONTENT_TYPE, "application/json".parse().unwrap());
        assert_eq!(headers, *response.headers());
        let error_response: ErrorResponse =
            serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(message.to_string(), error_response.error.message);
        // Map Vec items from str to String
        let caused_by = caused_by.map(|cb| cb.iter().map(|s| s.to_string()).collect());
        assert_eq!(caused_by, error_response.error.caused_by);
    }

    #[tokio::test]
    async fn chunk_panicked() {
        let error = PitwallError::ChunkPanicked {
            index: 3,
            message: "boom".to_string(),
        };
        let message = "chunk 3 failed: boom";
        test_pitwall_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn command_json() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = PitwallError::CommandJson(json_error);
        let message = "unrecognised command";
        let caused_by = Some(vec!["EOF while parsing an object at line 1 column 1"]);
        test_pitwall_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn empty_partition() {
        let error = PitwallError::EmptyPartition {
            total: 0,
            workers: 4,
        };
        let message = "cannot partition 0 units across 4 workers";
        test_pitwall_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn fan_in_incomplete() {
        let error = PitwallError::FanInIncomplete {
            received: 1,
            expected: 2,
        };
        let message = "received 1 of 2 chunk results";
        test_pitwall_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[tokio::test]
    async fn insufficient_memory() {
        let error = PitwallError::InsufficientMemory {
            requested: 2,
            total: 1,
        };
        let message = "Insufficient memory to process request (2 > 1)";
        test_pitwall_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn missing_field() {
        let error = PitwallError::MissingField {
            field: "telemetryFile",
        };
        let message = "missing form field telemetryFile";
        test_pitwall_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn out_of_range() {
        let error = PitwallError::OutOfRange {
            name: "sectors",
            requirement: ">= 1".to_string(),
        };
        let message = "sectors must be >= 1";
        test_pitwall_error(error, StatusCode::BAD_REQUEST, message, None).await;
    }

    #[tokio::test]
    async fn request_data_validation() {
        let mut validation_errors = validator::ValidationErrors::new();
        let validation_error = validator::ValidationError::new("range");
        validation_errors.add("threads", validation_error);
        let error = PitwallError::RequestDataValidation(validation_errors);
        let message = "request data is not valid";
        let caused_by = Some(vec!["threads: Validation error: range [{}]"]);
        test_pitwall_error(error, StatusCode::BAD_REQUEST, message, caused_by).await;
    }

    #[tokio::test]
    async fn semaphore_acquire_error() {
        let sem = tokio::sync::Semaphore::new(1);
        sem.close();
        let error = PitwallError::SemaphoreAcquireError(sem.acquire().await.unwrap_err());
        let message = "error acquiring resources";
        let caused_by = Some(vec!["semaphore closed"]);
        test_pitwall_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, caused_by).await;
    }

    #[tokio::test]
    async fn session_closed() {
        let error = PitwallError::SessionClosed;
        let message = "session connection closed";
        test_pitwall_error(error, StatusCode::SERVICE_UNAVAILABLE, message, None).await;
    }

    #[tokio::test]
    async fn try_from_int_error() {
        let error = PitwallError::TryFromInt(u8::try_from(-1_i8).unwrap_err());
        let message = "out of range integral type conversion attempted";
        test_pitwall_error(error, StatusCode::INTERNAL_SERVER_ERROR, message, None).await;
    }

    #[test]
    fn describe_includes_causes() {
        let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = PitwallError::CommandJson(json_error);
        assert_eq!(
            "unrecognised command: EOF while parsing an object at line 1 column 1",
            error.describe()
        );
    }

    #[test]
    fn session_fatal() {
        assert!(PitwallError::SessionClosed.is_session_fatal());
        assert!(PitwallError::Cancelled.is_session_fatal());
        assert!(!PitwallError::NoSamples { column: 1 }.is_session_fatal());
    }
}
