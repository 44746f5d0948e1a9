//! Pitwall application router and request handlers

use crate::app_state::{AppState, SharedAppState};
use crate::cli::CommandLineArgs;
use crate::error::PitwallError;
use crate::integration;
use crate::metrics;
use crate::resource_manager::ResourceManager;
use crate::models::{AnalysisType, PiRequest, PiResponse, TelemetryResponse};
use crate::session::Session;
use crate::telemetry;
use crate::validated_json::ValidatedJson;

use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        multipart::Field,
        Multipart, State,
    },
    response::Response,
    routing::{get, post},
    Json, Router,
};
use bytes::{Bytes, BytesMut};
use futures::{future, SinkExt, StreamExt};
use tokio::sync::SemaphorePermit;
use tokio_util::sync::CancellationToken;
use tower::Layer;
use tower::ServiceBuilder;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tower_http::trace::TraceLayer;

/// Column of an uploaded telemetry file read when none is given
const DEFAULT_TELEMETRY_COLUMN: usize = 1;

/// Application service: the router with trailing slashes trimmed from request paths.
pub type Service = NormalizePath<Router>;

/// Initialise the application
pub fn init(args: &CommandLineArgs) {
    if let Some(thread_limit) = args.thread_limit {
        if args.use_rayon {
            if let Err(err) = rayon::ThreadPoolBuilder::new()
                .num_threads(thread_limit)
                .build_global()
            {
                tracing::warn!("failed to configure Rayon thread pool: {}", err);
            }
        }
    }
}

/// Returns a [crate::app::Service] for all routes
///
/// # Arguments
///
/// * `args`: Command line arguments
pub fn service(args: &CommandLineArgs) -> Service {
    let state = Arc::new(AppState::new(args));
    NormalizePathLayer::trim_trailing_slash().layer(router(state))
}

/// Returns a [axum::Router] for all routes
///
/// # Arguments
///
/// * `state`: Shared application state
pub fn router(state: SharedAppState) -> Router {
    fn v1() -> Router<SharedAppState> {
        Router::new()
            .route("/pi", post(pi))
            .route("/telemetry", post(telemetry_analysis))
    }

    Router::new()
        .route("/ws", get(ws))
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/v1", v1())
        .layer(
            ServiceBuilder::new().layer(
                TraceLayer::new_for_http()
                    .on_request(metrics::request_counter)
                    .on_response(metrics::record_response_metrics),
            ),
        )
        .with_state(state)
}

/// Check a requested chunk count against the configured maximum.
fn check_workers(name: &'static str, workers: usize, max: usize) -> Result<(), PitwallError> {
    if workers < 1 {
        return Err(PitwallError::OutOfRange {
            name,
            requirement: ">= 1".to_string(),
        });
    }
    if workers > max {
        return Err(PitwallError::OutOfRange {
            name,
            requirement: format!("<= {max}"),
        });
    }
    Ok(())
}

/// Parse the text of a form field.
fn parse_field<T>(field: &'static str, text: &str) -> Result<T, PitwallError>
where
    T: FromStr,
    T::Err: Display,
{
    text.trim()
        .parse()
        .map_err(|err: T::Err| PitwallError::InvalidField {
            field,
            reason: err.to_string(),
        })
}

/// Read an uploaded file, taking memory permits for its bytes as each chunk arrives.
async fn read_upload<'a>(
    field: &mut Field<'_>,
    resource_manager: &'a ResourceManager,
) -> Result<(Bytes, Vec<SemaphorePermit<'a>>), PitwallError> {
    let mut buffer = BytesMut::new();
    let mut permits = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        permits.extend(
            resource_manager
                .more_memory(buffer.len(), chunk.len())
                .await?,
        );
        buffer.extend_from_slice(&chunk);
    }
    Ok((buffer.freeze(), permits))
}

/// Handler for pi estimation
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `request`: Validated iteration and thread counts
async fn pi(
    State(state): State<SharedAppState>,
    ValidatedJson(request): ValidatedJson<PiRequest>,
) -> Result<Json<PiResponse>, PitwallError> {
    check_workers("threads", request.threads, state.args.max_workers)?;
    let start = Instant::now();
    let pi = integration::estimate_pi(
        &state.executor,
        request.iterations,
        request.threads,
        &CancellationToken::new(),
    )
    .await?;
    Ok(Json(PiResponse::new(
        pi,
        start.elapsed().as_millis(),
        request.iterations,
        request.threads,
    )))
}

/// Handler for telemetry analysis of an uploaded CSV file
///
/// # Arguments
///
/// * `state`: Shared application state
/// * `multipart`: Form with `telemetryFile`, `analysisType` and optionally `workers` and
///   `column` fields
#[tracing::instrument(skip_all)]
async fn telemetry_analysis(
    State(state): State<SharedAppState>,
    mut multipart: Multipart,
) -> Result<Json<TelemetryResponse>, PitwallError> {
    let mut file: Option<Bytes> = None;
    let mut _memory = Vec::new();
    let mut analysis: Option<AnalysisType> = None;
    let mut workers: Option<usize> = None;
    let mut column = DEFAULT_TELEMETRY_COLUMN;
    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("telemetryFile") => {
                let (bytes, permits) = read_upload(&mut field, &state.resource_manager).await?;
                file = Some(bytes);
                _memory = permits;
            }
            Some("analysisType") => {
                analysis = Some(parse_field("analysisType", &field.text().await?)?)
            }
            Some("workers") => workers = Some(parse_field("workers", &field.text().await?)?),
            Some("column") => column = parse_field("column", &field.text().await?)?,
            other => tracing::debug!("ignoring form field {:?}", other),
        }
    }
    let file = file.ok_or(PitwallError::MissingField {
        field: "telemetryFile",
    })?;
    let analysis = analysis.ok_or(PitwallError::MissingField {
        field: "analysisType",
    })?;
    let max_workers = state.args.max_workers;
    let workers = workers.unwrap_or_else(|| num_cpus::get().min(max_workers));
    check_workers("workers", workers, max_workers)?;

    let samples =
        tokio::task::spawn_blocking(move || telemetry::parse_samples(&file[..], column)).await??;
    let data_points = samples.len();
    let result = telemetry::analyse(
        &state.executor,
        Arc::new(samples),
        workers,
        analysis.into(),
        &CancellationToken::new(),
    )
    .await?;
    Ok(Json(TelemetryResponse {
        result,
        processors: workers,
        data_points,
    }))
}

/// Handler upgrading a request to a socket session
async fn ws(State(state): State<SharedAppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| socket_session(socket, state))
}

/// Serve a session over an upgraded socket.
///
/// Text frames are commands. Binary frames are read as UTF-8 text, and a close frame ends the
/// session.
async fn socket_session(socket: WebSocket, state: SharedAppState) {
    let (sender, receiver) = socket.split();
    let outbound =
        sender.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text))));
    let inbound = receiver
        .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            })
        });
    let session = Session::new(state.session_config.clone(), state.executor.clone());
    tracing::debug!(id = %session.id(), "socket upgraded");
    session.serve(inbound, outbound).await
}
