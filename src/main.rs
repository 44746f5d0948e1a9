//! This file defines the pitwall binary entry point.

use pitwall::app;
use pitwall::cli;
use pitwall::metrics;
use pitwall::server;
use pitwall::tracing;

/// Application entry point
#[tokio::main]
async fn main() {
    let args = cli::parse();
    tracing::init_tracing();
    ::tracing::debug!("{:?}", args);
    metrics::register_metrics();
    app::init(&args);
    let service = app::service(&args);
    server::serve(&args, service).await;
}
