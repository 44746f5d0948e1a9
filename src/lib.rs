//! This crate provides Pitwall, a server for chunked parallel reductions with streamed progress.
//!
//! A unit of work (a range of integration intervals, or a sequence of telemetry samples) is
//! [partitioned](partition) into contiguous chunks. The [executor] runs one task per chunk and
//! collects their partial results in chunk order, and a [reduction](operation::Reduction)
//! combines them into a single value.
//!
//! The same engine drives two kinds of interface:
//!
//! * A synchronous HTTP API, which estimates pi by numerical [integration] and analyses
//!   uploaded [telemetry] files.
//! * Socket [sessions](session), where clients start simulated race runs and receive a stream
//!   of [progress events](events) through a bounded [event bus](event_bus) while the runs are
//!   still computing.
//!
//! Pitwall is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Axum](axum) web framework, built by the Tokio team, which also handles the socket
//!   upgrade.
//! * [Serde](serde) performs (de)serialisation of JSON request, command and event data.
//! * [Rayon](rayon) optionally runs CPU-bound chunks on a work-stealing thread pool.

pub mod app;
pub mod app_state;
pub mod cli;
pub mod command;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod executor;
pub mod integration;
pub mod metrics;
pub mod models;
pub mod operation;
pub mod operations;
pub mod partition;
pub mod resource_manager;
pub mod server;
pub mod session;
pub mod simulation;
pub mod telemetry;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod validated_json;
