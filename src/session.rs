//! Socket sessions: the command loop and the lifetime of the runs it starts.
//!
//! A session reads commands from its inbound stream and starts each valid one as an independent
//! run, returning to the stream straight away. All runs share the session's event bus, whose
//! single forwarder owns the outbound sink. When the inbound stream ends the session cancels its
//! runs, waits for them to stop, and lets the forwarder flush and close the sink.

use crate::command::{Command, RunLimits};
use crate::event_bus::{self, EventSender};
use crate::events::{Event, Topic};
use crate::executor::Executor;
use crate::metrics::ACTIVE_SESSIONS;
use crate::simulation::{self, RunContext, SimulationConfig};

use std::fmt::Display;
use std::sync::Arc;

use futures::{Sink, Stream, StreamExt};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Per-session settings.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Number of events buffered before producers block
    pub event_buffer_size: usize,
    pub limits: RunLimits,
    pub simulation: SimulationConfig,
}

/// A single client connection.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    config: SessionConfig,
    executor: Arc<Executor>,
}

impl Session {
    pub fn new(config: SessionConfig, executor: Arc<Executor>) -> Self {
        Self {
            id: Uuid::new_v4(),
            config,
            executor,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Run the command loop until `inbound` ends or fails.
    ///
    /// # Arguments
    ///
    /// * `inbound`: Text frames received from the client
    /// * `outbound`: Sink for serialised events, owned by the session's forwarder
    pub async fn serve<I, E, O>(self, inbound: I, outbound: O)
    where
        I: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
        O: Sink<String> + Unpin + Send + 'static,
        O::Error: Display + Send,
    {
        let span = tracing::info_span!("session", id = %self.id);
        self.command_loop(inbound, outbound).instrument(span).await
    }

    async fn command_loop<I, E, O>(self, mut inbound: I, outbound: O)
    where
        I: Stream<Item = Result<String, E>> + Unpin + Send,
        E: Display + Send,
        O: Sink<String> + Unpin + Send + 'static,
        O::Error: Display + Send,
    {
        tracing::info!("session opened");
        ACTIVE_SESSIONS.inc();
        let cancel = CancellationToken::new();
        let (events, receiver) = event_bus::channel(self.config.event_buffer_size, cancel.clone());
        let forwarder = tokio::spawn(receiver.forward(outbound).in_current_span());
        let mut runs = JoinSet::new();

        loop {
            tokio::select! {
                message = inbound.next() => match message {
                    Some(Ok(text)) => self.dispatch(&text, &events, &cancel, &mut runs).await,
                    Some(Err(err)) => {
                        tracing::warn!("failed to read from session: {}", err);
                        break;
                    }
                    None => break,
                },
                Some(joined) = runs.join_next(), if !runs.is_empty() => {
                    if let Err(err) = joined {
                        tracing::error!("run task failed: {}", err);
                    }
                }
            }
        }

        cancel.cancel();
        drop(events);
        while let Some(joined) = runs.join_next().await {
            if let Err(err) = joined {
                tracing::error!("run task failed: {}", err);
            }
        }
        match forwarder.await {
            Ok(stats) => tracing::info!(
                delivered = stats.delivered,
                dropped = stats.dropped,
                "session closed"
            ),
            Err(err) => tracing::error!("event forwarder failed: {}", err),
        }
        ACTIVE_SESSIONS.dec();
    }

    /// Handle one inbound frame without waiting for any run it starts.
    async fn dispatch(
        &self,
        text: &str,
        events: &EventSender,
        cancel: &CancellationToken,
        runs: &mut JoinSet<()>,
    ) {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!("malformed command: {}", err.describe());
                let _ = events.send(Event::log(Topic::None, err.describe())).await;
                return;
            }
        };
        let topic = command.topic();
        match command.validate(&self.config.limits) {
            Ok(spec) => {
                tracing::info!(?spec, "starting run");
                let ctx = RunContext {
                    executor: self.executor.clone(),
                    events: events.clone(),
                    cancel: cancel.child_token(),
                    config: self.config.simulation.clone(),
                };
                runs.spawn(simulation::run(spec, ctx).in_current_span());
            }
            Err(err) => {
                tracing::info!(%topic, "rejected command: {}", err);
                if events.send(Event::error(topic, &err)).await.is_ok() {
                    let _ = events.send(Event::finished(topic)).await;
                }
            }
        }
    }
}
