//! Fan-out/fan-in execution of per-chunk work.
//!
//! Every chunk runs as its own concurrent task. Outcomes are sent back over a bounded channel
//! tagged with their chunk index, and the fan-in writes each one into the slot for that index.
//! The caller only sees the collected results once every chunk has reported, so the returned
//! order always matches chunk order regardless of which chunk finished first.

use crate::error::PitwallError;
use crate::metrics::CHUNK_FAILURES;
use crate::resource_manager::ResourceManager;

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Outcome of a single chunk, tagged with its index.
type ChunkOutcome<R> = (usize, Result<R, PitwallError>);

/// Executes one task per chunk and joins on all of them.
#[derive(Debug)]
pub struct Executor {
    /// Whether CPU-bound chunks run on the Rayon pool rather than Tokio's blocking pool.
    use_rayon: bool,

    /// Resource manager limiting concurrent CPU-bound chunks.
    resource_manager: Arc<ResourceManager>,
}

impl Executor {
    /// Returns a new Executor.
    pub fn new(use_rayon: bool, resource_manager: Arc<ResourceManager>) -> Self {
        Self {
            use_rayon,
            resource_manager,
        }
    }

    /// Run a CPU-bound function over each chunk in parallel.
    ///
    /// Returns the per-chunk results ordered by chunk index. If any chunk panics, the whole
    /// fan-out fails with [PitwallError::ChunkPanicked] and the other results are discarded.
    ///
    /// # Arguments
    ///
    /// * `inputs`: One input per chunk
    /// * `cancel`: Cancellation token of the owning run
    /// * `f`: Function computing a chunk's partial result from its index and input
    #[tracing::instrument(level = "DEBUG", skip_all, fields(chunks = inputs.len()))]
    pub async fn map_blocking<I, R, F>(
        &self,
        inputs: Vec<I>,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<Vec<R>, PitwallError>
    where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, I) -> R + Send + Sync + 'static,
    {
        let expected = inputs.len();
        let (tx, rx) = mpsc::channel(expected.max(1));
        let f = Arc::new(f);
        // Chunks that have not started yet are skipped once the fan-in gives up.
        let abandon = cancel.child_token();
        let _guard = abandon.clone().drop_guard();

        for (index, input) in inputs.into_iter().enumerate() {
            let tx = tx.clone();
            let f = f.clone();
            let abandon = abandon.clone();
            let use_rayon = self.use_rayon;
            let resource_manager = self.resource_manager.clone();
            tokio::spawn(
                async move {
                    let permit = tokio::select! {
                        _ = abandon.cancelled() => Err(PitwallError::Cancelled),
                        permit = resource_manager.task() => permit,
                    };
                    let outcome = match permit {
                        Ok(permit) => {
                            let work = move || {
                                let _permit = permit;
                                catch_chunk(index, || f(index, input))
                            };
                            if use_rayon {
                                tokio_rayon::spawn(work).await
                            } else {
                                tokio::task::spawn_blocking(work)
                                    .await
                                    .unwrap_or_else(|err| Err(err.into()))
                            }
                        }
                        Err(err) => Err(err),
                    };
                    // The receiver is gone if the fan-in already failed or was cancelled.
                    let _ = tx.send((index, outcome)).await;
                }
                .in_current_span(),
            );
        }
        drop(tx);

        fan_in(rx, expected, cancel, &abandon).await
    }

    /// Run an asynchronous function over each chunk concurrently.
    ///
    /// Used for chunks which spend their time waiting (simulated latency, or backpressure from
    /// the event bus) rather than computing. Each chunk receives a cancellation token that fires
    /// when the run is cancelled or when another chunk has failed.
    ///
    /// # Arguments
    ///
    /// * `inputs`: One input per chunk
    /// * `cancel`: Cancellation token of the owning run
    /// * `f`: Function returning a future that computes a chunk's partial result
    #[tracing::instrument(level = "DEBUG", skip_all, fields(chunks = inputs.len()))]
    pub async fn map_async<I, R, F, Fut>(
        &self,
        inputs: Vec<I>,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<Vec<R>, PitwallError>
    where
        I: Send + 'static,
        R: Send + 'static,
        F: Fn(usize, I, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, PitwallError>> + Send + 'static,
    {
        let expected = inputs.len();
        let (tx, rx) = mpsc::channel(expected.max(1));
        let f = Arc::new(f);
        let abandon = cancel.child_token();
        let _guard = abandon.clone().drop_guard();

        for (index, input) in inputs.into_iter().enumerate() {
            let tx = tx.clone();
            let f = f.clone();
            let token = abandon.clone();
            tokio::spawn(
                async move {
                    let outcome = AssertUnwindSafe(async move { f(index, input, token).await })
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|payload| Err(chunk_panicked(index, payload)));
                    let _ = tx.send((index, outcome)).await;
                }
                .in_current_span(),
            );
        }
        drop(tx);

        fan_in(rx, expected, cancel, &abandon).await
    }
}

/// Run a chunk's computation, converting a panic into an error for that chunk.
fn catch_chunk<R>(index: usize, work: impl FnOnce() -> R) -> Result<R, PitwallError> {
    panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| chunk_panicked(index, payload))
}

fn chunk_panicked(index: usize, payload: Box<dyn Any + Send>) -> PitwallError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    };
    CHUNK_FAILURES.inc();
    tracing::warn!(index, %message, "chunk panicked");
    PitwallError::ChunkPanicked { index, message }
}

/// Wait until every chunk has reported, then return the results in chunk order.
///
/// The first chunk error abandons the remaining chunks, but is only returned once they have all
/// reported, so nothing a chunk does can outlive the failed fan-in. Returns early with
/// [PitwallError::Cancelled] if the run is cancelled.
async fn fan_in<R>(
    mut rx: mpsc::Receiver<ChunkOutcome<R>>,
    expected: usize,
    cancel: &CancellationToken,
    abandon: &CancellationToken,
) -> Result<Vec<R>, PitwallError> {
    // Written once per index, read only after every chunk has reported.
    let mut slots: Vec<Option<R>> = (0..expected).map(|_| None).collect();
    let mut failure = None;
    let mut received = 0;
    while received < expected {
        let (index, outcome) = tokio::select! {
            _ = cancel.cancelled() => return Err(PitwallError::Cancelled),
            message = rx.recv() => match message {
                Some(message) => message,
                None => return Err(PitwallError::FanInIncomplete { received, expected }),
            },
        };
        received += 1;
        match outcome {
            Ok(result) => slots[index] = Some(result),
            Err(err) => {
                if failure.is_none() {
                    abandon.cancel();
                    failure = Some(err);
                }
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(slots.into_iter().flatten().collect()),
    }
}
