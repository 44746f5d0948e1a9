//! Simulated race runs streamed to socket sessions.
//!
//! Each run fans its work out over the [Executor], reports progress through the session's
//! event bus while it is still computing, and signs off with a summary and a `finished`
//! event. Simulated sector and lap times are drawn at random after a configurable pause.

use crate::command::{MpiParams, OpenMpParams, RunSpec, TelemetryParams};
use crate::error::PitwallError;
use crate::event_bus::EventSender;
use crate::events::{
    CarResult, Event, LapTime, MpiSummary, OpenMpSummary, Payload, TelemetrySummary, Topic,
};
use crate::executor::Executor;
use crate::metrics::RUNS_STARTED;
use crate::operation::Reduction;
use crate::partition::partition;
use crate::telemetry::synthetic_trace;

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;

/// Simulated sector time, in hundredths of a second
const SECTOR_HUNDREDTHS: Range<u32> = 1200..3500;
/// Simulated lap time, in hundredths of a second
const LAP_HUNDREDTHS: Range<u32> = 7500..9599;

/// Timing and randomness of simulated runs.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    /// Pause before each simulated sector time
    pub sector_delay: Duration,
    /// Pause before each simulated lap time
    pub lap_delay: Duration,
    /// Fixed seed for reproducible runs. Seeded from entropy if unset.
    pub seed: Option<u64>,
    /// Sector whose worker panics, in every lap of an MPI run
    #[cfg(test)]
    pub(crate) failing_sector: Option<usize>,
}

impl SimulationConfig {
    pub fn new(sector_delay: Duration, lap_delay: Duration, seed: Option<u64>) -> Self {
        Self {
            sector_delay,
            lap_delay,
            seed,
            #[cfg(test)]
            failing_sector: None,
        }
    }

    /// Random number generator for one independent stream of a run.
    fn rng(&self, stream: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(stream)),
            None => StdRng::from_entropy(),
        }
    }
}

/// Lifecycle of a run. A run only ever moves forwards through these states.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum RunState {
    Validating,
    Running,
    Summarizing,
    Finished,
}

impl RunState {
    /// Move to `next`, ignoring attempts to move backwards or stay put.
    pub fn advance(&mut self, next: RunState) {
        if next > *self {
            tracing::debug!(from = ?*self, to = ?next, "run state");
            *self = next;
        } else {
            tracing::warn!(from = ?*self, to = ?next, "ignoring backward run state transition");
        }
    }
}

/// Everything a run needs from its session.
#[derive(Clone, Debug)]
pub struct RunContext {
    pub executor: Arc<Executor>,
    pub events: EventSender,
    /// Cancelled when the session closes
    pub cancel: CancellationToken,
    pub config: SimulationConfig,
}

impl RunContext {
    async fn log(&self, topic: Topic, text: String) -> Result<(), PitwallError> {
        self.events.send(Event::log(topic, text)).await
    }
}

/// Execute a validated run to completion.
///
/// On success the run's last two events are its summary and `finished`. A failed run reports a
/// single error event before `finished`. If the session has gone away, the run stops without
/// emitting anything further.
#[tracing::instrument(name = "run", skip_all, fields(topic = %spec.topic()))]
pub async fn run(spec: RunSpec, ctx: RunContext) {
    let topic = spec.topic();
    let mut state = RunState::Validating;
    state.advance(RunState::Running);
    RUNS_STARTED.with_label_values(&[&topic.to_string()]).inc();

    let outcome = match spec {
        RunSpec::Mpi(params) => mpi(params, &ctx).await,
        RunSpec::OpenMp(params) => openmp(params, &ctx).await,
        RunSpec::Telemetry(params) => telemetry(params, &ctx).await,
    };

    state.advance(RunState::Summarizing);
    let reported = match outcome {
        Ok(payload) => ctx.events.send(Event::summary(topic, payload)).await,
        Err(err) if err.is_session_fatal() => {
            tracing::debug!("run abandoned: {}", err);
            return;
        }
        Err(err) => {
            tracing::warn!("run failed: {}", err.describe());
            ctx.events.send(Event::error(topic, &err)).await
        }
    };
    if reported.is_ok() && ctx.events.send(Event::finished(topic)).await.is_ok() {
        state.advance(RunState::Finished);
    }
}

async fn pause(delay: Duration, cancel: &CancellationToken) -> Result<(), PitwallError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PitwallError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

fn sample_time(rng: &mut StdRng, hundredths: Range<u32>) -> f64 {
    f64::from(rng.gen_range(hundredths)) / 100.0
}

/// One worker per sector, repeated for each lap. A lap's time is the sum of its sectors.
async fn mpi(params: MpiParams, ctx: &RunContext) -> Result<Payload, PitwallError> {
    let topic = Topic::Mpi;
    let MpiParams { sectors, laps } = params;
    ctx.log(
        topic,
        format!("Starting MPI simulation with {sectors} sectors over {laps} laps"),
    )
    .await?;

    let mut lap_times = Vec::new();
    for lap in 1..=laps {
        ctx.log(topic, format!("Lap {lap}")).await?;
        let events = ctx.events.clone();
        let config = ctx.config.clone();
        let sector_times = ctx
            .executor
            .map_async(
                (1..=sectors).collect(),
                &ctx.cancel,
                move |index, sector: usize, cancel| {
                    let events = events.clone();
                    let delay = config.sector_delay;
                    let mut rng = config.rng(((lap - 1) * sectors + index) as u64 + 1);
                    #[cfg(test)]
                    let failing = config.failing_sector == Some(sector);
                    async move {
                        pause(delay, &cancel).await?;
                        #[cfg(test)]
                        if failing {
                            panic!("sector {sector} lost telemetry");
                        }
                        let time = sample_time(&mut rng, SECTOR_HUNDREDTHS);
                        events
                            .send(Event::log(
                                topic,
                                format!("Lap {lap}, sector {sector}: {time:.2} s"),
                            ))
                            .await?;
                        Ok(time)
                    }
                },
            )
            .await?;
        // Normalised by a single lap, so this is the plain sum of sector times.
        let time = Reduction::SumNormalize.combine(&sector_times, 1)?;
        ctx.log(topic, format!("Lap {lap}: {time:.2} s")).await?;
        lap_times.push(LapTime { lap, time });
    }

    let best_lap = lap_times
        .iter()
        .copied()
        .min_by(|a, b| a.time.total_cmp(&b.time));
    if let Some(best) = best_lap {
        ctx.log(
            topic,
            format!("Best lap: lap {} in {:.2} s", best.lap, best.time),
        )
        .await?;
    }
    Ok(MpiSummary {
        message: "MPI simulation finished".to_string(),
        laps: lap_times,
        best_lap,
    }
    .into())
}

/// One worker per car, each running every lap. The overall best is the minimum of the cars'
/// bests.
async fn openmp(params: OpenMpParams, ctx: &RunContext) -> Result<Payload, PitwallError> {
    let topic = Topic::OpenMp;
    let OpenMpParams { cars, laps } = params;
    ctx.log(
        topic,
        format!("Starting OpenMP simulation with {cars} cars over {laps} laps"),
    )
    .await?;

    let events = ctx.events.clone();
    let config = ctx.config.clone();
    let best_per_car = ctx
        .executor
        .map_async(
            (1..=cars).collect(),
            &ctx.cancel,
            move |_, car_id: usize, cancel| {
                let events = events.clone();
                let delay = config.lap_delay;
                let mut rng = config.rng(car_id as u64);
                async move {
                    let mut times = Vec::new();
                    let mut best_lap = f64::INFINITY;
                    for lap in 1..=laps {
                        pause(delay, &cancel).await?;
                        let time = sample_time(&mut rng, LAP_HUNDREDTHS);
                        times.push(time);
                        events
                            .send(Event::log(
                                topic,
                                format!("Car {car_id}, lap {lap}: {time:.2} s"),
                            ))
                            .await?;
                        if time < best_lap {
                            best_lap = time;
                            events
                                .send(Event::log(
                                    topic,
                                    format!("Car {car_id}: new best lap {time:.2} s"),
                                ))
                                .await?;
                        }
                    }
                    Ok(CarResult {
                        car_id,
                        best_lap,
                        laps: times,
                    })
                }
            },
        )
        .await?;

    let bests = best_per_car
        .iter()
        .map(|car| car.best_lap)
        .collect::<Vec<f64>>();
    let overall = Reduction::Min.combine(&bests, bests.len())?;
    let best_overall = best_per_car
        .iter()
        .find(|car| car.best_lap == overall)
        .cloned();
    if let Some(best) = &best_overall {
        ctx.log(
            topic,
            format!("Fastest lap: car {} in {:.2} s", best.car_id, best.best_lap),
        )
        .await?;
    }
    Ok(OpenMpSummary {
        best_per_car,
        best_overall,
    }
    .into())
}

/// Analyse a synthetic speed trace, reporting each chunk's partial as it is computed.
async fn telemetry(params: TelemetryParams, ctx: &RunContext) -> Result<Payload, PitwallError> {
    let topic = Topic::Telemetry;
    let TelemetryParams {
        samples,
        workers,
        analysis,
    } = params;
    ctx.log(
        topic,
        format!("Starting telemetry analysis ({analysis}) of {samples} samples with {workers} workers"),
    )
    .await?;

    let trace = Arc::new(synthetic_trace(&mut ctx.config.rng(0), samples));
    let reduction = Reduction::from(analysis);
    let chunks = partition(trace.len(), workers)?;
    let events = ctx.events.clone();
    let data = trace.clone();
    let partials = ctx
        .executor
        .map_blocking(chunks, &ctx.cancel, move |index, range: Range<usize>| {
            let len = range.len();
            let partial = reduction.fold_chunk(&data[range]);
            // A closed session surfaces as cancellation in the fan-in.
            let _ = events.blocking_send(Event::log(
                topic,
                format!("Chunk {index}: {len} samples, {analysis} {partial:.2}"),
            ));
            partial
        })
        .await?;
    let result = reduction.combine(&partials, trace.len())?;
    ctx.log(topic, format!("Result ({analysis}): {result:.2}"))
        .await?;

    Ok(TelemetrySummary {
        analysis,
        result,
        workers,
        samples,
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::event_bus;
    use crate::models::AnalysisType;
    use crate::test_utils;

    use futures::channel::mpsc as futures_mpsc;
    use futures::StreamExt;

    /// Run to completion and return every event it produced.
    async fn collect(spec: RunSpec, cancel: CancellationToken) -> Vec<Event> {
        let (events, receiver) = event_bus::channel(100, cancel.clone());
        let (sink, stream) = futures_mpsc::unbounded();
        let forwarder = tokio::spawn(receiver.forward(sink));
        let ctx = RunContext {
            executor: test_utils::get_test_executor(),
            events,
            cancel,
            config: test_utils::get_test_simulation_config(),
        };
        run(spec, ctx).await;
        forwarder.await.unwrap();
        stream
            .map(|text: String| serde_json::from_str::<Event>(&text).unwrap())
            .collect()
            .await
    }

    fn texts(events: &[Event]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match event {
                Event::Log { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn run_state_only_moves_forward() {
        let mut state = RunState::Validating;
        state.advance(RunState::Running);
        assert_eq!(RunState::Running, state);
        state.advance(RunState::Finished);
        state.advance(RunState::Running);
        assert_eq!(RunState::Finished, state);
    }

    #[test]
    fn seeded_streams_differ() {
        let config = test_utils::get_test_simulation_config();
        let a = sample_time(&mut config.rng(1), SECTOR_HUNDREDTHS);
        let b = sample_time(&mut config.rng(1), SECTOR_HUNDREDTHS);
        assert_eq!(a, b);
        let laps = (0..20)
            .map(|stream| sample_time(&mut config.rng(stream), LAP_HUNDREDTHS))
            .collect::<Vec<_>>();
        assert!(laps.iter().any(|time| *time != laps[0]));
        assert!(laps.iter().all(|time| (75.0..95.99).contains(time)));
    }

    #[tokio::test]
    async fn mpi_run() {
        let spec = RunSpec::Mpi(MpiParams {
            sectors: 3,
            laps: 2,
        });
        let events = collect(spec, CancellationToken::new()).await;
        assert!(events.iter().all(|event| event.topic() == Topic::Mpi));

        let texts = texts(&events);
        assert_eq!(
            "Starting MPI simulation with 3 sectors over 2 laps",
            texts[0]
        );
        assert_eq!(6, texts.iter().filter(|text| text.contains(", sector ")).count());

        let n = events.len();
        assert_eq!(Event::finished(Topic::Mpi), events[n - 1]);
        match &events[n - 2] {
            Event::Summary {
                payload: Payload::Mpi(summary),
                ..
            } => {
                assert_eq!(2, summary.laps.len());
                for (index, lap) in summary.laps.iter().enumerate() {
                    assert_eq!(index + 1, lap.lap);
                    assert!((36.0..105.0).contains(&lap.time));
                }
                let best = summary.best_lap.unwrap();
                assert!(summary.laps.iter().all(|lap| best.time <= lap.time));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn mpi_lap_time_is_sum_of_sectors() {
        let spec = RunSpec::Mpi(MpiParams {
            sectors: 4,
            laps: 1,
        });
        let events = collect(spec, CancellationToken::new()).await;
        let sum: f64 = texts(&events)
            .iter()
            .filter(|text| text.contains(", sector "))
            .map(|text| {
                let time = text.rsplit(": ").next().unwrap();
                time.trim_end_matches(" s").parse::<f64>().unwrap()
            })
            .sum();
        let lap = events
            .iter()
            .find_map(|event| match event {
                Event::Summary {
                    payload: Payload::Mpi(summary),
                    ..
                } => Some(summary.laps[0].time),
                _ => None,
            })
            .unwrap();
        assert!((sum - lap).abs() < 1e-9);
    }

    #[tokio::test]
    async fn openmp_run() {
        let spec = RunSpec::OpenMp(OpenMpParams { cars: 3, laps: 4 });
        let events = collect(spec, CancellationToken::new()).await;
        assert_eq!(Event::finished(Topic::OpenMp), *events.last().unwrap());

        let summary = events
            .iter()
            .find_map(|event| match event {
                Event::Summary {
                    payload: Payload::OpenMp(summary),
                    ..
                } => Some(summary.clone()),
                _ => None,
            })
            .unwrap();
        let ids = summary
            .best_per_car
            .iter()
            .map(|car| car.car_id)
            .collect::<Vec<_>>();
        assert_eq!(vec![1, 2, 3], ids);
        for car in &summary.best_per_car {
            assert_eq!(4, car.laps.len());
            let best = car.laps.iter().copied().fold(f64::INFINITY, f64::min);
            assert_eq!(best, car.best_lap);
        }
        let overall = summary.best_overall.unwrap();
        assert!(summary
            .best_per_car
            .iter()
            .all(|car| overall.best_lap <= car.best_lap));

        // Each car's laps are reported in order.
        let texts = texts(&events);
        for car_id in 1..=3 {
            let prefix = format!("Car {car_id}, lap ");
            let laps = texts
                .iter()
                .filter_map(|text| text.strip_prefix(prefix.as_str()))
                .map(|rest| rest.split(':').next().unwrap().parse::<usize>().unwrap())
                .collect::<Vec<_>>();
            assert_eq!(vec![1, 2, 3, 4], laps);
        }
    }

    #[tokio::test]
    async fn telemetry_run() {
        let spec = RunSpec::Telemetry(TelemetryParams {
            samples: 100,
            workers: 4,
            analysis: AnalysisType::Max,
        });
        let events = collect(spec, CancellationToken::new()).await;

        let config = test_utils::get_test_simulation_config();
        let expected = synthetic_trace(&mut config.rng(0), 100)
            .into_iter()
            .fold(f64::NEG_INFINITY, f64::max);
        let n = events.len();
        assert_eq!(
            Event::summary(
                Topic::Telemetry,
                TelemetrySummary {
                    analysis: AnalysisType::Max,
                    result: expected,
                    workers: 4,
                    samples: 100,
                }
            ),
            events[n - 2]
        );
        assert_eq!(Event::finished(Topic::Telemetry), events[n - 1]);
        assert_eq!(
            4,
            texts(&events)
                .iter()
                .filter(|text| text.starts_with("Chunk "))
                .count()
        );
    }

    #[tokio::test]
    async fn failed_chunk_fails_run() {
        let (events, receiver) = event_bus::channel(100, CancellationToken::new());
        let (sink, stream) = futures_mpsc::unbounded();
        let forwarder = tokio::spawn(receiver.forward(sink));
        let mut config = test_utils::get_test_simulation_config();
        config.failing_sector = Some(2);
        let ctx = RunContext {
            executor: test_utils::get_test_executor(),
            events,
            cancel: CancellationToken::new(),
            config,
        };
        let spec = RunSpec::Mpi(MpiParams {
            sectors: 3,
            laps: 2,
        });
        run(spec, ctx).await;
        forwarder.await.unwrap();
        let events = stream
            .map(|text: String| serde_json::from_str::<Event>(&text).unwrap())
            .collect::<Vec<_>>()
            .await;

        let n = events.len();
        assert_eq!(
            Event::log(Topic::Mpi, "Error: chunk 1 failed: sector 2 lost telemetry"),
            events[n - 2]
        );
        assert_eq!(Event::finished(Topic::Mpi), events[n - 1]);
        let texts = texts(&events);
        assert_eq!(1, texts.iter().filter(|text| text.starts_with("Error")).count());
        assert!(!texts.contains(&"Lap 2"));
        assert!(events
            .iter()
            .all(|event| !matches!(event, Event::Summary { .. })));
    }

    #[tokio::test]
    async fn closed_session_emits_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let spec = RunSpec::OpenMp(OpenMpParams { cars: 2, laps: 2 });
        let events = collect(spec, cancel).await;
        assert!(events.is_empty());
    }
}
