use crate::cli::CommandLineArgs;
use crate::command::RunLimits;
use crate::executor::Executor;
use crate::resource_manager::ResourceManager;
use crate::session::SessionConfig;
use crate::simulation::SimulationConfig;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

/// Create an Executor using Tokio's blocking pool with no resource limits.
pub(crate) fn get_test_executor() -> Arc<Executor> {
    Arc::new(Executor::new(
        false,
        Arc::new(ResourceManager::new(None, None)),
    ))
}

/// Simulation settings with no delays and a fixed seed.
pub(crate) fn get_test_simulation_config() -> SimulationConfig {
    SimulationConfig::new(Duration::ZERO, Duration::ZERO, Some(42))
}

pub(crate) fn get_test_session_config() -> SessionConfig {
    SessionConfig {
        event_buffer_size: 100,
        limits: RunLimits {
            max_workers: 16,
            max_samples: 10_000,
            max_laps: 100,
        },
        simulation: get_test_simulation_config(),
    }
}

/// Command line arguments as parsed with no flags, apart from those given.
pub(crate) fn get_test_args(extra: &[&str]) -> CommandLineArgs {
    let args = std::iter::once("pitwall").chain(extra.iter().copied());
    CommandLineArgs::parse_from(args)
}
