use crate::cli::CommandLineArgs;
use crate::command::RunLimits;
use crate::executor::Executor;
use crate::resource_manager::ResourceManager;
use crate::session::SessionConfig;
use crate::simulation::SimulationConfig;

use std::sync::Arc;
use std::time::Duration;

/// Shared application state passed to each request handler.
pub struct AppState {
    /// Command line arguments.
    pub args: CommandLineArgs,

    /// Resource manager.
    pub resource_manager: Arc<ResourceManager>,

    /// Executor for chunked computations.
    pub executor: Arc<Executor>,

    /// Settings for each socket session.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Create and return an [AppState].
    pub fn new(args: &CommandLineArgs) -> Self {
        let task_limit = args
            .thread_limit
            .or_else(|| Some(num_cpus::get().saturating_sub(1).max(1)));
        let resource_manager = Arc::new(ResourceManager::new(args.memory_limit, task_limit));
        let executor = Arc::new(Executor::new(args.use_rayon, resource_manager.clone()));
        let session_config = SessionConfig {
            event_buffer_size: args.event_buffer_size,
            limits: RunLimits {
                max_workers: args.max_workers,
                max_samples: args.max_samples,
                max_laps: args.max_laps,
            },
            simulation: SimulationConfig::new(
                Duration::from_millis(args.sector_delay_ms),
                Duration::from_millis(args.lap_delay_ms),
                args.seed,
            ),
        };

        Self {
            args: args.clone(),
            resource_manager,
            executor,
            session_config,
        }
    }
}

/// AppState wrapped in an Atomic Reference Count (Arc) to allow multiple references.
pub type SharedAppState = Arc<AppState>;
