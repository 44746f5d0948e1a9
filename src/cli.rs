//! Command Line Interface (CLI) arguments.

use clap::Parser;

/// Pitwall command line interface
#[derive(Clone, Debug, Parser)]
pub struct CommandLineArgs {
    /// The IP address on which the server should listen
    #[arg(long, default_value = "0.0.0.0", env = "PITWALL_HOST")]
    pub host: String,
    /// The port to which the server should bind
    #[arg(long, default_value_t = 8080, env = "PITWALL_PORT")]
    pub port: u16,
    /// Flag indicating whether HTTPS should be used
    #[arg(long, default_value_t = false, env = "PITWALL_HTTPS")]
    pub https: bool,
    /// Path to the certificate file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/pitwall/certs/cert.pem",
        env = "PITWALL_CERT_FILE"
    )]
    pub cert_file: String,
    /// Path to the key file to be used for HTTPS encryption
    #[arg(
        long,
        default_value = "~/.config/pitwall/certs/key.pem",
        env = "PITWALL_KEY_FILE"
    )]
    pub key_file: String,
    /// Maximum time in seconds to wait for operations to complete upon receiving `ctrl+c` signal.
    #[arg(long, default_value_t = 60, env = "PITWALL_SHUTDOWN_TIMEOUT")]
    pub graceful_shutdown_timeout: u64,
    /// Whether to use Rayon for execution of CPU-bound chunks.
    #[arg(long, default_value_t = false, env = "PITWALL_USE_RAYON")]
    pub use_rayon: bool,
    /// Maximum number of CPU-bound chunks running at once.
    /// Defaults to one less than the number of CPUs.
    #[arg(long, env = "PITWALL_THREAD_LIMIT")]
    pub thread_limit: Option<usize>,
    /// Maximum number of bytes of uploaded telemetry held in memory at once.
    #[arg(long, env = "PITWALL_MEMORY_LIMIT")]
    pub memory_limit: Option<usize>,
    /// Number of progress events buffered per socket session before runs are throttled.
    #[arg(long, default_value_t = 100, env = "PITWALL_EVENT_BUFFER_SIZE")]
    pub event_buffer_size: usize,
    /// Largest number of chunks (threads, workers, sectors or cars) a request may ask for.
    #[arg(long, default_value_t = 256, env = "PITWALL_MAX_WORKERS")]
    pub max_workers: usize,
    /// Largest synthetic telemetry trace a socket run may ask for.
    #[arg(long, default_value_t = 1_000_000, env = "PITWALL_MAX_SAMPLES")]
    pub max_samples: usize,
    /// Largest number of laps a socket run may ask for.
    #[arg(long, default_value_t = 1000, env = "PITWALL_MAX_LAPS")]
    pub max_laps: usize,
    /// Simulated time in milliseconds taken by each sector of an MPI run.
    #[arg(long, default_value_t = 300, env = "PITWALL_SECTOR_DELAY_MS")]
    pub sector_delay_ms: u64,
    /// Simulated time in milliseconds taken by each lap of an OpenMP run.
    #[arg(long, default_value_t = 200, env = "PITWALL_LAP_DELAY_MS")]
    pub lap_delay_ms: u64,
    /// Seed for simulated race times. Random if unset.
    #[arg(long, env = "PITWALL_SEED")]
    pub seed: Option<u64>,
}

/// Returns parsed command line arguments.
pub fn parse() -> CommandLineArgs {
    CommandLineArgs::parse()
}
