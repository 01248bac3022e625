//! Centralized logging configuration for sparse-linear-solver binaries and benchmarks
//!
//! This module provides a consistent logging setup with custom formatting
//! and default INFO level across all executables.

use tracing::Level;

/// Initialize the tracing subscriber with the crate's standard configuration
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// Format includes:
/// - Timestamp (RFC 3339, system clock)
/// - Log level (INFO, WARN, ERROR, DEBUG, TRACE)
/// - Module/target path
/// - Thread id
///
/// File names and line numbers are not printed.
///
/// # Example
/// ```no_run
/// use sparse_linear_solver::init_logger;
///
/// fn main() {
///     init_logger();
///     tracing::info!("Solving chain");
/// }
/// ```
///
/// # Environment Variables
/// Override the default log level using `RUST_LOG`:
/// ```bash
/// RUST_LOG=debug cargo run --bin solve_chain
/// RUST_LOG=sparse_linear_solver::linalg=trace cargo run --bin solve_chain
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling this more than once keeps the first subscriber.
///
/// # Arguments
/// * `default_level` - The default log level (overrideable via RUST_LOG)
///
/// # Example
/// ```no_run
/// use sparse_linear_solver::init_logger_with_level;
/// use tracing::Level;
///
/// fn main() {
///     init_logger_with_level(Level::DEBUG);
///     tracing::debug!("Assembly details enabled");
/// }
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        // assembly runs on the rayon pool
        .with_thread_ids(true)
        .with_thread_names(false)
        .try_init()
        .ok();
}
