//! Error types for the engine binary.
//!
//! [`EngineError`] wraps every failure mode of startup and the run, so
//! `main` can propagate with `?`.

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading or validation failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: highlander_core::ConfigError,
    },

    /// The population could not be created or started.
    #[error("controller error: {source}")]
    Controller {
        /// The underlying controller error.
        #[from]
        source: highlander_core::ControllerError,
    },

    /// The run failed.
    #[error("runner error: {source}")]
    Runner {
        /// The underlying runner error.
        #[from]
        source: highlander_core::RunnerError,
    },

    /// The run report could not be serialized.
    #[error("report serialization error: {source}")]
    Report {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}
