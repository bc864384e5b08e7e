//! Error types for the highlander-agents crate.
//!
//! All operations that can fail return typed errors rather than panicking.
//! Sink failures are kept separate from [`AgentError`] because the combat
//! loop logs and discards them instead of propagating.

/// Errors that can occur while creating or managing immortals.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The id sequence cannot hand out any more identifiers.
    #[error("immortal id sequence exhausted")]
    IdExhausted,

    /// An immortal was created with a parameter outside its valid range.
    #[error("invalid immortal parameter: {reason}")]
    InvalidParameter {
        /// Description of what is wrong with the parameter.
        reason: String,
    },

    /// An immortal with this id is already registered.
    #[error("duplicate immortal id: {0}")]
    DuplicateId(crate::ids::ImmortalId),
}

/// Errors a [`ReportSink`](crate::report::ReportSink) can return.
///
/// The combat protocol treats every variant as best-effort: it logs the
/// failure at `warn` and carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink's buffer is full and the report was dropped.
    #[error("report sink is full, report dropped")]
    Full,

    /// The receiving side of the sink has gone away.
    #[error("report sink is closed")]
    Closed,

    /// Any other sink-specific failure.
    #[error("report sink unavailable: {0}")]
    Unavailable(String),
}
