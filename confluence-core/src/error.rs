//! Engine errors

use thiserror::Error;

use crate::graph::NodeId;

/// Engine result type
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The API was called in a way it does not support.
    Usage,
    /// A user callback failed while a transaction was propagating.
    Propagation,
    /// The graph reached a state the scheduler cannot order.
    GraphInvariant,
}

/// Engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("event loop {node} is already bound")]
    LoopAlreadyBound { node: NodeId },

    #[error("event loop {node} was not bound before its transaction closed")]
    LoopUnbound { node: NodeId },

    #[error("{operation} requires an active transaction")]
    NoTransaction { operation: &'static str },

    #[error("behavior loop sampled before it was bound")]
    LoopSampledBeforeBind,

    #[error("invalid configuration value for {key}: {value:?}")]
    InvalidConfig { key: &'static str, value: String },

    #[error("propagation failed: {message}")]
    Propagation { message: String },

    #[error("linking {from} -> {to} closes a cycle with no deferred binding")]
    Cycle { from: NodeId, to: NodeId },

    #[error("transaction exceeded {limit} node firings")]
    RunawayPropagation { limit: usize },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::LoopAlreadyBound { .. }
            | Error::LoopUnbound { .. }
            | Error::NoTransaction { .. }
            | Error::LoopSampledBeforeBind
            | Error::InvalidConfig { .. } => ErrorKind::Usage,
            Error::Propagation { .. } => ErrorKind::Propagation,
            Error::Cycle { .. } | Error::RunawayPropagation { .. } => ErrorKind::GraphInvariant,
        }
    }
}
