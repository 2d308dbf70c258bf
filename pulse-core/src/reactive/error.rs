//! Errors raised by the reactive core.

use thiserror::Error;

use super::subscriber::{ChannelId, SubscriberId};

/// Result alias used throughout the reactive core.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Failures reported by signals, effects, and the batch scheduler.
///
/// Errors returned by effect bodies are passed through unchanged, so a caller
/// of [`Signal::set`](super::Signal::set) sees exactly what the failing
/// computation returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A signal was created or written with no value.
    #[error("signal {channel} cannot hold an absent value")]
    InvalidValue { channel: ChannelId },

    /// External code tried to write a derived signal.
    #[error("derived signal {channel} is read-only")]
    DerivedMutation { channel: ChannelId },

    /// An effect was triggered again while its own run was still in progress.
    #[error("cyclic dependency: effect {subscriber} re-triggered itself")]
    CyclicDependency { subscriber: SubscriberId },

    /// The tracking stack grew past the configured limit.
    #[error("reactive propagation exceeded depth {limit} (reached {depth})")]
    DepthExceeded { depth: usize, limit: usize },
}
