//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, derived signals,
//! effects, and batching. These primitives form the foundation of Pulse's
//! fine-grained reactivity.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. Reading a signal inside an
//! effect makes the effect depend on it. Writing a different value notifies
//! direct subscribers and re-runs dependent effects.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs immediately and then
//! again whenever a signal it read during its last run changes. Effects are
//! used to synchronize reactive state with external systems.
//!
//! ## Derived Signals
//!
//! A Derived signal is a read-only signal kept current by an owned effect.
//!
//! ## Batching
//!
//! [`batch`] groups writes so each touched signal notifies once, with its
//! final value, when the outermost batch ends.
//!
//! # Implementation Notes
//!
//! Delivery goes through the [`Dispatcher`], a keyed publish/subscribe table
//! with one channel per signal. Dependency tracking uses a thread-local stack
//! of [`ReactiveContext`] entries: when a signal is read, the entry on top of
//! the stack records the read.
//!
//! Everything is synchronous. A `set` returns only after every subscriber and
//! effect it triggered has finished, unless a batch defers delivery.

mod batch;
mod context;
mod derived;
mod dispatch;
mod effect;
mod error;
mod runtime;
mod signal;
mod subscriber;

pub use batch::{batch, is_batching};
pub use context::{untracked, ReactiveContext, ReadHook};
pub use derived::Derived;
pub use dispatch::{Dispatcher, Handler, Payload};
pub use effect::Effect;
pub use error::{ReactiveError, Result};
pub use runtime::{Reactive, Runtime, ValueLogger};
pub use signal::{Signal, SignalGet, SignalSet, SignalValue, Subscription};
pub use subscriber::{ChannelId, SubscriberId};
