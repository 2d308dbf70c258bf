//! Pulse Core
//!
//! This crate provides the runtime for Pulse, a fine-grained reactive state
//! library. It implements:
//!
//! - Reactive primitives (signals, derived signals, effects)
//! - Automatic dependency tracking and batched notification
//! - A persisted store of signals over pluggable async drivers
//! - Helpers for binding layers and navigation state
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Core reactive primitives and dependency tracking
//! - `store`: Signals loaded from and written back to a storage driver
//! - `binding`: Keeping external targets in sync with a signal
//! - `location`: Path and params signals for router code
//! - `config`: Runtime and store settings
//!
//! # Example
//!
//! ```rust,ignore
//! use pulse_core::reactive::{Derived, Effect, Signal};
//!
//! // Create a signal
//! let count = Signal::new(0);
//!
//! // Create a derived value
//! let doubled = Derived::new({
//!     let count = count.clone();
//!     move || count.get() * 2
//! })?;
//!
//! // Create an effect
//! let _effect = Effect::new(move || {
//!     println!("Doubled: {}", doubled.get());
//!     Ok(())
//! })?;
//!
//! // Update the signal
//! count.set(5)?;
//! // Effect automatically runs, prints: "Doubled: 10"
//! ```

pub mod binding;
pub mod config;
pub mod location;
pub mod reactive;
pub mod store;

/// The types most programs need.
pub mod prelude {
    pub use crate::binding::{bind, Binding};
    pub use crate::reactive::{
        batch, untracked, Derived, Effect, ReactiveError, Signal, SignalGet, SignalSet,
        Subscription,
    };
}

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
