//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! publishes every change on its own channel in the
//! [`Dispatcher`](super::Dispatcher).
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a reactive context (an effect run), the
//!    read is recorded and the effect subscribes to the signal's channel.
//!
//! 2. When a signal's value changes, the new value is dispatched on the
//!    channel, reaching direct subscribers and dependent effects in
//!    registration order. Inside a [`batch`](super::batch) the dispatch is
//!    deferred until the batch ends.
//!
//! 3. Writing a value equal to the current one does nothing: no dispatch,
//!    no logging.
//!
//! # Absent Values
//!
//! A signal always holds a value. Inputs that may be missing go through
//! [`Signal::try_new`] and [`Signal::try_set`], which reject `None` with
//! [`ReactiveError::InvalidValue`] before anything is mutated.

use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::RwLock;

use super::batch;
use super::context::ReactiveContext;
use super::dispatch::{Dispatcher, Handler, Payload};
use super::error::{ReactiveError, Result};
use super::runtime::Runtime;
use super::subscriber::ChannelId;

/// Bound for values stored in signals.
///
/// `PartialEq` decides whether a write is a change. `Debug` feeds the
/// value-change logger.
pub trait SignalValue: Clone + PartialEq + Debug + Send + Sync + 'static {}

impl<T> SignalValue for T where T: Clone + PartialEq + Debug + Send + Sync + 'static {}

/// Read access shared by [`Signal`] and [`Derived`](super::Derived).
pub trait SignalGet<T: SignalValue> {
    /// The channel this signal publishes on.
    fn id(&self) -> ChannelId;

    /// Read the value, recording a dependency if an effect is running.
    fn get(&self) -> T;

    /// Read the value without recording a dependency.
    fn get_untracked(&self) -> T;

    /// Call `listener` with every new value until unsubscribed.
    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static;
}

/// Write access. Derived signals implement it by refusing every write.
pub trait SignalSet<T: SignalValue> {
    /// Store a new value and notify if it differs from the current one.
    fn set(&self, value: T) -> Result<()>;

    /// Like [`SignalSet::set`], rejecting `None`.
    fn try_set(&self, value: Option<T>) -> Result<()> {
        match value {
            Some(value) => self.set(value),
            None => Err(ReactiveError::InvalidValue {
                channel: self.channel(),
            }),
        }
    }

    /// The channel writes are published on.
    fn channel(&self) -> ChannelId;
}

/// A reactive signal holding a value of type T.
///
/// Cloning a signal yields another handle to the same value and channel.
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let sub = count.subscribe(|value| println!("count = {value}"));
/// count.set(5)?; // prints "count = 5"
/// count.set(5)?; // unchanged, prints nothing
/// sub.unsubscribe();
/// ```
pub struct Signal<T: SignalValue> {
    /// Unique identifier for this signal.
    id: ChannelId,

    /// The current value.
    value: Arc<RwLock<T>>,
}

impl<T: SignalValue> Signal<T> {
    /// Create a new signal with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: ChannelId::new(),
            value: Arc::new(RwLock::new(value)),
        }
    }

    /// Create a signal from a value that may be absent.
    pub fn try_new(value: Option<T>) -> Result<Self> {
        match value {
            Some(value) => Ok(Self::new(value)),
            None => Err(ReactiveError::InvalidValue {
                channel: ChannelId::new(),
            }),
        }
    }

    /// Get the signal's channel.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Get the current value.
    ///
    /// If called within a reactive context, the running effect becomes a
    /// dependent of this signal.
    pub fn get(&self) -> T {
        ReactiveContext::track_dependency(self.id);
        self.value.read().clone()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Borrow the current value, tracking like [`Signal::get`].
    ///
    /// `f` runs under the value's read lock and must not write this signal.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        ReactiveContext::track_dependency(self.id);
        f(&self.value.read())
    }

    /// Set a new value and notify subscribers.
    ///
    /// Returns the first error raised by a dependent effect.
    pub fn set(&self, value: T) -> Result<()> {
        {
            let mut guard = self.value.write();
            if *guard == value {
                return Ok(());
            }
            *guard = value.clone();
        }

        tracing::trace!(channel = %self.id, "signal changed");
        Runtime::log_change(self.id, &value);

        let payload: Payload = Arc::new(value);
        batch::deliver(self.id, payload)
    }

    /// Set a value that may be absent. `None` is rejected and the current
    /// value is kept.
    pub fn try_set(&self, value: Option<T>) -> Result<()> {
        match value {
            Some(value) => self.set(value),
            None => Err(ReactiveError::InvalidValue { channel: self.id }),
        }
    }

    /// Update the value using a function of the current value.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = f(&self.value.read());
        self.set(new_value)
    }

    /// Register a listener for value changes.
    ///
    /// The listener receives each new value. It is not called with the
    /// current value; read it with [`Signal::get`] first if needed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(move |payload: &Payload| {
            if let Some(value) = payload.downcast_ref::<T>() {
                listener(value);
            }
            Ok(())
        });

        Dispatcher::register(self.id, Arc::clone(&handler));
        Subscription {
            channel: self.id,
            handler,
        }
    }

    /// Number of handlers on this signal's channel, effects included.
    pub fn subscriber_count(&self) -> usize {
        Dispatcher::handler_count(self.id)
    }
}

impl<T: SignalValue> SignalGet<T> for Signal<T> {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn get(&self) -> T {
        Signal::get(self)
    }

    fn get_untracked(&self) -> T {
        Signal::get_untracked(self)
    }

    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Signal::subscribe(self, listener)
    }
}

impl<T: SignalValue> SignalSet<T> for Signal<T> {
    fn set(&self, value: T) -> Result<()> {
        Signal::set(self, value)
    }

    fn channel(&self) -> ChannelId {
        self.id
    }
}

impl<T: SignalValue> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            value: Arc::clone(&self.value),
        }
    }
}

impl<T: SignalValue> Debug for Signal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle keeps the listener registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    channel: ChannelId,
    handler: Handler,
}

impl Subscription {
    /// Remove exactly this listener. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        Dispatcher::unregister(self.channel, &self.handler);
    }

    /// Whether the listener is still registered.
    pub fn is_subscribed(&self) -> bool {
        Dispatcher::is_registered(self.channel, &self.handler)
    }

    /// The channel the listener is registered on.
    pub fn channel(&self) -> ChannelId {
        self.channel
    }
}

impl Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
