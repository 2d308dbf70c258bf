//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect registers with the [`Runtime`] and runs its
//!    function immediately to establish initial dependencies.
//!
//! 2. Every signal read during a run is recorded by the
//!    [`ReactiveContext`], and the effect subscribes to a channel the moment
//!    it is first read. When the run ends, subscriptions to channels that were
//!    not read this time are dropped; retained ones keep their place.
//!
//! 3. When any dependency changes, the dispatcher re-runs the effect
//!    synchronously, before the triggering `set` returns.
//!
//! # Failure
//!
//! An `Err` returned by the effect function (or a panic inside it) reaches
//! whoever triggered the run. The effect stays active and keeps the
//! dependencies it read before failing.
//!
//! # Cleanup
//!
//! [`Effect::cleanup`] deactivates the effect and drops every subscription.
//! Side effects already performed are not undone.

use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use super::context::{ReactiveContext, ReadHook};
use super::dispatch::{Dispatcher, Handler, Payload};
use super::error::Result;
use super::runtime::{Reactive, Runtime};
use super::subscriber::{ChannelId, SubscriberId};

type EffectFn = Box<dyn Fn() -> Result<()> + Send + Sync>;

struct EffectInner {
    /// The subscriber ID used for dependency tracking.
    subscriber_id: SubscriberId,

    /// The effect function.
    run: EffectFn,

    /// One handler per dependency channel, in first-read order.
    subscriptions: Mutex<IndexMap<ChannelId, Handler>>,

    /// Cleared by cleanup.
    active: AtomicBool,

    /// Number of times the effect has started a run.
    run_count: AtomicUsize,

    weak_self: Weak<EffectInner>,
}

impl EffectInner {
    fn handler_for(&self, channel: ChannelId) -> Handler {
        let effect = Weak::clone(&self.weak_self);
        Arc::new(move |_: &Payload| match effect.upgrade() {
            Some(effect) => effect.notify(channel),
            None => Ok(()),
        })
    }

    /// A dependency published a change.
    fn notify(&self, channel: ChannelId) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }

        // While a run is in progress only channels read by that run count as
        // dependencies; the rest belong to the previous run.
        if ReactiveContext::is_running(self.subscriber_id)
            && !ReactiveContext::has_read(self.subscriber_id, channel)
        {
            tracing::trace!(subscriber = %self.subscriber_id, channel = %channel, "ignoring stale dependency");
            return Ok(());
        }

        self.execute()
    }

    fn execute(&self) -> Result<()> {
        if !self.active.load(Ordering::SeqCst) {
            return Ok(());
        }

        Runtime::admit(self.subscriber_id)?;

        tracing::debug!(subscriber = %self.subscriber_id, "effect run");
        self.run_count.fetch_add(1, Ordering::SeqCst);

        let on_first_read: ReadHook = {
            let effect = Weak::clone(&self.weak_self);
            Rc::new(move |channel: ChannelId| {
                if let Some(effect) = effect.upgrade() {
                    effect.subscribe_to(channel);
                }
            })
        };

        let _guard = RunGuard {
            effect: self,
            context: ReactiveContext::enter_observed(self.subscriber_id, on_first_read),
        };
        (self.run)()
    }

    fn subscribe_to(&self, channel: ChannelId) {
        if !self.active.load(Ordering::SeqCst) {
            return;
        }

        let mut subscriptions = self.subscriptions.lock();
        if !subscriptions.contains_key(&channel) {
            let handler = self.handler_for(channel);
            Dispatcher::register(channel, Arc::clone(&handler));
            subscriptions.insert(channel, handler);
        }
    }

    /// Drop subscriptions to channels the last run did not read.
    fn reconcile(&self, read: IndexSet<ChannelId>) {
        let mut subscriptions = self.subscriptions.lock();

        if !self.active.load(Ordering::SeqCst) {
            for (channel, handler) in subscriptions.drain(..) {
                Dispatcher::unregister(channel, &handler);
            }
            return;
        }

        subscriptions.retain(|channel, handler| {
            let keep = read.contains(channel);
            if !keep {
                Dispatcher::unregister(*channel, handler);
            }
            keep
        });
    }

    fn cleanup(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }

        Runtime::unregister(self.subscriber_id);
        for (channel, handler) in self.subscriptions.lock().drain(..) {
            Dispatcher::unregister(channel, &handler);
        }
        tracing::debug!(subscriber = %self.subscriber_id, "effect cleaned up");
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn run(&self) -> Result<()> {
        self.execute()
    }
}

/// Ends a tracked run: hands the reads to the effect, then pops the context.
struct RunGuard<'a> {
    effect: &'a EffectInner,
    context: ReactiveContext,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let read = self.context.take_dependencies();
        self.effect.reconcile(read);
    }
}

/// A side-effecting computation that runs when dependencies change.
///
/// Cloning an `Effect` yields another handle to the same computation.
/// Dropping handles does not stop it; call [`Effect::cleanup`].
///
/// # Example
///
/// ```rust,ignore
/// let count = Signal::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || {
///         println!("Count is: {}", count.get());
///         Ok(())
///     }
/// })?;
///
/// count.set(5)?;  // Prints: "Count is: 5"
/// effect.cleanup();
/// count.set(6)?;  // Prints nothing
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect and run it once.
    ///
    /// If the first run fails the effect is cleaned up and the error is
    /// returned.
    pub fn new<F>(run: F) -> Result<Self>
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        let inner = Arc::new_cyclic(|weak_self| EffectInner {
            subscriber_id: SubscriberId::new(),
            run: Box::new(run),
            subscriptions: Mutex::new(IndexMap::new()),
            active: AtomicBool::new(true),
            run_count: AtomicUsize::new(0),
            weak_self: Weak::clone(weak_self),
        });

        Runtime::register(Arc::clone(&inner) as Arc<dyn Reactive>);
        tracing::debug!(subscriber = %inner.subscriber_id, "effect created");

        if let Err(err) = inner.execute() {
            inner.cleanup();
            return Err(err);
        }

        Ok(Self { inner })
    }

    /// Get the effect's ID. IDs grow in creation order.
    pub fn id(&self) -> SubscriberId {
        self.inner.subscriber_id
    }

    /// Re-run the effect now, rebuilding its dependencies.
    ///
    /// Does nothing once the effect has been cleaned up.
    pub fn run(&self) -> Result<()> {
        self.inner.execute()
    }

    /// Stop the effect and drop all of its subscriptions.
    pub fn cleanup(&self) {
        self.inner.cleanup();
    }

    /// Whether the effect is still registered with the runtime.
    pub fn is_active(&self) -> bool {
        Runtime::is_registered(self.inner.subscriber_id)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Channels read during the latest run, in first-read order.
    pub fn dependencies(&self) -> Vec<ChannelId> {
        self.inner.subscriptions.lock().keys().copied().collect()
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
