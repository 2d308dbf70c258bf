//! Reactive Runtime
//!
//! The runtime is the process-wide coordinator behind signals and effects.
//! It owns:
//!
//! - the active-effect registry, which keeps every effect alive and
//!   reachable until it is cleaned up,
//! - the optional value-change logger used by devtools,
//! - the per-thread [`RuntimeConfig`].
//!
//! # How It Works
//!
//! 1. When an effect is created, it registers with the runtime.
//!
//! 2. While the effect runs, the signals it reads are recorded by the
//!    [`ReactiveContext`](super::ReactiveContext) and the effect subscribes
//!    to their channels in the [`Dispatcher`](super::Dispatcher).
//!
//! 3. When a signal's value changes, the dispatcher calls the effect, which
//!    asks the runtime for permission to run (cycle and depth checks) before
//!    re-running its body.
//!
//! 4. Cleanup removes the effect from the registry. Dropping the last user
//!    handle does not: an effect stays active until it is cleaned up.

use std::cell::RefCell;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use parking_lot::RwLock;

use super::context::ReactiveContext;
use super::error::{ReactiveError, Result};
use super::subscriber::{ChannelId, SubscriberId};
use crate::config::RuntimeConfig;

/// A computation the runtime can keep alive and re-run.
pub trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Re-run the computation.
    fn run(&self) -> Result<()>;
}

/// Callback invoked with every changed signal value.
pub type ValueLogger = Arc<dyn Fn(ChannelId, &dyn Debug) + Send + Sync>;

/// The global reactive runtime.
pub struct Runtime;

static REGISTRY: OnceLock<DashMap<SubscriberId, Arc<dyn Reactive>>> = OnceLock::new();
static LOGGER: OnceLock<RwLock<Option<ValueLogger>>> = OnceLock::new();

thread_local! {
    static CONFIG: RefCell<RuntimeConfig> = RefCell::new(RuntimeConfig::default());
}

fn get_registry() -> &'static DashMap<SubscriberId, Arc<dyn Reactive>> {
    REGISTRY.get_or_init(DashMap::new)
}

fn get_logger() -> &'static RwLock<Option<ValueLogger>> {
    LOGGER.get_or_init(|| RwLock::new(None))
}

impl Runtime {
    /// Register a reactive value as active.
    pub fn register(reactive: Arc<dyn Reactive>) {
        let id = reactive.subscriber_id();
        get_registry().insert(id, reactive);
    }

    /// Remove a reactive value from the active set.
    ///
    /// Returns `false` if it was not registered.
    pub fn unregister(id: SubscriberId) -> bool {
        get_registry().remove(&id).is_some()
    }

    /// Whether the subscriber is in the active set.
    pub fn is_registered(id: SubscriberId) -> bool {
        get_registry().contains_key(&id)
    }

    /// Active subscribers, in creation order.
    pub fn active_subscribers() -> Vec<SubscriberId> {
        let mut ids: Vec<_> = get_registry().iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Re-run an active subscriber by ID. Inactive IDs are ignored.
    pub fn run(id: SubscriberId) -> Result<()> {
        // Clone out of the map so the shard lock is released before running.
        let reactive = get_registry().get(&id).map(|entry| Arc::clone(entry.value()));
        match reactive {
            Some(reactive) => reactive.run(),
            None => Ok(()),
        }
    }

    /// Check that `subscriber_id` may start a run right now.
    pub fn admit(subscriber_id: SubscriberId) -> Result<()> {
        let config = Self::config();

        if config.cycle_detection && ReactiveContext::is_running(subscriber_id) {
            return Err(ReactiveError::CyclicDependency {
                subscriber: subscriber_id,
            });
        }

        let depth = ReactiveContext::depth() + 1;
        if depth > config.max_depth {
            return Err(ReactiveError::DepthExceeded {
                depth,
                limit: config.max_depth,
            });
        }

        Ok(())
    }

    /// Install the value-change logger, replacing any previous one.
    pub fn install_logger<F>(logger: F)
    where
        F: Fn(ChannelId, &dyn Debug) + Send + Sync + 'static,
    {
        *get_logger().write() = Some(Arc::new(logger));
    }

    /// Remove the value-change logger.
    pub fn remove_logger() {
        get_logger().write().take();
    }

    /// Report a changed value to the installed logger, if any.
    pub fn log_change(channel: ChannelId, value: &dyn Debug) {
        let logger = get_logger().read().clone();
        if let Some(logger) = logger {
            logger(channel, value);
        }
    }

    /// Replace this thread's configuration.
    pub fn configure(config: RuntimeConfig) {
        tracing::debug!(?config, "runtime configured");
        CONFIG.with(|current| *current.borrow_mut() = config);
    }

    /// This thread's configuration.
    pub fn config() -> RuntimeConfig {
        CONFIG.with(|current| current.borrow().clone())
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}
