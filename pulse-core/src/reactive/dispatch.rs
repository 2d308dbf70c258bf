//! Dispatch Registry
//!
//! A keyed publish/subscribe table mapping [`ChannelId`]s to ordered handler
//! lists. Signals deliver every change notification through this table, both
//! to direct subscribers and to the effects that read them.
//!
//! # Delivery Rules
//!
//! - Handlers run in registration order.
//! - The handler list is snapshotted before delivery starts. A handler may
//!   register or unregister handlers (including itself) while it runs; every
//!   handler present at dispatch start is called exactly once.
//! - A handler returning `Err` stops the dispatch and the error is returned.
//! - A handler that panics is isolated: the panic is logged, the remaining
//!   handlers still run, and the first panic is resumed once delivery is done.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use smallvec::SmallVec;

use super::error::Result;
use super::subscriber::ChannelId;

/// Type-erased notification payload. Signals send their new value.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A registered handler. Identity is the allocation, so registering the same
/// `Arc` twice on one channel is a no-op.
pub type Handler = Arc<dyn Fn(&Payload) -> Result<()> + Send + Sync>;

static CHANNELS: OnceLock<DashMap<ChannelId, Vec<Handler>>> = OnceLock::new();

fn channels() -> &'static DashMap<ChannelId, Vec<Handler>> {
    CHANNELS.get_or_init(DashMap::new)
}

fn same_handler(a: &Handler, b: &Handler) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// The process-wide dispatch registry.
pub struct Dispatcher;

impl Dispatcher {
    /// Add `handler` to the channel. Registering a handler that is already
    /// present does nothing.
    pub fn register(channel: ChannelId, handler: Handler) {
        let mut handlers = channels().entry(channel).or_default();
        if !handlers.iter().any(|h| same_handler(h, &handler)) {
            handlers.push(handler);
        }
    }

    /// Remove `handler` from the channel.
    pub fn unregister(channel: ChannelId, handler: &Handler) {
        if let Some(mut handlers) = channels().get_mut(&channel) {
            handlers.retain(|h| !same_handler(h, handler));
        }
        channels().remove_if(&channel, |_, handlers| handlers.is_empty());
    }

    /// Deliver `payload` to every handler registered on the channel.
    pub fn dispatch(channel: ChannelId, payload: &Payload) -> Result<()> {
        // Snapshot so no shard lock is held while handlers run.
        let handlers: SmallVec<[Handler; 4]> = match channels().get(&channel) {
            Some(entry) => entry.iter().cloned().collect(),
            None => return Ok(()),
        };

        tracing::trace!(channel = %channel, handlers = handlers.len(), "dispatch");

        let mut outcome = Ok(());
        let mut first_panic = None;

        for handler in &handlers {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    outcome = Err(err);
                    break;
                }
                Err(cause) => {
                    tracing::error!(channel = %channel, "handler panicked during dispatch");
                    first_panic.get_or_insert(cause);
                }
            }
        }

        if let Some(cause) = first_panic {
            panic::resume_unwind(cause);
        }
        outcome
    }

    /// Remove every handler on one channel, or on all channels.
    pub fn clear(channel: Option<ChannelId>) {
        match channel {
            Some(channel) => {
                channels().remove(&channel);
            }
            None => channels().clear(),
        }
    }

    /// Number of handlers currently registered on the channel.
    pub fn handler_count(channel: ChannelId) -> usize {
        channels().get(&channel).map_or(0, |handlers| handlers.len())
    }

    /// Whether this exact handler is registered on the channel.
    pub fn is_registered(channel: ChannelId, handler: &Handler) -> bool {
        channels()
            .get(&channel)
            .is_some_and(|handlers| handlers.iter().any(|h| same_handler(h, handler)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveError;
    use parking_lot::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> Handler {
        let log = Arc::clone(log);
        Arc::new(move |_: &Payload| {
            log.lock().push(name);
            Ok(())
        })
    }

    fn payload(value: i32) -> Payload {
        Arc::new(value)
    }

    #[test]
    fn dispatch_runs_handlers_in_registration_order() {
        let channel = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        Dispatcher::register(channel, recorder(&log, "a"));
        Dispatcher::register(channel, recorder(&log, "b"));
        Dispatcher::register(channel, recorder(&log, "c"));

        Dispatcher::dispatch(channel, &payload(1)).unwrap();
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[test]
    fn register_is_idempotent_per_handler() {
        let channel = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder(&log, "once");

        Dispatcher::register(channel, handler.clone());
        Dispatcher::register(channel, handler.clone());
        assert_eq!(Dispatcher::handler_count(channel), 1);

        Dispatcher::dispatch(channel, &payload(1)).unwrap();
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn unregister_removes_only_that_handler() {
        let channel = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let keep = recorder(&log, "keep");
        let drop_me = recorder(&log, "drop");

        Dispatcher::register(channel, keep.clone());
        Dispatcher::register(channel, drop_me.clone());
        Dispatcher::unregister(channel, &drop_me);

        assert!(Dispatcher::is_registered(channel, &keep));
        assert!(!Dispatcher::is_registered(channel, &drop_me));

        Dispatcher::dispatch(channel, &payload(1)).unwrap();
        assert_eq!(*log.lock(), vec!["keep"]);
    }

    #[test]
    fn dispatch_to_empty_channel_is_ok() {
        assert!(Dispatcher::dispatch(ChannelId::new(), &payload(0)).is_ok());
    }

    #[test]
    fn handlers_receive_payload() {
        let channel = ChannelId::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        Dispatcher::register(
            channel,
            Arc::new(move |payload: &Payload| {
                *seen_clone.lock() = payload.downcast_ref::<i32>().copied();
                Ok(())
            }),
        );

        Dispatcher::dispatch(channel, &payload(42)).unwrap();
        assert_eq!(*seen.lock(), Some(42));
    }

    #[test]
    fn mutation_during_dispatch_uses_snapshot() {
        let channel = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let late = recorder(&log, "late");
        let second = recorder(&log, "second");

        // The first handler unregisters the second and registers a new one.
        let first: Handler = {
            let log = log.clone();
            let late = late.clone();
            let second = second.clone();
            Arc::new(move |_: &Payload| {
                log.lock().push("first");
                Dispatcher::unregister(channel, &second);
                Dispatcher::register(channel, late.clone());
                Ok(())
            })
        };

        Dispatcher::register(channel, first);
        Dispatcher::register(channel, second);

        Dispatcher::dispatch(channel, &payload(1)).unwrap();
        // Present at start: delivered. Added during dispatch: not yet.
        assert_eq!(*log.lock(), vec!["first", "second"]);

        log.lock().clear();
        Dispatcher::dispatch(channel, &payload(2)).unwrap();
        assert_eq!(*log.lock(), vec!["first", "late"]);
    }

    #[test]
    fn error_stops_dispatch() {
        let channel = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Handler = Arc::new(move |_: &Payload| Err(ReactiveError::DerivedMutation { channel }));

        Dispatcher::register(channel, failing);
        Dispatcher::register(channel, recorder(&log, "after"));

        let result = Dispatcher::dispatch(channel, &payload(1));
        assert_eq!(result, Err(ReactiveError::DerivedMutation { channel }));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn panicking_handler_does_not_starve_the_rest() {
        let channel = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        Dispatcher::register(channel, Arc::new(|_: &Payload| panic!("listener bug")));
        Dispatcher::register(channel, recorder(&log, "survivor"));

        let outcome = panic::catch_unwind(|| Dispatcher::dispatch(channel, &payload(1)));
        assert!(outcome.is_err());
        assert_eq!(*log.lock(), vec!["survivor"]);
    }

    #[test]
    fn clear_single_channel() {
        let a = ChannelId::new();
        let b = ChannelId::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        Dispatcher::register(a, recorder(&log, "a"));
        Dispatcher::register(b, recorder(&log, "b"));
        Dispatcher::clear(Some(a));

        assert_eq!(Dispatcher::handler_count(a), 0);
        assert_eq!(Dispatcher::handler_count(b), 1);
    }
}
