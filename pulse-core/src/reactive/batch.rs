//! Batch Scheduler
//!
//! [`batch`] defers change notifications until a group of writes is done.
//!
//! # Semantics
//!
//! - Writes inside a batch update signal values immediately, so `get()`
//!   always sees the latest value. Only delivery to subscribers and effects
//!   is deferred.
//! - A channel written N times in one batch is notified once, with the last
//!   value.
//! - Channels are flushed in the order they were first written.
//! - Nested batches join the outermost one. Only the outermost call flushes.
//! - The flush happens even if the batch body fails or panics. Every pending
//!   channel is delivered even if an earlier one fails or panics; a panic is
//!   resumed once the flush is done, a body panic taking precedence.
//!
//! Flushing does not sort dependents topologically. A derived signal reachable
//! from two flushed channels may recompute once per channel.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};

use indexmap::IndexMap;

use super::dispatch::{Dispatcher, Payload};
use super::error::Result;
use super::subscriber::ChannelId;

#[derive(Default)]
struct BatchState {
    active: bool,
    pending: IndexMap<ChannelId, Payload>,
}

thread_local! {
    static BATCH: RefCell<BatchState> = RefCell::new(BatchState::default());
}

/// Whether a batch is open on this thread.
pub fn is_batching() -> bool {
    BATCH.with(|state| state.borrow().active)
}

/// Run `f` with notification delivery deferred until it returns.
///
/// Returns the error from `f` if it failed, otherwise the first error raised
/// while flushing.
///
/// ```rust,ignore
/// batch(|| {
///     count.set(1)?;
///     count.set(2)?;
///     count.set(3)
/// })?;
/// // Subscribers of `count` ran once, with 3.
/// ```
pub fn batch<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    if is_batching() {
        return f();
    }

    set_active(true);
    let outcome = panic::catch_unwind(AssertUnwindSafe(f));
    set_active(false);
    let flushed = flush();

    match outcome {
        Err(cause) => {
            if flushed.panic.is_some() {
                tracing::warn!("handler panic during flush superseded by batch body panic");
            }
            if let Err(flush_err) = flushed.result {
                tracing::warn!(error = %flush_err, "batch flush failed after batch body panic");
            }
            panic::resume_unwind(cause)
        }
        Ok(body) => {
            if let Some(cause) = flushed.panic {
                if let Err(err) = &body {
                    tracing::warn!(error = %err, "batch body error superseded by flush panic");
                }
                panic::resume_unwind(cause);
            }
            match body {
                Ok(value) => flushed.result.map(|()| value),
                Err(err) => {
                    if let Err(flush_err) = flushed.result {
                        tracing::warn!(error = %flush_err, "batch flush failed after batch body error");
                    }
                    Err(err)
                }
            }
        }
    }
}

/// Deliver a change now, or queue it if a batch is open.
pub(crate) fn deliver(channel: ChannelId, payload: Payload) -> Result<()> {
    let queued = BATCH.with(|state| {
        let mut state = state.borrow_mut();
        if state.active {
            // Re-inserting keeps the first-touch position and replaces the value.
            state.pending.insert(channel, payload.clone());
        }
        state.active
    });

    if queued {
        tracing::trace!(channel = %channel, "deferred to batch");
        return Ok(());
    }
    Dispatcher::dispatch(channel, &payload)
}

fn set_active(active: bool) {
    BATCH.with(|state| state.borrow_mut().active = active);
}

/// What a flush produced: the first handler error and the first panic.
struct Flushed {
    result: Result<()>,
    panic: Option<Box<dyn Any + Send>>,
}

/// Deliver every pending channel. A failing or panicking channel does not
/// stop delivery to the channels after it.
fn flush() -> Flushed {
    let pending = BATCH.with(|state| std::mem::take(&mut state.borrow_mut().pending));
    let mut first_error = None;
    let mut first_panic = None;

    if !pending.is_empty() {
        tracing::debug!(channels = pending.len(), "flushing batch");
    }

    for (channel, payload) in pending {
        match panic::catch_unwind(AssertUnwindSafe(|| Dispatcher::dispatch(channel, &payload))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => match first_error {
                None => first_error = Some(err),
                Some(_) => tracing::warn!(channel = %channel, error = %err, "additional flush failure"),
            },
            Err(cause) => {
                first_panic.get_or_insert(cause);
            }
        }
    }

    Flushed {
        result: first_error.map_or(Ok(()), Err),
        panic: first_panic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    fn recording_channel() -> (ChannelId, Arc<Mutex<Vec<i32>>>) {
        let channel = ChannelId::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        Dispatcher::register(
            channel,
            Arc::new(move |payload: &Payload| {
                if let Some(value) = payload.downcast_ref::<i32>() {
                    seen_clone.lock().push(*value);
                }
                Ok(())
            }),
        );
        (channel, seen)
    }

    #[test]
    fn deliver_outside_batch_is_immediate() {
        let (channel, seen) = recording_channel();
        deliver(channel, Arc::new(7)).unwrap();
        assert_eq!(*seen.lock(), vec![7]);
    }

    #[test]
    fn batch_coalesces_to_last_value() {
        let (channel, seen) = recording_channel();

        batch(|| {
            deliver(channel, Arc::new(1))?;
            deliver(channel, Arc::new(2))?;
            deliver(channel, Arc::new(3))?;
            assert!(seen.lock().is_empty());
            Ok(())
        })
        .unwrap();

        assert_eq!(*seen.lock(), vec![3]);
        assert!(!is_batching());
    }

    #[test]
    fn nested_batch_flushes_once_at_outer_exit() {
        let (channel, seen) = recording_channel();

        batch(|| {
            batch(|| deliver(channel, Arc::new(1)))?;
            assert!(seen.lock().is_empty());
            deliver(channel, Arc::new(2))
        })
        .unwrap();

        assert_eq!(*seen.lock(), vec![2]);
    }

    #[test]
    fn flush_follows_first_touch_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let channels: Vec<ChannelId> = (0..3).map(|_| ChannelId::new()).collect();
        for (index, channel) in channels.iter().enumerate() {
            let order = order.clone();
            Dispatcher::register(
                *channel,
                Arc::new(move |_: &Payload| {
                    order.lock().push(index);
                    Ok(())
                }),
            );
        }

        batch(|| {
            deliver(channels[2], Arc::new(0))?;
            deliver(channels[0], Arc::new(0))?;
            deliver(channels[1], Arc::new(0))?;
            deliver(channels[2], Arc::new(1))
        })
        .unwrap();

        assert_eq!(*order.lock(), vec![2, 0, 1]);
    }

    #[test]
    fn batch_flushes_when_body_fails() {
        let (channel, seen) = recording_channel();
        let failure = ReactiveError::DerivedMutation { channel };

        let result: Result<()> = batch(|| {
            deliver(channel, Arc::new(5))?;
            Err(failure.clone())
        });

        assert_eq!(result, Err(failure));
        assert_eq!(*seen.lock(), vec![5]);
        assert!(!is_batching());
    }

    #[test]
    fn batch_flushes_when_body_panics() {
        let (channel, seen) = recording_channel();

        let outcome = panic::catch_unwind(|| {
            batch(|| -> Result<()> {
                deliver(channel, Arc::new(9))?;
                panic!("body failed");
            })
        });

        assert!(outcome.is_err());
        assert_eq!(*seen.lock(), vec![9]);
        assert!(!is_batching());
    }

    #[test]
    fn batch_returns_body_value() {
        assert_eq!(batch(|| Ok(41 + 1)), Ok(42));
    }

    #[test]
    fn flush_panic_does_not_drop_later_channels() {
        let panicking = ChannelId::new();
        Dispatcher::register(
            panicking,
            Arc::new(|_: &Payload| -> Result<()> { panic!("listener failed") }),
        );
        let (later, seen) = recording_channel();

        let outcome = panic::catch_unwind(|| {
            batch(|| {
                deliver(panicking, Arc::new(1))?;
                deliver(later, Arc::new(1))
            })
        });

        assert!(outcome.is_err());
        assert_eq!(*seen.lock(), vec![1]);
        assert!(!is_batching());
    }

    #[test]
    fn body_panic_wins_over_flush_panic() {
        let panicking = ChannelId::new();
        Dispatcher::register(
            panicking,
            Arc::new(|_: &Payload| -> Result<()> { panic!("listener failed") }),
        );

        let outcome = panic::catch_unwind(|| {
            batch(|| -> Result<()> {
                deliver(panicking, Arc::new(1))?;
                panic!("body failed");
            })
        });

        let cause = outcome.unwrap_err();
        assert_eq!(cause.downcast_ref::<&str>(), Some(&"body failed"));
    }

    #[test]
    fn flush_panic_wins_over_body_error() {
        let panicking = ChannelId::new();
        Dispatcher::register(
            panicking,
            Arc::new(|_: &Payload| -> Result<()> { panic!("listener failed") }),
        );

        let outcome = panic::catch_unwind(|| {
            batch(|| -> Result<()> {
                deliver(panicking, Arc::new(1))?;
                Err(ReactiveError::DerivedMutation { channel: panicking })
            })
        });

        assert!(outcome.is_err());
    }
}
