//! Reactive Context
//!
//! The reactive context tracks which computation is currently running.
//! This enables automatic dependency tracking: when a signal is read,
//! the channel it publishes on is recorded against the current computation.
//!
//! # Implementation
//!
//! We use a thread-local stack. Running an effect pushes a tracking entry;
//! [`untracked`] pushes an entry that records nothing. Entries are popped by
//! guards on drop, so the stack is restored on every exit path, including
//! early `Err` returns and panics.
//!
//! Only the top entry records reads. An effect that runs another effect
//! therefore never sees the inner effect's dependencies.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexSet;

use super::subscriber::{ChannelId, SubscriberId};

/// Called the first time a run reads a channel.
pub type ReadHook = Rc<dyn Fn(ChannelId)>;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The computation reading signals, or `None` for an untracked scope.
    subscriber_id: Option<SubscriberId>,
    /// Channels read so far, in first-read order.
    dependencies: IndexSet<ChannelId>,
    on_first_read: Option<ReadHook>,
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
#[must_use = "the context is exited as soon as the guard is dropped"]
pub struct ReactiveContext {
    subscriber_id: Option<SubscriberId>,
}

impl ReactiveContext {
    /// Enter a new reactive context for the given subscriber.
    ///
    /// While this context is on top of the stack, every signal read is
    /// recorded as a dependency of `subscriber_id`.
    pub fn enter(subscriber_id: SubscriberId) -> Self {
        Self::push(Some(subscriber_id), None)
    }

    /// Like [`ReactiveContext::enter`], calling `on_first_read` as soon as a
    /// channel is read for the first time in this context. Effects use it to
    /// subscribe at read time.
    pub fn enter_observed(subscriber_id: SubscriberId, on_first_read: ReadHook) -> Self {
        Self::push(Some(subscriber_id), Some(on_first_read))
    }

    /// Enter a scope in which signal reads are not recorded.
    pub fn enter_untracked() -> Self {
        Self::push(None, None)
    }

    fn push(subscriber_id: Option<SubscriberId>, on_first_read: Option<ReadHook>) -> Self {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                dependencies: IndexSet::new(),
                on_first_read,
            });
        });

        Self { subscriber_id }
    }

    /// Check if reads are currently being recorded.
    pub fn is_active() -> bool {
        Self::current_subscriber().is_some()
    }

    /// Get the subscriber whose reads are being recorded, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|entry| entry.subscriber_id))
    }

    /// Whether `subscriber_id` has a run in progress anywhere on the stack.
    pub fn is_running(subscriber_id: SubscriberId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .any(|entry| entry.subscriber_id == Some(subscriber_id))
        })
    }

    /// Whether the in-progress run of `subscriber_id` has read `channel`.
    pub fn has_read(subscriber_id: SubscriberId, channel: ChannelId) -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|entry| entry.subscriber_id == Some(subscriber_id))
                .is_some_and(|entry| entry.dependencies.contains(&channel))
        })
    }

    /// Number of entries on the stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }

    /// Record a dependency on the given channel.
    ///
    /// Called by signals when they are read. Ignored inside untracked scopes.
    pub fn track_dependency(channel: ChannelId) {
        let hook = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entry = stack.last_mut()?;
            if entry.subscriber_id.is_some() && entry.dependencies.insert(channel) {
                entry.on_first_read.clone()
            } else {
                None
            }
        });

        // Called with the stack released; the hook may read signals itself.
        if let Some(hook) = hook {
            hook(channel);
        }
    }

    /// Drain the dependencies recorded by this guard's entry.
    pub fn take_dependencies(&self) -> IndexSet<ChannelId> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            match stack.last_mut() {
                Some(entry) if entry.subscriber_id == self.subscriber_id => {
                    std::mem::take(&mut entry.dependencies)
                }
                _ => IndexSet::new(),
            }
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
        });
    }
}

/// Run `f` without recording any signal reads against the enclosing effect.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _scope = ReactiveContext::enter_untracked();
    f()
}
