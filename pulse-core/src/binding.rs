//! Bindings from signals to external targets.
//!
//! A binding layer (a DOM node, a terminal cell, a widget property) reads the
//! current value once to initialize, then follows changes. [`bind`] does
//! both and returns a [`Binding`] that unsubscribes when dropped, so tying
//! the binding's lifetime to the target's is enough to stop updates.

use crate::reactive::{SignalGet, SignalValue, Subscription};

/// Keeps a target in sync with a signal until dropped.
#[must_use = "dropping a Binding stops the updates immediately"]
#[derive(Debug)]
pub struct Binding {
    subscription: Subscription,
}

impl Binding {
    /// Whether the binding still receives updates.
    pub fn is_bound(&self) -> bool {
        self.subscription.is_subscribed()
    }

    /// Stop updates now.
    pub fn unbind(&self) {
        self.subscription.unsubscribe();
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

/// Apply the current value of `source` to a target, then every new value.
///
/// The initial read is untracked, so binding inside an effect does not make
/// the effect depend on `source`.
pub fn bind<T, S, F>(source: &S, apply: F) -> Binding
where
    T: SignalValue,
    S: SignalGet<T>,
    F: Fn(&T) + Send + Sync + 'static,
{
    apply(&source.get_untracked());
    Binding {
        subscription: source.subscribe(apply),
    }
}

/// Like [`bind`], passing each value through `map` first.
pub fn bind_mapped<T, U, S, M, F>(source: &S, map: M, apply: F) -> Binding
where
    T: SignalValue,
    S: SignalGet<T>,
    M: Fn(&T) -> U + Send + Sync + 'static,
    F: Fn(U) + Send + Sync + 'static,
{
    bind(source, move |value: &T| apply(map(value)))
}
