//! Derived Signal Implementation
//!
//! A Derived signal is a read-only signal whose value is maintained by an
//! owned [`Effect`].
//!
//! # How Derived Signals Work
//!
//! 1. On creation, the computation runs once, untracked, to seed an inner
//!    [`Signal`].
//!
//! 2. An effect then re-runs the computation whenever one of its inputs
//!    changes and writes the result into the inner signal.
//!
//! 3. Because signal writes ignore equal values, a recomputation that yields
//!    the same value does not notify anyone downstream.
//!
//! # Ordering
//!
//! Recomputation is eager and follows dispatch order; there is no
//! topological sort. A derived signal reachable from one root through two
//! paths (a diamond) recomputes once per path and may briefly observe one
//! updated input next to one stale input. The final value is always correct.

use std::fmt::Debug;

use super::context::untracked;
use super::effect::Effect;
use super::error::{ReactiveError, Result};
use super::signal::{Signal, SignalGet, SignalSet, SignalValue, Subscription};
use super::subscriber::ChannelId;

/// A read-only signal computed from other signals.
///
/// # Example
///
/// ```rust,ignore
/// let a = Signal::new(2);
/// let b = Signal::new(3);
/// let sum = Derived::new({
///     let (a, b) = (a.clone(), b.clone());
///     move || a.get() + b.get()
/// })?;
///
/// assert_eq!(sum.get(), 5);
/// a.set(10)?;
/// assert_eq!(sum.get(), 13);
/// ```
#[derive(Clone)]
pub struct Derived<T: SignalValue> {
    signal: Signal<T>,
    effect: Effect,
}

impl<T: SignalValue> Derived<T> {
    /// Create a derived signal from a computation.
    ///
    /// Fails if the first tracked run of the computation fails.
    pub fn new<F>(compute: F) -> Result<Self>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let signal = Signal::new(untracked(&compute));

        let effect = Effect::new({
            let signal = signal.clone();
            move || signal.set(compute())
        })?;

        tracing::debug!(channel = %signal.id(), subscriber = %effect.id(), "derived created");
        Ok(Self { signal, effect })
    }

    /// Get the channel of the inner signal.
    pub fn id(&self) -> ChannelId {
        self.signal.id()
    }

    /// Get the current value, tracking like [`Signal::get`].
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.signal.get_untracked()
    }

    /// Borrow the current value, tracking like [`Signal::get`].
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    /// Register a listener for value changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.signal.subscribe(listener)
    }

    /// Number of handlers on the inner signal's channel.
    pub fn subscriber_count(&self) -> usize {
        self.signal.subscriber_count()
    }

    /// The effect keeping this value current.
    pub fn effect(&self) -> &Effect {
        &self.effect
    }

    /// Stop recomputing. The last value stays readable.
    pub fn dispose(&self) {
        self.effect.cleanup();
    }

    /// Whether the value is still being kept current.
    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }
}

impl<T: SignalValue> SignalGet<T> for Derived<T> {
    fn id(&self) -> ChannelId {
        Derived::id(self)
    }

    fn get(&self) -> T {
        Derived::get(self)
    }

    fn get_untracked(&self) -> T {
        Derived::get_untracked(self)
    }

    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Derived::subscribe(self, listener)
    }
}

impl<T: SignalValue> SignalSet<T> for Derived<T> {
    fn set(&self, _value: T) -> Result<()> {
        Err(ReactiveError::DerivedMutation {
            channel: self.id(),
        })
    }

    fn try_set(&self, _value: Option<T>) -> Result<()> {
        Err(ReactiveError::DerivedMutation {
            channel: self.id(),
        })
    }

    fn channel(&self) -> ChannelId {
        self.id()
    }
}

impl<T: SignalValue> Debug for Derived<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Derived")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .field("effect", &self.effect)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::batch;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn derived_sum_follows_inputs() {
        let a = Signal::new(2);
        let b = Signal::new(3);
        let sum = Derived::new({
            let (a, b) = (a.clone(), b.clone());
            move || a.get() + b.get()
        })
        .unwrap();

        assert_eq!(sum.get(), 5);
        a.set(10).unwrap();
        assert_eq!(sum.get(), 13);
        b.set(-10).unwrap();
        assert_eq!(sum.get(), 0);
    }

    #[test]
    fn derived_rejects_writes() {
        let source = Signal::new(1);
        let doubled = Derived::new({
            let source = source.clone();
            move || source.get() * 2
        })
        .unwrap();

        let result = SignalSet::set(&doubled, 100);
        assert_eq!(
            result,
            Err(ReactiveError::DerivedMutation {
                channel: doubled.id()
            })
        );
        assert!(SignalSet::try_set(&doubled, None).is_err());
        assert_eq!(doubled.get(), 2);
    }

    #[test]
    fn unchanged_result_does_not_notify() {
        let input = Signal::new(2);
        let parity = Derived::new({
            let input = input.clone();
            move || input.get() % 2 == 0
        })
        .unwrap();

        let notified = Arc::new(AtomicI32::new(0));
        let _sub = parity.subscribe({
            let notified = notified.clone();
            move |_| {
                notified.fetch_add(1, Ordering::SeqCst);
            }
        });

        input.set(4).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        input.set(5).unwrap();
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert!(!parity.get());
    }

    #[test]
    fn derived_depends_on_derived() {
        let base = Signal::new(5);
        let doubled = Derived::new({
            let base = base.clone();
            move || base.get() * 2
        })
        .unwrap();
        let plus_ten = Derived::new({
            let doubled = doubled.clone();
            move || doubled.get() + 10
        })
        .unwrap();

        assert_eq!(plus_ten.get(), 20);
        base.set(10).unwrap();
        assert_eq!(doubled.get(), 20);
        assert_eq!(plus_ten.get(), 30);
    }

    #[test]
    fn creation_inside_effect_does_not_leak_reads() {
        let input = Signal::new(1);
        let holder = Signal::new(0);

        let outer = Effect::new({
            let (input, holder) = (input.clone(), holder.clone());
            move || {
                holder.get();
                let derived = Derived::new({
                    let input = input.clone();
                    move || input.get()
                })?;
                derived.dispose();
                Ok(())
            }
        })
        .unwrap();

        assert_eq!(outer.dependencies(), vec![holder.id()]);
    }

    #[test]
    fn diamond_recomputes_once_per_path() {
        let root = Signal::new(1);
        let left = Derived::new({
            let root = root.clone();
            move || root.get() + 1
        })
        .unwrap();
        let right = Derived::new({
            let root = root.clone();
            move || root.get() * 2
        })
        .unwrap();

        let computations = Arc::new(AtomicI32::new(0));
        let bottom = Derived::new({
            let (left, right, computations) = (left.clone(), right.clone(), computations.clone());
            move || {
                computations.fetch_add(1, Ordering::SeqCst);
                left.get() + right.get()
            }
        })
        .unwrap();
        assert_eq!(bottom.get(), 4);
        computations.store(0, Ordering::SeqCst);

        batch(|| root.set(5)).unwrap();

        assert_eq!(computations.load(Ordering::SeqCst), 2);
        assert_eq!(bottom.get(), 16);
    }

    #[test]
    fn dispose_freezes_value() {
        let input = Signal::new(1);
        let mirror = Derived::new({
            let input = input.clone();
            move || input.get()
        })
        .unwrap();

        mirror.dispose();
        assert!(!mirror.is_active());
        input.set(2).unwrap();
        assert_eq!(mirror.get(), 1);
    }
}
