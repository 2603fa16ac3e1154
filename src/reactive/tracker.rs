//! Tracker - Capture/invalidate-once semantics on top of spark-signals.
//!
//! - `Var<T>` is a `spark_signals::Signal<T>`; reads register with the innermost capture
//! - Each capture is a spark effect that never re-runs its computation:
//!   the first re-trigger queues `on_invalidate` and drops the effect
//! - Queued callbacks run after the write returns, outside any effect,
//!   so their errors can reach the writer
//! - Writes fire synchronously unless inside `batch`; equal writes are ignored

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use spark_signals::constants::{CLEAN, EFFECT, EFFECT_RAN, REACTION_IS_UPDATING, USER_EFFECT};
use spark_signals::{
    AnyReaction, AnySource, EffectInner, Signal, is_batching, set_signal_status, untrack,
    with_context,
};

use super::{DependencyTracker, Invalidate};
use crate::error::Result;

thread_local! {
    /// Callbacks whose capture was re-triggered, waiting for the writer to run them.
    static FIRED: RefCell<Vec<Invalidate>> = const { RefCell::new(Vec::new()) };
}

#[derive(Default)]
struct TrackerState {
    /// Effects still waiting for their first change. Sources only hold weak
    /// references, so removing an entry disposes the effect.
    armed: HashMap<u64, Rc<EffectInner>>,
    next_capture: u64,
}

/// Shared handle to a dependency tracker. Clones share state.
#[derive(Clone, Default)]
pub struct Tracker {
    state: Rc<RefCell<TrackerState>>,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a reactive value.
    pub fn var<T: Clone + PartialEq + 'static>(&self, value: T) -> Var<T> {
        Var::new(value)
    }

    /// Number of live (not yet fired) subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.borrow().armed.len()
    }

    /// Defer invalidations until `f` (and any enclosing batch) returns.
    ///
    /// Returns `f`'s value, or the first error raised by a deferred callback.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> Result<R> {
        let value = spark_signals::batch(f);
        run_fired()?;
        Ok(value)
    }

    /// The effect body only runs on re-trigger: it disarms and queues the callback.
    fn arm(&self, on_invalidate: Invalidate) -> (u64, Rc<EffectInner>) {
        let id = {
            let mut state = self.state.borrow_mut();
            state.next_capture += 1;
            state.next_capture
        };
        let state = Rc::downgrade(&self.state);
        let mut pending = Some(on_invalidate);
        let effect = EffectInner::new(
            EFFECT | USER_EFFECT,
            Some(Box::new(move || {
                if let Some(on_invalidate) = pending.take() {
                    disarm(&state, id);
                    FIRED.with(|fired| fired.borrow_mut().push(on_invalidate));
                }
                None
            })),
        );
        (id, effect)
    }
}

fn disarm(state: &Weak<RefCell<TrackerState>>, id: u64) {
    if let Some(state) = state.upgrade() {
        // The flush that fired us still holds the effect, so this is not the last Rc
        state.borrow_mut().armed.remove(&id);
    }
}

/// Run the callbacks fired so far, returning the first error and logging the rest.
///
/// Inside a batch nothing runs; the outermost batch drains on exit.
fn run_fired() -> Result<()> {
    if is_batching() {
        return Ok(());
    }
    let fired = FIRED.with(|fired| std::mem::take(&mut *fired.borrow_mut()));
    if fired.is_empty() {
        return Ok(());
    }
    tracing::trace!(count = fired.len(), "firing invalidations");
    let mut first_error = None;
    for on_invalidate in fired {
        if let Err(err) = on_invalidate() {
            if first_error.is_none() {
                first_error = Some(err);
            } else {
                tracing::error!(error = %err, "invalidation callback failed");
            }
        }
    }
    first_error.map_or(Ok(()), Err)
}

// =============================================================================
// Capture frame
// =============================================================================

/// Makes an effect the active reaction while a computation runs.
///
/// The enclosing capture's collected reads are set aside and restored on
/// exit, so a nested capture neither steals nor leaks reads.
struct CaptureFrame {
    effect: Rc<EffectInner>,
    saved: Option<SavedContext>,
}

struct SavedContext {
    reaction: Option<Weak<dyn AnyReaction>>,
    effect: Option<Weak<dyn AnyReaction>>,
    reads: Vec<Rc<dyn AnySource>>,
}

impl CaptureFrame {
    fn enter(effect: Rc<EffectInner>) -> Self {
        let weak = effect.as_weak_reaction();
        let saved = with_context(|ctx| {
            let reaction = ctx.set_active_reaction(Some(weak.clone()));
            let outer_effect = ctx.set_active_effect(Some(weak));
            ctx.increment_read_version();
            let reads = ctx.swap_new_deps(Vec::new());
            SavedContext {
                reaction,
                effect: outer_effect,
                reads,
            }
        });
        effect.set_flags(effect.flags() | REACTION_IS_UPDATING);
        Self {
            effect,
            saved: Some(saved),
        }
    }

    /// Restore the enclosing context and return this frame's reads.
    fn restore(&mut self) -> Vec<Rc<dyn AnySource>> {
        let Some(saved) = self.saved.take() else {
            return Vec::new();
        };
        self.effect
            .set_flags((self.effect.flags() & !REACTION_IS_UPDATING) | EFFECT_RAN);
        set_signal_status(&*self.effect, CLEAN);
        with_context(|ctx| {
            ctx.set_active_reaction(saved.reaction);
            ctx.set_active_effect(saved.effect);
            ctx.swap_new_deps(saved.reads)
        })
    }

    fn exit(mut self) -> Vec<Rc<dyn AnySource>> {
        self.restore()
    }
}

impl Drop for CaptureFrame {
    fn drop(&mut self) {
        self.restore();
    }
}

impl DependencyTracker for Tracker {
    fn capture(&self, compute: &mut dyn FnMut(), on_invalidate: Invalidate) {
        let (id, effect) = self.arm(on_invalidate);
        let frame = CaptureFrame::enter(Rc::clone(&effect));
        compute();
        let reads = frame.exit();
        if reads.is_empty() {
            // Nothing to watch, so the callback can never fire
            return;
        }
        let weak = effect.as_weak_reaction();
        for source in reads {
            effect.add_dep(Rc::clone(&source));
            source.add_reaction(weak.clone());
        }
        self.state.borrow_mut().armed.insert(id, effect);
    }
}

// =============================================================================
// Var
// =============================================================================

/// A reactive value. Reads are tracked, writes invalidate readers.
pub struct Var<T> {
    signal: Signal<T>,
}

impl<T: Clone> Clone for Var<T> {
    fn clone(&self) -> Self {
        Self {
            signal: self.signal.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Var<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        untrack(|| self.signal.with(|value| f.debug_tuple("Var").field(value).finish()))
    }
}

impl<T: Clone + PartialEq + 'static> Var<T> {
    pub fn new(value: T) -> Self {
        Self {
            signal: Signal::new(value),
        }
    }

    /// Read the value, registering a dependency with the active capture.
    pub fn get(&self) -> T {
        self.signal.get()
    }

    /// Borrow the value, registering a dependency with the active capture.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.signal.with(f)
    }

    /// Read without registering a dependency.
    pub fn get_untracked(&self) -> T {
        untrack(|| self.signal.get())
    }

    /// Replace the value. Returns the first error raised by a re-render.
    pub fn set(&self, value: T) -> Result<()> {
        if !self.signal.set(value) {
            return Ok(());
        }
        run_fired()
    }

    /// Modify the value in place.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::reactive::capture_dependencies;
    use std::cell::Cell;
    use tracing_test::traced_test;

    fn counter() -> (Rc<Cell<usize>>, impl Fn() -> Invalidate) {
        let fired = Rc::new(Cell::new(0));
        let fired_clone = fired.clone();
        let make = move || -> Invalidate {
            let fired = fired_clone.clone();
            Box::new(move || {
                fired.set(fired.get() + 1);
                Ok(())
            })
        };
        (fired, make)
    }

    #[test]
    fn test_invalidate_fires_once() {
        let tracker = Tracker::new();
        let a = tracker.var(1);
        let (fired, make) = counter();

        let value = capture_dependencies(&tracker, || a.get() * 10, make()).unwrap();
        assert_eq!(value, 10);
        assert_eq!(tracker.subscription_count(), 1);

        a.set(2).unwrap();
        a.set(3).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(tracker.subscription_count(), 0);
    }

    #[test]
    fn test_equal_writes_are_ignored() {
        let tracker = Tracker::new();
        let a = tracker.var("x".to_string());
        let (fired, make) = counter();
        capture_dependencies(&tracker, || a.get(), make()).unwrap();

        a.set("x".to_string()).unwrap();
        assert_eq!(fired.get(), 0);
        a.update(|s| s.push('y')).unwrap();
        assert_eq!(fired.get(), 1);
        assert_eq!(a.get_untracked(), "xy");
    }

    #[test]
    fn test_nested_capture_is_fenced() {
        let tracker = Tracker::new();
        let outer_var = tracker.var(0);
        let inner_var = tracker.var(0);
        let (outer_fired, make_outer) = counter();
        let (inner_fired, make_inner) = counter();

        capture_dependencies(
            &tracker,
            || {
                outer_var.get();
                capture_dependencies(&tracker, || inner_var.get(), make_inner()).unwrap();
            },
            make_outer(),
        )
        .unwrap();
        assert_eq!(tracker.subscription_count(), 2);

        inner_var.set(1).unwrap();
        assert_eq!(inner_fired.get(), 1);
        assert_eq!(outer_fired.get(), 0);

        outer_var.set(1).unwrap();
        assert_eq!(outer_fired.get(), 1);
        assert_eq!(tracker.subscription_count(), 0);
    }

    #[test]
    fn test_reads_after_a_nested_capture_still_count() {
        let tracker = Tracker::new();
        let late = tracker.var(0);
        let (fired, make) = counter();
        let (_inner, make_inner) = counter();

        capture_dependencies(
            &tracker,
            || {
                capture_dependencies(&tracker, || (), make_inner()).unwrap();
                late.get();
            },
            make(),
        )
        .unwrap();

        late.set(1).unwrap();
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_untracked_reads_do_not_subscribe() {
        let tracker = Tracker::new();
        let a = tracker.var(1);
        let (_fired, make) = counter();
        capture_dependencies(&tracker, || a.get_untracked(), make()).unwrap();
        assert_eq!(tracker.subscription_count(), 0);
    }

    #[test]
    fn test_batch_defers_until_end() {
        let tracker = Tracker::new();
        let a = tracker.var(0);
        let b = tracker.var(0);
        let (fired, make) = counter();
        capture_dependencies(&tracker, || a.get() + b.get(), make()).unwrap();

        let value = tracker
            .batch(|| {
                a.set(1).unwrap();
                b.set(1).unwrap();
                assert_eq!(fired.get(), 0);
                "done"
            })
            .unwrap();
        assert_eq!(value, "done");
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_recapture_inside_callback() {
        let tracker = Tracker::new();
        let a = tracker.var(0);
        let runs = Rc::new(Cell::new(0));

        fn watch(tracker: &Tracker, a: &Var<i32>, runs: &Rc<Cell<usize>>) {
            runs.set(runs.get() + 1);
            let on_invalidate: Invalidate = {
                let (tracker, a, runs) = (tracker.clone(), a.clone(), runs.clone());
                Box::new(move || {
                    watch(&tracker, &a, &runs);
                    Ok(())
                })
            };
            capture_dependencies(tracker, || a.get(), on_invalidate).unwrap();
        }

        watch(&tracker, &a, &runs);
        a.set(1).unwrap();
        a.set(2).unwrap();
        assert_eq!(runs.get(), 3);
        assert_eq!(tracker.subscription_count(), 1);
    }

    #[test]
    fn test_errors_propagate_to_writer() {
        let tracker = Tracker::new();
        let a = tracker.var(0);
        capture_dependencies(
            &tracker,
            || a.get(),
            Box::new(|| Err::<(), _>(Error::contract("boom"))),
        )
        .unwrap();

        assert_eq!(a.set(1), Err(Error::contract("boom")));
    }

    #[test]
    #[traced_test]
    fn test_later_errors_are_logged() {
        let tracker = Tracker::new();
        let a = tracker.var(0);
        for message in ["first", "second"] {
            capture_dependencies(
                &tracker,
                || a.get(),
                Box::new(move || Err::<(), _>(Error::contract(message))),
            )
            .unwrap();
        }

        // One error goes back to the writer, the other is only logged
        assert!(matches!(a.set(1), Err(Error::ContractViolation(_))));
        assert!(logs_contain("invalidation callback failed"));
    }
}
