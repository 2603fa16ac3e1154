//! Dependency tracking - The capability live renders are built on.
//!
//! The renderer only needs one operation from its reactive layer:
//!
//! ```text
//! capture(compute, on_invalidate)
//!   - runs `compute` once, recording every reactive read
//!   - calls `on_invalidate` exactly once, the first time a recorded value changes
//!   - nested captures inside `compute` do not leak their reads outward
//! ```
//!
//! [`DependencyTracker`] expresses that as a trait so it can be swapped out.
//! [`Tracker`] and [`Var`] implement it on `spark_signals` effects and signals.

mod tracker;

pub use tracker::{Tracker, Var};

use crate::error::{Error, Result};

/// Callback fired when a captured computation's inputs change.
///
/// Errors returned here propagate to whoever wrote the reactive value.
pub type Invalidate = Box<dyn FnOnce() -> Result<()>>;

/// A fine-grained dependency tracker.
pub trait DependencyTracker {
    /// Run `compute`, recording its reads, and arrange for `on_invalidate`
    /// to be called once when any of them changes.
    fn capture(&self, compute: &mut dyn FnMut(), on_invalidate: Invalidate);
}

/// Typed wrapper over [`DependencyTracker::capture`].
pub fn capture_dependencies<T>(
    tracker: &dyn DependencyTracker,
    compute: impl FnOnce() -> T,
    on_invalidate: Invalidate,
) -> Result<T> {
    let mut compute = Some(compute);
    let mut result = None;
    {
        let mut run = || {
            if let Some(compute) = compute.take() {
                result = Some(compute());
            }
        };
        tracker.capture(&mut run, on_invalidate);
    }
    result.ok_or_else(|| Error::contract("dependency tracker did not run the computation"))
}
