//! Focus Manager - Deferred focus requests.
//!
//! `request_focus(selector)` records a focus goal. The goal is tried
//! immediately and again after every live update, until some connected
//! element matches it:
//!
//! - At most one goal is pending; a new request replaces the old one
//! - The first match in document order gets focus and the goal is cleared
//! - No match leaves the goal pending
//!
//! # Example
//!
//! ```ignore
//! ui.focus("#todo-input")?;     // not rendered yet: stays pending
//! ui.render_list(...)?;         // retried after each item is added
//! assert!(ui.focus_manager().pending().is_none());
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;

use crate::dom::{Document, Selector};
use crate::error::Result;

pub struct FocusManager {
    doc: Document,
    focus_on_request: bool,
    goal: RefCell<Option<Selector>>,
    /// Bumped on every request so a retry can tell if its goal was replaced
    /// while focus listeners ran.
    generation: Cell<u64>,
}

impl fmt::Debug for FocusManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FocusManager")
            .field("goal", &*self.goal.borrow())
            .field("focus_on_request", &self.focus_on_request)
            .finish()
    }
}

impl FocusManager {
    pub fn new(doc: Document) -> Self {
        Self::with_options(doc, true)
    }

    /// `focus_on_request: false` only records goals; they are tried on the
    /// next [`retry_focus`](Self::retry_focus).
    pub fn with_options(doc: Document, focus_on_request: bool) -> Self {
        Self {
            doc,
            focus_on_request,
            goal: RefCell::new(None),
            generation: Cell::new(0),
        }
    }

    /// Replace the focus goal and try it.
    ///
    /// Returns whether focus moved now. Invalid selectors are rejected and
    /// leave the previous goal in place.
    pub fn request_focus(&self, selector: &str) -> Result<bool> {
        let selector = Selector::parse(selector)?;
        tracing::debug!(%selector, "focus requested");
        *self.goal.borrow_mut() = Some(selector);
        self.generation.set(self.generation.get() + 1);
        if self.focus_on_request {
            Ok(self.retry_focus())
        } else {
            Ok(false)
        }
    }

    /// Focus the first connected match of the pending goal, if any.
    pub fn retry_focus(&self) -> bool {
        let Some(selector) = self.goal.borrow().clone() else {
            return false;
        };
        let Some(target) = self.doc.query_selector(&selector) else {
            return false;
        };
        let generation = self.generation.get();
        if !self.doc.focus(target) {
            return false;
        }
        // A focus listener may have asked for something else meanwhile
        if self.generation.get() == generation {
            self.goal.borrow_mut().take();
        }
        tracing::debug!(%selector, node = %target, "focus goal reached");
        true
    }

    /// The pending goal, if any.
    pub fn pending(&self) -> Option<String> {
        self.goal.borrow().as_ref().map(|s| s.as_str().to_string())
    }

    /// Drop the pending goal.
    pub fn reset(&self) {
        self.goal.borrow_mut().take();
    }
}

// =============================================================================
// TESTS
// =============================================================================
