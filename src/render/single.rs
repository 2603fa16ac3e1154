//! Single-Render Engine - Keeps one template's output live.
//!
//! ```text
//! first run:   capture(evaluate) -> output, bind events to every node
//! invalidate:  capture(evaluate) -> next          (re-subscribes first)
//!              check_shape(output, next)          (nothing mutated on error)
//!              patch(output[i] <- next[i])        (identity preserved)
//!              retry focus
//! ```
//!
//! The output's shape (single vs. sequence, length, kind and tag of every
//! node) is fixed by the first run. A later run that differs is reported to
//! whoever wrote the reactive value that triggered it, and the previous
//! output stays in place.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::focus::FocusManager;
use super::output::{Output, check_shape};
use super::patch::Patcher;
use super::template::PreparedTemplate;
use crate::dom::{Document, NodeId};
use crate::error::{Error, Result};
use crate::reactive::{DependencyTracker, Invalidate, capture_dependencies};

struct LiveRender {
    doc: Document,
    tracker: Rc<dyn DependencyTracker>,
    patcher: Rc<Patcher>,
    focus: Rc<FocusManager>,
    template: PreparedTemplate,
    output: RefCell<Option<Output>>,
    recomputes: Cell<usize>,
}

impl LiveRender {
    /// Evaluate under dependency capture, then install or patch the result.
    fn update(self: &Rc<Self>) -> Result<()> {
        let this = Rc::clone(self);
        let on_invalidate: Invalidate = Box::new(move || this.update());
        let next = capture_dependencies(
            &*self.tracker,
            || self.template.evaluate(&self.doc, &()),
            on_invalidate,
        )??;
        if next.is_empty() {
            return Err(Error::contract("a render function must produce at least one node"));
        }

        let previous = self.output.borrow().clone();
        let Some(previous) = previous else {
            *self.output.borrow_mut() = Some(next);
            return Ok(());
        };

        let count = self.recomputes.get() + 1;
        self.recomputes.set(count);
        tracing::debug!(recompute = count, shape = %previous.shape(), "re-rendering");

        check_shape(&self.doc, &previous, &next)?;
        for (&old, &new) in previous.nodes().iter().zip(next.nodes()) {
            self.patcher.patch(old, new)?;
        }
        self.focus.retry_focus();
        Ok(())
    }
}

/// A live render started by [`Ui::render`](crate::Ui::render).
///
/// The output nodes keep their identity for the render's whole lifetime;
/// re-renders only change their contents.
#[derive(Clone)]
pub struct RenderHandle {
    inner: Rc<LiveRender>,
}

impl fmt::Debug for RenderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderHandle")
            .field("output", &*self.inner.output.borrow())
            .field("recomputes", &self.inner.recomputes.get())
            .finish()
    }
}

impl RenderHandle {
    /// Run the first evaluation and subscribe to its dependencies.
    pub(crate) fn start(
        doc: Document,
        tracker: Rc<dyn DependencyTracker>,
        patcher: Rc<Patcher>,
        focus: Rc<FocusManager>,
        template: PreparedTemplate,
    ) -> Result<Self> {
        let inner = Rc::new(LiveRender {
            doc,
            tracker,
            patcher,
            focus,
            template,
            output: RefCell::new(None),
            recomputes: Cell::new(0),
        });
        inner.update()?;
        Ok(Self { inner })
    }

    /// The current output. Its nodes never change identity.
    pub fn output(&self) -> Output {
        self.inner
            .output
            .borrow()
            .clone()
            .unwrap_or(Output::Sequence(Vec::new()))
    }

    /// The output node, when the render produces a single node.
    pub fn node(&self) -> Option<NodeId> {
        match &*self.inner.output.borrow() {
            Some(Output::Single(node)) => Some(*node),
            _ => None,
        }
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        self.output().nodes().to_vec()
    }

    /// How many times the output has been re-rendered after the first run.
    pub fn recompute_count(&self) -> usize {
        self.inner.recomputes.get()
    }
}
