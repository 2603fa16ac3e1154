//! Patcher - Merges a freshly rendered node onto an existing one in place.
//!
//! Merging keeps the old node's identity (and therefore its listeners and
//! focus) and transfers everything else from the new node:
//!
//! ```text
//! text / comment:  old.text = new.text
//! element:         old.children  = []            (may blur -> reentrancy)
//!                  old.children  = new.children  (moved, in order)
//!                  old.attrs     = {}
//!                  old.attrs     = new.attrs
//! ```
//!
//! # Reentrancy
//!
//! Removing children can blur a focused node, and a `blur` listener can
//! write reactive state that triggers another patch while the first is
//! half done. The patcher therefore owns a FIFO queue. The first caller
//! becomes the drainer and processes requests (its own and any queued
//! behind it) in batches until the queue is empty; nested callers just
//! enqueue and return.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use crate::dom::{Document, NodeId, NodeKind};
use crate::error::{Error, Result};

/// Requests taken from the queue per drain batch.
pub const DEFAULT_PATCH_BATCH_SIZE: usize = 10;

/// Counters describing what the patcher has done so far.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchStats {
    /// Pairs merged, successfully or not.
    pub merged: usize,
    /// Requests queued while a merge was already running.
    pub deferred: usize,
    /// Batches taken from the queue.
    pub batches: usize,
}

/// Serializing in-place merger.
pub struct Patcher {
    doc: Document,
    batch_size: usize,
    queue: RefCell<VecDeque<(NodeId, NodeId)>>,
    in_progress: Cell<bool>,
    stats: Cell<PatchStats>,
}

impl fmt::Debug for Patcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patcher")
            .field("batch_size", &self.batch_size)
            .field("pending", &self.pending())
            .field("in_progress", &self.in_progress.get())
            .field("stats", &self.stats.get())
            .finish()
    }
}

/// Clears the in-progress flag when draining ends, including on error.
struct DrainGuard<'a>(&'a Cell<bool>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Patcher {
    pub fn new(doc: Document) -> Self {
        Self::with_batch_size(doc, DEFAULT_PATCH_BATCH_SIZE)
    }

    /// A batch size of zero is treated as one.
    pub fn with_batch_size(doc: Document, batch_size: usize) -> Self {
        Self {
            doc,
            batch_size: batch_size.max(1),
            queue: RefCell::new(VecDeque::new()),
            in_progress: Cell::new(false),
            stats: Cell::new(PatchStats::default()),
        }
    }

    pub fn stats(&self) -> PatchStats {
        self.stats.get()
    }

    /// True while a drain is running further up the stack.
    pub fn is_patching(&self) -> bool {
        self.in_progress.get()
    }

    /// Requests waiting in the queue.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Merge `new` onto `old`, or queue the merge if one is already running.
    ///
    /// The drainer returns the first error raised by any request it
    /// processed; later errors are logged. A queued call returns `Ok(())`
    /// immediately and its outcome is reported by the drainer.
    pub fn patch(&self, old: NodeId, new: NodeId) -> Result<()> {
        self.queue.borrow_mut().push_back((old, new));
        if self.in_progress.get() {
            self.bump(|s| s.deferred += 1);
            tracing::trace!(%old, %new, pending = self.pending(), "patch deferred");
            return Ok(());
        }
        self.in_progress.set(true);
        let _guard = DrainGuard(&self.in_progress);

        let mut first_error = None;
        loop {
            let batch: Vec<(NodeId, NodeId)> = {
                let mut queue = self.queue.borrow_mut();
                let take = queue.len().min(self.batch_size);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }
            self.bump(|s| s.batches += 1);
            for (old, new) in batch {
                self.bump(|s| s.merged += 1);
                if let Err(err) = self.merge(old, new) {
                    if first_error.is_none() {
                        first_error = Some(err);
                    } else {
                        tracing::error!(%old, %new, error = %err, "queued patch failed");
                    }
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn bump(&self, f: impl FnOnce(&mut PatchStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn merge(&self, old: NodeId, new: NodeId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let doc = &self.doc;
        let (old_sig, new_sig) = (doc.signature(old), doc.signature(new));
        if old_sig != new_sig {
            return Err(Error::StructuralMismatch {
                previous: old_sig,
                next: new_sig,
            });
        }
        tracing::trace!(%old, %new, node = %old_sig, "merging");

        if old_sig.kind != NodeKind::Element {
            return doc.set_text(old, doc.text(new).unwrap_or_default());
        }

        while let Some(child) = doc.first_child(old) {
            doc.remove_child(old, child)?;
        }
        while let Some(child) = doc.first_child(new) {
            doc.append_child(old, child)?;
        }
        while let Some(name) = doc.first_attribute_name(old) {
            doc.remove_attribute(old, &name);
        }
        for (name, value) in doc.attributes(new) {
            doc.set_attribute(old, &name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;
    use tracing_test::traced_test;

    fn setup() -> (Document, Rc<Patcher>, NodeId) {
        let doc = Document::new();
        let patcher = Rc::new(Patcher::new(doc.clone()));
        let list = doc.create_element("ul");
        doc.append_child(doc.root(), list).unwrap();
        (doc, patcher, list)
    }

    fn fragment(doc: &Document, markup: &str) -> NodeId {
        doc.parse_fragment(markup).unwrap()[0]
    }

    #[test]
    fn test_merge_element_keeps_identity() {
        let (doc, patcher, list) = setup();
        let old = fragment(&doc, r#"<li class="a" title="t">old <b>x</b></li>"#);
        doc.append_child(list, old).unwrap();
        let new = fragment(&doc, r#"<li data-id="2">new <i>y</i></li>"#);

        patcher.patch(old, new).unwrap();

        assert_eq!(doc.children(list), vec![old]);
        assert_eq!(doc.outer_html(old), r#"<li data-id="2">new <i>y</i></li>"#);
        assert_eq!(doc.child_count(new), 0);
        assert_eq!(patcher.stats().merged, 1);
        assert!(!patcher.is_patching());
    }

    #[test]
    fn test_merge_text_and_comment() {
        let (doc, patcher, _list) = setup();
        let old = doc.create_text("a");
        patcher.patch(old, doc.create_text("b")).unwrap();
        assert_eq!(doc.text(old).as_deref(), Some("b"));

        let old = doc.create_comment("x");
        patcher.patch(old, doc.create_comment("y")).unwrap();
        assert_eq!(doc.text(old).as_deref(), Some("y"));
    }

    #[test]
    fn test_structural_mismatch() {
        let (doc, patcher, _list) = setup();
        let li = doc.create_element("li");
        assert!(matches!(
            patcher.patch(li, doc.create_element("div")),
            Err(Error::StructuralMismatch { .. })
        ));
        assert!(matches!(
            patcher.patch(li, doc.create_text("x")),
            Err(Error::StructuralMismatch { .. })
        ));
        // Flag is cleared after an error
        assert!(!patcher.is_patching());
        patcher.patch(li, doc.create_element("li")).unwrap();
    }

    #[test]
    fn test_reentrant_patch_is_queued() {
        let (doc, patcher, list) = setup();
        let item = fragment(&doc, "<li><input></li>");
        let other = fragment(&doc, "<p>before</p>");
        doc.append_child(list, item).unwrap();
        doc.append_child(list, other).unwrap();
        let input = doc.first_child(item).unwrap();

        let replacement = fragment(&doc, "<p>after</p>");
        let observed = Rc::new(RefCell::new(None));
        {
            let patcher = patcher.clone();
            let doc = doc.clone();
            let observed = observed.clone();
            doc.clone().add_event_listener(input, "blur", move |_| {
                assert!(patcher.is_patching());
                patcher.patch(other, replacement).unwrap();
                // Not applied yet, only queued
                *observed.borrow_mut() = Some(doc.text_content(other));
            });
        }
        assert!(doc.focus(input));

        patcher.patch(item, fragment(&doc, "<li>plain</li>")).unwrap();

        assert_eq!(observed.borrow().as_deref(), Some("before"));
        assert_eq!(doc.text_content(other), "after");
        assert_eq!(
            patcher.stats(),
            PatchStats {
                merged: 2,
                deferred: 1,
                batches: 2,
            }
        );
    }

    #[test]
    #[traced_test]
    fn test_queued_errors_are_logged() {
        let (doc, patcher, list) = setup();
        let a = doc.create_element("li");
        let b = doc.create_element("li");
        let nested = doc.create_element("span");
        doc.append_child(a, nested).unwrap();
        doc.append_child(list, a).unwrap();

        // A child-list observer that issues two bad patches mid-merge
        let observer = {
            let patcher = patcher.clone();
            let doc = doc.clone();
            let fired = Cell::new(false);
            doc.clone().observe(crate::dom::MutationKind::CHILD_LIST, move |_| {
                if !fired.replace(true) {
                    patcher.patch(a, doc.create_text("x")).unwrap();
                    patcher.patch(b, doc.create_element("div")).unwrap();
                }
            })
        };

        let err = patcher.patch(a, doc.create_element("li")).unwrap_err();
        doc.unobserve(observer);
        assert!(err.is_shape_error());
        assert!(logs_contain("queued patch failed"));
        assert_eq!(patcher.pending(), 0);
    }
}
