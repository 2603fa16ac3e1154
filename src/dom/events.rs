//! Event listeners - Registry and bubbling dispatch.
//!
//! Listeners are registered per node and event type. A listener is either:
//! - direct: fires for events reaching its node
//! - delegated: fires once per node between the event target and its own
//!   node (exclusive) that matches a selector, so descendants inserted later
//!   are covered too
//!
//! Dispatch bubbles from the target up to the topmost ancestor. Handlers are
//! cloned out of the registry before they run.

use std::collections::HashMap;
use std::rc::Rc;

use super::document::{Document, NodeId};
use super::selector::Selector;

// =============================================================================
// TYPES
// =============================================================================

/// A dispatched event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    /// Event type, e.g. `"click"`.
    pub event_type: String,
    /// The node the event was dispatched at.
    pub target: NodeId,
    /// The node whose listener (or delegated match) is being invoked.
    pub current_target: NodeId,
}

impl Event {
    pub fn new(event_type: &str, target: NodeId) -> Self {
        Self {
            event_type: event_type.to_string(),
            target,
            current_target: target,
        }
    }

    fn at(&self, current_target: NodeId) -> Self {
        Self {
            current_target,
            ..self.clone()
        }
    }
}

/// Listener callback.
pub type Listener = Rc<dyn Fn(&Event)>;

/// Handle for removing a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

// =============================================================================
// HANDLER REGISTRY
// =============================================================================

struct Registration {
    id: ListenerId,
    event_type: String,
    selector: Option<Selector>,
    callback: Listener,
}

pub(super) struct ListenerRegistry {
    by_node: HashMap<NodeId, Vec<Registration>>,
    next_id: usize,
}

impl ListenerRegistry {
    pub(super) fn new() -> Self {
        Self {
            by_node: HashMap::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        id
    }
}

// =============================================================================
// PUBLIC API
// =============================================================================

impl Document {
    /// Listen for `event_type` on `node` itself (and bubbling from below).
    pub fn add_event_listener<F>(&self, node: NodeId, event_type: &str, callback: F) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.register(node, event_type, None, Rc::new(callback))
    }

    /// Listen for `event_type` on descendants of `node` matching `selector`.
    pub fn add_delegated_listener<F>(
        &self,
        node: NodeId,
        event_type: &str,
        selector: Selector,
        callback: F,
    ) -> ListenerId
    where
        F: Fn(&Event) + 'static,
    {
        self.register(node, event_type, Some(selector), Rc::new(callback))
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_event_listener(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.listeners.borrow_mut();
        let mut removed = false;
        registry.by_node.retain(|_, registrations| {
            let before = registrations.len();
            registrations.retain(|r| r.id != id);
            removed |= registrations.len() != before;
            !registrations.is_empty()
        });
        removed
    }

    /// Number of listeners registered directly on `node`.
    pub fn listener_count(&self, node: NodeId) -> usize {
        self.inner
            .listeners
            .borrow()
            .by_node
            .get(&node)
            .map_or(0, Vec::len)
    }

    fn register(
        &self,
        node: NodeId,
        event_type: &str,
        selector: Option<Selector>,
        callback: Listener,
    ) -> ListenerId {
        let mut registry = self.inner.listeners.borrow_mut();
        let id = registry.next_id();
        registry.by_node.entry(node).or_default().push(Registration {
            id,
            event_type: event_type.to_string(),
            selector,
            callback,
        });
        id
    }

    // =========================================================================
    // EVENT DISPATCH
    // =========================================================================

    /// Walk `path` (target first) invoking matching listeners.
    pub(super) fn dispatch_along(&self, event: &Event, path: &[NodeId]) -> usize {
        let mut invocations = 0;
        for (depth, &current) in path.iter().enumerate() {
            let matching: Vec<(Option<Selector>, Listener)> = {
                let registry = self.inner.listeners.borrow();
                match registry.by_node.get(&current) {
                    Some(registrations) => registrations
                        .iter()
                        .filter(|r| r.event_type == event.event_type)
                        .map(|r| (r.selector.clone(), Rc::clone(&r.callback)))
                        .collect(),
                    None => continue,
                }
            };

            for (selector, callback) in matching {
                match selector {
                    None => {
                        callback(&event.at(current));
                        invocations += 1;
                    }
                    Some(selector) => {
                        // Nodes strictly between the target and `current`
                        for &candidate in &path[..depth] {
                            if selector.matches(self, candidate) {
                                callback(&event.at(candidate));
                                invocations += 1;
                            }
                        }
                    }
                }
            }
        }
        invocations
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn setup() -> (Document, NodeId, NodeId, NodeId) {
        let doc = Document::new();
        let list = doc.create_element("ul");
        let item = doc.create_element("li");
        let label = doc.create_element("span");
        doc.append_child(doc.root(), list).unwrap();
        doc.append_child(list, item).unwrap();
        doc.append_child(item, label).unwrap();
        doc.set_attribute(item, "class", "item").unwrap();
        (doc, list, item, label)
    }

    #[test]
    fn test_direct_listener_bubbles() {
        let (doc, list, _item, label) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        doc.add_event_listener(list, "click", move |e| {
            seen_clone.borrow_mut().push((e.target, e.current_target));
        });

        assert_eq!(doc.dispatch_event(label, "click"), 1);
        assert_eq!(*seen.borrow(), vec![(label, list)]);

        // Other event types are ignored
        assert_eq!(doc.dispatch_event(label, "keydown"), 0);
    }

    #[test]
    fn test_delegated_listener_matches_between_target_and_root() {
        let (doc, list, item, label) = setup();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = seen.clone();
        doc.add_delegated_listener(list, "click", Selector::parse(".item").unwrap(), move |e| {
            seen_clone.borrow_mut().push(e.current_target);
        });

        doc.dispatch_event(label, "click");
        assert_eq!(*seen.borrow(), vec![item]);

        // Clicking the delegating node itself does not match
        doc.dispatch_event(list, "click");
        assert_eq!(seen.borrow().len(), 1);

        // Descendants added after binding are covered
        let late = doc.create_element("li");
        doc.set_attribute(late, "class", "item").unwrap();
        doc.append_child(list, late).unwrap();
        doc.dispatch_event(late, "click");
        assert_eq!(*seen.borrow(), vec![item, late]);
    }

    #[test]
    fn test_remove_listener() {
        let (doc, list, _item, label) = setup();
        let id = doc.add_event_listener(list, "click", |_| {});
        assert_eq!(doc.listener_count(list), 1);
        assert!(doc.remove_event_listener(id));
        assert!(!doc.remove_event_listener(id));
        assert_eq!(doc.dispatch_event(label, "click"), 0);
    }
}
