//! Document - Arena-backed element tree.
//!
//! Nodes are indices into a single arena owned by the document:
//! - `NodeId` is a copyable handle; identities are never reused
//! - Parent/child links are stored on each node
//! - Attributes keep insertion order
//! - Focus is tracked per document
//! - Mutation observers are called synchronously after every change
//!
//! No `RefCell` borrow is held while observers or event listeners run, so
//! callbacks may freely mutate the document again.
//!
//! A `NodeId` only means something to the document that issued it. Mutators
//! reject ids past the end of the arena with `Error::Hierarchy`; plain
//! accessors panic on them (use `owns` to check first).

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use indexmap::IndexMap;

use super::events::{Event, ListenerRegistry};
use crate::error::{Error, NodeSignature, Result};

// =============================================================================
// Node identity and kind
// =============================================================================

/// Handle to a node inside a [`Document`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    /// Position of the node in the document arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Structural kind of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element,
    Text,
    Comment,
}

impl NodeKind {
    /// The DOM `nodeType` number for this kind.
    pub fn node_type(self) -> u16 {
        match self {
            Self::Element => 1,
            Self::Text => 3,
            Self::Comment => 8,
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Element => "element",
            Self::Text => "text",
            Self::Comment => "comment",
        })
    }
}

// =============================================================================
// Mutation observers
// =============================================================================

bitflags! {
    /// Which kinds of mutation an observer wants to hear about.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MutationKind: u8 {
        const CHILD_LIST = 1 << 0;
        const ATTRIBUTES = 1 << 1;
        const CHARACTER_DATA = 1 << 2;
    }
}

/// A single change to the tree. For child list changes `target` is the parent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mutation {
    pub kind: MutationKind,
    pub target: NodeId,
    pub attribute: Option<String>,
}

/// Callback registered with [`Document::observe`].
pub type MutationCallback = Rc<dyn Fn(&Mutation)>;

/// Handle returned by [`Document::observe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(usize);

struct Observer {
    id: ObserverId,
    mask: MutationKind,
    callback: MutationCallback,
}

// =============================================================================
// Tree storage
// =============================================================================

enum NodeData {
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
    },
    Text(String),
    Comment(String),
}

struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl Node {
    fn kind(&self) -> NodeKind {
        match self.data {
            NodeData::Element { .. } => NodeKind::Element,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Comment(_) => NodeKind::Comment,
        }
    }
}

struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
    focused: Option<NodeId>,
}

impl Tree {
    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    fn check(&self, id: NodeId) -> Result<()> {
        if id.index() >= self.nodes.len() {
            return Err(Error::Hierarchy(format!(
                "{id} does not belong to this document"
            )));
        }
        Ok(())
    }

    fn allocate(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.node(id).parent;
        }
        false
    }

    /// Unlink `child` from its parent, returning the former parent.
    fn detach(&mut self, child: NodeId) -> Option<NodeId> {
        let parent = self.node_mut(child).parent.take()?;
        self.node_mut(parent).children.retain(|&c| c != child);
        Some(parent)
    }
}

pub(super) struct DocumentInner {
    tree: RefCell<Tree>,
    pub(super) listeners: RefCell<ListenerRegistry>,
    observers: RefCell<Vec<Observer>>,
    next_observer: Cell<usize>,
}

/// A shared handle to an element tree.
///
/// Cloning the handle is cheap; all clones see the same tree.
#[derive(Clone)]
pub struct Document {
    pub(super) inner: Rc<DocumentInner>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tree = self.inner.tree.borrow();
        f.debug_struct("Document")
            .field("nodes", &tree.nodes.len())
            .field("focused", &tree.focused)
            .finish()
    }
}

impl Document {
    /// Create an empty document whose root is a `<body>` element.
    pub fn new() -> Self {
        let mut tree = Tree {
            nodes: Vec::new(),
            root: NodeId(0),
            focused: None,
        };
        tree.root = tree.allocate(NodeData::Element {
            tag: "body".to_string(),
            attributes: IndexMap::new(),
        });
        Self {
            inner: Rc::new(DocumentInner {
                tree: RefCell::new(tree),
                listeners: RefCell::new(ListenerRegistry::new()),
                observers: RefCell::new(Vec::new()),
                next_observer: Cell::new(0),
            }),
        }
    }

    /// The root element. Nodes reachable from here are "in the document".
    pub fn root(&self) -> NodeId {
        self.inner.tree.borrow().root
    }

    /// Number of nodes ever allocated by this document.
    pub fn node_count(&self) -> usize {
        self.inner.tree.borrow().nodes.len()
    }

    /// True if `node` could have been issued by this document.
    pub fn owns(&self, node: NodeId) -> bool {
        node.index() < self.node_count()
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Create a detached element. Tag names are stored lowercase.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.inner.tree.borrow_mut().allocate(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: IndexMap::new(),
        })
    }

    /// Create a detached text node.
    pub fn create_text(&self, text: impl Into<String>) -> NodeId {
        self.inner
            .tree
            .borrow_mut()
            .allocate(NodeData::Text(text.into()))
    }

    /// Create a detached comment node.
    pub fn create_comment(&self, text: impl Into<String>) -> NodeId {
        self.inner
            .tree
            .borrow_mut()
            .allocate(NodeData::Comment(text.into()))
    }

    // -------------------------------------------------------------------------
    // Node inspection
    // -------------------------------------------------------------------------

    pub fn kind(&self, node: NodeId) -> NodeKind {
        self.inner.tree.borrow().node(node).kind()
    }

    /// Tag name for elements, `None` otherwise.
    pub fn tag(&self, node: NodeId) -> Option<String> {
        match &self.inner.tree.borrow().node(node).data {
            NodeData::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.owns(node) && self.kind(node) == NodeKind::Element
    }

    /// Kind and tag, as compared when a node is re-rendered.
    pub fn signature(&self, node: NodeId) -> NodeSignature {
        NodeSignature {
            kind: self.kind(node),
            tag: self.tag(node),
        }
    }

    /// Character data of a text or comment node.
    pub fn text(&self, node: NodeId) -> Option<String> {
        match &self.inner.tree.borrow().node(node).data {
            NodeData::Text(text) | NodeData::Comment(text) => Some(text.clone()),
            NodeData::Element { .. } => None,
        }
    }

    /// Concatenated text of a node and all its descendant text nodes.
    pub fn text_content(&self, node: NodeId) -> String {
        let tree = self.inner.tree.borrow();
        let mut out = String::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            let current = tree.node(id);
            match &current.data {
                NodeData::Text(text) => out.push_str(text),
                NodeData::Comment(_) => {}
                NodeData::Element { .. } => stack.extend(current.children.iter().rev()),
            }
        }
        out
    }

    /// Replace the character data of a text or comment node.
    pub fn set_text(&self, node: NodeId, text: impl Into<String>) -> Result<()> {
        {
            let mut tree = self.inner.tree.borrow_mut();
            tree.check(node)?;
            match &mut tree.node_mut(node).data {
                NodeData::Text(current) | NodeData::Comment(current) => *current = text.into(),
                NodeData::Element { .. } => {
                    return Err(Error::Hierarchy(format!(
                        "{node} is an element and has no character data"
                    )));
                }
            }
        }
        self.notify(Mutation {
            kind: MutationKind::CHARACTER_DATA,
            target: node,
            attribute: None,
        });
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Tree navigation
    // -------------------------------------------------------------------------

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.inner.tree.borrow().node(node).parent
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.inner.tree.borrow().node(node).children.clone()
    }

    pub fn child_count(&self, node: NodeId) -> usize {
        self.inner.tree.borrow().node(node).children.len()
    }

    pub fn child_at(&self, node: NodeId, index: usize) -> Option<NodeId> {
        self.inner.tree.borrow().node(node).children.get(index).copied()
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.child_at(node, 0)
    }

    /// Position of `child` among its parent's children.
    pub fn index_in_parent(&self, child: NodeId) -> Option<usize> {
        let tree = self.inner.tree.borrow();
        let parent = tree.node(child).parent?;
        tree.node(parent).children.iter().position(|&c| c == child)
    }

    /// True if `node` is `ancestor` or one of its descendants.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.inner.tree.borrow().contains(ancestor, node)
    }

    /// True if the node is reachable from the document root.
    pub fn is_connected(&self, node: NodeId) -> bool {
        let tree = self.inner.tree.borrow();
        tree.contains(tree.root, node)
    }

    /// `node` and all its descendants in document (pre-)order.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let tree = self.inner.tree.borrow();
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(tree.node(id).children.iter().rev());
        }
        out
    }

    // -------------------------------------------------------------------------
    // Tree mutation
    // -------------------------------------------------------------------------

    /// Append `child` as the last child of `parent`, moving it if it is
    /// already attached elsewhere.
    pub fn append_child(&self, parent: NodeId, child: NodeId) -> Result<()> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` into `parent` before `reference` (or at the end when
    /// `reference` is `None`), moving it if it is already attached.
    pub fn insert_before(
        &self,
        parent: NodeId,
        child: NodeId,
        reference: Option<NodeId>,
    ) -> Result<()> {
        let old_parent = {
            let mut tree = self.inner.tree.borrow_mut();
            for id in [Some(parent), Some(child), reference].into_iter().flatten() {
                tree.check(id)?;
            }
            if tree.node(parent).kind() != NodeKind::Element {
                return Err(Error::Hierarchy(format!(
                    "{parent} is not an element and can't have children"
                )));
            }
            if child == tree.root {
                return Err(Error::Hierarchy("the root can't be moved".to_string()));
            }
            if tree.contains(child, parent) {
                return Err(Error::Hierarchy(format!(
                    "inserting {child} into {parent} would create a cycle"
                )));
            }
            let reference = match reference {
                Some(r) if r == child => tree
                    .node(parent)
                    .children
                    .iter()
                    .skip_while(|&&c| c != child)
                    .nth(1)
                    .copied(),
                other => other,
            };
            if let Some(r) = reference {
                if tree.node(r).parent != Some(parent) {
                    return Err(Error::NotAChild { parent, child: r });
                }
            }

            let old_parent = tree.detach(child);
            let position = match reference {
                Some(r) => tree
                    .node(parent)
                    .children
                    .iter()
                    .position(|&c| c == r)
                    .unwrap_or(tree.node(parent).children.len()),
                None => tree.node(parent).children.len(),
            };
            tree.node_mut(parent).children.insert(position, child);
            tree.node_mut(child).parent = Some(parent);
            old_parent
        };

        if let Some(old) = old_parent.filter(|&old| old != parent) {
            self.notify_child_list(old);
        }
        self.notify_child_list(parent);
        self.settle_focus();
        Ok(())
    }

    /// Insert `child` so that it ends up at `index` among `parent`'s children.
    /// `index == child_count` appends.
    pub fn insert_at(&self, parent: NodeId, child: NodeId, index: usize) -> Result<()> {
        self.inner.tree.borrow().check(parent)?;
        let len = self.child_count(parent);
        if index > len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        let reference = self.child_at(parent, index);
        self.insert_before(parent, child, reference)
    }

    /// Detach `child` from `parent`. Blurs the focused node if it was inside
    /// the removed subtree.
    pub fn remove_child(&self, parent: NodeId, child: NodeId) -> Result<NodeId> {
        {
            let mut tree = self.inner.tree.borrow_mut();
            tree.check(parent)?;
            tree.check(child)?;
            if tree.node(child).parent != Some(parent) {
                return Err(Error::NotAChild { parent, child });
            }
            tree.detach(child);
        }
        self.notify_child_list(parent);
        self.settle_focus();
        Ok(child)
    }

    /// Detach a node from wherever it is attached.
    pub fn detach(&self, node: NodeId) -> Result<()> {
        self.inner.tree.borrow().check(node)?;
        match self.parent(node) {
            Some(parent) => self.remove_child(parent, node).map(|_| ()),
            None => Ok(()),
        }
    }

    // -------------------------------------------------------------------------
    // Attributes
    // -------------------------------------------------------------------------

    /// All attributes of an element, in insertion order.
    pub fn attributes(&self, node: NodeId) -> Vec<(String, String)> {
        match &self.inner.tree.borrow().node(node).data {
            NodeData::Element { attributes, .. } => attributes
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn first_attribute_name(&self, node: NodeId) -> Option<String> {
        match &self.inner.tree.borrow().node(node).data {
            NodeData::Element { attributes, .. } => {
                attributes.first().map(|(name, _)| name.clone())
            }
            _ => None,
        }
    }

    pub fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.inner.tree.borrow().node(node).data {
            NodeData::Element { attributes, .. } => attributes.get(name).cloned(),
            _ => None,
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.get_attribute(node, name).is_some()
    }

    /// True if the element's `class` attribute contains `class`.
    pub fn has_class(&self, node: NodeId, class: &str) -> bool {
        self.get_attribute(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
    }

    pub fn set_attribute(&self, node: NodeId, name: &str, value: impl Into<String>) -> Result<()> {
        let name = name.to_ascii_lowercase();
        {
            let mut tree = self.inner.tree.borrow_mut();
            tree.check(node)?;
            match &mut tree.node_mut(node).data {
                NodeData::Element { attributes, .. } => {
                    attributes.insert(name.clone(), value.into());
                }
                _ => {
                    return Err(Error::Hierarchy(format!(
                        "{node} is not an element and can't have attributes"
                    )));
                }
            }
        }
        self.notify(Mutation {
            kind: MutationKind::ATTRIBUTES,
            target: node,
            attribute: Some(name),
        });
        Ok(())
    }

    /// Remove an attribute. Returns whether it was present.
    pub fn remove_attribute(&self, node: NodeId, name: &str) -> bool {
        let removed = {
            let mut tree = self.inner.tree.borrow_mut();
            if tree.check(node).is_err() {
                return false;
            }
            match &mut tree.node_mut(node).data {
                NodeData::Element { attributes, .. } => attributes.shift_remove(name).is_some(),
                _ => false,
            }
        };
        if removed {
            self.notify(Mutation {
                kind: MutationKind::ATTRIBUTES,
                target: node,
                attribute: Some(name.to_string()),
            });
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Focus
    // -------------------------------------------------------------------------

    /// The currently focused node, if any.
    pub fn focused(&self) -> Option<NodeId> {
        self.inner.tree.borrow().focused
    }

    /// Move focus to a connected element.
    ///
    /// Dispatches `blur` on the previously focused node and `focus` on the new
    /// one. Returns false if the node can't take focus.
    pub fn focus(&self, node: NodeId) -> bool {
        if !self.is_element(node) || !self.is_connected(node) {
            return false;
        }
        let previous = self.focused();
        if previous == Some(node) {
            return true;
        }
        self.inner.tree.borrow_mut().focused = Some(node);
        if let Some(previous) = previous {
            self.dispatch_event(previous, "blur");
        }
        self.dispatch_event(node, "focus");
        true
    }

    /// Clear focus, dispatching `blur` on the node that had it.
    pub fn blur(&self) {
        let previous = self.inner.tree.borrow_mut().focused.take();
        if let Some(previous) = previous {
            self.dispatch_event(previous, "blur");
        }
    }

    /// Drop focus from a node that is no longer in the document.
    fn settle_focus(&self) {
        let lost = {
            let mut tree = self.inner.tree.borrow_mut();
            match tree.focused {
                Some(focused) if !tree.contains(tree.root, focused) => tree.focused.take(),
                _ => None,
            }
        };
        if let Some(node) = lost {
            tracing::trace!(%node, "focused node left the document");
            self.dispatch_event(node, "blur");
        }
    }

    // -------------------------------------------------------------------------
    // Observers
    // -------------------------------------------------------------------------

    /// Call `callback` synchronously after every mutation matching `mask`.
    pub fn observe(&self, mask: MutationKind, callback: impl Fn(&Mutation) + 'static) -> ObserverId {
        let id = ObserverId(self.inner.next_observer.get());
        self.inner.next_observer.set(id.0 + 1);
        self.inner.observers.borrow_mut().push(Observer {
            id,
            mask,
            callback: Rc::new(callback),
        });
        id
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.inner.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|o| o.id != id);
        observers.len() != before
    }

    fn notify_child_list(&self, parent: NodeId) {
        self.notify(Mutation {
            kind: MutationKind::CHILD_LIST,
            target: parent,
            attribute: None,
        });
    }

    fn notify(&self, mutation: Mutation) {
        let callbacks: Vec<MutationCallback> = self
            .inner
            .observers
            .borrow()
            .iter()
            .filter(|o| o.mask.intersects(mutation.kind))
            .map(|o| Rc::clone(&o.callback))
            .collect();
        for callback in callbacks {
            callback(&mutation);
        }
    }

    /// Dispatch a bubbling event of `event_type` at `target`.
    ///
    /// Returns the number of listener invocations.
    pub fn dispatch_event(&self, target: NodeId, event_type: &str) -> usize {
        let path = {
            let tree = self.inner.tree.borrow();
            let mut path = Vec::new();
            let mut current = Some(target);
            while let Some(id) = current {
                path.push(id);
                current = tree.node(id).parent;
            }
            path
        };
        let event = Event::new(event_type, target);
        self.dispatch_along(&event, &path)
    }
}

// =============================================================================
// TESTS
// =============================================================================
