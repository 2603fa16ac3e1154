//! List Reconciler - Keeps a container's children in step with a live query.
//!
//! The reconciler owns an ordered slot list that mirrors the container:
//!
//! ```text
//! slots:     [ a:<li#4> | b:<li#7> | c:<li#9> ]
//! index:     { a: 0, b: 1, c: 2 }
//! container: <ul> <li#4/> <li#7/> <li#9/> </ul>
//! ```
//!
//! Query notifications are applied to the slots and then to the document:
//!
//! - `added(item, before)`: render the item, insert it at `before`, retry focus
//! - `removed(id, at)`: remove the node at `at`
//! - `changed(item, at)`: render afresh and replace the node at `at`
//! - `moved(item, from, to)`: relocate the node, no re-render
//!
//! Each item renders under its own dependency capture. When its inputs
//! change the item re-renders and replaces itself at whatever index it
//! holds *now*. A rendering replaced by `changed` or dropped by `removed`
//! carries a dead token, so its pending re-render does nothing. The
//! listeners bound to that rendering are removed with it.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use super::events::{EventMap, bind_events};
use super::focus::FocusManager;
use super::output::{IntoOutput, Output};
use super::template::{ItemTemplate, PreparedTemplate, TemplateCompiler, TemplateData};
use crate::dom::{Document, ListenerId, NodeId};
use crate::error::{Error, Result};
use crate::query::{Filter, LiveItem, LiveObserver, LiveQuery, LiveSource, Query, SortFn};
use crate::reactive::{DependencyTracker, Invalidate, capture_dependencies};

// =============================================================================
// OPTIONS
// =============================================================================

/// Builds the node for one item.
pub type ItemRenderFn<T> = Rc<dyn Fn(&Document, &T) -> Result<Output>>;

/// Options for [`Ui::render_list`](crate::Ui::render_list).
///
/// Exactly one of `render` and `template` must be set.
///
/// ```ignore
/// let options = ListOptions::new()
///     .query(|todo: &Value| todo["done"] == false)
///     .sort_by(|a, b| a["title"].as_str().cmp(&b["title"].as_str()))
///     .template(ItemTemplate::new("<li><%= title %></li>"))
///     .events(EventMap::new().on("click .destroy", |todo, _| remove(todo)));
/// ```
pub struct ListOptions<T: LiveItem> {
    /// Which items to show. Defaults to all of them.
    pub query: Option<Filter<T>>,
    /// Display order. Defaults to natural order.
    pub sort: Option<SortFn<T>>,
    pub render: Option<ItemRenderFn<T>>,
    pub template: Option<ItemTemplate<T>>,
    /// Bound to every item node, with the item as event data.
    pub events: EventMap<T>,
}

impl<T: LiveItem> Default for ListOptions<T> {
    fn default() -> Self {
        Self {
            query: None,
            sort: None,
            render: None,
            template: None,
            events: EventMap::default(),
        }
    }
}

impl<T: LiveItem> ListOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, filter: impl Fn(&T) -> bool + 'static) -> Self {
        self.query = Some(Rc::new(filter));
        self
    }

    pub fn sort_by(mut self, sort: impl Fn(&T, &T) -> std::cmp::Ordering + 'static) -> Self {
        self.sort = Some(Rc::new(sort));
        self
    }

    pub fn render<O, F>(mut self, render: F) -> Self
    where
        O: IntoOutput,
        F: Fn(&Document, &T) -> O + 'static,
    {
        self.render = Some(Rc::new(move |doc: &Document, item: &T| {
            Ok(render(doc, item).into_output())
        }));
        self
    }

    pub fn try_render<O, F>(mut self, render: F) -> Self
    where
        O: IntoOutput,
        F: Fn(&Document, &T) -> Result<O> + 'static,
    {
        self.render = Some(Rc::new(move |doc: &Document, item: &T| {
            render(doc, item).map(IntoOutput::into_output)
        }));
        self
    }

    pub fn template(mut self, template: ItemTemplate<T>) -> Self
    where
        T: TemplateData,
    {
        self.template = Some(template);
        self
    }

    pub fn events(mut self, events: EventMap<T>) -> Self {
        self.events = events;
        self
    }
}

/// How items are turned into nodes, once options are validated.
enum ItemRenderer<T> {
    Function(ItemRenderFn<T>),
    Template {
        template: PreparedTemplate,
        data: fn(&T) -> &dyn TemplateData,
    },
}

impl<T: LiveItem> ItemRenderer<T> {
    fn from_options(
        doc: &Document,
        compiler: &dyn TemplateCompiler,
        render: Option<ItemRenderFn<T>>,
        template: Option<ItemTemplate<T>>,
    ) -> Result<Self> {
        match (render, template) {
            (Some(render), None) => Ok(Self::Function(render)),
            (None, Some(item)) => {
                let template = item.template.prepare(doc, compiler)?;
                if !template.is_markup() {
                    return Err(Error::contract(
                        "a list template must be markup; use `render` for functions",
                    ));
                }
                Ok(Self::Template {
                    template,
                    data: item.data,
                })
            }
            (None, None) => Err(Error::contract("render_list requires either `render` or `template`")),
            (Some(_), Some(_)) => Err(Error::contract(
                "render_list takes either `render` or `template`, not both",
            )),
        }
    }

    fn render(&self, doc: &Document, item: &T) -> Result<NodeId> {
        let output = match self {
            Self::Function(render) => render(doc, item)?,
            Self::Template { template, data } => template.evaluate(doc, data(item))?,
        };
        output.single().ok_or_else(|| {
            Error::contract(format!(
                "a list item must render exactly one node, not {}",
                output.shape()
            ))
        })
    }
}

// =============================================================================
// RECONCILER STATE
// =============================================================================

struct Slot<T: LiveItem> {
    id: T::Id,
    node: NodeId,
    /// Cleared when this rendering is superseded.
    token: Rc<Cell<bool>>,
    listeners: Vec<ListenerId>,
}

struct ListState<T: LiveItem> {
    this: Weak<ListState<T>>,
    doc: Document,
    container: NodeId,
    tracker: Rc<dyn DependencyTracker>,
    focus: Rc<FocusManager>,
    renderer: ItemRenderer<T>,
    events: EventMap<T>,
    slots: RefCell<Vec<Slot<T>>>,
    index: RefCell<HashMap<T::Id, usize>>,
    dead: Cell<bool>,
}

impl<T: LiveItem> ListState<T> {
    fn reindex(&self) {
        let slots = self.slots.borrow();
        let mut index = self.index.borrow_mut();
        index.clear();
        index.extend(slots.iter().enumerate().map(|(i, slot)| (slot.id.clone(), i)));
    }

    fn check_index(&self, index: usize, len: usize) -> Result<()> {
        if index >= len {
            return Err(Error::IndexOutOfBounds { index, len });
        }
        Ok(())
    }

    /// Render one item under its own capture and bind its events.
    fn render_item(&self, item: &T) -> Result<Slot<T>> {
        let token = Rc::new(Cell::new(true));
        let on_invalidate: Invalidate = {
            let this = self.this.clone();
            let item = item.clone();
            let token = Rc::clone(&token);
            Box::new(move || match this.upgrade() {
                Some(state) if token.get() => state.rerender(&item),
                _ => Ok(()),
            })
        };
        let node = capture_dependencies(
            &*self.tracker,
            || self.renderer.render(&self.doc, item),
            on_invalidate,
        )??;
        let listeners = bind_events(&self.doc, node, &self.events, &Rc::new(item.clone()))?;
        Ok(Slot {
            id: item.id(),
            node,
            token,
            listeners,
        })
    }

    /// Retire a rendering: its pending re-render and its listeners go away.
    fn release(&self, slot: &Slot<T>) {
        slot.token.set(false);
        for &listener in &slot.listeners {
            self.doc.remove_event_listener(listener);
        }
    }

    /// Put `fresh` in place of the slot at `at`: insert its node before the
    /// old node, then remove the old one.
    fn replace_at(&self, at: usize, fresh: Slot<T>) -> Result<()> {
        let node = fresh.node;
        let old = {
            let mut slots = self.slots.borrow_mut();
            self.check_index(at, slots.len())?;
            std::mem::replace(&mut slots[at], fresh)
        };
        self.release(&old);
        self.doc.insert_before(self.container, node, Some(old.node))?;
        self.remove_node(old.node)
    }

    fn remove_node(&self, node: NodeId) -> Result<()> {
        if self.doc.parent(node) == Some(self.container) {
            self.doc.remove_child(self.container, node)?;
        } else {
            tracing::warn!(%node, "list item node was moved out of its container");
        }
        Ok(())
    }

    /// Re-render an item whose dependencies changed, wherever it is now.
    fn rerender(&self, item: &T) -> Result<()> {
        if self.dead.get() {
            return Ok(());
        }
        let id = item.id();
        let Some(at) = self.index.borrow().get(&id).copied() else {
            // Removed meanwhile; `removed` already took the node out
            return Ok(());
        };
        tracing::debug!(?id, at, "list item re-render");
        let fresh = self.render_item(item)?;
        self.replace_at(at, fresh)
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.slots.borrow().iter().map(|slot| slot.node).collect()
    }
}

impl<T: LiveItem> LiveObserver<T> for ListState<T> {
    fn added(&self, item: &T, before: usize) -> Result<()> {
        if self.dead.get() {
            return Ok(());
        }
        let len = self.slots.borrow().len();
        if before > len {
            return Err(Error::IndexOutOfBounds { index: before, len });
        }
        tracing::debug!(id = ?item.id(), before, "list item added");
        let slot = self.render_item(item)?;
        let node = slot.node;
        let reference = {
            let mut slots = self.slots.borrow_mut();
            let before = before.min(slots.len());
            let reference = slots.get(before).map(|slot| slot.node);
            slots.insert(before, slot);
            reference
        };
        self.reindex();
        self.doc.insert_before(self.container, node, reference)?;
        self.focus.retry_focus();
        Ok(())
    }

    fn removed(&self, id: &T::Id, at: usize) -> Result<()> {
        if self.dead.get() {
            return Ok(());
        }
        let slot = {
            let mut slots = self.slots.borrow_mut();
            self.check_index(at, slots.len())?;
            slots.remove(at)
        };
        if slot.id != *id {
            tracing::warn!(expected = ?id, found = ?slot.id, at, "removed item does not match its slot");
        }
        tracing::debug!(?id, at, "list item removed");
        self.release(&slot);
        self.reindex();
        self.remove_node(slot.node)
    }

    fn changed(&self, item: &T, at: usize) -> Result<()> {
        if self.dead.get() {
            return Ok(());
        }
        self.check_index(at, self.slots.borrow().len())?;
        tracing::debug!(id = ?item.id(), at, "list item changed");
        let fresh = self.render_item(item)?;
        self.replace_at(at, fresh)?;
        self.focus.retry_focus();
        Ok(())
    }

    fn moved(&self, item: &T, from: usize, to: usize) -> Result<()> {
        if self.dead.get() {
            return Ok(());
        }
        let (node, reference) = {
            let mut slots = self.slots.borrow_mut();
            self.check_index(from, slots.len())?;
            self.check_index(to, slots.len())?;
            let slot = slots.remove(from);
            let node = slot.node;
            let reference = slots.get(to).map(|slot| slot.node);
            slots.insert(to, slot);
            (node, reference)
        };
        tracing::debug!(id = ?item.id(), from, to, "list item moved");
        self.reindex();
        self.doc.insert_before(self.container, node, reference)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// A running list render.
pub struct ListHandle<T: LiveItem> {
    state: Rc<ListState<T>>,
    query: Box<dyn LiveQuery>,
}

impl<T: LiveItem> fmt::Debug for ListHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListHandle")
            .field("container", &self.state.container)
            .field("len", &self.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl<T: LiveItem> ListHandle<T> {
    /// Stop following the query and unbind item events. Rendered nodes
    /// stay where they are.
    pub fn stop(&self) {
        self.state.dead.set(true);
        self.query.stop();
        for slot in self.state.slots.borrow().iter() {
            self.state.release(slot);
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.state.dead.get()
    }

    /// Number of rendered items.
    pub fn len(&self) -> usize {
        self.state.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Item nodes in display order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.state.nodes()
    }

    pub fn container(&self) -> NodeId {
        self.state.container
    }
}

/// Everything a list render needs from its [`Ui`](crate::Ui).
pub(crate) struct ListContext<'a> {
    pub doc: &'a Document,
    pub tracker: Rc<dyn DependencyTracker>,
    pub focus: Rc<FocusManager>,
    pub compiler: &'a dyn TemplateCompiler,
}

/// Clear `container` and fill it from a live query on `source`.
pub(crate) fn render_list<T, S>(
    ctx: ListContext<'_>,
    source: &S,
    container: NodeId,
    options: ListOptions<T>,
) -> Result<ListHandle<T>>
where
    T: LiveItem,
    S: LiveSource<T> + ?Sized,
{
    let ListOptions {
        query,
        sort,
        render,
        template,
        events,
    } = options;
    let renderer = ItemRenderer::from_options(ctx.doc, ctx.compiler, render, template)?;
    events.validate()?;
    if !ctx.doc.owns(container) {
        return Err(Error::Hierarchy(format!(
            "{container} does not belong to this document"
        )));
    }
    if !ctx.doc.is_element(container) {
        return Err(Error::Hierarchy(format!(
            "{container} is not an element and can't hold a list"
        )));
    }

    while let Some(child) = ctx.doc.first_child(container) {
        ctx.doc.remove_child(container, child)?;
    }

    let state = Rc::new_cyclic(|this| ListState {
        this: this.clone(),
        doc: ctx.doc.clone(),
        container,
        tracker: ctx.tracker,
        focus: ctx.focus,
        renderer,
        events,
        slots: RefCell::new(Vec::new()),
        index: RefCell::new(HashMap::new()),
        dead: Cell::new(false),
    });
    let observer: Rc<dyn LiveObserver<T>> = state.clone();
    let query = source
        .find_live(
            Query {
                filter: query,
                sort,
            },
            observer,
        )
        .inspect_err(|_| state.dead.set(true))?;
    tracing::debug!(%container, items = state.slots.borrow().len(), "list render started");
    Ok(ListHandle { state, query })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::LiveCollection;
    use crate::reactive::Tracker;
    use crate::render::template::Interpolator;
    use serde_json::{Value, json};

    struct Fixture {
        doc: Document,
        tracker: Tracker,
        focus: Rc<FocusManager>,
        list: NodeId,
        todos: LiveCollection<Value>,
    }

    fn setup() -> Fixture {
        let doc = Document::new();
        let list = doc.create_element("ul");
        doc.append_child(doc.root(), list).unwrap();
        let todos = LiveCollection::from_items([
            json!({"_id": "a", "title": "Alpha", "rank": 2}),
            json!({"_id": "b", "title": "Bravo", "rank": 1}),
        ])
        .unwrap();
        Fixture {
            focus: Rc::new(FocusManager::new(doc.clone())),
            doc,
            tracker: Tracker::new(),
            list,
            todos,
        }
    }

    fn start(fx: &Fixture, options: ListOptions<Value>) -> Result<ListHandle<Value>> {
        render_list(
            ListContext {
                doc: &fx.doc,
                tracker: Rc::new(fx.tracker.clone()),
                focus: fx.focus.clone(),
                compiler: &Interpolator,
            },
            &fx.todos,
            fx.list,
            options,
        )
    }

    fn titles(fx: &Fixture) -> Vec<String> {
        fx.doc
            .children(fx.list)
            .into_iter()
            .map(|node| fx.doc.text_content(node))
            .collect()
    }

    fn by_rank() -> ListOptions<Value> {
        ListOptions::new()
            .sort_by(|a: &Value, b: &Value| a["rank"].as_i64().cmp(&b["rank"].as_i64()))
            .template(ItemTemplate::new("<li><%= title %></li>"))
    }

    #[test]
    fn test_initial_render_replaces_children() {
        let fx = setup();
        let stale = fx.doc.create_element("li");
        fx.doc.append_child(fx.list, stale).unwrap();

        let handle = start(&fx, by_rank()).unwrap();
        assert_eq!(titles(&fx), vec!["Bravo", "Alpha"]);
        assert_eq!(handle.len(), 2);
        assert_eq!(fx.doc.children(fx.list), handle.nodes());
        assert!(!fx.doc.is_connected(stale));
    }

    #[test]
    fn test_options_must_name_one_renderer() {
        let fx = setup();
        assert!(matches!(
            start(&fx, ListOptions::new()),
            Err(Error::ContractViolation(_))
        ));
        let both = by_rank().render(|doc: &Document, _: &Value| doc.create_element("li"));
        assert!(matches!(start(&fx, both), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_changed_replaces_node_and_moved_keeps_it() {
        let fx = setup();
        let handle = start(&fx, by_rank()).unwrap();
        let before = handle.nodes();
        let (bravo, alpha) = (before[0], before[1]);

        fx.todos
            .update(json!({"_id": "a", "title": "Alpha!", "rank": 0}))
            .unwrap();
        assert_eq!(titles(&fx), vec!["Alpha!", "Bravo"]);
        let nodes = handle.nodes();
        assert_ne!(nodes[0], alpha);
        assert_eq!(nodes[1], bravo);
    }

    #[test]
    fn test_item_rerenders_at_current_index() {
        let fx = setup();
        let suffix = fx.tracker.var("".to_string());
        let options = {
            let suffix = suffix.clone();
            ListOptions::new().render(move |doc: &Document, item: &Value| {
                let li = doc.create_element("li");
                let label = format!("{}{}", item["title"].as_str().unwrap_or(""), suffix.get());
                doc.append_child(li, doc.create_text(label)).ok();
                li
            })
        };
        let handle = start(&fx, options).unwrap();
        fx.todos.insert(json!({"_id": "c", "title": "Charlie"})).unwrap();
        fx.todos.remove(&"a".to_string()).unwrap();

        suffix.set("*".to_string()).unwrap();
        assert_eq!(titles(&fx), vec!["Bravo*", "Charlie*"]);
        assert_eq!(fx.doc.children(fx.list), handle.nodes());
    }

    #[test]
    fn test_stop_leaves_nodes() {
        let fx = setup();
        let handle = start(&fx, by_rank()).unwrap();
        handle.stop();
        assert!(handle.is_stopped());
        fx.todos.insert(json!({"_id": "z", "title": "Zulu", "rank": 0})).unwrap();
        assert_eq!(titles(&fx), vec!["Bravo", "Alpha"]);
        assert_eq!(fx.todos.query_count(), 0);
    }

    #[test]
    fn test_retired_renderings_drop_their_listeners() {
        let fx = setup();
        let clicks = Rc::new(Cell::new(0));
        let options = {
            let clicks = clicks.clone();
            let events = EventMap::new().on("click", move |_: &Value, _| clicks.set(clicks.get() + 1));
            by_rank().events(events)
        };
        let handle = start(&fx, options).unwrap();
        let before = handle.nodes();
        assert!(before.iter().all(|&node| fx.doc.listener_count(node) == 1));

        // `changed` replaces Alpha's node; the old one keeps no listeners
        fx.todos
            .update(json!({"_id": "a", "title": "Alpha!", "rank": 2}))
            .unwrap();
        let alpha = handle.nodes()[1];
        assert_ne!(alpha, before[1]);
        assert_eq!(fx.doc.listener_count(before[1]), 0);
        assert_eq!(fx.doc.listener_count(alpha), 1);

        fx.todos.remove(&"b".to_string()).unwrap();
        assert_eq!(fx.doc.listener_count(before[0]), 0);

        handle.stop();
        assert_eq!(fx.doc.listener_count(alpha), 0);
        fx.doc.dispatch_event(alpha, "click");
        assert_eq!(clicks.get(), 0);
    }

    #[test]
    fn test_moved_relocates_without_rerender() {
        let fx = setup();
        fx.todos.insert(json!({"_id": "c", "title": "Charlie", "rank": 3})).unwrap();
        let natural = ListOptions::new().template(ItemTemplate::new("<li><%= title %></li>"));
        let handle = start(&fx, natural).unwrap();
        assert_eq!(titles(&fx), vec!["Alpha", "Bravo", "Charlie"]);
        let before = handle.nodes();

        let bravo = fx.todos.get(&"b".to_string()).unwrap();
        handle.state.moved(&bravo, 1, 0).unwrap();

        assert_eq!(titles(&fx), vec!["Bravo", "Alpha", "Charlie"]);
        assert_eq!(handle.nodes(), vec![before[1], before[0], before[2]]);
        assert_eq!(fx.doc.children(fx.list), handle.nodes());
        assert_eq!(handle.state.index.borrow()[&"b".to_string()], 0);
    }

    #[test]
    fn test_container_from_another_document() {
        let fx = setup();
        let other = Document::new();
        let foreign = (0..=fx.doc.node_count())
            .map(|_| other.create_element("ul"))
            .last()
            .unwrap();
        let fx = Fixture { list: foreign, ..fx };
        assert!(matches!(start(&fx, by_rank()), Err(Error::Hierarchy(_))));
        assert_eq!(fx.todos.query_count(), 0);
    }

    #[test]
    fn test_multi_node_items_are_rejected() {
        let fx = setup();
        let options = ListOptions::new().template(ItemTemplate::new("<dt><%= title %></dt><dd></dd>"));
        assert!(matches!(start(&fx, options), Err(Error::ContractViolation(_))));
    }

    #[test]
    fn test_bad_indices_are_reported() {
        let fx = setup();
        let handle = start(&fx, by_rank()).unwrap();
        let state = handle.state.clone();
        let item = json!({"_id": "q"});
        assert!(matches!(
            state.added(&item, 9),
            Err(Error::IndexOutOfBounds { index: 9, len: 2 })
        ));
        assert!(matches!(
            state.removed(&"q".to_string(), 2),
            Err(Error::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            state.moved(&item, 0, 2),
            Err(Error::IndexOutOfBounds { .. })
        ));
    }
}
