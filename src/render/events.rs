//! Event Binder - Declarative trigger maps.
//!
//! An [`EventMap`] maps trigger descriptions to handlers:
//!
//! ```text
//! "click"                     direct: fires for clicks on (or inside) the node
//! "click .destroy"            delegated: fires for each `.destroy` between the
//!                             click target and the node
//! "dblclick .text, keyup input"   two clauses, same handler
//! ```
//!
//! Every handler receives the event data the map was bound with, plus the
//! event itself.

use std::fmt;
use std::rc::Rc;

use crate::dom::{Document, Event, ListenerId, NodeId, Selector};
use crate::error::{Error, Result};

/// Handler invoked with the bound event data.
pub type Handler<D> = Rc<dyn Fn(&D, &Event)>;

/// Ordered map from trigger description to handler.
pub struct EventMap<D> {
    entries: Vec<(String, Handler<D>)>,
}

impl<D> Default for EventMap<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<D> Clone for EventMap<D> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<D> fmt::Debug for EventMap<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(trigger, _)| trigger))
            .finish()
    }
}

impl<D: 'static> EventMap<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a handler for `trigger`.
    pub fn on(mut self, trigger: &str, handler: impl Fn(&D, &Event) + 'static) -> Self {
        self.insert(trigger, Rc::new(handler));
        self
    }

    /// Add a handler, replacing one already registered for the same trigger.
    pub fn insert(&mut self, trigger: &str, handler: Handler<D>) {
        match self.entries.iter_mut().find(|(t, _)| t == trigger) {
            Some(entry) => entry.1 = handler,
            None => self.entries.push((trigger.to_string(), handler)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse every trigger without binding anything.
    pub(crate) fn validate(&self) -> Result<()> {
        for (trigger, _) in &self.entries {
            parse_trigger(trigger)?;
        }
        Ok(())
    }
}

/// How one clause of a trigger description binds.
#[derive(Debug, PartialEq, Eq)]
enum Binding {
    Direct(String),
    Delegated(String, Selector),
}

/// Clauses end at a comma followed by whitespace; a bare comma belongs to
/// the selector group.
fn split_clauses(trigger: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut start = 0;
    let mut chars = trigger.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        if c == ',' && chars.peek().is_some_and(|&(_, next)| next.is_whitespace()) {
            clauses.push(&trigger[start..at]);
            start = at + 1;
        }
    }
    clauses.push(&trigger[start..]);
    clauses
}

fn parse_trigger(trigger: &str) -> Result<Vec<Binding>> {
    let mut bindings = Vec::new();
    for clause in split_clauses(trigger) {
        let mut tokens = clause.split_whitespace();
        let Some(event_type) = tokens.next() else {
            continue;
        };
        let path: Vec<&str> = tokens.collect();
        if path.is_empty() {
            bindings.push(Binding::Direct(event_type.to_string()));
        } else {
            let selector = Selector::parse(&path.join(" "))?;
            bindings.push(Binding::Delegated(event_type.to_string(), selector));
        }
    }
    if bindings.is_empty() {
        return Err(Error::contract(format!(
            "event trigger {trigger:?} names no event type"
        )));
    }
    Ok(bindings)
}

/// Attach every handler of `events` to `node`, passing `data` to each call.
///
/// All triggers are parsed before anything is bound, so a bad selector
/// leaves the node untouched.
pub fn bind_events<D: 'static>(
    doc: &Document,
    node: NodeId,
    events: &EventMap<D>,
    data: &Rc<D>,
) -> Result<Vec<ListenerId>> {
    let mut parsed = Vec::with_capacity(events.len());
    for (trigger, handler) in &events.entries {
        parsed.push((parse_trigger(trigger)?, handler));
    }

    let mut ids = Vec::new();
    for (bindings, handler) in parsed {
        for binding in bindings {
            let handler = Rc::clone(handler);
            let data = Rc::clone(data);
            let callback = move |event: &Event| handler(&*data, event);
            ids.push(match binding {
                Binding::Direct(event_type) => {
                    doc.add_event_listener(node, &event_type, callback)
                }
                Binding::Delegated(event_type, selector) => {
                    doc.add_delegated_listener(node, &event_type, selector, callback)
                }
            });
        }
    }
    if !ids.is_empty() {
        tracing::trace!(%node, listeners = ids.len(), "events bound");
    }
    Ok(ids)
}
