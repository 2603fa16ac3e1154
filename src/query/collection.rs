//! LiveCollection - In-memory source of live queries.
//!
//! Items are kept in a map keyed by identity, each stamped with an insertion
//! sequence number. A query orders its results by its sort function and
//! breaks ties by that sequence, so unsorted queries see natural insertion
//! order.
//!
//! Notifications go through one outbox per collection. A mutation made from
//! inside an observer callback is queued behind the notification being
//! delivered, so every observer sees changes in the order they happened.

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use super::{LiveItem, LiveObserver, LiveQuery, LiveSource, Query};
use crate::error::{Error, Result};

// =============================================================================
// TYPES
// =============================================================================

struct Entry<T> {
    seq: u64,
    item: T,
}

struct QueryState<T: LiveItem> {
    query: Query<T>,
    observer: Rc<dyn LiveObserver<T>>,
    /// Ids of matching items in query order.
    results: Vec<T::Id>,
    stopped: Rc<Cell<bool>>,
}

enum Notification<T: LiveItem> {
    Added(T, usize),
    Removed(T::Id, usize),
    Changed(T, usize),
    Moved(T, usize, usize),
}

struct Delivery<T: LiveItem> {
    observer: Rc<dyn LiveObserver<T>>,
    stopped: Rc<Cell<bool>>,
    notification: Notification<T>,
}

struct CollectionState<T: LiveItem> {
    entries: HashMap<T::Id, Entry<T>>,
    next_seq: u64,
    queries: Vec<QueryState<T>>,
    outbox: VecDeque<Delivery<T>>,
    delivering: bool,
}

/// A shared, observable collection of items.
pub struct LiveCollection<T: LiveItem> {
    state: Rc<RefCell<CollectionState<T>>>,
}

impl<T: LiveItem> Clone for LiveCollection<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: LiveItem> Default for LiveCollection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: LiveItem> fmt::Debug for LiveCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("LiveCollection")
            .field("len", &state.entries.len())
            .field("queries", &state.queries.len())
            .finish()
    }
}

// =============================================================================
// ORDERING
// =============================================================================

fn ordered_before<T: LiveItem>(query: &Query<T>, a: &Entry<T>, b: &Entry<T>) -> bool {
    match query.compare(&a.item, &b.item) {
        Ordering::Equal => a.seq < b.seq,
        ordering => ordering == Ordering::Less,
    }
}

/// Index at which `entry` belongs among `results` (which must not contain it).
fn position_for<T: LiveItem>(
    entries: &HashMap<T::Id, Entry<T>>,
    query: &Query<T>,
    results: &[T::Id],
    entry: &Entry<T>,
) -> usize {
    results
        .iter()
        .position(|id| {
            entries
                .get(id)
                .is_some_and(|other| ordered_before(query, entry, other))
        })
        .unwrap_or(results.len())
}

// =============================================================================
// MUTATION
// =============================================================================

impl<T: LiveItem> LiveCollection<T> {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(CollectionState {
                entries: HashMap::new(),
                next_seq: 0,
                queries: Vec::new(),
                outbox: VecDeque::new(),
                delivering: false,
            })),
        }
    }

    /// Build a collection holding `items` in order.
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Result<Self> {
        let collection = Self::new();
        for item in items {
            collection.insert(item)?;
        }
        Ok(collection)
    }

    /// Add a new item. Its id must not already be present.
    pub fn insert(&self, item: T) -> Result<()> {
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let id = item.id();
            if state.entries.contains_key(&id) {
                return Err(Error::contract(format!("duplicate item id {id:?}")));
            }
            let entry = Entry {
                seq: state.next_seq,
                item: item.clone(),
            };
            state.next_seq += 1;

            state.queries.retain(|q| !q.stopped.get());
            for query in &mut state.queries {
                if !query.query.matches(&item) {
                    continue;
                }
                let at = position_for(&state.entries, &query.query, &query.results, &entry);
                query.results.insert(at, id.clone());
                state.outbox.push_back(Delivery {
                    observer: Rc::clone(&query.observer),
                    stopped: Rc::clone(&query.stopped),
                    notification: Notification::Added(item.clone(), at),
                });
            }
            state.entries.insert(id, entry);
        }
        self.flush()
    }

    /// Replace the item with the same id.
    ///
    /// Observers still matching get `changed` at the old index, then `moved`
    /// if the new contents sort elsewhere. Observers whose filter stops (or
    /// starts) matching get `removed` (or `added`).
    pub fn update(&self, item: T) -> Result<()> {
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let id = item.id();
            let Some(seq) = state.entries.get(&id).map(|e| e.seq) else {
                return Err(Error::contract(format!("no item with id {id:?}")));
            };
            state.entries.insert(
                id.clone(),
                Entry {
                    seq,
                    item: item.clone(),
                },
            );
            let Some(entry) = state.entries.get(&id) else {
                return Ok(());
            };

            state.queries.retain(|q| !q.stopped.get());
            for query in &mut state.queries {
                let old_index = query.results.iter().position(|r| *r == id);
                let matches = query.query.matches(&item);
                let notifications = match (old_index, matches) {
                    (Some(from), true) => {
                        query.results.remove(from);
                        let to = position_for(&state.entries, &query.query, &query.results, entry);
                        query.results.insert(to, id.clone());
                        let mut out = vec![Notification::Changed(item.clone(), from)];
                        if to != from {
                            out.push(Notification::Moved(item.clone(), from, to));
                        }
                        out
                    }
                    (Some(at), false) => {
                        query.results.remove(at);
                        vec![Notification::Removed(id.clone(), at)]
                    }
                    (None, true) => {
                        let at = position_for(&state.entries, &query.query, &query.results, entry);
                        query.results.insert(at, id.clone());
                        vec![Notification::Added(item.clone(), at)]
                    }
                    (None, false) => Vec::new(),
                };
                for notification in notifications {
                    state.outbox.push_back(Delivery {
                        observer: Rc::clone(&query.observer),
                        stopped: Rc::clone(&query.stopped),
                        notification,
                    });
                }
            }
        }
        self.flush()
    }

    /// Remove the item with `id`, returning it if it was present.
    pub fn remove(&self, id: &T::Id) -> Result<Option<T>> {
        let removed = {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let Some(entry) = state.entries.remove(id) else {
                return Ok(None);
            };
            state.queries.retain(|q| !q.stopped.get());
            for query in &mut state.queries {
                if let Some(at) = query.results.iter().position(|r| r == id) {
                    query.results.remove(at);
                    state.outbox.push_back(Delivery {
                        observer: Rc::clone(&query.observer),
                        stopped: Rc::clone(&query.stopped),
                        notification: Notification::Removed(id.clone(), at),
                    });
                }
            }
            entry.item
        };
        self.flush()?;
        Ok(Some(removed))
    }

    pub fn get(&self, id: &T::Id) -> Option<T> {
        self.state.borrow().entries.get(id).map(|e| e.item.clone())
    }

    /// All items in natural insertion order.
    pub fn items(&self) -> Vec<T> {
        let state = self.state.borrow();
        let mut entries: Vec<&Entry<T>> = state.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.item.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.state.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of queries that have not been stopped.
    pub fn query_count(&self) -> usize {
        self.state
            .borrow()
            .queries
            .iter()
            .filter(|q| !q.stopped.get())
            .count()
    }

    // =========================================================================
    // DELIVERY
    // =========================================================================

    /// Deliver queued notifications unless a delivery is already running
    /// further up the stack. Returns the first observer error.
    fn flush(&self) -> Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if state.delivering {
                return Ok(());
            }
            state.delivering = true;
        }
        let _guard = DeliveryGuard { state: &self.state };

        let mut first_error = None;
        loop {
            let Some(delivery) = self.state.borrow_mut().outbox.pop_front() else {
                break;
            };
            if delivery.stopped.get() {
                continue;
            }
            if let Err(err) = deliver(delivery) {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    tracing::error!(error = %err, "live query observer failed");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

fn deliver<T: LiveItem>(delivery: Delivery<T>) -> Result<()> {
    let observer = delivery.observer;
    match delivery.notification {
        Notification::Added(item, before) => observer.added(&item, before),
        Notification::Removed(id, at) => observer.removed(&id, at),
        Notification::Changed(item, at) => observer.changed(&item, at),
        Notification::Moved(item, from, to) => observer.moved(&item, from, to),
    }
}

/// Clears the delivering flag even when an observer errors.
struct DeliveryGuard<'a, T: LiveItem> {
    state: &'a RefCell<CollectionState<T>>,
}

impl<T: LiveItem> Drop for DeliveryGuard<'_, T> {
    fn drop(&mut self) {
        self.state.borrow_mut().delivering = false;
    }
}

// =============================================================================
// QUERIES
// =============================================================================

struct CollectionQuery {
    stopped: Rc<Cell<bool>>,
}

impl LiveQuery for CollectionQuery {
    fn stop(&self) {
        self.stopped.set(true);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl<T: LiveItem> LiveSource<T> for LiveCollection<T> {
    /// Register the query and emit `added` for every current match, in order.
    fn find_live(
        &self,
        query: Query<T>,
        observer: Rc<dyn LiveObserver<T>>,
    ) -> Result<Box<dyn LiveQuery>> {
        let stopped = Rc::new(Cell::new(false));
        {
            let mut guard = self.state.borrow_mut();
            let state = &mut *guard;
            let mut matching: Vec<&Entry<T>> = state
                .entries
                .values()
                .filter(|e| query.matches(&e.item))
                .collect();
            matching.sort_by(|a, b| {
                query
                    .compare(&a.item, &b.item)
                    .then_with(|| a.seq.cmp(&b.seq))
            });
            let results: Vec<T::Id> = matching.iter().map(|e| e.item.id()).collect();
            for (at, entry) in matching.iter().enumerate() {
                state.outbox.push_back(Delivery {
                    observer: Rc::clone(&observer),
                    stopped: Rc::clone(&stopped),
                    notification: Notification::Added(entry.item.clone(), at),
                });
            }
            state.queries.push(QueryState {
                query,
                observer,
                results,
                stopped: Rc::clone(&stopped),
            });
        }
        if let Err(err) = self.flush() {
            stopped.set(true);
            return Err(err);
        }
        Ok(Box::new(CollectionQuery { stopped }))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    /// Observer that mirrors the result list and logs every call.
    #[derive(Default)]
    struct Mirror {
        ids: RefCell<Vec<String>>,
        log: RefCell<Vec<String>>,
    }

    impl LiveObserver<Value> for Mirror {
        fn added(&self, item: &Value, before: usize) -> Result<()> {
            self.ids.borrow_mut().insert(before, item.id());
            self.log.borrow_mut().push(format!("added {} {before}", item.id()));
            Ok(())
        }

        fn removed(&self, id: &String, at: usize) -> Result<()> {
            self.ids.borrow_mut().remove(at);
            self.log.borrow_mut().push(format!("removed {id} {at}"));
            Ok(())
        }

        fn changed(&self, item: &Value, at: usize) -> Result<()> {
            self.log.borrow_mut().push(format!("changed {} {at}", item.id()));
            Ok(())
        }

        fn moved(&self, item: &Value, from: usize, to: usize) -> Result<()> {
            let id = self.ids.borrow_mut().remove(from);
            self.ids.borrow_mut().insert(to, id);
            self.log.borrow_mut().push(format!("moved {} {from} {to}", item.id()));
            Ok(())
        }
    }

    fn setup() -> (LiveCollection<Value>, Rc<Mirror>, Box<dyn LiveQuery>) {
        let collection = LiveCollection::from_items([
            json!({"_id": "a", "rank": 3}),
            json!({"_id": "b", "rank": 1}),
            json!({"_id": "c", "rank": 2}),
        ])
        .unwrap();
        let mirror = Rc::new(Mirror::default());
        let query = Query::all().sort_by(|a: &Value, b: &Value| {
            a["rank"].as_i64().cmp(&b["rank"].as_i64())
        });
        let handle = collection.find_live(query, mirror.clone()).unwrap();
        (collection, mirror, handle)
    }

    fn ids(mirror: &Mirror) -> Vec<String> {
        mirror.ids.borrow().clone()
    }

    #[test]
    fn test_initial_results_are_sorted() {
        let (_collection, mirror, _handle) = setup();
        assert_eq!(ids(&mirror), vec!["b", "c", "a"]);
        assert_eq!(
            *mirror.log.borrow(),
            vec!["added b 0", "added c 1", "added a 2"]
        );
    }

    #[test]
    fn test_insert_and_remove() {
        let (collection, mirror, _handle) = setup();
        collection.insert(json!({"_id": "d", "rank": 2})).unwrap();
        // Ties keep insertion order
        assert_eq!(ids(&mirror), vec!["b", "c", "d", "a"]);

        let removed = collection.remove(&"c".to_string()).unwrap();
        assert_eq!(removed, Some(json!({"_id": "c", "rank": 2})));
        assert_eq!(ids(&mirror), vec!["b", "d", "a"]);
        assert_eq!(collection.remove(&"zz".to_string()).unwrap(), None);
        assert!(collection.insert(json!({"_id": "a"})).is_err());
    }

    #[test]
    fn test_update_emits_changed_then_moved() {
        let (collection, mirror, _handle) = setup();
        mirror.log.borrow_mut().clear();

        collection.update(json!({"_id": "a", "rank": 0})).unwrap();
        assert_eq!(*mirror.log.borrow(), vec!["changed a 2", "moved a 2 0"]);
        assert_eq!(ids(&mirror), vec!["a", "b", "c"]);

        mirror.log.borrow_mut().clear();
        collection.update(json!({"_id": "b", "rank": 1, "x": 1})).unwrap();
        assert_eq!(*mirror.log.borrow(), vec!["changed b 1"]);
        assert!(collection.update(json!({"_id": "nope"})).is_err());
    }

    #[test]
    fn test_filter_membership_changes() {
        let collection = LiveCollection::from_items([
            json!({"_id": "a", "done": false}),
            json!({"_id": "b", "done": true}),
        ])
        .unwrap();
        let mirror = Rc::new(Mirror::default());
        let query = Query::all().filter(|v: &Value| v["done"] == json!(false));
        let _handle = collection.find_live(query, mirror.clone()).unwrap();
        assert_eq!(ids(&mirror), vec!["a"]);

        collection.update(json!({"_id": "a", "done": true})).unwrap();
        assert!(ids(&mirror).is_empty());
        collection.update(json!({"_id": "b", "done": false})).unwrap();
        assert_eq!(ids(&mirror), vec!["b"]);
    }

    #[test]
    fn test_stopped_queries_are_silent() {
        let (collection, mirror, handle) = setup();
        handle.stop();
        assert!(handle.is_stopped());
        collection.insert(json!({"_id": "z", "rank": 9})).unwrap();
        assert_eq!(ids(&mirror), vec!["b", "c", "a"]);
        assert_eq!(collection.query_count(), 0);
    }

    #[test]
    fn test_observer_errors_reach_mutator() {
        struct Failing;
        impl LiveObserver<Value> for Failing {
            fn added(&self, _: &Value, _: usize) -> Result<()> {
                Err(Error::contract("no"))
            }
            fn removed(&self, _: &String, _: usize) -> Result<()> {
                Ok(())
            }
            fn changed(&self, _: &Value, _: usize) -> Result<()> {
                Ok(())
            }
            fn moved(&self, _: &Value, _: usize, _: usize) -> Result<()> {
                Ok(())
            }
        }

        let collection: LiveCollection<Value> = LiveCollection::new();
        let _handle = collection.find_live(Query::all(), Rc::new(Failing)).unwrap();
        assert_eq!(
            collection.insert(json!({"_id": "a"})),
            Err(Error::contract("no"))
        );
        // The item is stored regardless
        assert_eq!(collection.len(), 1);
    }
}
