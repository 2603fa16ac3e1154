//! Live queries - Ordered change streams over a collection.
//!
//! A [`LiveSource`] answers a [`Query`] with an initial burst of `added`
//! notifications, then keeps calling the [`LiveObserver`] as the result set
//! changes. Indices in every notification are relative to the observer's
//! current view of the result list:
//!
//! ```text
//! added(item, before)      insert at `before` (== len appends)
//! removed(id, at)          drop the entry at `at`
//! changed(item, at)        the entry at `at` now holds `item`
//! moved(item, from, to)    relocate without changing contents
//! ```

mod collection;

pub use collection::LiveCollection;

use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;
use std::rc::Rc;

use crate::error::Result;

/// An item with a stable identity.
pub trait LiveItem: Clone + 'static {
    type Id: Clone + Eq + Hash + Debug + 'static;

    fn id(&self) -> Self::Id;
}

/// Documents are identified by their `_id` field, rendered as a string.
/// A missing `_id` maps to the empty string.
impl LiveItem for serde_json::Value {
    type Id = String;

    fn id(&self) -> String {
        match self.get("_id") {
            Some(serde_json::Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

pub type Filter<T> = Rc<dyn Fn(&T) -> bool>;
pub type SortFn<T> = Rc<dyn Fn(&T, &T) -> Ordering>;

/// Selection and ordering for a live query.
pub struct Query<T> {
    pub filter: Option<Filter<T>>,
    pub sort: Option<SortFn<T>>,
}

impl<T> Default for Query<T> {
    fn default() -> Self {
        Self {
            filter: None,
            sort: None,
        }
    }
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
        }
    }
}

impl<T> Query<T> {
    /// Match everything in natural order.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: impl Fn(&T) -> bool + 'static) -> Self {
        self.filter = Some(Rc::new(filter));
        self
    }

    pub fn sort_by(mut self, sort: impl Fn(&T, &T) -> Ordering + 'static) -> Self {
        self.sort = Some(Rc::new(sort));
        self
    }

    pub fn matches(&self, item: &T) -> bool {
        self.filter.as_ref().is_none_or(|f| f(item))
    }

    /// Compare by the sort function. Without one every pair is `Equal`,
    /// leaving ties to the source's natural order.
    pub fn compare(&self, a: &T, b: &T) -> Ordering {
        self.sort.as_ref().map_or(Ordering::Equal, |s| s(a, b))
    }
}

/// Receives ordered change notifications.
pub trait LiveObserver<T: LiveItem> {
    fn added(&self, item: &T, before: usize) -> Result<()>;
    fn removed(&self, id: &T::Id, at: usize) -> Result<()>;
    fn changed(&self, item: &T, at: usize) -> Result<()>;
    fn moved(&self, item: &T, from: usize, to: usize) -> Result<()>;
}

/// A running query.
pub trait LiveQuery {
    /// Stop delivering notifications. Idempotent.
    fn stop(&self);
    fn is_stopped(&self) -> bool;
}

/// Something that can answer live queries.
pub trait LiveSource<T: LiveItem> {
    fn find_live(
        &self,
        query: Query<T>,
        observer: Rc<dyn LiveObserver<T>>,
    ) -> Result<Box<dyn LiveQuery>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_ids() {
        assert_eq!(json!({"_id": "a1"}).id(), "a1");
        assert_eq!(json!({"_id": 7}).id(), "7");
        assert_eq!(json!({"name": "x"}).id(), "");
    }

    #[test]
    fn test_query_defaults() {
        let query: Query<i32> = Query::all();
        assert!(query.matches(&3));
        assert_eq!(query.compare(&1, &2), Ordering::Equal);

        let query = Query::all().filter(|n: &i32| n % 2 == 0).sort_by(|a: &i32, b| b.cmp(a));
        assert!(!query.matches(&3));
        assert_eq!(query.compare(&1, &2), Ordering::Greater);
    }
}
