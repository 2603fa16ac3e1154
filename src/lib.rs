//! # liveui
//!
//! Incremental, dependency-driven rendering of element trees.
//!
//! A render function reads reactive values and builds nodes. When one of
//! those values changes, liveui runs the function again and *merges* the new
//! nodes onto the old ones, so node identity, attached listeners and focus
//! survive the update.
//!
//! ## Architecture
//!
//! ```text
//! Var::set -> Tracker invalidates -> render re-evaluates -> shape check
//!          -> Patcher merges in place -> FocusManager retries
//!
//! LiveCollection mutation -> added/removed/changed/moved -> list reconciler
//!          -> container children spliced at the reported indices
//! ```
//!
//! ## Modules
//!
//! - [`dom`] - Arena document, selectors, events, markup
//! - [`reactive`] - Dependency tracking (`Tracker`, `Var`)
//! - [`query`] - Live queries and the in-memory `LiveCollection`
//! - [`render`] - Patcher, single and list renders, focus, event binding
//! - [`ui`] - The `Ui` context tying it together
//!
//! Everything is single-threaded: handles are `Rc`-based and `!Send`.

pub mod dom;
pub mod error;
pub mod query;
pub mod reactive;
pub mod render;
pub mod ui;

pub use error::{Error, NodeSignature, Result, Shape};

pub use dom::{
    Document, Event, ListenerId, Mutation, MutationKind, NodeId, NodeKind, ObserverId, Selector,
};

pub use reactive::{DependencyTracker, Invalidate, Tracker, Var, capture_dependencies};

pub use query::{Filter, LiveCollection, LiveItem, LiveObserver, LiveQuery, LiveSource, Query, SortFn};

pub use render::{
    // Output
    IntoOutput, Output, check_shape,
    // Patching
    DEFAULT_PATCH_BATCH_SIZE, PatchStats, Patcher,
    // Renders
    ItemRenderFn, ListHandle, ListOptions, RenderHandle,
    // Templates
    CompiledTemplate, Interpolator, ItemTemplate, RenderFn, Template, TemplateCompiler,
    TemplateData,
    // Focus and events
    EventMap, FocusManager, Handler, bind_events,
};

pub use ui::{Ui, UiConfig};
