//! Document substrate - The tree live renders write into.
//!
//! This module provides the pieces a browser would normally supply:
//! - [`Document`] - Arena-backed element tree with focus and mutation observers
//! - [`Selector`] - Selector parsing and matching
//! - Events - Direct and delegated listeners with bubbling dispatch
//! - Markup - Fragment parsing and serialization
//!
//! # Architecture
//!
//! Nodes are NOT objects. They are indices into one arena per document:
//!
//! ```text
//! node#0: <body>  (parent=None,    children=[1])
//! node#1: <ul>    (parent=node#0,  children=[2, 3])
//! node#2: <li>    (parent=node#1,  children=[])
//! node#3: "text"  (parent=node#1)
//! ```
//!
//! A `NodeId` therefore stays valid (and keeps its identity) for the
//! lifetime of the document, which is what in-place patching relies on.

mod document;
mod events;
mod markup;
mod selector;

pub use document::*;
pub use events::{Event, Listener, ListenerId};
pub use markup::escape_text;
pub use selector::Selector;
