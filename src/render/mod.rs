//! Live rendering - Everything that keeps output in step with its inputs.
//!
//! - [`Patcher`] - In-place merge with a reentrancy queue
//! - [`RenderHandle`] - One template, re-rendered in place on invalidation
//! - [`ListHandle`] - A container kept in step with a live query
//! - [`FocusManager`] - Focus goals retried after every update
//! - [`EventMap`] / [`bind_events`] - Declarative event binding
//! - [`Template`] / [`Interpolator`] - What gets rendered
//!
//! Most code reaches these through [`Ui`](crate::Ui), which wires one
//! document, tracker, patcher and focus manager together.

mod events;
mod focus;
mod list;
mod output;
mod patch;
mod single;
mod template;

pub use events::{EventMap, Handler, bind_events};
pub use focus::FocusManager;
pub use list::{ItemRenderFn, ListHandle, ListOptions};
pub use output::{IntoOutput, Output, check_shape};
pub use patch::{DEFAULT_PATCH_BATCH_SIZE, PatchStats, Patcher};
pub use single::RenderHandle;
pub use template::{
    CompiledTemplate, Interpolator, ItemTemplate, RenderFn, Template, TemplateCompiler,
    TemplateData,
};

pub(crate) use list::{ListContext, render_list};
