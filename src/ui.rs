//! Ui - The context every live render is created from.
//!
//! A `Ui` owns one document and wires it to one dependency tracker, one
//! patcher (so reentrant patches from any render share a queue) and one
//! focus manager (so there is a single focus goal).
//!
//! # Example
//!
//! ```ignore
//! use liveui::{Ui, Template};
//!
//! let ui = Ui::new();
//! let name = ui.tracker().var("world".to_string());
//!
//! let greeting = {
//!     let name = name.clone();
//!     ui.render(Template::function(move |doc: &Document| {
//!         let p = doc.create_element("p");
//!         doc.append_child(p, doc.create_text(format!("hello {}", name.get()))).ok();
//!         p
//!     }))?
//! };
//!
//! name.set("there".to_string())?;   // same <p>, new text
//! ```

use std::fmt;
use std::rc::Rc;

use crate::dom::{Document, ListenerId, NodeId};
use crate::error::Result;
use crate::query::{LiveItem, LiveSource};
use crate::reactive::{DependencyTracker, Tracker};
use crate::render::{
    self, DEFAULT_PATCH_BATCH_SIZE, EventMap, FocusManager, Interpolator, ListContext, ListHandle,
    ListOptions, Patcher, RenderHandle, Template, TemplateCompiler,
};

// =============================================================================
// CONFIG
// =============================================================================

/// Settings for a [`Ui`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UiConfig {
    /// Patch requests drained per batch.
    pub patch_batch_size: usize,
    /// Try a focus request immediately instead of waiting for the next update.
    pub focus_on_request: bool,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            patch_batch_size: DEFAULT_PATCH_BATCH_SIZE,
            focus_on_request: true,
        }
    }
}

// =============================================================================
// UI
// =============================================================================

struct UiInner {
    doc: Document,
    tracker: Tracker,
    patcher: Rc<Patcher>,
    focus: Rc<FocusManager>,
    compiler: Rc<dyn TemplateCompiler>,
    config: UiConfig,
}

/// Shared rendering context. Clones share everything.
#[derive(Clone)]
pub struct Ui {
    inner: Rc<UiInner>,
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Ui {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ui")
            .field("doc", &self.inner.doc)
            .field("config", &self.inner.config)
            .field("patcher", &self.inner.patcher)
            .field("focus", &self.inner.focus)
            .finish()
    }
}

impl Ui {
    pub fn new() -> Self {
        Self::with_config(UiConfig::default())
    }

    pub fn with_config(config: UiConfig) -> Self {
        Self::with_compiler(config, Rc::new(Interpolator))
    }

    /// Use a different compiler for string templates.
    pub fn with_compiler(config: UiConfig, compiler: Rc<dyn TemplateCompiler>) -> Self {
        let doc = Document::new();
        tracing::debug!(?config, "ui created");
        Self {
            inner: Rc::new(UiInner {
                patcher: Rc::new(Patcher::with_batch_size(doc.clone(), config.patch_batch_size)),
                focus: Rc::new(FocusManager::with_options(doc.clone(), config.focus_on_request)),
                tracker: Tracker::new(),
                compiler,
                config,
                doc,
            }),
        }
    }

    pub fn document(&self) -> &Document {
        &self.inner.doc
    }

    /// The tracker renders subscribe through. Create reactive values here.
    pub fn tracker(&self) -> &Tracker {
        &self.inner.tracker
    }

    pub fn patcher(&self) -> &Patcher {
        &self.inner.patcher
    }

    pub fn focus_manager(&self) -> &FocusManager {
        &self.inner.focus
    }

    pub fn config(&self) -> UiConfig {
        self.inner.config
    }

    fn dependency_tracker(&self) -> Rc<dyn DependencyTracker> {
        Rc::new(self.inner.tracker.clone())
    }

    // -------------------------------------------------------------------------
    // Focus
    // -------------------------------------------------------------------------

    /// Give focus to the first element matching `selector`, now or as soon
    /// as a live update makes one appear. A later request replaces this one.
    pub fn focus(&self, selector: &str) -> Result<bool> {
        self.inner.focus.request_focus(selector)
    }

    pub fn retry_focus(&self) -> bool {
        self.inner.focus.retry_focus()
    }

    // -------------------------------------------------------------------------
    // Rendering
    // -------------------------------------------------------------------------

    /// Render `template` and keep its output up to date in place.
    pub fn render(&self, template: impl Into<Template>) -> Result<RenderHandle> {
        let prepared = template
            .into()
            .prepare(&self.inner.doc, &*self.inner.compiler)?;
        RenderHandle::start(
            self.inner.doc.clone(),
            self.dependency_tracker(),
            Rc::clone(&self.inner.patcher),
            Rc::clone(&self.inner.focus),
            prepared,
        )
    }

    /// Like [`render`](Self::render), then bind `events` to every output
    /// node with `data` as the event data. Listeners survive re-renders.
    pub fn render_with_events<D: 'static>(
        &self,
        template: impl Into<Template>,
        events: &EventMap<D>,
        data: D,
    ) -> Result<RenderHandle> {
        events.validate()?;
        let handle = self.render(template)?;
        let data = Rc::new(data);
        for node in handle.nodes() {
            render::bind_events(&self.inner.doc, node, events, &data)?;
        }
        Ok(handle)
    }

    /// Replace the children of `container` with one node per item of a live
    /// query on `source`, and keep them in step.
    pub fn render_list<T, S>(
        &self,
        source: &S,
        container: NodeId,
        options: ListOptions<T>,
    ) -> Result<ListHandle<T>>
    where
        T: LiveItem,
        S: LiveSource<T> + ?Sized,
    {
        render::render_list(
            ListContext {
                doc: &self.inner.doc,
                tracker: self.dependency_tracker(),
                focus: Rc::clone(&self.inner.focus),
                compiler: &*self.inner.compiler,
            },
            source,
            container,
            options,
        )
    }

    /// Bind `events` to an existing node.
    pub fn bind_events<D: 'static>(
        &self,
        node: NodeId,
        events: &EventMap<D>,
        data: D,
    ) -> Result<Vec<ListenerId>> {
        render::bind_events(&self.inner.doc, node, events, &Rc::new(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Selector;
    use crate::error::Error;
    use std::cell::Cell;

    fn setup() -> (Ui, NodeId) {
        let ui = Ui::new();
        let doc = ui.document();
        let main = doc.create_element("main");
        doc.append_child(doc.root(), main).unwrap();
        (ui, main)
    }

    #[test]
    fn test_default_config() {
        let config = UiConfig::default();
        assert_eq!(config.patch_batch_size, 10);
        assert!(config.focus_on_request);
        assert_eq!(Ui::new().config(), config);
    }

    #[test]
    fn test_render_markup_with_events() {
        let (ui, main) = setup();
        let clicks = Rc::new(Cell::new(0));
        let events = {
            let clicks = clicks.clone();
            EventMap::new().on("click button", move |step: &i32, _| clicks.set(clicks.get() + step))
        };
        let handle = ui
            .render_with_events("<div><button>go</button></div>", &events, 2)
            .unwrap();
        let div = handle.node().unwrap();
        ui.document().append_child(main, div).unwrap();

        let button = ui
            .document()
            .query_selector(&Selector::parse("main button").unwrap())
            .unwrap();
        ui.document().dispatch_event(button, "click");
        assert_eq!(clicks.get(), 2);
    }

    #[test]
    fn test_grouped_selector_trigger() {
        let (ui, main) = setup();
        let hits = Rc::new(Cell::new(0));
        let events = {
            let hits = hits.clone();
            EventMap::new().on("click .a,.b", move |_: &(), _| hits.set(hits.get() + 1))
        };
        let handle = ui
            .render_with_events(
                r#"<div><span class="a">a</span><span class="b">b</span></div>"#,
                &events,
                (),
            )
            .unwrap();
        ui.document().append_child(main, handle.node().unwrap()).unwrap();

        let b = ui
            .document()
            .query_selector(&Selector::parse("main .b").unwrap())
            .unwrap();
        ui.document().dispatch_event(b, "click");
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_invalid_event_map_fails_before_render() {
        let (ui, _main) = setup();
        let events: EventMap<()> = EventMap::new().on("click ]", |_, _| {});
        let before = ui.document().node_count();
        assert!(matches!(
            ui.render_with_events("<p>x</p>", &events, ()),
            Err(Error::Selector { .. })
        ));
        assert_eq!(ui.document().node_count(), before);
    }

    #[test]
    fn test_custom_compiler() {
        struct Shouting;
        impl TemplateCompiler for Shouting {
            fn compile(&self, source: &str) -> Result<crate::render::CompiledTemplate> {
                let upper = source.to_uppercase();
                Ok(Rc::new(move |_: &dyn crate::render::TemplateData| upper.clone()))
            }
        }

        let ui = Ui::with_compiler(UiConfig::default(), Rc::new(Shouting));
        let handle = ui.render("<p>hi</p>").unwrap();
        assert_eq!(ui.document().outer_html(handle.node().unwrap()), "<p>HI</p>");
    }
}
