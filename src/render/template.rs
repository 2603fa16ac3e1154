//! Templates - What a live render evaluates.
//!
//! A [`Template`] is one of:
//! - `Function`: a closure building nodes directly
//! - `Markup`: a string template, compiled once and parsed on every evaluation
//! - `Static`: existing nodes whose inner markup is used as a string template
//!
//! String templates are compiled by a [`TemplateCompiler`]. The default,
//! [`Interpolator`], understands two tags:
//!
//! ```text
//! <%= path.to.value %>   value, HTML-escaped
//! <%- path.to.value %>   value, inserted as-is
//! ```
//!
//! Values come from [`TemplateData`]. Missing paths render as the empty
//! string.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use super::output::{IntoOutput, Output};
use crate::dom::{Document, NodeId, NodeKind, escape_text};
use crate::error::{Error, Result};

// =============================================================================
// TEMPLATE DATA
// =============================================================================

/// A source of values for string templates.
pub trait TemplateData {
    /// The value at a dotted `path`, rendered as text.
    fn lookup(&self, path: &str) -> Option<String>;
}

impl TemplateData for () {
    fn lookup(&self, _path: &str) -> Option<String> {
        None
    }
}

/// Paths walk objects by key and arrays by index. Strings render without
/// quotes and `null` renders empty.
impl TemplateData for serde_json::Value {
    fn lookup(&self, path: &str) -> Option<String> {
        use serde_json::Value;

        let mut current = self;
        for key in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(key)?,
                Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(match current {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        })
    }
}

impl TemplateData for HashMap<String, String> {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

impl TemplateData for BTreeMap<String, String> {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

// =============================================================================
// COMPILER
// =============================================================================

/// A compiled string template.
pub type CompiledTemplate = Rc<dyn Fn(&dyn TemplateData) -> String>;

/// Turns template source into a [`CompiledTemplate`].
pub trait TemplateCompiler {
    fn compile(&self, source: &str) -> Result<CompiledTemplate>;
}

/// `<%= %>` / `<%- %>` interpolation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Interpolator;

#[derive(Debug, PartialEq, Eq)]
enum Segment {
    Text(String),
    Escaped(String),
    Raw(String),
}

fn parse_segments(source: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = source;
    let mut offset = 0;
    while let Some(start) = rest.find("<%") {
        if start > 0 {
            segments.push(Segment::Text(rest[..start].to_string()));
        }
        let error = |reason: &str| Error::Markup {
            offset: offset + start,
            reason: reason.to_string(),
        };
        let after = &rest[start + 2..];
        let escaped = match after.chars().next() {
            Some('=') => true,
            Some('-') => false,
            _ => return Err(error("only <%= %> and <%- %> tags are supported")),
        };
        let body = &after[1..];
        let Some(end) = body.find("%>") else {
            return Err(error("unterminated template tag"));
        };
        let path = body[..end].trim();
        if path.is_empty() {
            return Err(error("empty template tag"));
        }
        segments.push(if escaped {
            Segment::Escaped(path.to_string())
        } else {
            Segment::Raw(path.to_string())
        });
        let consumed = start + 3 + end + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest.to_string()));
    }
    Ok(segments)
}

impl TemplateCompiler for Interpolator {
    fn compile(&self, source: &str) -> Result<CompiledTemplate> {
        let segments = parse_segments(source)?;
        Ok(Rc::new(move |data: &dyn TemplateData| {
            let mut out = String::new();
            for segment in &segments {
                match segment {
                    Segment::Text(text) => out.push_str(text),
                    Segment::Escaped(path) => {
                        out.push_str(&escape_text(&data.lookup(path).unwrap_or_default()))
                    }
                    Segment::Raw(path) => out.push_str(&data.lookup(path).unwrap_or_default()),
                }
            }
            out
        }))
    }
}

// =============================================================================
// TEMPLATE
// =============================================================================

/// A render function: builds fresh nodes in the document on every call.
pub type RenderFn = Rc<dyn Fn(&Document) -> Result<Output>>;

/// Something a live render can evaluate.
#[derive(Clone)]
pub enum Template {
    Function(RenderFn),
    Markup(String),
    Static(Output),
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Template::Function(..)"),
            Self::Markup(source) => f.debug_tuple("Template::Markup").field(source).finish(),
            Self::Static(output) => f.debug_tuple("Template::Static").field(output).finish(),
        }
    }
}

impl Template {
    /// Wrap an infallible render function.
    pub fn function<O, F>(render: F) -> Self
    where
        O: IntoOutput,
        F: Fn(&Document) -> O + 'static,
    {
        Self::Function(Rc::new(move |doc: &Document| Ok(render(doc).into_output())))
    }

    /// Wrap a fallible render function.
    pub fn try_function<O, F>(render: F) -> Self
    where
        O: IntoOutput,
        F: Fn(&Document) -> Result<O> + 'static,
    {
        Self::Function(Rc::new(move |doc: &Document| {
            render(doc).map(IntoOutput::into_output)
        }))
    }

    pub fn markup(source: impl Into<String>) -> Self {
        Self::Markup(source.into())
    }

    /// Use the inner markup of existing nodes as a string template.
    pub fn from_nodes(nodes: impl IntoOutput) -> Self {
        Self::Static(nodes.into_output())
    }

    /// Normalize into something that can be evaluated repeatedly.
    ///
    /// String templates are compiled here, once.
    pub(crate) fn prepare(
        self,
        doc: &Document,
        compiler: &dyn TemplateCompiler,
    ) -> Result<PreparedTemplate> {
        match self {
            Self::Function(render) => Ok(PreparedTemplate::Function(render)),
            Self::Markup(source) => Ok(PreparedTemplate::Markup(compiler.compile(&source)?)),
            Self::Static(output) => {
                let source: String = output
                    .nodes()
                    .iter()
                    .map(|&node| doc.inner_html(node))
                    .collect();
                Ok(PreparedTemplate::Markup(compiler.compile(&source)?))
            }
        }
    }
}

impl From<&str> for Template {
    fn from(source: &str) -> Self {
        Self::markup(source)
    }
}

impl From<String> for Template {
    fn from(source: String) -> Self {
        Self::Markup(source)
    }
}

impl From<Output> for Template {
    fn from(output: Output) -> Self {
        Self::Static(output)
    }
}

impl From<NodeId> for Template {
    fn from(node: NodeId) -> Self {
        Self::Static(Output::Single(node))
    }
}

/// A template ready to evaluate.
#[derive(Clone)]
pub(crate) enum PreparedTemplate {
    Function(RenderFn),
    Markup(CompiledTemplate),
}

impl PreparedTemplate {
    pub(crate) fn is_markup(&self) -> bool {
        matches!(self, Self::Markup(_))
    }

    /// Build fresh nodes. `data` only feeds string templates.
    pub(crate) fn evaluate(&self, doc: &Document, data: &dyn TemplateData) -> Result<Output> {
        match self {
            Self::Function(render) => render(doc),
            Self::Markup(compiled) => markup_output(doc, &compiled(data)),
        }
    }
}

/// Parse rendered markup into an output, ignoring whitespace-only text
/// between top-level nodes.
fn markup_output(doc: &Document, markup: &str) -> Result<Output> {
    let nodes: Vec<NodeId> = doc
        .parse_fragment(markup)?
        .into_iter()
        .filter(|&node| {
            doc.kind(node) != NodeKind::Text
                || doc.text(node).is_some_and(|t| !t.trim().is_empty())
        })
        .collect();
    match nodes.len() {
        0 => Err(Error::contract("template produced no nodes")),
        1 => Ok(Output::Single(nodes[0])),
        _ => Ok(Output::Sequence(nodes)),
    }
}

// =============================================================================
// ITEM TEMPLATES
// =============================================================================

/// A string template rendered with a list item as its data.
pub struct ItemTemplate<T> {
    pub(crate) template: Template,
    pub(crate) data: fn(&T) -> &dyn TemplateData,
}

impl<T> Clone for ItemTemplate<T> {
    fn clone(&self) -> Self {
        Self {
            template: self.template.clone(),
            data: self.data,
        }
    }
}

impl<T> fmt::Debug for ItemTemplate<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ItemTemplate").field(&self.template).finish()
    }
}

fn as_template_data<T: TemplateData + 'static>(item: &T) -> &dyn TemplateData {
    item
}

impl<T: TemplateData + 'static> ItemTemplate<T> {
    /// `template` should be `Markup` or `Static`; render functions can't
    /// see the item.
    pub fn new(template: impl Into<Template>) -> Self {
        Self {
            template: template.into(),
            data: as_template_data::<T>,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn render(source: &str, data: &dyn TemplateData) -> String {
        Interpolator.compile(source).unwrap()(data)
    }

    #[test]
    fn test_json_lookup() {
        let data = json!({"title": "Milk", "tags": ["a", "b"], "meta": {"n": 2, "x": null}});
        assert_eq!(data.lookup("title").as_deref(), Some("Milk"));
        assert_eq!(data.lookup("tags.1").as_deref(), Some("b"));
        assert_eq!(data.lookup("meta.n").as_deref(), Some("2"));
        assert_eq!(data.lookup("meta.x").as_deref(), Some(""));
        assert_eq!(data.lookup("meta.missing"), None);
        assert_eq!(data.lookup("title.deeper"), None);
    }

    #[test]
    fn test_interpolation() {
        let data = json!({"name": "<b>Bo</b>", "id": 3});
        assert_eq!(
            render("<li data-id=\"<%= id %>\"><%= name %> / <%- name %></li>", &data),
            "<li data-id=\"3\">&lt;b&gt;Bo&lt;/b&gt; / <b>Bo</b></li>"
        );
        assert_eq!(render("<p><%= nope %></p>", &()), "<p></p>");

        let mut map = HashMap::new();
        map.insert("k".to_string(), "v".to_string());
        assert_eq!(render("<%=k%>", &map), "v");
    }

    #[test]
    fn test_bad_tags() {
        for source in ["<% code %>", "<%= open", "<%=  %>"] {
            assert!(
                matches!(Interpolator.compile(source), Err(Error::Markup { .. })),
                "{source:?} should not compile"
            );
        }
    }

    #[test]
    fn test_markup_output_shapes() {
        let doc = Document::new();
        let single = markup_output(&doc, "\n  <li>a</li>\n").unwrap();
        assert!(matches!(single, Output::Single(_)));
        let seq = markup_output(&doc, "<dt>a</dt> <dd>b</dd>").unwrap();
        assert_eq!(seq.len(), 2);
        assert!(matches!(
            markup_output(&doc, "   "),
            Err(Error::ContractViolation(_))
        ));
    }

    #[test]
    fn test_static_template_uses_inner_markup() {
        let doc = Document::new();
        let holder = doc
            .parse_fragment("<script><li><%= title %></li></script>")
            .unwrap()[0];
        let prepared = Template::from(holder).prepare(&doc, &Interpolator).unwrap();
        assert!(prepared.is_markup());
        let output = prepared.evaluate(&doc, &json!({"title": "x"})).unwrap();
        assert_eq!(doc.outer_html(output.nodes()[0]), "<li>x</li>");
    }

    #[test]
    fn test_function_templates() {
        let doc = Document::new();
        let prepared = Template::function(|doc: &Document| doc.create_element("p"))
            .prepare(&doc, &Interpolator)
            .unwrap();
        assert!(matches!(prepared.evaluate(&doc, &()).unwrap(), Output::Single(_)));

        let failing = Template::try_function(|_: &Document| -> Result<NodeId> {
            Err(Error::contract("nope"))
        });
        let prepared = failing.prepare(&doc, &Interpolator).unwrap();
        assert!(prepared.evaluate(&doc, &()).is_err());
    }
}
