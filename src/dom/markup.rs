//! Markup - Fragment parsing and serialization.
//!
//! The parser accepts well-formed HTML-like fragments: elements with quoted,
//! unquoted or boolean attributes, self-closing tags, the usual void
//! elements, text, comments and a handful of character references. Anything
//! it can't make sense of is an [`Error::Markup`] with a byte offset.

use super::document::{Document, NodeId, NodeKind};
use crate::error::{Error, Result};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose content is kept as raw text.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

// =============================================================================
// Parsing
// =============================================================================

impl Document {
    /// Parse `markup` into detached top-level nodes.
    pub fn parse_fragment(&self, markup: &str) -> Result<Vec<NodeId>> {
        FragmentParser {
            doc: self,
            src: markup,
            pos: 0,
            roots: Vec::new(),
            open: Vec::new(),
        }
        .parse()
    }
}

struct FragmentParser<'a> {
    doc: &'a Document,
    src: &'a str,
    pos: usize,
    roots: Vec<NodeId>,
    open: Vec<(NodeId, String)>,
}

impl<'a> FragmentParser<'a> {
    fn error(&self, reason: impl Into<String>) -> Error {
        Error::Markup {
            offset: self.pos,
            reason: reason.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn attach(&mut self, node: NodeId) -> Result<()> {
        match self.open.last() {
            Some(&(parent, _)) => self.doc.append_child(parent, node),
            None => {
                self.roots.push(node);
                Ok(())
            }
        }
    }

    fn parse(mut self) -> Result<Vec<NodeId>> {
        while self.pos < self.src.len() {
            let rest = self.rest();
            if rest.starts_with("<!--") {
                self.parse_comment()?;
            } else if rest.starts_with("</") {
                self.parse_end_tag()?;
            } else if rest.starts_with('<')
                && rest[1..].chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            {
                self.parse_start_tag()?;
            } else {
                self.parse_text()?;
            }
        }
        if let Some((_, tag)) = self.open.last() {
            return Err(self.error(format!("unclosed <{tag}>")));
        }
        Ok(self.roots)
    }

    fn parse_comment(&mut self) -> Result<()> {
        let body_start = self.pos + "<!--".len();
        let Some(len) = self.src[body_start..].find("-->") else {
            return Err(self.error("unterminated comment"));
        };
        let comment = self.doc.create_comment(&self.src[body_start..body_start + len]);
        self.pos = body_start + len + "-->".len();
        self.attach(comment)
    }

    fn parse_text(&mut self) -> Result<()> {
        // Always consume at least one character so a stray '<' makes progress
        let first = self.peek().map_or(0, char::len_utf8);
        let end = self.src[self.pos + first..]
            .find('<')
            .map_or(self.src.len(), |i| self.pos + first + i);
        let text = self.doc.create_text(decode_entities(&self.src[self.pos..end]));
        self.pos = end;
        self.attach(text)
    }

    fn parse_name(&mut self) -> Result<String> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '/' | '=' | '<'))
            .unwrap_or(rest.len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        let name = rest[..len].to_ascii_lowercase();
        self.pos += len;
        Ok(name)
    }

    fn parse_start_tag(&mut self) -> Result<()> {
        self.pos += 1;
        let tag = self.parse_name()?;
        let element = self.doc.create_element(&tag);

        let self_closing = loop {
            self.skip_whitespace();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                break true;
            }
            if rest.starts_with('>') {
                self.pos += 1;
                break false;
            }
            if rest.is_empty() {
                return Err(self.error(format!("unterminated <{tag}>")));
            }
            let (name, value) = self.parse_attribute()?;
            self.doc.set_attribute(element, &name, value)?;
        };

        self.attach(element)?;
        if self_closing || is_void(&tag) {
            return Ok(());
        }
        if is_raw_text(&tag) {
            let close = format!("</{tag}");
            let Some(len) = self.rest().to_ascii_lowercase().find(&close) else {
                return Err(self.error(format!("unclosed <{tag}>")));
            };
            if len > 0 {
                let text = self.doc.create_text(&self.src[self.pos..self.pos + len]);
                self.doc.append_child(element, text)?;
            }
            self.pos += len;
        }
        self.open.push((element, tag));
        Ok(())
    }

    fn parse_attribute(&mut self) -> Result<(String, String)> {
        let name = self.parse_name()?;
        self.skip_whitespace();
        if self.peek() != Some('=') {
            return Ok((name, String::new()));
        }
        self.pos += 1;
        self.skip_whitespace();
        let value = match self.peek() {
            Some(quote @ ('"' | '\'')) => {
                let start = self.pos + 1;
                let Some(len) = self.src[start..].find(quote) else {
                    return Err(self.error(format!("unterminated value for attribute {name:?}")));
                };
                self.pos = start + len + 1;
                &self.src[start..start + len]
            }
            _ => {
                let rest = self.rest();
                let len = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                let start = self.pos;
                self.pos += len;
                &self.src[start..start + len]
            }
        };
        Ok((name, decode_entities(value)))
    }

    fn parse_end_tag(&mut self) -> Result<()> {
        self.pos += 2;
        let tag = self.parse_name()?;
        self.skip_whitespace();
        if self.peek() != Some('>') {
            return Err(self.error(format!("malformed </{tag}>")));
        }
        self.pos += 1;
        match self.open.pop() {
            Some((_, open)) if open == tag => Ok(()),
            Some((_, open)) => Err(self.error(format!("expected </{open}>, found </{tag}>"))),
            None => Err(self.error(format!("unexpected </{tag}>"))),
        }
    }
}

fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest.find(';').and_then(|semi| {
            let name = &rest[1..semi];
            let c = match name {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ if name.starts_with("#x") || name.starts_with("#X") => {
                    u32::from_str_radix(&name[2..], 16).ok().and_then(char::from_u32)
                }
                _ if name.starts_with('#') => name[1..].parse().ok().and_then(char::from_u32),
                _ => None,
            };
            c.map(|c| (c, semi))
        });
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

// =============================================================================
// Serialization
// =============================================================================

/// Escape text for use in markup.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

impl Document {
    /// Markup for the node itself and everything below it.
    pub fn outer_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.write_node(node, &mut out);
        out
    }

    /// Markup for the node's children.
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_node(child, &mut out);
        }
        out
    }

    fn write_node(&self, node: NodeId, out: &mut String) {
        match self.kind(node) {
            NodeKind::Text => {
                let text = self.text(node).unwrap_or_default();
                let raw = self
                    .parent(node)
                    .and_then(|parent| self.tag(parent))
                    .is_some_and(|tag| is_raw_text(&tag));
                if raw {
                    out.push_str(&text);
                } else {
                    out.push_str(&escape_text(&text));
                }
            }
            NodeKind::Comment => {
                out.push_str("<!--");
                out.push_str(&self.text(node).unwrap_or_default());
                out.push_str("-->");
            }
            NodeKind::Element => {
                let tag = self.tag(node).unwrap_or_default();
                out.push('<');
                out.push_str(&tag);
                for (name, value) in self.attributes(node) {
                    out.push(' ');
                    out.push_str(&name);
                    out.push_str("=\"");
                    out.push_str(&escape_text(&value));
                    out.push('"');
                }
                out.push('>');
                if is_void(&tag) {
                    return;
                }
                for child in self.children(node) {
                    self.write_node(child, out);
                }
                out.push_str("</");
                out.push_str(&tag);
                out.push('>');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_fragment() {
        let doc = Document::new();
        let nodes = doc
            .parse_fragment(r#"<li class="todo" data-id=7>Buy <b>milk</b><br></li>"#)
            .unwrap();
        assert_eq!(nodes.len(), 1);
        let li = nodes[0];
        assert_eq!(doc.tag(li).as_deref(), Some("li"));
        assert_eq!(doc.get_attribute(li, "data-id").as_deref(), Some("7"));
        assert_eq!(doc.child_count(li), 3);
        assert_eq!(doc.text_content(li), "Buy milk");
        assert_eq!(
            doc.outer_html(li),
            r#"<li class="todo" data-id="7">Buy <b>milk</b><br></li>"#
        );
    }

    #[test]
    fn test_parse_multiple_roots_and_comments() {
        let doc = Document::new();
        let nodes = doc
            .parse_fragment("<p>a</p><!-- note --><input checked/>tail")
            .unwrap();
        let kinds: Vec<_> = nodes.iter().map(|&n| doc.kind(n)).collect();
        assert_eq!(
            kinds,
            vec![NodeKind::Element, NodeKind::Comment, NodeKind::Element, NodeKind::Text]
        );
        assert_eq!(doc.get_attribute(nodes[2], "checked").as_deref(), Some(""));
        assert_eq!(doc.text(nodes[3]).as_deref(), Some("tail"));
    }

    #[test]
    fn test_entities() {
        let doc = Document::new();
        // '<' followed by a letter always opens a tag
        let err = doc.parse_fragment("<span>a<b</span>").unwrap_err();
        assert!(matches!(err, Error::Markup { .. }));

        let nodes = doc
            .parse_fragment("<span title=\"a &quot;b&quot;\">1 &lt; 2 &amp; &#65;&#x42; &bogus; 3 < 4</span>")
            .unwrap();
        assert_eq!(doc.get_attribute(nodes[0], "title").as_deref(), Some("a \"b\""));
        assert_eq!(doc.text_content(nodes[0]), "1 < 2 & AB &bogus; 3 < 4");
    }

    #[test]
    fn test_raw_text_elements() {
        let doc = Document::new();
        let nodes = doc
            .parse_fragment("<script type=\"text/template\"><li><%= a %> &amp;</li></SCRIPT>")
            .unwrap();
        let script = nodes[0];
        assert_eq!(doc.child_count(script), 1);
        assert_eq!(doc.inner_html(script), "<li><%= a %> &amp;</li>");
        assert!(matches!(
            doc.parse_fragment("<style>p {}"),
            Err(Error::Markup { .. })
        ));
    }

    #[test]
    fn test_mismatched_tags() {
        let doc = Document::new();
        assert!(matches!(
            doc.parse_fragment("<ul><li></ul>"),
            Err(Error::Markup { .. })
        ));
        assert!(matches!(doc.parse_fragment("</p>"), Err(Error::Markup { .. })));
        assert!(matches!(doc.parse_fragment("<p"), Err(Error::Markup { .. })));
        assert!(matches!(
            doc.parse_fragment("<p title='x>"),
            Err(Error::Markup { .. })
        ));
    }
}
