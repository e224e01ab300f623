use std::fmt::Write;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    /// Markup emitted verbatim.
    Raw(String),
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(text.to_string())
    }
}

impl From<String> for Node {
    fn from(text: String) -> Self {
        Node::Text(text)
    }
}

/// A server-side UI tree. An element without a tag is a fragment.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Element {
    tag: Option<String>,
    attributes: Vec<(String, String)>,
    children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
            ..Default::default()
        }
    }

    pub fn fragment() -> Self {
        Self::default()
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((name.into(), value.into()));
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I, N>(mut self, children: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.child(Node::Text(text.into()))
    }

    pub fn raw(self, markup: impl Into<String>) -> Self {
        self.child(Node::Raw(markup.into()))
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Serialize to markup.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        let Some(tag) = &self.tag else {
            for child in &self.children {
                child.write_html(out);
            }
            return;
        };

        out.push('<');
        out.push_str(tag);
        for (name, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", name, escape(value));
        }
        out.push('>');
        if VOID_TAGS.contains(&tag.as_str()) {
            return;
        }
        for child in &self.children {
            child.write_html(out);
        }
        let _ = write!(out, "</{tag}>");
    }
}

impl Node {
    fn write_html(&self, out: &mut String) {
        match self {
            Node::Element(element) => element.write_html(out),
            Node::Text(text) => out.push_str(&escape(text)),
            Node::Raw(markup) => out.push_str(markup),
        }
    }
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_nested_markup() {
        let element = Element::new("ul")
            .attr("class", "list")
            .child(Element::new("li").text("a < b"))
            .child(Element::new("br"));
        assert_eq!(
            element.to_html(),
            r#"<ul class="list"><li>a &lt; b</li><br></ul>"#
        );
    }

    #[test]
    fn test_fragment_has_no_wrapper() {
        let element = Element::fragment().text("x").raw("<b>y</b>");
        assert_eq!(element.to_html(), "x<b>y</b>");
    }
}
