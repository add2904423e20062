//! Minimal element tree rendered to HTML or terminal text.

use serde::Serialize;

/// Tags rendered without children or a closing tag.
const VOID_TAGS: &[&str] = &["br", "hr", "img", "input", "link", "meta"];

/// Tags that start a new line in text output.
const INLINE_TAGS: &[&str] = &["a", "b", "code", "em", "i", "span", "strong"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum View {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
        children: Vec<View>,
    },
    Text { text: String },
    Fragment { children: Vec<View> },
}

impl View {
    pub fn el(tag: impl Into<String>) -> Self {
        Self::Element {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub fn fragment(children: impl IntoIterator<Item = View>) -> Self {
        Self::Fragment {
            children: children.into_iter().collect(),
        }
    }

    /// Set an attribute, replacing any earlier value.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Self::Element { attrs, .. } = &mut self {
            let name = name.into();
            let value = value.into();
            match attrs.iter_mut().find(|(n, _)| *n == name) {
                Some(slot) => slot.1 = value,
                None => attrs.push((name, value)),
            }
        }
        self
    }

    pub fn class(self, class: impl Into<String>) -> Self {
        self.attr("class", class)
    }

    pub fn style(self, style: impl Into<String>) -> Self {
        self.attr("style", style)
    }

    pub fn child(mut self, child: View) -> Self {
        match &mut self {
            Self::Element { children, .. } | Self::Fragment { children } => children.push(child),
            Self::Text { .. } => {}
        }
        self
    }

    pub fn children(mut self, more: impl IntoIterator<Item = View>) -> Self {
        match &mut self {
            Self::Element { children, .. } | Self::Fragment { children } => children.extend(more),
            Self::Text { .. } => {}
        }
        self
    }

    /// Shorthand for `.child(View::text(..))`.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.child(View::text(text))
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        match self {
            Self::Element { attrs, .. } => attrs
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    /// Depth-first search for the first element with the given class.
    pub fn find_by_class(&self, class: &str) -> Option<&View> {
        if self
            .get_attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
        {
            return Some(self);
        }
        match self {
            Self::Element { children, .. } | Self::Fragment { children } => {
                children.iter().find_map(|c| c.find_by_class(class))
            }
            Self::Text { .. } => None,
        }
    }

    /// All elements with the given class, in document order.
    pub fn find_all_by_class<'a>(&'a self, class: &str) -> Vec<&'a View> {
        let mut found = Vec::new();
        self.collect_by_class(class, &mut found);
        found
    }

    fn collect_by_class<'a>(&'a self, class: &str, found: &mut Vec<&'a View>) {
        if self
            .get_attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
        {
            found.push(self);
        }
        if let Self::Element { children, .. } | Self::Fragment { children } = self {
            for child in children {
                child.collect_by_class(class, found);
            }
        }
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        self.write_html(&mut out);
        out
    }

    fn write_html(&self, out: &mut String) {
        match self {
            Self::Text { text } => out.push_str(&escape_html(text)),
            Self::Fragment { children } => {
                for child in children {
                    child.write_html(out);
                }
            }
            Self::Element {
                tag,
                attrs,
                children,
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_html(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_TAGS.contains(&tag.as_str()) {
                    return;
                }
                for child in children {
                    child.write_html(out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }

    /// Plain text, one line per block element.
    pub fn to_text(&self) -> String {
        let mut lines = Vec::new();
        let mut current = String::new();
        self.write_text(&mut lines, &mut current);
        flush_line(&mut lines, &mut current);
        lines.join("\n")
    }

    fn write_text(&self, lines: &mut Vec<String>, current: &mut String) {
        match self {
            Self::Text { text } => {
                let mut parts = text.split('\n');
                if let Some(first) = parts.next() {
                    current.push_str(first);
                }
                for part in parts {
                    flush_line(lines, current);
                    current.push_str(part);
                }
            }
            Self::Fragment { children } => {
                for child in children {
                    child.write_text(lines, current);
                }
            }
            Self::Element { tag, children, .. } => {
                let block = !INLINE_TAGS.contains(&tag.as_str());
                if block {
                    flush_line(lines, current);
                }
                if tag == "hr" {
                    lines.push("---".into());
                }
                for child in children {
                    child.write_text(lines, current);
                }
                if block {
                    flush_line(lines, current);
                }
            }
        }
    }
}

fn flush_line(lines: &mut Vec<String>, current: &mut String) {
    let line = current.trim_end();
    if !line.trim().is_empty() {
        lines.push(line.to_string());
    }
    current.clear();
}

/// Escape text for HTML content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
