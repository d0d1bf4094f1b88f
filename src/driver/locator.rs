use super::ElementSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How to find elements in the live document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Selector {
    /// CSS selector, evaluated with `querySelectorAll`.
    Css(String),
    /// Case-insensitive substring of an element's visible text. Matches the
    /// deepest elements containing the phrase.
    Text(String),
}

impl Selector {
    pub fn css(selector: impl Into<String>) -> Self {
        Selector::Css(selector.into())
    }

    pub fn text(phrase: impl Into<String>) -> Self {
        Selector::Text(phrase.into())
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Css(s) => write!(f, "css:{}", s),
            Selector::Text(t) => write!(f, "text:{}", t),
        }
    }
}

/// Immutable, re-evaluable description of one element.
///
/// Re-acquisition tries `selector`, then `element_id`, then `text` near
/// `position`, in that order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Locator {
    pub selector: Selector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Top-left corner in document coordinates when the locator was built.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64)>,
}

impl Locator {
    pub fn css(selector: impl Into<String>) -> Self {
        Self {
            selector: Selector::Css(selector.into()),
            element_id: None,
            text: None,
            position: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.element_id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.position = Some((x, y));
        self
    }

    /// Build the most specific stable locator for an element:
    /// `#id`, then `[name='..']`, then `tag.class`, then the bare tag.
    pub fn from_snapshot(snapshot: &ElementSnapshot) -> Self {
        let tag = if snapshot.tag.is_empty() {
            "*".to_string()
        } else {
            snapshot.tag.to_lowercase()
        };
        let id = non_empty(snapshot.id.as_deref());
        let name = non_empty(snapshot.name.as_deref());
        let first_class = snapshot
            .class
            .as_deref()
            .and_then(|c| c.split_whitespace().next())
            .filter(|c| is_css_ident(c));

        let css = if let Some(id) = id {
            if is_css_ident(id) {
                format!("#{}", id)
            } else {
                format!("[id={}]", css_attr_value(id))
            }
        } else if let Some(name) = name {
            format!("{}[name={}]", tag, css_attr_value(name))
        } else if let Some(class) = first_class {
            format!("{}.{}", tag, class)
        } else {
            tag
        };

        let text = snapshot.display_text();
        Self {
            selector: Selector::Css(css),
            element_id: id.map(str::to_string),
            text: if text.is_empty() {
                None
            } else {
                Some(text.chars().take(100).collect())
            },
            position: snapshot.bbox.map(|b| (b.x, b.y)),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selector)?;
        if let Some(text) = &self.text {
            write!(f, " \"{}\"", text)?;
        }
        Ok(())
    }
}

/// Quote a value for use inside a CSS attribute selector.
pub fn css_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            '\n' => out.push_str("\\a "),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn is_css_ident(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
