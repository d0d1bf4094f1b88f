use serde::{Deserialize, Serialize};

/// Action phrases that identify the control to press.
///
/// Primary phrases are strong apply/submit signals; secondary phrases are
/// weaker verbs that often sit on the right control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        let primary = [
            "apply now",
            "easy apply",
            "quick apply",
            "instant apply",
            "one-click apply",
            "apply",
            "submit application",
            "postuler",
            "bewerben",
            "solicitar",
            "candidatar",
        ];
        let secondary = [
            "submit",
            "autofill",
            "continue",
            "send",
            "i'm interested",
            "start application",
        ];
        Self {
            primary: primary.into_iter().map(String::from).collect(),
            secondary: secondary.into_iter().map(String::from).collect(),
        }
    }
}

impl Vocabulary {
    pub fn all(&self) -> impl Iterator<Item = &str> {
        self.primary
            .iter()
            .chain(self.secondary.iter())
            .map(String::as_str)
    }

    /// Count of primary and secondary phrases contained in `text`.
    pub fn hits(&self, text: &str) -> (usize, usize) {
        let lower = text.to_lowercase();
        let count = |list: &[String]| list.iter().filter(|p| lower.contains(p.as_str())).count();
        (count(&self.primary), count(&self.secondary))
    }

    pub fn matches(&self, text: &str) -> bool {
        let (p, s) = self.hits(text);
        p + s > 0
    }

    /// Single-word tokens usable in `[attr*='..']` selectors.
    pub fn attribute_tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = Vec::new();
        for phrase in &self.primary {
            let token = phrase.replace(' ', "-");
            if token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') && !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }
}
