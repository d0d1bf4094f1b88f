use serde::{Deserialize, Serialize};

/// What a form field is for, inferred from weak textual signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPurpose {
    Email,
    FirstName,
    LastName,
    Phone,
    Resume,
    CoverLetter,
    Linkedin,
    Github,
    Website,
    Other,
}

/// Checked in order; the first category with a matching keyword wins.
const PURPOSE_KEYWORDS: &[(FieldPurpose, &[&str])] = &[
    (FieldPurpose::Email, &["email", "e-mail"]),
    (
        FieldPurpose::FirstName,
        &["firstname", "first_name", "first-name", "first", "fname", "given"],
    ),
    (
        FieldPurpose::LastName,
        &["lastname", "last_name", "last-name", "last", "lname", "surname", "family"],
    ),
    (FieldPurpose::Phone, &["phone", "mobile", "telephone"]),
    (FieldPurpose::Resume, &["resume", "résumé", "cv"]),
    (FieldPurpose::CoverLetter, &["cover", "letter", "motivation"]),
    (FieldPurpose::Linkedin, &["linkedin", "linked-in"]),
    (FieldPurpose::Github, &["github", "git-hub"]),
    (FieldPurpose::Website, &["website", "portfolio", "url", "homepage"]),
];

/// Infer purpose from `name + id + placeholder + label`.
pub fn infer_purpose(name: &str, id: &str, placeholder: &str, label: &str) -> FieldPurpose {
    let haystack = format!("{} {} {} {}", name, id, placeholder, label).to_lowercase();
    PURPOSE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(purpose, _)| *purpose)
        .unwrap_or(FieldPurpose::Other)
}

/// SSO providers and the tokens that reveal them.
pub const SSO_PROVIDERS: &[(&str, &[&str])] = &[
    ("google", &["google", "gmail"]),
    ("linkedin", &["linkedin"]),
    ("github", &["github"]),
    ("microsoft", &["microsoft", "outlook", "office365"]),
    ("facebook", &["facebook"]),
];

/// Provider named by a clickable element's text or class, if any.
pub fn detect_sso_provider(text: &str, class: &str) -> Option<&'static str> {
    let haystack = format!("{} {}", text, class).to_lowercase();
    SSO_PROVIDERS
        .iter()
        .find(|(_, tokens)| tokens.iter().any(|t| haystack.contains(t)))
        .map(|(provider, _)| *provider)
}

/// Verbs that mark a control as a submit action.
pub const SUBMIT_VERBS: &[&str] = &["submit", "apply", "send", "continue", "next", "save"];

pub fn is_submit_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    SUBMIT_VERBS.iter().any(|v| lower.contains(v))
}

/// Labels such as `Email *` mark a required field without the attribute.
pub fn looks_required(label: &str) -> bool {
    let trimmed = label.trim_end();
    trimmed.ends_with('*') || trimmed.to_lowercase().contains("(required)")
}
