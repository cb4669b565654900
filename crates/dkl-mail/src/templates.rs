//! HTML templates for outbound notifications.
//!
//! Templates are plain HTML files with `{{ path.to.field }}` placeholders
//! resolved against the serialized request. Substituted values are
//! HTML-escaped.

use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{MailError, Result};

pub const CONTACT_ADMIN_TEMPLATE: &str = "contact_admin_email.html";
pub const CONTACT_TEMPLATE: &str = "contact_email.html";
pub const REGISTRATION_ADMIN_TEMPLATE: &str = "aanmelding_admin_email.html";
pub const REGISTRATION_TEMPLATE: &str = "aanmelding_email.html";

/// Every template the delivery engine may ask for.
pub const TEMPLATE_NAMES: [&str; 4] = [
    CONTACT_ADMIN_TEMPLATE,
    CONTACT_TEMPLATE,
    REGISTRATION_ADMIN_TEMPLATE,
    REGISTRATION_TEMPLATE,
];

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?([A-Za-z0-9_]+(?:\.[A-Za-z0-9_]+)*)\s*\}\}").expect("valid regex")
});

/// Renders a named template with request data.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, name: &str, data: &Value) -> Result<String>;
}

/// In-memory template sources keyed by file name.
#[derive(Clone, Debug, Default)]
pub struct TemplateStore {
    templates: HashMap<String, String>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the fixed template set from `dir`. Missing files are logged and
    /// left unregistered, so sends that need them fail with
    /// `TemplateNotFound`.
    pub fn load_dir(dir: &Path) -> Self {
        let mut store = Self::new();
        for name in TEMPLATE_NAMES {
            let path = dir.join(name);
            match std::fs::read_to_string(&path) {
                Ok(source) => {
                    debug!(template = name, "loaded template");
                    store.register(name, source);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "failed to load template"),
            }
        }
        info!(count = store.len(), dir = %dir.display(), "templates loaded");
        store
    }

    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateRenderer for TemplateStore {
    fn render(&self, name: &str, data: &Value) -> Result<String> {
        let source = self
            .templates
            .get(name)
            .ok_or_else(|| MailError::TemplateNotFound(name.to_string()))?;

        let rendered = PLACEHOLDER_RE.replace_all(source, |caps: &Captures| {
            let path = &caps[1];
            match lookup(data, path) {
                Some(value) => escape_html(&display_value(value)),
                None => {
                    debug!(template = name, field = path, "placeholder has no value");
                    String::new()
                }
            }
        });
        Ok(rendered.into_owned())
    }
}

/// Follow a dotted path through nested objects.
fn lookup<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |value, key| value.get(key))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(true) => "ja".to_string(),
        Value::Bool(false) => "nee".to_string(),
        other => other.to_string(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> TemplateStore {
        let mut store = TemplateStore::new();
        store.register(
            CONTACT_TEMPLATE,
            "<p>Beste {{ contact.naam }},</p><p>{{contact.bericht}}</p><p>{{ .contact.privacy_akkoord }}</p>",
        );
        store
    }

    #[test]
    fn test_render_nested_fields() {
        let data = json!({ "contact": { "naam": "Jan", "bericht": "Hoi", "privacy_akkoord": true } });
        let html = store().render(CONTACT_TEMPLATE, &data).unwrap();
        assert_eq!(html, "<p>Beste Jan,</p><p>Hoi</p><p>ja</p>");
    }

    #[test]
    fn test_render_escapes_values() {
        let data = json!({ "contact": { "naam": "<script>x</script>", "bericht": "a & b" } });
        let html = store().render(CONTACT_TEMPLATE, &data).unwrap();
        assert!(html.contains("&lt;script&gt;x&lt;/script&gt;"));
        assert!(html.contains("a &amp; b"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_missing_value_renders_empty() {
        let data = json!({ "contact": { "naam": "Jan" } });
        let html = store().render(CONTACT_TEMPLATE, &data).unwrap();
        assert_eq!(html, "<p>Beste Jan,</p><p></p><p></p>");
    }

    #[test]
    fn test_unregistered_template() {
        let err = store()
            .render(REGISTRATION_TEMPLATE, &json!({}))
            .unwrap_err();
        assert!(matches!(err, MailError::TemplateNotFound(ref n) if n == REGISTRATION_TEMPLATE));
    }

    #[test]
    fn test_load_dir_partial() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONTACT_ADMIN_TEMPLATE), "<p>{{ contact.email }}</p>").unwrap();

        let store = TemplateStore::load_dir(dir.path());
        assert_eq!(store.len(), 1);
        assert!(store.contains(CONTACT_ADMIN_TEMPLATE));
        assert!(!store.contains(CONTACT_TEMPLATE));
    }

    #[test]
    fn test_numbers_render_plainly() {
        let mut store = TemplateStore::new();
        store.register("n.html", "{{ a.b }}");
        assert_eq!(store.render("n.html", &json!({ "a": { "b": 42 } })).unwrap(), "42");
    }
}
