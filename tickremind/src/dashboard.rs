use std::error::Error as StdError;
use std::fs;
use std::path::PathBuf;

use log::debug;
use tera::{Context, Tera};

use crate::proto::{Dashboard, Error as ServiceError};

const CREATE_USER_PROMPT: &str = r#"<div>Please create your user entry... {{ reason }}</div>
<form action="/create_user" method="post">
<div><input type="submit" value="Create User"></div>
</form>
"#;

/// Renders the HTML dashboard from a template file on disk.
///
/// The file is read on every render, edits show up without a restart.
#[derive(Debug, Clone)]
pub struct Renderer {
    template: PathBuf,
}

impl Renderer {
    pub fn new<P: Into<PathBuf>>(template: P) -> Self {
        Renderer {
            template: template.into(),
        }
    }

    pub fn render(&self, dashboard: &Dashboard) -> Result<String, ServiceError> {
        debug!("rendering {}", self.template.display());

        let source = fs::read_to_string(&self.template).map_err(|e| ServiceError::Template {
            error: format!("failed to read {}: {}", self.template.display(), e),
        })?;
        let context = Context::from_serialize(dashboard).map_err(template_error)?;

        Tera::one_off(&source, &context, true).map_err(template_error)
    }
}

/// Page shown instead of the dashboard to identities without settings.
pub fn create_user_prompt(reason: &ServiceError) -> Result<String, ServiceError> {
    let mut context = Context::new();
    context.insert("reason", &reason.to_string());

    Tera::one_off(CREATE_USER_PROMPT, &context, true).map_err(template_error)
}

// tera keeps the interesting part of the message in the source chain
fn template_error(err: tera::Error) -> ServiceError {
    let mut error = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        error.push_str(": ");
        error.push_str(&cause.to_string());
        source = cause.source();
    }

    ServiceError::Template { error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{RuleListing, TickEntryValue};
    use chrono::{TimeZone, Utc};

    fn bundled_template() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("templates/root.html")
    }

    fn dashboard() -> Dashboard {
        Dashboard {
            has_pebble: false,
            twitter: "test".into(),
            rules: vec![RuleListing {
                rule_name: "<weight>".into(),
                rule_key: "key-1".into(),
                entries: vec![TickEntryValue {
                    when: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
                    value: 79,
                }],
            }],
        }
    }

    #[test]
    fn renders_bundled_template() {
        let html = Renderer::new(bundled_template()).render(&dashboard()).unwrap();

        assert!(html.contains("&lt;weight&gt;"), "{}", html);
        assert!(html.contains("key-1"));
        assert!(html.contains("02/01/2020"));
        assert!(html.contains("79"));
    }

    #[test]
    fn missing_template_is_a_template_error() {
        let err = Renderer::new("/nonexistent/root.html")
            .render(&dashboard())
            .unwrap_err();

        match err {
            ServiceError::Template { error } => assert!(error.contains("/nonexistent/root.html")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn prompt_escapes_reason_and_posts_to_create_user() {
        let html = create_user_prompt(&ServiceError::SettingsNotFound {
            identity: "<script>".into(),
        })
        .unwrap();

        assert!(html.contains("action=\"/create_user\""));
        assert!(!html.contains("<script>"));
    }
}
