//! `${...}` placeholder rendering for interception manifests
//!
//! Templates use shell-style placeholders (`${NAMESPACE}`, `${SESSION_ID}`) so
//! the same files can be fed to `envsubst` by hand. Rendering is strict: a
//! placeholder without a value is an error rather than an empty string.
//! `$${` produces a literal `${`.

use std::collections::BTreeMap;

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};

use crate::Error;

/// Placeholder for escaped `$${` during preprocessing
const ESCAPED_PLACEHOLDER: &str = "\x00__CARTA_ESCAPED_DOLLAR_BRACE__\x00";

/// Variables available to a manifest template
#[derive(Debug, Clone, Default)]
pub struct ManifestVars {
    vars: BTreeMap<String, String>,
}

impl ManifestVars {
    /// Variables for an interception run
    pub fn for_session(namespace: &str, session_id: &str) -> Self {
        Self::default()
            .with("NAMESPACE", namespace)
            .with("SESSION_ID", session_id)
    }

    /// Add or replace a variable
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Render `template` with the given variables
pub fn render(template: &str, vars: &ManifestVars) -> Result<String, Error> {
    let syntax = SyntaxConfig::builder()
        .variable_delimiters("${", "}")
        .block_delimiters("{%", "%}")
        .comment_delimiters("{#", "#}")
        .build()
        .map_err(|e| Error::Template(e.to_string()))?;

    let mut env = Environment::new();
    env.set_syntax(syntax);
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);

    let preprocessed = template.replace("$${", ESCAPED_PLACEHOLDER);
    let rendered = env
        .render_str(&preprocessed, &vars.vars)
        .map_err(|e| Error::Template(e.to_string()))?;

    Ok(rendered.replace(ESCAPED_PLACEHOLDER, "${"))
}
