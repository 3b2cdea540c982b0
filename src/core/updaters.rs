//! Targeted single-field updates on configuration text.
//!
//! Each updater applies a narrow, anchored transform: exactly one
//! `set $upstream_*` line may match, otherwise the file is refused as
//! malformed. The transforms are pure; the caller owns locking, backups and
//! the atomic replacement.
use std::sync::Arc;

use regex::Regex;

use crate::core::{
    error::{OpError, OpResult},
    mcp::{DEFAULT_MCP_PATH, McpOperations},
    requests::UpdateKind,
    structure, validate,
};

pub struct ConfigFieldUpdaters {
    mcp: Arc<McpOperations>,
}

impl ConfigFieldUpdaters {
    pub fn new(mcp: Arc<McpOperations>) -> Self {
        Self { mcp }
    }

    /// Apply one update kind to `content`. Returns the new content and
    /// whether it differs from the input.
    pub fn apply(&self, kind: UpdateKind, value: &str, content: &str) -> OpResult<(String, bool)> {
        let updated = match kind {
            UpdateKind::Port => {
                let port = validate::parse_port(value)?;
                replace_upstream_line(content, "upstream_port", &port.to_string())?
            }
            UpdateKind::Upstream => {
                validate::validate_upstream_app(value)?;
                replace_upstream_line(content, "upstream_app", value)?
            }
            UpdateKind::App => apply_app_update(content, value)?,
            UpdateKind::AddMcp => {
                let path = if value.is_empty() { DEFAULT_MCP_PATH } else { value };
                self.mcp.splice_location(content, path)?
            }
        };

        // The file must still satisfy the structural guarantees after the
        // transform.
        structure::verify_base(&updated).map_err(OpError::MalformedConfig)?;

        let changed = updated != content;
        Ok((updated, changed))
    }
}

/// Replace the value in the single `set $VAR "...";` line. Zero or multiple
/// matching lines mean the file does not have the shape this surgery
/// assumes.
fn replace_upstream_line(content: &str, variable: &str, value: &str) -> OpResult<String> {
    let pattern = Regex::new(&format!(
        r#"(?m)^(\s*set\s+\${variable}\s+")([^"]*)("\s*;\s*)$"#
    ))
    .expect("invalid upstream line regex");

    let matches = pattern.find_iter(content).count();
    if matches == 0 {
        return Err(OpError::MalformedConfig(format!(
            "no 'set ${variable}' line found"
        )));
    }
    if matches > 1 {
        return Err(OpError::MalformedConfig(format!(
            "{matches} 'set ${variable}' lines found, expected exactly one"
        )));
    }

    Ok(pattern
        .replace(content, format!("${{1}}{value}${{3}}"))
        .into_owned())
}

/// `app` updates accept `HOST` or `HOST:PORT` and rewrite both directives
/// in one pass so the caller can commit them in a single atomic write.
fn apply_app_update(content: &str, value: &str) -> OpResult<String> {
    let (host, port) = match value.split_once(':') {
        Some((host, port)) => (host, Some(validate::parse_port(port)?)),
        None => (value, None),
    };
    validate::validate_upstream_app(host)?;

    let mut updated = replace_upstream_line(content, "upstream_app", host)?;
    if let Some(port) = port {
        updated = replace_upstream_line(&updated, "upstream_port", &port.to_string())?;
    }
    Ok(updated)
}
