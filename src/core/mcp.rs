//! MCP location surgery on existing configurations.
//!
//! Recovers the upstream and auth method from an active file, renders the
//! `mcp_location_block` template, and splices the block into the outermost
//! `server { ... }` block. The operations here are pure text transforms;
//! locking, backups and the final write belong to the caller.
use std::{collections::BTreeMap, sync::Arc};

use minijinja::value::Value;
use regex::Regex;

use crate::core::{
    error::{OpError, OpResult},
    requests::AuthMethod,
    structure,
    templates::{TemplateManager, TemplateVars},
    validate,
};

/// Default location path for spliced MCP blocks.
pub const DEFAULT_MCP_PATH: &str = "/mcp";

pub struct McpOperations {
    templates: Arc<TemplateManager>,
}

impl McpOperations {
    pub fn new(templates: Arc<TemplateManager>) -> Self {
        Self { templates }
    }

    /// Produce the new file content with an MCP location block added at
    /// `mcp_path`. Fails with [`OpError::Conflict`] if a location for that
    /// path already exists, and with [`OpError::MalformedConfig`] when the
    /// file does not expose the expected upstream directives.
    pub fn splice_location(&self, content: &str, mcp_path: &str) -> OpResult<String> {
        validate::validate_mcp_path(mcp_path)?;

        if location_exists(content, mcp_path) {
            return Err(OpError::Conflict(format!(
                "location {mcp_path} already exists in configuration"
            )));
        }

        let upstream_app = extract_upstream_value(content, "upstream_app")?;
        let upstream_port = extract_upstream_value(content, "upstream_port")?;
        let upstream_proto = match extract_upstream_value(content, "upstream_proto")?.as_str() {
            "https" => "https",
            _ => "http",
        };
        let auth_method = detect_auth_method(content);

        let mut vars: TemplateVars = BTreeMap::new();
        vars.insert("mcp_path".to_string(), Value::from(mcp_path));
        vars.insert("upstream_app".to_string(), Value::from(upstream_app));
        vars.insert("upstream_port".to_string(), Value::from(upstream_port));
        vars.insert("upstream_proto".to_string(), Value::from(upstream_proto));
        vars.insert(
            "auth_method".to_string(),
            Value::from(auth_method.as_str()),
        );

        let block = self.templates.render("mcp_location_block", vars)?;
        let updated = insert_location_block(content, &block)?;

        structure::verify_base(&updated).map_err(OpError::MalformedConfig)?;
        Ok(updated)
    }
}

/// Does a location block for `path` already exist? `=` and `^~` modifiers
/// count as the same location.
pub fn location_exists(content: &str, path: &str) -> bool {
    let pattern = Regex::new(&format!(
        r"(?m)^\s*location\s+(?:=\s+|\^~\s+)?{}\s*\{{",
        regex::escape(path)
    ))
    .expect("invalid location regex");
    pattern.is_match(content)
}

/// Pull the value out of a `set $NAME "VALUE";` directive.
pub fn extract_upstream_value(content: &str, variable: &str) -> OpResult<String> {
    let pattern = Regex::new(&format!(r#"set\s+\${variable}\s+"([^"]*)""#))
        .expect("invalid upstream extraction regex");
    pattern
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .ok_or_else(|| {
            OpError::MalformedConfig(format!("could not find ${variable} in configuration"))
        })
}

/// Recover the auth method from the include markers on the default
/// `location /` block. Basic auth is recognized by an `auth_basic`
/// directive; no marker means `none`.
pub fn detect_auth_method(content: &str) -> AuthMethod {
    let lines: Vec<&str> = content.lines().collect();
    let scope = default_location_body(&lines).unwrap_or_else(|| content.to_string());

    for (marker, method) in [
        ("authelia-location.conf", AuthMethod::Authelia),
        ("authentik-location.conf", AuthMethod::Authentik),
        ("ldap-location.conf", AuthMethod::Ldap),
        ("tinyauth-location.conf", AuthMethod::Tinyauth),
    ] {
        if scope.contains(marker) {
            return method;
        }
    }
    if scope.contains("auth_basic") {
        return AuthMethod::Basic;
    }
    AuthMethod::None
}

/// Extract the body of the default `location / { ... }` block, when the
/// braces balance.
fn default_location_body(lines: &[&str]) -> Option<String> {
    let opener = Regex::new(r"^\s*location\s+/\s*\{").expect("invalid default location regex");
    let start = lines.iter().position(|line| opener.is_match(line))?;

    let mut depth = 0i32;
    for (offset, line) in lines[start..].iter().enumerate() {
        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
        if depth == 0 {
            return Some(lines[start..=start + offset].join("\n"));
        }
    }
    None
}

/// Insert a rendered block immediately before the closing brace of the
/// outermost server block, preceded by one blank line.
pub fn insert_location_block(content: &str, block: &str) -> OpResult<String> {
    let lines: Vec<&str> = content.lines().collect();
    let (_, closing) =
        structure::server_block_bounds(&lines).map_err(OpError::MalformedConfig)?;

    let mut out: Vec<String> = lines.iter().map(|line| line.to_string()).collect();
    out.insert(closing, block.trim_end().to_string());
    out.insert(closing, String::new());

    let mut joined = out.join("\n");
    if content.ends_with('\n') {
        joined.push('\n');
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    const CONFIG: &str = r#"server {
    listen 443 ssl;
    server_name jellyfin.example.com;

    location / {
        include /config/nginx/authelia-location.conf;
        include /config/nginx/proxy.conf;
        set $upstream_app "jellyfin";
        set $upstream_port "8096";
        set $upstream_proto "http";
        proxy_pass $upstream_proto://$upstream_app:$upstream_port;
    }
}
"#;

    fn mcp_ops(dir: &TempDir) -> McpOperations {
        std::fs::write(
            dir.path().join("mcp_location_block.conf.j2"),
            r#"    location {{ mcp_path }} {
{%- if auth_method == "authelia" %}
        include /config/nginx/authelia-location.conf;
{%- endif %}
        proxy_buffering off;
        proxy_pass {{ upstream_proto }}://{{ upstream_app }}:{{ upstream_port }};
    }"#,
        )
        .unwrap();
        McpOperations::new(Arc::new(TemplateManager::new(dir.path()).unwrap()))
    }

    #[test]
    fn upstream_values_are_recovered() {
        assert_eq!(
            extract_upstream_value(CONFIG, "upstream_app").unwrap(),
            "jellyfin"
        );
        assert_eq!(
            extract_upstream_value(CONFIG, "upstream_port").unwrap(),
            "8096"
        );
        assert!(matches!(
            extract_upstream_value("server { }", "upstream_app"),
            Err(OpError::MalformedConfig(_))
        ));
    }

    #[test]
    fn auth_method_is_recovered_from_includes() {
        assert_eq!(detect_auth_method(CONFIG), AuthMethod::Authelia);
        assert_eq!(
            detect_auth_method(&CONFIG.replace("authelia", "authentik")),
            AuthMethod::Authentik
        );
        assert_eq!(
            detect_auth_method(&CONFIG.replace(
                "include /config/nginx/authelia-location.conf;",
                "auth_basic \"Restricted\";"
            )),
            AuthMethod::Basic
        );
        assert_eq!(
            detect_auth_method(
                &CONFIG.replace("include /config/nginx/authelia-location.conf;\n", "")
            ),
            AuthMethod::None
        );
    }

    #[test]
    fn splice_adds_block_and_repeats_auth() {
        let dir = TempDir::new().unwrap();
        let ops = mcp_ops(&dir);

        let updated = ops.splice_location(CONFIG, "/mcp").unwrap();
        assert!(updated.contains("location /mcp {"));
        // The Authelia include appears in both the default and the new block.
        assert_eq!(updated.matches("authelia-location.conf").count(), 2);
        // The spliced block proxies to the recovered upstream.
        assert!(updated.contains("proxy_pass http://jellyfin:8096;"));

        // The block lands inside the server block, before its closing brace.
        let closing = updated.rfind('}').unwrap();
        let mcp_pos = updated.find("location /mcp").unwrap();
        assert!(mcp_pos < closing);
    }

    #[test]
    fn splicing_twice_conflicts() {
        let dir = TempDir::new().unwrap();
        let ops = mcp_ops(&dir);

        let updated = ops.splice_location(CONFIG, "/mcp").unwrap();
        assert!(matches!(
            ops.splice_location(&updated, "/mcp"),
            Err(OpError::Conflict(_))
        ));
    }

    #[test]
    fn location_modifiers_count_as_duplicates() {
        let with_exact = CONFIG.replace("location / {", "location = /mcp {\n    }\n    location / {");
        assert!(location_exists(&with_exact, "/mcp"));
        assert!(!location_exists(CONFIG, "/mcp"));
    }

    #[test]
    fn malformed_file_is_refused() {
        let dir = TempDir::new().unwrap();
        let ops = mcp_ops(&dir);

        let no_server = "upstream { }\n";
        assert!(matches!(
            ops.splice_location(no_server, "/mcp"),
            Err(OpError::MalformedConfig(_))
        ));
    }
}
