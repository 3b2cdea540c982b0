//! Structural checks on nginx configuration text.
//!
//! The core does not embed an nginx parser. Rendered and edited files are
//! checked for a small set of required markers before they are written:
//! a balanced `server { ... }` block, the three upstream `set` directives,
//! and a `proxy_pass` that references them. Conditional markers (MCP
//! location, QUIC listener, auth include) are layered on when the caller
//! knows the flags the content was rendered with.
use regex::Regex;

use crate::core::requests::AuthMethod;

/// Flags the rendered content is expected to reflect.
#[derive(Debug, Clone)]
pub struct RenderExpectations {
    pub mcp_enabled: bool,
    pub mcp_path: String,
    pub enable_quic: bool,
    pub auth_method: AuthMethod,
}

/// Locate the outermost `server { ... }` block by balanced-brace scan.
///
/// Returns `(start_line, closing_brace_line)` indices into `lines`. The scan
/// refuses to guess: unbalanced braces or a missing block are an error.
pub fn server_block_bounds(lines: &[&str]) -> Result<(usize, usize), String> {
    let opener = Regex::new(r"^\s*server\s*\{").expect("invalid server block regex");

    let start = lines
        .iter()
        .position(|line| opener.is_match(line))
        .ok_or_else(|| "no 'server {' block found".to_string())?;

    let mut depth = 0i32;
    for (offset, line) in lines[start..].iter().enumerate() {
        depth += line.matches('{').count() as i32;
        depth -= line.matches('}').count() as i32;
        if depth == 0 {
            return Ok((start, start + offset));
        }
        if depth < 0 {
            return Err("unbalanced braces in server block".to_string());
        }
    }

    Err("server block is never closed".to_string())
}

/// The marker include a given auth method leaves on the default location.
pub fn auth_location_include(auth: AuthMethod) -> Option<&'static str> {
    match auth {
        AuthMethod::Authelia => Some("authelia-location.conf"),
        AuthMethod::Authentik => Some("authentik-location.conf"),
        AuthMethod::Ldap => Some("ldap-location.conf"),
        AuthMethod::Tinyauth => Some("tinyauth-location.conf"),
        AuthMethod::Basic | AuthMethod::None => None,
    }
}

/// Check the unconditional markers every managed configuration must carry.
pub fn verify_base(content: &str) -> Result<(), String> {
    let lines: Vec<&str> = content.lines().collect();
    server_block_bounds(&lines)?;

    for var in ["upstream_app", "upstream_port", "upstream_proto"] {
        let directive = Regex::new(&format!(r#"set\s+\${var}\s+"[^"]*"\s*;"#))
            .expect("invalid upstream directive regex");
        if !directive.is_match(content) {
            return Err(format!("missing 'set ${var}' directive"));
        }
    }

    let proxy_pass =
        Regex::new(r"proxy_pass\s+\$upstream_proto://\$upstream_app:\$upstream_port")
            .expect("invalid proxy_pass regex");
    if !proxy_pass.is_match(content) {
        return Err("missing proxy_pass referring to the upstream variables".to_string());
    }

    Ok(())
}

/// Check base markers plus the conditional ones implied by the render flags.
pub fn verify_rendered(content: &str, exp: &RenderExpectations) -> Result<(), String> {
    verify_base(content)?;

    if exp.mcp_enabled {
        let location = Regex::new(&format!(
            r"(?m)^\s*location\s+(?:=\s+|\^~\s+)?{}\s*\{{",
            regex::escape(&exp.mcp_path)
        ))
        .expect("invalid mcp location regex");
        if !location.is_match(content) {
            return Err(format!("missing 'location {}' block", exp.mcp_path));
        }
        if !content.contains("= /.well-known/oauth-authorization-server") {
            return Err("missing OAuth discovery endpoint".to_string());
        }
    }

    if exp.enable_quic {
        if !content.contains("listen 443 quic") {
            return Err("missing 'listen 443 quic' directive".to_string());
        }
        if !content.contains("Alt-Svc") {
            return Err("missing Alt-Svc header directive".to_string());
        }
    }

    match exp.auth_method {
        AuthMethod::None => {
            for include in [
                "authelia-location.conf",
                "authentik-location.conf",
                "ldap-location.conf",
                "tinyauth-location.conf",
            ] {
                if content.contains(include) {
                    return Err(format!(
                        "auth method is 'none' but content includes {include}"
                    ));
                }
            }
        }
        AuthMethod::Basic => {
            if !content.contains("auth_basic") {
                return Err("auth method is 'basic' but no auth_basic directive".to_string());
            }
        }
        other => {
            let include = auth_location_include(other).expect("non-none auth has an include");
            if !content.contains(include) {
                return Err(format!("missing {include} include for {other} auth"));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> String {
        r#"server {
    listen 443 ssl;
    server_name plex.example.com;

    location / {
        include /config/nginx/authelia-location.conf;
        set $upstream_app "plex";
        set $upstream_port "32400";
        set $upstream_proto "http";
        proxy_pass $upstream_proto://$upstream_app:$upstream_port;
    }
}
"#
        .to_string()
    }

    #[test]
    fn base_markers_pass_on_minimal_config() {
        assert!(verify_base(&minimal_config()).is_ok());
    }

    #[test]
    fn base_markers_fail_without_upstream_directives() {
        let content = minimal_config().replace("set $upstream_port \"32400\";", "");
        let err = verify_base(&content).unwrap_err();
        assert!(err.contains("upstream_port"));
    }

    #[test]
    fn server_block_bounds_finds_closing_brace() {
        let content = minimal_config();
        let lines: Vec<&str> = content.lines().collect();
        let (start, end) = server_block_bounds(&lines).unwrap();
        assert_eq!(start, 0);
        assert_eq!(lines[end].trim(), "}");
    }

    #[test]
    fn unbalanced_braces_are_refused() {
        let content = minimal_config().replacen('}', "", 1);
        let lines: Vec<&str> = content.lines().collect();
        assert!(server_block_bounds(&lines).is_err());
    }

    #[test]
    fn rendered_checks_enforce_quic_and_auth() {
        let exp = RenderExpectations {
            mcp_enabled: false,
            mcp_path: "/mcp".to_string(),
            enable_quic: true,
            auth_method: AuthMethod::Authelia,
        };
        // No quic listener in the minimal config.
        assert!(verify_rendered(&minimal_config(), &exp).is_err());

        let with_quic = minimal_config().replace(
            "listen 443 ssl;",
            "listen 443 ssl;\n    listen 443 quic;\n    add_header Alt-Svc 'h3=\":443\"; ma=86400';",
        );
        assert!(verify_rendered(&with_quic, &exp).is_ok());
    }

    #[test]
    fn auth_none_must_not_carry_includes() {
        let exp = RenderExpectations {
            mcp_enabled: false,
            mcp_path: "/mcp".to_string(),
            enable_quic: false,
            auth_method: AuthMethod::None,
        };
        assert!(verify_rendered(&minimal_config(), &exp).is_err());

        let bare = minimal_config().replace("include /config/nginx/authelia-location.conf;\n", "");
        assert!(verify_rendered(&bare, &exp).is_ok());
    }

    #[test]
    fn mcp_expectation_requires_location_and_oauth() {
        let exp = RenderExpectations {
            mcp_enabled: true,
            mcp_path: "/mcp".to_string(),
            enable_quic: false,
            auth_method: AuthMethod::Authelia,
        };
        assert!(verify_rendered(&minimal_config(), &exp).is_err());

        let with_mcp = minimal_config().replace(
            "    location / {",
            "    location = /.well-known/oauth-authorization-server { return 200; }\n    \
             location /mcp {\n        proxy_pass $upstream_proto://$upstream_app:$upstream_port;\n    }\n    location / {",
        );
        assert!(verify_rendered(&with_mcp, &exp).is_ok());
    }
}
