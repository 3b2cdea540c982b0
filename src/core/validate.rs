//! Pure input validation.
//!
//! Every function here is deterministic and side-effect free: same input,
//! same result. They run before any I/O, so a rejected request never touches
//! the filesystem.
use std::net::{Ipv4Addr, Ipv6Addr};

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::core::{
    error::{OpError, OpResult},
    requests::BaseType,
};

/// Maximum length of a domain name.
pub const MAX_DOMAIN_LEN: usize = 253;
/// Maximum length of an upstream app token.
pub const MAX_UPSTREAM_APP_LEN: usize = 100;
/// Maximum length of an MCP location path.
pub const MAX_MCP_PATH_LEN: usize = 100;

/// Validate a full active configuration filename
/// (`<service>.<subdomain|subfolder>.conf`).
pub fn validate_config_name(name: &str) -> OpResult<()> {
    let pattern = Regex::new(r"^[A-Za-z0-9_-]+\.(subdomain|subfolder)\.conf$")
        .expect("invalid config name regex");
    if pattern.is_match(name) {
        Ok(())
    } else {
        Err(OpError::invalid(
            "config_name",
            format!("'{name}' must match '<service>.<subdomain|subfolder>.conf'"),
        ))
    }
}

/// Validate an active config name and split it into service name and base
/// type.
pub fn split_config_name(name: &str) -> OpResult<(&str, BaseType)> {
    validate_config_name(name)?;
    // Shape is guaranteed by the regex: service.base.conf
    let mut parts = name.rsplitn(3, '.');
    let _conf = parts.next();
    let base = parts.next().unwrap_or_default();
    let service = parts.next().unwrap_or_default();
    Ok((service, base.parse()?))
}

/// Validate a filename the read/list surface may touch: an active config or
/// a sample. Traversal-safe by construction (single path segment).
pub fn validate_readable_name(name: &str) -> OpResult<()> {
    let pattern =
        Regex::new(r"^[A-Za-z0-9_.-]+\.(conf|sample)$").expect("invalid readable name regex");
    if !pattern.is_match(name) {
        return Err(OpError::invalid(
            "config_name",
            format!("'{name}' is not a .conf or .sample filename"),
        ));
    }
    validate_file_path_safety(name)
}

/// Validate a DNS domain: dot-separated labels of 1-63 characters, 253 total
/// maximum, no leading or trailing dot. Returns the lowercase form.
pub fn validate_domain(domain: &str) -> OpResult<String> {
    if domain.is_empty() || domain.len() > MAX_DOMAIN_LEN {
        return Err(OpError::invalid(
            "server_name",
            format!("domain must be 1-{MAX_DOMAIN_LEN} characters"),
        ));
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return Err(OpError::invalid(
            "server_name",
            "domain must not start or end with a dot",
        ));
    }
    if domain.contains("://") {
        return Err(OpError::invalid(
            "server_name",
            "domain must not contain a scheme",
        ));
    }

    let label = Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
        .expect("invalid domain label regex");
    for part in domain.split('.') {
        if part.is_empty() || part.len() > 63 || !label.is_match(part) {
            return Err(OpError::invalid(
                "server_name",
                format!("invalid domain label '{part}'"),
            ));
        }
    }

    Ok(domain.to_ascii_lowercase())
}

/// Validate an upstream target: an IPv4 address, an IPv6 address (bracketed
/// or not), or a container/host token.
pub fn validate_upstream_app(app: &str) -> OpResult<()> {
    if app.is_empty() || app.len() > MAX_UPSTREAM_APP_LEN {
        return Err(OpError::invalid(
            "upstream_app",
            format!("must be 1-{MAX_UPSTREAM_APP_LEN} characters"),
        ));
    }

    if app.parse::<Ipv4Addr>().is_ok() {
        return Ok(());
    }
    let unbracketed = app
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(app);
    if unbracketed.parse::<Ipv6Addr>().is_ok() {
        return Ok(());
    }

    let token = Regex::new(r"^[A-Za-z0-9._-]+$").expect("invalid upstream app regex");
    if token.is_match(app) {
        Ok(())
    } else {
        Err(OpError::invalid(
            "upstream_app",
            format!("'{app}' is not a valid hostname, container name or IP address"),
        ))
    }
}

/// Validate a port number, rejecting 0 and anything above 65535.
pub fn validate_port(port: u32) -> OpResult<u16> {
    if (1..=65535).contains(&port) {
        Ok(port as u16)
    } else {
        Err(OpError::invalid(
            "upstream_port",
            format!("port must be between 1 and 65535, got {port}"),
        ))
    }
}

/// Parse and validate a port carried as a string (update values arrive as
/// text from the front-end).
pub fn parse_port(value: &str) -> OpResult<u16> {
    let port: u32 = value
        .trim()
        .parse()
        .map_err(|_| OpError::invalid("upstream_port", format!("'{value}' is not a number")))?;
    validate_port(port)
}

/// Validate an MCP location path: absolute, restricted character set, no
/// parent references.
pub fn validate_mcp_path(path: &str) -> OpResult<()> {
    if !path.starts_with('/') {
        return Err(OpError::invalid("mcp_path", "must begin with '/'"));
    }
    if path.len() > MAX_MCP_PATH_LEN {
        return Err(OpError::invalid(
            "mcp_path",
            format!("must be at most {MAX_MCP_PATH_LEN} characters"),
        ));
    }
    if path.contains("..") {
        return Err(OpError::invalid("mcp_path", "must not contain '..'"));
    }
    let allowed = Regex::new(r"^[A-Za-z0-9/_-]+$").expect("invalid mcp path regex");
    if allowed.is_match(path) {
        Ok(())
    } else {
        Err(OpError::invalid(
            "mcp_path",
            "may only contain letters, digits, '/', '_' and '-'",
        ))
    }
}

/// Reject paths that could escape the managed directory: absolute paths,
/// `..` segments, hidden segments, and Windows-reserved device names.
pub fn validate_file_path_safety(path: &str) -> OpResult<()> {
    if path.is_empty() {
        return Err(OpError::invalid("path", "must not be empty"));
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(OpError::invalid("path", "absolute paths are not allowed"));
    }
    // Windows drive prefix, e.g. C:\
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(OpError::invalid("path", "absolute paths are not allowed"));
    }

    const RESERVED: &[&str] = &[
        "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
        "com8", "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
    ];

    for segment in path.split(['/', '\\']) {
        if segment == ".." {
            return Err(OpError::invalid("path", "'..' segments are not allowed"));
        }
        if segment.starts_with('.') && segment != "." {
            // Dotfiles are reserved for the core's own temp files.
            return Err(OpError::invalid(
                "path",
                format!("hidden segment '{segment}' is not allowed"),
            ));
        }
        let stem = segment
            .split('.')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        if RESERVED.contains(&stem.as_str()) {
            return Err(OpError::invalid(
                "path",
                format!("'{segment}' is a reserved name"),
            ));
        }
    }

    Ok(())
}

/// Validate and normalize full-content writes.
///
/// Normalizes to Unicode NFC, strips a leading BOM, and rejects embedded
/// NULs, oversized payloads, and content that is mostly control characters.
pub fn validate_content_safety(content: &str, max_bytes: usize) -> OpResult<String> {
    if content.trim().is_empty() {
        return Err(OpError::invalid("content", "must not be empty"));
    }

    let stripped = content.strip_prefix('\u{feff}').unwrap_or(content);
    let normalized: String = stripped.nfc().collect();

    if normalized.len() > max_bytes {
        return Err(OpError::invalid(
            "content",
            format!("exceeds the {max_bytes} byte limit"),
        ));
    }
    if normalized.contains('\0') {
        return Err(OpError::invalid("content", "contains NUL bytes"));
    }

    let mut total = 0usize;
    let mut control = 0usize;
    for ch in normalized.chars() {
        total += 1;
        let code = ch as u32;
        let is_c0 = code < 0x20 && !matches!(ch, '\t' | '\r' | '\n');
        let is_c1 = (0x7f..=0x9f).contains(&code);
        if is_c0 || is_c1 {
            control += 1;
        }
    }
    if control * 100 > total {
        return Err(OpError::invalid(
            "content",
            "more than 1% of the content is control characters",
        ));
    }

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_name_shapes() {
        assert!(validate_config_name("plex.subdomain.conf").is_ok());
        assert!(validate_config_name("jelly_fin-2.subfolder.conf").is_ok());
        assert!(validate_config_name("plex.conf").is_err());
        assert!(validate_config_name("plex.subdomain.conf.sample").is_err());
        assert!(validate_config_name("plex.webroot.conf").is_err());
        assert!(validate_config_name("a/b.subdomain.conf").is_err());
        assert!(validate_config_name("..subdomain.conf").is_err());
    }

    #[test]
    fn split_recovers_service_and_base() {
        let (service, base) = split_config_name("nextcloud.subfolder.conf").unwrap();
        assert_eq!(service, "nextcloud");
        assert_eq!(base, BaseType::Subfolder);
    }

    #[test]
    fn domain_boundaries() {
        assert_eq!(
            validate_domain("Plex.Example.COM").unwrap(),
            "plex.example.com"
        );

        // 253 characters is accepted, 254 rejected.
        let label = "a".repeat(63);
        let long = format!("{label}.{label}.{label}.{}", "b".repeat(61));
        assert_eq!(long.len(), 253);
        assert!(validate_domain(&long).is_ok());
        let too_long = format!("{label}.{label}.{label}.{}", "b".repeat(62));
        assert!(validate_domain(&too_long).is_err());

        assert!(validate_domain(".example.com").is_err());
        assert!(validate_domain("example.com.").is_err());
        assert!(validate_domain("exa_mple.com").is_err());
        assert!(validate_domain("-bad.example.com").is_err());
        assert!(validate_domain("https://example.com").is_err());
    }

    #[test]
    fn upstream_app_accepts_hosts_and_ips() {
        assert!(validate_upstream_app("plex").is_ok());
        assert!(validate_upstream_app("my-app.internal").is_ok());
        assert!(validate_upstream_app("192.168.1.10").is_ok());
        assert!(validate_upstream_app("::1").is_ok());
        assert!(validate_upstream_app("[2001:db8::1]").is_ok());
        assert!(validate_upstream_app("bad host").is_err());
        assert!(validate_upstream_app("host:80").is_err());
        assert!(validate_upstream_app(&"a".repeat(101)).is_err());
    }

    #[test]
    fn port_boundaries() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(validate_port(65536).is_err());
        assert_eq!(parse_port("32400").unwrap(), 32400);
        assert!(parse_port("-1").is_err());
        assert!(parse_port("http").is_err());
    }

    #[test]
    fn mcp_path_rules() {
        assert!(validate_mcp_path("/mcp").is_ok());
        assert!(validate_mcp_path("/api/mcp_v2").is_ok());
        assert!(validate_mcp_path("mcp").is_err());
        assert!(validate_mcp_path("/a/../b").is_err());
        assert!(validate_mcp_path("/with space").is_err());
        assert!(validate_mcp_path(&format!("/{}", "a".repeat(100))).is_err());
    }

    #[test]
    fn path_safety_rejections() {
        assert!(validate_file_path_safety("plex.subdomain.conf").is_ok());
        assert!(validate_file_path_safety("/etc/passwd").is_err());
        assert!(validate_file_path_safety("a/../b").is_err());
        assert!(validate_file_path_safety(".hidden").is_err());
        assert!(validate_file_path_safety("CON.conf").is_err());
        assert!(validate_file_path_safety("com1").is_err());
        assert!(validate_file_path_safety("C:\\windows").is_err());
    }

    #[test]
    fn content_safety_normalizes_and_rejects() {
        let ok = validate_content_safety("\u{feff}server { }\n", 1024).unwrap();
        assert!(!ok.starts_with('\u{feff}'));

        assert!(validate_content_safety("  \n ", 1024).is_err());
        assert!(validate_content_safety("a\0b", 1024).is_err());
        assert!(validate_content_safety("abc", 2).is_err());

        // A payload that is mostly C0 controls is rejected; sparse controls
        // within normal text are tolerated.
        let noisy: String = std::iter::repeat('\u{1}').take(10).collect();
        assert!(validate_content_safety(&noisy, 1024).is_err());
        let mostly_text = format!("{}\u{1}", "x".repeat(200));
        assert!(validate_content_safety(&mostly_text, 1024).is_ok());
    }

    #[test]
    fn validation_is_pure() {
        for _ in 0..3 {
            assert!(validate_domain("plex.example.com").is_ok());
            assert!(validate_port(80).is_ok());
            assert!(validate_mcp_path("/mcp").is_ok());
        }
    }
}
