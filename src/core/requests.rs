//! Typed request and result records for the public operation set.
//!
//! The dispatch front-end may receive a heterogeneous bag of strings; it is
//! translated into these tagged forms at the boundary and every interior
//! function takes the typed form. The models are serde-friendly so results
//! can be emitted as JSON without further mapping.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{
    error::{OpError, OpResult},
    validate,
};

/// Base type of an active configuration, recovered from its filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Subdomain,
    Subfolder,
}

impl BaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaseType::Subdomain => "subdomain",
            BaseType::Subfolder => "subfolder",
        }
    }
}

impl std::fmt::Display for BaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BaseType {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "subdomain" => Ok(BaseType::Subdomain),
            "subfolder" => Ok(BaseType::Subfolder),
            other => Err(OpError::invalid(
                "base_type",
                format!("must be 'subdomain' or 'subfolder', got '{other}'"),
            )),
        }
    }
}

/// Protocol used for the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProto {
    #[default]
    Http,
    Https,
}

impl UpstreamProto {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamProto::Http => "http",
            UpstreamProto::Https => "https",
        }
    }
}

impl std::fmt::Display for UpstreamProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UpstreamProto {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "http" => Ok(UpstreamProto::Http),
            "https" => Ok(UpstreamProto::Https),
            other => Err(OpError::invalid(
                "upstream_proto",
                format!("must be 'http' or 'https', got '{other}'"),
            )),
        }
    }
}

/// Authentication gate applied to the default location of a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    None,
    Basic,
    Ldap,
    #[default]
    Authelia,
    Authentik,
    Tinyauth,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::None => "none",
            AuthMethod::Basic => "basic",
            AuthMethod::Ldap => "ldap",
            AuthMethod::Authelia => "authelia",
            AuthMethod::Authentik => "authentik",
            AuthMethod::Tinyauth => "tinyauth",
        }
    }
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "none" => Ok(AuthMethod::None),
            "basic" => Ok(AuthMethod::Basic),
            "ldap" => Ok(AuthMethod::Ldap),
            "authelia" => Ok(AuthMethod::Authelia),
            "authentik" => Ok(AuthMethod::Authentik),
            "tinyauth" => Ok(AuthMethod::Tinyauth),
            other => Err(OpError::invalid(
                "auth_method",
                format!(
                    "must be one of none, basic, ldap, authelia, authentik, tinyauth; got '{other}'"
                ),
            )),
        }
    }
}

/// Filter for the `list` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFilter {
    #[default]
    All,
    Active,
    Samples,
}

impl std::str::FromStr for ListFilter {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "all" => Ok(ListFilter::All),
            "active" => Ok(ListFilter::Active),
            "samples" => Ok(ListFilter::Samples),
            other => Err(OpError::invalid(
                "filter",
                format!("must be 'all', 'active' or 'samples', got '{other}'"),
            )),
        }
    }
}

/// Classification of a file in the managed directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Active,
    Sample,
    Backup,
    Other,
}

/// Descriptor for one file in the managed directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    pub kind: FileKind,
}

/// Result of the `list` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResult {
    pub files: Vec<FileDescriptor>,
    pub total: usize,
    pub filter: ListFilter,
}

/// Input to the create operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRequest {
    /// Full active filename, e.g. `plex.subdomain.conf`. The service name
    /// and base type are derived from it.
    pub config_name: String,
    /// Domain served by the gateway for this service.
    pub server_name: String,
    /// Container name, hostname or IP the proxy forwards to.
    pub upstream_app: String,
    pub upstream_port: u16,
    #[serde(default)]
    pub upstream_proto: UpstreamProto,
    /// Select the MCP variant of the chosen base type.
    #[serde(default)]
    pub mcp_enabled: bool,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub enable_quic: bool,
}

impl ConfigRequest {
    /// Validate every field and derive `(service_name, base_type)` from the
    /// configuration name. Raised before any I/O.
    pub fn validate(&self) -> OpResult<(String, BaseType)> {
        let (service, base) = validate::split_config_name(&self.config_name)?;
        validate::validate_domain(&self.server_name)?;
        validate::validate_upstream_app(&self.upstream_app)?;
        validate::validate_port(u32::from(self.upstream_port))?;
        Ok((service.to_string(), base))
    }
}

/// Input to the overwrite operation: target file plus full new content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditRequest {
    pub config_name: String,
    pub new_content: String,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

/// Which field a targeted update mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Port,
    Upstream,
    App,
    AddMcp,
}

impl std::str::FromStr for UpdateKind {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "port" => Ok(UpdateKind::Port),
            "upstream" => Ok(UpdateKind::Upstream),
            "app" => Ok(UpdateKind::App),
            "add_mcp" | "add-mcp" => Ok(UpdateKind::AddMcp),
            other => Err(OpError::invalid(
                "update_field",
                format!("must be 'port', 'upstream', 'app' or 'add_mcp', got '{other}'"),
            )),
        }
    }
}

/// Input to the targeted field-update operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub config_name: String,
    pub kind: UpdateKind,
    pub value: String,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

/// Input to the remove operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRequest {
    pub config_name: String,
    #[serde(default = "default_true")]
    pub create_backup: bool,
}

/// Outcome of create / overwrite: the written name plus the backup taken of
/// any previous version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWritten {
    pub name: String,
    pub backup: Option<String>,
}

/// Outcome of a targeted update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub name: String,
    pub backup: Option<String>,
    pub changed: bool,
}

/// Input to a health probe. `domain` is host-only, no scheme.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRequest {
    pub domain: String,
    /// Total probe budget in seconds, 1..=300.
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub follow_redirects: bool,
}

/// Result of a health probe. A negative conclusion is a value, never an
/// error: `success` is false and `error` carries the last failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResult {
    pub domain: String,
    pub url: String,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub response_body: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    /// Intermediate URLs visited while following redirects, oldest first.
    #[serde(default)]
    pub redirect_chain: Vec<String>,
}

/// Log categories the monitor can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogKind {
    NginxError,
    NginxAccess,
    Fail2ban,
    Letsencrypt,
    Renewal,
}

impl LogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogKind::NginxError => "nginx-error",
            LogKind::NginxAccess => "nginx-access",
            LogKind::Fail2ban => "fail2ban",
            LogKind::Letsencrypt => "letsencrypt",
            LogKind::Renewal => "renewal",
        }
    }
}

impl std::str::FromStr for LogKind {
    type Err = OpError;

    fn from_str(s: &str) -> OpResult<Self> {
        match s {
            "nginx-error" => Ok(LogKind::NginxError),
            "nginx-access" => Ok(LogKind::NginxAccess),
            "fail2ban" => Ok(LogKind::Fail2ban),
            "letsencrypt" => Ok(LogKind::Letsencrypt),
            "renewal" => Ok(LogKind::Renewal),
            other => Err(OpError::invalid(
                "log_type",
                format!(
                    "must be one of nginx-error, nginx-access, fail2ban, letsencrypt, renewal; \
                     got '{other}'"
                ),
            )),
        }
    }
}

/// Input to the logs operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsRequest {
    pub kind: LogKind,
    /// Number of trailing lines to return, 1..=1000.
    pub lines: usize,
}

/// Descriptor for one backup file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub name: String,
    /// Original configuration name, recovered by splitting at the first
    /// `.backup.` marker.
    pub original: String,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
    /// Timestamp embedded in the filename, when it parses.
    pub timestamp: Option<DateTime<Utc>>,
}

/// Snapshot of the environment defaults, for the `defaults` operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsSnapshot {
    pub auth_method: AuthMethod,
    pub config_base: BaseType,
    pub quic_enabled: bool,
    pub backup_retention_days: u32,
    pub health_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}
