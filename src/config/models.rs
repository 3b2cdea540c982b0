//! Environment configuration data structures.
//!
//! These types map directly onto environment variables (`CONFIG_DIR`,
//! `TEMPLATE_DIR`, ...). They are serde-friendly and carry defaults so a
//! minimal environment stays concise; the three directory paths are the only
//! mandatory settings.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::requests::{AuthMethod, BaseType, LogKind};

/// Runtime settings for the configuration core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Managed configuration directory (required).
    pub config_dir: PathBuf,
    /// Directory holding the nginx templates (required).
    pub template_dir: PathBuf,
    /// Root of the gateway's log tree (required).
    pub log_dir: PathBuf,

    #[serde(default)]
    pub default_auth_method: AuthMethod,
    #[serde(default = "default_config_base")]
    pub default_config_base: BaseType,
    #[serde(default)]
    pub default_quic_enabled: bool,
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,
    #[serde(default = "default_health_timeout_s")]
    pub health_timeout_default_s: u64,
    /// Upper bound for reads and full-content writes, in bytes.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Per-kind log file locations, relative to `log_dir`.
    #[serde(default)]
    pub log_files: LogFiles,
}

impl Settings {
    /// Resolve the on-disk location for a log kind.
    pub fn log_file_for(&self, kind: LogKind) -> PathBuf {
        let relative = match kind {
            LogKind::NginxError => &self.log_files.nginx_error,
            LogKind::NginxAccess => &self.log_files.nginx_access,
            LogKind::Fail2ban => &self.log_files.fail2ban,
            LogKind::Letsencrypt => &self.log_files.letsencrypt,
            LogKind::Renewal => &self.log_files.renewal,
        };
        self.log_dir.join(relative)
    }
}

/// Relative log paths, one per log kind. The deployment decides the real
/// filenames, so every entry can be overridden from the environment
/// (`LOG_FILES__NGINX_ERROR=...`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFiles {
    pub nginx_error: String,
    pub nginx_access: String,
    pub fail2ban: String,
    pub letsencrypt: String,
    pub renewal: String,
}

impl Default for LogFiles {
    fn default() -> Self {
        Self {
            nginx_error: "nginx/error.log".to_string(),
            nginx_access: "nginx/access.log".to_string(),
            fail2ban: "fail2ban/fail2ban.log".to_string(),
            letsencrypt: "letsencrypt/letsencrypt.log".to_string(),
            renewal: "letsencrypt/renewal.log".to_string(),
        }
    }
}

fn default_config_base() -> BaseType {
    BaseType::Subdomain
}

fn default_backup_retention_days() -> u32 {
    30
}

fn default_health_timeout_s() -> u64 {
    30
}

fn default_max_file_bytes() -> u64 {
    2 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_paths_resolve_under_log_dir() {
        let settings = Settings {
            config_dir: PathBuf::from("/proxy-confs"),
            template_dir: PathBuf::from("/templates"),
            log_dir: PathBuf::from("/swag/log"),
            default_auth_method: AuthMethod::default(),
            default_config_base: default_config_base(),
            default_quic_enabled: false,
            backup_retention_days: default_backup_retention_days(),
            health_timeout_default_s: default_health_timeout_s(),
            max_file_bytes: default_max_file_bytes(),
            log_files: LogFiles::default(),
        };

        assert_eq!(
            settings.log_file_for(LogKind::NginxError),
            PathBuf::from("/swag/log/nginx/error.log")
        );
        assert_eq!(
            settings.log_file_for(LogKind::Renewal),
            PathBuf::from("/swag/log/letsencrypt/renewal.log")
        );
    }
}
