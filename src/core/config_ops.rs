//! Whole-file CRUD over the managed configuration directory.
//!
//! Validation runs before any I/O, structural checks before any write, and
//! every mutating operation holds the target's path lock for its whole
//! span. `create` locks the prospective path before the existence check so a
//! create/create race cannot take two backups of the same prior state.
use std::{collections::BTreeMap, sync::Arc};

use minijinja::value::Value;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Settings,
    core::{
        backups::BackupManager,
        error::{OpError, OpResult, ensure_live},
        file_ops::FileOps,
        mcp::DEFAULT_MCP_PATH,
        requests::{
            BaseType, ConfigRequest, ConfigWritten, EditRequest, ListFilter, ListResult,
            RemoveRequest, UpdateKind, UpdateOutcome, UpdateRequest,
        },
        resources::ResourceManager,
        structure::{self, RenderExpectations},
        templates::{TemplateManager, TemplateVars},
        updaters::ConfigFieldUpdaters,
        validate,
    },
};

pub struct ConfigOperations {
    settings: Arc<Settings>,
    file_ops: Arc<FileOps>,
    templates: Arc<TemplateManager>,
    backups: Arc<BackupManager>,
    resources: Arc<ResourceManager>,
    updaters: ConfigFieldUpdaters,
}

impl ConfigOperations {
    pub fn new(
        settings: Arc<Settings>,
        file_ops: Arc<FileOps>,
        templates: Arc<TemplateManager>,
        backups: Arc<BackupManager>,
        resources: Arc<ResourceManager>,
        updaters: ConfigFieldUpdaters,
    ) -> Self {
        Self {
            settings,
            file_ops,
            templates,
            backups,
            resources,
            updaters,
        }
    }

    /// List configurations in deterministic (case-insensitive lexical)
    /// order.
    pub async fn list(
        &self,
        filter: ListFilter,
        cancel: &CancellationToken,
    ) -> OpResult<ListResult> {
        ensure_live(cancel)?;

        let mut files = match filter {
            ListFilter::Active => self.resources.list_active(cancel).await?,
            ListFilter::Samples => self.resources.list_samples(cancel).await?,
            ListFilter::All => {
                let mut merged = self.resources.list_active(cancel).await?;
                merged.extend(self.resources.list_samples(cancel).await?);
                merged
            }
        };
        files.sort_by(|a, b| {
            a.name
                .to_ascii_lowercase()
                .cmp(&b.name.to_ascii_lowercase())
        });

        tracing::info!(filter = ?filter, count = files.len(), "listed configurations");
        Ok(ListResult {
            total: files.len(),
            files,
            filter,
        })
    }

    /// Read one configuration or sample as UTF-8 text.
    pub async fn read(&self, name: &str, cancel: &CancellationToken) -> OpResult<String> {
        ensure_live(cancel)?;
        validate::validate_readable_name(name)?;

        let path = self.file_ops.resolve(name)?;
        let content = self
            .file_ops
            .read_text(&path, self.settings.max_file_bytes, cancel)
            .await?;
        tracing::info!(name, bytes = content.len(), "read configuration");
        Ok(content)
    }

    /// Create a configuration from its template. An existing target is
    /// backed up first, then overwritten.
    pub async fn create(
        &self,
        request: &ConfigRequest,
        cancel: &CancellationToken,
    ) -> OpResult<ConfigWritten> {
        ensure_live(cancel)?;

        let (service_name, base) = request.validate()?;
        let server_name = validate::validate_domain(&request.server_name)?;

        let template = template_for(base, request.mcp_enabled);
        tracing::info!(
            name = %request.config_name,
            template,
            "creating configuration"
        );

        let vars = render_vars(request, &service_name, &server_name);
        let content = self.templates.render(template, vars)?;

        let expectations = RenderExpectations {
            mcp_enabled: request.mcp_enabled,
            mcp_path: DEFAULT_MCP_PATH.to_string(),
            enable_quic: request.enable_quic,
            auth_method: request.auth_method,
        };
        structure::verify_rendered(&content, &expectations).map_err(OpError::Template)?;

        let path = self.file_ops.resolve(&request.config_name)?;
        ensure_live(cancel)?;
        let lock = self.file_ops.lock_for(&path).await;
        let _guard = lock.lock().await;

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| OpError::io("checking target existence", e))?;
        let backup = if exists {
            Some(
                self.backups
                    .create_backup_unlocked(&request.config_name, cancel)
                    .await?,
            )
        } else {
            None
        };

        self.file_ops
            .write_atomic_unlocked(&path, &content, cancel)
            .await?;

        tracing::info!(name = %request.config_name, backup = ?backup, "configuration created");
        Ok(ConfigWritten {
            name: request.config_name.clone(),
            backup,
        })
    }

    /// Replace a configuration's full content with caller-supplied text.
    pub async fn overwrite(
        &self,
        request: &EditRequest,
        cancel: &CancellationToken,
    ) -> OpResult<ConfigWritten> {
        ensure_live(cancel)?;
        validate::validate_config_name(&request.config_name)?;

        let content = validate::validate_content_safety(
            &request.new_content,
            self.settings.max_file_bytes as usize,
        )?;
        structure::verify_base(&content)
            .map_err(|reason| OpError::invalid("new_content", reason))?;

        let path = self.file_ops.resolve(&request.config_name)?;
        ensure_live(cancel)?;
        let lock = self.file_ops.lock_for(&path).await;
        let _guard = lock.lock().await;

        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| OpError::io("checking target existence", e))?;
        let backup = if request.create_backup && exists {
            Some(
                self.backups
                    .create_backup_unlocked(&request.config_name, cancel)
                    .await?,
            )
        } else {
            None
        };

        self.file_ops
            .write_atomic_unlocked(&path, &content, cancel)
            .await?;

        tracing::info!(name = %request.config_name, backup = ?backup, "configuration overwritten");
        Ok(ConfigWritten {
            name: request.config_name.clone(),
            backup,
        })
    }

    /// Apply a targeted single-field update under the path lock.
    pub async fn update_field(
        &self,
        request: &UpdateRequest,
        cancel: &CancellationToken,
    ) -> OpResult<UpdateOutcome> {
        ensure_live(cancel)?;
        validate::validate_config_name(&request.config_name)?;

        tracing::info!(
            name = %request.config_name,
            kind = ?request.kind,
            "updating configuration field"
        );

        let path = self.file_ops.resolve(&request.config_name)?;
        ensure_live(cancel)?;
        let lock = self.file_ops.lock_for(&path).await;
        let _guard = lock.lock().await;

        let content = self
            .file_ops
            .read_text_unlocked(&path, self.settings.max_file_bytes, cancel)
            .await?;

        let (updated, changed) = self
            .updaters
            .apply(request.kind, &request.value, &content)?;

        if !changed {
            tracing::info!(name = %request.config_name, "update produced no change");
            return Ok(UpdateOutcome {
                name: request.config_name.clone(),
                backup: None,
                changed: false,
            });
        }

        let backup = if request.create_backup {
            Some(
                self.backups
                    .create_backup_unlocked(&request.config_name, cancel)
                    .await?,
            )
        } else {
            None
        };

        self.file_ops
            .write_atomic_unlocked(&path, &updated, cancel)
            .await?;

        tracing::info!(name = %request.config_name, backup = ?backup, "field updated");
        Ok(UpdateOutcome {
            name: request.config_name.clone(),
            backup,
            changed: true,
        })
    }

    /// Splice an MCP location block into an existing configuration.
    pub async fn add_mcp(
        &self,
        name: &str,
        mcp_path: Option<&str>,
        create_backup: bool,
        cancel: &CancellationToken,
    ) -> OpResult<UpdateOutcome> {
        let request = UpdateRequest {
            config_name: name.to_string(),
            kind: UpdateKind::AddMcp,
            value: mcp_path.unwrap_or(DEFAULT_MCP_PATH).to_string(),
            create_backup,
        };
        self.update_field(&request, cancel).await
    }

    /// Delete an active configuration, optionally keeping a backup.
    pub async fn remove(
        &self,
        request: &RemoveRequest,
        cancel: &CancellationToken,
    ) -> OpResult<ConfigWritten> {
        ensure_live(cancel)?;
        validate::validate_config_name(&request.config_name)?;

        let path = self.file_ops.resolve(&request.config_name)?;
        ensure_live(cancel)?;
        let lock = self.file_ops.lock_for(&path).await;
        let _guard = lock.lock().await;

        let backup = if request.create_backup {
            Some(
                self.backups
                    .create_backup_unlocked(&request.config_name, cancel)
                    .await?,
            )
        } else {
            None
        };

        self.file_ops.remove_unlocked(&path, cancel).await?;

        tracing::info!(name = %request.config_name, backup = ?backup, "configuration removed");
        Ok(ConfigWritten {
            name: request.config_name.clone(),
            backup,
        })
    }
}

/// Template selected for a create: the MCP variant iff requested.
fn template_for(base: BaseType, mcp_enabled: bool) -> &'static str {
    match (base, mcp_enabled) {
        (BaseType::Subdomain, false) => "subdomain",
        (BaseType::Subfolder, false) => "subfolder",
        (BaseType::Subdomain, true) => "mcp-subdomain",
        (BaseType::Subfolder, true) => "mcp-subfolder",
    }
}

/// The closed variable set passed to config templates.
fn render_vars(request: &ConfigRequest, service_name: &str, server_name: &str) -> TemplateVars {
    let mut vars: TemplateVars = BTreeMap::new();
    vars.insert(
        "config_name".to_string(),
        Value::from(request.config_name.as_str()),
    );
    vars.insert("service_name".to_string(), Value::from(service_name));
    vars.insert("server_name".to_string(), Value::from(server_name));
    vars.insert(
        "upstream_app".to_string(),
        Value::from(request.upstream_app.as_str()),
    );
    vars.insert(
        "upstream_port".to_string(),
        Value::from(request.upstream_port),
    );
    vars.insert(
        "upstream_proto".to_string(),
        Value::from(request.upstream_proto.as_str()),
    );
    vars.insert(
        "auth_method".to_string(),
        Value::from(request.auth_method.as_str()),
    );
    vars.insert("enable_quic".to_string(), Value::from(request.enable_quic));
    vars.insert("mcp_enabled".to_string(), Value::from(request.mcp_enabled));
    vars.insert("mcp_path".to_string(), Value::from(DEFAULT_MCP_PATH));
    vars
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_selection_follows_base_and_mcp() {
        assert_eq!(template_for(BaseType::Subdomain, false), "subdomain");
        assert_eq!(template_for(BaseType::Subfolder, false), "subfolder");
        assert_eq!(template_for(BaseType::Subdomain, true), "mcp-subdomain");
        assert_eq!(template_for(BaseType::Subfolder, true), "mcp-subfolder");
    }
}
