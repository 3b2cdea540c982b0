//! Facade over the configuration core.
//!
//! `SwagService` owns the managers in dependency order (leaves first) and
//! exposes the public operation set. It holds no mutable in-memory mirror of
//! the directory: the filesystem is the source of truth, the managers only
//! coordinate access to it. No manager refers back to the facade.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    config::Settings,
    core::{
        backups::BackupManager,
        config_ops::ConfigOperations,
        error::{OpError, OpResult},
        file_ops::FileOps,
        health::HealthMonitor,
        mcp::McpOperations,
        requests::{
            BackupInfo, ConfigRequest, ConfigWritten, DefaultsSnapshot, EditRequest,
            HealthRequest, HealthResult, ListFilter, ListResult, LogsRequest, RemoveRequest,
            UpdateOutcome, UpdateRequest,
        },
        resources::ResourceManager,
        templates::TemplateManager,
        updaters::ConfigFieldUpdaters,
    },
};

pub struct SwagService {
    settings: Arc<Settings>,
    file_ops: Arc<FileOps>,
    templates: Arc<TemplateManager>,
    backups: Arc<BackupManager>,
    config_ops: ConfigOperations,
    health: HealthMonitor,
}

impl SwagService {
    /// Construct the full manager graph from settings.
    ///
    /// The configuration directory is created if absent; a missing or
    /// incomplete template directory is an [`OpError::Template`] so a
    /// wrapping process can map it to its dedicated exit code.
    pub async fn new(settings: Settings) -> OpResult<Self> {
        let settings = Arc::new(settings);

        let file_ops = Arc::new(FileOps::new(&settings.config_dir).await?);
        let templates = Arc::new(TemplateManager::new(&settings.template_dir)?);
        if let Err(missing) = templates.verify_required() {
            return Err(OpError::Template(format!(
                "template directory {} is missing: {}",
                settings.template_dir.display(),
                missing.join(", ")
            )));
        }

        let backups = Arc::new(BackupManager::new(
            file_ops.clone(),
            settings.backup_retention_days,
        ));
        let resources = Arc::new(ResourceManager::new(file_ops.clone()));
        let mcp = Arc::new(McpOperations::new(templates.clone()));
        let updaters = ConfigFieldUpdaters::new(mcp);
        let config_ops = ConfigOperations::new(
            settings.clone(),
            file_ops.clone(),
            templates.clone(),
            backups.clone(),
            resources,
            updaters,
        );
        let health = HealthMonitor::new(settings.clone());

        tracing::info!(
            config_dir = %settings.config_dir.display(),
            template_dir = %settings.template_dir.display(),
            "service initialized"
        );

        Ok(Self {
            settings,
            file_ops,
            templates,
            backups,
            config_ops,
            health,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Template manager access, mainly for installing test hooks.
    pub fn templates(&self) -> &TemplateManager {
        &self.templates
    }

    pub async fn list(
        &self,
        filter: ListFilter,
        cancel: &CancellationToken,
    ) -> OpResult<ListResult> {
        self.config_ops.list(filter, cancel).await
    }

    pub async fn read(&self, name: &str, cancel: &CancellationToken) -> OpResult<String> {
        self.config_ops.read(name, cancel).await
    }

    pub async fn create(
        &self,
        request: &ConfigRequest,
        cancel: &CancellationToken,
    ) -> OpResult<ConfigWritten> {
        self.config_ops.create(request, cancel).await
    }

    pub async fn overwrite(
        &self,
        request: &EditRequest,
        cancel: &CancellationToken,
    ) -> OpResult<ConfigWritten> {
        self.config_ops.overwrite(request, cancel).await
    }

    pub async fn update(
        &self,
        request: &UpdateRequest,
        cancel: &CancellationToken,
    ) -> OpResult<UpdateOutcome> {
        self.config_ops.update_field(request, cancel).await
    }

    pub async fn remove(
        &self,
        request: &RemoveRequest,
        cancel: &CancellationToken,
    ) -> OpResult<ConfigWritten> {
        self.config_ops.remove(request, cancel).await
    }

    pub async fn add_mcp(
        &self,
        name: &str,
        mcp_path: Option<&str>,
        create_backup: bool,
        cancel: &CancellationToken,
    ) -> OpResult<UpdateOutcome> {
        self.config_ops
            .add_mcp(name, mcp_path, create_backup, cancel)
            .await
    }

    pub async fn health_check(
        &self,
        request: &HealthRequest,
        cancel: &CancellationToken,
    ) -> OpResult<HealthResult> {
        self.health.health_check(request, cancel).await
    }

    pub async fn logs(
        &self,
        request: &LogsRequest,
        cancel: &CancellationToken,
    ) -> OpResult<String> {
        self.health.get_logs(request, cancel).await
    }

    pub async fn backups_list(&self, cancel: &CancellationToken) -> OpResult<Vec<BackupInfo>> {
        self.backups.list(cancel).await
    }

    pub async fn backups_cleanup(
        &self,
        retention_days: Option<u32>,
        cancel: &CancellationToken,
    ) -> OpResult<usize> {
        self.backups.cleanup(retention_days, cancel).await
    }

    /// Snapshot of the environment defaults.
    pub fn defaults(&self) -> DefaultsSnapshot {
        DefaultsSnapshot {
            auth_method: self.settings.default_auth_method,
            config_base: self.settings.default_config_base,
            quic_enabled: self.settings.default_quic_enabled,
            backup_retention_days: self.settings.backup_retention_days,
            health_timeout_secs: self.settings.health_timeout_default_s,
        }
    }

    /// Release pooled resources: the probe client and the lock table.
    /// In-flight operations holding a lock keep it alive through their own
    /// `Arc` until they finish.
    pub fn shutdown(&mut self) {
        self.health.shutdown();
        self.file_ops.clear_locks();
        tracing::info!("service shut down");
    }
}
