//! Stages that move device level configuration from the source to the destination.

use super::{call_remote, call_remote_for_string, remote_method, Result};
use crate::collaborators::{DataMover, LocalDevice, RemoteDevice};
use crate::context::MigrationContext;
use log::{debug, info};
use serde_json::json;
use snafu::ResultExt;
use std::sync::Arc;
use std::time::Duration;
use transaction::{Stage, StageError};

/// Copies the source's device configuration; rollback puts the previous configuration back.
pub struct DeviceConfigStage {
    mover: Arc<dyn DataMover>,
}

impl DeviceConfigStage {
    pub fn new(mover: Arc<dyn DataMover>) -> Self {
        Self { mover }
    }
}

impl Stage<MigrationContext> for DeviceConfigStage {
    fn name(&self) -> String {
        "device-config".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        self.mover
            .copy_device_config()
            .context(super::DeviceConfigSnafu)?;
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), StageError> {
        self.mover
            .restore_device_config()
            .context(super::DeviceConfigSnafu)?;
        Ok(())
    }
}

/// Deletes the source's stale backup of its own configuration.
pub struct DeleteConfigBackupStage {
    remote: Arc<dyn RemoteDevice>,
    timeout: Duration,
}

impl DeleteConfigBackupStage {
    pub fn new(remote: Arc<dyn RemoteDevice>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }
}

impl Stage<MigrationContext> for DeleteConfigBackupStage {
    fn name(&self) -> String {
        "delete-config-backup".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        call_remote(
            self.remote.as_ref(),
            remote_method::CONFIG_BACKUP_DELETE,
            self.timeout,
        )?;
        Ok(())
    }
}

/// Points the destination's offsite storage node at the node the source uses.
pub struct ChangeStorageNodeStage {
    local: Arc<dyn LocalDevice>,
    remote: Arc<dyn RemoteDevice>,
    timeout: Duration,
    previous: Option<String>,
}

impl ChangeStorageNodeStage {
    pub fn new(local: Arc<dyn LocalDevice>, remote: Arc<dyn RemoteDevice>, timeout: Duration) -> Self {
        Self {
            local,
            remote,
            timeout,
            previous: None,
        }
    }
}

impl Stage<MigrationContext> for ChangeStorageNodeStage {
    fn name(&self) -> String {
        "change-storage-node".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        let remote_node = remote_storage_node(self.remote.as_ref(), self.timeout)?;
        let local_node = self.local.storage_node().context(super::StorageNodeSnafu)?;
        if remote_node == local_node {
            debug!("Storage node already set to '{}'", local_node);
            return Ok(());
        }

        info!(
            "Changing storage node from '{}' to '{}'",
            local_node, remote_node
        );
        self.local
            .set_storage_node(&remote_node)
            .context(super::StorageNodeSnafu)?;
        self.previous = Some(local_node);
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), StageError> {
        if let Some(previous) = self.previous.take() {
            info!("Restoring storage node '{}'", previous);
            self.local
                .set_storage_node(&previous)
                .context(super::StorageNodeSnafu)?;
        }
        Ok(())
    }
}

/// Synchronizes share configuration.
pub struct ShareSyncStage {
    mover: Arc<dyn DataMover>,
}

impl ShareSyncStage {
    pub fn new(mover: Arc<dyn DataMover>) -> Self {
        Self { mover }
    }
}

impl Stage<MigrationContext> for ShareSyncStage {
    fn name(&self) -> String {
        "sync-shares".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        self.mover.sync_shares().context(super::ShareSyncSnafu)?;
        Ok(())
    }
}

/// Registers this device as the place the source backs its configuration up to.
pub struct AddConfigBackupStage {
    local: Arc<dyn LocalDevice>,
    remote: Arc<dyn RemoteDevice>,
    timeout: Duration,
}

impl AddConfigBackupStage {
    pub fn new(local: Arc<dyn LocalDevice>, remote: Arc<dyn RemoteDevice>, timeout: Duration) -> Self {
        Self {
            local,
            remote,
            timeout,
        }
    }
}

impl Stage<MigrationContext> for AddConfigBackupStage {
    fn name(&self) -> String {
        "add-config-backup".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        let hostname = self.local.hostname().context(super::ConfigBackupSnafu)?;
        let method = remote_method::CONFIG_BACKUP_ADD;
        self.remote
            .call(method, json!({ "hostname": hostname }), self.timeout)
            .context(super::RemoteSnafu { method })?;
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), StageError> {
        call_remote(
            self.remote.as_ref(),
            remote_method::CONFIG_BACKUP_DELETE,
            self.timeout,
        )?;
        Ok(())
    }
}

/// Moves hypervisor connections over; used only when individual assets are migrated.
pub struct HypervisorConnectionsStage {
    mover: Arc<dyn DataMover>,
}

impl HypervisorConnectionsStage {
    pub fn new(mover: Arc<dyn DataMover>) -> Self {
        Self { mover }
    }
}

impl Stage<MigrationContext> for HypervisorConnectionsStage {
    fn name(&self) -> String {
        "migrate-hypervisor-connections".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        self.mover
            .migrate_hypervisor_connections()
            .context(super::HypervisorConnectionsSnafu)?;
        Ok(())
    }

    fn rollback(&mut self) -> std::result::Result<(), StageError> {
        self.mover
            .remove_hypervisor_connections()
            .context(super::HypervisorConnectionsSnafu)?;
        Ok(())
    }
}

/// Asks the remote device which offsite storage node it uses.
pub(crate) fn remote_storage_node(remote: &dyn RemoteDevice, timeout: Duration) -> Result<String> {
    call_remote_for_string(remote, remote_method::STORAGE_NODE, timeout)
}
