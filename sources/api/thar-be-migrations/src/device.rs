//! Device migration: moving configuration and assets from another appliance onto this one.

use crate::collaborators::{Collaborators, LocalDevice};
use crate::context::MigrationContext;
use crate::error::{self, Result};
use crate::migration::{MigrationKind, MigrationType, Stages};
use crate::stages::{
    AddConfigBackupStage, ChangeStorageNodeStage, CompatibilityStage, ConnectStage,
    DeleteConfigBackupStage, DeviceConfigStage, EncryptionKeysStage, HypervisorConnectionsStage,
    MaintenanceModeStage, MigrateAssetStage, OffsiteSyncStage, ProvisionUsersStage, RemoteSession,
    ShareSyncStage, SshTransportStage, VerifyDatasetsStage,
};
use log::info;
use snafu::{ensure, ResultExt};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

/// Target that asks for the device itself (configuration, storage node, config backup) to be
/// migrated, not just individual assets.
pub const DEVICE_TARGET: &str = "device";

/// Builds the stage list of a device migration from its targets.
#[derive(Clone)]
pub struct DeviceMigrationStagesFactory {
    collaborators: Collaborators,
    remote_timeout: Duration,
}

impl DeviceMigrationStagesFactory {
    pub fn new(collaborators: Collaborators, remote_timeout: Duration) -> Self {
        Self {
            collaborators,
            remote_timeout,
        }
    }

    pub fn create(&self, context: &MigrationContext) -> Stages {
        let c = &self.collaborators;
        let timeout = self.remote_timeout;
        let full = context.has_target(DEVICE_TARGET);
        let mut stages: Stages = Vec::new();

        // Checked before anything touches the network
        stages.push(Box::new(VerifyDatasetsStage::new(c.local.clone())));

        // Shared by every stage that still talks to the remote device in cleanup
        let session = Rc::new(RemoteSession::new(c.remote.clone()));
        stages.push(Box::new(ConnectStage::new(session.clone())));
        stages.push(Box::new(CompatibilityStage::new(
            c.local.clone(),
            c.remote.clone(),
            timeout,
        )));

        stages.push(Box::new(MaintenanceModeStage::new(
            c.local.clone(),
            session.clone(),
            timeout,
        )));
        stages.push(Box::new(OffsiteSyncStage::new(
            c.local.clone(),
            session.clone(),
            timeout,
        )));
        stages.push(Box::new(SshTransportStage::new(
            session,
            c.transport.clone(),
            timeout,
        )));

        if full {
            stages.push(Box::new(DeviceConfigStage::new(c.mover.clone())));
            stages.push(Box::new(DeleteConfigBackupStage::new(
                c.remote.clone(),
                timeout,
            )));
            stages.push(Box::new(ChangeStorageNodeStage::new(
                c.local.clone(),
                c.remote.clone(),
                timeout,
            )));
        }

        for asset in context.targets().iter().filter(|t| *t != DEVICE_TARGET) {
            stages.push(Box::new(MigrateAssetStage::new(c.mover.clone(), asset)));
        }

        stages.push(Box::new(ShareSyncStage::new(c.mover.clone())));

        if full {
            stages.push(Box::new(AddConfigBackupStage::new(
                c.local.clone(),
                c.remote.clone(),
                timeout,
            )));
        } else {
            stages.push(Box::new(HypervisorConnectionsStage::new(c.mover.clone())));
        }

        stages.push(Box::new(EncryptionKeysStage::new(c.mover.clone())));
        stages.push(Box::new(ProvisionUsersStage::new(c.mover.clone())));
        stages
    }
}

/// Migrates another device onto this one, then reboots into the migrated configuration.
pub struct DeviceMigration {
    stages: DeviceMigrationStagesFactory,
    local: Arc<dyn LocalDevice>,
}

impl DeviceMigration {
    pub fn new(stages: DeviceMigrationStagesFactory, local: Arc<dyn LocalDevice>) -> Self {
        Self { stages, local }
    }
}

impl MigrationKind for DeviceMigration {
    fn migration_type(&self) -> MigrationType {
        MigrationType::Device
    }

    fn validate(&self, _sources: &[String], targets: &[String]) -> Result<()> {
        ensure!(
            !targets.is_empty(),
            error::EmptyTargetsSnafu {
                migration_type: self.migration_type(),
            }
        );
        Ok(())
    }

    fn create_stages(&self, context: &MigrationContext) -> Stages {
        self.stages.create(context)
    }

    fn reboot_if_needed(&self) -> Result<()> {
        info!("Device migration finished, rebooting");
        self.local.reboot().context(error::RebootSnafu)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fakes::FakeDevices;

    fn stage_names(targets: &[&str]) -> Vec<String> {
        let factory = DeviceMigrationStagesFactory::new(
            Collaborators::from_shared(Arc::new(FakeDevices::default())),
            Duration::from_secs(1),
        );
        let context = MigrationContext::new(targets.iter().copied(), Vec::<String>::new(), true);
        factory
            .create(&context)
            .iter()
            .map(|stage| stage.name())
            .collect()
    }

    #[test]
    fn full_migration_stages() {
        let names = stage_names(&["device"]);
        assert_eq!(
            names,
            [
                "verify-datasets",
                "connect-remote",
                "check-compatibility",
                "maintenance-mode",
                "pause-offsite-sync",
                "ssh-transport",
                "device-config",
                "delete-config-backup",
                "change-storage-node",
                "sync-shares",
                "add-config-backup",
                "upload-encryption-keys",
                "provision-users",
            ]
        );
    }

    #[test]
    fn asset_only_stages() {
        let names = stage_names(&["agent123"]);
        assert_eq!(
            names
                .iter()
                .filter(|n| n.starts_with("migrate-asset:"))
                .collect::<Vec<_>>(),
            ["migrate-asset:agent123"]
        );
        assert!(names.contains(&"migrate-hypervisor-connections".to_string()));
        for full_only in [
            "device-config",
            "delete-config-backup",
            "change-storage-node",
            "add-config-backup",
        ] {
            assert!(!names.contains(&full_only.to_string()), "{}", full_only);
        }
        assert_eq!(names.first().map(String::as_str), Some("verify-datasets"));
        assert_eq!(names.last().map(String::as_str), Some("provision-users"));
    }

    #[test]
    fn assets_follow_target_order() {
        let names = stage_names(&["agentB", "device", "agentA"]);
        let position = |name: &str| names.iter().position(|n| n == name).unwrap();
        assert!(position("change-storage-node") < position("migrate-asset:agentB"));
        assert!(position("migrate-asset:agentB") < position("migrate-asset:agentA"));
        assert!(position("migrate-asset:agentA") < position("sync-shares"));
        assert!(!names.contains(&"migrate-hypervisor-connections".to_string()));
        assert!(!names.contains(&"migrate-asset:device".to_string()));
    }

    #[test]
    fn needs_targets() {
        let kind = DeviceMigration::new(
            DeviceMigrationStagesFactory::new(
                Collaborators::from_shared(Arc::new(FakeDevices::default())),
                Duration::from_secs(1),
            ),
            Arc::new(FakeDevices::default()),
        );
        assert!(kind.validate(&[], &[]).is_err());
        kind.validate(&[], &["device".to_string()]).unwrap();
    }
}
