//! What the management interface shows about device migrations, and the advisory checks it runs
//! before offering to start one.

use crate::collaborators::{AssetSummary, Collaborators, RemoteDevice};
use crate::error::{self, Result};
use crate::migration::{Migration, MigrationStatus, MigrationType};
use crate::service::MigrationService;
use crate::stages::{self, remote_method};
use chrono::{DateTime, Utc};
use log::debug;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ResultExt;
use std::collections::HashSet;
use std::time::Duration;

/// Used in messages when the remote device doesn't say what it's called.
const UNKNOWN_HOST: &str = "remote device";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MigrationState {
    Running,
    Inactive,
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMigrationStatus {
    pub hostname: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub state: MigrationState,
    pub message: Option<String>,
    pub error_code: i32,
}

impl DeviceMigrationStatus {
    fn inactive() -> Self {
        Self {
            hostname: None,
            start_time: None,
            state: MigrationState::Inactive,
            message: None,
            error_code: 0,
        }
    }

    fn from_migration(migration: &Migration, state: MigrationState) -> Self {
        Self {
            hostname: migration.sources().first().cloned(),
            start_time: Some(migration.schedule_at()),
            state,
            message: migration.error_message().map(str::to_string),
            error_code: migration.error_code(),
        }
    }
}

/// An asset on the remote device that could be migrated here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteAsset {
    pub key_name: String,
    pub display_name: String,
    /// A different local asset already uses this display name.
    pub name_conflict: bool,
}

pub struct DeviceMigrationService<'a> {
    migrations: &'a MigrationService,
    collaborators: Collaborators,
    remote_timeout: Duration,
}

impl<'a> DeviceMigrationService<'a> {
    pub fn new(
        migrations: &'a MigrationService,
        collaborators: Collaborators,
        remote_timeout: Duration,
    ) -> Self {
        Self {
            migrations,
            collaborators,
            remote_timeout,
        }
    }

    /// Status of the current device migration, or else the latest one that hasn't been
    /// dismissed.
    pub fn get_status(&self) -> Result<DeviceMigrationStatus> {
        if let Some(current) = self.migrations.get_scheduled()? {
            if current.migration_type() == MigrationType::Device {
                return Ok(DeviceMigrationStatus::from_migration(
                    &current,
                    MigrationState::Running,
                ));
            }
        }

        let latest = self
            .migrations
            .get_all_completed()?
            .into_iter()
            .rev()
            .find(|m| m.migration_type() == MigrationType::Device);
        Ok(match latest {
            Some(migration) if !migration.is_dismissed() => {
                let state = if migration.status() == MigrationStatus::Error
                    || migration.has_error_message()
                {
                    MigrationState::Failed
                } else {
                    MigrationState::Success
                };
                DeviceMigrationStatus::from_migration(&migration, state)
            }
            _ => DeviceMigrationStatus::inactive(),
        })
    }

    pub fn is_start_allowed(&self) -> Result<bool> {
        Ok(!self.migrations.is_running()?)
    }

    /// Checks that the remote device accepts a connection.
    pub fn check_reachability(&self) -> Result<()> {
        self.with_remote(|_| Ok(()))
    }

    /// Checks that the remote device's OS can be migrated to this one.  Returns the (local,
    /// remote) versions.
    pub fn check_compatibility(&self) -> Result<(Version, Version)> {
        let local = self.collaborators.local.clone();
        let timeout = self.remote_timeout;
        self.with_remote(|remote| {
            stages::check_compatibility(local.as_ref(), remote, timeout)
                .context(error::PreflightSnafu)
        })
    }

    /// Assets on the remote device that aren't here yet.  Assets whose display name is already
    /// used by a different local asset are flagged.
    pub fn get_remote_assets(&self) -> Result<Vec<RemoteAsset>> {
        let timeout = self.remote_timeout;
        let remote_assets: Vec<AssetSummary> = self.with_remote(|remote| {
            let method = remote_method::ASSETS;
            let response = remote
                .call(method, Value::Object(Default::default()), timeout)
                .context(error::RemoteAssetsSnafu)?;
            serde_json::from_value(response).context(error::RemoteResponseSnafu { method })
        })?;
        let local_assets = self
            .collaborators
            .local
            .list_assets()
            .context(error::LocalDeviceSnafu)?;

        let local_keys: HashSet<&str> = local_assets.iter().map(|a| a.key_name.as_str()).collect();
        let local_names: HashSet<&str> = local_assets
            .iter()
            .map(|a| a.display_name.as_str())
            .collect();

        let mut seen = HashSet::new();
        let mut assets = Vec::new();
        for asset in remote_assets {
            if local_keys.contains(asset.key_name.as_str()) {
                debug!("Asset '{}' is already on this device", asset.key_name);
                continue;
            }
            if !seen.insert(asset.key_name.clone()) {
                continue;
            }
            let name_conflict = local_names.contains(asset.display_name.as_str());
            assets.push(RemoteAsset {
                key_name: asset.key_name,
                display_name: asset.display_name,
                name_conflict,
            });
        }
        Ok(assets)
    }

    /// Whether this device already sends offsite data to the same storage node as the remote.
    pub fn is_storage_node_shared(&self) -> Result<bool> {
        let timeout = self.remote_timeout;
        let remote_node = self.with_remote(|remote| {
            stages::remote_storage_node(remote, timeout).context(error::PreflightSnafu)
        })?;
        let local_node = self
            .collaborators
            .local
            .storage_node()
            .context(error::LocalDeviceSnafu)?;
        Ok(remote_node == local_node)
    }

    /// Connects to the remote device for the length of `f`.
    fn with_remote<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn RemoteDevice) -> Result<T>,
    {
        let remote = self.collaborators.remote.as_ref();
        let host = remote.hostname().unwrap_or_else(|| UNKNOWN_HOST.to_string());
        remote
            .connect()
            .context(error::UnreachableSnafu { host: &host })?;
        let result = f(remote);
        remote.disconnect();
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::factory::MigrationFactory;
    use crate::fakes::FakeDevices;
    use crate::lock::MigrationLock;
    use crate::store::MigrationStore;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        devices: Arc<FakeDevices>,
        migrations: MigrationService,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let devices = Arc::new(FakeDevices::default());
            let migrations = MigrationService::new(
                MigrationStore::new(dir.path().join("current.json"), dir.path().join("archive")),
                MigrationLock::new(dir.path().join("migration.lock")),
                MigrationFactory::new(
                    Collaborators::from_shared(devices.clone()),
                    Duration::from_secs(1),
                ),
            );
            Self {
                _dir: dir,
                devices,
                migrations,
            }
        }

        fn service(&self) -> DeviceMigrationService<'_> {
            DeviceMigrationService::new(
                &self.migrations,
                Collaborators::from_shared(self.devices.clone()),
                Duration::from_secs(1),
            )
        }

        /// Archives a device migration that ran at `seconds` and ended in `status`.
        fn archive(&self, seconds: i64, status: MigrationStatus) {
            let mut migration = Migration::new(
                MigrationType::Device,
                Utc.timestamp_opt(seconds, 0).unwrap(),
                vec!["old-box".to_string()],
                vec!["device".to_string()],
                false,
            );
            migration.set_status(MigrationStatus::Running).unwrap();
            migration.set_status(status).unwrap();
            let store = self.migrations.store();
            store.save_current(&migration).unwrap();
            store.archive_current(migration.schedule_at()).unwrap();
        }
    }

    #[test]
    fn inactive_without_migrations() {
        let fixture = Fixture::new();
        let status = fixture.service().get_status().unwrap();
        assert_eq!(status, DeviceMigrationStatus::inactive());
        assert!(fixture.service().is_start_allowed().unwrap());
    }

    #[test]
    fn scheduled_is_running() {
        let fixture = Fixture::new();
        let at = Utc::now() + chrono::Duration::hours(1);
        fixture
            .migrations
            .schedule(
                at,
                vec!["old-box".to_string()],
                vec!["device".to_string()],
                false,
                MigrationType::Device,
                false,
            )
            .unwrap();
        let status = fixture.service().get_status().unwrap();
        assert_eq!(status.state, MigrationState::Running);
        assert_eq!(status.hostname.as_deref(), Some("old-box"));
        assert_eq!(status.start_time, Some(at));
    }

    #[test]
    fn latest_completed_decides() {
        let fixture = Fixture::new();
        fixture.archive(1_700_000_000, MigrationStatus::Error);
        fixture.archive(1_700_000_100, MigrationStatus::Done);
        let status = fixture.service().get_status().unwrap();
        assert_eq!(status.state, MigrationState::Success);
        assert_eq!(
            status.start_time,
            Some(Utc.timestamp_opt(1_700_000_100, 0).unwrap())
        );

        fixture.archive(1_700_000_200, MigrationStatus::Error);
        assert_eq!(
            fixture.service().get_status().unwrap().state,
            MigrationState::Failed
        );

        fixture.migrations.dismiss_all_completed().unwrap();
        assert_eq!(
            fixture.service().get_status().unwrap().state,
            MigrationState::Inactive
        );
    }

    #[test]
    fn serialized_status() {
        let value = serde_json::to_value(DeviceMigrationStatus::inactive()).unwrap();
        assert_eq!(value["state"], "INACTIVE");
        assert_eq!(value["errorCode"], 0);
        assert!(value["startTime"].is_null());
    }

    #[test]
    fn start_not_allowed_while_locked() {
        let fixture = Fixture::new();
        let _guard = fixture.migrations.lock().try_acquire().unwrap();
        assert!(!fixture.service().is_start_allowed().unwrap());
    }

    fn asset(key: &str, name: &str) -> AssetSummary {
        AssetSummary {
            key_name: key.to_string(),
            display_name: name.to_string(),
        }
    }

    #[test]
    fn remote_assets_exclude_local_ones() {
        let fixture = Fixture::new();
        fixture.devices.set_local_assets(vec![
            asset("agent1", "Web Server"),
            asset("agent9", "Mail Server"),
        ]);
        fixture.devices.set_remote_assets(vec![
            asset("agent1", "Web Server"),
            asset("agent2", "Mail Server"),
            asset("agent3", "Database"),
            asset("agent3", "Database"),
        ]);

        let assets = fixture.service().get_remote_assets().unwrap();
        assert_eq!(
            assets,
            [
                RemoteAsset {
                    key_name: "agent2".to_string(),
                    display_name: "Mail Server".to_string(),
                    name_conflict: true,
                },
                RemoteAsset {
                    key_name: "agent3".to_string(),
                    display_name: "Database".to_string(),
                    name_conflict: false,
                },
            ]
        );
        assert!(!fixture.devices.is_connected());
    }

    #[test]
    fn storage_node_comparison() {
        let fixture = Fixture::new();
        fixture.devices.set_storage_nodes("node-1", "node-1");
        assert!(fixture.service().is_storage_node_shared().unwrap());
        fixture.devices.set_storage_nodes("node-1", "node-2");
        assert!(!fixture.service().is_storage_node_shared().unwrap());
    }

    #[test]
    fn preflight_failures() {
        let fixture = Fixture::new();
        fixture.devices.set_versions("1.0.0", "2.0.0");
        assert!(matches!(
            fixture.service().check_compatibility(),
            Err(error::Error::Preflight { .. })
        ));
        fixture.devices.set_versions("2.0.0", "1.5.0");
        let (local, remote) = fixture.service().check_compatibility().unwrap();
        assert_eq!(local, Version::new(2, 0, 0));
        assert_eq!(remote, Version::new(1, 5, 0));

        fixture.devices.fail_on("connect");
        assert!(matches!(
            fixture.service().check_reachability(),
            Err(error::Error::Unreachable { .. })
        ));
    }
}
