//! Traits for the systems a migration acts on: the local device (the destination), the remote
//! device (the source), the transport between them, the services that move data, and the local
//! storage pool.
//!
//! The stages only depend on these traits.  [`crate::helper::HelperCommands`] implements all of
//! them for the real system; tests use in-memory fakes.

use crate::expansion::Redundancy;
use semver::Version;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::Snafu;
use std::sync::Arc;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to start '{}': {}", command, source))]
    HelperStart {
        command: String,
        source: std::io::Error,
    },

    #[snafu(display("'{}' failed with {} - stderr: {}", command, status, stderr))]
    HelperFailure {
        command: String,
        status: String,
        stderr: String,
    },

    #[snafu(display("Unable to parse output of '{}': {}", command, source))]
    HelperOutput {
        command: String,
        source: serde_json::Error,
    },

    #[snafu(display("Unable to encode parameters for '{}': {}", method, source))]
    CallParameters {
        method: String,
        source: serde_json::Error,
    },

    #[snafu(display("Invalid version '{}' reported by '{}': {}", version, command, source))]
    InvalidVersion {
        command: String,
        version: String,
        source: semver::Error,
    },

    #[snafu(display("Invalid redundancy '{}' reported by '{}': {}", redundancy, command, source))]
    InvalidRedundancy {
        command: String,
        redundancy: String,
        source: serde_plain::Error,
    },

    #[snafu(display("Unable to get hostname: {}", source))]
    Hostname { source: nix::Error },

    #[snafu(display("Hostname is not valid UTF-8"))]
    HostnameNotUtf8,

    #[snafu(display("Remote device is not connected"))]
    NotConnected,

    #[snafu(display("Remote call '{}' failed: {}", method, message))]
    RemoteCall { method: String, message: String },

    #[snafu(display("Failed to set up signal handler: {}", source))]
    Signal { source: std::io::Error },

    #[snafu(display("Failed to start reboot: {}", source))]
    RebootFailure { source: std::io::Error },
}

/// An asset (a protected machine and its datasets) as known to one device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSummary {
    pub key_name: String,
    pub display_name: String,
}

/// The source device, reached over the network.
pub trait RemoteDevice {
    /// The host the client is configured for, if any.
    fn hostname(&self) -> Option<String>;
    fn connect(&self) -> Result<()>;
    fn disconnect(&self);
    fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value>;
}

/// The destination device, which is the one running the migration.
pub trait LocalDevice {
    fn hostname(&self) -> Result<String>;
    fn os_version(&self) -> Result<Version>;
    /// Checks that the datasets needed for the given targets can be created.
    fn verify_datasets(&self, targets: &[String]) -> Result<()>;
    fn set_maintenance_mode(&self, enabled: bool) -> Result<()>;
    fn set_offsite_sync_paused(&self, paused: bool) -> Result<()>;
    fn storage_node(&self) -> Result<String>;
    fn set_storage_node(&self, node: &str) -> Result<()>;
    fn list_assets(&self) -> Result<Vec<AssetSummary>>;
    fn reboot(&self) -> Result<()>;
}

/// The SSH transport bulk transfers run over.
pub trait Transport {
    fn open(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

/// Services that copy configuration and data from the source device.
pub trait DataMover {
    fn copy_device_config(&self) -> Result<()>;
    fn restore_device_config(&self) -> Result<()>;
    fn migrate_asset(&self, asset: &str) -> Result<()>;
    fn remove_asset(&self, asset: &str) -> Result<()>;
    fn sync_shares(&self) -> Result<()>;
    fn migrate_hypervisor_connections(&self) -> Result<()>;
    fn remove_hypervisor_connections(&self) -> Result<()>;
    fn upload_encryption_keys(&self) -> Result<()>;
    fn provision_users(&self) -> Result<()>;
}

/// The local storage pool, for storage expansion.
pub trait StoragePool {
    fn redundancy(&self) -> Result<Redundancy>;
    fn device_capacities(&self, devices: &[String]) -> Result<Vec<u64>>;
    fn expand(&self, devices: &[String]) -> Result<()>;
}

/// Handles to every collaborator, cheap to clone.
#[derive(Clone)]
pub struct Collaborators {
    pub local: Arc<dyn LocalDevice>,
    pub remote: Arc<dyn RemoteDevice>,
    pub transport: Arc<dyn Transport>,
    pub mover: Arc<dyn DataMover>,
    pub pool: Arc<dyn StoragePool>,
}

impl Collaborators {
    /// Uses one object for every role.
    pub fn from_shared<T>(shared: Arc<T>) -> Self
    where
        T: LocalDevice + RemoteDevice + Transport + DataMover + StoragePool + 'static,
    {
        Self {
            local: shared.clone(),
            remote: shared.clone(),
            transport: shared.clone(),
            mover: shared.clone(),
            pool: shared,
        }
    }
}
