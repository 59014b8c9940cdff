//! The stages device and storage expansion migrations are built from.
//!
//! Each stage is a thin wrapper around one collaborator operation; what makes them interesting
//! is which of commit, rollback, and cleanup each operation lands in.  Failures are reported as
//! [`Error`], which carries a stable numeric code recorded on the migration.

mod assets;
mod configuration;
mod expansion;
mod preflight;
mod provision;
mod session;
mod suspend;

pub use assets::MigrateAssetStage;
pub use configuration::{
    AddConfigBackupStage, ChangeStorageNodeStage, DeleteConfigBackupStage, DeviceConfigStage,
    HypervisorConnectionsStage, ShareSyncStage,
};
pub use expansion::{ExpandPoolStage, VerifyExpansionDevicesStage};
pub use preflight::{CompatibilityStage, ConnectStage, VerifyDatasetsStage};
pub use provision::{EncryptionKeysStage, ProvisionUsersStage};
pub use session::RemoteSession;
pub use suspend::{MaintenanceModeStage, OffsiteSyncStage, SshTransportStage};

pub(crate) use configuration::remote_storage_node;
pub(crate) use preflight::check_compatibility;

use crate::collaborators::{self, RemoteDevice};
use num_derive::ToPrimitive;
use num_traits::cast::ToPrimitive;
use semver::Version;
use serde_json::Value;
use snafu::{ResultExt, Snafu};
use std::time::Duration;
use transaction::StageError;

/// Methods called on the remote device.
pub(crate) mod remote_method {
    pub const OS_VERSION: &str = "v1/device/os-version";
    pub const MAINTENANCE_ENABLE: &str = "v1/device/maintenance/enable";
    pub const MAINTENANCE_DISABLE: &str = "v1/device/maintenance/disable";
    pub const OFFSITE_PAUSE: &str = "v1/device/offsite/pause";
    pub const OFFSITE_RESUME: &str = "v1/device/offsite/resume";
    pub const SSH_ENABLE: &str = "v1/device/ssh/enable";
    pub const SSH_DISABLE: &str = "v1/device/ssh/disable";
    pub const STORAGE_NODE: &str = "v1/device/offsite/storage-node";
    pub const CONFIG_BACKUP_ADD: &str = "v1/device/config-backup/add";
    pub const CONFIG_BACKUP_DELETE: &str = "v1/device/config-backup/delete";
    pub const ASSETS: &str = "v1/device/assets";
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Stage '{}' was committed without a context", stage))]
    MissingContext { stage: String },

    #[snafu(display("Dataset verification failed: {}", source))]
    VerifyDatasets { source: collaborators::Error },

    #[snafu(display("Failed to connect to remote device: {}", source))]
    Connect { source: collaborators::Error },

    #[snafu(display("Remote call '{}' failed: {}", method, source))]
    Remote {
        method: String,
        source: collaborators::Error,
    },

    #[snafu(display("Unexpected response to '{}': {}", method, response))]
    UnexpectedResponse { method: String, response: Value },

    #[snafu(display("Failed to get local OS version: {}", source))]
    LocalVersion { source: collaborators::Error },

    #[snafu(display("Remote reported invalid OS version '{}': {}", version, source))]
    InvalidRemoteVersion {
        version: String,
        source: semver::Error,
    },

    #[snafu(display(
        "Cannot migrate from a device running {} to a device running {}",
        remote,
        local
    ))]
    Incompatible { local: Version, remote: Version },

    #[snafu(display("Failed to change local maintenance mode: {}", source))]
    MaintenanceMode { source: collaborators::Error },

    #[snafu(display("Failed to change local offsite sync: {}", source))]
    OffsiteSync { source: collaborators::Error },

    #[snafu(display("Failed to set up SSH transport: {}", source))]
    Transport { source: collaborators::Error },

    #[snafu(display("Failed to migrate device configuration: {}", source))]
    DeviceConfig { source: collaborators::Error },

    #[snafu(display("Failed to register this device as config backup target: {}", source))]
    ConfigBackup { source: collaborators::Error },

    #[snafu(display("Failed to change storage node: {}", source))]
    StorageNode { source: collaborators::Error },

    #[snafu(display("Failed to migrate asset '{}': {}", asset, source))]
    MigrateAsset {
        asset: String,
        source: collaborators::Error,
    },

    #[snafu(display("Failed to synchronize shares: {}", source))]
    ShareSync { source: collaborators::Error },

    #[snafu(display("Failed to migrate hypervisor connections: {}", source))]
    HypervisorConnections { source: collaborators::Error },

    #[snafu(display("Failed to upload encryption keys: {}", source))]
    EncryptionKeys { source: collaborators::Error },

    #[snafu(display("Failed to provision users: {}", source))]
    ProvisionUsers { source: collaborators::Error },

    #[snafu(display("Failed to inspect storage pool: {}", source))]
    StoragePool { source: collaborators::Error },

    #[snafu(display("Adding {:?} would not grow the storage pool", devices))]
    NoExpansion { devices: Vec<String> },

    #[snafu(display("Failed to expand storage pool: {}", source))]
    ExpandPool { source: collaborators::Error },
}

/// Codes recorded as `errorCode` when a stage fails.
#[derive(ToPrimitive)]
pub enum StageErrorCode {
    Internal = 100,
    Datasets = 101,
    Connection = 102,
    Remote = 103,
    Incompatible = 104,
    Suspend = 105,
    Transport = 106,
    DeviceConfig = 107,
    StorageNode = 108,
    Asset = 109,
    Shares = 110,
    Hypervisor = 111,
    EncryptionKeys = 112,
    Users = 113,
    StoragePool = 114,
    ConfigBackup = 115,
}

impl Error {
    pub fn code(&self) -> i32 {
        match self {
            Error::MissingContext { .. } => StageErrorCode::Internal,
            Error::VerifyDatasets { .. } => StageErrorCode::Datasets,
            Error::Connect { .. } => StageErrorCode::Connection,
            Error::Remote { .. } | Error::UnexpectedResponse { .. } => StageErrorCode::Remote,
            Error::LocalVersion { .. }
            | Error::InvalidRemoteVersion { .. }
            | Error::Incompatible { .. } => StageErrorCode::Incompatible,
            Error::MaintenanceMode { .. } | Error::OffsiteSync { .. } => StageErrorCode::Suspend,
            Error::Transport { .. } => StageErrorCode::Transport,
            Error::DeviceConfig { .. } => StageErrorCode::DeviceConfig,
            Error::StorageNode { .. } => StageErrorCode::StorageNode,
            Error::ConfigBackup { .. } => StageErrorCode::ConfigBackup,
            Error::MigrateAsset { .. } => StageErrorCode::Asset,
            Error::ShareSync { .. } => StageErrorCode::Shares,
            Error::HypervisorConnections { .. } => StageErrorCode::Hypervisor,
            Error::EncryptionKeys { .. } => StageErrorCode::EncryptionKeys,
            Error::ProvisionUsers { .. } => StageErrorCode::Users,
            Error::StoragePool { .. } | Error::NoExpansion { .. } | Error::ExpandPool { .. } => {
                StageErrorCode::StoragePool
            }
        }
        .to_i32()
        .unwrap_or(transaction::GENERIC_FAILURE_CODE)
    }
}

impl From<Error> for StageError {
    fn from(e: Error) -> Self {
        StageError::with_code(e.code(), e)
    }
}

/// Calls `method` on the remote device with no parameters.
fn call_remote(remote: &dyn RemoteDevice, method: &str, timeout: Duration) -> Result<Value> {
    remote
        .call(method, Value::Object(Default::default()), timeout)
        .context(RemoteSnafu { method })
}

/// Calls `method` on the remote device and expects a string back.
fn call_remote_for_string(
    remote: &dyn RemoteDevice,
    method: &str,
    timeout: Duration,
) -> Result<String> {
    match call_remote(remote, method, timeout)? {
        Value::String(s) => Ok(s),
        response => UnexpectedResponseSnafu { method, response }.fail(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let e = Error::NoExpansion {
            devices: vec!["sdb".to_string()],
        };
        assert_eq!(e.code(), 114);
        let stage_error = StageError::from(e);
        assert_eq!(stage_error.code(), 114);
        assert_eq!(
            stage_error.to_string(),
            "Adding [\"sdb\"] would not grow the storage pool"
        );
    }

    #[test]
    fn config_backup_has_its_own_code() {
        let e = Error::ConfigBackup {
            source: collaborators::Error::NotConnected,
        };
        assert_eq!(e.code(), 115);
        assert!(e.to_string().starts_with("Failed to register"));
    }
}
