//! In-memory collaborators for tests.  Every operation is recorded, and any operation can be
//! made to fail.

use crate::collaborators::{
    AssetSummary, DataMover, Error, LocalDevice, RemoteDevice, Result, StoragePool, Transport,
};
use crate::expansion::Redundancy;
use crate::stages::remote_method;
use semver::Version;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::time::Duration;

pub(crate) struct FakeDevices {
    events: RefCell<Vec<String>>,
    failures: RefCell<HashSet<String>>,
    connected: Cell<bool>,
    local_version: RefCell<String>,
    remote_version: RefCell<String>,
    local_node: RefCell<String>,
    remote_node: RefCell<String>,
    local_assets: RefCell<Vec<AssetSummary>>,
    remote_assets: RefCell<Vec<AssetSummary>>,
    redundancy: Cell<Redundancy>,
    device_capacity: Cell<u64>,
}

impl Default for FakeDevices {
    fn default() -> Self {
        Self {
            events: RefCell::default(),
            failures: RefCell::default(),
            connected: Cell::new(false),
            local_version: RefCell::new("2.0.0".to_string()),
            remote_version: RefCell::new("1.9.0".to_string()),
            local_node: RefCell::new("node-local".to_string()),
            remote_node: RefCell::new("node-remote".to_string()),
            local_assets: RefCell::default(),
            remote_assets: RefCell::default(),
            redundancy: Cell::new(Redundancy::Mirror),
            device_capacity: Cell::new(1_000),
        }
    }
}

impl FakeDevices {
    /// Makes `operation` fail from now on.  Operations are named the way they're recorded.
    pub(crate) fn fail_on(&self, operation: &str) {
        self.failures.borrow_mut().insert(operation.to_string());
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub(crate) fn position(&self, event: &str) -> Option<usize> {
        self.events.borrow().iter().position(|e| e == event)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.get()
    }

    pub(crate) fn set_versions(&self, local: &str, remote: &str) {
        *self.local_version.borrow_mut() = local.to_string();
        *self.remote_version.borrow_mut() = remote.to_string();
    }

    pub(crate) fn set_storage_nodes(&self, local: &str, remote: &str) {
        *self.local_node.borrow_mut() = local.to_string();
        *self.remote_node.borrow_mut() = remote.to_string();
    }

    pub(crate) fn set_local_assets(&self, assets: Vec<AssetSummary>) {
        *self.local_assets.borrow_mut() = assets;
    }

    pub(crate) fn set_remote_assets(&self, assets: Vec<AssetSummary>) {
        *self.remote_assets.borrow_mut() = assets;
    }

    pub(crate) fn set_pool(&self, redundancy: Redundancy, device_capacity: u64) {
        self.redundancy.set(redundancy);
        self.device_capacity.set(device_capacity);
    }

    fn record<S: Into<String>>(&self, operation: S) -> Result<()> {
        let operation = operation.into();
        let fail = self.failures.borrow().contains(&operation);
        self.events.borrow_mut().push(operation.clone());
        if fail {
            return Err(Error::HelperFailure {
                command: operation,
                status: "exit status: 1".to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl RemoteDevice for FakeDevices {
    fn hostname(&self) -> Option<String> {
        Some("old-box".to_string())
    }

    fn connect(&self) -> Result<()> {
        self.record("connect")?;
        self.connected.set(true);
        Ok(())
    }

    fn disconnect(&self) {
        self.events.borrow_mut().push("disconnect".to_string());
        self.connected.set(false);
    }

    fn call(&self, method: &str, _params: Value, _timeout: Duration) -> Result<Value> {
        if !self.connected.get() {
            return Err(Error::NotConnected);
        }
        self.record(method)?;
        Ok(match method {
            remote_method::OS_VERSION => Value::String(self.remote_version.borrow().clone()),
            remote_method::STORAGE_NODE => Value::String(self.remote_node.borrow().clone()),
            remote_method::ASSETS => {
                serde_json::to_value(&*self.remote_assets.borrow()).unwrap_or(Value::Null)
            }
            _ => Value::Null,
        })
    }
}

impl LocalDevice for FakeDevices {
    fn hostname(&self) -> Result<String> {
        self.record("local-hostname")?;
        Ok("new-box".to_string())
    }

    fn os_version(&self) -> Result<Version> {
        self.record("os-version")?;
        let version = self.local_version.borrow().clone();
        Version::parse(&version).map_err(|source| Error::InvalidVersion {
            command: "os-version".to_string(),
            version,
            source,
        })
    }

    fn verify_datasets(&self, targets: &[String]) -> Result<()> {
        self.record(format!("verify-datasets:{}", targets.join(",")))
    }

    fn set_maintenance_mode(&self, enabled: bool) -> Result<()> {
        self.record(format!("maintenance-mode:{}", enabled))
    }

    fn set_offsite_sync_paused(&self, paused: bool) -> Result<()> {
        self.record(format!("offsite-sync-paused:{}", paused))
    }

    fn storage_node(&self) -> Result<String> {
        self.record("storage-node")?;
        Ok(self.local_node.borrow().clone())
    }

    fn set_storage_node(&self, node: &str) -> Result<()> {
        self.record(format!("set-storage-node:{}", node))?;
        *self.local_node.borrow_mut() = node.to_string();
        Ok(())
    }

    fn list_assets(&self) -> Result<Vec<AssetSummary>> {
        self.record("list-assets")?;
        Ok(self.local_assets.borrow().clone())
    }

    fn reboot(&self) -> Result<()> {
        self.record("reboot")
    }
}

impl Transport for FakeDevices {
    fn open(&self) -> Result<()> {
        self.record("ssh-open")
    }

    fn close(&self) -> Result<()> {
        self.record("ssh-close")
    }
}

impl DataMover for FakeDevices {
    fn copy_device_config(&self) -> Result<()> {
        self.record("copy-device-config")
    }

    fn restore_device_config(&self) -> Result<()> {
        self.record("restore-device-config")
    }

    fn migrate_asset(&self, asset: &str) -> Result<()> {
        self.record(format!("migrate-asset:{}", asset))
    }

    fn remove_asset(&self, asset: &str) -> Result<()> {
        self.record(format!("remove-asset:{}", asset))
    }

    fn sync_shares(&self) -> Result<()> {
        self.record("sync-shares")
    }

    fn migrate_hypervisor_connections(&self) -> Result<()> {
        self.record("migrate-hypervisor-connections")
    }

    fn remove_hypervisor_connections(&self) -> Result<()> {
        self.record("remove-hypervisor-connections")
    }

    fn upload_encryption_keys(&self) -> Result<()> {
        self.record("upload-encryption-keys")
    }

    fn provision_users(&self) -> Result<()> {
        self.record("provision-users")
    }
}

impl StoragePool for FakeDevices {
    fn redundancy(&self) -> Result<Redundancy> {
        self.record("pool-redundancy")?;
        Ok(self.redundancy.get())
    }

    fn device_capacities(&self, devices: &[String]) -> Result<Vec<u64>> {
        self.record("device-capacities")?;
        Ok(vec![self.device_capacity.get(); devices.len()])
    }

    fn expand(&self, devices: &[String]) -> Result<()> {
        self.record(format!("expand-pool:{}", devices.join(",")))
    }
}
