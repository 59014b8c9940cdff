/*!
The collaborators of a real migration, implemented by running helper programs.

The local helper does everything that happens on this device; it's called as
`<local-helper> <subcommand> [args...]`.  The remote helper is the device client used to reach
the source device; it's called as `<remote-helper> connect|disconnect|hostname` or
`<remote-helper> call --method M --timeout SECONDS --params JSON`.

A helper reports success through its exit status.  Subcommands that return data print it to
stdout as JSON.
*/

use crate::collaborators::{
    self, AssetSummary, DataMover, LocalDevice, RemoteDevice, Result, StoragePool, Transport,
};
use crate::expansion::Redundancy;
use log::{debug, trace, warn};
use semver::Version;
use serde::de::DeserializeOwned;
use serde_json::Value;
use signal_hook::consts::SIGTERM;
use signal_hook::iterator::Signals;
use snafu::{ensure, ResultExt};
use std::cell::Cell;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;

pub struct HelperCommands {
    local_helper: PathBuf,
    remote_helper: PathBuf,
    connected: Cell<bool>,
}

impl HelperCommands {
    pub fn new<P1, P2>(local_helper: P1, remote_helper: P2) -> Self
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        Self {
            local_helper: local_helper.into(),
            remote_helper: remote_helper.into(),
            connected: Cell::new(false),
        }
    }

    fn local<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        command(&self.local_helper, args)
    }

    /// Runs the local helper and parses its output.
    fn local_json<T, I, S>(&self, args: I) -> Result<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let stdout = self.local(args)?;
        serde_json::from_str(&stdout).context(collaborators::HelperOutputSnafu {
            command: self.local_helper.display().to_string(),
        })
    }

    fn remote<I, S>(&self, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        command(&self.remote_helper, args)
    }
}

/// Wrapper around process::Command that adds error checking.
fn command<I, S>(bin_path: &Path, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(bin_path);
    command.args(args);
    let description = format!("{:?}", command);
    debug!("Running {}", description);
    let output = command
        .output()
        .context(collaborators::HelperStartSnafu {
            command: &description,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    trace!("stdout: {}", stdout);
    trace!("stderr: {}", String::from_utf8_lossy(&output.stderr));

    ensure!(
        output.status.success(),
        collaborators::HelperFailureSnafu {
            command: description,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    );
    Ok(stdout)
}

impl RemoteDevice for HelperCommands {
    fn hostname(&self) -> Option<String> {
        match self.remote(["hostname"]) {
            Ok(stdout) => Some(stdout.trim().to_string()).filter(|h| !h.is_empty()),
            Err(e) => {
                debug!("Remote hostname unknown: {}", e);
                None
            }
        }
    }

    fn connect(&self) -> Result<()> {
        self.remote(["connect"])?;
        self.connected.set(true);
        Ok(())
    }

    fn disconnect(&self) {
        if !self.connected.replace(false) {
            return;
        }
        if let Err(e) = self.remote(["disconnect"]) {
            warn!("Failed to disconnect from remote device: {}", e);
        }
    }

    fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
        ensure!(self.connected.get(), collaborators::NotConnectedSnafu);
        let params =
            serde_json::to_string(&params).context(collaborators::CallParametersSnafu { method })?;
        let timeout = timeout.as_secs().to_string();
        let stdout = self.remote([
            "call",
            "--method",
            method,
            "--timeout",
            &timeout,
            "--params",
            &params,
        ])?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).context(collaborators::HelperOutputSnafu {
            command: format!("{} call --method {}", self.remote_helper.display(), method),
        })
    }
}

impl LocalDevice for HelperCommands {
    fn hostname(&self) -> Result<String> {
        let hostname = nix::unistd::gethostname().context(collaborators::HostnameSnafu)?;
        hostname
            .into_string()
            .ok()
            .ok_or(collaborators::Error::HostnameNotUtf8)
    }

    fn os_version(&self) -> Result<Version> {
        let version: String = self.local_json(["os-version"])?;
        Version::parse(version.trim()).context(collaborators::InvalidVersionSnafu {
            command: "os-version",
            version,
        })
    }

    fn verify_datasets(&self, targets: &[String]) -> Result<()> {
        self.local(std::iter::once("verify-datasets").chain(targets.iter().map(String::as_str)))?;
        Ok(())
    }

    fn set_maintenance_mode(&self, enabled: bool) -> Result<()> {
        let action = if enabled { "enable" } else { "disable" };
        self.local(["maintenance-mode", action])?;
        Ok(())
    }

    fn set_offsite_sync_paused(&self, paused: bool) -> Result<()> {
        let action = if paused { "pause" } else { "resume" };
        self.local(["offsite-sync", action])?;
        Ok(())
    }

    fn storage_node(&self) -> Result<String> {
        self.local_json(["storage-node"])
    }

    fn set_storage_node(&self, node: &str) -> Result<()> {
        self.local(["set-storage-node", node])?;
        Ok(())
    }

    fn list_assets(&self) -> Result<Vec<AssetSummary>> {
        self.local_json(["list-assets"])
    }

    fn reboot(&self) -> Result<()> {
        // Keep running long enough to report back if shutdown terminates us early.
        let mut signals = Signals::new([SIGTERM]).context(collaborators::SignalSnafu)?;
        let handle = signals.handle();
        thread::spawn(move || for _signal in signals.forever() {});

        let result = Command::new(constants::SHUTDOWN_BIN)
            .arg("-r")
            .status()
            .context(collaborators::RebootFailureSnafu);
        match result {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                handle.close();
                collaborators::HelperFailureSnafu {
                    command: format!("{} -r", constants::SHUTDOWN_BIN),
                    status: status.to_string(),
                    stderr: String::new(),
                }
                .fail()
            }
            Err(e) => {
                handle.close();
                Err(e)
            }
        }
    }
}

impl Transport for HelperCommands {
    fn open(&self) -> Result<()> {
        self.local(["ssh-transport", "open"])?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.local(["ssh-transport", "close"])?;
        Ok(())
    }
}

impl DataMover for HelperCommands {
    fn copy_device_config(&self) -> Result<()> {
        self.local(["copy-device-config"])?;
        Ok(())
    }

    fn restore_device_config(&self) -> Result<()> {
        self.local(["restore-device-config"])?;
        Ok(())
    }

    fn migrate_asset(&self, asset: &str) -> Result<()> {
        self.local(["migrate-asset", asset])?;
        Ok(())
    }

    fn remove_asset(&self, asset: &str) -> Result<()> {
        self.local(["remove-asset", asset])?;
        Ok(())
    }

    fn sync_shares(&self) -> Result<()> {
        self.local(["sync-shares"])?;
        Ok(())
    }

    fn migrate_hypervisor_connections(&self) -> Result<()> {
        self.local(["migrate-hypervisor-connections"])?;
        Ok(())
    }

    fn remove_hypervisor_connections(&self) -> Result<()> {
        self.local(["remove-hypervisor-connections"])?;
        Ok(())
    }

    fn upload_encryption_keys(&self) -> Result<()> {
        self.local(["upload-encryption-keys"])?;
        Ok(())
    }

    fn provision_users(&self) -> Result<()> {
        self.local(["provision-users"])?;
        Ok(())
    }
}

impl StoragePool for HelperCommands {
    fn redundancy(&self) -> Result<Redundancy> {
        let redundancy: String = self.local_json(["pool-redundancy"])?;
        redundancy
            .parse()
            .context(collaborators::InvalidRedundancySnafu {
                command: "pool-redundancy",
                redundancy: &redundancy,
            })
    }

    fn device_capacities(&self, devices: &[String]) -> Result<Vec<u64>> {
        self.local_json(
            std::iter::once("device-capacities").chain(devices.iter().map(String::as_str)),
        )
    }

    fn expand(&self, devices: &[String]) -> Result<()> {
        self.local(std::iter::once("expand-pool").chain(devices.iter().map(String::as_str)))?;
        Ok(())
    }
}
