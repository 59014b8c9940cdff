//! Stages that run before anything is changed on either device.

use super::{call_remote_for_string, remote_method, RemoteSession, Result};
use crate::collaborators::{LocalDevice, RemoteDevice};
use crate::context::MigrationContext;
use log::info;
use semver::Version;
use snafu::{ensure, OptionExt, ResultExt};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use transaction::{Stage, StageError};

/// Checks that the datasets for every target can be created locally.  Runs before any network
/// activity.
pub struct VerifyDatasetsStage {
    local: Arc<dyn LocalDevice>,
    context: Option<Arc<MigrationContext>>,
}

impl VerifyDatasetsStage {
    pub fn new(local: Arc<dyn LocalDevice>) -> Self {
        Self {
            local,
            context: None,
        }
    }
}

impl Stage<MigrationContext> for VerifyDatasetsStage {
    fn name(&self) -> String {
        "verify-datasets".to_string()
    }

    fn set_context(&mut self, context: Arc<MigrationContext>) {
        self.context = Some(context);
    }

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        let context = self
            .context
            .as_ref()
            .context(super::MissingContextSnafu { stage: self.name() })?;
        self.local
            .verify_datasets(context.targets())
            .context(super::VerifyDatasetsSnafu)?;
        Ok(())
    }
}

/// Connects to the remote device.  Its hold on the session is given back in cleanup; the
/// connection itself stays up while later stages still hold it.
pub struct ConnectStage {
    session: Rc<RemoteSession>,
    connected: bool,
}

impl ConnectStage {
    pub fn new(session: Rc<RemoteSession>) -> Self {
        Self {
            session,
            connected: false,
        }
    }
}

impl Stage<MigrationContext> for ConnectStage {
    fn name(&self) -> String {
        "connect-remote".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        self.session.acquire().context(super::ConnectSnafu)?;
        self.connected = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.connected {
            self.session.release();
            self.connected = false;
        }
    }
}

/// Refuses to continue when the remote device runs a newer OS than this one.
pub struct CompatibilityStage {
    local: Arc<dyn LocalDevice>,
    remote: Arc<dyn RemoteDevice>,
    timeout: Duration,
}

impl CompatibilityStage {
    pub fn new(local: Arc<dyn LocalDevice>, remote: Arc<dyn RemoteDevice>, timeout: Duration) -> Self {
        Self {
            local,
            remote,
            timeout,
        }
    }
}

impl Stage<MigrationContext> for CompatibilityStage {
    fn name(&self) -> String {
        "check-compatibility".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> std::result::Result<(), StageError> {
        check_compatibility(self.local.as_ref(), self.remote.as_ref(), self.timeout)?;
        Ok(())
    }
}

/// Compares OS versions; a migration may only move to the same or a newer version.  Returns the
/// (local, remote) versions.
pub(crate) fn check_compatibility(
    local: &dyn LocalDevice,
    remote: &dyn RemoteDevice,
    timeout: Duration,
) -> Result<(Version, Version)> {
    let local_version = local.os_version().context(super::LocalVersionSnafu)?;
    let remote_version =
        call_remote_for_string(remote, remote_method::OS_VERSION, timeout)?;
    let remote_version = Version::parse(remote_version.trim()).context(
        super::InvalidRemoteVersionSnafu {
            version: remote_version.clone(),
        },
    )?;

    ensure!(
        remote_version <= local_version,
        super::IncompatibleSnafu {
            local: local_version,
            remote: remote_version,
        }
    );
    info!(
        "Remote OS {} can be migrated to local OS {}",
        remote_version, local_version
    );
    Ok((local_version, remote_version))
}
