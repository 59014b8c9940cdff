//! Stages that quiet both devices for the length of the migration.  What they suspend in commit
//! they resume in cleanup, whether or not the migration succeeded.
//!
//! Each stage holds the remote session from before its first remote call until the end of its
//! cleanup, so the connection outlives the connect stage's cleanup.

use super::{call_remote, remote_method, RemoteSession};
use crate::collaborators::{LocalDevice, Transport};
use crate::context::MigrationContext;
use log::{info, warn};
use snafu::{OptionExt, ResultExt};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use transaction::{Stage, StageError};

/// Puts both devices into maintenance mode, if the migration asked for it.
pub struct MaintenanceModeStage {
    local: Arc<dyn LocalDevice>,
    session: Rc<RemoteSession>,
    timeout: Duration,
    context: Option<Arc<MigrationContext>>,
    held: bool,
    local_enabled: bool,
    remote_enabled: bool,
}

impl MaintenanceModeStage {
    pub fn new(local: Arc<dyn LocalDevice>, session: Rc<RemoteSession>, timeout: Duration) -> Self {
        Self {
            local,
            session,
            timeout,
            context: None,
            held: false,
            local_enabled: false,
            remote_enabled: false,
        }
    }
}

impl Stage<MigrationContext> for MaintenanceModeStage {
    fn name(&self) -> String {
        "maintenance-mode".to_string()
    }

    fn set_context(&mut self, context: Arc<MigrationContext>) {
        self.context = Some(context);
    }

    fn commit(&mut self) -> Result<(), StageError> {
        let context = self
            .context
            .as_ref()
            .context(super::MissingContextSnafu { stage: self.name() })?;
        if !context.enable_maintenance_mode() {
            info!("Maintenance mode not requested, leaving it unchanged");
            return Ok(());
        }

        self.local
            .set_maintenance_mode(true)
            .context(super::MaintenanceModeSnafu)?;
        self.local_enabled = true;
        self.session.acquire().context(super::ConnectSnafu)?;
        self.held = true;
        call_remote(
            self.session.remote(),
            remote_method::MAINTENANCE_ENABLE,
            self.timeout,
        )?;
        self.remote_enabled = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.remote_enabled {
            if let Err(e) = call_remote(
                self.session.remote(),
                remote_method::MAINTENANCE_DISABLE,
                self.timeout,
            ) {
                warn!("Failed to end remote maintenance mode: {}", e);
            }
            self.remote_enabled = false;
        }
        if self.local_enabled {
            if let Err(e) = self.local.set_maintenance_mode(false) {
                warn!("Failed to end local maintenance mode: {}", e);
            }
            self.local_enabled = false;
        }
        if self.held {
            self.session.release();
            self.held = false;
        }
    }
}

/// Pauses offsite synchronization on both devices.
pub struct OffsiteSyncStage {
    local: Arc<dyn LocalDevice>,
    session: Rc<RemoteSession>,
    timeout: Duration,
    held: bool,
    local_paused: bool,
    remote_paused: bool,
}

impl OffsiteSyncStage {
    pub fn new(local: Arc<dyn LocalDevice>, session: Rc<RemoteSession>, timeout: Duration) -> Self {
        Self {
            local,
            session,
            timeout,
            held: false,
            local_paused: false,
            remote_paused: false,
        }
    }
}

impl Stage<MigrationContext> for OffsiteSyncStage {
    fn name(&self) -> String {
        "pause-offsite-sync".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> Result<(), StageError> {
        self.local
            .set_offsite_sync_paused(true)
            .context(super::OffsiteSyncSnafu)?;
        self.local_paused = true;
        self.session.acquire().context(super::ConnectSnafu)?;
        self.held = true;
        call_remote(
            self.session.remote(),
            remote_method::OFFSITE_PAUSE,
            self.timeout,
        )?;
        self.remote_paused = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.remote_paused {
            if let Err(e) = call_remote(
                self.session.remote(),
                remote_method::OFFSITE_RESUME,
                self.timeout,
            ) {
                warn!("Failed to resume remote offsite sync: {}", e);
            }
            self.remote_paused = false;
        }
        if self.local_paused {
            if let Err(e) = self.local.set_offsite_sync_paused(false) {
                warn!("Failed to resume local offsite sync: {}", e);
            }
            self.local_paused = false;
        }
        if self.held {
            self.session.release();
            self.held = false;
        }
    }
}

/// Enables SSH on the remote device and opens the local end of the transport.
pub struct SshTransportStage {
    session: Rc<RemoteSession>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
    held: bool,
    remote_enabled: bool,
    opened: bool,
}

impl SshTransportStage {
    pub fn new(session: Rc<RemoteSession>, transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            session,
            transport,
            timeout,
            held: false,
            remote_enabled: false,
            opened: false,
        }
    }
}

impl Stage<MigrationContext> for SshTransportStage {
    fn name(&self) -> String {
        "ssh-transport".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> Result<(), StageError> {
        self.session.acquire().context(super::ConnectSnafu)?;
        self.held = true;
        call_remote(self.session.remote(), remote_method::SSH_ENABLE, self.timeout)?;
        self.remote_enabled = true;
        self.transport.open().context(super::TransportSnafu)?;
        self.opened = true;
        Ok(())
    }

    fn cleanup(&mut self) {
        if self.opened {
            if let Err(e) = self.transport.close() {
                warn!("Failed to close SSH transport: {}", e);
            }
            self.opened = false;
        }
        if self.remote_enabled {
            if let Err(e) = call_remote(
                self.session.remote(),
                remote_method::SSH_DISABLE,
                self.timeout,
            ) {
                warn!("Failed to disable remote SSH: {}", e);
            }
            self.remote_enabled = false;
        }
        if self.held {
            self.session.release();
            self.held = false;
        }
    }
}
