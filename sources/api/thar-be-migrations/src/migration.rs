//! The persisted description of a migration and the lifecycle every migration type shares.

use crate::context::MigrationContext;
use crate::error::{self, Error, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use transaction::{Stage, Transaction};

/// The stages of a migration, as handed to a [`Transaction`].
pub type Stages = Vec<Box<dyn Stage<MigrationContext>>>;

/// Discriminator stored with every migration; decides which [`MigrationKind`] runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationType {
    Device,
    StorageExpansion,
}

impl fmt::Display for MigrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationType::Device => write!(f, "device"),
            MigrationType::StorageExpansion => write!(f, "storage-expansion"),
        }
    }
}

impl FromStr for MigrationType {
    type Err = serde_plain::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Scheduled,
    Running,
    Done,
    Error,
}

impl MigrationStatus {
    fn can_become(self, next: MigrationStatus) -> bool {
        matches!(
            (self, next),
            (MigrationStatus::Scheduled, MigrationStatus::Running)
                | (MigrationStatus::Running, MigrationStatus::Done)
                | (MigrationStatus::Running, MigrationStatus::Error)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MigrationStatus::Done | MigrationStatus::Error)
    }
}

/// Behavior of one type of migration.
pub trait MigrationKind {
    fn migration_type(&self) -> MigrationType;

    /// Rejects malformed input.  Runs before anything is persisted.
    fn validate(&self, sources: &[String], targets: &[String]) -> Result<()>;

    /// Builds the ordered stages for a run.
    fn create_stages(&self, context: &MigrationContext) -> Stages;

    /// Called by the scheduler once the finished migration has been archived.
    fn reboot_if_needed(&self) -> Result<()> {
        Ok(())
    }
}

/// A scheduled, running, or finished migration.  This is what gets written to disk.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Migration {
    #[serde(rename = "type")]
    migration_type: MigrationType,
    sources: Vec<String>,
    targets: Vec<String>,
    schedule_at: DateTime<Utc>,
    enable_maintenance_mode: bool,
    status: MigrationStatus,
    dismissed: bool,
    error_message: Option<String>,
    error_code: i32,
}

impl Migration {
    /// Creates a migration in the `scheduled` state.  Use [`crate::factory::MigrationFactory`]
    /// so the input is validated first.
    pub(crate) fn new(
        migration_type: MigrationType,
        schedule_at: DateTime<Utc>,
        sources: Vec<String>,
        targets: Vec<String>,
        enable_maintenance_mode: bool,
    ) -> Self {
        Self {
            migration_type,
            sources,
            targets,
            schedule_at,
            enable_maintenance_mode,
            status: MigrationStatus::Scheduled,
            dismissed: false,
            error_message: None,
            error_code: 0,
        }
    }

    pub fn migration_type(&self) -> MigrationType {
        self.migration_type
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn schedule_at(&self) -> DateTime<Utc> {
        self.schedule_at
    }

    pub fn enable_maintenance_mode(&self) -> bool {
        self.enable_maintenance_mode
    }

    pub fn status(&self) -> MigrationStatus {
        self.status
    }

    pub fn is_dismissed(&self) -> bool {
        self.dismissed
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    pub fn has_error_message(&self) -> bool {
        self.error_message.is_some()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.schedule_at <= now
    }

    /// Moves the migration through scheduled → running → done/error.
    pub fn set_status(&mut self, status: MigrationStatus) -> Result<()> {
        ensure!(
            self.status.can_become(status),
            error::InvalidStateTransitionSnafu {
                from: self.status,
                to: status,
            }
        );
        self.status = status;
        Ok(())
    }

    /// Marks a migration whose run never finished as failed.  Used when a run was found in the
    /// `running` state with no process holding the lock.
    pub(crate) fn mark_interrupted(&mut self) {
        self.status = MigrationStatus::Error;
        self.error_message = Some("Migration was interrupted before it completed".to_string());
        self.error_code = transaction::GENERIC_FAILURE_CODE;
    }

    /// Dismissal is the only change allowed once a migration has finished.
    pub fn dismiss(&mut self) {
        self.dismissed = true;
    }

    pub fn context(&self) -> MigrationContext {
        MigrationContext::new(
            self.targets.iter().cloned(),
            self.sources.iter().cloned(),
            self.enable_maintenance_mode,
        )
    }

    /// Builds the stages for this migration, loads them into `transaction`, and commits.
    ///
    /// On failure the original stage error is recorded on the migration and returned; the
    /// transaction wrapper is only used to find it.
    pub fn run(
        &mut self,
        kind: &dyn MigrationKind,
        transaction: &mut Transaction<MigrationContext>,
    ) -> Result<()> {
        ensure!(
            kind.migration_type() == self.migration_type,
            error::MismatchedKindSnafu {
                expected: kind.migration_type(),
                actual: self.migration_type,
            }
        );

        let context = Arc::new(self.context());
        transaction.clear();
        transaction.add_all(kind.create_stages(&context));
        info!(
            "Running {} migration scheduled at {}: {}",
            self.migration_type,
            self.schedule_at,
            transaction.stage_names().join(", ")
        );

        match transaction.commit(context) {
            Ok(()) => {
                self.error_message = None;
                self.error_code = 0;
                Ok(())
            }
            Err(e) => {
                let cause = e.into_cause();
                self.error_message = Some(cause.to_string());
                self.error_code = cause.code();
                Err(Error::StageFailed { source: cause })
            }
        }
    }
}
