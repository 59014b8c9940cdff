use crate::collaborators::Collaborators;
use crate::device::{DeviceMigration, DeviceMigrationStagesFactory};
use crate::error::Result;
use crate::expansion::ExpansionMigration;
use crate::migration::{Migration, MigrationKind, MigrationType};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Creates migrations and the behavior that goes with their type.
#[derive(Clone)]
pub struct MigrationFactory {
    collaborators: Collaborators,
    remote_timeout: Duration,
}

impl MigrationFactory {
    pub fn new(collaborators: Collaborators, remote_timeout: Duration) -> Self {
        Self {
            collaborators,
            remote_timeout,
        }
    }

    pub fn kind(&self, migration_type: MigrationType) -> Box<dyn MigrationKind> {
        match migration_type {
            MigrationType::Device => Box::new(DeviceMigration::new(
                DeviceMigrationStagesFactory::new(self.collaborators.clone(), self.remote_timeout),
                self.collaborators.local.clone(),
            )),
            MigrationType::StorageExpansion => {
                Box::new(ExpansionMigration::new(self.collaborators.pool.clone()))
            }
        }
    }

    /// Validates the input for `migration_type` and returns a new scheduled migration.
    pub fn create(
        &self,
        migration_type: MigrationType,
        schedule_at: DateTime<Utc>,
        sources: Vec<String>,
        targets: Vec<String>,
        enable_maintenance_mode: bool,
    ) -> Result<Migration> {
        self.kind(migration_type).validate(&sources, &targets)?;
        Ok(Migration::new(
            migration_type,
            schedule_at,
            sources,
            targets,
            enable_maintenance_mode,
        ))
    }
}
