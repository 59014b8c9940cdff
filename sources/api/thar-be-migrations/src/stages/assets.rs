use crate::collaborators::DataMover;
use crate::context::MigrationContext;
use log::info;
use snafu::ResultExt;
use std::sync::Arc;
use transaction::{Stage, StageError};

/// Transfers one asset.  Rollback removes what was transferred so a retry starts clean.
pub struct MigrateAssetStage {
    mover: Arc<dyn DataMover>,
    asset: String,
}

impl MigrateAssetStage {
    pub fn new<S: Into<String>>(mover: Arc<dyn DataMover>, asset: S) -> Self {
        Self {
            mover,
            asset: asset.into(),
        }
    }
}

impl Stage<MigrationContext> for MigrateAssetStage {
    fn name(&self) -> String {
        format!("migrate-asset:{}", self.asset)
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> Result<(), StageError> {
        info!("Migrating asset '{}'", self.asset);
        self.mover
            .migrate_asset(&self.asset)
            .context(super::MigrateAssetSnafu { asset: &self.asset })?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StageError> {
        info!("Removing migrated asset '{}'", self.asset);
        self.mover
            .remove_asset(&self.asset)
            .context(super::MigrateAssetSnafu { asset: &self.asset })?;
        Ok(())
    }
}
