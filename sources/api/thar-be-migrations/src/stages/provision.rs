//! The last stages of every device migration.

use crate::collaborators::DataMover;
use crate::context::MigrationContext;
use snafu::ResultExt;
use std::sync::Arc;
use transaction::{Stage, StageError};

pub struct EncryptionKeysStage {
    mover: Arc<dyn DataMover>,
}

impl EncryptionKeysStage {
    pub fn new(mover: Arc<dyn DataMover>) -> Self {
        Self { mover }
    }
}

impl Stage<MigrationContext> for EncryptionKeysStage {
    fn name(&self) -> String {
        "upload-encryption-keys".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> Result<(), StageError> {
        self.mover
            .upload_encryption_keys()
            .context(super::EncryptionKeysSnafu)?;
        Ok(())
    }
}

pub struct ProvisionUsersStage {
    mover: Arc<dyn DataMover>,
}

impl ProvisionUsersStage {
    pub fn new(mover: Arc<dyn DataMover>) -> Self {
        Self { mover }
    }
}

impl Stage<MigrationContext> for ProvisionUsersStage {
    fn name(&self) -> String {
        "provision-users".to_string()
    }

    fn set_context(&mut self, _context: Arc<MigrationContext>) {}

    fn commit(&mut self) -> Result<(), StageError> {
        self.mover
            .provision_users()
            .context(super::ProvisionUsersSnafu)?;
        Ok(())
    }
}
