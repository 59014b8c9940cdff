//! Stages for adding devices to the local storage pool.

use crate::collaborators::StoragePool;
use crate::context::MigrationContext;
use crate::expansion::expansion_size;
use log::info;
use snafu::{ensure, OptionExt, ResultExt};
use std::sync::Arc;
use transaction::{Stage, StageError};

/// Confirms the new devices would actually add usable space given the pool's redundancy.
pub struct VerifyExpansionDevicesStage {
    pool: Arc<dyn StoragePool>,
    context: Option<Arc<MigrationContext>>,
}

impl VerifyExpansionDevicesStage {
    pub fn new(pool: Arc<dyn StoragePool>) -> Self {
        Self {
            pool,
            context: None,
        }
    }
}

impl Stage<MigrationContext> for VerifyExpansionDevicesStage {
    fn name(&self) -> String {
        "verify-expansion-devices".to_string()
    }

    fn set_context(&mut self, context: Arc<MigrationContext>) {
        self.context = Some(context);
    }

    fn commit(&mut self) -> Result<(), StageError> {
        let context = self
            .context
            .as_ref()
            .context(super::MissingContextSnafu { stage: self.name() })?;
        let redundancy = self.pool.redundancy().context(super::StoragePoolSnafu)?;
        let capacities = self
            .pool
            .device_capacities(context.targets())
            .context(super::StoragePoolSnafu)?;

        let size = expansion_size(&capacities, redundancy);
        ensure!(
            size > 0,
            super::NoExpansionSnafu {
                devices: context.targets().to_vec(),
            }
        );
        info!(
            "Adding {} device(s) to {} pool grows it by {} bytes",
            capacities.len(),
            redundancy,
            size
        );
        Ok(())
    }
}

pub struct ExpandPoolStage {
    pool: Arc<dyn StoragePool>,
    context: Option<Arc<MigrationContext>>,
}

impl ExpandPoolStage {
    pub fn new(pool: Arc<dyn StoragePool>) -> Self {
        Self {
            pool,
            context: None,
        }
    }
}

impl Stage<MigrationContext> for ExpandPoolStage {
    fn name(&self) -> String {
        "expand-pool".to_string()
    }

    fn set_context(&mut self, context: Arc<MigrationContext>) {
        self.context = Some(context);
    }

    fn commit(&mut self) -> Result<(), StageError> {
        let context = self
            .context
            .as_ref()
            .context(super::MissingContextSnafu { stage: self.name() })?;
        self.pool
            .expand(context.targets())
            .context(super::ExpandPoolSnafu)?;
        Ok(())
    }
}
