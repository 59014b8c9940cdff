//! Storage expansion: growing the local pool with new devices, and the arithmetic for how much
//! space that adds.

use crate::collaborators::StoragePool;
use crate::context::MigrationContext;
use crate::device::DEVICE_TARGET;
use crate::error::{self, Result};
use crate::migration::{MigrationKind, MigrationType, Stages};
use crate::stages::{ExpandPoolStage, VerifyExpansionDevicesStage};
use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Redundancy scheme of a storage pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Redundancy {
    Mirror,
    #[serde(alias = "raidz")]
    Raidz1,
    Raidz2,
    Raidz3,
}

impl Redundancy {
    /// Number of devices' worth of space given over to parity.
    pub fn parity_count(self) -> usize {
        match self {
            Redundancy::Mirror => 0,
            Redundancy::Raidz1 => 1,
            Redundancy::Raidz2 => 2,
            Redundancy::Raidz3 => 3,
        }
    }
}

impl fmt::Display for Redundancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Redundancy::Mirror => write!(f, "mirror"),
            Redundancy::Raidz1 => write!(f, "raidz1"),
            Redundancy::Raidz2 => write!(f, "raidz2"),
            Redundancy::Raidz3 => write!(f, "raidz3"),
        }
    }
}

impl FromStr for Redundancy {
    type Err = serde_plain::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        serde_plain::from_str(s)
    }
}

/// Usable space added by a set of devices, limited by the smallest of them.
///
/// A mirror adds one device's worth; raidzN adds all but N devices' worth.  Too few devices
/// for the parity level adds nothing.
pub fn expansion_size(capacities: &[u64], redundancy: Redundancy) -> u64 {
    let smallest = match capacities.iter().min() {
        Some(smallest) => *smallest,
        None => return 0,
    };
    match redundancy {
        Redundancy::Mirror => smallest,
        raidz => {
            let data_devices = capacities.len().saturating_sub(raidz.parity_count()) as u64;
            data_devices.saturating_mul(smallest)
        }
    }
}

/// Adds devices to the local storage pool.  Needs no reboot.
pub struct ExpansionMigration {
    pool: Arc<dyn StoragePool>,
}

impl ExpansionMigration {
    pub fn new(pool: Arc<dyn StoragePool>) -> Self {
        Self { pool }
    }
}

impl MigrationKind for ExpansionMigration {
    fn migration_type(&self) -> MigrationType {
        MigrationType::StorageExpansion
    }

    fn validate(&self, sources: &[String], targets: &[String]) -> Result<()> {
        let migration_type = self.migration_type();
        ensure!(
            !targets.is_empty(),
            error::EmptyTargetsSnafu { migration_type }
        );
        ensure!(
            sources.is_empty(),
            error::UnexpectedSourcesSnafu { migration_type }
        );

        let mut seen = HashSet::new();
        for target in targets {
            ensure!(
                target != DEVICE_TARGET,
                error::ReservedTargetSnafu {
                    target,
                    migration_type,
                }
            );
            ensure!(
                seen.insert(target.as_str()),
                error::DuplicateTargetSnafu { target }
            );
        }
        Ok(())
    }

    fn create_stages(&self, _context: &MigrationContext) -> Stages {
        let mut stages: Stages = Vec::with_capacity(2);
        stages.push(Box::new(VerifyExpansionDevicesStage::new(self.pool.clone())));
        stages.push(Box::new(ExpandPoolStage::new(self.pool.clone())));
        stages
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Error;

    const TB: u64 = 1_000_000_000_000;

    #[test]
    fn mirror_is_smallest_device() {
        assert_eq!(expansion_size(&[4 * TB, 2 * TB], Redundancy::Mirror), 2 * TB);
    }

    #[test]
    fn raidz2_loses_two_devices() {
        assert_eq!(
            expansion_size(&[3 * TB, 3 * TB, 3 * TB, 3 * TB], Redundancy::Raidz2),
            6 * TB
        );
        // Limited by the smallest device
        assert_eq!(
            expansion_size(&[3 * TB, TB, 3 * TB, 3 * TB], Redundancy::Raidz2),
            2 * TB
        );
    }

    #[test]
    fn too_few_devices() {
        assert_eq!(expansion_size(&[TB, TB], Redundancy::Raidz3), 0);
        assert_eq!(expansion_size(&[], Redundancy::Mirror), 0);
    }

    #[test]
    fn redundancy_names() {
        assert_eq!("raidz".parse::<Redundancy>().unwrap(), Redundancy::Raidz1);
        assert_eq!("mirror".parse::<Redundancy>().unwrap(), Redundancy::Mirror);
        assert_eq!(Redundancy::Raidz2.to_string(), "raidz2");
        assert!("raid5".parse::<Redundancy>().is_err());
    }

    struct NoPool;

    impl StoragePool for NoPool {
        fn redundancy(&self) -> crate::collaborators::Result<Redundancy> {
            Ok(Redundancy::Mirror)
        }
        fn device_capacities(&self, devices: &[String]) -> crate::collaborators::Result<Vec<u64>> {
            Ok(vec![TB; devices.len()])
        }
        fn expand(&self, _devices: &[String]) -> crate::collaborators::Result<()> {
            Ok(())
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn validation() {
        let kind = ExpansionMigration::new(Arc::new(NoPool));
        kind.validate(&[], &strings(&["sdb", "sdc"])).unwrap();
        assert!(matches!(
            kind.validate(&[], &[]),
            Err(Error::EmptyTargets { .. })
        ));
        assert!(matches!(
            kind.validate(&strings(&["remote"]), &strings(&["sdb"])),
            Err(Error::UnexpectedSources { .. })
        ));
        assert!(matches!(
            kind.validate(&[], &strings(&["sdb", "sdb"])),
            Err(Error::DuplicateTarget { .. })
        ));
        assert!(matches!(
            kind.validate(&[], &strings(&["device"])),
            Err(Error::ReservedTarget { .. })
        ));
    }

    #[test]
    fn stages() {
        let kind = ExpansionMigration::new(Arc::new(NoPool));
        let context = MigrationContext::new(strings(&["sdb"]), Vec::<String>::new(), false);
        let names: Vec<String> = kind
            .create_stages(&context)
            .iter()
            .map(|s| s.name())
            .collect();
        assert_eq!(names, ["verify-expansion-devices", "expand-pool"]);
    }
}
