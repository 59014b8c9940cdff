//! The parameters every stage of a migration run can see.

use std::collections::HashSet;

/// Immutable parameters of one migration run.  Targets and sources are ordered sets: the
/// first occurrence of a value decides its position and later repeats are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationContext {
    targets: Vec<String>,
    sources: Vec<String>,
    enable_maintenance_mode: bool,
}

impl MigrationContext {
    pub fn new<T, S>(targets: T, sources: S, enable_maintenance_mode: bool) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        Self {
            targets: ordered_set(targets),
            sources: ordered_set(sources),
            enable_maintenance_mode,
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn enable_maintenance_mode(&self) -> bool {
        self.enable_maintenance_mode
    }

    pub fn has_target(&self, target: &str) -> bool {
        self.targets.iter().any(|t| t == target)
    }
}

fn ordered_set<I>(items: I) -> Vec<String>
where
    I: IntoIterator,
    I::Item: Into<String>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(Into::into)
        .filter(|item| seen.insert(item.clone()))
        .collect()
}
