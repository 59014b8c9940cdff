/*!
# Introduction

thar-be-migrations schedules and runs migrations on a backup appliance.  A device migration
moves the configuration and assets of another appliance (the source) onto this one (the
destination); a storage expansion grows the local storage pool with new devices.

# Scheduling

Only one migration exists at a time, whatever its type.  It's stored in a single "current
migration" file and guarded by an exclusive lock file; see [`service::MigrationService`].  A
migration that is due when it's scheduled runs right away, otherwise a periodic
`thar-be-migrations run-scheduled` picks it up.  Finished migrations are moved into an archive
directory, where they stay until dismissed from view.

# Running

A migration run is a [`transaction::Transaction`] of stages built for the migration's type and
targets.  When a stage fails, the stages before it are rolled back, everything that was started
is cleaned up, and the failing stage's message and code are recorded on the migration.
*/

pub mod collaborators;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod expansion;
pub mod factory;
pub mod helper;
pub mod lock;
pub mod migration;
pub mod service;
pub mod stages;
pub mod status;
pub mod store;

#[cfg(test)]
mod fakes;
