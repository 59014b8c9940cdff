/*!
The migration scheduler.

There is one migration slot for the whole system, whatever the migration type, and one lock
file guarding it.  Scheduling and running both take the lock without waiting; whoever finds it
taken fails right away.

A migration that's due when it's scheduled runs right away, either in this process or in a
detached copy of the program.  Otherwise the periodic `run-scheduled` entry point picks it up.
A finished migration is moved from the slot to the archive before the lock is released, then
the migration type decides whether the device reboots.
*/

use crate::collaborators::Collaborators;
use crate::config::Config;
use crate::error::{self, Result};
use crate::factory::MigrationFactory;
use crate::lock::MigrationLock;
use crate::migration::{Migration, MigrationStatus, MigrationType};
use crate::store::MigrationStore;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use snafu::{ensure, OptionExt, ResultExt};
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use transaction::Transaction;

/// A command that runs due migrations, started detached from the caller.
#[derive(Debug, Clone)]
pub struct BackgroundCommand {
    program: PathBuf,
    args: Vec<OsString>,
}

impl BackgroundCommand {
    pub fn new<P, I, S>(program: P, args: I) -> Self
    where
        P: Into<PathBuf>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Runs `program --config <config_path> run-scheduled`.
    pub fn run_scheduled<P: Into<PathBuf>>(program: P, config_path: &Path) -> Self {
        Self::new(
            program,
            [
                OsString::from("--config"),
                config_path.as_os_str().to_owned(),
                OsString::from("run-scheduled"),
            ],
        )
    }

    fn spawn(&self) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        // The child gets its own session so it outlives the caller's terminal and process group.
        unsafe {
            command.pre_exec(|| {
                nix::unistd::setsid()
                    .map(|_| ())
                    .map_err(std::io::Error::from)
            });
        }
        let child = command.spawn().context(error::SpawnBackgroundSnafu {
            program: &self.program,
        })?;
        info!(
            "Started background migration run '{}' with pid {}",
            self.program.display(),
            child.id()
        );
        Ok(())
    }
}

pub struct MigrationService {
    store: MigrationStore,
    lock: MigrationLock,
    factory: MigrationFactory,
    background: Option<BackgroundCommand>,
}

impl MigrationService {
    pub fn new(store: MigrationStore, lock: MigrationLock, factory: MigrationFactory) -> Self {
        Self {
            store,
            lock,
            factory,
            background: None,
        }
    }

    pub fn with_background(mut self, background: BackgroundCommand) -> Self {
        self.background = Some(background);
        self
    }

    /// Builds the service described by `config`.  Background runs re-run this program, or the
    /// configured background command, with the same config file.
    pub fn from_config(
        config: &Config,
        config_path: &Path,
        collaborators: Collaborators,
    ) -> Result<Self> {
        let program = match &config.background_command {
            Some(program) => program.clone(),
            None => std::env::current_exe().context(error::CurrentExeSnafu)?,
        };
        Ok(Self::new(
            MigrationStore::new(&config.migration_file, &config.archive_directory),
            MigrationLock::new(&config.lock_file),
            MigrationFactory::new(collaborators, config.remote_timeout()),
        )
        .with_background(BackgroundCommand::run_scheduled(program, config_path)))
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    pub fn lock(&self) -> &MigrationLock {
        &self.lock
    }

    /// Validates and stores a new migration.  If it's already due, it runs right away: in this
    /// process, in which case a stage failure is returned, or in the background.
    pub fn schedule(
        &self,
        schedule_at: DateTime<Utc>,
        sources: Vec<String>,
        targets: Vec<String>,
        enable_maintenance_mode: bool,
        migration_type: MigrationType,
        run_in_background: bool,
    ) -> Result<()> {
        {
            let _guard = self.lock.try_acquire()?;
            let migration = self.factory.create(
                migration_type,
                schedule_at,
                sources,
                targets,
                enable_maintenance_mode,
            )?;
            if let Some(existing) = self.store.load_current()? {
                return error::AlreadyScheduledSnafu {
                    schedule_at: existing.schedule_at(),
                }
                .fail();
            }
            self.store.save_current(&migration)?;
            info!(
                "Scheduled {} migration of {:?} for {}",
                migration_type,
                migration.targets(),
                schedule_at
            );
        }

        if schedule_at > Utc::now() {
            return Ok(());
        }
        if run_in_background {
            self.start_background()
        } else {
            self.run_scheduled(true).map(|_| ())
        }
    }

    /// Runs the scheduled migration if it's due.  Returns whether anything was run.  A stage
    /// failure is recorded on the archived migration and logged, not returned.
    pub fn run_if_scheduled(&self) -> Result<bool> {
        self.run_scheduled(false)
    }

    fn start_background(&self) -> Result<()> {
        match &self.background {
            Some(background) => background.spawn(),
            None => {
                warn!("No background command configured, running migration in this process");
                self.run_scheduled(true).map(|_| ())
            }
        }
    }

    fn run_scheduled(&self, rethrow: bool) -> Result<bool> {
        let guard = self.lock.try_acquire()?;
        let mut migration = match self.store.load_current()? {
            Some(migration) => migration,
            None => {
                debug!("No migration scheduled");
                return Ok(false);
            }
        };

        match migration.status() {
            MigrationStatus::Scheduled => {}
            MigrationStatus::Running => {
                // We hold the lock, so whatever was running it is gone.
                warn!(
                    "Migration scheduled at {} was interrupted, marking it failed",
                    migration.schedule_at()
                );
                migration.mark_interrupted();
                self.store.save_current(&migration)?;
                self.store.archive_current(migration.schedule_at())?;
                return Ok(true);
            }
            MigrationStatus::Done | MigrationStatus::Error => {
                warn!(
                    "Finished migration scheduled at {} was never archived, archiving it",
                    migration.schedule_at()
                );
                self.store.archive_current(migration.schedule_at())?;
                return Ok(true);
            }
        }

        if !migration.is_due(Utc::now()) {
            debug!(
                "Migration scheduled at {} is not due yet",
                migration.schedule_at()
            );
            return Ok(false);
        }

        let kind = self.factory.kind(migration.migration_type());
        migration.set_status(MigrationStatus::Running)?;
        self.store.save_current(&migration)?;

        let mut transaction = Transaction::new();
        let result = migration.run(kind.as_ref(), &mut transaction);
        let status = match result {
            Ok(()) => MigrationStatus::Done,
            Err(_) => MigrationStatus::Error,
        };
        migration.set_status(status)?;
        self.store.save_current(&migration)?;
        self.store.archive_current(migration.schedule_at())?;
        drop(guard);

        match result {
            Ok(()) => {
                info!("Migration scheduled at {} finished", migration.schedule_at());
                kind.reboot_if_needed()?;
            }
            Err(e) => {
                error!(
                    "Migration scheduled at {} failed: {}",
                    migration.schedule_at(),
                    e
                );
                let reboot = kind.reboot_if_needed();
                if rethrow {
                    if let Err(reboot_error) = reboot {
                        error!("{}", reboot_error);
                    }
                    return Err(e);
                }
                reboot?;
            }
        }
        Ok(true)
    }

    /// Removes the scheduled migration.  Fails if there is none, or if it's being run.
    pub fn cancel_scheduled(&self) -> Result<()> {
        let _guard = self.lock.try_acquire()?;
        let migration = self
            .store
            .load_current()?
            .context(error::NoScheduledMigrationSnafu)?;
        ensure!(
            migration.status() == MigrationStatus::Scheduled,
            error::NotCancellableSnafu {
                status: migration.status(),
            }
        );
        self.store.remove_current()?;
        info!(
            "Cancelled migration scheduled at {}",
            migration.schedule_at()
        );
        Ok(())
    }

    /// Whether a migration holds the lock.  Other subsystems check this before doing anything
    /// a migration would conflict with.
    pub fn is_running(&self) -> Result<bool> {
        self.lock.is_held()
    }

    /// The migration in the current slot that hasn't finished yet, if any.
    pub fn get_scheduled(&self) -> Result<Option<Migration>> {
        Ok(self
            .store
            .load_current()?
            .filter(|migration| !migration.status().is_terminal()))
    }

    /// The archived migration with the latest schedule.
    pub fn get_latest_completed(&self) -> Result<Option<Migration>> {
        Ok(self.store.list_archived()?.pop())
    }

    pub fn get_all_completed(&self) -> Result<Vec<Migration>> {
        self.store.list_archived()
    }

    /// Archived migrations oldest first, then the current one.
    pub fn get_all_migrations(&self) -> Result<Vec<Migration>> {
        let mut migrations = self.store.list_archived()?;
        migrations.extend(self.store.load_current()?);
        Ok(migrations)
    }

    /// Marks every archived migration dismissed.  Returns how many changed.
    pub fn dismiss_all_completed(&self) -> Result<usize> {
        let mut dismissed = 0;
        for mut migration in self.store.list_archived()? {
            if migration.is_dismissed() {
                continue;
            }
            migration.dismiss();
            self.store.save_archived(&migration)?;
            dismissed += 1;
        }
        debug!("Dismissed {} migration(s)", dismissed);
        Ok(dismissed)
    }

    /// Marks the archived migration scheduled at `timestamp` (seconds since the epoch)
    /// dismissed.
    pub fn dismiss_completed_migration(&self, timestamp: i64) -> Result<()> {
        let mut migration = self.store.load_archived(timestamp)?;
        migration.dismiss();
        self.store.save_archived(&migration)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn background_command_reruns_with_same_config() {
        let command =
            BackgroundCommand::run_scheduled("/usr/bin/thar-be-migrations", Path::new("/etc/m.toml"));
        assert_eq!(command.program, PathBuf::from("/usr/bin/thar-be-migrations"));
        let args: Vec<&str> = command.args.iter().filter_map(|a| a.to_str()).collect();
        assert_eq!(args, ["--config", "/etc/m.toml", "run-scheduled"]);
    }
}
