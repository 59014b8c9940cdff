//! On-disk storage for migrations: one "current" slot and an archive of finished migrations.
//!
//! Every write goes to a temporary file in the destination directory that is then renamed over
//! the target, so a reader never sees a partial file.

use crate::error::{self, Result};
use crate::migration::Migration;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use snafu::{ensure, ResultExt};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Converts migrations to and from bytes.
pub trait MigrationSerializer {
    /// File name extension, without the dot, for files in this format.
    fn extension(&self) -> &str;
    fn serialize(&self, migration: &Migration) -> Result<Vec<u8>>;
    fn deserialize(&self, data: &[u8]) -> Result<Migration>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl MigrationSerializer for JsonSerializer {
    fn extension(&self) -> &str {
        "json"
    }

    fn serialize(&self, migration: &Migration) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(migration).context(error::SerializeMigrationSnafu)
    }

    fn deserialize(&self, data: &[u8]) -> Result<Migration> {
        serde_json::from_slice(data).context(error::DeserializeMigrationSnafu)
    }
}

pub struct MigrationStore {
    migration_file: PathBuf,
    archive_dir: PathBuf,
    serializer: Box<dyn MigrationSerializer>,
}

impl MigrationStore {
    pub fn new<P1, P2>(migration_file: P1, archive_dir: P2) -> Self
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        Self::with_serializer(migration_file, archive_dir, Box::new(JsonSerializer))
    }

    pub fn with_serializer<P1, P2>(
        migration_file: P1,
        archive_dir: P2,
        serializer: Box<dyn MigrationSerializer>,
    ) -> Self
    where
        P1: Into<PathBuf>,
        P2: Into<PathBuf>,
    {
        Self {
            migration_file: migration_file.into(),
            archive_dir: archive_dir.into(),
            serializer,
        }
    }

    pub fn migration_file(&self) -> &Path {
        &self.migration_file
    }

    /// Returns the migration in the current slot, if there is one.
    pub fn load_current(&self) -> Result<Option<Migration>> {
        match fs::read(&self.migration_file) {
            Ok(data) => Ok(Some(self.decode(&self.migration_file, &data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).context(error::ReadMigrationSnafu {
                path: &self.migration_file,
            }),
        }
    }

    pub fn save_current(&self, migration: &Migration) -> Result<()> {
        debug!("Updating migration file '{}'", self.migration_file.display());
        self.write_atomically(&self.migration_file, migration)
    }

    /// Empties the current slot.  Emptying an empty slot is not an error.
    pub fn remove_current(&self) -> Result<()> {
        match fs::remove_file(&self.migration_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(error::RemoveMigrationSnafu {
                path: &self.migration_file,
            }),
        }
    }

    /// Moves the current migration file into the archive under `schedule_at`.  The file is
    /// moved as is; save the final state to the current slot first.
    pub fn archive_current(&self, schedule_at: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(&self.archive_dir).context(error::CreateDirectorySnafu {
            path: &self.archive_dir,
        })?;
        let archive_path = self.archive_path(schedule_at);
        if archive_path.exists() {
            warn!(
                "Replacing archived migration '{}'",
                archive_path.display()
            );
        }
        fs::rename(&self.migration_file, &archive_path).context(
            error::ArchiveMigrationSnafu {
                from: &self.migration_file,
                to: &archive_path,
            },
        )?;
        debug!("Archived migration to '{}'", archive_path.display());
        Ok(archive_path)
    }

    /// Archive files are named after the scheduled time in seconds since the epoch.
    pub fn archive_path(&self, schedule_at: DateTime<Utc>) -> PathBuf {
        self.archive_dir.join(format!(
            "{}.{}",
            schedule_at.timestamp(),
            self.serializer.extension()
        ))
    }

    pub fn load_archived(&self, timestamp: i64) -> Result<Migration> {
        let path = self
            .archive_dir
            .join(format!("{}.{}", timestamp, self.serializer.extension()));
        ensure!(
            path.is_file(),
            error::ArchivedMigrationNotFoundSnafu { timestamp }
        );
        let data = fs::read(&path).context(error::ReadMigrationSnafu { path: &path })?;
        self.decode(&path, &data)
    }

    /// Rewrites an archived migration in place.
    pub fn save_archived(&self, migration: &Migration) -> Result<()> {
        let path = self.archive_path(migration.schedule_at());
        self.write_atomically(&path, migration)
    }

    /// Every archived migration, oldest schedule first.  Files that don't look like archived
    /// migrations are skipped.
    pub fn list_archived(&self) -> Result<Vec<Migration>> {
        let entries = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).context(error::ListArchiveSnafu {
                    path: &self.archive_dir,
                })
            }
        };

        let mut migrations = Vec::new();
        for entry in entries {
            let path = entry
                .context(error::ListArchiveSnafu {
                    path: &self.archive_dir,
                })?
                .path();
            if !self.is_archive_file(&path) {
                debug!("Skipping '{}' in archive", path.display());
                continue;
            }
            let data = fs::read(&path).context(error::ReadMigrationSnafu { path: &path })?;
            migrations.push(self.decode(&path, &data)?);
        }
        migrations.sort_by_key(|m| m.schedule_at());
        Ok(migrations)
    }

    fn is_archive_file(&self, path: &Path) -> bool {
        let extension_matches = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| e == self.serializer.extension());
        let stem_is_timestamp = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map_or(false, |s| s.parse::<i64>().is_ok());
        extension_matches && stem_is_timestamp && path.is_file()
    }

    fn decode(&self, path: &Path, data: &[u8]) -> Result<Migration> {
        self.serializer
            .deserialize(data)
            .context(error::LoadMigrationSnafu { path })
    }

    fn write_atomically(&self, path: &Path, migration: &Migration) -> Result<()> {
        let data = self.serializer.serialize(migration)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).context(error::CreateDirectorySnafu { path: dir })?;

        let mut tempfile =
            NamedTempFile::new_in(dir).context(error::CreateTempfileSnafu { path: dir })?;
        tempfile
            .write_all(&data)
            .context(error::WriteMigrationSnafu {
                path: tempfile.path(),
            })?;
        tempfile
            .persist(path)
            .context(error::PersistMigrationSnafu { path })?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::migration::{MigrationStatus, MigrationType};
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn migration(seconds: i64) -> Migration {
        Migration::new(
            MigrationType::Device,
            Utc.timestamp_opt(seconds, 0).unwrap(),
            vec!["old-box".to_string()],
            vec!["device".to_string(), "agent1".to_string()],
            false,
        )
    }

    fn store(dir: &TempDir) -> MigrationStore {
        MigrationStore::new(
            dir.path().join("state/current.json"),
            dir.path().join("state/archive"),
        )
    }

    #[test]
    fn current_slot() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.load_current().unwrap().is_none());

        let mut m = migration(1_700_000_000);
        m.set_status(MigrationStatus::Running).unwrap();
        store.save_current(&m).unwrap();
        assert_eq!(store.load_current().unwrap(), Some(m));

        store.remove_current().unwrap();
        store.remove_current().unwrap();
        assert!(store.load_current().unwrap().is_none());
    }

    #[test]
    fn archive_and_list() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for seconds in [1_700_000_300, 1_700_000_100, 1_700_000_200] {
            let m = migration(seconds);
            store.save_current(&m).unwrap();
            let path = store.archive_current(m.schedule_at()).unwrap();
            assert_eq!(
                path.file_name().unwrap().to_str().unwrap(),
                format!("{}.json", seconds)
            );
        }
        assert!(store.load_current().unwrap().is_none());

        // Not an archived migration
        fs::write(dir.path().join("state/archive/notes.txt"), "hi").unwrap();

        let times: Vec<i64> = store
            .list_archived()
            .unwrap()
            .iter()
            .map(|m| m.schedule_at().timestamp())
            .collect();
        assert_eq!(times, [1_700_000_100, 1_700_000_200, 1_700_000_300]);
    }

    #[test]
    fn archived_rewrite() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let m = migration(1_700_000_000);
        store.save_current(&m).unwrap();
        store.archive_current(m.schedule_at()).unwrap();

        let mut archived = store.load_archived(1_700_000_000).unwrap();
        archived.dismiss();
        store.save_archived(&archived).unwrap();
        assert!(store.load_archived(1_700_000_000).unwrap().is_dismissed());

        assert!(matches!(
            store.load_archived(42),
            Err(error::Error::ArchivedMigrationNotFound { timestamp: 42 })
        ));
    }

    #[test]
    fn missing_archive_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list_archived().unwrap().is_empty());
    }

    #[test]
    fn corrupt_current_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::create_dir_all(dir.path().join("state")).unwrap();
        fs::write(store.migration_file(), "{").unwrap();
        assert!(matches!(
            store.load_current(),
            Err(error::Error::LoadMigration { .. })
        ));
    }
}
