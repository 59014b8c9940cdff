use crate::error::{self, Result};
use log::debug;
use serde::Deserialize;
use snafu::ResultExt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from the TOML config file.  Every key is optional.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub lock_file: PathBuf,
    pub migration_file: PathBuf,
    pub archive_directory: PathBuf,
    pub local_helper: PathBuf,
    pub remote_helper: PathBuf,
    pub remote_timeout_seconds: u64,
    /// Program started to run a due migration in the background; defaults to this executable.
    pub background_command: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_file: constants::MIGRATION_LOCKFILE.into(),
            migration_file: constants::MIGRATION_FILE.into(),
            archive_directory: constants::MIGRATION_ARCHIVE_DIR.into(),
            local_helper: constants::LOCAL_HELPER_BIN.into(),
            remote_helper: constants::REMOTE_HELPER_BIN.into(),
            remote_timeout_seconds: constants::REMOTE_CALL_TIMEOUT_SECONDS,
            background_command: None,
        }
    }
}

impl Config {
    /// Reads the config at `path`.  A missing file gives the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No config at '{}', using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(e).context(error::ConfigReadSnafu { path }),
        };
        toml::from_str(&contents).context(error::ConfigParseSnafu { path })
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_seconds)
    }
}
