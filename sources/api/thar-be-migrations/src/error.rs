use crate::collaborators;
use crate::migration::{MigrationStatus, MigrationType};
use crate::stages;
use chrono::{DateTime, Utc};
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::cast::ToPrimitive;
use snafu::Snafu;
use std::path::PathBuf;
use transaction::StageError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Failed to read config file '{}': {}", path.display(), source))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to parse config file '{}': {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Failed to access lockfile '{}': {}", path.display(), source))]
    LockFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Unable to obtain lock on lockfile '{}', is a migration running? {}", path.display(), source))]
    MigrationLockHeld {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to create tempfile in '{}': {}", path.display(), source))]
    CreateTempfile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to write migration file '{}': {}", path.display(), source))]
    WriteMigration {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to create migration file '{}': {}", path.display(), source))]
    PersistMigration {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("Failed to read migration file '{}': {}", path.display(), source))]
    ReadMigration {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to load migration file '{}': {}", path.display(), source))]
    LoadMigration {
        path: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    #[snafu(display("Failed to serialize migration: {}", source))]
    SerializeMigration { source: serde_json::Error },

    #[snafu(display("Failed to deserialize migration: {}", source))]
    DeserializeMigration { source: serde_json::Error },

    #[snafu(display("Failed to remove migration file '{}': {}", path.display(), source))]
    RemoveMigration {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to archive migration '{}' to '{}': {}", from.display(), to.display(), source))]
    ArchiveMigration {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Failed to list archived migrations in '{}': {}", path.display(), source))]
    ListArchive {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("No completed migration scheduled at {}", timestamp))]
    ArchivedMigrationNotFound { timestamp: i64 },

    #[snafu(display("A {} migration needs at least one target", migration_type))]
    EmptyTargets { migration_type: MigrationType },

    #[snafu(display("A {} migration does not take sources", migration_type))]
    UnexpectedSources { migration_type: MigrationType },

    #[snafu(display("Target '{}' is given more than once", target))]
    DuplicateTarget { target: String },

    #[snafu(display("Target '{}' is not allowed for a {} migration", target, migration_type))]
    ReservedTarget {
        target: String,
        migration_type: MigrationType,
    },

    #[snafu(display("Cannot run a {} migration as a {} migration", actual, expected))]
    MismatchedKind {
        expected: MigrationType,
        actual: MigrationType,
    },

    #[snafu(display("Invalid migration status transition from {:?} to {:?}", from, to))]
    InvalidStateTransition {
        from: MigrationStatus,
        to: MigrationStatus,
    },

    #[snafu(display("A migration is already scheduled for {}", schedule_at))]
    AlreadyScheduled { schedule_at: DateTime<Utc> },

    #[snafu(display("No migration is scheduled"))]
    NoScheduledMigration,

    #[snafu(display("Cannot cancel a migration with status {:?}", status))]
    NotCancellable { status: MigrationStatus },

    // The stage's own message is what gets reported.
    #[snafu(display("{}", source))]
    StageFailed { source: StageError },

    #[snafu(display("Failed to reboot after migration: {}", source))]
    Reboot { source: collaborators::Error },

    #[snafu(display("Unable to find the running executable: {}", source))]
    CurrentExe { source: std::io::Error },

    #[snafu(display("Failed to start background migration run '{}': {}", program.display(), source))]
    SpawnBackground {
        program: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("Remote device '{}' is unreachable: {}", host, source))]
    Unreachable {
        host: String,
        source: collaborators::Error,
    },

    #[snafu(display("Preflight check failed: {}", source))]
    Preflight { source: stages::Error },

    #[snafu(display("Failed to list remote assets: {}", source))]
    RemoteAssets { source: collaborators::Error },

    #[snafu(display("Unexpected response to '{}': {}", method, source))]
    RemoteResponse {
        method: String,
        source: serde_json::Error,
    },

    #[snafu(display("Local device query failed: {}", source))]
    LocalDevice { source: collaborators::Error },

    #[snafu(display("Failed to serialize output: {}", source))]
    Output { source: serde_json::Error },

    #[snafu(display("Logger setup error: {}", source))]
    Logger { source: log::SetLoggerError },
}

/// Map errors to specific exit codes to return to caller
#[derive(FromPrimitive, ToPrimitive)]
pub enum MigrationErrorStatus {
    OtherError = 1,
    MigrationLockHeld = 64,
    InvalidMigration = 65,
    NoScheduledMigration = 66,
    AlreadyScheduled = 67,
    StageFailed = 68,
    Preflight = 69,
}

impl Error {
    pub fn exit_status(&self) -> i32 {
        match self {
            Error::MigrationLockHeld { .. } => MigrationErrorStatus::MigrationLockHeld,
            Error::EmptyTargets { .. }
            | Error::UnexpectedSources { .. }
            | Error::DuplicateTarget { .. }
            | Error::ReservedTarget { .. } => MigrationErrorStatus::InvalidMigration,
            Error::NoScheduledMigration | Error::NotCancellable { .. } => {
                MigrationErrorStatus::NoScheduledMigration
            }
            Error::AlreadyScheduled { .. } => MigrationErrorStatus::AlreadyScheduled,
            Error::StageFailed { .. } => MigrationErrorStatus::StageFailed,
            Error::Unreachable { .. } | Error::Preflight { .. } => MigrationErrorStatus::Preflight,
            _ => MigrationErrorStatus::OtherError,
        }
        .to_i32()
        .unwrap_or(1)
    }
}
