/*!
  This crate contains constants shared across multiple migration crates
*/

// Shared configuration
pub const MIGRATION_CONFIG_FILE: &str = "/etc/thar-be-migrations.toml";

// Shared migration state locations
pub const MIGRATION_LOCKFILE: &str = "/run/lock/thar-be-migrations.lock";
pub const MIGRATION_FILE: &str = "/var/lib/thar-be-migrations/current.json";
pub const MIGRATION_ARCHIVE_DIR: &str = "/var/lib/thar-be-migrations/archive";

// Shared binaries' locations
pub const LOCAL_HELPER_BIN: &str = "/usr/libexec/migration-helper";
pub const REMOTE_HELPER_BIN: &str = "/usr/libexec/device-client";
pub const SHUTDOWN_BIN: &str = "/sbin/shutdown";

// Remote device calls that aren't given a more specific timeout
pub const REMOTE_CALL_TIMEOUT_SECONDS: u64 = 300;
