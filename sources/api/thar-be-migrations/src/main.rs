/*!
# Introduction

thar-be-migrations is the command line interface to migration scheduling.  The management
interface calls it to schedule, cancel, and inspect migrations, and to run the advisory checks
offered before a device migration.  A periodic job calls `thar-be-migrations run-scheduled` to
run the scheduled migration once it's due.

Only one migration can be scheduled or running at a time.  Commands that conflict with a
running migration exit immediately with an exit status that says so.

# Configuration

Paths and timeouts come from a TOML file, `/etc/thar-be-migrations.toml` unless `--config`
says otherwise.  Every key is optional:

```toml
lock-file = "/run/lock/thar-be-migrations.lock"
migration-file = "/var/lib/thar-be-migrations/current.json"
archive-directory = "/var/lib/thar-be-migrations/archive"
local-helper = "/usr/libexec/migration-helper"
remote-helper = "/usr/libexec/device-client"
remote-timeout-seconds = 300
background-command = "/usr/bin/thar-be-migrations"
```
*/

use argh::FromArgs;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use serde_json::json;
use simplelog::{ColorChoice, Config as LogConfig, LevelFilter, SimpleLogger, TermLogger, TerminalMode};
use snafu::ResultExt;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use thar_be_migrations::collaborators::Collaborators;
use thar_be_migrations::config::Config;
use thar_be_migrations::error::{self, Result};
use thar_be_migrations::expansion::{expansion_size, Redundancy};
use thar_be_migrations::helper::HelperCommands;
use thar_be_migrations::migration::MigrationType;
use thar_be_migrations::service::MigrationService;
use thar_be_migrations::status::DeviceMigrationService;

/// Schedules, runs, and reports on migrations.
#[derive(FromArgs, Debug)]
struct Args {
    /// log-level trace|debug|info|warn|error
    #[argh(option)]
    log_level: Option<LevelFilter>,
    /// path to the config file
    #[argh(
        option,
        default = "PathBuf::from(constants::MIGRATION_CONFIG_FILE)"
    )]
    config: PathBuf,
    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Subcommand {
    Schedule(ScheduleArgs),
    RunScheduled(RunScheduledArgs),
    Cancel(CancelArgs),
    Status(StatusArgs),
    List(ListArgs),
    Dismiss(DismissArgs),
    ExpansionSize(ExpansionSizeArgs),
    RemoteAssets(RemoteAssetsArgs),
    CheckStorageNode(CheckStorageNodeArgs),
    CheckCompatibility(CheckCompatibilityArgs),
}

/// Schedules a migration; it runs right away if it's already due
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "schedule")]
struct ScheduleArgs {
    /// what to migrate: "device" and/or asset keys, or pool devices for storage expansion
    #[argh(option)]
    target: Vec<String>,
    /// the device to migrate from
    #[argh(option)]
    source: Vec<String>,
    /// when to run, as RFC 3339 (default now)
    #[argh(option)]
    at: Option<DateTime<Utc>>,
    /// device|storage-expansion (default device)
    #[argh(option, long = "type", default = "MigrationType::Device")]
    migration_type: MigrationType,
    /// put both devices in maintenance mode while migrating
    #[argh(switch)]
    maintenance_mode: bool,
    /// run a due migration in a detached process instead of this one
    #[argh(switch)]
    background: bool,
}

/// Runs the scheduled migration if it's due
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "run-scheduled")]
struct RunScheduledArgs {}

/// Cancels the scheduled migration
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "cancel")]
struct CancelArgs {}

/// Prints the device migration status as JSON
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "status")]
struct StatusArgs {}

/// Prints every migration, finished ones first, as JSON
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "list")]
struct ListArgs {}

/// Hides finished migrations from the status
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "dismiss")]
struct DismissArgs {
    /// scheduled time, in seconds since the epoch, of the one migration to dismiss
    #[argh(option)]
    timestamp: Option<i64>,
}

/// Prints how many bytes adding devices would add to a storage pool
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "expansion-size")]
struct ExpansionSizeArgs {
    /// mirror|raidz1|raidz2|raidz3
    #[argh(option)]
    redundancy: Redundancy,
    /// capacity in bytes of each new device
    #[argh(option)]
    capacity: Vec<u64>,
}

/// Lists the remote device's assets that aren't on this device
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "remote-assets")]
struct RemoteAssetsArgs {}

/// Checks whether both devices use the same offsite storage node
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "check-storage-node")]
struct CheckStorageNodeArgs {}

/// Checks that the remote device can be migrated to this one
#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "check-compatibility")]
struct CheckCompatibilityArgs {}

fn setup_logger(args: &Args) -> Result<()> {
    let log_level = args.log_level.unwrap_or(LevelFilter::Info);
    match args.subcommand {
        // Run from cron; there's no terminal to be mixed into.
        Subcommand::RunScheduled(_) => {
            SimpleLogger::init(log_level, LogConfig::default()).context(error::LoggerSnafu)
        }
        // TerminalMode::Mixed will send errors to stderr and anything less to stdout.
        _ => TermLogger::init(
            log_level,
            LogConfig::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .context(error::LoggerSnafu),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let output = serde_json::to_string_pretty(value).context(error::OutputSnafu)?;
    println!("{}", output);
    Ok(())
}

fn run() -> Result<()> {
    let args: Args = argh::from_env();
    setup_logger(&args)?;

    let config = Config::load(&args.config)?;
    debug!("Using config {:?}", config);
    let helper = Arc::new(HelperCommands::new(
        &config.local_helper,
        &config.remote_helper,
    ));
    let collaborators = Collaborators::from_shared(helper);
    let migrations = MigrationService::from_config(&config, &args.config, collaborators.clone())?;
    let devices =
        DeviceMigrationService::new(&migrations, collaborators, config.remote_timeout());

    match args.subcommand {
        Subcommand::Schedule(schedule) => migrations.schedule(
            schedule.at.unwrap_or_else(Utc::now),
            schedule.source,
            schedule.target,
            schedule.maintenance_mode,
            schedule.migration_type,
            schedule.background,
        ),
        Subcommand::RunScheduled(_) => {
            if migrations.run_if_scheduled()? {
                info!("Scheduled migration handled");
            } else {
                debug!("Nothing to run");
            }
            Ok(())
        }
        Subcommand::Cancel(_) => migrations.cancel_scheduled(),
        Subcommand::Status(_) => print_json(&devices.get_status()?),
        Subcommand::List(_) => print_json(&migrations.get_all_migrations()?),
        Subcommand::Dismiss(dismiss) => match dismiss.timestamp {
            Some(timestamp) => migrations.dismiss_completed_migration(timestamp),
            None => {
                let count = migrations.dismiss_all_completed()?;
                info!("Dismissed {} migration(s)", count);
                Ok(())
            }
        },
        Subcommand::ExpansionSize(size) => {
            print_json(&expansion_size(&size.capacity, size.redundancy))
        }
        Subcommand::RemoteAssets(_) => print_json(&devices.get_remote_assets()?),
        Subcommand::CheckStorageNode(_) => print_json(&json!({
            "shared": devices.is_storage_node_shared()?,
        })),
        Subcommand::CheckCompatibility(_) => {
            let (local, remote) = devices.check_compatibility()?;
            print_json(&json!({
                "localVersion": local.to_string(),
                "remoteVersion": remote.to_string(),
            }))
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(e.exit_status());
    }
}
