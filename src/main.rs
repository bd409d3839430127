//! solidb-migrate CLI: apply, roll back, inspect and back up SoliDB schema migrations.

use std::env;
use std::path::Path;
use std::process;

use solidb_migrate::backup::BackupService;
use solidb_migrate::executor::{Executor, MigrateOptions};
use solidb_migrate::files::FileStore;
use solidb_migrate::integrity::{print_report, IntegrityChecker};
use solidb_migrate::notify::Notifier;
use solidb_migrate::rollback::{RollbackEngine, RollbackOptions, RollbackTarget};
use solidb_migrate::status::{print_status, MigrationStatus};
use solidb_migrate::store::StoreClient;
use solidb_migrate::{MigrateConfig, MigrateError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CLI command to execute.
#[derive(Debug, PartialEq)]
enum Command {
    /// Apply pending migrations
    Migrate {
        target: Option<u64>,
        dry_run: bool,
        no_backup: bool,
    },
    /// Roll back applied migrations
    Rollback {
        target: RollbackTarget,
        dry_run: bool,
    },
    /// Show applied/pending table
    Status,
    /// Generate a new migration file
    Create {
        name: String,
        description: Option<String>,
    },
    /// Read-only integrity check
    Validate,
    /// Store-level repair (destructive)
    Repair,
    /// Remove expired backup artifacts
    Cleanup,
}

/// CLI options parsed from arguments.
#[derive(Debug, PartialEq)]
struct Options {
    app_path: String,
    command: Command,
}

fn print_usage() {
    eprintln!("solidb-migrate {} - SoliDB schema migrations", VERSION);
    eprintln!();
    eprintln!("Usage: solidb-migrate [--app PATH] <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  migrate [targetVersion] [--dry-run] [--no-backup]");
    eprintln!("                       Apply pending migrations (up to targetVersion)");
    eprintln!("  rollback [steps] [--to VERSION] [--dry-run]");
    eprintln!("                       Roll back applied migrations (default: one step)");
    eprintln!("  status               Show applied and pending migrations");
    eprintln!("  create <name> [description]");
    eprintln!("                       Generate a new migration file");
    eprintln!("  validate             Read-only integrity check of all collections");
    eprintln!("  repair --force       Run the store-level repair (destructive!)");
    eprintln!("  cleanup              Remove backup artifacts past the retention window");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --app PATH      Application directory (default: current directory)");
    eprintln!("  --help, -h      Show this help message");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  SOLIDB_HOST, SOLIDB_DATABASE, SOLIDB_USERNAME, SOLIDB_PASSWORD");
    eprintln!("  SOLIDB_MIGRATIONS_DIR, SOLIDB_BACKUP_DIR, SOLIDB_BACKUP_RETENTION_DAYS");
    eprintln!("  SOLIDB_MIGRATE_WEBHOOK");
    eprintln!("  (also read from .env / .env.{{APP_ENV}} in the app directory)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  solidb-migrate migrate               Apply all pending migrations");
    eprintln!("  solidb-migrate migrate 4 --dry-run   Show what would run, up to version 4");
    eprintln!("  solidb-migrate rollback              Roll back the last migration");
    eprintln!("  solidb-migrate rollback 3            Roll back the last three migrations");
    eprintln!("  solidb-migrate rollback --to 2       Roll back everything above version 2");
    eprintln!("  solidb-migrate create add_email_index \"adds the email index\"");
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut app_path = ".".to_string();
    let mut rest: Vec<String> = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--app" => {
                i += 1;
                match args.get(i) {
                    Some(path) => app_path = path.clone(),
                    None => return Err("--app requires a path".to_string()),
                }
            }
            "--help" | "-h" => return Err(String::new()),
            _ => rest.push(args[i].clone()),
        }
        i += 1;
    }

    let command = match rest.first().map(|s| s.as_str()) {
        Some("migrate") => parse_migrate(&rest[1..])?,
        Some("rollback") => parse_rollback(&rest[1..])?,
        Some("status") => Command::Status,
        Some("create") => parse_create(&rest[1..])?,
        Some("validate") => Command::Validate,
        Some("repair") => {
            if rest[1..].iter().any(|a| a == "--force") {
                Command::Repair
            } else {
                return Err(
                    "repair rewrites collection data in place; pass --force to confirm"
                        .to_string(),
                );
            }
        }
        Some("cleanup") => Command::Cleanup,
        Some(other) => return Err(format!("unknown command: {}", other)),
        None => return Err("a command is required".to_string()),
    };

    Ok(Options { app_path, command })
}

fn parse_migrate(args: &[String]) -> Result<Command, String> {
    let mut target = None;
    let mut dry_run = false;
    let mut no_backup = false;

    for arg in args {
        match arg.as_str() {
            "--dry-run" => dry_run = true,
            "--no-backup" => no_backup = true,
            other => {
                if target.is_some() {
                    return Err(format!("unexpected migrate argument: {}", other));
                }
                target = Some(
                    other
                        .parse::<u64>()
                        .map_err(|_| format!("invalid target version: {}", other))?,
                );
            }
        }
    }

    Ok(Command::Migrate {
        target,
        dry_run,
        no_backup,
    })
}

fn parse_rollback(args: &[String]) -> Result<Command, String> {
    let mut steps: Option<usize> = None;
    let mut to_version: Option<u64> = None;
    let mut dry_run = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--dry-run" => dry_run = true,
            "--to" => {
                i += 1;
                let value = args
                    .get(i)
                    .ok_or_else(|| "--to requires a version".to_string())?;
                to_version = Some(
                    value
                        .parse::<u64>()
                        .map_err(|_| format!("invalid target version: {}", value))?,
                );
            }
            other => {
                if steps.is_some() {
                    return Err(format!("unexpected rollback argument: {}", other));
                }
                steps = Some(
                    other
                        .parse::<usize>()
                        .map_err(|_| format!("invalid step count: {}", other))?,
                );
            }
        }
        i += 1;
    }

    let target = match (steps, to_version) {
        (Some(_), Some(_)) => {
            return Err("give either a step count or --to VERSION, not both".to_string());
        }
        (Some(n), None) => RollbackTarget::Steps(n),
        (None, Some(v)) => RollbackTarget::ToVersion(v),
        (None, None) => RollbackTarget::default(),
    };

    Ok(Command::Rollback { target, dry_run })
}

fn parse_create(args: &[String]) -> Result<Command, String> {
    let name = args
        .first()
        .ok_or_else(|| "create requires a migration name".to_string())?
        .clone();
    let description = if args.len() > 1 {
        Some(args[1..].join(" "))
    } else {
        None
    };
    Ok(Command::Create { name, description })
}

fn print_failure(stage: &str, e: &MigrateError) {
    eprintln!();
    eprintln!("  \x1b[31mError\x1b[0m during {}: {}", stage, e);
    if matches!(e, MigrateError::ExecutionFailed { .. }) {
        eprintln!("  Migrations applied before the failure remain committed.");
        eprintln!("  Run 'solidb-migrate status' to see where this run stopped.");
    }
    if matches!(e, MigrateError::LockHeld) {
        eprintln!("  If no other run is active, delete the lock document from");
        eprintln!("  the _migration_lock collection and retry.");
    }
    eprintln!();
}

fn run(options: &Options) -> i32 {
    let app_path = Path::new(&options.app_path);
    if !app_path.exists() {
        eprintln!("Error: Folder '{}' does not exist", options.app_path);
        return 1;
    }

    let config = MigrateConfig::from_env(app_path);

    let store = match StoreClient::from_config(&config.db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("  \x1b[31mError:\x1b[0m {}", e);
            return 1;
        }
    };
    let files = FileStore::new(&config.migrations_dir);
    let notifier = Notifier::new(config.webhook_url.clone());

    match &options.command {
        Command::Migrate {
            target,
            dry_run,
            no_backup,
        } => {
            println!();
            println!("  \x1b[1mRunning migrations...\x1b[0m");
            println!();

            let config = config.clone().with_backup_enabled(!no_backup);
            let executor = Executor::new(&store, &files, &config, &notifier);
            let migrate_options = MigrateOptions {
                target: *target,
                dry_run: *dry_run,
                backup: config.backup_enabled,
            };
            match executor.migrate(&migrate_options) {
                Ok(outcome) => {
                    println!();
                    println!(
                        "  \x1b[32mApplied {} migration(s)\x1b[0m",
                        outcome.applied.len()
                    );
                    println!();
                    0
                }
                Err(e) => {
                    print_failure("migrate", &e);
                    1
                }
            }
        }
        Command::Rollback { target, dry_run } => {
            println!();
            println!("  \x1b[1mRolling back...\x1b[0m");
            println!();

            let engine = RollbackEngine::new(&store, &files, &notifier);
            let rollback_options = RollbackOptions {
                target: *target,
                dry_run: *dry_run,
            };
            match engine.rollback(&rollback_options) {
                Ok(outcome) => {
                    println!();
                    println!(
                        "  \x1b[32mRolled back {} migration(s)\x1b[0m",
                        outcome.rolled_back.len()
                    );
                    println!();
                    0
                }
                Err(e) => {
                    print_failure("rollback", &e);
                    1
                }
            }
        }
        Command::Status => match MigrationStatus::collect(&store, &files) {
            Ok(status) => {
                print_status(&status);
                0
            }
            Err(e) => {
                print_failure("status", &e);
                1
            }
        },
        Command::Create { name, description } => {
            match files.create(name, description.as_deref()) {
                Ok(path) => {
                    println!();
                    println!("  \x1b[32mCreated migration:\x1b[0m {}", path.display());
                    println!();
                    0
                }
                Err(e) => {
                    print_failure("create", &e);
                    1
                }
            }
        }
        Command::Validate => {
            let checker = IntegrityChecker::new(&store, &files);
            match checker.validate() {
                Ok(report) => {
                    print_report(&report);
                    if report.valid {
                        0
                    } else {
                        1
                    }
                }
                Err(e) => {
                    print_failure("validate", &e);
                    1
                }
            }
        }
        Command::Repair => {
            let checker = IntegrityChecker::new(&store, &files);
            match checker.repair() {
                Ok(details) => {
                    println!();
                    println!("  \x1b[32mRepair finished:\x1b[0m {}", details);
                    println!();
                    0
                }
                Err(e) => {
                    print_failure("repair", &e);
                    1
                }
            }
        }
        Command::Cleanup => {
            let backup = BackupService::new(&store, &config);
            match backup.cleanup() {
                Ok(removed) => {
                    println!();
                    for path in &removed {
                        println!("  \x1b[33mRemoved\x1b[0m {}", path.display());
                    }
                    println!(
                        "  \x1b[32m{} backup artifact(s) removed\x1b[0m",
                        removed.len()
                    );
                    println!();
                    0
                }
                Err(e) => {
                    print_failure("cleanup", &e);
                    1
                }
            }
        }
    }
}

fn main() {
    let args: Vec<String> = env::args().skip(1).collect();

    let options = match parse_args(&args) {
        Ok(options) => options,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("Error: {}", message);
                eprintln!();
            }
            print_usage();
            process::exit(if message.is_empty() { 0 } else { 1 });
        }
    };

    process::exit(run(&options));
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<Options, String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        parse_args(&args)
    }

    #[test]
    fn test_migrate_defaults() {
        let options = parse(&["migrate"]).unwrap();
        assert_eq!(options.app_path, ".");
        assert_eq!(
            options.command,
            Command::Migrate {
                target: None,
                dry_run: false,
                no_backup: false
            }
        );
    }

    #[test]
    fn test_migrate_with_target_and_flags() {
        let options = parse(&["migrate", "4", "--dry-run", "--no-backup"]).unwrap();
        assert_eq!(
            options.command,
            Command::Migrate {
                target: Some(4),
                dry_run: true,
                no_backup: true
            }
        );
    }

    #[test]
    fn test_migrate_rejects_bad_target() {
        assert!(parse(&["migrate", "four"]).is_err());
    }

    #[test]
    fn test_rollback_defaults_to_one_step() {
        let options = parse(&["rollback"]).unwrap();
        assert_eq!(
            options.command,
            Command::Rollback {
                target: RollbackTarget::Steps(1),
                dry_run: false
            }
        );
    }

    #[test]
    fn test_rollback_steps() {
        let options = parse(&["rollback", "3"]).unwrap();
        assert_eq!(
            options.command,
            Command::Rollback {
                target: RollbackTarget::Steps(3),
                dry_run: false
            }
        );
    }

    #[test]
    fn test_rollback_to_version() {
        let options = parse(&["rollback", "--to", "2", "--dry-run"]).unwrap();
        assert_eq!(
            options.command,
            Command::Rollback {
                target: RollbackTarget::ToVersion(2),
                dry_run: true
            }
        );
    }

    #[test]
    fn test_rollback_rejects_steps_and_to() {
        assert!(parse(&["rollback", "2", "--to", "1"]).is_err());
    }

    #[test]
    fn test_create_with_description() {
        let options = parse(&["create", "add_email_index", "adds", "the", "index"]).unwrap();
        assert_eq!(
            options.command,
            Command::Create {
                name: "add_email_index".to_string(),
                description: Some("adds the index".to_string())
            }
        );
    }

    #[test]
    fn test_create_requires_name() {
        assert!(parse(&["create"]).is_err());
    }

    #[test]
    fn test_repair_requires_force() {
        assert!(parse(&["repair"]).is_err());
        assert_eq!(
            parse(&["repair", "--force"]).unwrap().command,
            Command::Repair
        );
    }

    #[test]
    fn test_app_path_flag() {
        let options = parse(&["--app", "/srv/shop", "status"]).unwrap();
        assert_eq!(options.app_path, "/srv/shop");
        assert_eq!(options.command, Command::Status);
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse(&["frobnicate"]).is_err());
        assert!(parse(&[]).is_err());
    }
}
