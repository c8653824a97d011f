//! Tidemark CLI - deadline and status tracking for client milestones.

use chrono::Utc;
use clap::Parser;
use std::process;
use std::time::Instant;
use tidemark::action_log;
use tidemark::cli::{
    ClientCommands, Cli, Commands, ConfigCommands, MilestoneCommands, SystemCommands,
};
use tidemark::commands::{self, Context, Output};
use tidemark::config::{ConfigOverrides, OutputFormat, resolve_config};
use tidemark::models::RawStatus;
use tidemark::storage::{Storage, get_storage_dir};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let data_dir = match get_storage_dir(cli.data_dir.as_deref()) {
        Ok(dir) => dir,
        Err(e) => exit_with_error(&e, cli.human_readable),
    };

    let mut overrides = ConfigOverrides::new();
    if let Some(ref tz) = cli.timezone {
        overrides = overrides.with_timezone(tz);
    }
    if cli.human_readable {
        overrides = overrides.with_output_format(OutputFormat::Human);
    }
    let ctx = Context::new(&data_dir, overrides, cli.now.unwrap_or_else(Utc::now));
    let human = wants_human(&ctx, cli.human_readable);

    // Serialize command for logging
    let (cmd_name, args_json) = serialize_command(&cli.command);

    let start = Instant::now();
    let result = run_command(cli.command, &ctx, human);
    let duration = start.elapsed().as_millis() as u64;

    let (success, error) = match &result {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    // Never fails the command
    action_log::log_action(&data_dir, &cmd_name, args_json, success, error, duration);

    if let Err(e) = result {
        exit_with_error(&e, human);
    }
}

/// Install the stderr fmt subscriber, filtered by `TM_LOG` (default `warn`).
fn init_tracing() {
    let filter = EnvFilter::try_from_env("TM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Human output when `-H` is given or the resolved `output-format` says so.
///
/// Falls back to the flag alone when storage is not initialized yet.
fn wants_human(ctx: &Context, flag: bool) -> bool {
    if flag {
        return true;
    }
    match Storage::open(&ctx.data_dir) {
        Ok(storage) => resolve_config(&storage, &ctx.overrides)
            .map(|config| *config.output_format() == OutputFormat::Human)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn exit_with_error(e: &tidemark::Error, human: bool) -> ! {
    if human {
        eprintln!("Error: {}", e);
    } else {
        eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
    }
    process::exit(1);
}

fn run_command(command: Commands, ctx: &Context, human: bool) -> Result<(), tidemark::Error> {
    match command {
        Commands::Client { command } => match command {
            ClientCommands::Create {
                signed_on,
                name,
                intake,
            } => {
                let result = commands::client_create(ctx, signed_on, name, intake)?;
                output(&result, human);
            }
            ClientCommands::Show { id } => {
                let result = commands::client_show(ctx, &id)?;
                output(&result, human);
            }
            ClientCommands::List { paused, running } => {
                let filter = match (paused, running) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                let result = commands::client_list(ctx, filter)?;
                output(&result, human);
            }
            ClientCommands::Pause { id } => {
                let result = commands::client_pause(ctx, &id)?;
                output(&result, human);
            }
            ClientCommands::Resume { id } => {
                let result = commands::client_resume(ctx, &id)?;
                output(&result, human);
            }
            ClientCommands::Backfill { id } => {
                let result = commands::client_backfill(ctx, &id)?;
                output(&result, human);
            }
            ClientCommands::Intake { id, date, clear } => {
                let date = if clear { None } else { date };
                let result = commands::client_set_intake(ctx, &id, date)?;
                output(&result, human);
            }
        },
        Commands::Milestone { command } => match command {
            MilestoneCommands::Show { id } => {
                let result = commands::milestone_show(ctx, &id)?;
                output(&result, human);
            }
            MilestoneCommands::Set { id, status } => {
                let status = RawStatus::parse(&status)?;
                let result = commands::milestone_set(ctx, &id, status)?;
                output(&result, human);
            }
            MilestoneCommands::Due { id, due, clear } => {
                let due = if clear { None } else { due };
                let result = commands::milestone_due(ctx, &id, due)?;
                output(&result, human);
            }
        },
        Commands::Undo => {
            let result = commands::undo(ctx)?;
            output(&result, human);
        }
        Commands::Board => {
            let result = commands::board(ctx)?;
            output(&result, human);
        }
        Commands::Check => {
            let result = commands::check(ctx)?;
            output(&result, human);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(ctx)?;
                output(&result, human);
            }
            ConfigCommands::Set { key, value } => {
                let result = commands::config_set(ctx, &key, &value)?;
                output(&result, human);
            }
        },
        Commands::System { command } => match command {
            SystemCommands::Init => {
                let result = commands::system_init(ctx)?;
                output(&result, human);
            }
            SystemCommands::Rebuild => {
                let result = commands::system_rebuild(ctx)?;
                output(&result, human);
            }
        },
    }
    Ok(())
}

fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}

/// Serialize a command to extract its name and arguments for the action log.
fn serialize_command(command: &Commands) -> (String, serde_json::Value) {
    match command {
        Commands::Client { command } => match command {
            ClientCommands::Create {
                signed_on,
                name,
                intake,
            } => (
                "client create".to_string(),
                serde_json::json!({ "signed_on": signed_on, "name": name, "intake": intake }),
            ),
            ClientCommands::Show { id } => {
                ("client show".to_string(), serde_json::json!({ "id": id }))
            }
            ClientCommands::List { paused, running } => (
                "client list".to_string(),
                serde_json::json!({ "paused": paused, "running": running }),
            ),
            ClientCommands::Pause { id } => {
                ("client pause".to_string(), serde_json::json!({ "id": id }))
            }
            ClientCommands::Resume { id } => {
                ("client resume".to_string(), serde_json::json!({ "id": id }))
            }
            ClientCommands::Backfill { id } => {
                ("client backfill".to_string(), serde_json::json!({ "id": id }))
            }
            ClientCommands::Intake { id, date, clear } => (
                "client intake".to_string(),
                serde_json::json!({ "id": id, "date": date, "clear": clear }),
            ),
        },
        Commands::Milestone { command } => match command {
            MilestoneCommands::Show { id } => {
                ("milestone show".to_string(), serde_json::json!({ "id": id }))
            }
            MilestoneCommands::Set { id, status } => (
                "milestone set".to_string(),
                serde_json::json!({ "id": id, "status": status }),
            ),
            MilestoneCommands::Due { id, due, clear } => (
                "milestone due".to_string(),
                serde_json::json!({ "id": id, "due": due, "clear": clear }),
            ),
        },
        Commands::Undo => ("undo".to_string(), serde_json::json!({})),
        Commands::Board => ("board".to_string(), serde_json::json!({})),
        Commands::Check => ("check".to_string(), serde_json::json!({})),
        Commands::Config { command } => match command {
            ConfigCommands::Show => ("config show".to_string(), serde_json::json!({})),
            ConfigCommands::Set { key, value } => (
                "config set".to_string(),
                serde_json::json!({ "name": key, "value": value }),
            ),
        },
        Commands::System { command } => match command {
            SystemCommands::Init => ("system init".to_string(), serde_json::json!({})),
            SystemCommands::Rebuild => ("system rebuild".to_string(), serde_json::json!({})),
        },
    }
}
