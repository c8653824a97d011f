//! CLI argument definitions for Tidemark.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

/// Tidemark - deadline and status tracking for client milestones.
///
/// Start with `tm system init`, onboard clients with `tm client create`,
/// then watch deadlines with `tm board`.
#[derive(Parser, Debug)]
#[command(name = "tm")]
#[command(author, version, about = "Track client milestone deadlines, statuses and auto-fail cascades", long_about = None)]
pub struct Cli {
    /// Output in human-readable format instead of JSON
    #[arg(short = 'H', long = "human", global = true)]
    pub human_readable: bool,

    /// Data directory (default: ~/.local/share/tidemark)
    #[arg(long = "data-dir", global = true, env = "TM_DATA_DIR")]
    pub data_dir: Option<std::path::PathBuf>,

    /// IANA timezone deadlines are computed in.
    /// Can also be set via TM_TIMEZONE environment variable.
    #[arg(long, global = true)]
    pub timezone: Option<String>,

    /// Pin the wall clock to this RFC 3339 instant
    #[arg(long, global = true, env = "TM_NOW")]
    pub now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Client management commands
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },

    /// Milestone status and deadline commands
    Milestone {
        #[command(subcommand)]
        command: MilestoneCommands,
    },

    /// Undo the last status change (within the undo window)
    Undo,

    /// Show the active initial and recurring milestone of every client
    Board,

    /// Report stored state that violates invariants
    Check,

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// System administration commands
    System {
        #[command(subcommand)]
        command: SystemCommands,
    },
}

/// Client subcommands
#[derive(Subcommand, Debug)]
pub enum ClientCommands {
    /// Onboard a client and create its full milestone set
    Create {
        /// Sign-on date (YYYY-MM-DD)
        signed_on: NaiveDate,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Base date for the recurring series (YYYY-MM-DD)
        #[arg(long)]
        intake: Option<NaiveDate>,
    },

    /// Show a client with every milestone's deadline and status
    Show {
        /// Client ID (e.g., tmc-a1b2)
        id: String,
    },

    /// List clients
    List {
        /// Only paused clients
        #[arg(long, conflicts_with = "running")]
        paused: bool,

        /// Only running clients
        #[arg(long)]
        running: bool,
    },

    /// Freeze a client's timers
    Pause {
        /// Client ID
        id: String,
    },

    /// Resume a client's timers
    Resume {
        /// Client ID
        id: String,
    },

    /// Add missing recurring milestones within the configured bounds
    Backfill {
        /// Client ID
        id: String,
    },

    /// Set or clear the base date of the recurring series
    Intake {
        /// Client ID
        id: String,

        /// Intake date (YYYY-MM-DD)
        #[arg(required_unless_present = "clear")]
        date: Option<NaiveDate>,

        /// Clear the intake date
        #[arg(long, conflicts_with = "date")]
        clear: bool,
    },
}

/// Milestone subcommands
#[derive(Subcommand, Debug)]
pub enum MilestoneCommands {
    /// Show a milestone's deadline and derived status
    Show {
        /// Milestone ID (e.g., tme-a1b2)
        id: String,
    },

    /// Set a milestone's raw status (pending, yes, no)
    Set {
        /// Milestone ID
        id: String,

        /// New raw status: pending, yes, or no
        status: String,
    },

    /// Set or clear a custom deadline for one milestone
    Due {
        /// Milestone ID
        id: String,

        /// Deadline as an RFC 3339 instant
        #[arg(required_unless_present = "clear")]
        due: Option<DateTime<Utc>>,

        /// Clear the custom deadline
        #[arg(long, conflicts_with = "due")]
        clear: bool,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show resolved settings and where each came from
    Show,

    /// Set a configuration value in the workspace
    Set {
        /// Config key (e.g., timezone, initial-offsets, action_log_enabled)
        key: String,
        /// Config value
        value: String,
    },
}

/// System administration subcommands
#[derive(Subcommand, Debug)]
pub enum SystemCommands {
    /// Initialize tidemark in the data directory
    Init,

    /// Rebuild the SQLite cache from the JSONL files
    Rebuild,
}
