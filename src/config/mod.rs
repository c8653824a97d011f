//! Configuration for Tidemark.
//!
//! Settings live in `config.kdl` files:
//! - System: `~/.config/tidemark/config.kdl` (or `TM_SYSTEM_CONFIG`)
//! - Workspace: `<data-dir>/config.kdl`
//!
//! Contains:
//! - `timezone` - IANA timezone deadlines are computed in
//! - `initial-offsets` - day offsets for `day1`, `day14`, `day30`
//! - `recurring-min` / `recurring-max` - month bounds of the recurring series
//! - `undo-window-secs` - how long the last status change can be undone
//! - `output-format` - "json" or "human"
//!
//! ## Precedence
//!
//! CLI flag > env var > workspace config > system config > defaults
//!
//! Use the [`resolver`] module for precedence resolution.

pub mod resolver;
pub mod schema;

pub use resolver::{
    ConfigOverrides, DEFAULT_UNDO_WINDOW_SECS, Resolved, ResolvedConfig, TIMEZONE_ENV,
    ValueSource, resolve_config, resolve_layers,
};
pub use schema::{CONFIG_KEYS, OutputFormat, TidemarkConfig, load_config_file, save_config_file};
