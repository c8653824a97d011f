//! Precedence resolution for configuration.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (passed at runtime)
//! 2. Environment variables (`TM_TIMEZONE`)
//! 3. Workspace config.kdl (`<data-dir>/config.kdl`)
//! 4. System config.kdl (`~/.config/tidemark/config.kdl`)
//! 5. Built-in defaults
//!
//! `initial-offsets` merges per kind: a workspace entry for `day14` replaces
//! only the system entry for `day14`.

use chrono::Duration;
use chrono_tz::Tz;

use crate::Result;
use crate::config::{OutputFormat, TidemarkConfig};
use crate::engine::deadline::{self, DeadlineRules, OffsetTable, RecurringBounds};
use crate::storage::Storage;

/// Environment variable name for the timezone override.
pub const TIMEZONE_ENV: &str = "TM_TIMEZONE";

/// Default undo window in seconds.
pub const DEFAULT_UNDO_WINDOW_SECS: u64 = 600;

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from environment variable
    EnvVar(String),
    /// Value from workspace-level config
    Session,
    /// Value from system-level config
    System,
    /// Value from CLI flag
    CliFlag,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::Session => write!(f, "session"),
            ValueSource::System => write!(f, "system"),
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    /// Create a new resolved value.
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// Fully resolved configuration with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub timezone: Resolved<Tz>,
    pub offsets: Resolved<OffsetTable>,
    pub recurring: Resolved<RecurringBounds>,
    pub undo_window_secs: Resolved<u64>,
    pub output_format: Resolved<OutputFormat>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            timezone: Resolved::new(Tz::UTC, ValueSource::Default),
            offsets: Resolved::new(OffsetTable::default(), ValueSource::Default),
            recurring: Resolved::new(RecurringBounds::default(), ValueSource::Default),
            undo_window_secs: Resolved::new(DEFAULT_UNDO_WINDOW_SECS, ValueSource::Default),
            output_format: Resolved::new(OutputFormat::Json, ValueSource::Default),
        }
    }
}

impl ResolvedConfig {
    /// Deadline rules for the engine.
    pub fn rules(&self) -> DeadlineRules {
        DeadlineRules {
            timezone: self.timezone.value,
            offsets: self.offsets.value,
            recurring: self.recurring.value,
        }
    }

    pub fn undo_window(&self) -> Duration {
        Duration::seconds(i64::try_from(self.undo_window_secs.value).unwrap_or(i64::MAX))
    }

    /// Get the output format value.
    pub fn output_format(&self) -> &OutputFormat {
        &self.output_format.value
    }
}

/// CLI overrides for configuration resolution.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Timezone override from CLI flag
    pub timezone: Option<String>,
    /// Output format override from CLI flag
    pub output_format: Option<OutputFormat>,
}

impl ConfigOverrides {
    /// Create empty overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set timezone override.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// Set output format override.
    pub fn with_output_format(mut self, format: OutputFormat) -> Self {
        self.output_format = Some(format);
        self
    }
}

/// Resolve configuration for a workspace with full precedence chain.
pub fn resolve_config(storage: &Storage, overrides: &ConfigOverrides) -> Result<ResolvedConfig> {
    let system_config = Storage::read_system_config()?;
    let session_config = storage.read_config()?;
    let env_timezone = std::env::var(TIMEZONE_ENV).ok().filter(|s| !s.is_empty());
    resolve_layers(
        &system_config,
        &session_config,
        env_timezone.as_deref(),
        overrides,
    )
}

/// Resolve already-loaded layers. Invalid values at any layer are
/// configuration errors, even when a higher layer would override them.
pub fn resolve_layers(
    system: &TidemarkConfig,
    session: &TidemarkConfig,
    env_timezone: Option<&str>,
    overrides: &ConfigOverrides,
) -> Result<ResolvedConfig> {
    system.validate()?;
    session.validate()?;

    let mut result = ResolvedConfig::default();

    // Resolve timezone
    if let Some(ref tz) = overrides.timezone {
        result.timezone = Resolved::new(deadline::parse_timezone(tz)?, ValueSource::CliFlag);
    } else if let Some(tz) = env_timezone {
        result.timezone = Resolved::new(
            deadline::parse_timezone(tz)?,
            ValueSource::EnvVar(TIMEZONE_ENV.to_string()),
        );
    } else if let Some(ref tz) = session.timezone {
        result.timezone = Resolved::new(deadline::parse_timezone(tz)?, ValueSource::Session);
    } else if let Some(ref tz) = system.timezone {
        result.timezone = Resolved::new(deadline::parse_timezone(tz)?, ValueSource::System);
    }

    // Resolve offsets, merged per kind
    if !system.initial_offsets.is_empty() || !session.initial_offsets.is_empty() {
        let mut merged = system.clone();
        merged.merge(session);
        let source = if session.initial_offsets.is_empty() {
            ValueSource::System
        } else {
            ValueSource::Session
        };
        result.offsets = Resolved::new(OffsetTable::from_entries(&merged.initial_offsets)?, source);
    }

    // Resolve recurring bounds; each end falls through independently
    let (min, min_source) = pick(session.recurring_min, system.recurring_min);
    let (max, max_source) = pick(session.recurring_max, system.recurring_max);
    if min.is_some() || max.is_some() {
        let defaults = RecurringBounds::default();
        let bounds = RecurringBounds::new(min.unwrap_or(defaults.min), max.unwrap_or(defaults.max))?;
        let source = if min_source == ValueSource::Session || max_source == ValueSource::Session {
            ValueSource::Session
        } else {
            ValueSource::System
        };
        result.recurring = Resolved::new(bounds, source);
    }

    // Resolve undo window
    if let (Some(secs), source) = pick(session.undo_window_secs, system.undo_window_secs) {
        result.undo_window_secs = Resolved::new(secs, source);
    }

    // Resolve output_format
    if let Some(ref format) = overrides.output_format {
        result.output_format = Resolved::new(format.clone(), ValueSource::CliFlag);
    } else if let (Some(format), source) =
        pick(session.output_format.clone(), system.output_format.clone())
    {
        result.output_format = Resolved::new(format, source);
    }

    Ok(result)
}

fn pick<T>(session: Option<T>, system: Option<T>) -> (Option<T>, ValueSource) {
    match (session, system) {
        (Some(v), _) => (Some(v), ValueSource::Session),
        (None, Some(v)) => (Some(v), ValueSource::System),
        (None, None) => (None, ValueSource::Default),
    }
}
