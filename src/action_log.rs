//! Audit trail of executed `tm` commands.
//!
//! Each invocation appends one JSON line to `<data-dir>/action.log`, or to
//! the path stored under `action_log_path` in the storage config table.

use crate::storage::Storage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default log file name inside the data directory.
pub const DEFAULT_LOG_FILE: &str = "action.log";

/// A single action log entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionLog {
    /// When the command finished
    pub timestamp: DateTime<Utc>,

    /// Data directory the command ran against
    pub data_dir: String,

    /// Command name (e.g., "client create", "milestone set")
    pub command: String,

    /// Command arguments as JSON
    pub args: serde_json::Value,

    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub duration_ms: u64,

    /// User who executed the command
    pub user: String,
}

/// Storage-table settings for the action log.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    enabled: bool,
    sanitize: bool,
    path: PathBuf,
}

impl LogSettings {
    /// Read settings, falling back to defaults when storage can't be opened.
    fn load(data_dir: &Path) -> Self {
        let storage = Storage::open(data_dir).ok();
        let get = |key: &str| {
            storage
                .as_ref()
                .and_then(|s| s.get_config(key).ok().flatten())
        };

        Self {
            enabled: get("action_log_enabled").map(|v| parse_bool(&v)).unwrap_or(true),
            sanitize: get("action_log_sanitize").map(|v| parse_bool(&v)).unwrap_or(true),
            path: get("action_log_path")
                .map(|p| expand_home(Path::new(&p)))
                .unwrap_or_else(|| data_dir.join(DEFAULT_LOG_FILE)),
        }
    }
}

/// Append an entry for one command. Failures are logged, never returned.
pub fn log_action(
    data_dir: &Path,
    command: &str,
    args: serde_json::Value,
    success: bool,
    error: Option<String>,
    duration_ms: u64,
) {
    let settings = LogSettings::load(data_dir);
    if !settings.enabled {
        return;
    }

    let entry = ActionLog {
        timestamp: Utc::now(),
        data_dir: data_dir.to_string_lossy().to_string(),
        command: command.to_string(),
        args: if settings.sanitize { sanitize_args(&args) } else { args },
        success,
        error,
        duration_ms,
        user: current_user(),
    };

    if let Err(e) = write_log_entry(&settings.path, &entry) {
        warn!(path = %settings.path.display(), error = %e, "failed to write action log");
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Expand ~ in path to home directory.
fn expand_home(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

fn write_log_entry(path: &Path, entry: &ActionLog) -> crate::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string(entry)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// Redact sensitive keys, reduce paths to basenames and truncate long values.
pub fn sanitize_args(args: &serde_json::Value) -> serde_json::Value {
    match args {
        serde_json::Value::Object(map) => {
            let mut sanitized = serde_json::Map::new();
            for (key, value) in map {
                let key_lower = key.to_lowercase();
                if key_lower.contains("password")
                    || key_lower.contains("token")
                    || key_lower.contains("secret")
                {
                    sanitized.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    sanitized.insert(key.clone(), sanitize_args(value));
                }
            }
            serde_json::Value::Object(sanitized)
        }
        serde_json::Value::Array(arr) => {
            if arr.len() > 10 {
                serde_json::Value::String(format!("[Array with {} items]", arr.len()))
            } else {
                serde_json::Value::Array(arr.iter().map(sanitize_args).collect())
            }
        }
        serde_json::Value::String(s) => {
            let sanitized = if s.contains('/') || s.contains('\\') {
                s.rsplit(['/', '\\']).next().unwrap_or(s).to_string()
            } else {
                s.clone()
            };

            if sanitized.chars().count() > 100 {
                let head: String = sanitized.chars().take(97).collect();
                serde_json::Value::String(format!(
                    "{}... ({} chars)",
                    head,
                    sanitized.chars().count()
                ))
            } else {
                serde_json::Value::String(sanitized)
            }
        }
        _ => args.clone(),
    }
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}
