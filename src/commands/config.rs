//! `tm config` commands.
//!
//! Two kinds of keys:
//! - config.kdl keys (`timezone`, `initial-offsets`, ...), validated and
//!   written to the workspace config.kdl
//! - storage keys (`action_log_enabled`, `action_log_path`,
//!   `action_log_sanitize`), kept in the cache's config table

use serde::Serialize;

use super::{Context, Output, to_json_string};
use crate::config::{CONFIG_KEYS, ConfigOverrides, ResolvedConfig, resolve_layers};
use crate::storage::Storage;
use crate::{Error, Result};

/// Keys stored in the storage config table.
pub const STORAGE_KEYS: [&str; 3] = ["action_log_enabled", "action_log_path", "action_log_sanitize"];

#[derive(Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub source: String,
}

#[derive(Serialize)]
pub struct ConfigShow {
    pub entries: Vec<ConfigEntry>,
}

impl Output for ConfigShow {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} = {}  ({})", e.key, e.value, e.source))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn entries(config: &ResolvedConfig) -> Vec<ConfigEntry> {
    let offsets = config
        .offsets
        .value
        .entries()
        .iter()
        .map(|(k, d)| format!("{}={}", k, d))
        .collect::<Vec<_>>()
        .join(",");
    let recurring = config.recurring.value;

    vec![
        ConfigEntry {
            key: "timezone".to_string(),
            value: config.timezone.value.name().to_string(),
            source: config.timezone.source.to_string(),
        },
        ConfigEntry {
            key: "initial-offsets".to_string(),
            value: offsets,
            source: config.offsets.source.to_string(),
        },
        ConfigEntry {
            key: "recurring-min".to_string(),
            value: recurring.min.to_string(),
            source: config.recurring.source.to_string(),
        },
        ConfigEntry {
            key: "recurring-max".to_string(),
            value: recurring.max.to_string(),
            source: config.recurring.source.to_string(),
        },
        ConfigEntry {
            key: "undo-window-secs".to_string(),
            value: config.undo_window_secs.value.to_string(),
            source: config.undo_window_secs.source.to_string(),
        },
        ConfigEntry {
            key: "output-format".to_string(),
            value: config.output_format.value.to_string(),
            source: config.output_format.source.to_string(),
        },
    ]
}

/// Show every resolved setting with its source.
pub fn config_show(ctx: &Context) -> Result<ConfigShow> {
    let (storage, config) = ctx.open()?;
    let mut entries = entries(&config);
    for (key, value) in storage.list_configs()? {
        entries.push(ConfigEntry {
            key,
            value,
            source: "storage".to_string(),
        });
    }
    Ok(ConfigShow { entries })
}

#[derive(Serialize)]
pub struct ConfigSetResult {
    pub key: String,
    pub value: String,
}

impl Output for ConfigSetResult {
    fn to_json(&self) -> String {
        to_json_string(self)
    }

    fn to_human(&self) -> String {
        format!("Set {} = {}", self.key, self.value)
    }
}

/// Set one key. config.kdl writes are validated as a whole before saving.
pub fn config_set(ctx: &Context, key: &str, value: &str) -> Result<ConfigSetResult> {
    let mut storage = Storage::open(&ctx.data_dir)?;

    if STORAGE_KEYS.contains(&key) {
        if key != "action_log_path" && !matches!(value, "true" | "false") {
            return Err(Error::InvalidInput(format!(
                "{} must be true or false, got {}",
                key, value
            )));
        }
        storage.set_config(key, value)?;
    } else if CONFIG_KEYS.contains(&key) {
        let mut config = storage.read_config()?;
        config.set_key(key, value)?;
        // Layered check catches e.g. a workspace min above the system max
        resolve_layers(
            &Storage::read_system_config()?,
            &config,
            None,
            &ConfigOverrides::new(),
        )?;
        storage.write_config(&config)?;
    } else {
        return Err(Error::InvalidInput(format!(
            "Unknown config key: {} (expected one of: {}, {})",
            key,
            CONFIG_KEYS.join(", "),
            STORAGE_KEYS.join(", ")
        )));
    }

    Ok(ConfigSetResult {
        key: key.to_string(),
        value: value.to_string(),
    })
}
