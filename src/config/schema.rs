//! KDL schema for config.kdl.
//!
//! This module provides:
//! - A Rust struct representing the KDL schema
//! - Serialization/deserialization to/from KDL format
//! - Validation
//! - Layer merging

use std::path::Path;

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};

use crate::engine::deadline::{self, RecurringBounds};
use crate::models::InitialKind;
use crate::{Error, Result};

/// Output format preference for CLI commands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// JSON output (default, machine-readable)
    #[default]
    Json,
    /// Human-readable output
    Human,
}

impl OutputFormat {
    /// Parse from string, case-insensitive.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "human" => Some(OutputFormat::Human),
            _ => None,
        }
    }

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Human => "human",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Settings stored in config.kdl.
///
/// # KDL Schema
///
/// ```kdl
/// timezone "America/Los_Angeles"
/// initial-offsets {
///     day1 1
///     day14 14
///     day30 30
/// }
/// recurring-min 2
/// recurring-max 12
/// undo-window-secs 600
/// output-format "human"  // or "json"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidemarkConfig {
    /// IANA timezone deadlines are computed in
    pub timezone: Option<String>,

    /// Day offsets per initial kind; kinds not listed keep built-in offsets
    pub initial_offsets: Vec<(InitialKind, u32)>,

    /// First month of the recurring series
    pub recurring_min: Option<u32>,

    /// Last month of the recurring series
    pub recurring_max: Option<u32>,

    /// How long the last status change stays undoable
    pub undo_window_secs: Option<u64>,

    /// Default output format for CLI commands
    pub output_format: Option<OutputFormat>,
}

/// Keys accepted by `tm config set`.
pub const CONFIG_KEYS: [&str; 6] = [
    "timezone",
    "initial-offsets",
    "recurring-min",
    "recurring-max",
    "undo-window-secs",
    "output-format",
];

impl TidemarkConfig {
    /// Create an empty config with no values set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the values this layer sets on its own.
    pub fn validate(&self) -> Result<()> {
        if let Some(ref tz) = self.timezone {
            deadline::parse_timezone(tz)?;
        }
        if self.recurring_min == Some(0) {
            return Err(Error::Config("recurring-min must be at least 1, got 0".to_string()));
        }
        if let (Some(min), Some(max)) = (self.recurring_min, self.recurring_max) {
            RecurringBounds::new(min, max)?;
        }
        Ok(())
    }

    /// Parse config from a KDL document.
    ///
    /// Unknown initial kinds and wrongly typed values are configuration errors;
    /// unknown top-level nodes are ignored.
    pub fn from_kdl(doc: &KdlDocument) -> Result<Self> {
        let mut config = Self::new();

        if let Some(node) = doc.get("timezone") {
            config.timezone = Some(string_arg(node)?);
        }

        if let Some(node) = doc.get("initial-offsets") {
            if let Some(children) = node.children() {
                for child in children.nodes() {
                    let name = child.name().value();
                    let kind = InitialKind::parse(name).ok_or_else(|| {
                        Error::Config(format!("Unknown initial kind in initial-offsets: {}", name))
                    })?;
                    config.initial_offsets.push((kind, u32_arg(child)?));
                }
            }
        }

        if let Some(node) = doc.get("recurring-min") {
            config.recurring_min = Some(u32_arg(node)?);
        }
        if let Some(node) = doc.get("recurring-max") {
            config.recurring_max = Some(u32_arg(node)?);
        }
        if let Some(node) = doc.get("undo-window-secs") {
            config.undo_window_secs = Some(u64::from(u32_arg(node)?));
        }

        if let Some(node) = doc.get("output-format") {
            let s = string_arg(node)?;
            config.output_format = Some(OutputFormat::parse(&s).ok_or_else(|| {
                Error::Config(format!("output-format must be json or human, got {}", s))
            })?);
        }

        Ok(config)
    }

    /// Convert config to a KDL document.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();

        if let Some(ref tz) = self.timezone {
            doc.nodes_mut().push(node_with("timezone", KdlValue::String(tz.clone())));
        }

        if !self.initial_offsets.is_empty() {
            let mut node = KdlNode::new("initial-offsets");
            let mut children = KdlDocument::new();
            for (kind, days) in &self.initial_offsets {
                children
                    .nodes_mut()
                    .push(node_with(kind.as_str(), KdlValue::Integer(*days as i128)));
            }
            *node.children_mut() = Some(children);
            doc.nodes_mut().push(node);
        }

        if let Some(min) = self.recurring_min {
            doc.nodes_mut().push(node_with("recurring-min", KdlValue::Integer(min as i128)));
        }
        if let Some(max) = self.recurring_max {
            doc.nodes_mut().push(node_with("recurring-max", KdlValue::Integer(max as i128)));
        }
        if let Some(secs) = self.undo_window_secs {
            doc.nodes_mut()
                .push(node_with("undo-window-secs", KdlValue::Integer(secs as i128)));
        }

        if let Some(ref format) = self.output_format {
            doc.nodes_mut().push(node_with(
                "output-format",
                KdlValue::String(format.as_str().to_string()),
            ));
        }

        doc
    }

    /// Merge another config into this one.
    /// Values from `other` override values in `self` if they are set.
    pub fn merge(&mut self, other: &TidemarkConfig) {
        if other.timezone.is_some() {
            self.timezone = other.timezone.clone();
        }
        for (kind, days) in &other.initial_offsets {
            self.initial_offsets.retain(|(k, _)| k != kind);
            self.initial_offsets.push((*kind, *days));
        }
        if other.recurring_min.is_some() {
            self.recurring_min = other.recurring_min;
        }
        if other.recurring_max.is_some() {
            self.recurring_max = other.recurring_max;
        }
        if other.undo_window_secs.is_some() {
            self.undo_window_secs = other.undo_window_secs;
        }
        if other.output_format.is_some() {
            self.output_format = other.output_format.clone();
        }
    }

    /// Set one key from its command-line string form.
    ///
    /// `initial-offsets` takes `kind=days` pairs separated by commas,
    /// e.g. `day1=1,day14=10,day30=30`.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "timezone" => {
                deadline::parse_timezone(value)?;
                self.timezone = Some(value.to_string());
            }
            "initial-offsets" => {
                let mut entries = Vec::new();
                for pair in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    let (name, days) = pair.split_once('=').ok_or_else(|| {
                        Error::InvalidInput(format!("Expected kind=days, got {}", pair))
                    })?;
                    let kind = InitialKind::parse(name.trim()).ok_or_else(|| {
                        Error::Config(format!("Unknown initial kind in initial-offsets: {}", name))
                    })?;
                    entries.push((kind, parse_u32(key, days.trim())?));
                }
                self.initial_offsets = entries;
            }
            "recurring-min" => self.recurring_min = Some(parse_u32(key, value)?),
            "recurring-max" => self.recurring_max = Some(parse_u32(key, value)?),
            "undo-window-secs" => self.undo_window_secs = Some(u64::from(parse_u32(key, value)?)),
            "output-format" => {
                self.output_format = Some(OutputFormat::parse(value).ok_or_else(|| {
                    Error::InvalidInput(format!("output-format must be json or human, got {}", value))
                })?);
            }
            _ => {
                return Err(Error::InvalidInput(format!(
                    "Unknown config key: {} (expected one of: {})",
                    key,
                    CONFIG_KEYS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn node_with(name: &str, value: KdlValue) -> KdlNode {
    let mut node = KdlNode::new(name);
    node.push(KdlEntry::new(value));
    node
}

fn string_arg(node: &KdlNode) -> Result<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            Error::Config(format!("{} expects a string value", node.name().value()))
        })
}

fn u32_arg(node: &KdlNode) -> Result<u32> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_integer())
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| {
            Error::Config(format!(
                "{} expects a non-negative integer value",
                node.name().value()
            ))
        })
}

fn parse_u32(key: &str, value: &str) -> Result<u32> {
    value
        .parse::<u32>()
        .map_err(|_| Error::InvalidInput(format!("{} expects a non-negative integer, got {}", key, value)))
}

/// Load a config file. A missing file is an empty config.
pub fn load_config_file(path: &Path) -> Result<TidemarkConfig> {
    if !path.exists() {
        return Ok(TidemarkConfig::new());
    }

    let content = std::fs::read_to_string(path)?;
    let doc: KdlDocument = content
        .parse()
        .map_err(|e| Error::Config(format!("Failed to parse KDL in {}: {}", path.display(), e)))?;

    TidemarkConfig::from_kdl(&doc)
}

/// Write a config file, creating parent directories as needed.
pub fn save_config_file(path: &Path, config: &TidemarkConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, config.to_kdl().to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("HUMAN"), Some(OutputFormat::Human));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }

    #[test]
    fn test_config_from_kdl_empty() {
        let doc: KdlDocument = "".parse().unwrap();
        let config = TidemarkConfig::from_kdl(&doc).unwrap();
        assert_eq!(config, TidemarkConfig::default());
    }

    #[test]
    fn test_config_from_kdl_full() {
        let kdl = r#"
            timezone "America/Los_Angeles"
            initial-offsets {
                day1 1
                day14 10
                day30 30
            }
            recurring-min 2
            recurring-max 6
            undo-window-secs 30
            output-format "human"
        "#;
        let doc: KdlDocument = kdl.parse().unwrap();
        let config = TidemarkConfig::from_kdl(&doc).unwrap();

        assert_eq!(config.timezone.as_deref(), Some("America/Los_Angeles"));
        assert_eq!(
            config.initial_offsets,
            vec![
                (InitialKind::Day1, 1),
                (InitialKind::Day14, 10),
                (InitialKind::Day30, 30)
            ]
        );
        assert_eq!(config.recurring_min, Some(2));
        assert_eq!(config.recurring_max, Some(6));
        assert_eq!(config.undo_window_secs, Some(30));
        assert_eq!(config.output_format, Some(OutputFormat::Human));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_unknown_initial_kind_is_config_error() {
        let doc: KdlDocument = "initial-offsets {\n    day10 10\n}\n".parse().unwrap();
        let err = TidemarkConfig::from_kdl(&doc).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_config_validate_rejects_bad_timezone() {
        let config = TidemarkConfig {
            timezone: Some("Nowhere/Special".to_string()),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_to_kdl_roundtrip() {
        let config = TidemarkConfig {
            timezone: Some("Europe/Berlin".to_string()),
            initial_offsets: vec![(InitialKind::Day14, 10)],
            recurring_min: Some(3),
            recurring_max: Some(9),
            undo_window_secs: Some(120),
            output_format: Some(OutputFormat::Json),
        };
        let text = config.to_kdl().to_string();
        let doc: KdlDocument = text.parse().unwrap();
        assert_eq!(TidemarkConfig::from_kdl(&doc).unwrap(), config);
    }

    #[test]
    fn test_config_merge() {
        let mut base = TidemarkConfig {
            timezone: Some("UTC".to_string()),
            initial_offsets: vec![(InitialKind::Day1, 2), (InitialKind::Day14, 14)],
            recurring_max: Some(12),
            ..Default::default()
        };
        let other = TidemarkConfig {
            timezone: Some("Asia/Tokyo".to_string()),
            initial_offsets: vec![(InitialKind::Day14, 10)],
            ..Default::default()
        };
        base.merge(&other);
        assert_eq!(base.timezone.as_deref(), Some("Asia/Tokyo"));
        assert_eq!(
            base.initial_offsets,
            vec![(InitialKind::Day1, 2), (InitialKind::Day14, 10)]
        );
        assert_eq!(base.recurring_max, Some(12)); // Not overridden
    }

    #[test]
    fn test_set_key() {
        let mut config = TidemarkConfig::new();
        config.set_key("timezone", "America/New_York").unwrap();
        config.set_key("initial-offsets", "day1=1, day14=10").unwrap();
        config.set_key("undo-window-secs", "45").unwrap();
        assert_eq!(config.timezone.as_deref(), Some("America/New_York"));
        assert_eq!(config.initial_offsets.len(), 2);
        assert_eq!(config.undo_window_secs, Some(45));

        assert!(config.set_key("timezone", "Bogus/Zone").is_err());
        assert!(config.set_key("initial-offsets", "day14=forty").is_err());
        assert!(config.set_key("initial-offsets", "day10=3").is_err());
        assert!(config.set_key("colour", "blue").is_err());
        // Failed sets leave earlier values in place
        assert_eq!(config.timezone.as_deref(), Some("America/New_York"));
    }

    #[test]
    fn test_load_and_save_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.kdl");
        assert_eq!(load_config_file(&path).unwrap(), TidemarkConfig::default());

        let config = TidemarkConfig {
            timezone: Some("America/Los_Angeles".to_string()),
            ..Default::default()
        };
        save_config_file(&path, &config).unwrap();
        assert_eq!(load_config_file(&path).unwrap(), config);
    }
}
