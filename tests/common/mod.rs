//! Common test utilities for tidemark integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/tidemark/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
use serde_json::Value;
pub use tempfile::TempDir;

/// Default pinned clock for tests.
pub const NOW: &str = "2026-02-24T12:00:00Z";

/// A test environment with isolated data storage.
///
/// The `tm()` method returns a `Command` with `TM_DATA_DIR`, `TM_NOW` and
/// `TM_SYSTEM_CONFIG` set per-invocation, making tests parallel-safe and
/// independent of the user's system config.
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and run `tm system init`.
    pub fn init() -> Self {
        let env = Self::new();
        env.tm().args(["system", "init"]).assert().success();
        env
    }

    /// Get a Command for the tm binary pinned to [`NOW`].
    pub fn tm(&self) -> Command {
        self.tm_at(NOW)
    }

    /// Get a Command for the tm binary pinned to `now`.
    pub fn tm_at(&self, now: &str) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tm"));
        cmd.env("TM_DATA_DIR", self.data_dir.path());
        cmd.env("TM_NOW", now);
        cmd.env(
            "TM_SYSTEM_CONFIG",
            self.data_dir.path().join("no-system-config.kdl"),
        );
        cmd.env_remove("TM_TIMEZONE");
        cmd.env_remove("TM_LOG");
        cmd
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }

    /// Run `tm client create` and return the JSON result.
    pub fn create_client(&self, signed_on: &str) -> Value {
        let output = self
            .tm()
            .args(["client", "create", signed_on])
            .output()
            .expect("Failed to run tm client create");
        assert!(output.status.success(), "client create failed: {:?}", output);
        parse_json(&output.stdout)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse JSON output from a command.
pub fn parse_json(output: &[u8]) -> Value {
    serde_json::from_slice(output).expect("Failed to parse JSON output")
}

/// Milestone id of `kind` (e.g. "day14", "month-3") in a `client create` result.
pub fn milestone_id(created: &Value, kind: &str) -> String {
    created["milestones"]
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["kind"] == kind)
        .unwrap_or_else(|| panic!("no {} milestone", kind))["id"]
        .as_str()
        .unwrap()
        .to_string()
}
