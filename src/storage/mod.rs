//! Storage layer for Tidemark data.
//!
//! This module handles persistence of clients and milestones.
//!
//! Layout of a data directory:
//! - JSONL files for append-only data (`clients.jsonl`, `milestones.jsonl`);
//!   the latest line for an id wins
//! - SQLite for indexed queries (`cache.db`), rebuildable from the JSONL files
//! - `config.kdl` for workspace settings
//! - `session.json` for the CLI's cascade tracker and last undoable change

pub mod session;

pub use session::SessionState;

use crate::config::{TidemarkConfig, load_config_file, save_config_file};
use crate::engine::MilestoneMutation;
use crate::models::{Client, Milestone};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "TM_DATA_DIR";

/// Environment variable overriding the system config.kdl path.
pub const SYSTEM_CONFIG_ENV: &str = "TM_SYSTEM_CONFIG";

/// ID prefix for clients.
pub const CLIENT_PREFIX: &str = "tmc";

/// ID prefix for milestones.
pub const MILESTONE_PREFIX: &str = "tme";

const CLIENTS_FILE: &str = "clients.jsonl";
const MILESTONES_FILE: &str = "milestones.jsonl";

/// Per-id result of writing a batch of milestone mutations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    /// Ids written successfully
    pub applied: Vec<String>,
    /// Ids that could not be written
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Storage manager for a single data directory.
pub struct Storage {
    /// Root directory holding the data files
    pub root: PathBuf,
    /// SQLite connection for indexed queries
    conn: Connection,
}

impl Storage {
    /// Open existing storage.
    pub fn open(root: &Path) -> Result<Self> {
        if !Self::exists(root)? {
            return Err(Error::NotInitialized);
        }

        let conn = Connection::open(root.join("cache.db"))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            root: root.to_path_buf(),
            conn,
        })
    }

    /// Initialize storage in a data directory. Existing data is kept.
    pub fn init(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;

        for file in [CLIENTS_FILE, MILESTONES_FILE] {
            let path = root.join(file);
            if !path.exists() {
                File::create(&path)?;
            }
        }

        let conn = Connection::open(root.join("cache.db"))?;
        Self::init_schema(&conn)?;

        Ok(Self {
            root: root.to_path_buf(),
            conn,
        })
    }

    /// Check if storage exists in a data directory.
    pub fn exists(root: &Path) -> Result<bool> {
        Ok(root.exists() && root.join("cache.db").exists())
    }

    /// Initialize the SQLite schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS clients (
                id TEXT PRIMARY KEY,
                name TEXT,
                signed_on TEXT NOT NULL,
                initial_intake_date TEXT,
                paused INTEGER NOT NULL DEFAULT 0,
                pause_started_at TEXT,
                paused_total_secs INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS milestones (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                family TEXT NOT NULL,
                order_key INTEGER NOT NULL,
                raw_status TEXT NOT NULL DEFAULT 'pending',
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_clients_paused ON clients(paused);
            CREATE INDEX IF NOT EXISTS idx_milestones_client ON milestones(client_id);
            CREATE INDEX IF NOT EXISTS idx_milestones_status ON milestones(raw_status);

            -- Configuration table
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;

        // Run migrations for schema changes
        Self::run_migrations(conn)?;

        Ok(())
    }

    /// Run database migrations for schema changes.
    /// This handles adding new columns to existing databases.
    fn run_migrations(conn: &Connection) -> Result<()> {
        // SQLite doesn't support IF NOT EXISTS for ALTER TABLE, so check the schema first
        let has_custom_due: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_table_info('milestones') WHERE name = 'custom_due_at'",
                [],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !has_custom_due {
            conn.execute("ALTER TABLE milestones ADD COLUMN custom_due_at TEXT", [])?;
        }

        Ok(())
    }

    /// Rebuild the SQLite cache from JSONL files.
    pub fn rebuild_cache(&mut self) -> Result<RebuildStats> {
        self.conn.execute_batch(
            r#"
            DELETE FROM milestones;
            DELETE FROM clients;
            "#,
        )?;

        let clients = self.latest_clients()?;
        for client in clients.values() {
            self.cache_client(client)?;
        }

        let milestones = self.latest_milestones()?;
        for milestone in milestones.values() {
            self.cache_milestone(milestone)?;
        }

        info!(
            clients = clients.len(),
            milestones = milestones.len(),
            "rebuilt cache"
        );
        Ok(RebuildStats {
            clients: clients.len(),
            milestones: milestones.len(),
        })
    }

    /// Cache a client in SQLite for fast querying.
    fn cache_client(&self, client: &Client) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO clients
            (id, name, signed_on, initial_intake_date, paused, pause_started_at,
             paused_total_secs, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                client.id,
                client.name,
                client.signed_on.to_string(),
                client.initial_intake_date.map(|d| d.to_string()),
                client.paused,
                client.pause_started_at.map(|t| t.to_rfc3339()),
                client.paused_total_secs,
                client.created_at.to_rfc3339(),
                client.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Cache a milestone in SQLite for fast querying.
    fn cache_milestone(&self, milestone: &Milestone) -> Result<()> {
        let family = serde_json::to_value(milestone.kind.family())?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO milestones
            (id, client_id, kind, family, order_key, raw_status, completed_at,
             custom_due_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
            params![
                milestone.id,
                milestone.client_id,
                milestone.kind.to_string(),
                family.as_str().unwrap_or_default(),
                milestone.kind.order_key(),
                milestone.raw_status.as_str(),
                milestone.completed_at.map(|t| t.to_rfc3339()),
                milestone.custom_due_at.map(|t| t.to_rfc3339()),
                milestone.created_at.to_rfc3339(),
                milestone.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Client Operations ===

    /// Create a client together with its full milestone set.
    ///
    /// All lines are written with a single append per file, so a client is
    /// never persisted without its milestones.
    pub fn create_client(&mut self, client: &Client, milestones: &[Milestone]) -> Result<()> {
        if self.get_client(&client.id).is_ok() {
            return Err(Error::InvalidInput(format!(
                "Client already exists: {}",
                client.id
            )));
        }

        append_lines(&self.root.join(MILESTONES_FILE), milestones)?;
        append_lines(&self.root.join(CLIENTS_FILE), std::slice::from_ref(client))?;

        self.cache_client(client)?;
        for milestone in milestones {
            self.cache_milestone(milestone)?;
        }
        Ok(())
    }

    /// Get a client by ID.
    pub fn get_client(&self, id: &str) -> Result<Client> {
        self.latest_clients()?
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Client not found: {}", id)))
    }

    /// List clients, optionally filtered by pause state, oldest first.
    pub fn list_clients(&self, paused: Option<bool>) -> Result<Vec<Client>> {
        let mut sql = String::from("SELECT id FROM clients WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(p) = paused {
            sql.push_str(" AND paused = ?");
            params_vec.push(Box::new(p));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        let ids = self.query_ids(&sql, &params_vec)?;
        let mut latest = self.latest_clients()?;
        Ok(ids.iter().filter_map(|id| latest.remove(id)).collect())
    }

    /// Update a client.
    pub fn update_client(&mut self, client: &Client) -> Result<()> {
        self.get_client(&client.id)?;

        append_lines(&self.root.join(CLIENTS_FILE), std::slice::from_ref(client))?;
        self.cache_client(client)?;

        Ok(())
    }

    // === Milestone Operations ===

    /// Add milestones to an existing client.
    pub fn add_milestones(&mut self, milestones: &[Milestone]) -> Result<()> {
        for milestone in milestones {
            self.get_client(&milestone.client_id)?;
        }

        append_lines(&self.root.join(MILESTONES_FILE), milestones)?;
        for milestone in milestones {
            self.cache_milestone(milestone)?;
        }
        Ok(())
    }

    /// Get a milestone by ID.
    pub fn get_milestone(&self, id: &str) -> Result<Milestone> {
        self.latest_milestones()?
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("Milestone not found: {}", id)))
    }

    /// List milestones, optionally for one client, in sequence order.
    pub fn list_milestones(&self, client_id: Option<&str>) -> Result<Vec<Milestone>> {
        let mut sql = String::from("SELECT id FROM milestones WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(c) = client_id {
            sql.push_str(" AND client_id = ?");
            params_vec.push(Box::new(c.to_string()));
        }

        sql.push_str(" ORDER BY client_id ASC, family ASC, order_key ASC, id ASC");

        let ids = self.query_ids(&sql, &params_vec)?;
        let mut latest = self.latest_milestones()?;
        Ok(ids.iter().filter_map(|id| latest.remove(id)).collect())
    }

    /// Update a milestone.
    pub fn update_milestone(&mut self, milestone: &Milestone) -> Result<()> {
        self.get_milestone(&milestone.id)?;

        append_lines(
            &self.root.join(MILESTONES_FILE),
            std::slice::from_ref(milestone),
        )?;
        self.cache_milestone(milestone)?;

        Ok(())
    }

    /// Persist a batch of planned status writes.
    ///
    /// Each id succeeds or fails on its own: a missing milestone or a failed
    /// write is recorded in the outcome and the remaining writes still happen.
    pub fn apply_mutations(
        &mut self,
        mutations: &[MilestoneMutation],
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome> {
        let mut latest = self.latest_milestones()?;
        let mut outcome = BatchOutcome::default();

        for mutation in mutations {
            let id = &mutation.milestone_id;
            let Some(milestone) = latest.get_mut(id) else {
                warn!(milestone = %id, "mutation target not found");
                outcome.failed.push(BatchFailure {
                    id: id.clone(),
                    error: format!("Milestone not found: {}", id),
                });
                continue;
            };

            mutation.apply(milestone, now);
            let written = append_lines(
                &self.root.join(MILESTONES_FILE),
                std::slice::from_ref(&*milestone),
            )
            .and_then(|_| self.cache_milestone(milestone));

            match written {
                Ok(()) => {
                    info!(
                        milestone = %id,
                        raw_status = %mutation.raw_status,
                        reason = ?mutation.reason,
                        "milestone status written"
                    );
                    outcome.applied.push(id.clone());
                }
                Err(e) => {
                    warn!(milestone = %id, error = %e, "milestone write failed");
                    outcome.failed.push(BatchFailure {
                        id: id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(outcome)
    }

    /// Generate an id with `prefix` not already used by any client or milestone.
    pub fn unique_id(&self, prefix: &str, seed: &str, reserved: &HashSet<String>) -> Result<String> {
        let mut taken: HashSet<String> = self.latest_clients()?.into_keys().collect();
        taken.extend(self.latest_milestones()?.into_keys());

        for attempt in 0..1024u32 {
            let id = generate_id(prefix, &format!("{}:{}", seed, attempt));
            if !taken.contains(&id) && !reserved.contains(&id) {
                return Ok(id);
            }
        }
        Err(Error::Other(format!("Could not allocate a {} id", prefix)))
    }

    /// Get the root storage directory path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn query_ids(&self, sql: &str, params_vec: &[Box<dyn rusqlite::ToSql>]) -> Result<Vec<String>> {
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();

        let mut stmt = self.conn.prepare(sql)?;
        let ids: Vec<String> = stmt
            .query_map(params_refs.as_slice(), |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    fn latest_clients(&self) -> Result<HashMap<String, Client>> {
        let clients: Vec<Client> = read_jsonl(&self.root.join(CLIENTS_FILE))?;
        Ok(clients
            .into_iter()
            .filter(|c| c.entity_type == "client")
            .map(|c| (c.id.clone(), c))
            .collect())
    }

    fn latest_milestones(&self) -> Result<HashMap<String, Milestone>> {
        let milestones: Vec<Milestone> = read_jsonl(&self.root.join(MILESTONES_FILE))?;
        Ok(milestones
            .into_iter()
            .filter(|m| m.entity_type == "milestone")
            .map(|m| (m.id.clone(), m))
            .collect())
    }

    // === Config Operations ===

    /// Get a configuration value.
    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self
            .conn
            .query_row("SELECT value FROM config WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .ok();
        Ok(value)
    }

    /// Set a configuration value.
    pub fn set_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// List all configuration values.
    pub fn list_configs(&self) -> Result<Vec<(String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM config ORDER BY key")?;
        let configs: Vec<(String, String)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(configs)
    }

    // === config.kdl ===

    /// Path of the workspace config.kdl.
    pub fn config_kdl_path(&self) -> PathBuf {
        self.root.join("config.kdl")
    }

    /// Read the workspace config.kdl, empty if absent.
    pub fn read_config(&self) -> Result<TidemarkConfig> {
        load_config_file(&self.config_kdl_path())
    }

    /// Write the workspace config.kdl.
    pub fn write_config(&self, config: &TidemarkConfig) -> Result<()> {
        save_config_file(&self.config_kdl_path(), config)
    }

    /// Path of the system config.kdl.
    pub fn system_config_kdl_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(SYSTEM_CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }
        dirs::config_dir().map(|d| d.join("tidemark").join("config.kdl"))
    }

    /// Read the system config.kdl, empty if absent.
    pub fn read_system_config() -> Result<TidemarkConfig> {
        match Self::system_config_kdl_path() {
            Some(path) => load_config_file(&path),
            None => Ok(TidemarkConfig::new()),
        }
    }

    // === Session state ===

    /// Path of the CLI session file.
    pub fn session_path(&self) -> PathBuf {
        self.root.join("session.json")
    }

    /// Load the CLI session state, empty if absent.
    pub fn load_session(&self) -> Result<SessionState> {
        SessionState::load(&self.session_path())
    }

    /// Save the CLI session state.
    pub fn save_session(&self, session: &SessionState) -> Result<()> {
        session.save(&self.session_path())
    }
}

/// Counts reported by [`Storage::rebuild_cache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RebuildStats {
    pub clients: usize,
    pub milestones: usize,
}

/// Resolve the data directory: explicit path, then `TM_DATA_DIR`, then
/// `~/.local/share/tidemark`.
pub fn get_storage_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Ok(path) = std::env::var(DATA_DIR_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let data_dir = dirs::data_dir()
        .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?;
    Ok(data_dir.join("tidemark"))
}

fn append_lines<T: Serialize>(path: &Path, items: &[T]) -> Result<()> {
    if items.is_empty() {
        return Ok(());
    }
    let mut buf = String::new();
    for item in items {
        buf.push_str(&serde_json::to_string(item)?);
        buf.push('\n');
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(buf.as_bytes())?;
    Ok(())
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let reader = BufReader::new(File::open(path)?);
    let mut items = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(&line) {
            Ok(item) => items.push(item),
            Err(e) => warn!(
                file = %path.display(),
                line = lineno + 1,
                error = %e,
                "skipping malformed line"
            ),
        }
    }
    Ok(items)
}

/// Generate an ID.
///
/// Format: `<prefix>-<4 hex chars>`
/// - Client prefix: "tmc"
/// - Milestone prefix: "tme"
///
/// Each prefix has 65,536 ids. With 14 milestones per client the milestone
/// space is the binding one, about 4,600 clients. [`Storage::unique_id`]
/// gives up after 1,024 collisions, which gets likely as the space fills.
pub fn generate_id(prefix: &str, seed: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    hasher.update(
        chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .to_le_bytes(),
    );
    let hash = hasher.finalize();
    let hash_hex = format!("{:x}", hash);
    format!("{}-{}", prefix, &hash_hex[..4])
}

/// Validate that an ID matches the expected format.
pub fn validate_id(id: &str, prefix: &str) -> Result<()> {
    if !id.starts_with(&format!("{}-", prefix)) {
        return Err(Error::InvalidId(format!(
            "ID must start with '{}-', got: {}",
            prefix, id
        )));
    }

    let suffix = &id[prefix.len() + 1..];
    if suffix.len() != 4 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidId(format!(
            "ID suffix must be 4 hex characters, got: {}",
            suffix
        )));
    }

    Ok(())
}

/// Validate a client ID (tmc-xxxx format).
pub fn validate_client_id(id: &str) -> Result<()> {
    validate_id(id, CLIENT_PREFIX)
}

/// Validate a milestone ID (tme-xxxx format).
pub fn validate_milestone_id(id: &str) -> Result<()> {
    validate_id(id, MILESTONE_PREFIX)
}
