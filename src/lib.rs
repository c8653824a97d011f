//! Tidemark - deadline and status tracking for client milestones.
//!
//! This library provides the core functionality for the `tm` CLI tool:
//! deadline computation, pause-aware status derivation, active-stage
//! resolution, and the auto-fail cascade with undo.

pub mod action_log;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod models;
pub mod storage;


/// Library-level error type for Tidemark operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not initialized: run `tm system init` first")]
    NotInitialized,

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Nothing to undo: {0}")]
    UndoUnavailable(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for Tidemark operations.
pub type Result<T> = std::result::Result<T, Error>;
