use thiserror::Error;

/// Errors that can occur during tool-store operations.
#[derive(Debug, Error)]
pub enum ToolStoreError {
    /// No tool row exists for the given name.
    #[error("tool not found: {name}")]
    NotFound { name: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The `status` column holds a string outside the known set.
    #[error("invalid tool status: {0}")]
    InvalidStatus(String),

    /// The `config_data` column is not valid JSON.
    #[error("config blob error: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolStoreError>;
