use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpsdeckError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Module not found: {id}")]
    ModuleNotFound { id: String },

    #[error("Session unavailable: {key}")]
    SessionUnavailable { key: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpsdeckError {
    /// Short error code string sent to clients in JSON error responses.
    pub fn code(&self) -> &'static str {
        match self {
            OpsdeckError::Config(_) => "CONFIG_ERROR",
            OpsdeckError::Database(_) => "DATABASE_ERROR",
            OpsdeckError::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            OpsdeckError::ModuleNotFound { .. } => "MODULE_NOT_FOUND",
            OpsdeckError::SessionUnavailable { .. } => "SESSION_UNAVAILABLE",
            OpsdeckError::Serialization(_) => "SERIALIZATION_ERROR",
            OpsdeckError::Io(_) => "IO_ERROR",
            OpsdeckError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            OpsdeckError::Timeout { .. } => "TIMEOUT",
            OpsdeckError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, OpsdeckError>;
