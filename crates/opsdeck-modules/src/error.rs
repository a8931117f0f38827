use thiserror::Error;

/// Errors from module loading, registration, and hooks.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// The manifest names a module implementation this build doesn't ship.
    #[error("unknown module kind: {kind}")]
    UnknownKind { kind: String },

    /// The module.toml manifest is missing fields or not valid TOML.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// A module's install hook failed.
    #[error("install failed: {0}")]
    Install(String),

    #[error("store error: {0}")]
    Store(#[from] opsdeck_tools::ToolStoreError),

    #[error("command error: {0}")]
    Command(#[from] opsdeck_terminal::TerminalError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ModuleError>;
