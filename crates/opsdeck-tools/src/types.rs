use serde::{Deserialize, Serialize};

use crate::error::ToolStoreError;

/// Installation state of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    NotInstalled,
    Installing,
    Installed,
    Error,
}

impl ToolStatus {
    /// Stable string stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolStatus::NotInstalled => "not_installed",
            ToolStatus::Installing => "installing",
            ToolStatus::Installed => "installed",
            ToolStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, ToolStoreError> {
        match s {
            "not_installed" => Ok(ToolStatus::NotInstalled),
            "installing" => Ok(ToolStatus::Installing),
            "installed" => Ok(ToolStatus::Installed),
            "error" => Ok(ToolStatus::Error),
            other => Err(ToolStoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted tool record.
///
/// `name` doubles as the primary key and the id of the module that owns
/// this tool. Rows are lazy-created by the registry sync pass and never
/// deleted by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub status: ToolStatus,
    /// Version last recorded by an install or sync pass.
    pub version: Option<String>,
    /// Free-form progress label shown during long installs.
    pub current_stage: Option<String>,
    /// Arbitrary module-owned configuration blob.
    pub config_data: serde_json::Value,
    /// RFC 3339, bumped on every write.
    pub last_updated: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_column_string() {
        for status in [
            ToolStatus::NotInstalled,
            ToolStatus::Installing,
            ToolStatus::Installed,
            ToolStatus::Error,
        ] {
            assert_eq!(ToolStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(ToolStatus::parse("half_installed").is_err());
    }
}
