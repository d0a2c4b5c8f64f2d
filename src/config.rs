use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::attendance::TotalKey;
use crate::grouping::GapRule;
use crate::models::AttendanceStatus;

pub const CONFIG_PATH_VAR: &str = "RESERVATION_REPORTS_CONFIG";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Overridden by `DATABASE_URL` when that is set.
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub gap_rule: GapRule,
    pub total_key: TotalKey,
    /// Status that counts as attended in the monthly matrix.
    pub attended_status: AttendanceStatus,
    /// Page size used when the caller does not pass one.
    pub default_page_size: Option<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
            gap_rule: GapRule::default(),
            total_key: TotalKey::default(),
            attended_status: AttendanceStatus::Attended,
            default_page_size: None,
        }
    }
}

impl Config {
    /// Resolves the config file from, in order: the explicit path, the
    /// `RESERVATION_REPORTS_CONFIG` variable, built-in defaults. The database
    /// URL from the environment wins over the file.
    pub fn load(explicit_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_PATH_VAR).map(PathBuf::from));

        let config = match path {
            Some(path) => Self::load_from(&path)?,
            None => Self::default(),
        };
        Ok(config.with_database_url(std::env::var(DATABASE_URL_VAR).ok()))
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn with_database_url(mut self, database_url: Option<String>) -> Self {
        if let Some(url) = database_url.filter(|url| !url.trim().is_empty()) {
            self.database_url = Some(url);
        }
        self
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to a production Postgres instance")
    }
}
