use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Engine settings from `.chain/config.yaml`. Every field has a default, so
/// a missing file is equivalent to an empty one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Per-step command timeout. `0` disables the limit.
    #[serde(default = "default_step_timeout")]
    pub step_timeout_seconds: u64,
    /// Timeout for `exec:` predicates.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_seconds: u64,
    /// Timeout for shell `on-success` / `on-failure` handlers.
    #[serde(default = "default_handler_timeout")]
    pub handler_timeout_seconds: u64,
    /// Deepest allowed nesting of chains started from handlers.
    #[serde(default = "default_max_depth")]
    pub max_chain_depth: u32,
    /// Rows shown per section by `chain status`.
    #[serde(default = "default_status_limit")]
    pub status_limit: usize,
    /// Per-stream cap on captured step output; the tail is kept.
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Definitions file, relative to the project root.
    #[serde(default)]
    pub chains_file: Option<PathBuf>,
}

fn default_step_timeout() -> u64 {
    600
}

fn default_exec_timeout() -> u64 {
    30
}

fn default_handler_timeout() -> u64 {
    600
}

fn default_max_depth() -> u32 {
    5
}

fn default_status_limit() -> usize {
    5
}

fn default_max_output() -> usize {
    10 * 1024
}

impl Default for Config {
    fn default() -> Self {
        Self {
            step_timeout_seconds: default_step_timeout(),
            exec_timeout_seconds: default_exec_timeout(),
            handler_timeout_seconds: default_handler_timeout(),
            max_chain_depth: default_max_depth(),
            status_limit: default_status_limit(),
            max_output_bytes: default_max_output(),
            chains_file: None,
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&data)?)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        non_zero(self.step_timeout_seconds)
    }

    pub fn exec_timeout(&self) -> Option<Duration> {
        non_zero(self.exec_timeout_seconds)
    }

    pub fn handler_timeout(&self) -> Option<Duration> {
        non_zero(self.handler_timeout_seconds)
    }
}

fn non_zero(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.max_chain_depth, 5);
        assert_eq!(config.status_limit, 5);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".chain")).unwrap();
        std::fs::write(
            dir.path().join(".chain/config.yaml"),
            "step_timeout_seconds: 0\nmax_chain_depth: 2\n",
        )
        .unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.step_timeout(), None);
        assert_eq!(config.max_chain_depth, 2);
        assert_eq!(config.exec_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".chain")).unwrap();
        std::fs::write(dir.path().join(".chain/config.yaml"), "step_timeout: 5\n").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }
}
