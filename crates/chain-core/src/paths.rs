use crate::error::{ChainError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const CHAIN_DIR: &str = ".chain";
pub const CONTEXT_DIR: &str = ".chain/context";

pub const CONFIG_FILE: &str = ".chain/config.yaml";
pub const FACTS_FILE: &str = ".chain/facts.yaml";
pub const LEDGER_FILE: &str = ".chain/ledger.db";

/// Definition files tried in order when none is configured.
pub const DEFINITION_FILES: &[&str] = &[".chain/chains.yaml", ".chain/chains.yml", ".chain/chains.json"];

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn facts_path(root: &Path) -> PathBuf {
    root.join(FACTS_FILE)
}

pub fn ledger_path(root: &Path) -> PathBuf {
    root.join(LEDGER_FILE)
}

pub fn context_dir(root: &Path) -> PathBuf {
    root.join(CONTEXT_DIR)
}

pub fn context_export_path(root: &Path, chain: &str) -> PathBuf {
    context_dir(root).join(format!("{chain}.yaml"))
}

/// Locate the chain definitions file: an explicit path (relative to `root`
/// unless absolute) or the first existing default.
pub fn definitions_path(root: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(p) = explicit {
        let p = if p.is_absolute() { p.to_path_buf() } else { root.join(p) };
        if p.exists() {
            return Ok(p);
        }
        return Err(ChainError::DefinitionsNotFound(p.display().to_string()));
    }
    DEFINITION_FILES
        .iter()
        .map(|f| root.join(f))
        .find(|p| p.exists())
        .ok_or_else(|| ChainError::DefinitionsNotFound(root.join(DEFINITION_FILES[0]).display().to_string()))
}

// ---------------------------------------------------------------------------
// Chain name validation
// ---------------------------------------------------------------------------

static NAME_RE: OnceLock<Regex> = OnceLock::new();

fn name_re() -> &'static Regex {
    NAME_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-_]*$").unwrap())
}

/// Chain names double as file stems and CLI subcommands.
pub fn validate_chain_name(name: &str) -> Result<()> {
    if name.len() > 64 || !name_re().is_match(name) {
        return Err(ChainError::config(
            name,
            "name",
            "must be lowercase alphanumeric with '-' or '_'",
        ));
    }
    if RESERVED_NAMES.contains(&name) {
        return Err(ChainError::config(
            name,
            "name",
            "collides with a built-in command",
        ));
    }
    Ok(())
}

pub const RESERVED_NAMES: &[&str] = &["check", "list", "status", "show", "validate", "reconcile", "help"];

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
