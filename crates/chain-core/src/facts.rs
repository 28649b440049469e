//! Fact providers resolve the dotted identifiers used in predicates such as
//! `hoursSinceLastCommand > 4` or `tests.passing == true`.
//!
//! Providers are built by the caller for each evaluation and passed in
//! explicitly; there is no process-wide fact state.

use crate::context::{ExecutionContext, Value};
use crate::error::{ChainError, Result};
use crate::paths;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::Path;

// ---------------------------------------------------------------------------
// FactProvider
// ---------------------------------------------------------------------------

/// Source of named facts. `Ok(None)` means "unknown"; the evaluator treats
/// both unknown facts and errors as a false predicate.
pub trait FactProvider: Send + Sync {
    fn fact(&self, name: &str) -> Result<Option<Value>>;
}

// ---------------------------------------------------------------------------
// MapFacts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct MapFacts {
    facts: BTreeMap<String, Value>,
}

impl MapFacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.facts.insert(name.into(), value.into());
    }
}

impl FactProvider for MapFacts {
    fn fact(&self, name: &str) -> Result<Option<Value>> {
        Ok(self.facts.get(name).cloned())
    }
}

// ---------------------------------------------------------------------------
// ContextFacts
// ---------------------------------------------------------------------------

/// Layers a run's context over another provider. Context variables resolve
/// both bare (`version`) and prefixed (`context.version`).
pub struct ContextFacts<'a> {
    pub context: &'a ExecutionContext,
    pub fallback: &'a dyn FactProvider,
}

impl FactProvider for ContextFacts<'_> {
    fn fact(&self, name: &str) -> Result<Option<Value>> {
        let key = name.strip_prefix("context.").unwrap_or(name);
        if let Some(v) = self.context.get(key) {
            return Ok(Some(v.clone()));
        }
        self.fallback.fact(name)
    }
}

// ---------------------------------------------------------------------------
// ProjectFacts
// ---------------------------------------------------------------------------

/// Facts for a project directory:
///
/// - `.chain/facts.yaml`, nested maps flattened to dotted names
/// - exported chain contexts `.chain/context/<chain>.yaml` as `<chain>.<key>`
/// - `env.<NAME>` from the process environment
/// - `hoursSinceLastCommand` / `minutesSinceLastCommand`, derived from the
///   last recorded chain activity (unknown when nothing has run yet)
#[derive(Debug, Clone, Default)]
pub struct ProjectFacts {
    facts: BTreeMap<String, Value>,
    last_command_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
}

impl ProjectFacts {
    /// Files that cannot be read or parsed are skipped with a warning, so
    /// the facts they would have provided stay unknown.
    pub fn load(root: &Path, last_command_at: Option<DateTime<Utc>>) -> Self {
        let mut facts = BTreeMap::new();

        let facts_file = paths::facts_path(root);
        if facts_file.exists() {
            if let Some(doc) = read_yaml(&facts_file) {
                flatten_into(&mut facts, "", &doc);
            }
        }

        let context_dir = paths::context_dir(root);
        let entries = match std::fs::read_dir(&context_dir) {
            Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(dir = %context_dir.display(), error = %e, "skipping context exports");
                Vec::new()
            }
        };
        for path in entries {
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let Some(chain) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(doc) = read_yaml(&path) {
                flatten_into(&mut facts, chain, &doc);
            }
        }

        Self {
            facts,
            last_command_at,
            now: Utc::now(),
        }
    }

    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    fn elapsed_minutes(&self) -> Option<f64> {
        self.last_command_at
            .map(|t| (self.now - t).num_seconds().max(0) as f64 / 60.0)
    }
}

impl FactProvider for ProjectFacts {
    fn fact(&self, name: &str) -> Result<Option<Value>> {
        match name {
            "hoursSinceLastCommand" => return Ok(self.elapsed_minutes().map(|m| Value::Number(m / 60.0))),
            "minutesSinceLastCommand" => return Ok(self.elapsed_minutes().map(Value::Number)),
            _ => {}
        }
        if let Some(var) = name.strip_prefix("env.") {
            return Ok(std::env::var(var).ok().map(Value::String));
        }
        Ok(self.facts.get(name).cloned())
    }
}

fn read_yaml(path: &Path) -> Option<serde_yaml::Value> {
    let parsed = std::fs::read_to_string(path)
        .map_err(ChainError::from)
        .and_then(|data| serde_yaml::from_str::<serde_yaml::Value>(&data).map_err(ChainError::from));
    match parsed {
        Ok(doc) => Some(doc),
        Err(e) => {
            tracing::warn!(file = %path.display(), error = %e, "ignoring unreadable facts file");
            None
        }
    }
}

fn flatten_into(out: &mut BTreeMap<String, Value>, prefix: &str, node: &serde_yaml::Value) {
    let join = |key: &str| {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    };
    match node {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    serde_yaml::Value::Number(n) => n.to_string(),
                    serde_yaml::Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                flatten_into(out, &join(&key), v);
            }
        }
        serde_yaml::Value::Bool(b) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), Value::Bool(*b));
        }
        serde_yaml::Value::Number(n) if !prefix.is_empty() => {
            if let Some(f) = n.as_f64() {
                out.insert(prefix.to_string(), Value::Number(f));
            }
        }
        serde_yaml::Value::String(s) if !prefix.is_empty() => {
            out.insert(prefix.to_string(), Value::String(s.clone()));
        }
        _ => {}
    }
}
