//! Chain definitions and the registry that indexes them by name.
//!
//! Definitions are read from YAML or JSON:
//!
//! ```yaml
//! full-cycle:
//!   description: Build, test and tag
//!   triggers:
//!     conditions: { all: ["hoursSinceLastCommand > 4", "exists(Cargo.toml)"] }
//!     prompt: Run the full cycle?
//!   prerequisites:
//!     all: ["exists(Cargo.toml)"]
//!     error: not a cargo project
//!   steps:
//!     - command: cargo build
//!     - command: git describe --tags
//!       context: { save: [version] }
//!     - command: ./publish.sh {{version}}
//!       condition: "env.PUBLISH == yes"
//!   on-success: /chain notify
//!   on-failure: echo failed >> .chain/failures.log
//!   context: { save: [version] }
//! ```

use crate::condition::{ConditionExpr, RawCondition};
use crate::error::{ChainError, Result};
use crate::extract::SaveRule;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

// ---------------------------------------------------------------------------
// Definition types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trigger {
    pub conditions: ConditionExpr,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prerequisites {
    pub expr: ConditionExpr,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<ConditionExpr>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_save: Vec<SaveRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainDefinition {
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggers: Option<Trigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prerequisites: Option<Prerequisites>,
    pub steps: Vec<Step>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context_save: Vec<String>,
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// What an `on-success` / `on-failure` string asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Handler {
    /// `/chain <name> [key=value ...]` or `chain <name> ...`: run another chain
    /// in-process, seeding its context from the arguments.
    Chain { name: String, args: Vec<String> },
    /// Anything else runs through the shell.
    Shell(String),
}

impl Handler {
    pub fn parse(command: &str) -> Self {
        let mut words = command.split_whitespace();
        match (words.next(), words.next()) {
            (Some("/chain") | Some("chain"), Some(name))
                if !paths::RESERVED_NAMES.contains(&name) && !name.starts_with('-') =>
            {
                Handler::Chain {
                    name: name.to_string(),
                    args: words.map(str::to_string).collect(),
                }
            }
            _ => Handler::Shell(command.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw (file) shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChain {
    #[serde(default)]
    description: String,
    #[serde(default)]
    triggers: Option<RawTriggers>,
    #[serde(default)]
    prerequisites: Option<RawPrerequisites>,
    #[serde(default)]
    steps: Vec<RawStep>,
    #[serde(default, rename = "on-success", alias = "onSuccess", alias = "on_success")]
    on_success: Option<String>,
    #[serde(default, rename = "on-failure", alias = "onFailure", alias = "on_failure")]
    on_failure: Option<String>,
    #[serde(default)]
    context: Option<RawContext>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTriggers {
    conditions: RawCondition,
    #[serde(default)]
    prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPrerequisites {
    #[serde(default)]
    all: Option<Vec<RawCondition>>,
    #[serde(default)]
    any: Option<Vec<RawCondition>>,
    #[serde(default)]
    none: Option<Vec<RawCondition>>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    command: String,
    #[serde(default)]
    condition: Option<RawCondition>,
    #[serde(default)]
    context: Option<RawContext>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawContext {
    #[serde(default)]
    save: Vec<String>,
}

// ---------------------------------------------------------------------------
// Format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            _ => Format::Yaml,
        }
    }
}

// ---------------------------------------------------------------------------
// ChainRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainRegistry {
    chains: BTreeMap<String, ChainDefinition>,
}

/// A registry built from the valid chains of a document, plus the chains
/// that were rejected and why.
#[derive(Debug)]
pub struct Loaded {
    pub registry: ChainRegistry,
    pub rejected: Vec<ChainError>,
}

impl ChainRegistry {
    /// Load every chain from `path`; any invalid chain fails the whole load.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, Format::for_path(path))
    }

    pub fn parse(text: &str, format: Format) -> Result<Self> {
        let loaded = Self::parse_isolating(text, format)?;
        if loaded.rejected.is_empty() {
            Ok(loaded.registry)
        } else {
            Err(ChainError::ConfigErrors(loaded.rejected))
        }
    }

    /// Load the valid chains from `path`, reporting invalid ones separately
    /// instead of failing. A document that is not a map of chains at all is
    /// still an error.
    pub fn load_isolating(path: &Path) -> Result<Loaded> {
        let text = std::fs::read_to_string(path)?;
        Self::parse_isolating(&text, Format::for_path(path))
    }

    pub fn parse_isolating(text: &str, format: Format) -> Result<Loaded> {
        let doc: BTreeMap<String, serde_yaml::Value> = if text.trim().is_empty() {
            BTreeMap::new()
        } else {
            match format {
                Format::Json => serde_json::from_str(text)?,
                Format::Yaml => serde_yaml::from_str(text)?,
            }
        };

        let names: BTreeSet<&str> = doc.keys().map(|k| k.as_str()).collect();
        let mut chains = BTreeMap::new();
        let mut rejected = Vec::new();

        for (name, value) in &doc {
            match build_chain(name, value.clone(), &names) {
                Ok(def) => {
                    chains.insert(name.clone(), def);
                }
                Err(e) => {
                    tracing::warn!(chain = %name, error = %e, "rejected chain definition");
                    rejected.push(e);
                }
            }
        }

        tracing::debug!(loaded = chains.len(), rejected = rejected.len(), "chain definitions parsed");
        Ok(Loaded {
            registry: ChainRegistry { chains },
            rejected,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ChainDefinition> {
        self.chains.get(name)
    }

    /// Look up `name`, failing with the list of available chains.
    pub fn require(&self, name: &str) -> Result<&ChainDefinition> {
        self.chains.get(name).ok_or_else(|| ChainError::UnknownChain {
            name: name.to_string(),
            available: self.names(),
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.chains.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChainDefinition> {
        self.chains.values()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Chains that declare triggers, in name order.
    pub fn triggered(&self) -> impl Iterator<Item = &ChainDefinition> {
        self.chains.values().filter(|c| c.triggers.is_some())
    }
}

fn build_chain(
    name: &str,
    value: serde_yaml::Value,
    known: &BTreeSet<&str>,
) -> Result<ChainDefinition> {
    paths::validate_chain_name(name)?;

    let raw: RawChain = serde_yaml::from_value(value)
        .map_err(|e| ChainError::config(name, "definition", e.to_string()))?;

    if raw.steps.is_empty() {
        return Err(ChainError::config(name, "steps", "at least one step is required"));
    }

    let triggers = raw
        .triggers
        .map(|t| -> Result<Trigger> {
            let conditions = ConditionExpr::from_raw(&t.conditions)
                .map_err(|m| ChainError::config(name, "triggers.conditions", m))?;
            Ok(Trigger {
                conditions,
                prompt: t
                    .prompt
                    .filter(|p| !p.trim().is_empty())
                    .unwrap_or_else(|| format!("Run chain '{name}'?")),
            })
        })
        .transpose()?;

    let prerequisites = raw
        .prerequisites
        .map(|p| -> Result<Prerequisites> {
            let groups: Vec<(&str, &Vec<RawCondition>)> = [("all", &p.all), ("any", &p.any), ("none", &p.none)]
                .into_iter()
                .filter_map(|(k, v)| v.as_ref().map(|v| (k, v)))
                .collect();
            let [(key, children)] = groups.as_slice() else {
                return Err(ChainError::config(
                    name,
                    "prerequisites",
                    "exactly one of all/any/none is required",
                ));
            };
            let expr = ConditionExpr::group(key, children)
                .map_err(|m| ChainError::config(name, format!("prerequisites.{key}"), m))?;
            Ok(Prerequisites {
                expr,
                error: p
                    .error
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "prerequisites not met".to_string()),
            })
        })
        .transpose()?;

    let mut steps = Vec::with_capacity(raw.steps.len());
    for (i, s) in raw.steps.into_iter().enumerate() {
        let field = |f: &str| format!("steps[{i}].{f}");
        if s.command.trim().is_empty() {
            return Err(ChainError::config(name, field("command"), "command is empty"));
        }
        let condition = s
            .condition
            .as_ref()
            .map(ConditionExpr::from_raw)
            .transpose()
            .map_err(|m| ChainError::config(name, field("condition"), m))?;
        let context_save = s
            .context
            .map(|c| c.save)
            .unwrap_or_default()
            .iter()
            .map(|r| SaveRule::parse(r))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|m| ChainError::config(name, field("context.save"), m))?;
        steps.push(Step {
            command: s.command,
            condition,
            context_save,
        });
    }

    for (field, handler) in [("on-success", &raw.on_success), ("on-failure", &raw.on_failure)] {
        if let Some(Handler::Chain { name: target, .. }) = handler.as_deref().map(Handler::parse) {
            if !known.contains(target.as_str()) {
                return Err(ChainError::config(
                    name,
                    field,
                    format!("references unknown chain '{target}'"),
                ));
            }
        }
    }

    Ok(ChainDefinition {
        name: name.to_string(),
        description: raw.description,
        triggers,
        prerequisites,
        steps,
        on_success: raw.on_success.filter(|s| !s.trim().is_empty()),
        on_failure: raw.on_failure.filter(|s| !s.trim().is_empty()),
        context_save: raw.context.map(|c| c.save).unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
full-cycle:
  description: Build and tag
  triggers:
    conditions:
      all: ["hoursSinceLastCommand > 4", "exists(Cargo.toml)"]
    prompt: Run the full cycle?
  prerequisites:
    all: ["exists(Cargo.toml)"]
    error: not a cargo project
  steps:
    - command: cargo build
    - command: git describe --tags
      context:
        save: [version, "short=regex:v(\\d+)"]
    - command: ./publish.sh {{version}}
      condition: "env.PUBLISH == yes"
  on-success: /chain notify
  on-failure: echo failed
  context:
    save: [version]
notify:
  description: Tell someone
  steps:
    - command: echo done
"#;

    #[test]
    fn parses_full_definition() {
        let reg = ChainRegistry::parse(SAMPLE, Format::Yaml).unwrap();
        assert_eq!(reg.names(), vec!["full-cycle", "notify"]);

        let def = reg.get("full-cycle").unwrap();
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.triggers.as_ref().unwrap().prompt, "Run the full cycle?");
        assert_eq!(def.prerequisites.as_ref().unwrap().error, "not a cargo project");
        assert_eq!(def.steps[1].context_save.len(), 2);
        assert!(def.steps[2].condition.is_some());
        assert_eq!(def.on_success.as_deref(), Some("/chain notify"));
        assert_eq!(def.context_save, vec!["version"]);
        assert_eq!(reg.triggered().count(), 1);
    }

    #[test]
    fn parses_json_form() {
        let json = r#"{
            "deploy": {
                "description": "Ship it",
                "prerequisites": {"none": ["exists(.lock)"], "error": "locked"},
                "steps": [{"command": "true", "condition": {"any": ["a == 1", "b == 2"]}}],
                "on-failure": "echo nope"
            }
        }"#;
        let reg = ChainRegistry::parse(json, Format::Json).unwrap();
        let def = reg.get("deploy").unwrap();
        assert!(matches!(def.prerequisites.as_ref().unwrap().expr, ConditionExpr::None(_)));
        assert!(matches!(def.steps[0].condition, Some(ConditionExpr::Any(_))));
    }

    #[test]
    fn reload_is_structurally_equal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("chains.yaml");
        std::fs::write(&path, SAMPLE).unwrap();
        let a = ChainRegistry::load(&path).unwrap();
        let b = ChainRegistry::load(&path).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_steps_rejected() {
        let err = ChainRegistry::parse("x:\n  steps: []\n", Format::Yaml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'x'") && msg.contains("steps"), "{msg}");
    }

    #[test]
    fn bad_condition_names_chain_and_field() {
        let yaml = "x:\n  steps:\n    - command: 'true'\n      condition: 'gibberish here'\n";
        let err = ChainRegistry::parse(yaml, Format::Yaml).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("steps[0].condition"), "{msg}");
        assert!(msg.contains("gibberish"), "{msg}");
    }

    #[test]
    fn prerequisites_need_exactly_one_group() {
        let yaml = "x:\n  prerequisites:\n    error: nope\n  steps:\n    - command: 'true'\n";
        assert!(ChainRegistry::parse(yaml, Format::Yaml).is_err());
        let yaml = "x:\n  prerequisites:\n    all: ['a == 1']\n    any: ['b == 1']\n  steps:\n    - command: 'true'\n";
        assert!(ChainRegistry::parse(yaml, Format::Yaml).is_err());
    }

    #[test]
    fn unknown_handler_chain_rejected() {
        let yaml = "x:\n  steps:\n    - command: 'true'\n  on-failure: /chain ghost\n";
        let err = ChainRegistry::parse(yaml, Format::Yaml).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn unknown_fields_rejected() {
        let yaml = "x:\n  stepz:\n    - command: 'true'\n";
        assert!(ChainRegistry::parse(yaml, Format::Yaml).is_err());
    }

    #[test]
    fn isolating_load_keeps_valid_chains() {
        let yaml = "good:\n  steps:\n    - command: 'true'\nbad:\n  steps: []\n";
        assert!(ChainRegistry::parse(yaml, Format::Yaml).is_err());

        let loaded = ChainRegistry::parse_isolating(yaml, Format::Yaml).unwrap();
        assert_eq!(loaded.registry.names(), vec!["good"]);
        assert_eq!(loaded.rejected.len(), 1);
        assert!(loaded.rejected[0].to_string().contains("'bad'"));
    }

    #[test]
    fn require_lists_available() {
        let reg = ChainRegistry::parse(SAMPLE, Format::Yaml).unwrap();
        match reg.require("nope") {
            Err(ChainError::UnknownChain { available, .. }) => {
                assert_eq!(available, vec!["full-cycle", "notify"]);
            }
            other => panic!("expected UnknownChain, got {other:?}"),
        }
    }

    #[test]
    fn default_trigger_prompt_and_error() {
        let yaml = "x:\n  triggers:\n    conditions: 'a == 1'\n  prerequisites:\n    any: ['a == 1']\n  steps:\n    - command: 'true'\n";
        let reg = ChainRegistry::parse(yaml, Format::Yaml).unwrap();
        let def = reg.get("x").unwrap();
        assert_eq!(def.triggers.as_ref().unwrap().prompt, "Run chain 'x'?");
        assert_eq!(def.prerequisites.as_ref().unwrap().error, "prerequisites not met");
    }

    #[test]
    fn handler_parsing() {
        assert_eq!(
            Handler::parse("/chain notify level=warn"),
            Handler::Chain {
                name: "notify".to_string(),
                args: vec!["level=warn".to_string()]
            }
        );
        assert!(matches!(Handler::parse("chain notify"), Handler::Chain { .. }));
        assert!(matches!(Handler::parse("chain status"), Handler::Shell(_)));
        assert!(matches!(Handler::parse("echo hi"), Handler::Shell(_)));
    }

    #[test]
    fn reserved_chain_names_rejected() {
        let yaml = "status:\n  steps:\n    - command: 'true'\n";
        assert!(ChainRegistry::parse(yaml, Format::Yaml).is_err());
    }

    #[test]
    fn empty_document_is_empty_registry() {
        let reg = ChainRegistry::parse("", Format::Yaml).unwrap();
        assert!(reg.is_empty());
    }
}
