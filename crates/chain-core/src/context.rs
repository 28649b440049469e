use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A context or fact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    String(String),
}

impl Value {
    /// Interpret a literal the way predicate right-hand sides and CLI seeds
    /// are written: number, then `true`/`false`, then string. Surrounding
    /// single or double quotes force a string.
    pub fn parse_literal(raw: &str) -> Value {
        let raw = raw.trim();
        for q in ['"', '\''] {
            if raw.len() >= 2 && raw.starts_with(q) && raw.ends_with(q) {
                return Value::String(raw[1..raw.len() - 1].to_string());
            }
        }
        if let Ok(n) = raw.parse::<f64>() {
            if n.is_finite() {
                return Value::Number(n);
            }
        }
        match raw {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(raw.to_string()),
        }
    }

    /// Numeric view; strings holding a number are coerced.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::String(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Bool(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ---------------------------------------------------------------------------
// ExecutionContext
// ---------------------------------------------------------------------------

/// Variables threaded between the steps of one run. Last write wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    vars: BTreeMap<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from `key=value` words, as given on the command line
    /// or after a `/chain <name>` handler.
    pub fn from_assignments<S: AsRef<str>>(
        words: impl IntoIterator<Item = S>,
    ) -> std::result::Result<Self, String> {
        let mut ctx = Self::new();
        for word in words {
            let word = word.as_ref();
            match word.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    ctx.set(key.trim(), Value::parse_literal(value));
                }
                _ => return Err(format!("expected key=value, got '{word}'")),
            }
        }
        Ok(ctx)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.vars.get(key)
    }

    /// Copy every variable of `other` into `self`, overwriting.
    pub fn merge(&mut self, other: &ExecutionContext) {
        for (k, v) in &other.vars {
            self.vars.insert(k.clone(), v.clone());
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// The subset of variables named in `keys`, skipping unset ones.
    pub fn select(&self, keys: &[String]) -> BTreeMap<String, Value> {
        keys.iter()
            .filter_map(|k| self.vars.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Replace `{{key}}` placeholders with context values. Unknown keys are
    /// left in place so the command fails loudly rather than silently.
    pub fn interpolate(&self, template: &str) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else {
                out.push_str(&rest[start..]);
                return out;
            };
            let key = after[..end].trim();
            match self.vars.get(key) {
                Some(v) => out.push_str(&v.to_string()),
                None => out.push_str(&rest[start..start + 2 + end + 2]),
            }
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        out
    }

    /// Environment variables exported to step subprocesses.
    pub fn env_vars(&self) -> Vec<(String, String)> {
        self.vars
            .iter()
            .map(|(k, v)| (format!("CHAIN_CTX_{}", env_key(k)), v.to_string()))
            .collect()
    }
}

fn env_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_parsing() {
        assert_eq!(Value::parse_literal("42"), Value::Number(42.0));
        assert_eq!(Value::parse_literal(" 1.5 "), Value::Number(1.5));
        assert_eq!(Value::parse_literal("true"), Value::Bool(true));
        assert_eq!(Value::parse_literal("false"), Value::Bool(false));
        assert_eq!(Value::parse_literal("main"), Value::String("main".into()));
        assert_eq!(Value::parse_literal("\"42\""), Value::String("42".into()));
        assert_eq!(Value::parse_literal("'a b'"), Value::String("a b".into()));
    }

    #[test]
    fn last_write_wins() {
        let mut ctx = ExecutionContext::new();
        ctx.set("branch", "main");
        ctx.set("branch", "dev");
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.get("branch"), Some(&Value::String("dev".into())));
    }

    #[test]
    fn number_display_drops_trailing_zero() {
        assert_eq!(Value::Number(3.0).to_string(), "3");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
    }

    #[test]
    fn interpolate_known_and_unknown_keys() {
        let mut ctx = ExecutionContext::new();
        ctx.set("name", "widget");
        ctx.set("count", 3i64);
        assert_eq!(
            ctx.interpolate("make {{ name }} x{{count}} {{missing}}"),
            "make widget x3 {{missing}}"
        );
        assert_eq!(ctx.interpolate("no braces"), "no braces");
        assert_eq!(ctx.interpolate("open {{name"), "open {{name");
    }

    #[test]
    fn env_vars_are_uppercased() {
        let mut ctx = ExecutionContext::new();
        ctx.set("build.version", "1.2.0");
        assert_eq!(
            ctx.env_vars(),
            vec![("CHAIN_CTX_BUILD_VERSION".to_string(), "1.2.0".to_string())]
        );
    }

    #[test]
    fn select_skips_unset_keys() {
        let mut ctx = ExecutionContext::new();
        ctx.set("a", 1i64);
        let picked = ctx.select(&["a".to_string(), "b".to_string()]);
        assert_eq!(picked.len(), 1);
        assert!(picked.contains_key("a"));
    }

    #[test]
    fn assignments_seed_typed_values() {
        let ctx = ExecutionContext::from_assignments(["env=prod", "replicas=3", "dry=false"]).unwrap();
        assert_eq!(ctx.get("env"), Some(&Value::from("prod")));
        assert_eq!(ctx.get("replicas"), Some(&Value::Number(3.0)));
        assert_eq!(ctx.get("dry"), Some(&Value::Bool(false)));
        assert!(ExecutionContext::from_assignments(["novalue"]).is_err());
        assert!(ExecutionContext::from_assignments(["=x"]).is_err());
    }

    #[test]
    fn serializes_as_plain_map() {
        let mut ctx = ExecutionContext::new();
        ctx.set("ok", true);
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(json, r#"{"ok":true}"#);
        let back: ExecutionContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
