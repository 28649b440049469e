//! Condition expressions for triggers, prerequisites and step conditions.
//!
//! Expressions are parsed once when definitions load; an unrecognised
//! predicate is a configuration error there, never at evaluation time.
//! Evaluation is total: unknown facts, fact errors and failed `exec:`
//! commands all yield `false`. A fact predicate that cannot be resolved is
//! false even when negated.
//!
//! # Predicate grammar
//!
//! Recognised in this order, after an optional leading `!` (negation):
//!
//! ```text
//! exec:<command>                 exit code 0 within the exec timeout
//! exists(<path>)                 path exists, relative to the project root
//! file:<path>                    same as exists(<path>)
//! fileCount(<glob>) OP <n>       number of matching files compared to n
//! <fact.name> OP <value>         fact from the FactProvider
//! ```
//!
//! `OP` is one of `>`, `>=`, `<`, `<=`, `==`, `!=`.

use crate::context::Value;
use crate::facts::FactProvider;
use crate::shell;
use regex::Regex;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use walkdir::WalkDir;

/// Cap on captured output for `exec:` predicates; only the exit code matters.
const EXEC_OUTPUT_CAP: usize = 4096;

// ---------------------------------------------------------------------------
// CompareOp
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    fn parse(s: &str) -> Option<Self> {
        match s {
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            "==" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            _ => None,
        }
    }

    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

// ---------------------------------------------------------------------------
// Predicate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum PredicateKind {
    Exists { path: String },
    FileCount { pattern: String, op: CompareOp, count: f64 },
    Fact { name: String, op: CompareOp, value: Value },
    Exec { command: String },
}

/// An atomic test, keeping the source text for messages.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub raw: String,
    pub negated: bool,
    pub kind: PredicateKind,
}

static FILE_COUNT_RE: OnceLock<Regex> = OnceLock::new();
static FACT_RE: OnceLock<Regex> = OnceLock::new();
static EXISTS_RE: OnceLock<Regex> = OnceLock::new();

fn file_count_re() -> &'static Regex {
    FILE_COUNT_RE.get_or_init(|| {
        Regex::new(r"^fileCount\((.+)\)\s*(>=|<=|==|!=|>|<)\s*(-?\d+(?:\.\d+)?)$").unwrap()
    })
}

fn fact_re() -> &'static Regex {
    FACT_RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_\-]*)*)\s*(>=|<=|==|!=|>|<)\s*(.+)$")
            .unwrap()
    })
}

fn exists_re() -> &'static Regex {
    EXISTS_RE.get_or_init(|| Regex::new(r"^exists\((.+)\)$").unwrap())
}

impl Predicate {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let source = raw.trim();
        if source.is_empty() {
            return Err("empty predicate".to_string());
        }

        let (negated, body) = match source.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, source),
        };

        let kind = if let Some(command) = body.strip_prefix("exec:") {
            let command = command.trim();
            if command.is_empty() {
                return Err(format!("'{source}': exec: needs a command"));
            }
            PredicateKind::Exec {
                command: command.to_string(),
            }
        } else if let Some(caps) = exists_re().captures(body) {
            PredicateKind::Exists {
                path: unquote(caps[1].trim()).to_string(),
            }
        } else if let Some(path) = body.strip_prefix("file:") {
            let path = path.trim();
            if path.is_empty() {
                return Err(format!("'{source}': file: needs a path"));
            }
            PredicateKind::Exists {
                path: unquote(path).to_string(),
            }
        } else if let Some(caps) = file_count_re().captures(body) {
            let op = CompareOp::parse(&caps[2]).ok_or_else(|| format!("'{source}': bad operator"))?;
            let count: f64 = caps[3]
                .parse()
                .map_err(|_| format!("'{source}': '{}' is not a number", &caps[3]))?;
            PredicateKind::FileCount {
                pattern: unquote(caps[1].trim()).to_string(),
                op,
                count,
            }
        } else if body.starts_with("fileCount(") {
            return Err(format!(
                "'{source}': expected fileCount(<glob>) <op> <number>"
            ));
        } else if let Some(caps) = fact_re().captures(body) {
            let op = CompareOp::parse(&caps[2]).ok_or_else(|| format!("'{source}': bad operator"))?;
            PredicateKind::Fact {
                name: caps[1].to_string(),
                op,
                value: Value::parse_literal(&caps[3]),
            }
        } else {
            return Err(format!("unrecognized predicate '{source}'"));
        };

        Ok(Predicate {
            raw: source.to_string(),
            negated,
            kind,
        })
    }

    fn evaluate(&self, env: &EvalEnv) -> bool {
        let result = match &self.kind {
            PredicateKind::Exists { path } => resolve(env.root, path).exists(),
            PredicateKind::FileCount { pattern, op, count } => {
                let found = count_files(env.root, pattern) as f64;
                found.partial_cmp(count).map(|o| op.holds(o)).unwrap_or(false)
            }
            PredicateKind::Fact { name, op, value } => match env.facts.fact(name) {
                Ok(Some(actual)) => compare(&actual, *op, value),
                Ok(None) => {
                    tracing::debug!(fact = %name, "unknown fact, predicate is false");
                    return false;
                }
                Err(e) => {
                    tracing::debug!(fact = %name, error = %e, "fact lookup failed, predicate is false");
                    return false;
                }
            },
            PredicateKind::Exec { command } => {
                let out = shell::run_shell(command, env.root, &[], env.exec_timeout, EXEC_OUTPUT_CAP);
                tracing::debug!(command = %command, exit_code = ?out.exit_code, timed_out = out.timed_out, "exec predicate");
                out.success()
            }
        };
        result != self.negated
    }
}

fn unquote(s: &str) -> &str {
    for q in ['"', '\''] {
        if s.len() >= 2 && s.starts_with(q) && s.ends_with(q) {
            return &s[1..s.len() - 1];
        }
    }
    s
}

fn resolve(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Compare a fact against a literal. Mismatched types are never equal,
/// never unequal, never ordered: the predicate is simply false.
fn compare(actual: &Value, op: CompareOp, expected: &Value) -> bool {
    match (actual, expected) {
        (_, Value::Number(rhs)) => actual
            .as_number()
            .and_then(|lhs| lhs.partial_cmp(rhs))
            .map(|o| op.holds(o))
            .unwrap_or(false),
        (Value::Bool(lhs), Value::Bool(rhs)) => op.is_equality() && op.holds(lhs.cmp(rhs)),
        (Value::String(lhs), Value::String(rhs)) => op.holds(lhs.as_str().cmp(rhs.as_str())),
        (Value::Number(lhs), Value::String(rhs)) => op.is_equality()
            && rhs
                .parse::<f64>()
                .ok()
                .and_then(|r| lhs.partial_cmp(&r))
                .map(|o| op.holds(o))
                .unwrap_or(false),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// fileCount globbing
// ---------------------------------------------------------------------------

/// Count regular files under `root` matching `pattern` (`*`, `?`, `**`).
/// The walk starts at the pattern's literal prefix; `.git` is skipped.
fn count_files(root: &Path, pattern: &str) -> usize {
    let (base, rest) = split_glob(pattern);
    let base = resolve(root, &base);
    if rest.is_empty() {
        return usize::from(base.is_file());
    }
    let Ok(re) = Regex::new(&glob_to_regex(&rest)) else {
        return 0;
    };
    WalkDir::new(&base)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .strip_prefix(&base)
                .ok()
                .map(|rel| {
                    let rel: Vec<String> = rel
                        .components()
                        .filter_map(|c| match c {
                            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                            _ => None,
                        })
                        .collect();
                    re.is_match(&rel.join("/"))
                })
                .unwrap_or(false)
        })
        .count()
}

/// Split a glob into its leading literal directory and the wildcard remainder.
fn split_glob(pattern: &str) -> (String, String) {
    let segments: Vec<&str> = pattern.split('/').collect();
    let first_wild = segments
        .iter()
        .position(|s| s.contains(['*', '?']))
        .unwrap_or(segments.len());
    let mut base = segments[..first_wild].join("/");
    if base.is_empty() && pattern.starts_with('/') {
        base = "/".to_string();
    } else if base.is_empty() {
        base = ".".to_string();
    }
    (base, segments[first_wild..].join("/"))
}

fn glob_to_regex(glob: &str) -> String {
    let mut re = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    re.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    re.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    re.push('$');
    re
}

// ---------------------------------------------------------------------------
// ConditionExpr
// ---------------------------------------------------------------------------

/// A condition tree. Built once at load time; evaluation never needs cycle
/// detection because children are owned.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Predicate(Predicate),
    All(Vec<ConditionExpr>),
    Any(Vec<ConditionExpr>),
    None(Vec<ConditionExpr>),
}

/// Everything a condition may consult.
pub struct EvalEnv<'a> {
    pub root: &'a Path,
    pub facts: &'a dyn FactProvider,
    pub exec_timeout: Option<Duration>,
}

/// Result of an evaluation together with the predicate that decided it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub passed: bool,
    pub reason: String,
}

impl ConditionExpr {
    pub fn predicate(raw: &str) -> Result<Self, String> {
        Predicate::parse(raw).map(ConditionExpr::Predicate)
    }

    pub fn evaluate(&self, env: &EvalEnv) -> bool {
        self.explain(env).passed
    }

    /// Evaluate with short-circuiting and report the deciding predicate:
    /// the first false child of `all`, the first true child of `any` or
    /// `none`, or every child when no short-circuit happened.
    pub fn explain(&self, env: &EvalEnv) -> Evaluation {
        match self {
            ConditionExpr::Predicate(p) => Evaluation {
                passed: p.evaluate(env),
                reason: p.raw.clone(),
            },
            ConditionExpr::All(children) => {
                for child in children {
                    let e = child.explain(env);
                    if !e.passed {
                        return e;
                    }
                }
                Evaluation {
                    passed: true,
                    reason: self.to_string(),
                }
            }
            ConditionExpr::Any(children) => {
                for child in children {
                    let e = child.explain(env);
                    if e.passed {
                        return e;
                    }
                }
                Evaluation {
                    passed: false,
                    reason: format!("none held of {self}"),
                }
            }
            ConditionExpr::None(children) => {
                for child in children {
                    let e = child.explain(env);
                    if e.passed {
                        return Evaluation {
                            passed: false,
                            reason: format!("{} held", e.reason),
                        };
                    }
                }
                Evaluation {
                    passed: true,
                    reason: self.to_string(),
                }
            }
        }
    }

    pub(crate) fn from_raw(raw: &RawCondition) -> Result<Self, String> {
        match raw {
            RawCondition::Predicate(s) => ConditionExpr::predicate(s),
            RawCondition::Group(map) => {
                if map.len() != 1 {
                    let keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
                    return Err(format!(
                        "condition object must have exactly one of all/any/none, found [{}]",
                        keys.join(", ")
                    ));
                }
                let (key, children) = map.iter().next().ok_or("empty condition object")?;
                ConditionExpr::group(key, children)
            }
        }
    }

    pub(crate) fn group(key: &str, children: &[RawCondition]) -> Result<Self, String> {
        if children.is_empty() {
            return Err(format!("'{key}' needs at least one condition"));
        }
        let parsed = children
            .iter()
            .map(ConditionExpr::from_raw)
            .collect::<Result<Vec<_>, _>>()?;
        match key {
            "all" => Ok(ConditionExpr::All(parsed)),
            "any" => Ok(ConditionExpr::Any(parsed)),
            "none" => Ok(ConditionExpr::None(parsed)),
            other => Err(format!("unknown combinator '{other}', expected all/any/none")),
        }
    }
}

impl fmt::Display for ConditionExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, children) = match self {
            ConditionExpr::Predicate(p) => return f.write_str(&p.raw),
            ConditionExpr::All(c) => ("all", c),
            ConditionExpr::Any(c) => ("any", c),
            ConditionExpr::None(c) => ("none", c),
        };
        write!(f, "{name}(")?;
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{child}")?;
        }
        f.write_str(")")
    }
}

/// Serialises back to the definition-file form: a predicate string or a
/// single-key `all`/`any`/`none` object.
impl Serialize for ConditionExpr {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let (key, children) = match self {
            ConditionExpr::Predicate(p) => return s.serialize_str(&p.raw),
            ConditionExpr::All(c) => ("all", c),
            ConditionExpr::Any(c) => ("any", c),
            ConditionExpr::None(c) => ("none", c),
        };
        let mut map = s.serialize_map(Some(1))?;
        map.serialize_entry(key, children)?;
        map.end()
    }
}

/// Definition-file shape before validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawCondition {
    Predicate(String),
    Group(BTreeMap<String, Vec<RawCondition>>),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ChainError, Result};
    use crate::facts::MapFacts;
    use tempfile::TempDir;

    struct FailingFacts;

    impl FactProvider for FailingFacts {
        fn fact(&self, name: &str) -> Result<Option<Value>> {
            Err(ChainError::Io(std::io::Error::other(format!("cannot read {name}"))))
        }
    }

    fn env<'a>(root: &'a Path, facts: &'a dyn FactProvider) -> EvalEnv<'a> {
        EvalEnv {
            root,
            facts,
            exec_timeout: Some(Duration::from_secs(10)),
        }
    }

    fn pred(raw: &str) -> ConditionExpr {
        ConditionExpr::predicate(raw).unwrap()
    }

    #[test]
    fn parses_each_predicate_kind() {
        assert!(matches!(
            Predicate::parse("exists(src/main.rs)").unwrap().kind,
            PredicateKind::Exists { ref path } if path == "src/main.rs"
        ));
        assert!(matches!(
            Predicate::parse("file:Cargo.toml").unwrap().kind,
            PredicateKind::Exists { ref path } if path == "Cargo.toml"
        ));
        let p = Predicate::parse("!exists(docs)").unwrap();
        assert!(p.negated);
        assert!(matches!(
            Predicate::parse("fileCount(src/**/*.rs) >= 3").unwrap().kind,
            PredicateKind::FileCount { op: CompareOp::Ge, count, .. } if count == 3.0
        ));
        assert!(matches!(
            Predicate::parse("tests.passing == true").unwrap().kind,
            PredicateKind::Fact { ref name, value: Value::Bool(true), .. } if name == "tests.passing"
        ));
        assert!(matches!(
            Predicate::parse("exec:git diff --quiet").unwrap().kind,
            PredicateKind::Exec { ref command } if command == "git diff --quiet"
        ));
    }

    #[test]
    fn rejects_unknown_syntax() {
        for raw in ["", "whatever", "fileCount(*.rs)", "exec:", "file:", "3 > 2", "a.b ~ 1"] {
            assert!(Predicate::parse(raw).is_err(), "expected error for '{raw}'");
        }
    }

    #[test]
    fn exists_and_negation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("present.txt"), "").unwrap();
        let facts = MapFacts::new();
        let e = env(dir.path(), &facts);
        assert!(pred("exists(present.txt)").evaluate(&e));
        assert!(pred("file:present.txt").evaluate(&e));
        assert!(!pred("exists(absent.txt)").evaluate(&e));
        assert!(pred("!exists(absent.txt)").evaluate(&e));
        assert!(!pred("exists(/nonexistent)").evaluate(&e));
    }

    #[test]
    fn file_count_globs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        std::fs::write(dir.path().join("src/a.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/b.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/nested/c.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/readme.md"), "").unwrap();
        let facts = MapFacts::new();
        let e = env(dir.path(), &facts);
        assert!(pred("fileCount(src/*.rs) == 2").evaluate(&e));
        assert!(pred("fileCount(src/**/*.rs) == 3").evaluate(&e));
        assert!(pred("fileCount(**/*.md) == 1").evaluate(&e));
        assert!(pred("fileCount(missing/*.rs) == 0").evaluate(&e));
        assert!(pred("fileCount(src/a.rs) == 1").evaluate(&e));
        assert!(!pred("fileCount(src/*.rs) > 2").evaluate(&e));
    }

    #[test]
    fn fact_comparisons() {
        let facts = MapFacts::new()
            .with("hoursSinceLastCommand", 5.0)
            .with("tests.passing", true)
            .with("branch", "main")
            .with("count", "7");
        let root = Path::new("/tmp");
        let e = env(root, &facts);
        assert!(pred("hoursSinceLastCommand > 4").evaluate(&e));
        assert!(!pred("hoursSinceLastCommand < 4").evaluate(&e));
        assert!(pred("tests.passing == true").evaluate(&e));
        assert!(pred("tests.passing != false").evaluate(&e));
        assert!(!pred("tests.passing > false").evaluate(&e));
        assert!(pred("branch == main").evaluate(&e));
        assert!(pred("branch == \"main\"").evaluate(&e));
        assert!(pred("count >= 7").evaluate(&e));
        // mismatched types are false, not an error
        assert!(!pred("branch > 3").evaluate(&e));
        assert!(!pred("tests.passing == yes").evaluate(&e));
    }

    #[test]
    fn unknown_and_failing_facts_are_false() {
        let root = Path::new("/tmp");
        let empty = MapFacts::new();
        assert!(!pred("missing.fact == 1").evaluate(&env(root, &empty)));

        let failing = FailingFacts;
        let e = env(root, &failing);
        let exprs = [
            pred("a == 1"),
            pred("!a == 1"),
            ConditionExpr::All(vec![pred("a == 1"), pred("b > 2")]),
            ConditionExpr::Any(vec![pred("a == 1"), pred("b > 2")]),
            ConditionExpr::None(vec![pred("a == 1")]),
        ];
        let results: Vec<bool> = exprs.iter().map(|x| x.evaluate(&e)).collect();
        assert_eq!(results, vec![false, false, false, false, true]);
    }

    #[test]
    fn exec_predicate_uses_exit_code() {
        let facts = MapFacts::new();
        let e = env(Path::new("/tmp"), &facts);
        assert!(pred("exec:true").evaluate(&e));
        assert!(!pred("exec:exit 1").evaluate(&e));
        assert!(pred("!exec:false").evaluate(&e));
    }

    #[test]
    fn exec_predicate_timeout_is_false() {
        let facts = MapFacts::new();
        let e = EvalEnv {
            root: Path::new("/tmp"),
            facts: &facts,
            exec_timeout: Some(Duration::from_millis(100)),
        };
        assert!(!pred("exec:sleep 30").evaluate(&e));
    }

    #[test]
    fn all_short_circuits_before_exec() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("spawned");
        let expr = ConditionExpr::All(vec![
            pred("exists(/nonexistent)"),
            pred(&format!("exec:touch {}", marker.display())),
        ]);
        let facts = MapFacts::new();
        assert!(!expr.evaluate(&env(dir.path(), &facts)));
        assert!(!marker.exists(), "exec: predicate must not run");
    }

    #[test]
    fn any_and_none_short_circuit_on_first_true() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("spawned");
        let touch = format!("exec:touch {}", marker.display());
        let facts = MapFacts::new().with("ready", true);
        let e = env(dir.path(), &facts);

        let any = ConditionExpr::Any(vec![pred("ready == true"), pred(&touch)]);
        assert!(any.evaluate(&e));
        let none = ConditionExpr::None(vec![pred("ready == true"), pred(&touch)]);
        assert!(!none.evaluate(&e));
        assert!(!marker.exists());
    }

    #[test]
    fn explain_names_the_deciding_predicate() {
        let facts = MapFacts::new().with("x", 1.0);
        let e = env(Path::new("/tmp"), &facts);
        let all = ConditionExpr::All(vec![pred("x == 1"), pred("exists(/nonexistent)")]);
        let ev = all.explain(&e);
        assert!(!ev.passed);
        assert_eq!(ev.reason, "exists(/nonexistent)");

        let none = ConditionExpr::None(vec![pred("x == 1")]);
        assert_eq!(none.explain(&e).reason, "x == 1 held");
    }

    #[test]
    fn raw_conditions_parse_from_yaml_and_json() {
        let yaml = "all:\n  - exists(Cargo.toml)\n  - any:\n      - a == 1\n      - b == 2\n";
        let raw: RawCondition = serde_yaml::from_str(yaml).unwrap();
        let expr = ConditionExpr::from_raw(&raw).unwrap();
        assert_eq!(expr.to_string(), "all(exists(Cargo.toml), any(a == 1, b == 2))");

        let json = r#"{"none": ["exec:false"]}"#;
        let raw: RawCondition = serde_json::from_str(json).unwrap();
        assert!(matches!(ConditionExpr::from_raw(&raw).unwrap(), ConditionExpr::None(_)));
    }

    #[test]
    fn raw_conditions_reject_bad_shapes() {
        for yaml in [
            "xor:\n  - a == 1\n",
            "all: []\n",
            "all:\n  - a == 1\nany:\n  - b == 1\n",
            "all:\n  - not a predicate\n",
        ] {
            let raw: RawCondition = serde_yaml::from_str(yaml).unwrap();
            assert!(ConditionExpr::from_raw(&raw).is_err(), "expected error for {yaml:?}");
        }
    }

    #[test]
    fn serializes_to_definition_form() {
        let expr = ConditionExpr::Any(vec![pred("a == 1"), pred("exists(x)")]);
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, r#"{"any":["a == 1","exists(x)"]}"#);
    }
}
