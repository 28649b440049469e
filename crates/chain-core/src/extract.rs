//! Declarative capture of step output into the execution context.
//!
//! A rule is written `key` or `key=<source>`:
//!
//! | source            | value                                              |
//! |-------------------|----------------------------------------------------|
//! | *(none)*/`stdout` | trimmed stdout                                      |
//! | `stderr`          | trimmed stderr                                      |
//! | `exit_code`       | exit code as a number                               |
//! | `regex:<re>`      | named group `key`, else group 1, else whole match  |
//! | `line:<n>`        | n-th stdout line (1-based)                          |
//! | `json:<path>`     | dotted path into stdout parsed as JSON             |

use crate::context::Value;
use crate::shell::ShellOutput;
use regex::Regex;
use serde::{Serialize, Serializer};

#[derive(Debug, Clone)]
pub enum Source {
    Stdout,
    Stderr,
    ExitCode,
    Regex(Regex),
    Line(usize),
    Json(Vec<String>),
}

impl PartialEq for Source {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Source::Regex(a), Source::Regex(b)) => a.as_str() == b.as_str(),
            (Source::Line(a), Source::Line(b)) => a == b,
            (Source::Json(a), Source::Json(b)) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveRule {
    pub key: String,
    pub source: Source,
    raw: String,
}

impl SaveRule {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let (key, spec) = match raw.split_once('=') {
            Some((k, s)) => (k.trim(), Some(s.trim())),
            None => (raw, None),
        };
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return Err(format!("'{raw}': invalid context key '{key}'"));
        }

        let source = match spec {
            None | Some("stdout") => Source::Stdout,
            Some("stderr") => Source::Stderr,
            Some("exit_code") => Source::ExitCode,
            Some(s) if s.starts_with("regex:") => {
                let pattern = &s["regex:".len()..];
                let re = Regex::new(pattern).map_err(|e| format!("'{raw}': bad regex: {e}"))?;
                Source::Regex(re)
            }
            Some(s) if s.starts_with("line:") => {
                let n: usize = s["line:".len()..]
                    .trim()
                    .parse()
                    .map_err(|_| format!("'{raw}': line number expected"))?;
                if n == 0 {
                    return Err(format!("'{raw}': lines are numbered from 1"));
                }
                Source::Line(n)
            }
            Some(s) if s.starts_with("json:") => {
                let path: Vec<String> = s["json:".len()..]
                    .split('.')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                Source::Json(path)
            }
            Some(other) => return Err(format!("'{raw}': unknown capture source '{other}'")),
        };

        Ok(SaveRule {
            key: key.to_string(),
            source,
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Extract a value, or `None` when the source has nothing to offer.
    pub fn extract(&self, output: &ShellOutput) -> Option<Value> {
        match &self.source {
            Source::Stdout => Some(Value::String(output.stdout.trim().to_string())),
            Source::Stderr => Some(Value::String(output.stderr.trim().to_string())),
            Source::ExitCode => output.exit_code.map(|c| Value::Number(c as f64)),
            Source::Regex(re) => {
                let caps = re.captures(&output.stdout)?;
                let m = caps
                    .name(&self.key)
                    .or_else(|| caps.get(1))
                    .or_else(|| caps.get(0))?;
                Some(Value::String(m.as_str().to_string()))
            }
            Source::Line(n) => output
                .stdout
                .lines()
                .nth(n - 1)
                .map(|l| Value::String(l.trim().to_string())),
            Source::Json(path) => {
                let doc: serde_json::Value = serde_json::from_str(output.stdout.trim()).ok()?;
                let mut node = &doc;
                for segment in path {
                    node = match node {
                        serde_json::Value::Object(map) => map.get(segment)?,
                        serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                        _ => return None,
                    };
                }
                match node {
                    serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
                    serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
                    serde_json::Value::String(s) => Some(Value::String(s.clone())),
                    serde_json::Value::Null => None,
                    other => Some(Value::String(other.to_string())),
                }
            }
        }
    }
}

impl Serialize for SaveRule {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn output(stdout: &str, stderr: &str, code: i32) -> ShellOutput {
        ShellOutput {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            duration: Duration::ZERO,
            timed_out: false,
        }
    }

    fn extract(rule: &str, out: &ShellOutput) -> Option<Value> {
        SaveRule::parse(rule).unwrap().extract(out)
    }

    #[test]
    fn bare_key_captures_trimmed_stdout() {
        let out = output("  v1.2.3\n", "", 0);
        assert_eq!(extract("version", &out), Some(Value::from("v1.2.3")));
        assert_eq!(extract("version=stdout", &out), Some(Value::from("v1.2.3")));
    }

    #[test]
    fn stderr_and_exit_code() {
        let out = output("", "warning: x\n", 3);
        assert_eq!(extract("warn=stderr", &out), Some(Value::from("warning: x")));
        assert_eq!(extract("code=exit_code", &out), Some(Value::Number(3.0)));
    }

    #[test]
    fn regex_prefers_named_group_then_first_group() {
        let out = output("built 42 files in 3s\n", "", 0);
        assert_eq!(
            extract(r"files=regex:built (?P<files>\d+) files", &out),
            Some(Value::from("42"))
        );
        assert_eq!(extract(r"secs=regex:in (\d+)s", &out), Some(Value::from("3")));
        assert_eq!(extract(r"word=regex:built", &out), Some(Value::from("built")));
        assert_eq!(extract(r"none=regex:missing (\d+)", &out), None);
    }

    #[test]
    fn line_and_json_sources() {
        let out = output("first\nsecond\n", "", 0);
        assert_eq!(extract("l=line:2", &out), Some(Value::from("second")));
        assert_eq!(extract("l=line:9", &out), None);

        let out = output(r#"{"report":{"passed":true,"count":5,"items":["a","b"]}}"#, "", 0);
        assert_eq!(extract("ok=json:report.passed", &out), Some(Value::Bool(true)));
        assert_eq!(extract("n=json:report.count", &out), Some(Value::Number(5.0)));
        assert_eq!(extract("i=json:report.items.1", &out), Some(Value::from("b")));
        assert_eq!(extract("m=json:report.missing", &out), None);

        let not_json = output("plain text", "", 0);
        assert_eq!(extract("x=json:a", &not_json), None);
    }

    #[test]
    fn invalid_rules_are_rejected() {
        for raw in ["", "=stdout", "bad key", "x=regex:(", "x=line:0", "x=line:abc", "x=nope"] {
            assert!(SaveRule::parse(raw).is_err(), "expected error for '{raw}'");
        }
    }
}
