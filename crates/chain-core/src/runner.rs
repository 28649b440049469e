use crate::condition::EvalEnv;
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::facts::{ContextFacts, FactProvider};
use crate::registry::Step;
use crate::shell::{self, ShellOutput};
use std::path::Path;
use std::time::Duration;

/// What happened to one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    /// The command after `{{key}}` substitution.
    pub command: String,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
    pub timed_out: bool,
    /// The step's condition was false and no process was started.
    pub skipped: bool,
    /// Deciding predicate when the step was skipped.
    pub skip_reason: Option<String>,
}

impl StepResult {
    /// Whether the run may move on to the next step.
    pub fn passed(&self) -> bool {
        self.skipped || (!self.timed_out && self.exit_code == Some(0))
    }

    /// One-line description of a failure, e.g. `exited with code 1: no such file`.
    pub fn failure_detail(&self) -> String {
        let last_err = self.stderr.lines().rev().find(|l| !l.trim().is_empty());
        let base = if self.timed_out {
            "timed out".to_string()
        } else {
            match self.exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "could not be started".to_string(),
            }
        };
        match last_err {
            Some(line) if !self.timed_out => format!("{base}: {}", line.trim()),
            _ => base,
        }
    }

    fn skipped(command: String, reason: String) -> Self {
        Self {
            command,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
            timed_out: false,
            skipped: true,
            skip_reason: Some(reason),
        }
    }

    fn from_output(command: String, out: ShellOutput) -> Self {
        Self {
            command,
            exit_code: out.exit_code,
            stdout: out.stdout,
            stderr: out.stderr,
            duration: out.duration,
            timed_out: out.timed_out,
            skipped: false,
            skip_reason: None,
        }
    }

    fn output(&self) -> ShellOutput {
        ShellOutput {
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            duration: self.duration,
            timed_out: self.timed_out,
        }
    }
}

/// Runs single steps: checks the step condition against the run's context,
/// spawns the command, and applies the step's save rules to the context.
pub struct StepRunner<'a> {
    root: &'a Path,
    facts: &'a dyn FactProvider,
    timeout: Option<Duration>,
    exec_timeout: Option<Duration>,
    max_output: usize,
}

impl<'a> StepRunner<'a> {
    pub fn new(root: &'a Path, facts: &'a dyn FactProvider, config: &Config) -> Self {
        Self {
            root,
            facts,
            timeout: config.step_timeout(),
            exec_timeout: config.exec_timeout(),
            max_output: config.max_output_bytes,
        }
    }

    /// Run `step`. `env` is added to the subprocess environment alongside the
    /// exported context. Save rules only apply to steps that passed.
    pub fn run(
        &self,
        step: &Step,
        context: &mut ExecutionContext,
        env: &[(String, String)],
    ) -> StepResult {
        let command = context.interpolate(&step.command);

        if let Some(condition) = &step.condition {
            let facts = ContextFacts {
                context: &*context,
                fallback: self.facts,
            };
            let eval = condition.explain(&EvalEnv {
                root: self.root,
                facts: &facts,
                exec_timeout: self.exec_timeout,
            });
            if !eval.passed {
                tracing::debug!(command = %command, reason = %eval.reason, "step condition false, skipping");
                return StepResult::skipped(command, eval.reason);
            }
        }

        let mut full_env = context.env_vars();
        full_env.extend(env.iter().cloned());

        tracing::debug!(command = %command, "running step");
        let out = shell::run_shell(&command, self.root, &full_env, self.timeout, self.max_output);
        let result = StepResult::from_output(command, out);

        if result.passed() && !step.context_save.is_empty() {
            let output = result.output();
            for rule in &step.context_save {
                match rule.extract(&output) {
                    Some(value) => context.set(rule.key.clone(), value),
                    None => tracing::warn!(
                        rule = rule.as_str(),
                        command = %result.command,
                        "context extraction produced no value; key left unset"
                    ),
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionExpr;
    use crate::context::Value;
    use crate::extract::SaveRule;
    use crate::facts::MapFacts;
    use tempfile::TempDir;

    fn step(command: &str) -> Step {
        Step {
            command: command.to_string(),
            condition: None,
            context_save: Vec::new(),
        }
    }

    #[test]
    fn successful_step_saves_output() {
        let dir = TempDir::new().unwrap();
        let facts = MapFacts::new();
        let runner = StepRunner::new(dir.path(), &facts, &Config::default());

        let mut s = step("echo 'build 17 ok'");
        s.context_save = vec![
            SaveRule::parse("log").unwrap(),
            SaveRule::parse(r"build=regex:build (\d+)").unwrap(),
            SaveRule::parse(r"missing=regex:nope (\d+)").unwrap(),
        ];
        let mut ctx = ExecutionContext::new();
        let result = runner.run(&s, &mut ctx, &[]);

        assert!(result.passed());
        assert_eq!(ctx.get("log"), Some(&Value::from("build 17 ok")));
        assert_eq!(ctx.get("build"), Some(&Value::from("17")));
        assert!(!ctx.contains("missing"));
    }

    #[test]
    fn failed_step_saves_nothing() {
        let dir = TempDir::new().unwrap();
        let facts = MapFacts::new();
        let runner = StepRunner::new(dir.path(), &facts, &Config::default());

        let mut s = step("echo partial; echo 'disk full' >&2; exit 4");
        s.context_save = vec![SaveRule::parse("out").unwrap()];
        let mut ctx = ExecutionContext::new();
        let result = runner.run(&s, &mut ctx, &[]);

        assert!(!result.passed());
        assert_eq!(result.exit_code, Some(4));
        assert_eq!(result.failure_detail(), "exited with code 4: disk full");
        assert!(ctx.is_empty());
    }

    #[test]
    fn false_condition_skips_without_spawning() {
        let dir = TempDir::new().unwrap();
        let facts = MapFacts::new().with("deploy", false);
        let runner = StepRunner::new(dir.path(), &facts, &Config::default());

        let mut s = step("touch ran");
        s.condition = Some(ConditionExpr::predicate("deploy == true").unwrap());
        let mut ctx = ExecutionContext::new();
        let result = runner.run(&s, &mut ctx, &[]);

        assert!(result.skipped);
        assert!(result.passed());
        assert_eq!(result.skip_reason.as_deref(), Some("deploy == true"));
        assert!(!dir.path().join("ran").exists());
    }

    #[test]
    fn condition_sees_context_and_command_is_interpolated() {
        let dir = TempDir::new().unwrap();
        let facts = MapFacts::new();
        let runner = StepRunner::new(dir.path(), &facts, &Config::default());

        let mut s = step("echo {{name}} > \"$CHAIN_CTX_NAME.$EXTRA\"");
        s.condition = Some(ConditionExpr::predicate("context.name == widget").unwrap());
        let mut ctx = ExecutionContext::new();
        ctx.set("name", "widget");
        let env = vec![("EXTRA".to_string(), "txt".to_string())];
        let result = runner.run(&s, &mut ctx, &env);

        assert!(result.passed(), "{result:?}");
        assert_eq!(result.command, "echo widget > \"$CHAIN_CTX_NAME.$EXTRA\"");
        let written = std::fs::read_to_string(dir.path().join("widget.txt")).unwrap();
        assert_eq!(written.trim(), "widget");
    }

    #[test]
    fn timeout_is_a_failure() {
        let dir = TempDir::new().unwrap();
        let facts = MapFacts::new();
        let config = Config {
            step_timeout_seconds: 1,
            ..Config::default()
        };
        let runner = StepRunner::new(dir.path(), &facts, &config);

        let result = runner.run(&step("sleep 5"), &mut ExecutionContext::new(), &[]);
        assert!(result.timed_out);
        assert!(!result.passed());
        assert_eq!(result.failure_detail(), "timed out");
    }
}
