//! The run state machine.
//!
//! ```text
//! Pending ──prerequisites false / prompt declined──▶ Aborted
//!    │
//!    ▼
//! Running ──step passed or skipped (index += 1)──▶ Running
//!    │                                  │
//!    │ step failed or timed out         │ index == steps
//!    ▼                                  ▼
//!  Failed ─▶ on-failure             Succeeded ─▶ on-success
//! ```
//!
//! Every transition and every step is checkpointed to the ledger before the
//! next action. A ledger write failure stops the run at once.

use crate::condition::{EvalEnv, Evaluation};
use crate::config::Config;
use crate::context::ExecutionContext;
use crate::error::{ChainError, Result};
use crate::facts::{ContextFacts, FactProvider};
use crate::io;
use crate::ledger::RunLedger;
use crate::paths;
use crate::registry::{ChainDefinition, ChainRegistry, Handler};
use crate::run::{ChainRun, RunState};
use crate::runner::StepRunner;
use crate::shell;
use std::path::Path;

/// How a run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Named explicitly by the user or by a handler.
    Manual,
    /// Offered because its trigger held; `accepted` is the prompt answer.
    Triggered { accepted: bool },
}

pub struct ChainExecutor<'a> {
    root: &'a Path,
    registry: &'a ChainRegistry,
    ledger: &'a RunLedger,
    config: &'a Config,
    facts: &'a dyn FactProvider,
}

impl<'a> ChainExecutor<'a> {
    pub fn new(
        root: &'a Path,
        registry: &'a ChainRegistry,
        ledger: &'a RunLedger,
        config: &'a Config,
        facts: &'a dyn FactProvider,
    ) -> Self {
        Self {
            root,
            registry,
            ledger,
            config,
            facts,
        }
    }

    /// Run chain `name` to a terminal state.
    ///
    /// Unknown chains, excessive nesting and a run already active for the
    /// chain are returned as errors with nothing recorded. Prerequisite and
    /// step failures are not errors: they come back as an `Aborted` or
    /// `Failed` run with `error` set.
    pub fn execute(
        &self,
        name: &str,
        invocation: Invocation,
        seed: ExecutionContext,
        depth: u32,
    ) -> Result<ChainRun> {
        let def = self.registry.require(name)?;
        if depth > self.config.max_chain_depth {
            return Err(ChainError::DepthExceeded {
                chain: name.to_string(),
                depth,
                max: self.config.max_chain_depth,
            });
        }

        let run = ChainRun::new(def, seed, depth);
        self.ledger.claim(&run)?;
        tracing::info!(chain = name, run = %run.id, depth, "run created");
        self.drive(def, run, invocation)
    }

    /// Continue a dangling run from its recorded step with its saved context.
    pub fn resume(&self, run_id: &str) -> Result<ChainRun> {
        let mut run = self.dangling(run_id)?;
        let def = self.registry.require(&run.chain_name)?;
        if def.steps.len() != run.step_count {
            return Err(ChainError::config(
                &run.chain_name,
                "steps",
                format!(
                    "definition now has {} steps but run {} recorded {}; abandon it instead",
                    def.steps.len(),
                    run.id,
                    run.step_count
                ),
            ));
        }

        run.pid = std::process::id();
        self.ledger.append(&run)?;
        tracing::info!(
            chain = %run.chain_name,
            run = %run.id,
            step = run.current_step_index + 1,
            "resuming dangling run"
        );
        self.drive(def, run, Invocation::Manual)
    }

    /// Close a dangling run without running anything: `Pending` runs become
    /// `Aborted`, `Running` runs become `Failed`. No handlers fire.
    pub fn abandon(&self, run_id: &str) -> Result<ChainRun> {
        let mut run = self.dangling(run_id)?;
        if run.state == RunState::Pending {
            run.finish(RunState::Aborted, Some("abandoned before start".to_string()));
        } else {
            let error = format!(
                "abandoned at step {} of {}",
                run.current_step_index + 1,
                run.step_count
            );
            run.finish(RunState::Failed, Some(error));
        }
        self.ledger.append(&run)?;
        tracing::info!(chain = %run.chain_name, run = %run.id, state = %run.state, "run abandoned");
        Ok(run)
    }

    /// Chains whose trigger conditions hold right now, in name order, with
    /// the predicate that decided each.
    pub fn triggered(&self) -> Vec<(&'a ChainDefinition, Evaluation)> {
        let env = self.eval_env(self.facts);
        self.registry
            .triggered()
            .filter_map(|def| {
                let trigger = def.triggers.as_ref()?;
                let eval = trigger.conditions.explain(&env);
                tracing::debug!(chain = %def.name, passed = eval.passed, reason = %eval.reason, "trigger evaluated");
                eval.passed.then_some((def, eval))
            })
            .collect()
    }

    fn dangling(&self, run_id: &str) -> Result<ChainRun> {
        let run = self
            .ledger
            .find(run_id)?
            .ok_or_else(|| ChainError::RunNotFound(run_id.to_string()))?;
        if !run.is_dangling() {
            let state = if run.is_terminal() {
                run.state.to_string()
            } else {
                format!("{} in live process {}", run.state, run.pid)
            };
            return Err(ChainError::NotDangling { id: run.id, state });
        }
        Ok(run)
    }

    fn drive(
        &self,
        def: &ChainDefinition,
        mut run: ChainRun,
        invocation: Invocation,
    ) -> Result<ChainRun> {
        if run.state == RunState::Pending {
            if let Some(reason) = self.abort_reason(def, &run, invocation) {
                tracing::info!(chain = %run.chain_name, run = %run.id, reason = %reason, "run aborted");
                run.finish(RunState::Aborted, Some(reason));
                self.ledger.append(&run)?;
                return Ok(run);
            }
            run.start();
            self.ledger.append(&run)?;
        }

        let runner = StepRunner::new(self.root, self.facts, self.config);
        let total = def.steps.len();

        while run.current_step_index < total {
            let index = run.current_step_index;
            let env = self.run_env(&run, Some(index));
            let result = runner.run(&def.steps[index], &mut run.context, &env);

            if !result.passed() {
                let error = format!(
                    "step {} of {} failed: `{}` {}",
                    index + 1,
                    total,
                    result.command,
                    result.failure_detail()
                );
                tracing::warn!(chain = %run.chain_name, run = %run.id, "{error}");
                run.finish(RunState::Failed, Some(error));
                self.ledger.append(&run)?;
                if let Some(handler) = &def.on_failure {
                    self.invoke_handler(handler, &run);
                }
                return Ok(run);
            }

            if result.skipped {
                tracing::info!(
                    chain = %run.chain_name,
                    step = index + 1,
                    reason = result.skip_reason.as_deref().unwrap_or(""),
                    "step skipped"
                );
            } else {
                tracing::info!(
                    chain = %run.chain_name,
                    step = index + 1,
                    duration = %shell::format_duration(result.duration),
                    "step passed"
                );
            }
            run.advance();
            self.ledger.append(&run)?;
        }

        run.finish(RunState::Succeeded, None);
        self.ledger.append(&run)?;
        tracing::info!(chain = %run.chain_name, run = %run.id, "run succeeded");
        self.export_context(def, &run);
        if let Some(handler) = &def.on_success {
            self.invoke_handler(handler, &run);
        }
        Ok(run)
    }

    fn abort_reason(
        &self,
        def: &ChainDefinition,
        run: &ChainRun,
        invocation: Invocation,
    ) -> Option<String> {
        if invocation == (Invocation::Triggered { accepted: false }) {
            return Some("trigger prompt declined".to_string());
        }
        if let Some(pre) = &def.prerequisites {
            let facts = ContextFacts {
                context: &run.context,
                fallback: self.facts,
            };
            let eval = pre.expr.explain(&self.eval_env(&facts));
            if !eval.passed {
                return Some(format!("{} (failed: {})", pre.error, eval.reason));
            }
        }
        None
    }

    fn eval_env<'e>(&'e self, facts: &'e dyn FactProvider) -> EvalEnv<'e> {
        EvalEnv {
            root: self.root,
            facts,
            exec_timeout: self.config.exec_timeout(),
        }
    }

    /// Run metadata for subprocesses. `CHAIN_DEPTH` is the depth a `chain`
    /// started by the subprocess will run at.
    fn run_env(&self, run: &ChainRun, step: Option<usize>) -> Vec<(String, String)> {
        let mut env = vec![
            ("CHAIN_NAME".to_string(), run.chain_name.clone()),
            ("CHAIN_RUN_ID".to_string(), run.id.clone()),
            ("CHAIN_DEPTH".to_string(), (run.depth + 1).to_string()),
        ];
        if let Some(index) = step {
            env.push(("CHAIN_STEP".to_string(), (index + 1).to_string()));
        }
        env
    }

    /// Fire an `on-success` / `on-failure` handler once. Its outcome is logged
    /// and never changes the parent run.
    fn invoke_handler(&self, handler: &str, run: &ChainRun) {
        let command = run.context.interpolate(handler);
        match Handler::parse(&command) {
            Handler::Chain { name, args } => {
                let mut seed = run.context.clone();
                match ExecutionContext::from_assignments(&args) {
                    Ok(extra) => seed.merge(&extra),
                    Err(e) => tracing::warn!(handler = %command, error = %e, "ignoring handler arguments"),
                }
                match self.execute(&name, Invocation::Manual, seed, run.depth + 1) {
                    Ok(child) => tracing::info!(
                        parent = %run.chain_name,
                        chain = %name,
                        state = %child.state,
                        "handler chain finished"
                    ),
                    Err(e) => tracing::warn!(parent = %run.chain_name, handler = %command, error = %e, "handler chain not run"),
                }
            }
            Handler::Shell(cmd) => {
                let mut env = run.context.env_vars();
                env.extend(self.run_env(run, None));
                env.push(("CHAIN_OUTCOME".to_string(), run.state.to_string()));
                let out = shell::run_shell(
                    &cmd,
                    self.root,
                    &env,
                    self.config.handler_timeout(),
                    self.config.max_output_bytes,
                );
                if out.success() {
                    tracing::info!(parent = %run.chain_name, handler = %cmd, "handler finished");
                } else {
                    tracing::warn!(
                        parent = %run.chain_name,
                        handler = %cmd,
                        exit_code = ?out.exit_code,
                        timed_out = out.timed_out,
                        stderr = %out.stderr.trim(),
                        "handler failed"
                    );
                }
            }
        }
    }

    /// Write the chain-level saved keys to `.chain/context/<chain>.yaml`.
    fn export_context(&self, def: &ChainDefinition, run: &ChainRun) {
        if def.context_save.is_empty() {
            return;
        }
        let selected = run.context.select(&def.context_save);
        let path = paths::context_export_path(self.root, &def.name);
        match io::write_yaml(&path, &selected) {
            Ok(()) => tracing::debug!(chain = %def.name, keys = selected.len(), "context exported"),
            Err(e) => tracing::warn!(chain = %def.name, error = %e, "failed to export context"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
