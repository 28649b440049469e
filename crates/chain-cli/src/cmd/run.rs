use crate::cmd::Project;
use crate::output::print_json;
use anyhow::Context;
use chain_core::{
    context::ExecutionContext,
    executor::{ChainExecutor, Invocation},
    ledger::RunLedger,
    registry::Loaded,
    run::{format_elapsed, ChainRun, RunState},
    ChainError,
};

// ---------------------------------------------------------------------------
// ChainExit: typed non-zero exit codes, mapped in main
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ChainExit {
    Failed { chain: String, error: String },
    Aborted { chain: String, error: String },
    /// Refused before anything ran: unknown or invalid chain, already
    /// running, or nested too deep.
    Rejected(ChainError),
}

impl ChainExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            ChainExit::Failed { .. } => 1,
            ChainExit::Aborted { .. } => 2,
            ChainExit::Rejected(_) => 3,
        }
    }

    /// `Ok` for a succeeded run, the matching exit otherwise.
    pub fn check(run: &ChainRun) -> anyhow::Result<()> {
        let chain = run.chain_name.clone();
        let error = run.error.clone().unwrap_or_default();
        match run.state {
            RunState::Succeeded => Ok(()),
            RunState::Failed => Err(ChainExit::Failed { chain, error }.into()),
            RunState::Aborted => Err(ChainExit::Aborted { chain, error }.into()),
            RunState::Pending | RunState::Running => {
                anyhow::bail!("run {} stopped while {}", run.id, run.state)
            }
        }
    }
}

impl std::fmt::Display for ChainExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainExit::Failed { chain, error } => write!(f, "chain '{chain}' failed: {error}"),
            ChainExit::Aborted { chain, error } => write!(f, "chain '{chain}' aborted: {error}"),
            ChainExit::Rejected(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ChainExit {}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

pub fn run(project: &Project, args: &[String], depth: u32, json: bool) -> anyhow::Result<()> {
    let (name, assignments) = args.split_first().context("no chain name given")?;
    let seed = ExecutionContext::from_assignments(assignments)
        .map_err(|e| anyhow::anyhow!("invalid argument for chain '{name}': {e}"))?;

    let Loaded {
        registry,
        mut rejected,
    } = project.registry()?;
    let broken = rejected
        .iter()
        .position(|e| matches!(e, ChainError::Config { chain, .. } if chain == name));
    if let Some(i) = broken {
        return Err(ChainExit::Rejected(rejected.swap_remove(i)).into());
    }

    let ledger = project.ledger()?;
    let facts = project.facts(&ledger);
    let executor = ChainExecutor::new(&project.root, &registry, &ledger, &project.config, &facts);

    let run = match executor.execute(name, Invocation::Manual, seed, depth) {
        Ok(run) => run,
        Err(e) if e.is_rejection() => {
            hint_dangling(&ledger, &e);
            return Err(ChainExit::Rejected(e).into());
        }
        Err(e) => return Err(anyhow::Error::new(e).context(format!("chain '{name}' stopped"))),
    };

    report(&run, json)?;
    ChainExit::check(&run)
}

/// Print a finished run: the full record as JSON, or a one-line summary.
pub fn report(run: &ChainRun, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(run);
    }
    if run.state == RunState::Succeeded {
        println!(
            "chain '{}' succeeded: {}/{} steps in {} (run {})",
            run.chain_name,
            run.current_step_index,
            run.step_count,
            format_elapsed(run.elapsed()),
            run.id
        );
    }
    Ok(())
}

fn hint_dangling(ledger: &RunLedger, err: &ChainError) {
    let ChainError::Concurrency { run_id, .. } = err else {
        return;
    };
    if let Ok(Some(active)) = ledger.find(run_id) {
        if active.is_dangling() {
            eprintln!(
                "hint: run {run_id} belongs to process {} which is gone; \
                 use `chain reconcile {run_id} --resume` or `--abandon`",
                active.pid
            );
        }
    }
}
