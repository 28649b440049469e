use crate::cmd::run::{report, ChainExit};
use crate::cmd::Project;
use crate::output::print_json;
use chain_core::executor::ChainExecutor;

/// Resume or abandon a dangling run.
pub fn run(project: &Project, id: &str, resume: bool, json: bool) -> anyhow::Result<()> {
    let loaded = project.registry()?;
    let ledger = project.ledger()?;
    let facts = project.facts(&ledger);
    let executor = ChainExecutor::new(
        &project.root,
        &loaded.registry,
        &ledger,
        &project.config,
        &facts,
    );

    if resume {
        let run = executor.resume(id)?;
        report(&run, json)?;
        return ChainExit::check(&run);
    }

    let run = executor.abandon(id)?;
    if json {
        return print_json(&run);
    }
    println!(
        "run {} of '{}' marked {}: {}",
        run.id,
        run.chain_name,
        run.state,
        run.error.as_deref().unwrap_or("")
    );
    Ok(())
}
