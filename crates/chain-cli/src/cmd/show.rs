use crate::cmd::Project;
use crate::output::{local_time, print_json};
use chain_core::{run::format_elapsed, ChainError};

pub fn run(project: &Project, id: &str, json: bool) -> anyhow::Result<()> {
    let ledger = project.ledger()?;
    let run = ledger
        .find(id)?
        .ok_or_else(|| ChainError::RunNotFound(id.to_string()))?;

    if json {
        return print_json(&run);
    }

    let mut state = run.state.to_string();
    if run.is_dangling() {
        state.push_str(" (dangling)");
    }

    println!("Run:      {}", run.id);
    println!("Chain:    {}", run.chain_name);
    println!("State:    {state}");
    println!("Step:     {}/{}", run.current_step_index, run.step_count);
    println!("Created:  {}", local_time(run.created_at));
    if let Some(t) = run.started_at {
        println!("Started:  {}", local_time(t));
    }
    if let Some(t) = run.ended_at {
        println!("Ended:    {}", local_time(t));
    }
    println!("Elapsed:  {}", format_elapsed(run.elapsed()));
    if run.depth > 0 {
        println!("Depth:    {}", run.depth);
    }
    if let Some(error) = &run.error {
        println!("Error:    {error}");
    }
    if !run.context.is_empty() {
        println!("Context:");
        for (k, v) in run.context.iter() {
            println!("  {k} = {v}");
        }
    }
    Ok(())
}
