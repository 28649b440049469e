use crate::cmd::Project;
use crate::output::print_json;
use chain_core::{
    context::ExecutionContext,
    executor::{ChainExecutor, Invocation},
    run::{format_elapsed, RunState},
};
use dialoguer::Confirm;
use serde::Serialize;
use std::io::IsTerminal;
use std::path::Path;

#[derive(Serialize)]
struct Candidate<'a> {
    name: &'a str,
    description: &'a str,
    prompt: &'a str,
    reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<RunState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Evaluate every trigger and offer the chains whose conditions hold.
///
/// Informational: problems are reported but the exit code is always 0.
pub fn run(
    root: &Path,
    chains: Option<&Path>,
    yes: bool,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let checked =
        Project::open(root, chains).and_then(|project| check(&project, yes, dry_run, json));
    if let Err(e) = checked {
        eprintln!("warning: {e:#}");
    }
    Ok(())
}

fn check(project: &Project, yes: bool, dry_run: bool, json: bool) -> anyhow::Result<()> {
    let loaded = project.registry()?;
    for rejected in &loaded.rejected {
        eprintln!("warning: skipping {rejected}");
    }

    let ledger = project.ledger()?;
    let facts = project.facts(&ledger);
    let executor = ChainExecutor::new(
        &project.root,
        &loaded.registry,
        &ledger,
        &project.config,
        &facts,
    );

    let triggered = executor.triggered();
    if triggered.is_empty() && !json {
        println!("No chains triggered.");
        return Ok(());
    }

    // Without a terminal there is nobody to answer the prompt.
    let interactive = !json && std::io::stdin().is_terminal();
    let offer = !dry_run && (yes || interactive);

    let mut candidates = Vec::with_capacity(triggered.len());
    for (def, eval) in &triggered {
        let prompt = def
            .triggers
            .as_ref()
            .map(|t| t.prompt.as_str())
            .unwrap_or_default();
        let mut candidate = Candidate {
            name: &def.name,
            description: &def.description,
            prompt,
            reason: eval.reason.clone(),
            run_id: None,
            state: None,
            error: None,
        };

        if !json {
            println!("{}  {}", def.name, def.description);
            println!("  trigger: {}", eval.reason);
        }

        if offer {
            let accepted = match answer(yes, || {
                Confirm::new().with_prompt(prompt).default(false).interact()
            }) {
                Ok(accepted) => accepted,
                Err(e) => {
                    println!("  not run: {e}");
                    candidate.error = Some(e);
                    candidates.push(candidate);
                    continue;
                }
            };
            match executor.execute(
                &def.name,
                Invocation::Triggered { accepted },
                ExecutionContext::new(),
                0,
            ) {
                Ok(run) => {
                    if !json {
                        println!(
                            "  {}: {}/{} steps in {}",
                            run.state,
                            run.current_step_index,
                            run.step_count,
                            format_elapsed(run.elapsed())
                        );
                        if let Some(error) = &run.error {
                            println!("  {error}");
                        }
                    }
                    candidate.run_id = Some(run.id);
                    candidate.state = Some(run.state);
                    candidate.error = run.error;
                }
                Err(e) => {
                    if !json {
                        println!("  not run: {e}");
                    }
                    candidate.error = Some(e.to_string());
                }
            }
        } else if !json {
            println!("  prompt: {prompt}");
        }

        candidates.push(candidate);
    }

    if json {
        print_json(&candidates)?;
    } else if !offer && !dry_run {
        println!("\nRun `chain check --yes` to run these chains without prompting.");
    }
    Ok(())
}

/// `--yes` accepts without asking. A prompt that cannot be shown becomes an
/// error for that chain alone.
fn answer(yes: bool, ask: impl FnOnce() -> dialoguer::Result<bool>) -> Result<bool, String> {
    if yes {
        return Ok(true);
    }
    ask().map_err(|e| format!("prompt failed: {e}"))
}
