use crate::cmd::Project;
use crate::output::{local_time, one_line, print_json, print_section};
use anyhow::Context;
use chain_core::run::{format_elapsed, ChainRun};
use serde::Serialize;

#[derive(Serialize)]
struct RunningRun<'a> {
    #[serde(flatten)]
    run: &'a ChainRun,
    dangling: bool,
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    running: Vec<RunningRun<'a>>,
    completed: &'a [ChainRun],
    failed: &'a [ChainRun],
}

pub fn run(project: &Project, limit: Option<usize>, json: bool) -> anyhow::Result<()> {
    let limit = limit.unwrap_or(project.config.status_limit);
    let ledger = project.ledger()?;
    let running = ledger.list_running().context("failed to list running runs")?;
    let completed = ledger.list_completed(limit).context("failed to list completed runs")?;
    let failed = ledger.list_failed(limit).context("failed to list failed runs")?;

    if json {
        let running = running
            .iter()
            .map(|run| RunningRun {
                run,
                dangling: run.is_dangling(),
            })
            .collect();
        return print_json(&StatusOutput {
            running,
            completed: &completed,
            failed: &failed,
        });
    }

    let rows = running
        .iter()
        .map(|r| {
            let mut state = r.state.to_string();
            if r.is_dangling() {
                state.push_str(" (dangling)");
            }
            vec![
                r.chain_name.clone(),
                format!("{}/{}", r.current_step_index + 1, r.step_count),
                format_elapsed(r.elapsed()),
                state,
                r.id.clone(),
            ]
        })
        .collect();
    print_section("Running", &["NAME", "STEP", "ELAPSED", "STATE", "RUN"], rows);

    let rows = completed
        .iter()
        .map(|r| {
            vec![
                r.chain_name.clone(),
                local_time(r.finished_at()),
                format_elapsed(r.elapsed()),
                r.id.clone(),
            ]
        })
        .collect();
    print_section("Completed", &["NAME", "FINISHED", "DURATION", "RUN"], rows);

    let rows = failed
        .iter()
        .map(|r| {
            vec![
                r.chain_name.clone(),
                local_time(r.finished_at()),
                r.state.to_string(),
                one_line(r.error.as_deref().unwrap_or(""), 80),
            ]
        })
        .collect();
    print_section("Failed", &["NAME", "FINISHED", "STATE", "ERROR"], rows);

    if running.iter().any(|r| r.is_dangling()) {
        println!("Dangling runs belong to processes that are gone; resolve them with `chain reconcile <run> --resume|--abandon`.");
    }
    Ok(())
}
