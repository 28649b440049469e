use crate::cmd::Project;
use crate::output::{one_line, print_json, print_table};
use serde::Serialize;

#[derive(Serialize)]
struct ChainSummary<'a> {
    name: &'a str,
    description: &'a str,
    steps: usize,
    triggers: bool,
    prerequisites: bool,
}

#[derive(Serialize)]
struct ListOutput<'a> {
    chains: Vec<ChainSummary<'a>>,
    rejected: Vec<String>,
}

pub fn run(project: &Project, json: bool) -> anyhow::Result<()> {
    let loaded = project.registry()?;

    let chains: Vec<ChainSummary> = loaded
        .registry
        .iter()
        .map(|def| ChainSummary {
            name: &def.name,
            description: &def.description,
            steps: def.steps.len(),
            triggers: def.triggers.is_some(),
            prerequisites: def.prerequisites.is_some(),
        })
        .collect();
    let rejected: Vec<String> = loaded.rejected.iter().map(|e| e.to_string()).collect();

    if json {
        return print_json(&ListOutput { chains, rejected });
    }

    if chains.is_empty() {
        println!("No chains defined.");
    } else {
        let flag = |b: bool| (if b { "yes" } else { "-" }).to_string();
        let rows = chains
            .iter()
            .map(|c| {
                vec![
                    c.name.to_string(),
                    c.steps.to_string(),
                    flag(c.triggers),
                    flag(c.prerequisites),
                    one_line(c.description, 60),
                ]
            })
            .collect();
        print_table(&["NAME", "STEPS", "TRIGGERS", "PREREQS", "DESCRIPTION"], rows);
    }

    if !rejected.is_empty() {
        println!("\nRejected:");
        for r in &rejected {
            println!("  - {r}");
        }
    }
    Ok(())
}
