use crate::cmd::run::ChainExit;
use crate::cmd::Project;
use crate::output::print_json;
use chain_core::{registry::ChainRegistry, ChainError};
use serde::Serialize;

#[derive(Serialize)]
struct ValidateOutput {
    path: String,
    chains: Vec<String>,
}

/// Strict load: any invalid chain fails the command.
pub fn run(project: &Project, json: bool) -> anyhow::Result<()> {
    let path = project.definitions_path()?;
    let registry = match ChainRegistry::load(&path) {
        Ok(r) => r,
        Err(e @ (ChainError::Config { .. } | ChainError::ConfigErrors(_))) => {
            return Err(ChainExit::Rejected(e).into())
        }
        Err(e) => return Err(anyhow::Error::new(e).context(format!("failed to load {}", path.display()))),
    };

    if json {
        return print_json(&ValidateOutput {
            path: path.display().to_string(),
            chains: registry.names(),
        });
    }
    println!("{}: {} chain(s) valid", path.display(), registry.len());
    Ok(())
}
