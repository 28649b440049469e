pub mod check;
pub mod list;
pub mod reconcile;
pub mod run;
pub mod show;
pub mod status;
pub mod validate;

use anyhow::Context;
use chain_core::{
    config::Config,
    facts::ProjectFacts,
    ledger::RunLedger,
    paths,
    registry::{ChainRegistry, Loaded},
};
use std::path::{Path, PathBuf};

/// A project directory and its engine configuration.
pub struct Project {
    pub root: PathBuf,
    pub config: Config,
    chains: Option<PathBuf>,
}

impl Project {
    /// `chains` (flag or env) overrides `chains_file` from the config.
    pub fn open(root: &Path, chains: Option<&Path>) -> anyhow::Result<Self> {
        let config = Config::load(root)
            .with_context(|| format!("failed to load {}", paths::config_path(root).display()))?;
        let chains = chains
            .map(Path::to_path_buf)
            .or_else(|| config.chains_file.clone());
        Ok(Self {
            root: root.to_path_buf(),
            config,
            chains,
        })
    }

    pub fn definitions_path(&self) -> anyhow::Result<PathBuf> {
        Ok(paths::definitions_path(&self.root, self.chains.as_deref())?)
    }

    /// Valid chains, with invalid ones set aside.
    pub fn registry(&self) -> anyhow::Result<Loaded> {
        let path = self.definitions_path()?;
        ChainRegistry::load_isolating(&path)
            .with_context(|| format!("failed to load {}", path.display()))
    }

    pub fn ledger(&self) -> anyhow::Result<RunLedger> {
        let path = paths::ledger_path(&self.root);
        RunLedger::open(&path).with_context(|| format!("failed to open {}", path.display()))
    }

    /// Facts for trigger and prerequisite evaluation, built fresh per call.
    /// Sources that fail to load leave their facts unknown.
    pub fn facts(&self, ledger: &RunLedger) -> ProjectFacts {
        let last = ledger.last_activity().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "last chain activity unknown");
            None
        });
        ProjectFacts::load(&self.root, last)
    }
}
