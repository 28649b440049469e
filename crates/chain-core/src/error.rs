use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("chain definitions not found: {0}")]
    DefinitionsNotFound(String),

    #[error("invalid chain '{chain}' ({field}): {message}")]
    Config {
        chain: String,
        field: String,
        message: String,
    },

    #[error("{}", render_rejections(.0))]
    ConfigErrors(Vec<ChainError>),

    #[error("unknown chain '{name}'; available: {}", .available.join(", "))]
    UnknownChain {
        name: String,
        available: Vec<String>,
    },

    #[error("chain '{chain}' is already running (run {run_id})")]
    Concurrency { chain: String, run_id: String },

    #[error("chain '{chain}' invoked at depth {depth}, limit is {max}")]
    DepthExceeded { chain: String, depth: u32, max: u32 },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("run {id} is {state}; only dangling runs can be reconciled")]
    NotDangling { id: String, state: String },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ChainError {
    pub fn config(
        chain: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        ChainError::Config {
            chain: chain.into(),
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors that reject an invocation before anything is recorded.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ChainError::Config { .. }
                | ChainError::ConfigErrors(_)
                | ChainError::UnknownChain { .. }
                | ChainError::Concurrency { .. }
                | ChainError::DepthExceeded { .. }
        )
    }
}

fn render_rejections(errors: &[ChainError]) -> String {
    let mut out = format!("{} chain definition(s) rejected:", errors.len());
    for e in errors {
        out.push_str("\n  - ");
        out.push_str(&e.to_string());
    }
    out
}

pub type Result<T> = std::result::Result<T, ChainError>;
