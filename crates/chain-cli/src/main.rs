mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "chain",
    about = "Run declarative command chains with triggers, prerequisites and checkpointed history",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .chain/ or .git/)
    #[arg(long, global = true, env = "CHAIN_ROOT")]
    root: Option<PathBuf>,

    /// Chain definitions file (default: .chain/chains.yaml)
    #[arg(long, global = true, env = "CHAIN_DEFINITIONS")]
    chains: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Nesting depth, set by a parent chain for commands it runs
    #[arg(long, global = true, env = "CHAIN_DEPTH", default_value_t = 0, hide = true)]
    depth: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate triggers and offer to run the chains whose conditions hold
    Check {
        /// Run every triggered chain without asking
        #[arg(long, short = 'y')]
        yes: bool,

        /// Only list triggered chains
        #[arg(long)]
        dry_run: bool,
    },

    /// List defined chains
    List,

    /// Show running, recently completed and recently failed runs
    Status {
        /// Rows per section (default: status_limit from config)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show one run from the ledger
    Show { id: String },

    /// Check the definitions file, failing on any invalid chain
    Validate,

    /// Resolve a dangling run left by a process that died
    Reconcile {
        id: String,

        /// Continue from the recorded step with the saved context
        #[arg(long, conflicts_with = "abandon", required_unless_present = "abandon")]
        resume: bool,

        /// Mark the run failed without running anything
        #[arg(long)]
        abandon: bool,
    },

    /// Run a chain: chain <name> [key=value ...]
    #[command(external_subcommand)]
    Run(Vec<String>),
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let chains = cli.chains.as_deref();
    let result = match cli.command {
        Commands::Check { yes, dry_run } => cmd::check::run(&root, chains, yes, dry_run, cli.json),
        command => cmd::Project::open(&root, chains).and_then(|project| match command {
            Commands::List => cmd::list::run(&project, cli.json),
            Commands::Status { limit } => cmd::status::run(&project, limit, cli.json),
            Commands::Show { id } => cmd::show::run(&project, &id, cli.json),
            Commands::Validate => cmd::validate::run(&project, cli.json),
            Commands::Reconcile { id, resume, .. } => {
                cmd::reconcile::run(&project, &id, resume, cli.json)
            }
            Commands::Run(args) => cmd::run::run(&project, &args, cli.depth, cli.json),
            Commands::Check { .. } => unreachable!("handled above"),
        }),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        let code = e
            .downcast_ref::<cmd::run::ChainExit>()
            .map(|exit| exit.exit_code())
            .unwrap_or(1);
        std::process::exit(code);
    }
}
