pub mod condition;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod extract;
pub mod facts;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod registry;
pub mod run;
pub mod runner;
pub mod shell;

pub use error::{ChainError, Result};
