//! Library for the Bastion CLI: configuration and corpus loading plus the
//! command implementations used by the `bastion` binary.

pub mod commands;
pub mod corpus;
pub mod output;

pub use commands::*;
pub use corpus::CorpusEntry;
pub use output::OutputFormat;
