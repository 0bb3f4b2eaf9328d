//! Subcommand implementations

pub mod incidents;
pub mod run;
pub mod simulate;
pub mod status;
