//! CLI command implementations.

pub mod args;
pub mod command;
pub mod run;
