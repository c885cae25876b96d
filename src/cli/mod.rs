//! CLI module for the dumpload binary

pub mod args;
pub mod commands;
pub mod output;

pub use args::Cli;
