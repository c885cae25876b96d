//! CLI command handlers

pub mod load;

pub use load::handle_load;
