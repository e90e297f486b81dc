//! Command-line argument parsing.

pub mod commands;

pub use commands::{Command, Opt};
