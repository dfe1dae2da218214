//! Shared CLI pieces: argument definitions, wiring and subcommands

pub mod args;
pub mod commands;
pub mod completions;
