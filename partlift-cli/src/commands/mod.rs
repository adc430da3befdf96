//! CLI subcommands.

pub mod checkpoints;
pub mod common;
pub mod config;
pub mod download;
pub mod upload;
