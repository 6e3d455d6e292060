// src/cli.rs
//! CLI definitions for repocopy
//!
//! This module contains the command-line interface definitions using clap.
//! Command handling lives in `main.rs`.

use clap::{Parser, Subcommand};
use repocopy::Suite;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "repocopy")]
#[command(version)]
#[command(about = "Verify a content server's unit copy behavior", long_about = None)]
pub struct Cli {
    /// Path to the TOML configuration file (default: $REPOCOPY_CONFIG)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered scenarios
    List {
        /// Only scenarios of this suite (copy, sync)
        #[arg(short, long)]
        suite: Option<Suite>,
    },

    /// Run scenarios against the configured server
    Run {
        /// Only scenarios of this suite (copy, sync)
        #[arg(short, long)]
        suite: Option<Suite>,

        /// Run only the named scenario (repeatable)
        #[arg(long = "scenario")]
        scenarios: Vec<String>,

        /// Write a JSON run report to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },
}
