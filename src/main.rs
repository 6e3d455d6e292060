// src/main.rs

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use repocopy::{scenarios, ApiClient, HarnessConfig, Runner};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { suite } => {
            for scenario in scenarios::select(suite, &[])? {
                let mut gates = Vec::new();
                if let Some(requires) = scenario.requires {
                    gates.push(format!("server {}", requires));
                }
                for issue in scenario.known_issues {
                    gates.push(format!("issue {}", issue));
                }
                let gates = if gates.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", gates.join(", "))
                };
                println!(
                    "{:<48} {:<5} {}{}",
                    scenario.name, scenario.suite, scenario.summary, gates
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Run {
            suite,
            scenarios: names,
            report,
        } => {
            let config = HarnessConfig::resolve(cli.config.as_deref())
                .context("Failed to load configuration")?;
            let selected = scenarios::select(suite, &names)?;
            info!(
                "Running {} scenarios against {}",
                selected.len(),
                config.server.base_url
            );

            let client = ApiClient::new(&config)?;
            let runner = Runner::new(&client, &config).context("Failed to reach the server")?;
            let run = runner.run(&selected);

            if let Some(path) = report {
                run.write_json(&path)?;
                info!("Report written to {}", path.display());
            }
            println!("{}", run.summary());

            Ok(if run.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
