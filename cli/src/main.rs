use agora_cli::display;
use agora_cli::{Scenario, Simulation};
use agora_dao::OrchestratorConfig;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use owo_colors::OwoColorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agorad")]
#[command(about = "Agora governance and consensus node", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON scenario on a simulated clock
    Simulate {
        /// Scenario file
        scenario: PathBuf,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Validate the configuration and print the effective values
    CheckConfig,
}

fn load_config(path: Option<&PathBuf>) -> Result<OrchestratorConfig> {
    match path {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(OrchestratorConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::CheckConfig => {
            println!("{}", "✓ Configuration is valid".green().bold());
            println!("{}", config.to_toml_string()?);
        }
        Commands::Simulate { scenario, json } => {
            let scenario = Scenario::load(&scenario)?;
            info!("🚀 Running scenario with {} steps", scenario.steps.len());
            let report = Simulation::run(config, scenario).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                display::print_report(&report);
            }
        }
    }
    Ok(())
}
