//! Huddle command-line driver
//!
//! Runs the unread engine against in-memory collaborators and prints every
//! published summary as a JSON line.

mod simulate;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use huddle_logging::HuddleSubscriberBuilder;
use huddle_unread::UnreadConfig;

use crate::simulate::Scenario;

#[derive(Parser, Debug)]
#[command(name = "huddle", about = "Unread-activity engine for Huddle groups", version)]
struct Cli {
    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Human-readable log output instead of JSONL
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted session and print each summary as JSON
    Simulate {
        /// Number of groups the demo user starts in
        #[arg(long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=500))]
        groups: u32,

        /// Messages already in each group before tracking starts
        #[arg(long, default_value_t = 20)]
        backlog: u32,

        /// Pause between script steps, in milliseconds
        #[arg(long, default_value_t = 50)]
        step_ms: u64,

        /// Engine configuration file (TOML)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default engine configuration as TOML
    Config,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<UnreadConfig> {
    let Some(path) = path else {
        return Ok(UnreadConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let config: UnreadConfig =
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = HuddleSubscriberBuilder::new()
        .with_level(cli.log_level.as_str())
        .with_pretty(cli.pretty)
        .init();

    match cli.command {
        Command::Simulate {
            groups,
            backlog,
            step_ms,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let scenario = Scenario {
                groups,
                backlog,
                step: std::time::Duration::from_millis(step_ms),
            };
            simulate::run(scenario, config).await?;
        }
        Command::Config => {
            print!("{}", toml::to_string_pretty(&UnreadConfig::default())?);
        }
    }

    Ok(())
}
