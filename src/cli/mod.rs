//! Command-line interface.

mod commands;
mod helpers;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser, Debug)]
#[command(name = "boardwatch", version, about = "Watch a forum board and archive linked files")]
pub struct Cli {
    /// Config file (TOML or JSON); discovered automatically when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Data directory, overriding the config file
    #[arg(long, global = true, env = "BOARDWATCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, env = "BOARDWATCH_EMAIL", hide_env_values = true)]
    pub email: Option<String>,

    #[arg(long, global = true, env = "BOARDWATCH_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the board until interrupted
    Run {
        /// Show the browser window
        #[arg(long)]
        headed: bool,
        /// Seed for the pacing random source
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Show reply tracker statistics
    Status {
        /// Show the watermark of one thread
        #[arg(long)]
        thread: Option<u64>,
    },
    /// Delete expired thread watermarks
    Gc {
        /// Override the configured retention window
        #[arg(long)]
        retention_days: Option<u64>,
    },
    /// Resolve one link and print the download target without fetching it
    Resolve {
        url: String,
        #[arg(long, default_value_t = 0)]
        thread: u64,
        #[arg(long, default_value_t = 1)]
        reply: u32,
    },
}

impl Cli {
    fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            data_dir: self.data_dir.clone(),
            email: self.email.clone(),
            password: self.password.clone(),
        }
    }
}

/// Run the parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut settings = load_settings_with_options(cli.load_options())
        .await
        .map_err(anyhow::Error::msg)?;

    match cli.command {
        Commands::Run { headed, seed } => {
            if headed {
                settings.headless = false;
            }
            commands::run::cmd_run(&settings, seed).await
        }
        Commands::Status { thread } => commands::status::cmd_status(&settings, thread),
        Commands::Gc { retention_days } => {
            if let Some(days) = retention_days {
                settings.retention_days = days;
            }
            commands::gc::cmd_gc(&settings)
        }
        Commands::Resolve { url, thread, reply } => {
            commands::resolve::cmd_resolve(&settings, &url, thread, reply).await
        }
    }
}
