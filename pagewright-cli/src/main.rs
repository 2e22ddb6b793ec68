//! # pagewright CLI
//!
//! Command-line interface for the pagewright page-build orchestrator.

mod commands;

use clap::{Parser, Subcommand};
use pagewright_core::config::CONFIG_FILE;
use pagewright_core::BuildMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pagewright")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = CONFIG_FILE)]
    config: PathBuf,

    /// Override the configured build mode (development or production)
    #[arg(long, env = "PAGEWRIGHT_MODE")]
    mode: Option<BuildMode>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the site into the output directory
    Build,

    /// Start the development server with live reload
    Serve {
        /// Server port (defaults to server.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Build in memory and list pages matching a query
    Pages {
        /// Attribute filter, `key=value` (repeatable)
        #[arg(long = "filter", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Attribute to sort by
        #[arg(long)]
        sort: Option<String>,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = commands::load_config(&cli.config, cli.mode)?;

    match cli.command {
        Commands::Build => commands::build_site(config).await,
        Commands::Serve { port } => commands::serve(config, port).await,
        Commands::Pages {
            filters,
            sort,
            desc,
            json,
        } => {
            let opts = commands::PagesOptions {
                filters,
                sort,
                desc,
                json,
            };
            commands::list_pages(config, opts).await
        }
    }
}
