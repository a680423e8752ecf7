#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagetap::commands::{self, daemon::DaemonCommands, tool::ToolCommands};
use pagetap::config::ConfigOverrides;
use pagetap::errors::BrowserError;
use pagetap::types::OutputFormat;

const EXIT_SUCCESS: i32 = 0;
const EXIT_COMMAND_ERROR: i32 = 1;

#[derive(Parser)]
#[command(name = "pagetap")]
#[command(about = "Browser automation tools for LLM agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    overrides: ConfigOverrides,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    format: OutputFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Serve tool requests over stdin/stdout (one JSON request per line)
    Serve,

    #[command(flatten)]
    Tool(ToolCommands),
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(err) => {
            let (message, exit_code) = match err.downcast_ref::<BrowserError>() {
                Some(browser_err) => (browser_err.to_string(), browser_err.exit_code()),
                None => (format!("{:#}", err), EXIT_COMMAND_ERROR),
            };

            // JSON on stdout for programmatic consumption
            let error_json = json!({
                "error": true,
                "message": message,
                "exit_code": exit_code
            });
            println!(
                "{}",
                serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
            );

            eprintln!("Error: {}", message);
            std::process::exit(exit_code);
        }
    }
}

async fn run() -> Result<()> {
    // Logs go to stderr so stdout stays a clean JSON channel
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagetap=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon { command } => {
            let config = cli.overrides.load()?;
            commands::daemon::handle_daemon(command, &config, &cli.overrides).await?
        }
        Commands::Serve => {
            let config = cli.overrides.load()?;
            commands::serve::handle_serve(&config).await?
        }
        Commands::Tool(command) => commands::tool::handle_tool(command, cli.format)?,
    }

    Ok(())
}
