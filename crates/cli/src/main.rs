//! Taskloom CLI, the main entry point.
//!
//! Commands:
//! - `init`      Write a default config
//! - `chat`      Interactive chat or single-message mode
//! - `sessions`  List sessions with usage and cost
//! - `history`   Print the messages of a session
//! - `agents`    Show configured agents
//! - `tools`     Show built-in tools
//! - `pricing`   Show the model pricing table

use clap::{Parser, Subcommand};

mod commands;
mod runtime;

#[derive(Parser)]
#[command(
    name = "taskloom",
    about = "Taskloom: LLM agent orchestration with tools and sub-agents",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Chat with an agent
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Agent to talk to (defaults to `default_agent` from config)
        #[arg(short, long)]
        agent: Option<String>,

        /// Continue an existing session
        #[arg(short, long)]
        session: Option<String>,

        /// Attach a file to the first message (repeatable)
        #[arg(long = "attach", value_name = "PATH")]
        attach: Vec<std::path::PathBuf>,
    },

    /// List sessions
    Sessions,

    /// Print a session's messages
    History {
        /// Session id
        session_id: String,
    },

    /// Show configured agents
    Agents,

    /// Show built-in tools
    Tools,

    /// Show model pricing (USD per 1M tokens)
    Pricing,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => commands::init::run().await?,
        Commands::Chat {
            message,
            agent,
            session,
            attach,
        } => commands::chat::run(message, agent, session, attach).await?,
        Commands::Sessions => commands::sessions::list().await?,
        Commands::History { session_id } => commands::sessions::history(&session_id).await?,
        Commands::Agents => commands::agents::run().await?,
        Commands::Tools => commands::tools::run().await?,
        Commands::Pricing => commands::pricing::run().await?,
    }

    Ok(())
}
