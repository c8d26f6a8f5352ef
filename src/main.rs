mod cli;
mod config;
mod provider_client;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, info, warn};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::config::{ChatConfig, ConfigOverrides};
use crate::provider_client::{AiProvider, OpenAiClient};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a chat session
    Chat(ChatArgs),
}

#[derive(Args)]
struct ChatArgs {
    /// Send a single message, print the reply and exit
    #[arg(short, long)]
    input: Option<String>,

    /// Persona (system prompt) to start the conversation with
    #[arg(short, long)]
    system: Option<String>,

    /// Give up on the provider after this many seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();
    let args = match cli.command {
        Some(Commands::Chat(args)) => args,
        None => cli.chat,
    };

    let log_level = if args.verbose { Level::DEBUG } else { Level::WARN };

    // Logs go to stderr so they don't interleave with the transcript.
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting persona chat");

    let config = ChatConfig::from_env(ConfigOverrides {
        system_prompt: args.system,
        timeout_secs: args.timeout,
    })?;

    let provider: Option<Arc<dyn AiProvider>> = match OpenAiClient::from_config(&config)? {
        Some(client) => {
            info!("Using provider at {}", client.endpoint());
            Some(Arc::new(client) as Arc<dyn AiProvider>)
        }
        None => {
            warn!("No API key configured, sends will be refused until one is set");
            None
        }
    };

    let interactive = args.input.is_none();
    let mut chat_context = ChatContext::new(Box::new(io::stdout()), args.input, interactive, config, provider);
    chat_context.run().await
}
