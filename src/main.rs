mod cli;
mod completion_client;
mod config;
mod search_client;

use std::io;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use eyre::Result;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::config::{Config, Overrides};

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

#[derive(Args, Clone, Default)]
struct ChatArgs {
    /// Send a single message and exit
    #[arg(short, long)]
    input: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// OpenAI model used for general questions
    #[arg(long)]
    model: Option<String>,

    /// Maximum tokens in a model reply
    #[arg(long)]
    max_tokens: Option<u32>,

    /// Sampling temperature for the model
    #[arg(long)]
    temperature: Option<f32>,

    /// Timeout in seconds for each provider request
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Base URL of the OpenAI-compatible API
    #[arg(long)]
    openai_base_url: Option<String>,

    /// Search endpoint URL
    #[arg(long)]
    search_url: Option<String>,
}

impl From<&ChatArgs> for Overrides {
    fn from(args: &ChatArgs) -> Self {
        Overrides {
            model: args.model.clone(),
            max_tokens: args.max_tokens,
            temperature: args.temperature,
            timeout_secs: args.timeout_secs,
            openai_base_url: args.openai_base_url.clone(),
            search_url: args.search_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load API keys from env files before reading the environment
    config::load_env_files();

    let cli = Cli::parse();
    let args = match cli.command {
        Some(Commands::Chat(args)) => args,
        None => cli.chat,
    };

    let log_level = if args.verbose { Level::DEBUG } else { Level::WARN };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Smart Diamond");

    let config = Config::load(Overrides::from(&args))?;
    let mut chat_context = ChatContext::new(Box::new(io::stdout()), args.input, true, config)?;
    chat_context.run().await
}
