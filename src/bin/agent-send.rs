use std::time::Duration;

use aptsearch::{
    agent::{send_once, transport::socket_url, AgentMessage, UiCommand, DEFAULT_GRACE},
    config::Config,
    search::SearchParams,
};
use clap::{Parser, Subcommand};

/// Sends a single command to the agent socket, the way the agent service would
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Origin of the agent service, defaults to AGENT_BASE_ORIGIN
    #[arg(long)]
    origin: Option<String>,
    /// Defaults to AGENT_TOKEN
    #[arg(long)]
    token: Option<String>,
    /// How long to keep the connection open after sending, in milliseconds
    #[arg(long)]
    grace_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a text search
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },
    /// Search the box between two `lat,lng` corners
    Nearby { sw: String, ne: String },
    /// Show a banner in the ui
    Banner {
        #[arg(required = true)]
        text: Vec<String>,
        #[arg(long)]
        level: Option<String>,
    },
}

impl Command {
    fn into_message(self) -> AgentMessage {
        match self {
            Command::Search { query } => AgentMessage::Search {
                params: SearchParams::text(query.join(" ")),
            },
            Command::Nearby { sw, ne } => AgentMessage::Search {
                params: SearchParams::nearby(sw, ne),
            },
            Command::Banner { text, level } => AgentMessage::Ui(UiCommand::Banner {
                text: text.join(" "),
                level,
            }),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = Config::from_env().expect("invalid configuration");

    let origin = cli.origin.unwrap_or(config.agent.base_origin);
    let token = cli.token.or(config.agent.token);
    let url = socket_url(&origin, token.as_deref()).expect("invalid agent origin");
    let grace = cli.grace_ms.map(Duration::from_millis).unwrap_or(DEFAULT_GRACE);

    let message = cli.command.into_message();
    if let Err(error) = send_once(&url, &message, grace).await {
        eprintln!("failed to send {}: {error}", message.kind());
        std::process::exit(1);
    }
    println!("sent {}", message.kind());
}
