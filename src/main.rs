mod client;
mod config;
mod consumer;
mod decoder;
mod error;
mod logging;
mod protocol;
mod reducer;
mod server;
mod session;
mod store;

use clap::{Parser, Subcommand};
use client::StoryClient;
use config::ConnectionArgs;
use consumer::{StoryBoard, TracingNotifier};
use futures::StreamExt;
use protocol::{StoryRequest, StreamEvent};
use session::Session;
use std::sync::Arc;
use std::time::Duration;
use store::{ACCESS_TOKEN_KEY, FileStore, LocalStore, StaticToken, StoredToken, TokenSource};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type MainResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

#[derive(Parser)]
#[command(name = "storycast", about = "Streams AI-written travel stories per channel")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate stories and print them as they stream in.
    Generate {
        #[command(flatten)]
        connection: ConnectionArgs,

        #[arg(long)]
        prompt: String,

        /// Target channel; repeat for several.
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,

        #[arg(long)]
        experience_id: Option<String>,

        /// Replace the story of this channel only.
        #[arg(long)]
        regenerate: Option<String>,
    },
    /// Run the development backend.
    Serve {
        #[arg(long, env = "STORYCAST_LISTEN", default_value = "127.0.0.1:8787")]
        listen: String,

        #[arg(long, env = "STORYCAST_TOKEN")]
        token: Option<String>,

        #[arg(long, default_value_t = 250)]
        delay_ms: u64,
    },
    /// Save an access token in the local store.
    Login {
        #[arg(long)]
        token: String,
    },
    /// Remove the saved access token.
    Logout,
}

#[tokio::main]
async fn main() -> MainResult<()> {
    dotenvy::dotenv().ok();
    logging::init();

    match Cli::parse().command {
        Command::Generate {
            connection,
            prompt,
            channels,
            experience_id,
            regenerate,
        } => {
            let mut request = StoryRequest::new(prompt, channels);
            request.experience_id = experience_id;
            if let Some(channel) = regenerate {
                request = request.regenerating(channel);
            }
            generate(connection, request).await
        }
        Command::Serve {
            listen,
            token,
            delay_ms,
        } => {
            let auth_token = match token {
                Some(token) => token,
                None => resolve_server_token()?,
            };
            server::run(server::ServerConfig {
                listen,
                auth_token,
                delay: Duration::from_millis(delay_ms),
            })
            .await
        }
        Command::Login { token } => {
            let store = FileStore::default_location();
            store.set(ACCESS_TOKEN_KEY, token.trim())?;
            println!("token saved to {}", store.path().display());
            Ok(())
        }
        Command::Logout => {
            FileStore::default_location().remove(ACCESS_TOKEN_KEY)?;
            println!("token removed");
            Ok(())
        }
    }
}

async fn generate(connection: ConnectionArgs, request: StoryRequest) -> MainResult<()> {
    let tokens: Arc<dyn TokenSource> = match &connection.token {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(StoredToken::new(FileStore::default_location())),
    };
    let client = StoryClient::new(&connection.client_config(), tokens)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut board = StoryBoard::new(Arc::new(TracingNotifier));
    board.begin(&request);

    let mut events = Session::new(client)
        .with_cancel_token(cancel)
        .stream(request);

    while let Some(item) = events.next().await {
        match item {
            Ok(StreamEvent::Data(data)) => {
                println!("[{}] {}", data.channel_key(), data.payload.title);
                println!("{}\n", data.payload.body());
                board.handle(StreamEvent::Data(data));
            }
            Ok(event) => board.handle(event),
            Err(err) => {
                board.fail(&err);
                return Err(err.into());
            }
        }
    }

    if board.results().is_empty() {
        warn!("no stories were generated");
    }
    for record in board.results().records() {
        info!(channel = %record.channel, id = %record.id, "story ready");
    }
    info!(
        stories = board.results().len(),
        state = ?events.state(),
        "generation finished"
    );
    Ok(())
}

/// The dev backend reuses the client's saved token, creating one if needed.
fn resolve_server_token() -> MainResult<String> {
    let store = FileStore::default_location();
    if let Some(token) = StoredToken::new(FileStore::default_location()).token() {
        return Ok(token);
    }

    let token = uuid::Uuid::new_v4().to_string();
    store.set(ACCESS_TOKEN_KEY, &token)?;
    println!("generated access token stored at {}", store.path().display());
    Ok(token)
}
