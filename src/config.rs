use crate::decoder::DEFAULT_MAX_FRAME_BYTES;
use clap::Args;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8787";
pub const DEFAULT_STREAM_PATH: &str = "/stories/stream";

/// Connection flags shared by the commands that talk to the backend.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// Base URL of the agents server.
    #[arg(long, env = "STORYCAST_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Access token; falls back to the one saved by `storycast login`.
    #[arg(long, env = "STORYCAST_TOKEN")]
    pub token: Option<String>,

    /// Path of the streaming story endpoint.
    #[arg(long, default_value = DEFAULT_STREAM_PATH)]
    pub stream_path: String,

    /// Largest incomplete frame the decoder will buffer.
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
}

impl ConnectionArgs {
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.base_url.clone(),
            stream_path: self.stream_path.clone(),
            max_frame_bytes: self.max_frame_bytes.max(1),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub stream_path: String,
    pub max_frame_bytes: usize,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: Duration::from_secs(10),
        }
    }
}
