use crate::protocol::{StoryRequest, WireEvent};
use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Prompts containing this marker make the backend emit an error event.
const FAIL_MARKER: &str = "fail:";

pub struct ServerConfig {
    pub listen: String,
    pub auth_token: String,
    /// Pause between events, to make streaming visible.
    pub delay: Duration,
}

struct ServerState {
    auth_token: String,
    delay: Duration,
}

type ServerResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

/// Development stand-in for the agents server.
pub async fn run(config: ServerConfig) -> ServerResult<()> {
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(listen = %config.listen, "storycast dev backend listening");
    axum::serve(listener, router(config)).await?;

    Ok(())
}

pub fn router(config: ServerConfig) -> axum::Router {
    let state = Arc::new(ServerState {
        auth_token: config.auth_token,
        delay: config.delay,
    });

    axum::Router::new()
        .route("/stories/stream", post(stream_stories))
        .with_state(state)
}

async fn stream_stories(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(request): Json<StoryRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    authorize(&headers, &state.auth_token)?;
    if request.validate().is_err() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    info!(channels = ?request.channels, regenerate = ?request.regenerate, "generating stories");
    let delay = state.delay;
    let events = story_events(&request);
    let body = futures::stream::iter(events).then(move |event| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut line = serde_json::to_string(&event).unwrap_or_default();
        line.push('\n');
        Ok::<_, Infallible>(line)
    });

    Ok((
        [(CONTENT_TYPE, "application/x-ndjson")],
        Body::from_stream(body),
    ))
}

fn story_events(request: &StoryRequest) -> Vec<WireEvent> {
    if let Some((_, reason)) = request.prompt.split_once(FAIL_MARKER) {
        return vec![WireEvent::error(reason.trim())];
    }

    let channels: Vec<&String> = match &request.regenerate {
        Some(channel) => vec![channel],
        None => request.channels.iter().collect(),
    };

    let mut events: Vec<WireEvent> = channels
        .into_iter()
        .map(|channel| {
            WireEvent::data(
                json!({
                    "id": Uuid::new_v4().to_string(),
                    "title": format!("{} for {}", request.prompt.trim(), channel),
                    "story_content": format!(
                        "A story about {} written for {}.",
                        request.prompt.trim(),
                        channel
                    ),
                    "hashtags": [format!("#{}", channel), "#travel".to_string()],
                }),
                channel.as_str(),
            )
        })
        .collect();
    events.push(WireEvent::done());
    events
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), StatusCode> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match header {
        Some(value) if value == format!("Bearer {}", token) => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
