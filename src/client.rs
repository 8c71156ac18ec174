use crate::config::ClientConfig;
use crate::error::SessionError;
use crate::protocol::StoryRequest;
use crate::store::TokenSource;
use reqwest::Client as HttpClient;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::sync::Arc;
use tracing::debug;

/// HTTP side of a story session: builds and issues the streaming request.
#[derive(Clone)]
pub struct StoryClient {
    endpoint: String,
    http: HttpClient,
    tokens: Arc<dyn TokenSource>,
    max_frame_bytes: usize,
}

impl StoryClient {
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenSource>) -> Result<Self, SessionError> {
        let http = HttpClient::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            endpoint: format!(
                "{}{}",
                normalize_base_url(&config.base_url),
                normalize_path(&config.stream_path)
            ),
            http,
            tokens,
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Sends the request and waits for the response headers.
    ///
    /// Only a success status yields a response whose body can be pumped.
    pub async fn open_stream(
        &self,
        request: &StoryRequest,
    ) -> Result<reqwest::Response, SessionError> {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(request);

        match self.tokens.token() {
            Some(token) => builder = builder.bearer_auth(token),
            None => debug!("no access token available; sending unauthenticated request"),
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SessionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

fn normalize_base_url(value: &str) -> String {
    value.trim_end_matches('/').to_string()
}

fn normalize_path(value: &str) -> String {
    let trimmed = value.trim_start_matches('/');
    format!("/{}", trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StaticToken;

    #[test]
    fn endpoint_joins_base_and_path() {
        let config = ClientConfig {
            base_url: "http://localhost:8787///".to_string(),
            stream_path: "stories/stream".to_string(),
            ..ClientConfig::default()
        };
        let client = StoryClient::new(&config, Arc::new(StaticToken::none())).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:8787/stories/stream");
    }
}
