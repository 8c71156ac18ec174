use crate::error::{BackendError, DecodeError, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body of a story generation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryRequest {
    pub prompt: String,
    pub channels: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_id: Option<String>,
    /// Channel whose existing story should be replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regenerate: Option<String>,
}

impl StoryRequest {
    pub fn new(prompt: impl Into<String>, channels: Vec<String>) -> Self {
        Self {
            prompt: prompt.into(),
            channels,
            ..Self::default()
        }
    }

    pub fn regenerating(mut self, channel: impl Into<String>) -> Self {
        self.regenerate = Some(channel.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.prompt.trim().is_empty() {
            return Err(ValidationError::EmptyPrompt);
        }
        if self.channels.is_empty() {
            return Err(ValidationError::NoChannels);
        }
        if let Some(channel) = &self.regenerate
            && !self.channels.contains(channel)
        {
            return Err(ValidationError::UnknownRegeneration(channel.clone()));
        }
        Ok(())
    }
}

/// One event as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
}

impl WireEvent {
    pub fn data(data: Value, channel: impl Into<String>) -> Self {
        Self {
            event: Some("data".to_string()),
            data,
            channel_type: Some(channel.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            event: Some("error".to_string()),
            data: serde_json::json!({ "error": message.into() }),
            channel_type: None,
        }
    }

    pub fn done() -> Self {
        Self {
            event: Some("done".to_string()),
            data: Value::Null,
            channel_type: None,
        }
    }
}

/// Story content carried by a data event.
///
/// Built leniently: absent or mistyped fields become empty values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoryPayload {
    pub id: String,
    pub title: String,
    pub story_content: String,
    pub hashtags: Vec<String>,
    pub channel_type: Option<String>,
}

impl StoryPayload {
    pub fn from_value(value: &Value) -> Self {
        let hashtags = value
            .get("hashtags")
            .and_then(Value::as_array)
            .map(|tags| {
                tags.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: string_field(value, "id").unwrap_or_default(),
            title: string_field(value, "title").unwrap_or_default(),
            story_content: string_field(value, "story_content").unwrap_or_default(),
            hashtags,
            channel_type: string_field(value, "channel_type"),
        }
    }

    /// Story text followed by its hashtags, separated by single spaces.
    pub fn body(&self) -> String {
        std::iter::once(self.story_content.as_str())
            .chain(self.hashtags.iter().map(String::as_str))
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEvent {
    pub payload: StoryPayload,
    pub channel: Option<String>,
}

impl DataEvent {
    pub fn channel_key(&self) -> &str {
        self.channel.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Data(DataEvent),
    Error(BackendError),
    Done,
}

impl StreamEvent {
    /// Tags one decoded JSON value.
    ///
    /// Unknown or missing discriminators are data events. A data payload
    /// carrying a string `error` field is reported as a backend error.
    pub fn classify(value: &Value) -> Result<Self, DecodeError> {
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let data = value.get("data").unwrap_or(&Value::Null);

        match value.get("event").and_then(Value::as_str) {
            Some("error") => Ok(StreamEvent::Error(BackendError::new(error_message(data)))),
            Some("done") => Ok(StreamEvent::Done),
            _ => {
                if let Some(message) = data.get("error").and_then(Value::as_str) {
                    return Ok(StreamEvent::Error(BackendError::new(message)));
                }
                let payload = StoryPayload::from_value(data);
                let channel = string_field(value, "channel_type")
                    .or_else(|| payload.channel_type.clone());
                Ok(StreamEvent::Data(DataEvent { payload, channel }))
            }
        }
    }
}

fn error_message(data: &Value) -> String {
    data.get("error")
        .and_then(Value::as_str)
        .or_else(|| data.get("message").and_then(Value::as_str))
        .or_else(|| data.as_str())
        .unwrap_or("unknown backend error")
        .to_string()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
