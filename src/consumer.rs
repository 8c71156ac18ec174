use crate::error::SessionError;
use crate::protocol::{StoryRequest, StreamEvent};
use crate::reducer::ResultSet;
use std::sync::Arc;
#[cfg(test)]
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
        }
    }
}

/// Fire-and-forget user notifications.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: Notification) {
        match n.severity {
            Severity::Info => info!(title = %n.title, "{}", n.message),
            Severity::Warning => warn!(title = %n.title, "{}", n.message),
            Severity::Error => error!(title = %n.title, "{}", n.message),
        }
    }
}

#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(notification);
        }
    }
}

/// Collects the stories of a session and reports failures.
///
/// The board never touches session state; it only reacts to the events it is
/// handed.
pub struct StoryBoard {
    results: ResultSet,
    regenerating: Option<String>,
    notifier: Arc<dyn Notifier>,
}

impl StoryBoard {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            results: ResultSet::new(),
            regenerating: None,
            notifier,
        }
    }

    /// Prepares for the next session built from `request`.
    pub fn begin(&mut self, request: &StoryRequest) {
        self.regenerating = request.regenerate.clone();
        if self.regenerating.is_none() {
            self.results.clear();
        }
    }

    pub fn handle(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Data(data) => {
                self.results = self.results.apply(&data, self.regenerating.as_deref());
            }
            StreamEvent::Error(err) => {
                self.regenerating = None;
                self.notifier.notify(Notification::new(
                    "Story generation failed",
                    err.message,
                    Severity::Error,
                ));
            }
            StreamEvent::Done => {
                self.regenerating = None;
            }
        }
    }

    /// Reports a session that ended with an error instead of an event.
    pub fn fail(&mut self, err: &SessionError) {
        self.regenerating = None;
        let (title, severity) = match err {
            SessionError::Validation(_) => ("Check your selection", Severity::Warning),
            SessionError::Busy => ("Generation already running", Severity::Info),
            _ => ("Connection problem", Severity::Error),
        };
        self.notifier
            .notify(Notification::new(title, err.to_string(), severity));
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, ValidationError};
    use crate::protocol::{DataEvent, StoryPayload};

    fn data(id: &str, channel: &str) -> StreamEvent {
        StreamEvent::Data(DataEvent {
            payload: StoryPayload {
                id: id.to_string(),
                story_content: format!("story {}", id),
                ..StoryPayload::default()
            },
            channel: Some(channel.to_string()),
        })
    }

    #[test]
    fn regeneration_request_replaces_existing_story() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut board = StoryBoard::new(notifier);

        let first = StoryRequest::new("Oslo", vec!["fb".into(), "ig".into()]);
        board.begin(&first);
        board.handle(data("A", "fb"));
        board.handle(data("B", "ig"));
        board.handle(StreamEvent::Done);

        board.begin(&first.regenerating("fb"));
        board.handle(data("C", "fb"));
        board.handle(StreamEvent::Done);

        let ids: Vec<_> = board
            .results()
            .records()
            .iter()
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(ids, vec!["B", "C"]);
    }

    #[test]
    fn fresh_request_starts_a_new_board() {
        let mut board = StoryBoard::new(Arc::new(RecordingNotifier::default()));
        let request = StoryRequest::new("Oslo", vec!["fb".into()]);
        board.begin(&request);
        board.handle(data("A", "fb"));
        board.begin(&request);
        assert!(board.results().is_empty());
    }

    #[test]
    fn backend_errors_become_notifications() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut board = StoryBoard::new(notifier.clone());
        board.handle(StreamEvent::Error(BackendError::new("quota exceeded")));

        assert!(board.results().is_empty());
        assert_eq!(
            notifier.notifications(),
            vec![Notification::new(
                "Story generation failed",
                "quota exceeded",
                Severity::Error
            )]
        );
    }

    #[test]
    fn session_failures_are_reported() {
        let notifier = Arc::new(RecordingNotifier::default());
        let mut board = StoryBoard::new(notifier.clone());
        board.fail(&SessionError::Validation(ValidationError::NoChannels));
        board.fail(&SessionError::Transport("connection refused".into()));

        let seen = notifier.notifications();
        assert_eq!(seen[0].severity, Severity::Warning);
        assert_eq!(seen[0].message, "select at least one channel");
        assert_eq!(seen[1].severity, Severity::Error);
    }
}
