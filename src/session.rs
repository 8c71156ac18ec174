use crate::client::StoryClient;
use crate::decoder::FrameDecoder;
use crate::error::{BackendError, SessionError};
use crate::protocol::{StoryRequest, StreamEvent};
use futures::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Request sent, waiting for response headers.
    Requesting,
    /// Pumping the response body.
    Receiving,
}

#[cfg(test)]
impl SessionState {
    pub fn is_sending(self) -> bool {
        self == SessionState::Requesting
    }

    pub fn is_receiving(self) -> bool {
        self == SessionState::Receiving
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A done event arrived, or the body ended cleanly.
    Completed { data_events: usize },
    /// The backend reported an error event.
    Failed(BackendError),
    Cancelled,
}

/// Drives one streaming request at a time against the story backend.
///
/// The state moves `Idle -> Requesting -> Receiving -> Idle`. Every exit
/// path, including a dropped future, lands back in `Idle`.
pub struct Session {
    client: StoryClient,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(client: StoryClient) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            client,
            state,
            cancel: CancellationToken::new(),
        }
    }

    /// Ties the session to an outer token, e.g. the lifetime of a view.
    ///
    /// Once the token is cancelled every current and future run ends with
    /// `SessionOutcome::Cancelled`.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[cfg(test)]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Runs one session, handing every classified event to `on_event` in
    /// wire order.
    ///
    /// Events decoded before a decode or transport failure are still
    /// dispatched; the run then ends with the error. A backend error event is
    /// dispatched and then reported as `SessionOutcome::Failed`.
    pub async fn run<F, Fut>(
        &self,
        request: &StoryRequest,
        mut on_event: F,
    ) -> Result<SessionOutcome, SessionError>
    where
        F: FnMut(StreamEvent) -> Fut,
        Fut: Future<Output = ()>,
    {
        request.validate()?;
        let run = ActiveRun::acquire(&self.state).ok_or(SessionError::Busy)?;
        let cancel = &self.cancel;

        info!(endpoint = self.client.endpoint(), channels = ?request.channels, "starting story session");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(cancelled()),
            response = self.client.open_stream(request) => response?,
        };

        run.enter(SessionState::Receiving);
        let mut body = response.bytes_stream();
        let mut decoder = FrameDecoder::new(self.client.max_frame_bytes());
        let mut data_events = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(cancelled()),
                chunk = body.next() => chunk,
            };

            let Some(chunk) = chunk else {
                decoder.finish()?;
                info!(data_events, "stream ended without done event");
                return Ok(SessionOutcome::Completed { data_events });
            };

            let decoded = decoder.push(&chunk?);

            for value in &decoded.values {
                let event = StreamEvent::classify(value)?;
                if cancel.is_cancelled() {
                    return Ok(cancelled());
                }
                debug!(?event, "dispatching stream event");

                match event {
                    StreamEvent::Data(_) => {
                        data_events += 1;
                        on_event(event).await;
                    }
                    StreamEvent::Error(ref err) => {
                        warn!(message = %err.message, "backend reported an error");
                        let err = err.clone();
                        on_event(event).await;
                        return Ok(SessionOutcome::Failed(err));
                    }
                    StreamEvent::Done => {
                        on_event(event).await;
                        info!(data_events, "story session done");
                        return Ok(SessionOutcome::Completed { data_events });
                    }
                }
            }

            if let Some(err) = decoded.error {
                return Err(err.into());
            }
        }
    }

    /// Runs the session on a background task and yields its events.
    ///
    /// The stream ends after the terminal event; a failed run yields its
    /// error as the last item. Dropping the stream cancels this run only; the
    /// session token is left alone.
    pub fn stream(mut self, request: StoryRequest) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.cancel = self.cancel.child_token();
        let cancel = self.cancel.clone();
        let state = self.subscribe_state();

        tokio::spawn(async move {
            let result = self
                .run(&request, |event| {
                    let tx = tx.clone();
                    async move {
                        // A closed receiver means the stream was dropped and
                        // its guard has already cancelled the run.
                        let _ = tx.send(Ok(event)).await;
                    }
                })
                .await;

            match result {
                Ok(SessionOutcome::Completed { data_events }) => {
                    debug!(data_events, "background session completed")
                }
                Ok(SessionOutcome::Failed(err)) => {
                    debug!(message = %err.message, "background session failed")
                }
                Ok(SessionOutcome::Cancelled) => debug!("background session cancelled"),
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                }
            }
        });

        EventStream {
            inner: ReceiverStream::new(rx),
            state,
            _guard: cancel.drop_guard(),
        }
    }
}

fn cancelled() -> SessionOutcome {
    info!("story session cancelled");
    SessionOutcome::Cancelled
}

// Resets the shared state to Idle however the run ends.
struct ActiveRun<'a> {
    state: &'a watch::Sender<SessionState>,
}

impl<'a> ActiveRun<'a> {
    fn acquire(state: &'a watch::Sender<SessionState>) -> Option<Self> {
        let mut acquired = false;
        state.send_if_modified(|current| {
            if *current == SessionState::Idle {
                *current = SessionState::Requesting;
                acquired = true;
            }
            acquired
        });
        acquired.then_some(Self { state })
    }

    fn enter(&self, next: SessionState) {
        self.state.send_replace(next);
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.state.send_replace(SessionState::Idle);
    }
}

/// Events of a session running in the background.
pub struct EventStream {
    inner: ReceiverStream<Result<StreamEvent, SessionError>>,
    state: watch::Receiver<SessionState>,
    _guard: DropGuard,
}

impl EventStream {
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, SessionError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
