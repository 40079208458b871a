use crate::error::{Error, Result};
use crate::profile::Profile;
use crate::util::api_path;
use futures_util::stream::{self, BoxStream, Stream, StreamExt};
use serde::de::DeserializeOwned;
use slog::{debug, warn};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Options for [`Profile::create_log_stream`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStreamOptions {
    /// Container whose logs to stream; defaults to the profile's
    pub container: Option<String>,
}

/// One event from a container's log feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub id: Option<String>,
    /// The event type; `message` unless the server names one
    pub event_type: String,
    /// Event data, with multiple `data` lines joined by newlines
    pub data: String,
}

impl LogEvent {
    /// Decode the event data as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).map_err(|e| Error::InvalidResponse(e.to_string()))
    }
}

/// Incremental parser for `text/event-stream` framing.  Bytes may arrive split at any
/// point; events are only produced once their terminating blank line has been seen.
#[derive(Debug, Default)]
struct EventParser {
    buf: Vec<u8>,
    // the last byte pushed was a `\r`, so a following `\n` belongs to the same line break
    after_cr: bool,
}

impl EventParser {
    fn push(&mut self, chunk: &[u8]) {
        for &b in chunk {
            if self.after_cr {
                self.after_cr = false;
                if b == b'\n' {
                    continue;
                }
            }
            if b == b'\r' {
                self.buf.push(b'\n');
                self.after_cr = true;
            } else {
                self.buf.push(b);
            }
        }
    }

    fn next_event(&mut self) -> Option<LogEvent> {
        loop {
            let end = self.buf.windows(2).position(|w| w == b"\n\n")?;
            let block: Vec<u8> = self.buf.drain(..end + 2).collect();
            if let Some(event) = parse_block(&String::from_utf8_lossy(&block[..end])) {
                return Some(event);
            }
        }
    }
}

/// Parse one event block.  Blocks without data (such as keepalive comments) produce
/// nothing.
fn parse_block(block: &str) -> Option<LogEvent> {
    let mut id = None;
    let mut event_type = None;
    let mut data = vec![];

    for line in block.split('\n') {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "id" => id = Some(value.to_owned()),
            "event" => event_type = Some(value.to_owned()),
            "data" => data.push(value),
            _ => {}
        }
    }

    if data.is_empty() {
        return None;
    }
    Some(LogEvent {
        id,
        event_type: event_type.unwrap_or_else(|| "message".to_owned()),
        data: data.join("\n"),
    })
}

enum State {
    Connect { profile: Profile, container: String },
    Streaming {
        body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
        parser: EventParser,
    },
    Done,
}

async fn next_event(state: State) -> Option<(Result<LogEvent>, State)> {
    let (mut body, mut parser) = match state {
        State::Connect { profile, container } => {
            let path = api_path(&["api", "logs", "tenant", &container]);
            match profile
                .client()
                .open_stream(&path, "text/event-stream")
                .await
            {
                Ok(resp) => {
                    debug!(profile.logger(), "log stream connected"; "container" => &container);
                    let body = resp.bytes_stream().map(|r| r.map(|b| b.to_vec())).boxed();
                    (body, EventParser::default())
                }
                Err(err) => {
                    warn!(profile.logger(), "log stream failed"; "container" => &container, "error" => %err);
                    return Some((Err(err), State::Done));
                }
            }
        }
        State::Streaming { body, parser } => (body, parser),
        State::Done => return None,
    };

    loop {
        if let Some(event) = parser.next_event() {
            return Some((Ok(event), State::Streaming { body, parser }));
        }
        match body.next().await {
            Some(Ok(chunk)) => parser.push(&chunk),
            Some(Err(err)) => return Some((Err(err.into()), State::Done)),
            // an unterminated trailing event is discarded
            None => return None,
        }
    }
}

/// A live feed of log events from a container.
///
/// The connection is opened when the stream is first polled and stays open until the
/// stream is dropped.  A failure to connect, or a broken connection, is reported as a
/// single error item, after which the stream ends.
pub struct LogStream {
    inner: BoxStream<'static, Result<LogEvent>>,
}

impl Stream for LogStream {
    type Item = Result<LogEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl std::fmt::Debug for LogStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogStream").finish_non_exhaustive()
    }
}

impl Profile {
    /// Stream the logs of a container.  No request is made until the stream is polled.
    pub fn create_log_stream(&self, options: &LogStreamOptions) -> LogStream {
        let container = options
            .container
            .clone()
            .unwrap_or_else(|| self.container().to_owned());
        let state = State::Connect {
            profile: self.clone(),
            container,
        };
        LogStream {
            inner: stream::unfold(state, next_event).boxed(),
        }
    }
}
