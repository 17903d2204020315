//! Push transport
//!
//! The connection loop opens streams through [`PushTransport`]; the stream
//! yields one text line per item. [`HttpPushTransport`] is the production
//! implementation over a long-lived HTTP response.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, Stream, StreamExt};
use reqwest::Url;

use crate::error::{IngestError, Result};

/// Stream of lines from an open push channel. `None` means the server closed
/// the stream.
pub type PushStream = BoxStream<'static, Result<String>>;

/// Opens push streams
#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Open a stream for `url`
    async fn open(&self, url: &Url) -> Result<PushStream>;
}

/// reqwest-backed transport reading newline-delimited JSON
#[derive(Clone, Debug)]
pub struct HttpPushTransport {
    client: reqwest::Client,
}

impl Default for HttpPushTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpPushTransport {
    /// Transport with a default client
    #[must_use]
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Transport with a caller-configured client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Transport whose connect phase is bounded by `timeout`
    pub fn with_connect_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().connect_timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }
}

#[async_trait]
impl PushTransport for HttpPushTransport {
    async fn open(&self, url: &Url) -> Result<PushStream> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::ACCEPT, "application/x-ndjson, text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(IngestError::Network(format!(
                "Push endpoint returned HTTP {status}"
            )));
        }

        Ok(split_lines(response.bytes_stream()))
    }
}

struct LineState<S> {
    inner: S,
    buffer: Vec<u8>,
    ready: VecDeque<String>,
    done: bool,
}

impl<S> LineState<S> {
    fn take_complete_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, raw: &[u8]) {
        let text = String::from_utf8_lossy(raw);
        let line = text.trim_end_matches(['\r', '\n']);
        if !line.trim().is_empty() {
            self.ready.push_back(line.to_string());
        }
    }
}

/// Turn a byte-chunk stream into a stream of non-blank lines
pub fn split_lines<S, B, E>(bytes: S) -> PushStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<IngestError> + Send + 'static,
{
    let state = LineState {
        inner: Box::pin(bytes),
        buffer: Vec::new(),
        ready: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.take_complete_lines();
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    let rest = std::mem::take(&mut state.buffer);
                    state.push_line(&rest);
                }
            }
        }
    })
    .boxed()
}
