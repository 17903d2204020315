//! Response body adapters
//!
//! A session reads from anything implementing [`ResponseBody`]: a live
//! `reqwest::Response` or any `AsyncRead` (recorded streams, pipes, tests).

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{IngestError, Result};

/// Default read size for [`ReaderBody`]
pub const DEFAULT_READ_SIZE: usize = 8 * 1024;

/// A streamed response body
#[async_trait]
pub trait ResponseBody: Send {
    /// Next chunk of bytes, or None at end of stream
    ///
    /// Must be cancel-safe: a session drops the future when cancellation or
    /// the deadline wins the race.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;

    /// Release the underlying handle. Called exactly once per session.
    fn release(&mut self);
}

// ============================================================================
// HTTP
// ============================================================================

/// Body of a streamed HTTP response
#[derive(Debug)]
pub struct HttpResponseBody {
    response: Option<reqwest::Response>,
}

impl HttpResponseBody {
    /// Wrap a response, rejecting non-success statuses
    pub async fn from_response(response: reqwest::Response) -> Result<Self> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(IngestError::Network(format!("HTTP {status}: {text}")));
        }
        Ok(Self {
            response: Some(response),
        })
    }

    /// Whether the response has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.response.is_none()
    }
}

#[async_trait]
impl ResponseBody for HttpResponseBody {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(response) = self.response.as_mut() else {
            return Ok(None);
        };
        let chunk = response.chunk().await?;
        Ok(chunk.map(|bytes| bytes.to_vec()))
    }

    fn release(&mut self) {
        // Dropping the response closes the connection
        self.response = None;
    }
}

// ============================================================================
// AsyncRead
// ============================================================================

/// Body backed by an `AsyncRead`
#[derive(Debug)]
pub struct ReaderBody<R> {
    reader: Option<R>,
    read_size: usize,
}

impl<R> ReaderBody<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Wrap a reader
    #[must_use]
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            read_size: DEFAULT_READ_SIZE,
        }
    }

    /// Set the maximum bytes returned per chunk
    #[must_use]
    pub fn with_read_size(mut self, read_size: usize) -> Self {
        self.read_size = read_size.max(1);
        self
    }
}

#[async_trait]
impl<R> ResponseBody for ReaderBody<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.read_size];
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    fn release(&mut self) {
        self.reader = None;
    }
}
