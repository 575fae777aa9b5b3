//! Newline-delimited JSON event streams over one chunked HTTP response.

use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio_stream::{Stream, StreamExt};

use crate::error::ControlError;

type ByteStream = Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>;

/// Longest event line accepted from the kernel.
pub const MAX_LINE: usize = 1024 * 1024;

/// Lazy, non-restartable sequence of events from one streaming endpoint.
///
/// Ends (`None`) when the kernel closes the connection. A transport error is
/// yielded once and ends the stream; a malformed line is yielded as
/// [`ControlError::Decode`] and the stream continues. A line longer than
/// [`MAX_LINE`] is dropped and yielded as [`ControlError::LineTooLong`].
pub struct EventStream<T> {
    body: ByteStream,
    lines: LineBuffer,
    finished: bool,
    _event: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> EventStream<T> {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        Self {
            body: Box::pin(response.bytes_stream()),
            lines: LineBuffer::default(),
            finished: false,
            _event: PhantomData,
        }
    }

    pub async fn next(&mut self) -> Option<Result<T, ControlError>> {
        loop {
            if let Some(line) = self.lines.next_line() {
                return Some(line.and_then(|line| Ok(serde_json::from_slice(&line)?)));
            }
            if self.finished {
                return None;
            }
            match self.body.next().await {
                Some(Ok(chunk)) => self.lines.push(&chunk),
                Some(Err(err)) => {
                    self.finished = true;
                    return Some(Err(ControlError::Transport(err)));
                }
                None => {
                    self.finished = true;
                    if let Some(line) = self.lines.take_rest() {
                        return Some(serde_json::from_slice(&line).map_err(ControlError::from));
                    }
                    return None;
                }
            }
        }
    }
}

/// Reassembles lines split across HTTP chunks, holding at most `limit`
/// bytes of an unfinished line.
#[derive(Debug)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
    limit: usize,
    /// Skipping the tail of an oversized line up to its newline.
    discarding: bool,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE)
    }
}

impl LineBuffer {
    pub(crate) fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            discarding: false,
        }
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        let chunk = if self.discarding {
            match chunk.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.discarding = false;
                    &chunk[pos + 1..]
                }
                None => return,
            }
        } else {
            chunk
        };
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete, non-blank line without its terminator.
    pub(crate) fn next_line(&mut self) -> Option<Result<Vec<u8>, ControlError>> {
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            if pos > self.limit {
                return Some(Err(self.too_long()));
            }
            let trimmed = trim_ascii(&line);
            if !trimmed.is_empty() {
                return Some(Ok(trimmed.to_vec()));
            }
        }
        if self.buf.len() > self.limit {
            self.buf = Vec::new();
            self.discarding = true;
            return Some(Err(self.too_long()));
        }
        None
    }

    /// Whatever is left after the body ended without a final newline.
    pub(crate) fn take_rest(&mut self) -> Option<Vec<u8>> {
        self.discarding = false;
        let rest = std::mem::take(&mut self.buf);
        let trimmed = trim_ascii(&rest);
        (!trimmed.is_empty()).then(|| trimmed.to_vec())
    }
}

impl LineBuffer {
    fn too_long(&self) -> ControlError {
        tracing::warn!(limit = self.limit, "dropping oversized event line");
        ControlError::LineTooLong { limit: self.limit }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}
