//! Server-sent event framing
//!
//! Network chunks do not line up with SSE lines: one chunk can carry several
//! events, and a line (or a multi-byte UTF-8 character) can be split across
//! chunks. `SseDecoder` buffers raw bytes and only interprets complete lines.
//!
//! Supported fields: `event`, `data` (repeated lines joined with `\n`), `id`.
//! Comment lines (`:` prefix, used as heartbeats) and `retry` are ignored;
//! reconnection timing belongs to the connector's retry policy.

use super::{FrameStream, TransportError};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseFrame {
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        SseFrame {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }
}

/// Longest unterminated line the decoder will hold
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// The upstream sent more than the line limit without a newline
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("SSE line exceeds {limit} bytes")]
pub struct LineTooLong {
    pub limit: usize,
}

#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// Prefix of `buffer` already searched for a newline
    scanned: usize,
    max_line: usize,
    event: Option<String>,
    data: Vec<String>,
    last_id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        SseDecoder {
            buffer: Vec::new(),
            scanned: 0,
            max_line,
            event: None,
            data: Vec::new(),
            last_id: None,
        }
    }

    /// Feed a network chunk, returning every event completed by it.
    ///
    /// Fails once the unterminated tail grows past the line limit; the
    /// buffered bytes are discarded and the decoder should not be reused.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, LineTooLong> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.buffer[search_from..].iter().position(|&b| b == b'\n') {
            let end = search_from + offset;
            let mut line = &self.buffer[consumed..end];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            let line = String::from_utf8_lossy(line).into_owned();
            consumed = end + 1;
            search_from = consumed;

            if let Some(frame) = self.process_line(&line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..consumed);
        self.scanned = self.buffer.len();

        if self.buffer.len() > self.max_line {
            self.buffer = Vec::new();
            self.scanned = 0;
            return Err(LineTooLong {
                limit: self.max_line,
            });
        }
        Ok(frames)
    }

    /// Bytes received but not yet terminated by a newline
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" if !value.contains('\0') => self.last_id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event,
            data,
            id: self.last_id.clone(),
        })
    }
}

/// Wrap a raw byte stream into a stream of SSE frames
///
/// A byte-stream error or an overlong line is yielded once and ends the
/// stream. A clean end of
/// the byte stream ends the frame stream; an incomplete trailing event is
/// discarded.
pub fn frame_stream<S, E>(byte_stream: S) -> FrameStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        done: bool,
    }

    let state = State {
        bytes: Box::pin(byte_stream),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    let frames = stream::unfold(state, |mut state| async move {
        loop {
            if let Some(frame) = state.pending.pop_front() {
                return Some((Ok(frame), state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => match state.decoder.feed(&chunk) {
                    Ok(frames) => state.pending.extend(frames),
                    Err(e) => {
                        state.done = true;
                        return Some((Err(TransportError::Stream(e.to_string())), state));
                    }
                },
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(TransportError::Stream(e.to_string())), state));
                }
                None => state.done = true,
            }
        }
    });

    Box::pin(frames)
}
