//! Line reader
//!
//! Turns the transport's byte chunks into text lines. Lines end at `\n`; a
//! `\r` right before it is dropped. Read faults and undecodable lines are
//! absorbed here and never reach the caller as errors.

use super::transport::{TransportError, TransportTrait};
use std::collections::VecDeque;
use std::sync::Arc;

/// Longest unterminated run kept before it is forced out as a line
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Splits a byte stream into newline-terminated records
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: Vec<u8>,
    ready: VecDeque<Vec<u8>>,
}

impl LineFramer {
    /// Create an empty framer
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes; completed lines queue up for [`LineFramer::pop`]
    pub fn push(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\n' {
                let line = std::mem::take(&mut self.buffer);
                self.ready.push_back(strip_cr(line));
            } else {
                self.buffer.push(b);
                if self.buffer.len() >= MAX_LINE_LEN {
                    let tail = self.buffer.split_off(char_boundary(&self.buffer));
                    let line = std::mem::replace(&mut self.buffer, tail);
                    self.ready.push_back(line);
                }
            }
        }
    }

    /// Next completed line, oldest first
    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.ready.pop_front()
    }

    /// Take the unterminated tail, if any
    pub fn take_partial(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(strip_cr(std::mem::take(&mut self.buffer)))
    }

    /// Bytes waiting for a terminator
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Split point that keeps a trailing incomplete UTF-8 sequence out of the line
fn char_boundary(buffer: &[u8]) -> usize {
    match std::str::from_utf8(buffer) {
        Err(e) if e.error_len().is_none() && e.valid_up_to() > 0 => e.valid_up_to(),
        _ => buffer.len(),
    }
}

fn strip_cr(mut line: Vec<u8>) -> Vec<u8> {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    line
}

/// Result of one poll of the reader
#[derive(Debug)]
pub enum ReadOutcome {
    /// A complete, decoded line
    Line(String),
    /// The read timed out with nothing to report
    Idle,
    /// A line arrived but was not valid UTF-8
    Dropped,
    /// The transport read failed
    Fault(TransportError),
}

/// Pulls lines off a transport, one poll at a time
pub struct LineReader {
    transport: Arc<dyn TransportTrait>,
    framer: LineFramer,
    flush_partial: bool,
}

impl LineReader {
    /// Create a reader over a shared transport
    pub fn new(transport: Arc<dyn TransportTrait>) -> Self {
        Self {
            transport,
            framer: LineFramer::new(),
            flush_partial: true,
        }
    }

    /// Surface an unterminated tail as a line when a read times out
    #[must_use]
    pub fn flush_partial(mut self, enabled: bool) -> Self {
        self.flush_partial = enabled;
        self
    }

    /// Perform at most one transport read and report what it produced.
    ///
    /// Lines already framed from an earlier chunk are returned without
    /// touching the transport.
    pub async fn poll(&mut self) -> ReadOutcome {
        if let Some(line) = self.framer.pop() {
            return decode(line);
        }

        match self.transport.receive().await {
            Ok(bytes) if bytes.is_empty() => {
                if self.flush_partial {
                    if let Some(partial) = self.framer.take_partial() {
                        return decode(partial);
                    }
                }
                ReadOutcome::Idle
            }
            Ok(bytes) => {
                self.framer.push(&bytes);
                match self.framer.pop() {
                    Some(line) => decode(line),
                    None => ReadOutcome::Idle,
                }
            }
            Err(e) => {
                tracing::debug!("Read failed: {}", e);
                ReadOutcome::Fault(e)
            }
        }
    }

    /// One poll, collapsed to "line or nothing"
    pub async fn next_line(&mut self) -> Option<String> {
        match self.poll().await {
            ReadOutcome::Line(line) => Some(line),
            _ => None,
        }
    }
}

fn decode(bytes: Vec<u8>) -> ReadOutcome {
    match String::from_utf8(bytes) {
        Ok(line) => ReadOutcome::Line(line),
        Err(e) => {
            tracing::debug!("Dropping undecodable line: {}", e);
            ReadOutcome::Dropped
        }
    }
}
