//! Per-session output buffer: write-coalescing, IAC quoting, CR/LF
//! expansion, and the cross-session "dirty list" the scheduler flushes
//! between passes.

use std::collections::HashSet;
use std::io::{self, Write};

use crate::errors::{classify_session_io_error, CommError, CommResult, IoOutcome};
use crate::snoop::SessionId;

const MAX_EINTR_RETRIES: u32 = 6;

/// A host-originated write: either formatted text or a raw byte slice that
/// must pass through the output filter unchanged except for the
/// newline/IAC rules.
pub enum OutputRequest<'a> {
    Text(&'a str),
    Bytes(&'a [u8]),
    /// Sentinel value forcing an immediate flush regardless of the
    /// coalescing threshold.
    Flush,
}

/// Per-session accumulation buffer and the flags that control how bytes
/// get into it.
pub struct OutputBuffer {
    buf: Vec<u8>,
    /// Flush once accumulated bytes exceed this (packet size minus slack).
    flush_threshold: usize,
    pub quote_iac: bool,
    /// 256-bit allowed-output bitmap, stored as a byte-per-bit array for
    /// simplicity; every byte starts permitted.
    allowed: [bool; 256],
    /// Set while a telnet command (not ordinary text) is being emitted:
    /// bypasses snoop relay and catch-message shadowing.
    pub sending_telnet_command: bool,
}

impl OutputBuffer {
    pub fn new(flush_threshold: usize) -> Self {
        OutputBuffer {
            buf: Vec::new(),
            flush_threshold,
            quote_iac: true,
            allowed: [true; 256],
            sending_telnet_command: false,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn set_allowed(&mut self, byte: u8, allowed: bool) {
        self.allowed[byte as usize] = allowed;
    }

    /// Append `request`'s bytes through the per-byte filter: bitmap check,
    /// bare `\n` -> `\r\n`, byte-255 doubling when `quote_iac` is set.
    pub fn append(&mut self, request: OutputRequest<'_>) {
        let owned;
        let bytes: &[u8] = match request {
            OutputRequest::Text(s) => {
                owned = s.as_bytes().to_vec();
                &owned
            }
            OutputRequest::Bytes(b) => b,
            OutputRequest::Flush => return,
        };

        for &byte in bytes {
            if !self.allowed[byte as usize] {
                continue;
            }
            if byte == b'\n' {
                self.buf.push(b'\r');
                self.buf.push(b'\n');
                continue;
            }
            if byte == 255 && self.quote_iac {
                self.buf.push(255);
                self.buf.push(255);
                continue;
            }
            self.buf.push(byte);
        }
    }

    /// Append `bytes` completely unmodified: no allowed-bitmap filtering,
    /// no `\n` -> `\r\n` expansion, no IAC doubling. For telnet command
    /// sequences the caller has already framed correctly — doubling their
    /// IAC introducer would corrupt the command on the wire.
    pub fn append_verbatim(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn should_flush(&self) -> bool {
        self.buf.len() >= self.flush_threshold
    }

    /// Write as much of the buffer as the socket accepts right now,
    /// retrying a bounded number of times on `EINTR`. `EWOULDBLOCK` drops
    /// the buffered message (with the caller expected to log a warning);
    /// any other error marks the session fatal.
    pub fn flush_to(&mut self, sink: &mut impl Write) -> CommResult<FlushOutcome> {
        if self.buf.is_empty() {
            return Ok(FlushOutcome::Idempotent);
        }
        let mut retries = 0;
        loop {
            match sink.write(&self.buf) {
                Ok(n) => {
                    self.buf.drain(0..n);
                    return Ok(FlushOutcome::Wrote(n));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    retries += 1;
                    if retries > MAX_EINTR_RETRIES {
                        self.buf.clear();
                        return Err(CommError::from(e));
                    }
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.buf.clear();
                    return Ok(FlushOutcome::DroppedWouldBlock);
                }
                Err(e) => {
                    let outcome = classify_session_io_error(&e);
                    self.buf.clear();
                    return match outcome {
                        IoOutcome::Fatal => Err(CommError::from(e)),
                        _ => Err(CommError::from(e)),
                    };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending; the flush was a no-op (two consecutive
    /// flushes with no append between them produce no second write).
    Idempotent,
    Wrote(usize),
    DroppedWouldBlock,
}

/// Set of sessions with a non-empty output buffer, flushed between
/// scheduler passes. A `HashSet` rather than an intrusive doubly-linked
/// list: simpler, and the only property that matters — membership iff
/// buffer length > 0 — holds either way.
#[derive(Default)]
pub struct DirtyList {
    sessions: HashSet<SessionId>,
}

impl DirtyList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_dirty(&mut self, session: SessionId) {
        self.sessions.insert(session);
    }

    pub fn mark_clean(&mut self, session: SessionId) {
        self.sessions.remove(&session);
    }

    pub fn iter(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.sessions.contains(&session)
    }
}
