//! Per-session raw/cooked input buffer.
//!
//! A fixed-size byte array with four monotonically increasing cursors, plus
//! a "gobble" byte used to eat the partner half of a CR-LF or CR-NUL pair
//! that gets split across two reads. The invariant that must hold after
//! every mutation:
//!
//! `0 <= command_start <= command_end <= tn_end <= text_end <= capacity`
//! and separately `tn_start <= tn_end`.

/// Raw input buffer for one session, with cursors into it.
///
/// - `text_end`: first free byte; where the next socket read lands.
/// - `command_end`: end of cooked (decoded) data available to the host.
/// - `command_start`: next cooked byte not yet delivered to the host.
/// - `tn_start`: snapshot of the write cursor when a subnegotiation began.
/// - `tn_end`: next raw byte the telnet machine has not yet consumed.
#[derive(Debug)]
pub struct SessionBuffer {
    data: Vec<u8>,
    capacity: usize,
    pub command_start: usize,
    pub command_end: usize,
    pub tn_start: usize,
    pub tn_end: usize,
    pub text_end: usize,
    /// Byte to silently discard on the next read: the partner of a CR-LF or
    /// CR-NUL pair whose second half hadn't arrived yet when the first was
    /// processed.
    pub gobble: Option<u8>,
}

/// Violation of a buffer invariant; callers outside this module should never
/// be able to trigger this.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvariantError(pub &'static str);

impl std::fmt::Display for InvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "buffer invariant violated: {}", self.0)
    }
}

impl std::error::Error for InvariantError {}

impl SessionBuffer {
    pub fn new(capacity: usize) -> Self {
        SessionBuffer {
            data: vec![0u8; capacity],
            capacity,
            command_start: 0,
            command_end: 0,
            tn_start: 0,
            tn_end: 0,
            text_end: 0,
            gobble: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes free for the next socket read.
    pub fn free_space(&self) -> usize {
        self.capacity - self.text_end
    }

    /// Mutable slice covering the unwritten tail, for a direct `read()` into
    /// the buffer.
    pub fn write_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.text_end..self.capacity]
    }

    /// Record that `n` bytes were written into the slice returned by
    /// `write_slice`.
    pub fn advance_text_end(&mut self, n: usize) {
        self.text_end += n;
    }

    pub fn raw(&self) -> &[u8] {
        &self.data
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The cooked command text available to the host: `[command_start,
    /// command_end)`.
    pub fn cooked(&self) -> &[u8] {
        &self.data[self.command_start..self.command_end]
    }

    /// Append one decoded byte to the cooked region. Returns `false` (and
    /// does nothing) if the cooked region is already full at capacity.
    pub fn push_cooked(&mut self, byte: u8) -> bool {
        if self.command_end >= self.capacity {
            return false;
        }
        self.data[self.command_end] = byte;
        self.command_end += 1;
        true
    }

    /// Remove the last cooked byte, for backspace/rubout handling in
    /// linemode. No-op if there is nothing to erase past `command_start`.
    pub fn erase_last_cooked(&mut self) -> bool {
        if self.command_end > self.command_start {
            self.command_end -= 1;
            true
        } else {
            false
        }
    }

    /// Mark the command at `[command_start, command_end)` as delivered and
    /// reset cursors so the telnet machine resumes from `tn_end`.
    pub fn consume_command(&mut self) {
        self.command_start = 0;
        self.command_end = 0;
        self.repack_from(self.tn_end);
    }

    /// Slide remaining raw bytes `[from, text_end)` down to offset 0 and
    /// adjust cursors accordingly. Used both after a command is consumed and
    /// when leaving charmode (the cooked prefix is dropped in that case by
    /// the caller first).
    pub fn repack_from(&mut self, from: usize) {
        if from == 0 {
            return;
        }
        let remaining = self.text_end.saturating_sub(from);
        self.data.copy_within(from..self.text_end, 0);
        self.text_end = remaining;
        self.tn_end = self.tn_end.saturating_sub(from);
        self.tn_start = self.tn_start.saturating_sub(from);
        self.command_start = self.command_start.saturating_sub(from);
        self.command_end = self.command_end.saturating_sub(from);
    }

    /// Repack so cooked data currently at `[command_start, command_end)` is
    /// moved to the buffer's base, and the raw cursors are reset to `DATA`'s
    /// starting point. Used when leaving charmode per the negotiation
    /// module's state transition.
    pub fn repack_on_charmode_exit(&mut self) {
        let len = self.command_end - self.command_start;
        if len > 0 {
            self.data.copy_within(self.command_start..self.command_end, 0);
        }
        self.command_start = 0;
        self.command_end = len;
        self.tn_start = len;
        self.tn_end = len;
        self.text_end = len;
    }

    /// Discard the raw bytes between `tn_start` and the current `tn_end` (a
    /// just-consumed subnegotiation sequence), sliding down any bytes that
    /// were already read past it so they resume from the right offset
    /// instead of being reprocessed or dropped.
    pub fn discard_subnegotiation(&mut self) {
        let start = self.tn_start;
        let old_end = self.tn_end;
        if old_end <= start {
            return;
        }
        let trailing = self.text_end - old_end;
        if trailing > 0 {
            self.data.copy_within(old_end..self.text_end, start);
        }
        self.text_end = start + trailing;
        self.tn_end = start;
    }

    /// Discard everything: used on line/subnegotiation overflow recovery
    /// when preserving ordering isn't required (linemode overflow).
    pub fn reset_after_overflow(&mut self) {
        self.command_start = 0;
        self.command_end = 0;
        self.tn_start = 0;
        self.tn_end = 0;
        self.text_end = 0;
    }

    /// Check the documented cross-cursor invariant. Exposed for tests and
    /// debug assertions at call sites that mutate cursors directly.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        if !(self.command_start <= self.command_end) {
            return Err(InvariantError("command_start > command_end"));
        }
        if !(self.command_end <= self.tn_end) {
            return Err(InvariantError("command_end > tn_end"));
        }
        if !(self.tn_end <= self.text_end) {
            return Err(InvariantError("tn_end > text_end"));
        }
        if !(self.text_end <= self.capacity) {
            return Err(InvariantError("text_end > capacity"));
        }
        if !(self.tn_start <= self.tn_end) {
            return Err(InvariantError("tn_start > tn_end"));
        }
        Ok(())
    }
}
