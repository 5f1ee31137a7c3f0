//! External request queue client: a framed transport to a forked
//! co-process used to offload reverse-DNS and shell-like queries off the
//! main loop.
//!
//! Wire format per message: `u32 length (big-endian, whole message) | u32
//! handle (big-endian) | u8 request code | payload`. `length` counts the
//! nine header bytes plus the payload.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, Stdio};

use crate::addr_cache::AddressCache;
use crate::errors::{CommError, CommResult};

pub const HEADER_LEN: usize = 9;

/// Reserved handles, not allocated from the callback table. Values follow
/// the installation-constant convention: large enough to never collide
/// with a real table index.
pub const KEEP_HANDLE: u32 = 0xffff_ffff;
pub const RLOOKUP: u32 = 0xffff_fffe;
pub const RLOOKUPV6: u32 = 0xffff_fffd;

pub const REQUEST_RLOOKUP: u8 = 1;
pub const REQUEST_RLOOKUPV6: u8 = 2;
pub const REQUEST_EXECUTE: u8 = 3;

/// One pending request's callback. Invoked with `(payload, len)` on
/// reply, matching the host-callback signature from the bridge.
pub type ErqCallback = Box<dyn FnMut(&[u8]) + 'static>;

struct Slot {
    callback: ErqCallback,
    /// KEEP_HANDLE-wrapped replies don't free the slot.
    keep: bool,
}

/// Fixed-capacity handle table: 32 live-request slots plus one reserved
/// anonymous slot, with a free list threaded through the vacant entries.
pub struct HandleTable {
    slots: Vec<Option<Slot>>,
    free: Vec<u32>,
}

impl HandleTable {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        HandleTable {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity as u32).rev().collect(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Allocate a slot for `callback`, returning its handle, or `None` if
    /// the table is full.
    pub fn allocate(&mut self, callback: ErqCallback) -> Option<u32> {
        let handle = self.free.pop()?;
        self.slots[handle as usize] = Some(Slot {
            callback,
            keep: false,
        });
        Some(handle)
    }

    /// Invoke the callback registered at `handle` with `payload`, freeing
    /// the slot unless it was marked KEEP_HANDLE.
    pub fn dispatch(&mut self, handle: u32, payload: &[u8]) {
        let idx = handle as usize;
        if idx >= self.slots.len() {
            return;
        }
        let keep = match &mut self.slots[idx] {
            Some(slot) => {
                (slot.callback)(payload);
                slot.keep
            }
            None => return,
        };
        if !keep {
            self.slots[idx] = None;
            self.free.push(handle);
        }
    }

    /// Mark a live handle as KEEP_HANDLE-wrapped: subsequent replies on
    /// it won't free the slot until explicitly released.
    pub fn mark_keep(&mut self, handle: u32) {
        if let Some(Some(slot)) = self.slots.get_mut(handle as usize) {
            slot.keep = true;
        }
    }

    /// Drain every live handle, invoking `on_stale` for each before
    /// freeing it. Used when the ERQ co-process is lost.
    pub fn drain_stale(&mut self, mut on_stale: impl FnMut(u32)) {
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.take().is_some() {
                on_stale(idx as u32);
                self.free.push(idx as u32);
            }
        }
    }
}

/// A single in-flight outbound message. The send path tolerates exactly
/// one partially-written frame; a second send while one is pending is
/// refused.
struct PendingWrite {
    buf: Vec<u8>,
    written: usize,
}

pub struct ErqClient {
    child: Option<Child>,
    stream: UnixStream,
    max_message_size: usize,
    read_buf: Vec<u8>,
    pending: Option<PendingWrite>,
    stopped: bool,
}

impl ErqClient {
    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Fork `path` as the ERQ co-process, wired to one end of a freshly
    /// created socket pair; the child inherits the other end as
    /// stdin/stdout. The child is expected to emit a non-`'0'` first byte
    /// to signal successful launch.
    pub fn spawn(path: &str, max_message_size: usize) -> CommResult<Self> {
        let (parent_sock, child_sock) = UnixStream::pair().map_err(CommError::from)?;
        let child_fd = {
            use std::os::unix::io::IntoRawFd;
            child_sock.into_raw_fd()
        };

        let mut command = Command::new(path);
        unsafe {
            command.pre_exec(move || {
                if libc::dup2(child_fd, 0) < 0 || libc::dup2(child_fd, 1) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            })
        };
        command.stdin(Stdio::null()).stdout(Stdio::null());

        let child = command
            .spawn()
            .map_err(|e| CommError::ErqUnavailable(format!("spawn failed: {}", e)))?;

        parent_sock
            .set_nonblocking(true)
            .map_err(CommError::from)?;

        Ok(ErqClient {
            child: Some(child),
            stream: parent_sock,
            max_message_size,
            read_buf: Vec::new(),
            pending: None,
            stopped: false,
        })
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Enqueue a framed request. Refused (returns `false`) while a
    /// previous frame is still draining.
    pub fn send(&mut self, handle: u32, request_code: u8, payload: &[u8]) -> CommResult<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let total = HEADER_LEN + payload.len();
        if total > self.max_message_size {
            return Err(CommError::ErqUnavailable(
                "request exceeds max_message_size".to_string(),
            ));
        }
        let mut buf = Vec::with_capacity(total);
        buf.extend_from_slice(&(total as u32).to_be_bytes());
        buf.extend_from_slice(&handle.to_be_bytes());
        buf.push(request_code);
        buf.extend_from_slice(payload);

        self.pending = Some(PendingWrite { buf, written: 0 });
        self.flush_pending()?;
        Ok(true)
    }

    /// Drive the pending write forward; call whenever the ERQ socket is
    /// writable.
    pub fn flush_pending(&mut self) -> CommResult<()> {
        while let Some(pending) = &mut self.pending {
            match self.stream.write(&pending.buf[pending.written..]) {
                Ok(0) => {
                    self.stopped = true;
                    return Err(CommError::ErqUnavailable("write returned 0".to_string()));
                }
                Ok(n) => {
                    pending.written += n;
                    if pending.written >= pending.buf.len() {
                        self.pending = None;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.stopped = true;
                    return Err(CommError::from(e));
                }
            }
        }
        Ok(())
    }

    /// Read whatever is available from the ERQ socket and return
    /// complete frames as `(handle, request_code, payload)`. Partial
    /// frames remain buffered for the next call.
    pub fn drain_replies(&mut self) -> CommResult<Vec<(u32, u8, Vec<u8>)>> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    self.stopped = true;
                    return Err(CommError::ErqUnavailable("short read".to_string()));
                }
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.stopped = true;
                    return Err(CommError::from(e));
                }
            }
        }

        let mut frames = Vec::new();
        let mut offset = 0;
        loop {
            if self.read_buf.len() - offset < HEADER_LEN {
                break;
            }
            let len = u32::from_be_bytes(
                self.read_buf[offset..offset + 4].try_into().unwrap(),
            ) as usize;
            if len < HEADER_LEN || self.read_buf.len() - offset < len {
                break;
            }
            let handle = u32::from_be_bytes(
                self.read_buf[offset + 4..offset + 8].try_into().unwrap(),
            );
            let request_code = self.read_buf[offset + 8];
            let payload = self.read_buf[offset + HEADER_LEN..offset + len].to_vec();
            frames.push((handle, request_code, payload));
            offset += len;
        }
        self.read_buf.drain(0..offset);
        Ok(frames)
    }

    pub fn stop(&mut self) {
        self.stopped = true;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for ErqClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Unwrap a reverse-lookup reply payload per §6: IPv4 replies are `4-byte
/// address | NUL-terminated hostname`; IPv6 replies are `"addr hostname\0"`
/// text. Updates `cache` and returns the hostname on success.
pub fn apply_rlookup_reply(cache: &mut AddressCache, handle: u32, payload: &[u8]) -> Option<String> {
    match handle {
        RLOOKUP => {
            if payload.len() < 5 {
                return None;
            }
            let addr = format!(
                "{}.{}.{}.{}",
                payload[0], payload[1], payload[2], payload[3]
            );
            let name_bytes = &payload[4..];
            let name = str_from_nul_terminated(name_bytes)?;
            cache.insert(&addr, &name);
            Some(name)
        }
        RLOOKUPV6 => {
            let text = str_from_nul_terminated(payload)?;
            let mut parts = text.splitn(2, ' ');
            let addr = parts.next()?;
            let name = parts.next()?;
            cache.insert(addr, name);
            Some(name.to_string())
        }
        _ => None,
    }
}

fn str_from_nul_terminated(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_string)
}

/// Pending replies queued while waiting for the ERQ socket to become
/// writable again; used by the scheduler to avoid losing a send that was
/// refused because a frame was still in flight.
#[derive(Default)]
pub struct SendBacklog {
    queue: VecDeque<(u32, u8, Vec<u8>)>,
}

impl SendBacklog {
    pub fn push(&mut self, handle: u32, request_code: u8, payload: Vec<u8>) {
        self.queue.push_back((handle, request_code, payload));
    }

    pub fn pop(&mut self) -> Option<(u32, u8, Vec<u8>)> {
        self.queue.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_table_allocates_and_frees() {
        let mut table = HandleTable::new(2);
        assert_eq!(table.free_count(), 2);
        let h1 = table.allocate(Box::new(|_| {})).unwrap();
        assert_eq!(table.free_count(), 1);
        table.dispatch(h1, &[1, 2, 3]);
        assert_eq!(table.free_count(), 2);
    }

    #[test]
    fn handle_table_exhausts() {
        let mut table = HandleTable::new(1);
        assert!(table.allocate(Box::new(|_| {})).is_some());
        assert!(table.allocate(Box::new(|_| {})).is_none());
    }

    #[test]
    fn keep_handle_slot_survives_dispatch() {
        let mut table = HandleTable::new(1);
        let h = table.allocate(Box::new(|_| {})).unwrap();
        table.mark_keep(h);
        table.dispatch(h, &[]);
        assert_eq!(table.free_count(), 0);
    }

    #[test]
    fn drain_stale_empties_table_and_calls_back() {
        let mut table = HandleTable::new(2);
        let h1 = table.allocate(Box::new(|_| {})).unwrap();
        let h2 = table.allocate(Box::new(|_| {})).unwrap();
        let mut seen = Vec::new();
        table.drain_stale(|h| seen.push(h));
        seen.sort();
        let mut expected = vec![h1, h2];
        expected.sort();
        assert_eq!(seen, expected);
        assert_eq!(table.free_count(), 2);
    }

    #[test]
    fn rlookup_reply_updates_cache() {
        let mut cache = AddressCache::new(4);
        let mut payload = vec![10, 0, 0, 1];
        payload.extend_from_slice(b"host.example.com\0");
        let name = apply_rlookup_reply(&mut cache, RLOOKUP, &payload).unwrap();
        assert_eq!(name, "host.example.com");
        assert_eq!(cache.lookup("10.0.0.1"), Some("host.example.com"));
    }

    #[test]
    fn rlookupv6_reply_updates_cache() {
        let mut cache = AddressCache::new(4);
        let payload = b"::1 localhost6\0";
        let name = apply_rlookup_reply(&mut cache, RLOOKUPV6, payload).unwrap();
        assert_eq!(name, "localhost6");
        assert_eq!(cache.lookup("::1"), Some("localhost6"));
    }

    #[test]
    fn send_backlog_is_fifo() {
        let mut backlog = SendBacklog::default();
        backlog.push(1, REQUEST_RLOOKUP, vec![1]);
        backlog.push(2, REQUEST_RLOOKUP, vec![2]);
        assert_eq!(backlog.pop().unwrap().0, 1);
        assert_eq!(backlog.pop().unwrap().0, 2);
        assert!(backlog.pop().is_none());
    }
}
