//! One connected peer: socket, telnet decoder state, output buffer, and
//! the bits of lifecycle state (close flags, redirect stack, prompt) the
//! scheduler and host bridge need to drive it.

use std::net::TcpStream;

use jiff::Timestamp;
use telnet_machine::machine::MachineContext;
use telnet_machine::negotiation::Negotiator;
use telnet_machine::{SessionBuffer, TelnetMachine};

use crate::host::HostObjectId;
use crate::output::OutputBuffer;
use crate::redirect::RedirectStack;
use crate::snoop::SessionId;

/// Deferred-close reason: teardown happens at the next pass boundary, not
/// mid-dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    /// Hand the underlying descriptor off to the ERQ co-process instead of
    /// closing it outright.
    HandToErq,
}

pub struct Session {
    pub id: SessionId,
    pub socket: TcpStream,
    pub peer_addr: String,

    pub raw: SessionBuffer,
    pub machine: TelnetMachine,
    pub machine_ctx: MachineContext,
    pub negotiator: Negotiator,

    pub output: OutputBuffer,

    pub do_close: Option<CloseReason>,
    pub closing: bool,

    pub redirects: RedirectStack,

    pub host_object: Option<HostObjectId>,
    pub prompt: Option<String>,
    pub last_activity: Timestamp,
    pub trace_level: u8,

    /// True while the session's top redirect is an editor context: lets
    /// the scheduler's fair-dispatch loop deliver a burst of commands
    /// instead of just one per pass.
    pub editor_mode: bool,
}

impl Session {
    pub fn new(
        id: SessionId,
        socket: TcpStream,
        peer_addr: String,
        text_buffer_size: usize,
        output_buffer_size: usize,
        now: Timestamp,
    ) -> Self {
        Session {
            id,
            socket,
            peer_addr,
            raw: SessionBuffer::new(text_buffer_size),
            machine: TelnetMachine::new(),
            machine_ctx: MachineContext::default(),
            negotiator: Negotiator::new(),
            output: OutputBuffer::new(output_buffer_size),
            do_close: None,
            closing: false,
            redirects: RedirectStack::new(),
            host_object: None,
            prompt: None,
            last_activity: now,
            trace_level: 0,
            editor_mode: false,
        }
    }

    pub fn mark_for_close(&mut self, reason: CloseReason) {
        self.do_close = Some(reason);
    }

    pub fn command_burst_limit(&self) -> usize {
        if self.editor_mode {
            20
        } else {
            1
        }
    }
}

/// Slot array of active sessions with a round-robin dispatch cursor
/// (`NextCmdGiver`). Slots are reused via a free list so session ids stay
/// stable across their lifetime and aren't reassigned mid-flight.
#[derive(Default)]
pub struct SessionTable {
    slots: Vec<Option<Session>>,
    free: Vec<SessionId>,
    next_cmd_giver: usize,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a slot for a new session, calling `make` with the id so
    /// the caller can construct the `Session` (it needs its own id for
    /// the socket's owning struct).
    pub fn insert_with(&mut self, make: impl FnOnce(SessionId) -> Session) -> SessionId {
        let id = if let Some(id) = self.free.pop() {
            id
        } else {
            let id = self.slots.len();
            self.slots.push(None);
            id
        };
        self.slots[id] = Some(make(id));
        id
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots.get_mut(id).and_then(|s| s.as_mut())
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let removed = self.slots.get_mut(id).and_then(|s| s.take());
        if removed.is_some() {
            self.free.push(id);
        }
        removed
    }

    pub fn ids(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, s)| s.as_ref().map(|_| id))
    }

    /// Sessions still pending close at the start of the next pass.
    pub fn pending_close(&self) -> Vec<SessionId> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(id, s)| s.as_ref().filter(|s| s.do_close.is_some()).map(|_| id))
            .collect()
    }

    /// Round-robin iteration order starting at the persistent cursor,
    /// covering every currently live session exactly once.
    pub fn fair_dispatch_order(&mut self) -> Vec<SessionId> {
        let live: Vec<SessionId> = self.ids().collect();
        if live.is_empty() {
            return Vec::new();
        }
        let start = self.next_cmd_giver % live.len();
        let mut order = Vec::with_capacity(live.len());
        order.extend_from_slice(&live[start..]);
        order.extend_from_slice(&live[..start]);
        order
    }

    /// Advance the cursor past `id` after it has been served, so the next
    /// pass resumes fairly from the following session.
    pub fn advance_cursor_past(&mut self, id: SessionId) {
        let live: Vec<SessionId> = self.ids().collect();
        if let Some(pos) = live.iter().position(|&s| s == id) {
            self.next_cmd_giver = (pos + 1) % live.len().max(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn session_table_reuses_freed_slots() {
        let mut table = SessionTable::new();
        let (_c1, s1) = loopback_pair();
        let id1 = table.insert_with(|id| {
            Session::new(id, s1, "127.0.0.1:1".into(), 2048, 2048, Timestamp::UNIX_EPOCH)
        });
        table.remove(id1);
        let (_c2, s2) = loopback_pair();
        let id2 = table.insert_with(|id| {
            Session::new(id, s2, "127.0.0.1:2".into(), 2048, 2048, Timestamp::UNIX_EPOCH)
        });
        assert_eq!(id1, id2);
    }

    #[test]
    fn fair_dispatch_order_wraps_from_cursor() {
        let mut table = SessionTable::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let (_c, s) = loopback_pair();
            let id = table.insert_with(|id| {
                Session::new(id, s, format!("127.0.0.1:{}", i), 2048, 2048, Timestamp::UNIX_EPOCH)
            });
            ids.push(id);
        }
        table.advance_cursor_past(ids[0]);
        let order = table.fair_dispatch_order();
        assert_eq!(order[0], ids[1]);
    }

    #[test]
    fn editor_mode_raises_burst_limit() {
        let (_c, s) = loopback_pair();
        let mut session = Session::new(0, s, "peer".into(), 2048, 2048, Timestamp::UNIX_EPOCH);
        assert_eq!(session.command_burst_limit(), 1);
        session.editor_mode = true;
        assert_eq!(session.command_burst_limit(), 20);
    }
}
