//! The single-threaded cooperative I/O loop: accept, read, heartbeat,
//! UDP, ERQ, and fair per-session command dispatch.

use std::io::Read;
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use jiff::Timestamp;
use telnet_machine::machine::{MachineEvent, TelnetState};
use telnet_machine::negotiation::NegotiationOutcome;
use telnet_machine::protocol::{TelnetCommand, TelnetOption};

use crate::addr_cache::AddressCache;
use crate::config::CommConfig;
use crate::erq::{apply_rlookup_reply, ErqClient, HandleTable, KEEP_HANDLE, RLOOKUP, RLOOKUPV6};
use crate::host::HostBridge;
use crate::output::{DirtyList, FlushOutcome, OutputRequest};
use crate::session::{CloseReason, Session, SessionTable};
use crate::snoop::{Observer, SnoopError, SnoopGraph};
use crate::{log_error, log_info, log_warn};

/// Set by a `SIGURG`/`SIGIO` handler (installed by the caller) to flag
/// that urgent out-of-band data arrived on some session; the scheduler
/// checks this each pass rather than doing async-signal-unsafe work in
/// the handler itself.
pub static URGENT_DATA_PENDING: AtomicBool = AtomicBool::new(false);

/// Set by an external 2-second timer to request a heartbeat pass: the
/// loop returns control to the host without dispatching commands.
pub static HEARTBEAT_DUE: AtomicBool = AtomicBool::new(false);

pub struct Scheduler {
    pub sessions: SessionTable,
    pub snoop: SnoopGraph,
    pub config: CommConfig,
    pub addr_cache: AddressCache,
    listeners: Vec<TcpListener>,
    udp: Option<UdpSocket>,
    erq: Option<ErqClient>,
    erq_handles: HandleTable,
    dirty: DirtyList,
    /// Timestamp of the pass currently running; stamped onto sessions'
    /// `last_activity` as bytes and commands come in.
    now: Timestamp,
}

impl Scheduler {
    pub fn new(config: CommConfig, listeners: Vec<TcpListener>, udp: Option<UdpSocket>) -> Self {
        let erq_handles = HandleTable::new(config.erq_handle_slots());
        let addr_cache = AddressCache::new(config.address_cache_capacity());
        Scheduler {
            sessions: SessionTable::new(),
            snoop: SnoopGraph::new(),
            config,
            addr_cache,
            listeners,
            udp,
            erq: None,
            erq_handles,
            dirty: DirtyList::new(),
            now: Timestamp::UNIX_EPOCH,
        }
    }

    pub fn attach_erq(&mut self, client: ErqClient) {
        self.erq = Some(client);
    }

    pub fn erq_is_attached(&self) -> bool {
        self.erq.is_some()
    }

    /// Route one drained ERQ frame: reserved reverse-lookup handles update
    /// the address cache directly; a `KEEP_HANDLE` wrapper is unwrapped
    /// (inner handle | inner payload) and its slot marked to survive the
    /// dispatch; everything else goes straight to the handle table.
    fn dispatch_erq_reply(&mut self, handle: u32, payload: Vec<u8>) {
        match handle {
            RLOOKUP | RLOOKUPV6 => {
                apply_rlookup_reply(&mut self.addr_cache, handle, &payload);
            }
            KEEP_HANDLE => {
                if payload.len() < 4 {
                    log_warn!("KEEP_HANDLE reply too short to unwrap");
                    return;
                }
                let inner_handle = u32::from_be_bytes(payload[0..4].try_into().unwrap());
                self.erq_handles.mark_keep(inner_handle);
                self.erq_handles.dispatch(inner_handle, &payload[4..]);
            }
            _ => {
                self.erq_handles.dispatch(handle, &payload);
            }
        }
    }

    /// Run one pass of the loop. Returns `true` if the caller should keep
    /// going (process hasn't been asked to shut down).
    pub fn run_pass(&mut self, host: &mut dyn HostBridge, now: Timestamp) -> bool {
        self.now = now;
        self.teardown_pending_closes(host);

        let heartbeat = HEARTBEAT_DUE.swap(false, Ordering::SeqCst);
        let timeout_ms = if heartbeat { 0 } else { 1000 };

        if self.sessions.is_empty() || !self.any_session_has_pending_command() {
            self.flush_all(host);
        }

        self.apply_urgent_signal();
        self.poll_and_service(timeout_ms);

        if let Some(erq) = &mut self.erq {
            match erq.drain_replies() {
                Ok(frames) => {
                    for (handle, _request_code, payload) in frames {
                        self.dispatch_erq_reply(handle, payload);
                    }
                }
                Err(_) => {
                    self.erq_handles.drain_stale(|h| host.stale_erq(h));
                    host.erq_stop();
                    self.erq = None;
                }
            }
        }

        self.accept_new_sessions(host, now);

        if heartbeat {
            return true;
        }

        self.read_udp(host);
        self.fair_dispatch(host);

        true
    }

    fn any_session_has_pending_command(&self) -> bool {
        self.sessions
            .ids()
            .any(|id| matches!(self.sessions.get(id).map(|s| s.machine.state()), Some(TelnetState::Ready)))
    }

    fn apply_urgent_signal(&mut self) {
        if !URGENT_DATA_PENDING.swap(false, Ordering::SeqCst) {
            return;
        }
        for id in self.sessions.ids().collect::<Vec<_>>() {
            if let Some(session) = self.sessions.get_mut(id) {
                session.machine.signal_urgent();
            }
        }
    }

    /// Wait up to `timeout_ms` for any watched descriptor to become ready,
    /// and flag sessions that have urgent (out-of-band) bytes waiting so
    /// the telnet machine treats them as a Synch even if `SIGURG` itself
    /// never fired (e.g. data arrived between the signal and this pass).
    /// Ordinary readability is left to the nonblocking reads below, which
    /// already tolerate `WouldBlock`; `poll` here exists to sleep instead
    /// of busy-spinning when nothing is ready.
    fn poll_and_service(&mut self, timeout_ms: i32) {
        let session_ids: Vec<_> = self.sessions.ids().collect();
        let mut fds = Vec::with_capacity(self.listeners.len() + session_ids.len() + 2);
        fds.extend(self.listeners.iter().map(|l| l.as_raw_fd()));
        let session_fd_start = fds.len();
        fds.extend(session_ids.iter().filter_map(|&id| self.sessions.get(id).map(|s| s.socket.as_raw_fd())));
        let erq_fd_idx = self.erq.as_ref().map(|erq| {
            fds.push(erq.as_raw_fd());
            fds.len() - 1
        });
        let udp_fd_idx = self.udp.as_ref().map(|udp| {
            fds.push(udp.as_raw_fd());
            fds.len() - 1
        });

        let Ok(readiness) = crate::sys::poll_readiness(&fds, timeout_ms) else {
            return;
        };

        for (offset, &id) in session_ids.iter().enumerate() {
            let idx = session_fd_start + offset;
            if readiness.get(idx).is_some_and(|r| r.urgent) {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.machine.signal_urgent();
                }
            }
        }
        let _ = (erq_fd_idx, udp_fd_idx);
    }

    fn accept_new_sessions(&mut self, host: &mut dyn HostBridge, now: Timestamp) {
        for listener_idx in 0..self.listeners.len() {
            loop {
                let accepted = self.listeners[listener_idx].accept();
                match accepted {
                    Ok((stream, addr)) => {
                        self.handle_new_connection(stream, addr.to_string(), host, now);
                    }
                    Err(e) => {
                        use std::io::ErrorKind;
                        if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) {
                            break;
                        }
                        log_warn!("accept failed: {}", e);
                        break;
                    }
                }
            }
        }
    }

    fn handle_new_connection(
        &mut self,
        stream: TcpStream,
        peer: String,
        host: &mut dyn HostBridge,
        now: Timestamp,
    ) {
        let _ = stream.set_nonblocking(true);
        let _ = crate::sys::enable_oob_inline(&stream);

        if self.sessions.len() >= self.config.server.max_sessions {
            log_warn!("rejecting {}: session table full", peer);
            return;
        }

        let text_size = self.config.buffers.text_size;
        let output_size = self.config.buffers.output_size;
        let id = self
            .sessions
            .insert_with(|id| Session::new(id, stream, peer.clone(), text_size, output_size, now));

        let host_object = host.connect(id, &peer);
        match host_object {
            Some(obj) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.host_object = Some(obj);
                }
                host.logon(obj);
                log_info!("connection accepted: {} (session {})", peer, id);
            }
            None => {
                self.sessions.remove(id);
                log_warn!("connect callback refused {}", peer);
            }
        }
    }

    fn read_udp(&mut self, host: &mut dyn HostBridge) {
        let Some(udp) = &self.udp else { return };
        let mut buf = [0u8; 1024];
        loop {
            match udp.recv_from(&mut buf) {
                Ok((n, peer)) => {
                    host.receive_udp(&peer.ip().to_string(), &buf[..n], peer.port());
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(_) => break,
            }
        }
    }

    fn fair_dispatch(&mut self, host: &mut dyn HostBridge) {
        let order = self.sessions.fair_dispatch_order();
        for id in order {
            self.service_one_session(id, host);
        }
    }

    fn service_one_session(&mut self, id: crate::snoop::SessionId, host: &mut dyn HostBridge) {
        let mut closed = false;
        let mut dispatched = 0usize;
        let burst_limit = self.sessions.get(id).map(|s| s.command_burst_limit()).unwrap_or(1);

        loop {
            let read_result = self.read_session_bytes(id);
            match read_result {
                SessionReadOutcome::Closed => {
                    closed = true;
                    break;
                }
                SessionReadOutcome::NoData => break,
                SessionReadOutcome::Data => {}
            }

            let events = self.run_telnet_machine(id);
            for event in events {
                self.handle_machine_event(id, event, host);
            }

            if let Some(session) = self.sessions.get_mut(id) {
                if session.machine.state() == TelnetState::Ready {
                    dispatched += 1;
                    let command = String::from_utf8_lossy(session.raw.cooked())
                        .trim_end_matches(['\n', '\0'])
                        .to_string();
                    self.deliver_command(id, command, host);
                    if let Some(session) = self.sessions.get_mut(id) {
                        session.machine.accept_command(&mut session.raw);
                    }
                }
            }

            if dispatched >= burst_limit {
                break;
            }
        }

        if closed {
            if let Some(mut session) = self.sessions.remove(id) {
                self.snoop.dissolve(id);
                self.dirty.mark_clean(id);
                if let Some(obj) = session.host_object {
                    host.disconnect(obj);
                }
                let _ = session.output.flush_to(&mut session.socket);
            }
        }

        self.sessions.advance_cursor_past(id);
    }

    fn read_session_bytes(&mut self, id: crate::snoop::SessionId) -> SessionReadOutcome {
        let Some(session) = self.sessions.get_mut(id) else {
            return SessionReadOutcome::Closed;
        };
        if session.raw.free_space() == 0 {
            return SessionReadOutcome::NoData;
        }
        match session.socket.read(session.raw.write_slice()) {
            Ok(0) => SessionReadOutcome::Closed,
            Ok(n) => {
                session.raw.advance_text_end(n);
                SessionReadOutcome::Data
            }
            Err(e) => {
                use std::io::ErrorKind;
                match e.kind() {
                    ErrorKind::WouldBlock | ErrorKind::Interrupted => SessionReadOutcome::NoData,
                    _ => SessionReadOutcome::Closed,
                }
            }
        }
    }

    fn run_telnet_machine(&mut self, id: crate::snoop::SessionId) -> Vec<MachineEvent> {
        let Some(session) = self.sessions.get_mut(id) else {
            return Vec::new();
        };
        session.machine_ctx.charmode = session.negotiator.charmode_active();
        session.machine_ctx.bang_escape_active = !session.redirects.is_empty()
            && !session.redirects.top_flags().contains(crate::redirect::RedirectFlags::IGNORE_BANG);
        session.machine.process(&mut session.raw, &session.machine_ctx)
    }

    fn handle_machine_event(
        &mut self,
        id: crate::snoop::SessionId,
        event: MachineEvent,
        host: &mut dyn HostBridge,
    ) {
        match event {
            MachineEvent::Negotiate { verb, option_byte, option } => {
                self.handle_negotiate(id, verb, option_byte, option, host);
            }
            MachineEvent::SubNegotiation { option_byte, option, data } => {
                if let (Some(opt), Some(session)) = (option, self.sessions.get(id)) {
                    if let Some(obj) = session.host_object {
                        if let Some(reply) = host.telnet_neg(obj, TelnetCommand::SB, opt, Some(&data)) {
                            self.send_raw(id, &reply);
                        }
                    }
                } else {
                    let _ = option_byte;
                }
            }
            MachineEvent::Command(_cmd) => {}
            MachineEvent::UnknownCommand(_) => {}
            MachineEvent::EmitRubout => {
                self.send_raw(id, b"\x08 \x08");
            }
            MachineEvent::LineOverflow | MachineEvent::SubNegotiationOverflow => {
                log_warn!("session {}: buffer overflow, discarding", id);
            }
            MachineEvent::Invalid(reason) => {
                log_error!("session {}: invariant violated: {}", id, reason);
                self.force_close_with_apology(id);
            }
        }
    }

    fn handle_negotiate(
        &mut self,
        id: crate::snoop::SessionId,
        verb: TelnetCommand,
        option_byte: u8,
        option: Option<TelnetOption>,
        host: &mut dyn HostBridge,
    ) {
        let echo_related = matches!(
            option,
            Some(TelnetOption::ECHO) | Some(TelnetOption::SUPPRESS_GO_AHEAD)
        );
        if echo_related {
            let override_target = self
                .sessions
                .get(id)
                .and_then(|s| s.host_object.map(|obj| (obj, s.negotiator.flags())));
            if let Some((obj, flags)) = override_target {
                if let Some(reply) = host.no_echo(obj, flags) {
                    if !reply.is_empty() {
                        self.send_raw(id, &reply);
                    }
                    return;
                }
            }
        }

        let Some(session) = self.sessions.get_mut(id) else { return };
        let outcome = session.negotiator.on_negotiate(verb, option_byte, option);
        match outcome {
            NegotiationOutcome::Reply(bytes) => {
                if !bytes.is_empty() {
                    self.send_raw(id, &bytes);
                }
            }
            NegotiationOutcome::NoReply => {}
            NegotiationOutcome::Delegate => {
                if let (Some(opt), Some(obj)) = (option, session.host_object) {
                    match host.telnet_neg(obj, verb, opt, None) {
                        Some(reply) => self.send_raw(id, &reply),
                        None => {
                            let reply = telnet_machine::negotiation::refuse_unsolicited(verb, option_byte);
                            self.send_raw(id, &reply);
                        }
                    }
                }
            }
        }
    }

    fn deliver_command(&mut self, id: crate::snoop::SessionId, command: String, host: &mut dyn HostBridge) {
        let now = self.now;
        let Some(session) = self.sessions.get_mut(id) else { return };
        session.last_activity = now;

        if session.redirects.is_empty() {
            let obj = session.host_object;
            drop(session);
            self.dispatch_to_host(id, obj, &command, host);
            return;
        }

        let routed = match session.redirects.route(&command) {
            crate::redirect::RouteDecision::Redirect(line) => Some(line.to_string()),
            crate::redirect::RouteDecision::Normal(line) => {
                let line = line.to_string();
                let obj = session.host_object;
                drop(session);
                self.dispatch_to_host(id, obj, &line, host);
                return;
            }
        };
        let Some(line) = routed else { return };

        let mut flags = session.negotiator.flags();
        flags.mark_stale();
        session.negotiator.set_flags(flags);

        let outcome = session.redirects.invoke_top(&line);

        // If the callback didn't push a fresh redirect (still stale),
        // settle echo/charmode to whatever the stack's new top wants, or
        // to zero if the stack emptied out.
        if matches!(outcome, Some(crate::redirect::RedirectOutcome::Done) | None) {
            let mut flags = session.negotiator.flags();
            flags.clear_stale();
            session.negotiator.set_flags(flags);
        }
    }

    /// Hand a non-redirected command line to the session's bound host
    /// object, relaying it to any snooper first. Any bytes the host
    /// returns are queued straight back to the session.
    fn dispatch_to_host(
        &mut self,
        id: crate::snoop::SessionId,
        obj: Option<crate::host::HostObjectId>,
        line: &str,
        host: &mut dyn HostBridge,
    ) {
        self.relay_to_snoopers(id, line);
        let Some(obj) = obj else { return };
        if let Some(reply) = host.receive_command(obj, line) {
            self.queue_output(id, &reply);
        }
    }

    fn relay_to_snoopers(&mut self, id: crate::snoop::SessionId, _line: &str) {
        // Output relay to a snooper happens on the output path (send_raw /
        // queue_output), not on command receipt; nothing to do here for
        // inbound lines other than leaving a hook point for future
        // bidirectional snoop support.
        let _ = id;
    }

    /// Queue bytes for a session's output buffer and mark it dirty.
    pub fn queue_output(&mut self, id: crate::snoop::SessionId, bytes: &[u8]) {
        if let Some(session) = self.sessions.get_mut(id) {
            if session.do_close.is_some() {
                log_warn!("discarding output to closing session {}", id);
                return;
            }
            session.output.append(OutputRequest::Bytes(bytes));
            if !session.output.is_empty() {
                self.dirty.mark_dirty(id);
            }
            self.relay_snooped_output(id, bytes);
        }
    }

    fn relay_snooped_output(&mut self, id: crate::snoop::SessionId, bytes: &[u8]) {
        if let Some(Observer::Session(snooper_id)) = self.snoop.snoop_by(id) {
            let mut prefixed = crate::snoop::SNOOP_PREFIX.to_vec();
            prefixed.extend_from_slice(bytes);
            if let Some(snooper) = self.sessions.get_mut(snooper_id) {
                snooper.output.append(OutputRequest::Bytes(&prefixed));
                if !snooper.output.is_empty() {
                    self.dirty.mark_dirty(snooper_id);
                }
            }
        }
    }

    /// Send bytes bypassing the ordinary output bitmap/newline/IAC-quoting
    /// rules (telnet command replies): `bytes` is already a correctly
    /// framed command sequence, so its IAC introducer must reach the wire
    /// unescaped, not doubled as if it were literal data. Marks
    /// `sending_telnet_command` so snoop relay and catch-message shadowing
    /// are bypassed too, per the output path's scoped flag.
    fn send_raw(&mut self, id: crate::snoop::SessionId, bytes: &[u8]) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.output.sending_telnet_command = true;
            session.output.append_verbatim(bytes);
            session.output.sending_telnet_command = false;
            if !session.output.is_empty() {
                self.dirty.mark_dirty(id);
            }
        }
    }

    /// Master-approved entry point for establishing a snoop edge: resolves
    /// both sessions' host objects, asks the host to approve the pairing,
    /// and only then attempts the graph's own cycle-checked insert.
    pub fn request_snoop(
        &mut self,
        by: crate::snoop::SessionId,
        on: crate::snoop::SessionId,
        host: &mut dyn HostBridge,
    ) -> Result<(), SnoopRequestError> {
        let by_obj = self
            .sessions
            .get(by)
            .and_then(|s| s.host_object)
            .ok_or(SnoopRequestError::NoHostObject)?;
        let on_obj = self
            .sessions
            .get(on)
            .and_then(|s| s.host_object)
            .ok_or(SnoopRequestError::NoHostObject)?;
        if !host.valid_snoop(by_obj, on_obj) {
            return Err(SnoopRequestError::Denied);
        }
        self.snoop.set_snoop(by, on).map_err(SnoopRequestError::from)
    }

    /// Master-approved lookup of who, if anyone, is snooping `victim`.
    pub fn query_snoop(
        &mut self,
        victim: crate::snoop::SessionId,
        host: &mut dyn HostBridge,
    ) -> Option<Observer> {
        let obj = self.sessions.get(victim)?.host_object?;
        if !host.valid_query_snoop(obj) {
            return None;
        }
        self.snoop.snoop_by(victim)
    }

    fn force_close_with_apology(&mut self, id: crate::snoop::SessionId) {
        self.send_raw(id, b"\r\nInternal error, disconnecting.\r\n");
        if let Some(session) = self.sessions.get_mut(id) {
            session.mark_for_close(CloseReason::Normal);
        }
    }

    fn teardown_pending_closes(&mut self, host: &mut dyn HostBridge) {
        for id in self.sessions.pending_close() {
            if let Some(mut session) = self.sessions.remove(id) {
                let _ = session.output.flush_to(&mut session.socket);
                self.snoop.dissolve(id);
                self.dirty.mark_clean(id);
                if let Some(obj) = session.host_object {
                    host.disconnect(obj);
                }
            }
        }
    }

    /// Flush every dirty session's output buffer; called at the start of
    /// a pass when no session has a pending completed command, and again
    /// between passes. Only sessions the dirty list names are touched; a
    /// session drops back out of it once its buffer empties.
    pub fn flush_all(&mut self, _host: &mut dyn HostBridge) {
        for id in self.dirty.iter().collect::<Vec<_>>() {
            let still_dirty = if let Some(session) = self.sessions.get_mut(id) {
                match session.output.flush_to(&mut session.socket) {
                    Ok(FlushOutcome::Idempotent) | Ok(FlushOutcome::Wrote(_)) => {}
                    Ok(FlushOutcome::DroppedWouldBlock) => {
                        log_warn!("dropped output for session {}: would block", id);
                    }
                    Err(_) => {
                        session.mark_for_close(CloseReason::Normal);
                    }
                }
                !session.output.is_empty()
            } else {
                false
            };
            if !still_dirty {
                self.dirty.mark_clean(id);
            }
        }
    }

    pub fn listener_fds(&self) -> Vec<i32> {
        self.listeners.iter().map(|l| l.as_raw_fd()).collect()
    }
}

enum SessionReadOutcome {
    Data,
    NoData,
    Closed,
}

/// Why a `Scheduler::request_snoop` call was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoopRequestError {
    /// One of the two sessions has no bound host object to ask about.
    NoHostObject,
    /// The host's `valid_snoop` callback refused the pairing.
    Denied,
    /// The graph itself rejected it: it would form a cycle.
    WouldCycle,
}

impl From<SnoopError> for SnoopRequestError {
    fn from(err: SnoopError) -> Self {
        match err {
            SnoopError::WouldCycle => SnoopRequestError::WouldCycle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::EchoHost;
    use std::net::TcpListener;

    fn test_scheduler() -> Scheduler {
        let config = CommConfig::default();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        Scheduler::new(config, vec![listener], None)
    }

    #[test]
    fn accept_path_binds_host_object_and_registers_session() {
        let mut sched = test_scheduler();
        let mut host = EchoHost::new();
        let addr = sched.listeners[0].local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        // give the OS a moment to complete the handshake; loopback is
        // effectively immediate so no sleep needed in practice, but
        // accept() is attempted in a loop until WouldBlock either way.
        sched.accept_new_sessions(&mut host, Timestamp::UNIX_EPOCH);
        assert_eq!(sched.sessions.len(), 1);
    }

    #[test]
    fn queue_output_marks_buffer_nonempty() {
        let mut sched = test_scheduler();
        let mut host = EchoHost::new();
        let addr = sched.listeners[0].local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        sched.accept_new_sessions(&mut host, Timestamp::UNIX_EPOCH);
        let id = sched.sessions.ids().next().unwrap();
        sched.queue_output(id, b"hello\n");
        assert!(!sched.sessions.get(id).unwrap().output.is_empty());
    }

    #[test]
    fn full_session_table_rejects_new_connections() {
        let mut config = CommConfig::default();
        config.server.max_sessions = 0;
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let mut sched = Scheduler::new(config, vec![listener], None);
        let mut host = EchoHost::new();
        let addr = sched.listeners[0].local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        sched.accept_new_sessions(&mut host, Timestamp::UNIX_EPOCH);
        assert_eq!(sched.sessions.len(), 0);
    }

    fn connected_session(sched: &mut Scheduler, host: &mut dyn HostBridge) -> crate::snoop::SessionId {
        let addr = sched.listeners[0].local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();
        sched.accept_new_sessions(host, Timestamp::UNIX_EPOCH);
        sched.sessions.ids().last().unwrap()
    }

    #[test]
    fn send_raw_does_not_double_iac() {
        let mut sched = test_scheduler();
        let mut host = EchoHost::new();
        let id = connected_session(&mut sched, &mut host);
        // IAC WONT ECHO, already a correctly framed command sequence.
        sched.send_raw(id, &[255, 252, 1]);
        let mut sink = Vec::new();
        sched.sessions.get_mut(id).unwrap().output.flush_to(&mut sink).unwrap();
        assert_eq!(sink, vec![255, 252, 1]);
    }

    #[test]
    fn flush_all_only_touches_dirty_sessions_and_clears_them() {
        let mut sched = test_scheduler();
        let mut host = EchoHost::new();
        let id = connected_session(&mut sched, &mut host);
        sched.queue_output(id, b"hi\n");
        assert!(sched.dirty.contains(id));
        sched.flush_all(&mut host);
        assert!(!sched.dirty.contains(id));
        assert!(sched.sessions.get(id).unwrap().output.is_empty());
    }

    #[test]
    fn deliver_command_reaches_host_and_is_echoed_back() {
        let mut sched = test_scheduler();
        let mut host = EchoHost::new();
        let id = connected_session(&mut sched, &mut host);
        // service_one_session strips the line terminator before calling
        // this; exercise it directly with an already-clean command so the
        // echoed reply is exactly predictable.
        sched.deliver_command(id, "hello".to_string(), &mut host);
        let mut sink = Vec::new();
        sched.sessions.get_mut(id).unwrap().output.flush_to(&mut sink).unwrap();
        assert_eq!(sink, b"hello\r\n");
    }

    #[test]
    fn request_snoop_requires_host_approval() {
        struct DenyHost;
        impl HostBridge for DenyHost {
            fn connect(&mut self, _session: crate::snoop::SessionId, _peer: &str) -> Option<crate::host::HostObjectId> {
                Some(1)
            }
            fn logon(&mut self, _obj: crate::host::HostObjectId) {}
            fn disconnect(&mut self, _obj: crate::host::HostObjectId) {}
            fn telnet_neg(
                &mut self,
                _obj: crate::host::HostObjectId,
                _verb: TelnetCommand,
                _option: TelnetOption,
                _payload: Option<&[u8]>,
            ) -> Option<Vec<u8>> {
                None
            }
            fn receive_command(&mut self, _obj: crate::host::HostObjectId, _command: &str) -> Option<Vec<u8>> {
                None
            }
            fn receive_udp(&mut self, _peer: &str, _data: &[u8], _port: u16) {}
            fn stale_erq(&mut self, _handle: u32) {}
            fn erq_stop(&mut self) {}
            fn valid_snoop(&mut self, _by: crate::host::HostObjectId, _on: crate::host::HostObjectId) -> bool {
                false
            }
            fn valid_exec(&mut self, _from_prog: &str, _new: &str, _old: &str) -> bool {
                true
            }
            fn valid_query_snoop(&mut self, _victim: crate::host::HostObjectId) -> bool {
                true
            }
            fn remove_player(&mut self, _obj: crate::host::HostObjectId) {}
        }

        let mut sched = test_scheduler();
        let mut host = DenyHost;
        let by = connected_session(&mut sched, &mut host);
        let on = connected_session(&mut sched, &mut host);
        let err = sched.request_snoop(by, on, &mut host).unwrap_err();
        assert_eq!(err, SnoopRequestError::Denied);
        assert_eq!(sched.snoop.snoop_on(by), None);
    }

    #[test]
    fn request_snoop_succeeds_when_host_approves() {
        let mut sched = test_scheduler();
        let mut host = EchoHost::new();
        let by = connected_session(&mut sched, &mut host);
        let on = connected_session(&mut sched, &mut host);
        sched.request_snoop(by, on, &mut host).unwrap();
        assert_eq!(sched.snoop.snoop_on(by), Some(on));
    }
}
