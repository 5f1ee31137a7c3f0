//! The fixed set of callbacks into the embedded scripting host. The
//! scheduler calls these synchronously from the main loop; none of them
//! may block.

use telnet_machine::protocol::{TelnetCommand, TelnetOption};
use telnet_machine::negotiation::NoEcho;

use crate::snoop::SessionId;

/// Opaque handle to whatever the host binds a session to. The scheduler
/// never interprets this value — it only threads it back through the
/// callbacks that take it.
pub type HostObjectId = u64;

/// The callback surface a host language must provide to drive sessions.
/// Names and signatures follow the external-interface contract: `connect`,
/// `logon`, `disconnect`, `telnet_neg`, `no_echo`, `receive_command`,
/// `receive_udp`, `stale_erq`, `erq_stop`, `valid_snoop`, `valid_exec`,
/// `valid_query_snoop`, `remove_player`.
pub trait HostBridge {
    /// A new session completed its accept-path checks. Must return the
    /// host object to bind it to, or `None` to tear the session down.
    fn connect(&mut self, session: SessionId, peer: &str) -> Option<HostObjectId>;

    /// The session is now bound to a host object; run post-connect setup
    /// (banners, login prompts).
    fn logon(&mut self, obj: HostObjectId);

    /// The session is going away; release any host-side state.
    fn disconnect(&mut self, obj: HostObjectId);

    /// A negotiation the telnet machine delegated (NEWENV, ENVIRON,
    /// XDISPLOC, LINEMODE, NAWS, TTYPE, TSPEED, EOR). Returning `None`
    /// means "no special handling"; the caller falls back to the generic
    /// refusal (`DONT` for `WILL`, `WONT` for `DO`).
    fn telnet_neg(
        &mut self,
        obj: HostObjectId,
        verb: TelnetCommand,
        option: TelnetOption,
        payload: Option<&[u8]>,
    ) -> Option<Vec<u8>>;

    /// Override hook: if installed for this object, replaces the default
    /// echo/charmode negotiation entirely. Returning `None` leaves the
    /// default machinery in charge.
    fn no_echo(&mut self, _obj: HostObjectId, _flags: NoEcho) -> Option<Vec<u8>> {
        None
    }

    /// A session with no redirect pending delivered a completed command
    /// line to its bound host object. Returning bytes queues them as
    /// output back to the session; returning `None` sends nothing.
    fn receive_command(&mut self, obj: HostObjectId, command: &str) -> Option<Vec<u8>>;

    fn receive_udp(&mut self, peer: &str, data: &[u8], port: u16);

    /// The ERQ co-process was lost; every handle still live gets one call
    /// here with its opaque payload before being freed.
    fn stale_erq(&mut self, handle: u32);

    /// ERQ loss notification hook, invoked exactly once per loss event.
    fn erq_stop(&mut self);

    fn valid_snoop(&mut self, by: HostObjectId, on: HostObjectId) -> bool;

    fn valid_exec(&mut self, from_prog: &str, new: &str, old: &str) -> bool;

    fn valid_query_snoop(&mut self, victim: HostObjectId) -> bool;

    fn remove_player(&mut self, obj: HostObjectId);
}

/// Minimal reference host: echoes input back, approves every snoop and
/// exec request, and otherwise does nothing. Exercises every callback so
/// the scheduler loop has something real to drive for the standalone
/// binary and the integration tests.
#[derive(Default)]
pub struct EchoHost {
    next_object: u64,
}

impl EchoHost {
    pub fn new() -> Self {
        EchoHost { next_object: 1 }
    }
}

impl HostBridge for EchoHost {
    fn connect(&mut self, _session: SessionId, _peer: &str) -> Option<HostObjectId> {
        let id = self.next_object;
        self.next_object += 1;
        Some(id)
    }

    fn logon(&mut self, _obj: HostObjectId) {}

    fn disconnect(&mut self, _obj: HostObjectId) {}

    fn telnet_neg(
        &mut self,
        _obj: HostObjectId,
        _verb: TelnetCommand,
        _option: TelnetOption,
        _payload: Option<&[u8]>,
    ) -> Option<Vec<u8>> {
        None
    }

    fn receive_command(&mut self, _obj: HostObjectId, command: &str) -> Option<Vec<u8>> {
        Some(format!("{}\n", command).into_bytes())
    }

    fn receive_udp(&mut self, _peer: &str, _data: &[u8], _port: u16) {}

    fn stale_erq(&mut self, _handle: u32) {}

    fn erq_stop(&mut self) {}

    fn valid_snoop(&mut self, _by: HostObjectId, _on: HostObjectId) -> bool {
        true
    }

    fn valid_exec(&mut self, _from_prog: &str, _new: &str, _old: &str) -> bool {
        true
    }

    fn valid_query_snoop(&mut self, _victim: HostObjectId) -> bool {
        true
    }

    fn remove_player(&mut self, _obj: HostObjectId) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_host_assigns_increasing_object_ids() {
        let mut host = EchoHost::new();
        let a = host.connect(1, "127.0.0.1:1").unwrap();
        let b = host.connect(2, "127.0.0.1:2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn echo_host_echoes_received_command() {
        let mut host = EchoHost::new();
        let obj = host.connect(1, "127.0.0.1:1").unwrap();
        let reply = host.receive_command(obj, "look").unwrap();
        assert_eq!(reply, b"look\n");
    }

    #[test]
    fn echo_host_approves_snoop_and_exec() {
        let mut host = EchoHost::new();
        assert!(host.valid_snoop(1, 2));
        assert!(host.valid_exec("shell", "new", "old"));
    }
}
