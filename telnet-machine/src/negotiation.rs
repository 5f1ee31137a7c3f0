//! Echo/charmode bit-field and default option-reply table.
//!
//! Unlike full RFC 1143 Q-Method negotiation (with its WANTYES/WANTNO queue
//! states for arbitrary options), this module tracks exactly two features —
//! echo and character-at-a-time input — each as a four-bit group inside one
//! byte, and answers everything else with the simplest rule that doesn't
//! loop: refuse unsolicited options outright, unless the option is one a
//! caller has chosen to delegate to the host.
//!
//! The four bits per feature: `_REQ` (do we currently want this on), a wire
//! state bit (has it actually been negotiated on), `_ACK` (has the peer
//! confirmed it), and `_STALE` (a nested request is pending — used to
//! suppress spurious toggles while an input redirect is active). See the
//! input-redirect stack for how `_STALE` gets used across pops.

use crate::protocol::{TelnetCommand, TelnetOption};

pub const ECHO_REQ: u8 = 0x01;
pub const ECHO_STATE: u8 = 0x02;
pub const ECHO_ACK: u8 = 0x04;
pub const ECHO_STALE: u8 = 0x08;
pub const CHARMODE_REQ: u8 = 0x10;
pub const CHARMODE_STATE: u8 = 0x20;
pub const CHARMODE_ACK: u8 = 0x40;
pub const CHARMODE_STALE: u8 = 0x80;

/// The `noecho` bit field from one session, and the logic that keeps it
/// consistent with what's actually been negotiated on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoEcho(u8);

impl NoEcho {
    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Self {
        NoEcho(bits)
    }

    fn get(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    fn set(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    pub fn echo_req(self) -> bool {
        self.get(ECHO_REQ)
    }
    pub fn echo_state(self) -> bool {
        self.get(ECHO_STATE)
    }
    pub fn echo_ack(self) -> bool {
        self.get(ECHO_ACK)
    }
    pub fn charmode_req(self) -> bool {
        self.get(CHARMODE_REQ)
    }
    pub fn charmode_state(self) -> bool {
        self.get(CHARMODE_STATE)
    }
    pub fn charmode_ack(self) -> bool {
        self.get(CHARMODE_ACK)
    }

    /// Either feature has a nested request pending.
    pub fn is_stale(self) -> bool {
        self.get(ECHO_STALE) || self.get(CHARMODE_STALE)
    }

    pub fn mark_stale(&mut self) {
        self.set(ECHO_STALE, true);
        self.set(CHARMODE_STALE, true);
    }

    pub fn clear_stale(&mut self) {
        self.set(ECHO_STALE, false);
        self.set(CHARMODE_STALE, false);
    }
}

fn wire(verb: TelnetCommand, option: TelnetOption) -> Vec<u8> {
    vec![crate::protocol::IAC, verb.to_byte(), option.to_byte()]
}

fn wire_byte(verb: TelnetCommand, option_byte: u8) -> Vec<u8> {
    vec![crate::protocol::IAC, verb.to_byte(), option_byte]
}

/// What to do with an incoming `WILL`/`WONT`/`DO`/`DONT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationOutcome {
    /// Send these bytes immediately; the negotiator already updated its own
    /// state.
    Reply(Vec<u8>),
    /// No reply needed.
    NoReply,
    /// This option is in the host-delegated set (`NEWENV`, `ENVIRON`,
    /// `XDISPLOC`, `LINEMODE`, `NAWS`, `TTYPE`, `TSPEED`, `EOR`): call the
    /// host's `telnet_neg(verb, option)` callback. If it returns nothing,
    /// the caller must fall back to the generic refusal
    /// (`refuse_unsolicited`).
    Delegate,
}

/// Tracks echo/charmode state for one session and answers negotiation
/// requests against the default table in the protocol description.
#[derive(Debug, Clone, Default)]
pub struct Negotiator {
    noecho: NoEcho,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> NoEcho {
        self.noecho
    }

    pub fn set_flags(&mut self, flags: NoEcho) {
        self.noecho = flags;
    }

    pub fn charmode_active(&self) -> bool {
        self.noecho.charmode_state()
    }

    pub fn echo_active(&self) -> bool {
        self.noecho.echo_state()
    }

    /// Apply the default reply table to an incoming negotiation command.
    pub fn on_negotiate(
        &mut self,
        verb: TelnetCommand,
        option_byte: u8,
        option: Option<TelnetOption>,
    ) -> NegotiationOutcome {
        match (verb, option) {
            (TelnetCommand::DO, Some(TelnetOption::ECHO)) => {
                NegotiationOutcome::Reply(self.handle_do_echo())
            }
            (TelnetCommand::DONT, Some(TelnetOption::ECHO)) => {
                NegotiationOutcome::Reply(self.handle_dont_echo())
            }
            (TelnetCommand::DO, Some(TelnetOption::SUPPRESS_GO_AHEAD)) => {
                NegotiationOutcome::Reply(self.handle_do_sga())
            }
            (TelnetCommand::DONT, Some(TelnetOption::SUPPRESS_GO_AHEAD)) => {
                NegotiationOutcome::Reply(self.handle_dont_sga())
            }
            (TelnetCommand::WILL, Some(TelnetOption::SUPPRESS_GO_AHEAD)) => {
                NegotiationOutcome::Reply(self.handle_will_sga())
            }
            (TelnetCommand::WONT, Some(TelnetOption::SUPPRESS_GO_AHEAD)) => {
                NegotiationOutcome::Reply(self.handle_wont_sga())
            }
            (_, Some(opt)) if opt.is_host_delegated() => NegotiationOutcome::Delegate,
            (TelnetCommand::WILL, _) | (TelnetCommand::DO, _) => {
                NegotiationOutcome::Reply(refuse_unsolicited(verb, option_byte))
            }
            _ => NegotiationOutcome::NoReply,
        }
    }

    fn handle_do_echo(&mut self) -> Vec<u8> {
        if self.noecho.echo_req() {
            if self.noecho.echo_ack() {
                Vec::new()
            } else {
                self.noecho.set(ECHO_ACK, true);
                self.noecho.set(ECHO_STATE, true);
                wire(TelnetCommand::WILL, TelnetOption::ECHO)
            }
        } else {
            wire(TelnetCommand::WONT, TelnetOption::ECHO)
        }
    }

    fn handle_dont_echo(&mut self) -> Vec<u8> {
        if self.noecho.echo_state() {
            self.noecho.set(ECHO_STATE, false);
            self.noecho.set(ECHO_ACK, false);
            wire(TelnetCommand::WONT, TelnetOption::ECHO)
        } else {
            Vec::new()
        }
    }

    fn handle_do_sga(&mut self) -> Vec<u8> {
        wire(TelnetCommand::WILL, TelnetOption::SUPPRESS_GO_AHEAD)
    }

    fn handle_dont_sga(&mut self) -> Vec<u8> {
        wire(TelnetCommand::WONT, TelnetOption::SUPPRESS_GO_AHEAD)
    }

    fn handle_will_sga(&mut self) -> Vec<u8> {
        if self.noecho.charmode_req() {
            self.noecho.set(CHARMODE_STATE, true);
            self.noecho.set(CHARMODE_ACK, true);
            wire(TelnetCommand::DO, TelnetOption::SUPPRESS_GO_AHEAD)
        } else {
            wire(TelnetCommand::DONT, TelnetOption::SUPPRESS_GO_AHEAD)
        }
    }

    fn handle_wont_sga(&mut self) -> Vec<u8> {
        if self.noecho.charmode_ack() {
            self.noecho.set(CHARMODE_ACK, false);
            self.noecho.set(CHARMODE_STATE, false);
            // CHARMODE_REQ deliberately left set: some clients answer
            // WONT SGA reflexively, and the host's actual desire hasn't
            // changed.
            wire(TelnetCommand::DONT, TelnetOption::SUPPRESS_GO_AHEAD)
        } else {
            Vec::new()
        }
    }

    /// Move toward a newly desired (echo, charmode) pair, emitting only the
    /// negotiation commands needed to get there. Computes `old ^ new` over
    /// the `_REQ` bits and reacts to each changed bit independently.
    pub fn set_desired(&mut self, want_echo: bool, want_charmode: bool) -> Vec<u8> {
        let mut out = Vec::new();
        if want_echo != self.noecho.echo_req() {
            self.noecho.set(ECHO_REQ, want_echo);
            if want_echo {
                out.extend(wire(TelnetCommand::WILL, TelnetOption::ECHO));
            } else if self.noecho.echo_ack() {
                self.noecho.set(ECHO_ACK, false);
                self.noecho.set(ECHO_STATE, false);
                out.extend(wire(TelnetCommand::WONT, TelnetOption::ECHO));
            }
        }
        if want_charmode != self.noecho.charmode_req() {
            self.noecho.set(CHARMODE_REQ, want_charmode);
            if want_charmode {
                out.extend(wire(TelnetCommand::DO, TelnetOption::SUPPRESS_GO_AHEAD));
            } else if self.noecho.charmode_ack() {
                out.extend(wire(TelnetCommand::DONT, TelnetOption::SUPPRESS_GO_AHEAD));
            }
        }
        out
    }
}

/// The generic fallback for any option with no special-cased handling and
/// no host delegation: refuse it so negotiation can't loop.
pub fn refuse_unsolicited(verb: TelnetCommand, option_byte: u8) -> Vec<u8> {
    match verb {
        TelnetCommand::WILL => wire_byte(TelnetCommand::DONT, option_byte),
        TelnetCommand::DO => wire_byte(TelnetCommand::WONT, option_byte),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn do_echo_without_request_refuses() {
        let mut neg = Negotiator::new();
        let out = neg.on_negotiate(TelnetCommand::DO, 1, Some(TelnetOption::ECHO));
        assert_eq!(
            out,
            NegotiationOutcome::Reply(vec![crate::protocol::IAC, TelnetCommand::WONT as u8, 1])
        );
    }

    #[test]
    fn do_echo_with_pending_request_acknowledges_once() {
        let mut neg = Negotiator::new();
        neg.set_desired(true, false);
        let out = neg.on_negotiate(TelnetCommand::DO, 1, Some(TelnetOption::ECHO));
        assert_eq!(
            out,
            NegotiationOutcome::Reply(vec![crate::protocol::IAC, TelnetCommand::WILL as u8, 1])
        );
        assert!(neg.echo_active());
        // A second DO ECHO while already acked sends nothing further.
        let out2 = neg.on_negotiate(TelnetCommand::DO, 1, Some(TelnetOption::ECHO));
        assert_eq!(out2, NegotiationOutcome::Reply(Vec::new()));
    }

    #[test]
    fn will_sga_enables_charmode_only_if_requested() {
        let mut neg = Negotiator::new();
        let refused = neg.on_negotiate(
            TelnetCommand::WILL,
            3,
            Some(TelnetOption::SUPPRESS_GO_AHEAD),
        );
        assert_eq!(
            refused,
            NegotiationOutcome::Reply(vec![crate::protocol::IAC, TelnetCommand::DONT as u8, 3])
        );
        assert!(!neg.charmode_active());

        neg.set_desired(false, true);
        let accepted = neg.on_negotiate(
            TelnetCommand::WILL,
            3,
            Some(TelnetOption::SUPPRESS_GO_AHEAD),
        );
        assert_eq!(
            accepted,
            NegotiationOutcome::Reply(vec![crate::protocol::IAC, TelnetCommand::DO as u8, 3])
        );
        assert!(neg.charmode_active());
    }

    #[test]
    fn wont_sga_keeps_request_sticky() {
        let mut neg = Negotiator::new();
        neg.set_desired(false, true);
        neg.on_negotiate(
            TelnetCommand::WILL,
            3,
            Some(TelnetOption::SUPPRESS_GO_AHEAD),
        );
        assert!(neg.charmode_active());

        let out = neg.on_negotiate(
            TelnetCommand::WONT,
            3,
            Some(TelnetOption::SUPPRESS_GO_AHEAD),
        );
        assert_eq!(
            out,
            NegotiationOutcome::Reply(vec![crate::protocol::IAC, TelnetCommand::DONT as u8, 3])
        );
        assert!(!neg.charmode_active());
        assert!(neg.flags().charmode_req());
    }

    #[test]
    fn host_delegated_option_yields_delegate() {
        let mut neg = Negotiator::new();
        let out = neg.on_negotiate(TelnetCommand::WILL, 31, Some(TelnetOption::NAWS));
        assert_eq!(out, NegotiationOutcome::Delegate);
    }

    #[test]
    fn unknown_option_byte_is_refused_generically() {
        let mut neg = Negotiator::new();
        let out = neg.on_negotiate(TelnetCommand::WILL, 77, None);
        assert_eq!(
            out,
            NegotiationOutcome::Reply(vec![crate::protocol::IAC, TelnetCommand::DONT as u8, 77])
        );
    }

    #[test]
    fn stale_bit_round_trips() {
        let mut flags = NoEcho::default();
        assert!(!flags.is_stale());
        flags.mark_stale();
        assert!(flags.is_stale());
        flags.clear_stale();
        assert!(!flags.is_stale());
    }
}
