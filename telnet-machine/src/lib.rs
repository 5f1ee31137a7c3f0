//! Byte-level TELNET decoding: IAC escapes, option negotiation,
//! subnegotiation, and the echo/charmode bit field, over a fixed-size
//! per-session input buffer.
//!
//! This crate never touches a socket — it only transforms the bytes it's
//! handed. The caller (the scheduler crate) owns reading from the network,
//! feeding bytes into a [`buffer::SessionBuffer`], and driving
//! [`machine::TelnetMachine::process`] over it each pass.
//!
//! - [`protocol`]: IAC, the command/option enums, and wire serialization
//!   (RFC 854, RFC 855).
//! - [`buffer`]: the raw/cooked cursor buffer each session owns.
//! - [`machine`]: the twelve-state decoder itself.
//! - [`negotiation`]: the echo/charmode bit field and default option-reply
//!   table.
//! - [`options`]: codecs for the subnegotiation-bearing options the host
//!   handles directly (NAWS, terminal type).

pub mod buffer;
pub mod machine;
pub mod negotiation;
pub mod options;
pub mod protocol;

pub use buffer::SessionBuffer;
pub use machine::{DataStreamState, MachineContext, MachineEvent, TelnetMachine, TelnetState};
pub use negotiation::{NegotiationOutcome, Negotiator, NoEcho};
pub use protocol::{TelnetCommand, TelnetOption, TelnetSequence, IAC};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_terminated_command_reaches_ready() {
        let mut machine = TelnetMachine::new();
        let mut buf = SessionBuffer::new(256);
        let bytes = b"look\r\n";
        buf.raw_mut()[0..bytes.len()].copy_from_slice(bytes);
        buf.advance_text_end(bytes.len());
        let ctx = MachineContext::default();
        machine.process(&mut buf, &ctx);
        assert_eq!(machine.state(), TelnetState::Ready);
        assert_eq!(buf.cooked(), b"look\n");
    }

    #[test]
    fn negotiator_and_machine_agree_on_echo_option_byte() {
        assert_eq!(TelnetOption::ECHO.to_byte(), 1);
        let mut negotiator = Negotiator::new();
        negotiator.set_desired(true, false);
        let outcome = negotiator.on_negotiate(TelnetCommand::DO, 1, TelnetOption::from_byte(1));
        assert_eq!(
            outcome,
            NegotiationOutcome::Reply(vec![IAC, TelnetCommand::WILL as u8, 1])
        );
    }
}
