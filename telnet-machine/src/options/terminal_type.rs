//! Terminal Type option (RFC 1091).
//!
//! ```text
//! IAC SB TERMINAL_TYPE SEND IAC SE      -- server asks
//! IAC SB TERMINAL_TYPE IS <name> IAC SE -- client answers
//! ```
//!
//! A client that supports the cycling convention (most do) sends a
//! different name each time it's asked again, until it repeats one already
//! sent; this crate only decodes/encodes one exchange at a time and leaves
//! the cycling loop to the host.

/// The subnegotiation command byte that precedes the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalTypeCommand {
    /// Ask the peer to send its terminal type (byte 0).
    Send,
    /// The peer's answer, carrying the type string (byte 1).
    Is,
}

/// Decode a `TERMINAL_TYPE` subnegotiation payload into its command and, for
/// `IS`, the terminal type string.
pub fn decode_terminal_type(data: &[u8]) -> Option<(TerminalTypeCommand, Option<String>)> {
    match data.first() {
        Some(0) if data.len() == 1 => Some((TerminalTypeCommand::Send, None)),
        Some(1) => {
            let name = String::from_utf8_lossy(&data[1..]).into_owned();
            Some((TerminalTypeCommand::Is, Some(name)))
        }
        _ => None,
    }
}

/// Encode a client's `IS <name>` answer.
pub fn encode_terminal_type_is(name: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(name.len() + 1);
    out.push(1);
    out.extend_from_slice(name.to_uppercase().as_bytes());
    out
}
