//! Telnet protocol constants and types
//!
//! Implements the byte-level vocabulary from:
//! - **RFC 854**: Telnet Protocol Specification
//! - **RFC 855**: Telnet Option Specifications
//!
//! IAC (byte 255) marks the start of a command sequence; a literal data byte
//! of 255 must be escaped as two consecutive IAC bytes. Negotiation commands
//! (`WILL`/`WONT`/`DO`/`DONT`) are always followed by an option byte;
//! subnegotiation (`SB ... SE`) carries option-specific parameters.

/// IAC - Interpret As Command (RFC 854, Section 4)
pub const IAC: u8 = 255;

/// Telnet commands that follow an IAC byte (RFC 854, Section 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TelnetCommand {
    /// End of subnegotiation parameters.
    SE = 240,
    /// No operation.
    NOP = 241,
    /// Data Mark: marks the end of a Synch'd urgent-data region.
    DM = 242,
    /// Break.
    BRK = 243,
    /// Interrupt Process.
    IP = 244,
    /// Abort Output.
    AO = 245,
    /// Are You There.
    AYT = 246,
    /// Erase Character.
    EC = 247,
    /// Erase Line.
    EL = 248,
    /// Go Ahead.
    GA = 249,
    /// Subnegotiation Begin.
    SB = 250,
    /// Sender wants to enable an option.
    WILL = 251,
    /// Sender refuses or wants to disable an option.
    WONT = 252,
    /// Sender wants the receiver to enable an option.
    DO = 253,
    /// Sender wants the receiver to disable an option.
    DONT = 254,
}

impl TelnetCommand {
    /// Convert a byte to a `TelnetCommand` if it names a known command.
    ///
    /// ```
    /// use telnet_machine::protocol::TelnetCommand;
    ///
    /// assert_eq!(TelnetCommand::from_byte(251), Some(TelnetCommand::WILL));
    /// assert_eq!(TelnetCommand::from_byte(100), None);
    /// ```
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            240 => Some(TelnetCommand::SE),
            241 => Some(TelnetCommand::NOP),
            242 => Some(TelnetCommand::DM),
            243 => Some(TelnetCommand::BRK),
            244 => Some(TelnetCommand::IP),
            245 => Some(TelnetCommand::AO),
            246 => Some(TelnetCommand::AYT),
            247 => Some(TelnetCommand::EC),
            248 => Some(TelnetCommand::EL),
            249 => Some(TelnetCommand::GA),
            250 => Some(TelnetCommand::SB),
            251 => Some(TelnetCommand::WILL),
            252 => Some(TelnetCommand::WONT),
            253 => Some(TelnetCommand::DO),
            254 => Some(TelnetCommand::DONT),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// True for WILL/WONT/DO/DONT, the four option-negotiation commands.
    pub fn is_negotiation_command(self) -> bool {
        matches!(
            self,
            TelnetCommand::WILL | TelnetCommand::WONT | TelnetCommand::DO | TelnetCommand::DONT
        )
    }

    /// True for commands that must be followed by an option byte.
    pub fn requires_option(self) -> bool {
        matches!(
            self,
            TelnetCommand::WILL
                | TelnetCommand::WONT
                | TelnetCommand::DO
                | TelnetCommand::DONT
                | TelnetCommand::SB
        )
    }
}

/// Telnet options this server understands, RFC-numbered where applicable.
///
/// This is the option table a connection's negotiation defaults (see
/// `negotiation.rs`) dispatch on. Options outside this set are always
/// refused: unsolicited `WILL`/`DO` gets `DONT`/`WONT` back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(non_camel_case_types)]
pub enum TelnetOption {
    /// Binary Transmission (RFC 856).
    BINARY = 0,
    /// Echo (RFC 857): which side echoes typed characters.
    ECHO = 1,
    /// Suppress Go Ahead (RFC 858); paired with charmode.
    SUPPRESS_GO_AHEAD = 3,
    /// Status (RFC 859).
    STATUS = 5,
    /// Timing Mark (RFC 860).
    TIMING_MARK = 6,
    /// Terminal Type (RFC 1091).
    TERMINAL_TYPE = 24,
    /// End of Record (RFC 885).
    END_OF_RECORD = 25,
    /// Negotiate About Window Size (RFC 1073).
    NAWS = 31,
    /// Terminal Speed (RFC 1079).
    TERMINAL_SPEED = 32,
    /// Linemode (RFC 1184).
    LINEMODE = 34,
    /// X Display Location (RFC 1096).
    X_DISPLAY_LOCATION = 35,
    /// Environment Option, obsoleted by NEW_ENVIRON (RFC 1408).
    OLD_ENVIRON = 36,
    /// New Environment (RFC 1571).
    NEW_ENVIRON = 39,
}

impl TelnetOption {
    /// Convert a byte to a `TelnetOption` if it names an option this server
    /// has a defined reply for. Unknown bytes are refused generically by the
    /// caller; they never reach this enum.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(TelnetOption::BINARY),
            1 => Some(TelnetOption::ECHO),
            3 => Some(TelnetOption::SUPPRESS_GO_AHEAD),
            5 => Some(TelnetOption::STATUS),
            6 => Some(TelnetOption::TIMING_MARK),
            24 => Some(TelnetOption::TERMINAL_TYPE),
            25 => Some(TelnetOption::END_OF_RECORD),
            31 => Some(TelnetOption::NAWS),
            32 => Some(TelnetOption::TERMINAL_SPEED),
            34 => Some(TelnetOption::LINEMODE),
            35 => Some(TelnetOption::X_DISPLAY_LOCATION),
            36 => Some(TelnetOption::OLD_ENVIRON),
            39 => Some(TelnetOption::NEW_ENVIRON),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// True for options in the "delegate to the host" set named in the
    /// negotiation defaults: everything with RFC-driven subnegotiation
    /// content that this crate doesn't interpret itself.
    pub fn is_host_delegated(self) -> bool {
        matches!(
            self,
            TelnetOption::NEW_ENVIRON
                | TelnetOption::OLD_ENVIRON
                | TelnetOption::X_DISPLAY_LOCATION
                | TelnetOption::LINEMODE
                | TelnetOption::NAWS
                | TelnetOption::TERMINAL_TYPE
                | TelnetOption::TERMINAL_SPEED
                | TelnetOption::END_OF_RECORD
        )
    }

    pub fn rfc_number(self) -> Option<u16> {
        match self {
            TelnetOption::BINARY => Some(856),
            TelnetOption::ECHO => Some(857),
            TelnetOption::SUPPRESS_GO_AHEAD => Some(858),
            TelnetOption::STATUS => Some(859),
            TelnetOption::TIMING_MARK => Some(860),
            TelnetOption::TERMINAL_TYPE => Some(1091),
            TelnetOption::END_OF_RECORD => Some(885),
            TelnetOption::NAWS => Some(1073),
            TelnetOption::TERMINAL_SPEED => Some(1079),
            TelnetOption::LINEMODE => Some(1184),
            TelnetOption::X_DISPLAY_LOCATION => Some(1096),
            TelnetOption::NEW_ENVIRON => Some(1571),
            TelnetOption::OLD_ENVIRON => Some(1408),
        }
    }
}

/// A complete, self-contained telnet command sequence, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetSequence {
    /// A bare command with no option byte (e.g. `IAC NOP`).
    Command(TelnetCommand),
    /// Option negotiation (e.g. `IAC WILL ECHO`).
    Negotiation {
        command: TelnetCommand,
        option: TelnetOption,
    },
    /// `IAC SB <option> <data> IAC SE`.
    SubNegotiation { option: TelnetOption, data: Vec<u8> },
}

impl TelnetSequence {
    /// Serialize to the wire bytes a peer expects.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            TelnetSequence::Command(cmd) => vec![IAC, cmd.to_byte()],
            TelnetSequence::Negotiation { command, option } => {
                vec![IAC, command.to_byte(), option.to_byte()]
            }
            TelnetSequence::SubNegotiation { option, data } => {
                let mut bytes = Vec::with_capacity(data.len() + 5);
                bytes.push(IAC);
                bytes.push(TelnetCommand::SB.to_byte());
                bytes.push(option.to_byte());
                for &b in data {
                    bytes.push(b);
                    if b == IAC {
                        bytes.push(IAC);
                    }
                }
                bytes.push(IAC);
                bytes.push(TelnetCommand::SE.to_byte());
                bytes
            }
        }
    }
}

/// Double every 255 byte in `data`, per IAC-quoting rules for outbound text.
pub fn quote_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iac_constant() {
        assert_eq!(IAC, 255);
        assert_eq!(IAC, 0xFF);
    }

    #[test]
    fn command_byte_conversion() {
        assert_eq!(TelnetCommand::from_byte(251), Some(TelnetCommand::WILL));
        assert_eq!(TelnetCommand::from_byte(252), Some(TelnetCommand::WONT));
        assert_eq!(TelnetCommand::from_byte(253), Some(TelnetCommand::DO));
        assert_eq!(TelnetCommand::from_byte(254), Some(TelnetCommand::DONT));
        assert_eq!(TelnetCommand::from_byte(100), None);
    }

    #[test]
    fn option_byte_conversion() {
        assert_eq!(TelnetOption::from_byte(1), Some(TelnetOption::ECHO));
        assert_eq!(
            TelnetOption::from_byte(24),
            Some(TelnetOption::TERMINAL_TYPE)
        );
        assert_eq!(TelnetOption::from_byte(99), None);
    }

    #[test]
    fn negotiation_commands() {
        assert!(TelnetCommand::WILL.is_negotiation_command());
        assert!(!TelnetCommand::NOP.is_negotiation_command());
    }

    #[test]
    fn host_delegated_options() {
        assert!(TelnetOption::NAWS.is_host_delegated());
        assert!(TelnetOption::TERMINAL_TYPE.is_host_delegated());
        assert!(!TelnetOption::ECHO.is_host_delegated());
        assert!(!TelnetOption::SUPPRESS_GO_AHEAD.is_host_delegated());
    }

    #[test]
    fn sequence_serialization() {
        let cmd = TelnetSequence::Command(TelnetCommand::NOP);
        assert_eq!(cmd.to_bytes(), vec![255, 241]);

        let neg = TelnetSequence::Negotiation {
            command: TelnetCommand::WILL,
            option: TelnetOption::ECHO,
        };
        assert_eq!(neg.to_bytes(), vec![255, 251, 1]);

        let sub = TelnetSequence::SubNegotiation {
            option: TelnetOption::TERMINAL_TYPE,
            data: vec![1, b'A', b'N', b'S', b'I'],
        };
        assert_eq!(
            sub.to_bytes(),
            vec![255, 250, 24, 1, 65, 78, 83, 73, 255, 240]
        );
    }

    #[test]
    fn subnegotiation_escapes_embedded_iac() {
        let sub = TelnetSequence::SubNegotiation {
            option: TelnetOption::NAWS,
            data: vec![0, 255, 0, 24],
        };
        assert_eq!(sub.to_bytes(), vec![255, 250, 31, 0, 255, 255, 0, 24, 255, 240]);
    }

    #[test]
    fn quote_iac_doubles_255() {
        assert_eq!(quote_iac(&[1, 255, 2]), vec![1, 255, 255, 2]);
        assert_eq!(quote_iac(&[1, 2, 3]), vec![1, 2, 3]);
    }
}
