//! The per-session telnet decoder state machine.
//!
//! Each state is a tagged variant; each transition is a pure function of
//! `(state, byte)` that either advances the buffer cursors, emits an event
//! for the caller to act on, or both. The machine never blocks and never
//! looks at the socket directly — it only ever sees bytes already sitting in
//! a [`SessionBuffer`].

use crate::buffer::SessionBuffer;
use crate::protocol::{TelnetCommand, TelnetOption, IAC};

/// Telnet decoder state. `READY` is the terminal state for one command: it
/// persists until the caller acknowledges the command with
/// [`TelnetMachine::accept_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetState {
    Data,
    Iac,
    Will,
    Wont,
    Do,
    Dont,
    Sb,
    SbIac,
    Ready,
    Cr,
    Synch,
    Invalid,
}

/// Data-stream state, distinct from the protocol state: set to `Synch` by an
/// out-of-band (urgent) signal, independent of where in a command sequence
/// the machine currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStreamState {
    Data,
    Synch,
}

/// Per-call parameters that belong to the negotiation layer, not the
/// machine: whether charmode is currently active, which bytes combine into
/// a single charmode delivery, and whether a bang-escape redirect is on top
/// of the input-redirect stack.
#[derive(Debug, Clone)]
pub struct MachineContext {
    pub charmode: bool,
    pub combinable: [bool; 256],
    pub bang_escape_active: bool,
}

impl Default for MachineContext {
    fn default() -> Self {
        let mut combinable = [false; 256];
        for b in 0x20u16..0x7f {
            combinable[b as usize] = true;
        }
        // \n and \0 are never combinable, even if a caller sets them.
        combinable[b'\n' as usize] = false;
        combinable[0] = false;
        MachineContext {
            charmode: false,
            combinable,
            bang_escape_active: false,
        }
    }
}

/// Something the machine noticed that the caller (session/negotiation
/// layer) must act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachineEvent {
    /// `IAC WILL/WONT/DO/DONT <option>`; `option` is `None` for an option
    /// byte this crate doesn't recognize (still refused generically).
    Negotiate {
        verb: TelnetCommand,
        option_byte: u8,
        option: Option<TelnetOption>,
    },
    /// A complete `IAC SB <option> ... IAC SE` sequence.
    SubNegotiation {
        option_byte: u8,
        option: Option<TelnetOption>,
        data: Vec<u8>,
    },
    /// A bare command with no option byte (NOP, AYT, BRK, IP, AO, EC, EL,
    /// GA) other than DM, which is handled internally for Synch.
    Command(TelnetCommand),
    /// A byte following IAC that isn't a recognized command.
    UnknownCommand(u8),
    /// Rubout/backspace emitted in charmode with a bang-escape redirect on
    /// top of the stack: the caller must echo `\b \b` to the peer.
    EmitRubout,
    /// Overflow: cooked buffer filled without a line terminator. The
    /// partial command is still available via `cooked()`; charmode does not
    /// reset `command_end` (ordering must be preserved), linemode does.
    LineOverflow,
    /// Subnegotiation payload exceeded the buffer; discarded.
    SubNegotiationOverflow,
    /// An invariant was violated badly enough that the session must be
    /// force-closed after a fixed apology message.
    Invalid(&'static str),
}

/// Drives one session's byte-level telnet decoding.
#[derive(Debug)]
pub struct TelnetMachine {
    state: TelnetState,
    saved_state: TelnetState,
    data_stream: DataStreamState,
    pending_option_byte: u8,
}

impl Default for TelnetMachine {
    fn default() -> Self {
        TelnetMachine {
            state: TelnetState::Data,
            saved_state: TelnetState::Data,
            data_stream: DataStreamState::Data,
            pending_option_byte: 0,
        }
    }
}

impl TelnetMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TelnetState {
        self.state
    }

    pub fn data_stream(&self) -> DataStreamState {
        self.data_stream
    }

    /// Called by the scheduler when OS-level urgent (OOB) data is signalled
    /// for this session. If the protocol state is one from which discarding
    /// until Data-Mark makes sense, it is forced into `Synch` as well.
    pub fn signal_urgent(&mut self) {
        self.data_stream = DataStreamState::Synch;
        if matches!(
            self.state,
            TelnetState::Data | TelnetState::Cr | TelnetState::Ready
        ) {
            self.state = TelnetState::Synch;
        }
    }

    /// Acknowledge the command currently sitting in `READY`: consume it from
    /// the buffer and resume decoding from `tn_end`.
    pub fn accept_command(&mut self, buf: &mut SessionBuffer) {
        debug_assert_eq!(self.state, TelnetState::Ready);
        buf.consume_command();
        self.state = TelnetState::Data;
    }

    /// Decode as much of `buf`'s unconsumed raw bytes (`[tn_end, text_end)`)
    /// as possible, stopping at `READY`, at a hard invariant violation, or
    /// when input is exhausted. Returns the events the caller must act on,
    /// in order.
    pub fn process(&mut self, buf: &mut SessionBuffer, ctx: &MachineContext) -> Vec<MachineEvent> {
        let mut events = Vec::new();
        loop {
            if self.state == TelnetState::Ready || self.state == TelnetState::Invalid {
                break;
            }
            if buf.tn_end >= buf.text_end {
                break;
            }
            let byte = buf.raw()[buf.tn_end];
            buf.tn_end += 1;
            self.step(buf, byte, ctx, &mut events);
            if buf.check_invariants().is_err() {
                self.state = TelnetState::Invalid;
                events.push(MachineEvent::Invalid("cursor invariant violated"));
                break;
            }
        }
        events
    }

    fn resume_data_state(&mut self) -> TelnetState {
        match self.data_stream {
            DataStreamState::Synch => TelnetState::Synch,
            DataStreamState::Data => TelnetState::Data,
        }
    }

    fn step(
        &mut self,
        buf: &mut SessionBuffer,
        byte: u8,
        ctx: &MachineContext,
        events: &mut Vec<MachineEvent>,
    ) {
        match self.state {
            TelnetState::Data => self.step_data(buf, byte, ctx, events),
            TelnetState::Cr => self.step_cr(buf, byte, events),
            TelnetState::Iac => self.step_iac(buf, byte, events),
            TelnetState::Will => self.finish_negotiation(TelnetCommand::WILL, byte, events),
            TelnetState::Wont => self.finish_negotiation(TelnetCommand::WONT, byte, events),
            TelnetState::Do => self.finish_negotiation(TelnetCommand::DO, byte, events),
            TelnetState::Dont => self.finish_negotiation(TelnetCommand::DONT, byte, events),
            TelnetState::Sb => self.step_sb(buf, byte, events),
            TelnetState::SbIac => self.step_sb_iac(buf, byte, events),
            TelnetState::Synch => self.step_synch(byte),
            TelnetState::Ready | TelnetState::Invalid => {}
        }
    }

    fn step_data(
        &mut self,
        buf: &mut SessionBuffer,
        byte: u8,
        ctx: &MachineContext,
        events: &mut Vec<MachineEvent>,
    ) {
        match byte {
            IAC => self.state = TelnetState::Iac,
            b'\r' => {
                let next = if buf.tn_end < buf.text_end {
                    Some(buf.raw()[buf.tn_end])
                } else {
                    None
                };
                if let Some(next) = next {
                    if next == b'\n' {
                        buf.tn_end += 1;
                        buf.push_cooked(b'\n');
                        self.state = TelnetState::Ready;
                    } else if next == 0 {
                        buf.tn_end += 1;
                        buf.push_cooked(b'\n');
                        buf.push_cooked(0);
                        self.state = TelnetState::Ready;
                    } else {
                        // Bare CR from a broken client: terminate the line
                        // here, reprocess `next` as the start of the
                        // following command.
                        buf.push_cooked(b'\n');
                        self.state = TelnetState::Ready;
                    }
                } else {
                    buf.gobble = Some(b'\n');
                    self.state = TelnetState::Cr;
                }
            }
            b'\n' => {
                buf.gobble = Some(b'\r');
                buf.push_cooked(b'\n');
                self.state = TelnetState::Ready;
            }
            b'\x08' | 0x7f => {
                if ctx.charmode {
                    if ctx.bang_escape_active {
                        events.push(MachineEvent::EmitRubout);
                    } else {
                        buf.push_cooked(byte);
                    }
                } else if !buf.erase_last_cooked() {
                    // Nothing to erase; drop silently.
                }
            }
            0 => {
                // NUL is silently dropped outside of the CR-NUL pairing
                // above.
            }
            other => {
                if !buf.push_cooked(other) {
                    events.push(MachineEvent::LineOverflow);
                    if ctx.charmode {
                        // Charmode must preserve delivery order; leave
                        // command_end where it is and let the caller drain
                        // the partial command before more bytes arrive.
                        self.state = TelnetState::Ready;
                    } else {
                        buf.reset_after_overflow();
                    }
                    return;
                }
                if ctx.charmode && !ctx.combinable[other as usize] {
                    self.state = TelnetState::Ready;
                }
            }
        }
    }

    fn step_cr(&mut self, buf: &mut SessionBuffer, byte: u8, events: &mut Vec<MachineEvent>) {
        // We already emitted the line terminator when the CR was seen; this
        // byte either completes a split CR-LF/CR-NUL pair (and is gobbled)
        // or begins the next command.
        if Some(byte) == buf.gobble && (byte == b'\n' || byte == 0) {
            buf.gobble = None;
            self.state = TelnetState::Ready;
            return;
        }
        buf.gobble = None;
        self.state = TelnetState::Ready;
        // Re-inject the byte: back up tn_end so the next process() call
        // (after the caller accepts this command) sees it first.
        buf.tn_end -= 1;
        let _ = events;
    }

    fn step_iac(&mut self, buf: &mut SessionBuffer, byte: u8, events: &mut Vec<MachineEvent>) {
        if byte == IAC {
            buf.push_cooked(IAC);
            self.state = self.resume_data_state();
            return;
        }
        match TelnetCommand::from_byte(byte) {
            Some(TelnetCommand::WILL) => self.state = TelnetState::Will,
            Some(TelnetCommand::WONT) => self.state = TelnetState::Wont,
            Some(TelnetCommand::DO) => self.state = TelnetState::Do,
            Some(TelnetCommand::DONT) => self.state = TelnetState::Dont,
            Some(TelnetCommand::SB) => {
                buf.tn_start = buf.tn_end;
                self.state = TelnetState::Sb;
            }
            Some(TelnetCommand::DM) => {
                if self.data_stream == DataStreamState::Synch {
                    self.data_stream = DataStreamState::Data;
                }
                self.state = self.resume_data_state();
                events.push(MachineEvent::Command(TelnetCommand::DM));
            }
            Some(cmd) => {
                events.push(MachineEvent::Command(cmd));
                self.state = self.resume_data_state();
            }
            None => {
                events.push(MachineEvent::UnknownCommand(byte));
                self.state = self.resume_data_state();
            }
        }
    }

    fn finish_negotiation(
        &mut self,
        verb: TelnetCommand,
        option_byte: u8,
        events: &mut Vec<MachineEvent>,
    ) {
        events.push(MachineEvent::Negotiate {
            verb,
            option_byte,
            option: TelnetOption::from_byte(option_byte),
        });
        self.state = self.resume_data_state();
    }

    fn step_sb(&mut self, buf: &mut SessionBuffer, byte: u8, events: &mut Vec<MachineEvent>) {
        if byte == IAC {
            self.state = TelnetState::SbIac;
            return;
        }
        if buf.tn_end - buf.tn_start > buf.capacity() {
            events.push(MachineEvent::SubNegotiationOverflow);
            self.state = TelnetState::Data;
        }
    }

    fn step_sb_iac(&mut self, buf: &mut SessionBuffer, byte: u8, events: &mut Vec<MachineEvent>) {
        if byte == IAC {
            // Literal 255 inside subnegotiation data; stays part of the
            // window, back to SB.
            self.state = TelnetState::Sb;
            return;
        }
        if byte == TelnetCommand::SE as u8 || byte == TelnetCommand::SB as u8 {
            let window = &buf.raw()[buf.tn_start..buf.tn_end - 2];
            if window.is_empty() {
                self.state = TelnetState::Data;
                self.pending_option_byte = 0;
                return;
            }
            let option_byte = window[0];
            let mut data = Vec::with_capacity(window.len().saturating_sub(1));
            let mut i = 1;
            while i < window.len() {
                data.push(window[i]);
                if window[i] == IAC && i + 1 < window.len() && window[i + 1] == IAC {
                    i += 1;
                }
                i += 1;
            }
            events.push(MachineEvent::SubNegotiation {
                option_byte,
                option: TelnetOption::from_byte(option_byte),
                data,
            });
            buf.discard_subnegotiation();
            self.state = if byte == TelnetCommand::SB as u8 {
                buf.tn_start = buf.tn_end;
                TelnetState::Sb
            } else {
                self.resume_data_state()
            };
        } else {
            // Malformed: an IAC inside SB followed by neither IAC, SE, nor
            // SB. Treat as an implicit SE with garbage trailing command.
            self.state = TelnetState::Data;
        }
    }

    fn step_synch(&mut self, byte: u8) {
        if byte == IAC {
            self.state = TelnetState::Iac;
        }
        // Otherwise: discard, stay in Synch.
    }
}
