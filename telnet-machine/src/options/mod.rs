//! Codecs for the host-delegated subnegotiation options.
//!
//! These options don't get a default automatic reply (see
//! [`crate::negotiation::NegotiationOutcome::Delegate`]) — the host decides
//! whether and how to answer. What this module provides is just the wire
//! encode/decode so the host doesn't have to hand-parse subnegotiation
//! payloads.

pub mod naws;
pub mod terminal_type;

pub use naws::{decode_window_size, encode_window_size, WindowSize};
pub use terminal_type::{decode_terminal_type, encode_terminal_type_is, TerminalTypeCommand};
