#![no_std]
//! Wire-level definitions of the AppleMIDI session protocol.
//!
//! RTP-MIDI endpoints talk over a pair of UDP ports: a **control** port used to
//! negotiate sessions and a **data** port (control port + 1) carrying MIDI
//! payload. Both ports may also receive session commands.
//!
//! ## Framing
//!
//! Every datagram is either a session **command** or an opaque **payload**. A
//! command is recognized solely by its shape: it is at least
//! [`MIN_COMMAND_LEN`] bytes long and starts with the two byte
//! [`COMMAND_SIGNATURE`]. See [`is_command`].
//!
//! ## Commands
//!
//! After the signature comes a 16-bit command code and a command specific,
//! big-endian body. The [`command`] module provides typed representations of
//! all commands along with their decoders and encoders.
//!
//! Decoding goes through [`ParseBuffer`], a bounds-checked read cursor: no
//! field accessor ever panics on short input, it reports
//! [`Error::OutOfBounds`] instead.
//!
//! The types in this crate implement `serde`'s `Serialize` and `Deserialize`
//! traits so they can be logged or forwarded through other `serde` backends.

extern crate alloc;

pub mod command;
mod cursor;

pub use cursor::ParseBuffer;

use core::fmt;

/// Marker opening every session command.
pub const COMMAND_SIGNATURE: [u8; 2] = [0xFF, 0xFF];

/// No datagram shorter than this is ever considered a command.
pub const MIN_COMMAND_LEN: usize = 16;

/// Largest datagram sent or received by a session peer.
pub const MAX_DATAGRAM_SIZE: usize = 1500;

/// The only AppleMIDI protocol version in existence.
pub const PROTOCOL_VERSION: u32 = 2;

/// Returns `true` if `buffer` must be handled as a session command.
///
/// This only inspects the raw bytes. Any datagram failing this check is
/// payload and must be forwarded untouched.
#[inline(always)]
pub fn is_command(buffer: &[u8]) -> bool {
    buffer.len() >= MIN_COMMAND_LEN && buffer.starts_with(&COMMAND_SIGNATURE)
}

/// The error type for decoding and encoding session commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// A read went past the end of the buffer, or a string had no terminator.
    OutOfBounds,
    /// The datagram does not start with [`COMMAND_SIGNATURE`].
    MissingSignature,
    /// The command code is not part of the protocol vocabulary.
    UnknownCommand(u16),
    /// A peer name was not valid UTF-8, or contained an interior NUL.
    InvalidName,
    /// A field held a value the protocol does not allow.
    InvalidField,
    /// The encoded command does not fit in a single datagram.
    Overflow,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfBounds => f.write_str("read past the end of the datagram"),
            Error::MissingSignature => f.write_str("missing command signature"),
            Error::UnknownCommand(code) => write!(f, "unknown command code 0x{code:04X}"),
            Error::InvalidName => f.write_str("invalid peer name"),
            Error::InvalidField => f.write_str("invalid field value"),
            Error::Overflow => f.write_str("command does not fit in a datagram"),
        }
    }
}

impl core::error::Error for Error {}
