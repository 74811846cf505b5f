//! AppleMIDI session peer over UDP.
//!
//! This crate owns the pair of UDP sockets of one session endpoint (control on
//! the base port, data on the next one), recognizes session commands among the
//! received datagrams, drives the session state machine and hands every other
//! datagram to a [`MidiSink`](rtpmidi_utils::MidiSink).
//!
//! ## Scope
//!
//! - Opening the socket pair and registering it with an external readiness
//!   notifier (see [`Poller`]).
//! - Dispatching received commands to their handlers (see [`Peer`]).
//! - Local session operations: inviting a remote, clock synchronization,
//!   sending MIDI payload and ending a session.
//!
//! The crate does not run an event loop itself. The application waits for
//! readiness on the registered descriptors and calls
//! [`Peer::on_ready`] (or [`Peer::control_data_ready`] and
//! [`Peer::midi_data_ready`]) whenever one of them becomes readable.
//!
//! Sockets are identified by raw file descriptors, so this crate only builds on
//! platforms that have them.

mod config;
mod error;
mod peer;
mod poller;

pub use config::PeerConfig;
pub use error::{ConstructError, DispatchError, SessionError};
pub use peer::{CloseReason, Confirmation, Peer, Role, SessionState, Wakeup};
pub use poller::{Poller, Registry};

pub use rtpmidi_proto;
pub use rtpmidi_utils;

use core::fmt;
use serde::{Deserialize, Serialize};

/// Which of the two sockets of a peer something refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SocketRole {
    /// The session control socket, bound to the base port.
    Control,
    /// The MIDI data socket, bound to the base port plus one.
    Midi,
}

impl SocketRole {
    /// Offset of this socket's port from the base port.
    #[inline(always)]
    pub const fn port_offset(self) -> u16 {
        match self {
            Self::Control => 0,
            Self::Midi => 1,
        }
    }
}

impl fmt::Display for SocketRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Control => "control",
            Self::Midi => "MIDI",
        })
    }
}

/// Converts an encoding error into an [`std::io::Error`], for use at the
/// sending boundary.
#[inline(always)]
pub(crate) fn proto_to_io_err(e: rtpmidi_proto::Error) -> std::io::Error {
    match e {
        rtpmidi_proto::Error::Overflow => std::io::ErrorKind::FileTooLarge.into(),
        rtpmidi_proto::Error::OutOfBounds => std::io::ErrorKind::UnexpectedEof.into(),
        _ => std::io::ErrorKind::InvalidInput.into(),
    }
}

/// Returns `true` if the given I/O error kind only means that no datagram is
/// available right now.
#[inline(always)]
pub(crate) fn io_err_is_timeout(e: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    [WouldBlock, TimedOut, Interrupted].contains(&e)
}
