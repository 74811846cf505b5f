//! Error types of the session peer.
//!
//! Errors are split by where they can occur:
//! - [`ConstructError`]: opening, binding and registering the socket pair.
//!   Fatal to construction, nothing acquired survives.
//! - [`DispatchError`]: handling one received command. Always recoverable, the
//!   datagram is dropped and the session state is left untouched.
//! - [`SessionError`]: local operations such as sending an invitation.

use core::{fmt, net::SocketAddr};
use std::io;

use crate::{SessionState, SocketRole};
use rtpmidi_proto::command::CommandCode;

/// Failure to construct a [`Peer`](crate::Peer).
#[derive(Debug)]
pub enum ConstructError {
    /// A socket could not be created, usually because the process ran out of
    /// file descriptors or buffers.
    ResourceExhaustion { socket: SocketRole, source: io::Error },
    /// A socket could not be bound to its port.
    AddressInUse {
        socket: SocketRole,
        addr: SocketAddr,
        source: io::Error,
    },
    /// The requested base port leaves no room for the data port.
    InvalidPort(u16),
    /// The readiness notifier refused to watch a socket.
    Registration { socket: SocketRole, source: io::Error },
    /// The peer name can not be sent in a handshake.
    InvalidName(rtpmidi_proto::Error),
}

impl fmt::Display for ConstructError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceExhaustion { socket, source } => {
                write!(f, "can not open {socket} socket, out of sockets? ({source})")
            }
            Self::AddressInUse {
                socket,
                addr,
                source,
            } => write!(f, "can not bind {socket} socket to {addr}, address in use? ({source})"),
            Self::InvalidPort(port) => write!(f, "base port {port} leaves no room for a data port"),
            Self::Registration { socket, source } => {
                write!(f, "can not register {socket} socket for readiness ({source})")
            }
            Self::InvalidName(e) => write!(f, "unusable peer name: {e}"),
        }
    }
}

impl std::error::Error for ConstructError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ResourceExhaustion { source, .. }
            | Self::AddressInUse { source, .. }
            | Self::Registration { source, .. } => Some(source),
            Self::InvalidName(e) => Some(e),
            Self::InvalidPort(_) => None,
        }
    }
}

/// Why a received command was dropped.
#[derive(Debug)]
pub enum DispatchError {
    /// The command is shorter than its fields require, or a field is invalid.
    MalformedPacket(rtpmidi_proto::Error),
    /// The command code is not handled by this peer.
    NotImplemented(u16),
    /// A precondition guaranteed by framing did not hold. Never caused by
    /// external input, only by a logic error in the caller.
    InternalInvariantViolation(&'static str),
    /// The remote speaks another protocol version.
    UnsupportedProtocol(u32),
    /// The command answers an invitation this peer never sent.
    InitiatorMismatch { expected: u32, got: u32 },
    /// The command comes from another source than the established remote.
    SsrcMismatch { expected: u32, got: u32 },
    /// The command is valid, but not in the current session state.
    UnexpectedCommand {
        command: CommandCode,
        socket: SocketRole,
        state: SessionState,
    },
    /// Sending the reply failed.
    Io(io::Error),
}

impl DispatchError {
    /// Returns `true` if the error stems from the received bytes themselves,
    /// as opposed to the session state or the local host.
    #[inline]
    pub fn is_malformed(&self) -> bool {
        matches!(self, Self::MalformedPacket(_))
    }
}

impl From<rtpmidi_proto::Error> for DispatchError {
    #[inline]
    fn from(e: rtpmidi_proto::Error) -> Self {
        match e {
            rtpmidi_proto::Error::UnknownCommand(code) => Self::NotImplemented(code),
            e => Self::MalformedPacket(e),
        }
    }
}

impl From<io::Error> for DispatchError {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPacket(e) => write!(f, "malformed packet: {e}"),
            Self::NotImplemented(code) => write!(f, "command 0x{code:04X} not implemented"),
            Self::InternalInvariantViolation(what) => write!(f, "internal invariant violated: {what}"),
            Self::UnsupportedProtocol(v) => write!(f, "unsupported protocol version {v}"),
            Self::InitiatorMismatch { expected, got } => {
                write!(f, "initiator id {got:08X} does not match ours ({expected:08X})")
            }
            Self::SsrcMismatch { expected, got } => {
                write!(f, "SSRC {got:08X} does not match the remote's ({expected:08X})")
            }
            Self::UnexpectedCommand {
                command,
                socket,
                state,
            } => write!(f, "unexpected {command} on {socket} socket while {state}"),
            Self::Io(e) => write!(f, "can not send reply: {e}"),
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::MalformedPacket(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// Failure of a local session operation.
#[derive(Debug)]
pub enum SessionError {
    /// The operation is not allowed in the current state.
    InvalidState(SessionState),
    /// The command could not be encoded.
    Encode(rtpmidi_proto::Error),
    /// The socket refused to send.
    Io(io::Error),
}

impl From<io::Error> for SessionError {
    #[inline]
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rtpmidi_proto::Error> for SessionError {
    #[inline]
    fn from(e: rtpmidi_proto::Error) -> Self {
        Self::Encode(e)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(s) => write!(f, "operation not allowed while {s}"),
            Self::Encode(e) => write!(f, "can not encode command: {e}"),
            Self::Io(e) => write!(f, "can not send: {e}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidState(_) => None,
            Self::Encode(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}
