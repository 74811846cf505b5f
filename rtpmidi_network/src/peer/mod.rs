//! The session peer: socket pair, session state and local operations.
//!
//! Received commands are handled in [`handlers`], this module covers
//! construction, teardown, the wakeup entry points and everything this side
//! initiates.

mod handlers;
mod socket;

use core::{fmt, net::SocketAddr};
use std::{io, net::UdpSocket, os::fd::RawFd};

use replace_with::replace_with_or_abort;
use rtpmidi_proto::{
    MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
    command::{ClockSync, Command, CommandCode, Handshake, Termination},
    is_command,
};
use rtpmidi_utils::{HexDump, MidiSink, SessionClock, ticks_to_duration};
use serde::{Deserialize, Serialize};

use crate::{ConstructError, DispatchError, PeerConfig, Poller, SessionError, SocketRole};
use socket::RegisteredSocket;

pub use handlers::Confirmation;

/// Observable phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Nothing happened yet. The peer accepts invitations and may invite.
    Uninitiated,
    /// An invitation was sent, waiting for the answer.
    Inviting,
    /// Both sides agreed on the session.
    Established,
    /// The session ended. Only payload is still forwarded.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Uninitiated => "uninitiated",
            Self::Inviting => "inviting",
            Self::Established => "established",
            Self::Closed => "closed",
        })
    }
}

/// Which side sent the accepted invitation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CloseReason {
    /// The remote refused our invitation.
    Rejected,
    /// The remote sent `BY`.
    EndedByRemote,
    /// [`Peer::end_session`] was called.
    EndedLocally,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rejected => "invitation rejected",
            Self::EndedByRemote => "ended by remote",
            Self::EndedLocally => "ended locally",
        })
    }
}

/// What a wakeup did with the datagram it received.
#[derive(Debug)]
pub enum Wakeup {
    /// No datagram was available, or it was empty or unreadable.
    Idle,
    /// A command was handled successfully.
    Command(CommandCode),
    /// A payload datagram of the given length was handed to the sink.
    Payload(usize),
    /// The sink refused a payload datagram of the given length.
    PayloadDropped(usize),
    /// A datagram larger than [`MAX_DATAGRAM_SIZE`] was discarded.
    Oversized,
    /// A command was dropped.
    Dropped(DispatchError),
}

/// The other endpoint, as learned from the handshake.
#[derive(Debug, Clone)]
struct Remote {
    /// Control address.
    addr: SocketAddr,
    ssrc: u32,
    name: String,
}

impl Remote {
    /// Address of the remote MIDI socket.
    #[inline]
    fn data_addr(&self) -> Option<SocketAddr> {
        let port = self
            .addr
            .port()
            .checked_add(SocketRole::Midi.port_offset())?;
        Some(SocketAddr::new(self.addr.ip(), port))
    }
}

#[derive(Debug)]
enum Session {
    Uninitiated,
    Inviting {
        initiator_id: u32,
        addr: SocketAddr,
    },
    Established {
        role: Role,
        initiator_id: u32,
        remote: Remote,
        data_port_confirmed: bool,
    },
    Closed {
        reason: CloseReason,
        role: Option<Role>,
        initiator_id: Option<u32>,
        remote: Option<Remote>,
    },
}

impl Session {
    #[inline]
    fn state(&self) -> SessionState {
        match self {
            Self::Uninitiated => SessionState::Uninitiated,
            Self::Inviting { .. } => SessionState::Inviting,
            Self::Established { .. } => SessionState::Established,
            Self::Closed { .. } => SessionState::Closed,
        }
    }

    #[inline]
    fn remote(&self) -> Option<&Remote> {
        match self {
            Self::Established { remote, .. } => Some(remote),
            Self::Closed { remote, .. } => remote.as_ref(),
            _ => None,
        }
    }
}

/// One endpoint of an AppleMIDI session.
///
/// The peer owns a control socket bound to
/// [`local_base_port`](Self::local_base_port) and a MIDI socket bound to the
/// next port. Both are registered with the [`Poller`] given at construction,
/// and deregistered, then closed, when the peer is dropped.
///
/// Whenever the poller reports one of the sockets readable, the application
/// calls [`on_ready`](Self::on_ready) with the matching [`SocketRole`]. Each
/// call reads at most one datagram: commands update the session and may be
/// answered, everything else is handed to the [`MidiSink`] unchanged.
///
/// ```ignore
/// let registry = Registry::new();
/// let (tx, mut rx) = rtpmidi_utils::queue::midi_queue(4096);
/// let mut peer = Peer::new("Studio", 5004, &registry, tx)?;
///
/// // in the event loop
/// for (fd, role) in readable(&registry) {
///     peer.on_ready(role);
/// }
/// ```
#[derive(Debug)]
pub struct Peer<P: Poller, S: MidiSink> {
    name: String,
    local_base_port: u16,
    local_ssrc: u32,
    verify_initiator: bool,
    verify_protocol: bool,
    control: RegisteredSocket<P>,
    midi: RegisteredSocket<P>,
    session: Session,
    clock: SessionClock,
    latency: Option<u64>,
    last_feedback_seq: Option<u16>,
    sink: S,
}

impl<P: Poller + Clone, S: MidiSink> Peer<P, S> {
    /// Opens a peer listening on all interfaces, with default settings.
    ///
    /// See [`with_config`](Self::with_config).
    #[inline]
    pub fn new(
        name: impl Into<String>,
        local_base_port: u16,
        poller: P,
        sink: S,
    ) -> Result<Self, ConstructError> {
        Self::with_config(PeerConfig::new(name, local_base_port), poller, sink)
    }

    /// Opens both sockets, and registers them with `poller`.
    ///
    /// A base port of `0` lets the OS pick a free pair of ports. On failure,
    /// every socket opened so far is deregistered and closed before
    /// returning. A name that does not fit in a handshake is refused before
    /// any socket is opened.
    pub fn with_config(config: PeerConfig, poller: P, sink: S) -> Result<Self, ConstructError> {
        Command::Invitation(Handshake {
            protocol: PROTOCOL_VERSION,
            initiator_id: 0,
            ssrc: 0,
            name: &config.name,
        })
        .to_datagram()
        .map_err(ConstructError::InvalidName)?;

        let (control, midi) = socket::bind_pair(config.bind_addr, config.local_base_port)?;

        let local_base_port = control
            .local_addr()
            .map_err(|source| ConstructError::ResourceExhaustion {
                socket: SocketRole::Control,
                source,
            })?
            .port();

        // if the MIDI socket can't be registered, the control guard is
        // dropped, deregistering the control socket before closing it
        let control = RegisteredSocket::register(control, SocketRole::Control, poller.clone())?;
        let midi = RegisteredSocket::register(midi, SocketRole::Midi, poller)?;

        let local_ssrc = config.local_ssrc.unwrap_or_else(rand::random);

        log::info!(
            "{}: listening on ports {} (control) and {} (MIDI), SSRC {local_ssrc:08X}",
            config.name,
            local_base_port,
            local_base_port + SocketRole::Midi.port_offset(),
        );

        Ok(Self {
            name: config.name,
            local_base_port,
            local_ssrc,
            verify_initiator: config.verify_initiator,
            verify_protocol: config.verify_protocol,
            control,
            midi,
            session: Session::Uninitiated,
            clock: SessionClock::new(),
            latency: None,
            last_feedback_seq: None,
            sink,
        })
    }
}

impl<P: Poller, S: MidiSink> Peer<P, S> {
    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline(always)]
    pub fn local_base_port(&self) -> u16 {
        self.local_base_port
    }

    /// Port of the MIDI socket, always `local_base_port() + 1`.
    #[inline(always)]
    pub fn midi_port(&self) -> u16 {
        self.local_base_port + SocketRole::Midi.port_offset()
    }

    #[inline(always)]
    pub fn local_ssrc(&self) -> u32 {
        self.local_ssrc
    }

    /// Control port of the remote, `0` until learned from a handshake.
    #[inline]
    pub fn remote_base_port(&self) -> u16 {
        self.session.remote().map_or(0, |r| r.addr.port())
    }

    #[inline]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.session {
            Session::Inviting { addr, .. } => Some(*addr),
            s => s.remote().map(|r| r.addr),
        }
    }

    /// SSRC of the remote, set once by a successful handshake.
    #[inline]
    pub fn remote_ssrc(&self) -> Option<u32> {
        self.session.remote().map(|r| r.ssrc)
    }

    #[inline]
    pub fn remote_name(&self) -> Option<&str> {
        self.session.remote().map(|r| r.name.as_str())
    }

    /// Token of the current (or last) session.
    #[inline]
    pub fn initiator_id(&self) -> Option<u32> {
        match self.session {
            Session::Uninitiated => None,
            Session::Inviting { initiator_id, .. } | Session::Established { initiator_id, .. } => {
                Some(initiator_id)
            }
            Session::Closed { initiator_id, .. } => initiator_id,
        }
    }

    #[inline(always)]
    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    #[inline]
    pub fn role(&self) -> Option<Role> {
        match self.session {
            Session::Uninitiated => None,
            Session::Inviting { .. } => Some(Role::Initiator),
            Session::Established { role, .. } => Some(role),
            Session::Closed { role, .. } => role,
        }
    }

    #[inline]
    pub fn close_reason(&self) -> Option<CloseReason> {
        match self.session {
            Session::Closed { reason, .. } => Some(reason),
            _ => None,
        }
    }

    /// Whether the remote acknowledged the handshake on the MIDI socket too.
    #[inline]
    pub fn data_port_confirmed(&self) -> bool {
        matches!(
            self.session,
            Session::Established {
                data_port_confirmed: true,
                ..
            }
        )
    }

    /// Last round trip time measured by clock synchronization, in ticks.
    #[inline(always)]
    pub fn latency_ticks(&self) -> Option<u64> {
        self.latency
    }

    #[inline]
    pub fn latency(&self) -> Option<core::time::Duration> {
        self.latency.map(ticks_to_duration)
    }

    /// Sequence number of the last receiver feedback.
    #[inline(always)]
    pub fn last_feedback_seq(&self) -> Option<u16> {
        self.last_feedback_seq
    }

    #[inline(always)]
    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    #[inline(always)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[inline(always)]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Raw descriptor of one of the sockets.
    #[inline]
    pub fn fd(&self, socket: SocketRole) -> RawFd {
        match socket {
            SocketRole::Control => self.control.fd(),
            SocketRole::Midi => self.midi.fd(),
        }
    }

    /// Role of the socket with descriptor `fd`, if it belongs to this peer.
    #[inline]
    pub fn socket_role(&self, fd: RawFd) -> Option<SocketRole> {
        [SocketRole::Control, SocketRole::Midi]
            .into_iter()
            .find(|&role| self.fd(role) == fd)
    }

    #[inline]
    pub fn local_addr(&self, socket: SocketRole) -> io::Result<SocketAddr> {
        self.socket(socket).local_addr()
    }

    #[inline(always)]
    fn socket(&self, socket: SocketRole) -> &UdpSocket {
        match socket {
            SocketRole::Control => self.control.socket(),
            SocketRole::Midi => self.midi.socket(),
        }
    }

    // ---- wakeups ----

    /// Reads and handles at most one datagram from the control socket.
    #[inline(always)]
    pub fn control_data_ready(&mut self) -> Wakeup {
        self.data_ready(SocketRole::Control)
    }

    /// Reads and handles at most one datagram from the MIDI socket.
    #[inline(always)]
    pub fn midi_data_ready(&mut self) -> Wakeup {
        self.data_ready(SocketRole::Midi)
    }

    /// Reads and handles at most one datagram from the given socket.
    #[inline(always)]
    pub fn on_ready(&mut self, socket: SocketRole) -> Wakeup {
        self.data_ready(socket)
    }

    fn data_ready(&mut self, socket: SocketRole) -> Wakeup {
        // one spare byte tells oversized datagrams from full-size ones
        let mut buf = [0; MAX_DATAGRAM_SIZE + 1];

        let (len, from) = match self.socket(socket).recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if crate::io_err_is_timeout(e.kind()) => return Wakeup::Idle,
            Err(e) => {
                log::warn!("{}: receive on {socket} socket failed: {e}", self.name);
                return Wakeup::Idle;
            }
        };

        if len > MAX_DATAGRAM_SIZE {
            log::warn!("{}: discarding oversized datagram from {from} on {socket} socket", self.name);
            return Wakeup::Oversized;
        }

        let datagram = &buf[..len];

        if datagram.is_empty() {
            log::debug!("{}: discarding empty datagram from {from}", self.name);
            return Wakeup::Idle;
        }

        log::trace!("{}: {socket} <- {from}: {}", self.name, HexDump(datagram));

        if !is_command(datagram) {
            log::debug!("{}: {len} bytes of payload from {from}", self.name);
            return if self.sink.consume_midi(datagram) {
                Wakeup::Payload(len)
            } else {
                Wakeup::PayloadDropped(len)
            };
        }

        match self.parse_command(datagram, socket, from) {
            Ok(code) => Wakeup::Command(code),
            Err(e) => {
                log::warn!("{}: dropping command from {from} on {socket} socket: {e}", self.name);
                Wakeup::Dropped(e)
            }
        }
    }

    // ---- sending ----

    /// Sends one datagram, which must go out whole.
    fn send_datagram(&self, socket: SocketRole, datagram: &[u8], dest: SocketAddr) -> io::Result<()> {
        let n = self.socket(socket).send_to(datagram, dest)?;

        log::trace!("{}: {socket} -> {dest}: {}", self.name, HexDump(datagram));

        (n == datagram.len())
            .then_some(())
            .ok_or(io::ErrorKind::FileTooLarge.into())
    }

    /// Encodes and sends a command.
    fn send_command(
        &self,
        socket: SocketRole,
        command: &Command<'_>,
        dest: SocketAddr,
    ) -> io::Result<()> {
        let datagram = command.to_datagram().map_err(crate::proto_to_io_err)?;
        self.send_datagram(socket, &datagram, dest)?;
        log::debug!("{}: sent {} to {dest} on {socket} socket", self.name, command.code());
        Ok(())
    }

    #[inline]
    fn handshake(&self, initiator_id: u32) -> Handshake<'_> {
        Handshake {
            protocol: PROTOCOL_VERSION,
            initiator_id,
            ssrc: self.local_ssrc,
            name: &self.name,
        }
    }

    #[inline]
    fn termination(&self, initiator_id: u32) -> Termination {
        Termination {
            protocol: PROTOCOL_VERSION,
            initiator_id,
            ssrc: self.local_ssrc,
        }
    }

    // ---- local operations ----

    /// Invites the peer whose control socket is at `remote`.
    ///
    /// Only allowed before any session took place. The answer arrives through
    /// the wakeups.
    pub fn invite(&mut self, remote: SocketAddr) -> Result<(), SessionError> {
        if !matches!(self.session, Session::Uninitiated) {
            return Err(SessionError::InvalidState(self.state()));
        }

        let initiator_id = rand::random::<u32>();
        let datagram = Command::Invitation(self.handshake(initiator_id)).to_datagram()?;
        self.send_datagram(SocketRole::Control, &datagram, remote)?;

        log::info!("{}: inviting {remote}, initiator id {initiator_id:08X}", self.name);

        self.session = Session::Inviting {
            initiator_id,
            addr: remote,
        };

        Ok(())
    }

    /// Starts a clock synchronization exchange on the MIDI socket.
    ///
    /// The measured latency becomes available once the answer was handled.
    pub fn send_clock_sync(&mut self) -> Result<(), SessionError> {
        let dest = self.established_data_addr()?;

        let ck = ClockSync {
            ssrc: self.local_ssrc,
            count: 0,
            timestamps: [self.clock.now_ticks(), 0, 0],
        };

        let datagram = Command::ClockSync(ck).to_datagram()?;
        self.send_datagram(SocketRole::Midi, &datagram, dest)?;
        Ok(())
    }

    /// Sends `payload` as is to the remote MIDI socket.
    pub fn send_midi(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let dest = self.established_data_addr()?;
        self.send_datagram(SocketRole::Midi, payload, dest)?;
        Ok(())
    }

    /// Ends the session, notifying the remote if there is one.
    ///
    /// The session is closed even if the notification could not be sent, the
    /// send error is returned nonetheless. Ending a closed session does
    /// nothing.
    pub fn end_session(&mut self) -> Result<(), SessionError> {
        let target = match &self.session {
            Session::Closed { .. } => return Ok(()),
            Session::Uninitiated => None,
            Session::Inviting { initiator_id, addr } => Some((*initiator_id, *addr)),
            Session::Established {
                initiator_id,
                remote,
                ..
            } => Some((*initiator_id, remote.addr)),
        };

        let sent = match target {
            Some((initiator_id, addr)) => Command::EndSession(self.termination(initiator_id))
                .to_datagram()
                .map_err(SessionError::from)
                .and_then(|d| {
                    self.send_datagram(SocketRole::Control, &d, addr)
                        .map_err(SessionError::from)
                }),
            None => Ok(()),
        };

        self.close(CloseReason::EndedLocally);
        sent
    }

    fn established_data_addr(&self) -> Result<SocketAddr, SessionError> {
        match &self.session {
            Session::Established { remote, .. } => remote
                .data_addr()
                .ok_or(SessionError::Io(io::ErrorKind::AddrNotAvailable.into())),
            s => Err(SessionError::InvalidState(s.state())),
        }
    }

    fn close(&mut self, reason: CloseReason) {
        replace_with_or_abort(&mut self.session, |s| match s {
            Session::Uninitiated => Session::Closed {
                reason,
                role: None,
                initiator_id: None,
                remote: None,
            },
            Session::Inviting { initiator_id, .. } => Session::Closed {
                reason,
                role: Some(Role::Initiator),
                initiator_id: Some(initiator_id),
                remote: None,
            },
            Session::Established {
                role,
                initiator_id,
                remote,
                ..
            } => Session::Closed {
                reason,
                role: Some(role),
                initiator_id: Some(initiator_id),
                remote: Some(remote),
            },
            closed @ Session::Closed { .. } => closed,
        });

        log::info!("{}: session closed ({reason})", self.name);
    }
}

impl<P: Poller, S: MidiSink> Drop for Peer<P, S> {
    fn drop(&mut self) {
        // both sockets leave the poller before either is closed
        self.control.deregister();
        self.midi.deregister();
    }
}
