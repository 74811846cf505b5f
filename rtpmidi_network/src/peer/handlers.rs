//! Handlers of received commands.
//!
//! Every handler decodes all of its fields before looking at the session, and
//! validates everything before mutating it: a dropped command never leaves a
//! trace in the session state.

use core::net::SocketAddr;

use rtpmidi_proto::{
    COMMAND_SIGNATURE, MIN_COMMAND_LEN, PROTOCOL_VERSION, ParseBuffer,
    command::{ClockSync, Command, CommandCode, Handshake, ReceiverFeedback, Termination},
};
use rtpmidi_utils::MidiSink;

use super::{CloseReason, Peer, Remote, Role, Session};
use crate::{DispatchError, Poller, SocketRole};

/// A decoded `OK` command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Confirmation {
    pub protocol: u32,
    pub initiator_id: u32,
    pub ssrc: u32,
    pub name: String,
    /// Whether `initiator_id` is the token of our invitation.
    pub initiator_matches: bool,
}

impl<P: Poller, S: MidiSink> Peer<P, S> {
    /// Handles one command received on `socket` from `from`.
    ///
    /// `buffer` must be a whole datagram already recognized by
    /// [`is_command`](rtpmidi_proto::is_command). Replies, if any, are sent
    /// on `socket`.
    pub fn parse_command(
        &mut self,
        buffer: &[u8],
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<CommandCode, DispatchError> {
        if buffer.len() < MIN_COMMAND_LEN {
            return Err(DispatchError::InternalInvariantViolation(
                "command shorter than the minimum command length",
            ));
        }

        let mut buf = ParseBuffer::new(buffer);
        buf.skip(COMMAND_SIGNATURE.len())?;

        let raw = buf.read_uint16()?;
        let code = CommandCode::from_u16(raw).ok_or(DispatchError::NotImplemented(raw))?;

        log::debug!("{}: got {code} from {from} on {socket} socket", self.name);

        match code {
            CommandCode::Invitation => self.parse_command_in(&mut buf, socket, from),
            CommandCode::Accept => self.parse_command_ok(&mut buf, socket, from).map(drop),
            CommandCode::Reject => self.parse_command_no(&mut buf, socket, from),
            CommandCode::EndSession => self.parse_command_by(&mut buf, socket, from),
            CommandCode::ClockSync => self.parse_command_ck(&mut buf, socket, from),
            CommandCode::ReceiverFeedback => self.parse_command_rs(&mut buf, socket, from),
        }?;

        Ok(code)
    }

    #[inline]
    fn unexpected(&self, command: CommandCode, socket: SocketRole) -> DispatchError {
        DispatchError::UnexpectedCommand {
            command,
            socket,
            state: self.state(),
        }
    }

    fn check_protocol(&self, protocol: u32) -> Result<(), DispatchError> {
        if protocol == PROTOCOL_VERSION {
            return Ok(());
        }

        if self.verify_protocol {
            return Err(DispatchError::UnsupportedProtocol(protocol));
        }

        log::warn!("{}: accepting protocol version {protocol}", self.name);
        Ok(())
    }

    #[inline]
    fn check_ssrc(expected: u32, got: u32) -> Result<(), DispatchError> {
        if expected == got {
            Ok(())
        } else {
            Err(DispatchError::SsrcMismatch { expected, got })
        }
    }

    /// Answers an invitation with `NO`. Failure to do so is only logged.
    fn reject(&self, socket: SocketRole, initiator_id: u32, to: SocketAddr) {
        let no = Command::Reject(self.termination(initiator_id));

        if let Err(e) = self.send_command(socket, &no, to) {
            log::warn!("{}: can not reject invitation from {to}: {e}", self.name);
        }
    }

    /// Handles an `IN` command, whose header was already read from `buf`.
    ///
    /// An invitation on the control socket of a fresh peer opens a session
    /// with this peer as responder. Repeated invitations from the same remote
    /// are confirmed again, on the socket they came from. Every other
    /// invitation is answered with `NO`.
    pub fn parse_command_in(
        &mut self,
        buf: &mut ParseBuffer<'_>,
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<(), DispatchError> {
        let invitation = Handshake::decode(buf)?;

        log::info!(
            "{}: invitation from {from} on {socket} socket, initiator id {:08X}, SSRC {:08X}, name {:?}",
            self.name,
            invitation.initiator_id,
            invitation.ssrc,
            invitation.name,
        );

        if let Err(e) = self.check_protocol(invitation.protocol) {
            self.reject(socket, invitation.initiator_id, from);
            return Err(e);
        }

        let acceptable = match (&self.session, socket) {
            (Session::Uninitiated, SocketRole::Control) => true,
            (
                Session::Established {
                    role: Role::Responder,
                    initiator_id,
                    remote,
                    ..
                },
                _,
            ) => *initiator_id == invitation.initiator_id && remote.ssrc == invitation.ssrc,
            _ => false,
        };

        if !acceptable {
            let e = self.unexpected(CommandCode::Invitation, socket);
            self.reject(socket, invitation.initiator_id, from);
            return Err(e);
        }

        let ok = Command::Accept(self.handshake(invitation.initiator_id));
        self.send_command(socket, &ok, from)?;

        if let Session::Established {
            remote,
            data_port_confirmed,
            ..
        } = &mut self.session
        {
            if socket == SocketRole::Midi && !*data_port_confirmed {
                *data_port_confirmed = true;
                log::info!("{}: data port of {} confirmed", self.name, remote.name);
            } else {
                log::debug!("{}: confirmed repeated invitation from {from}", self.name);
            }

            return Ok(());
        }

        self.session = Session::Established {
            role: Role::Responder,
            initiator_id: invitation.initiator_id,
            remote: Remote {
                addr: from,
                ssrc: invitation.ssrc,
                name: invitation.name.into(),
            },
            data_port_confirmed: false,
        };

        log::info!(
            "{}: session with {:?} ({from}) established as responder",
            self.name,
            invitation.name,
        );

        Ok(())
    }

    /// Handles an `OK` command, whose header was already read from `buf`.
    ///
    /// The first confirmation, on the control socket, establishes the
    /// session and sends the invitation for the data port. The confirmation
    /// of that second invitation, on the MIDI socket, marks the data port as
    /// confirmed.
    ///
    /// Returns the decoded confirmation. If initiator verification is
    /// disabled, confirmations for another token are accepted, which
    /// [`Confirmation::initiator_matches`] reports.
    pub fn parse_command_ok(
        &mut self,
        buf: &mut ParseBuffer<'_>,
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<Confirmation, DispatchError> {
        let ok = Handshake::decode(buf)?;
        self.check_protocol(ok.protocol)?;

        let expected = match &self.session {
            Session::Inviting { initiator_id, .. } if socket == SocketRole::Control => {
                *initiator_id
            }
            Session::Established {
                role: Role::Initiator,
                initiator_id,
                ..
            } => *initiator_id,
            _ => return Err(self.unexpected(CommandCode::Accept, socket)),
        };

        let confirmation = Confirmation {
            protocol: ok.protocol,
            initiator_id: ok.initiator_id,
            ssrc: ok.ssrc,
            name: ok.name.into(),
            initiator_matches: ok.initiator_id == expected,
        };

        log::info!(
            "{}: confirmation from {from} on {socket} socket, initiator id {:08X} ({}), SSRC {:08X}, name {:?}",
            self.name,
            ok.initiator_id,
            if confirmation.initiator_matches { "ours" } else { "foreign" },
            ok.ssrc,
            ok.name,
        );

        if !confirmation.initiator_matches {
            if self.verify_initiator {
                return Err(DispatchError::InitiatorMismatch {
                    expected,
                    got: ok.initiator_id,
                });
            }

            log::warn!(
                "{}: accepting confirmation for initiator id {:08X}, ours is {expected:08X}",
                self.name,
                ok.initiator_id,
            );
        }

        if let Session::Established {
            remote,
            data_port_confirmed,
            ..
        } = &mut self.session
        {
            Self::check_ssrc(remote.ssrc, ok.ssrc)?;

            if socket == SocketRole::Midi && !*data_port_confirmed {
                *data_port_confirmed = true;
                log::info!("{}: data port of {} confirmed", self.name, remote.name);
            }

            return Ok(confirmation);
        }

        let remote = Remote {
            addr: from,
            ssrc: ok.ssrc,
            name: confirmation.name.clone(),
        };
        let data_addr = remote.data_addr();

        self.session = Session::Established {
            role: Role::Initiator,
            initiator_id: expected,
            remote,
            data_port_confirmed: false,
        };

        log::info!(
            "{}: session with {:?} ({from}) established as initiator",
            self.name,
            ok.name,
        );

        let invitation = Command::Invitation(self.handshake(expected));
        let sent = match data_addr {
            Some(dest) => self.send_command(SocketRole::Midi, &invitation, dest),
            None => Err(std::io::ErrorKind::AddrNotAvailable.into()),
        };

        if let Err(e) = sent {
            log::warn!("{}: can not invite the data port of {from}: {e}", self.name);
        }

        Ok(confirmation)
    }

    /// Handles a `NO` command, whose header was already read from `buf`.
    ///
    /// Closes the session if it answers our pending invitation, be it the
    /// one on the control socket or the one for the data port.
    pub fn parse_command_no(
        &mut self,
        buf: &mut ParseBuffer<'_>,
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<(), DispatchError> {
        let no = Termination::decode(buf)?;

        let expected = match &self.session {
            Session::Inviting { initiator_id, .. } => *initiator_id,
            Session::Established {
                role: Role::Initiator,
                initiator_id,
                data_port_confirmed: false,
                ..
            } if socket == SocketRole::Midi => *initiator_id,
            _ => return Err(self.unexpected(CommandCode::Reject, socket)),
        };

        if no.initiator_id != expected {
            return Err(DispatchError::InitiatorMismatch {
                expected,
                got: no.initiator_id,
            });
        }

        log::info!("{}: invitation rejected by {from}", self.name);
        self.close(CloseReason::Rejected);
        Ok(())
    }

    /// Handles a `BY` command, whose header was already read from `buf`.
    pub fn parse_command_by(
        &mut self,
        buf: &mut ParseBuffer<'_>,
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<(), DispatchError> {
        let by = Termination::decode(buf)?;

        match &self.session {
            Session::Inviting { initiator_id, .. } if *initiator_id != by.initiator_id => {
                return Err(DispatchError::InitiatorMismatch {
                    expected: *initiator_id,
                    got: by.initiator_id,
                });
            }
            Session::Inviting { .. } => (),
            Session::Established { remote, .. } => Self::check_ssrc(remote.ssrc, by.ssrc)?,
            _ => return Err(self.unexpected(CommandCode::EndSession, socket)),
        }

        log::info!("{}: {from} ended the session", self.name);
        self.close(CloseReason::EndedByRemote);
        Ok(())
    }

    /// Handles a `CK` command, whose header was already read from `buf`.
    ///
    /// Answers the first two steps of the exchange on `socket`, and records
    /// the round trip time once it is known.
    pub fn parse_command_ck(
        &mut self,
        buf: &mut ParseBuffer<'_>,
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<(), DispatchError> {
        let ck = ClockSync::decode(buf)?;

        let Session::Established { remote, .. } = &self.session else {
            return Err(self.unexpected(CommandCode::ClockSync, socket));
        };

        Self::check_ssrc(remote.ssrc, ck.ssrc)?;

        let now = self.clock.now_ticks();
        let [ts1, ts2, ts3] = ck.timestamps;

        let (reply, latency) = match ck.count {
            0 => (Some([ts1, now, 0]), None),
            1 => (Some([ts1, ts2, now]), Some(now.saturating_sub(ts1))),
            _ => (None, Some(ts3.saturating_sub(ts1))),
        };

        if let Some(timestamps) = reply {
            let reply = Command::ClockSync(ClockSync {
                ssrc: self.local_ssrc,
                count: ck.count + 1,
                timestamps,
            });

            self.send_command(socket, &reply, from)?;
        }

        if let Some(latency) = latency {
            log::debug!("{}: round trip to {from} is {latency} ticks", self.name);
            self.latency = Some(latency);
        }

        Ok(())
    }

    /// Handles an `RS` command, whose header was already read from `buf`.
    pub fn parse_command_rs(
        &mut self,
        buf: &mut ParseBuffer<'_>,
        socket: SocketRole,
        from: SocketAddr,
    ) -> Result<(), DispatchError> {
        let rs = ReceiverFeedback::decode(buf)?;

        let Session::Established { remote, .. } = &self.session else {
            return Err(self.unexpected(CommandCode::ReceiverFeedback, socket));
        };

        Self::check_ssrc(remote.ssrc, rs.ssrc)?;

        log::debug!("{}: {from} received up to sequence number {}", self.name, rs.sequence);
        self.last_feedback_seq = Some(rs.sequence);
        Ok(())
    }
}
