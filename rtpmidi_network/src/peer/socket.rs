//! Opening the socket pair and keeping it registered.

use core::net::{IpAddr, SocketAddr};
use std::{
    io,
    net::UdpSocket,
    os::fd::{AsRawFd, RawFd},
};

use crate::{ConstructError, Poller, SocketRole};

/// How many OS-assigned control ports are tried before giving up on finding
/// one whose successor is free.
const EPHEMERAL_PAIR_ATTEMPTS: usize = 8;

/// A socket registered with a [`Poller`].
///
/// Dropping it deregisters the descriptor, then closes the socket.
#[derive(Debug)]
pub(crate) struct RegisteredSocket<P: Poller> {
    sock: UdpSocket,
    role: SocketRole,
    poller: P,
    registered: bool,
}

impl<P: Poller> RegisteredSocket<P> {
    /// Registers `sock`. On failure, the socket is closed without having been
    /// registered.
    pub(crate) fn register(
        sock: UdpSocket,
        role: SocketRole,
        poller: P,
    ) -> Result<Self, ConstructError> {
        let fd = sock.as_raw_fd();

        poller
            .register(fd, role)
            .map_err(|source| ConstructError::Registration {
                socket: role,
                source,
            })?;

        Ok(Self {
            sock,
            role,
            poller,
            registered: true,
        })
    }

    #[inline(always)]
    pub(crate) fn socket(&self) -> &UdpSocket {
        &self.sock
    }

    #[inline(always)]
    pub(crate) fn fd(&self) -> RawFd {
        self.sock.as_raw_fd()
    }

    /// Idempotent.
    pub(crate) fn deregister(&mut self) {
        if core::mem::replace(&mut self.registered, false) {
            self.poller.deregister(self.fd());
            log::trace!("deregistered {} socket (fd {})", self.role, self.fd());
        }
    }
}

impl<P: Poller> Drop for RegisteredSocket<P> {
    fn drop(&mut self) {
        self.deregister();
    }
}

fn bind_error(socket: SocketRole, addr: SocketAddr, source: io::Error) -> ConstructError {
    use io::ErrorKind::*;

    match source.kind() {
        AddrInUse | AddrNotAvailable | PermissionDenied => ConstructError::AddressInUse {
            socket,
            addr,
            source,
        },
        _ => ConstructError::ResourceExhaustion { socket, source },
    }
}

/// Opens a non-blocking UDP socket bound to `addr`.
fn bind(addr: SocketAddr, socket: SocketRole) -> Result<UdpSocket, ConstructError> {
    let sock = UdpSocket::bind(addr).map_err(|e| bind_error(socket, addr, e))?;

    sock.set_nonblocking(true)
        .map_err(|source| ConstructError::ResourceExhaustion { socket, source })?;

    Ok(sock)
}

#[inline]
fn local_port(sock: &UdpSocket, socket: SocketRole) -> Result<u16, ConstructError> {
    sock.local_addr()
        .map(|a| a.port())
        .map_err(|source| ConstructError::ResourceExhaustion { socket, source })
}

/// Opens the control socket on `base_port` and the MIDI socket on the next
/// port.
///
/// With `base_port == 0`, the OS picks the control port, and the pair is
/// retried a few times if its successor is taken. If anything fails, the
/// sockets opened so far are closed before returning.
pub(crate) fn bind_pair(
    ip: IpAddr,
    base_port: u16,
) -> Result<(UdpSocket, UdpSocket), ConstructError> {
    if base_port != 0 {
        let midi_port = base_port
            .checked_add(SocketRole::Midi.port_offset())
            .ok_or(ConstructError::InvalidPort(base_port))?;

        let control = bind(SocketAddr::new(ip, base_port), SocketRole::Control)?;
        let midi = bind(SocketAddr::new(ip, midi_port), SocketRole::Midi)?;

        return Ok((control, midi));
    }

    let mut last_err = None;

    for _ in 0..EPHEMERAL_PAIR_ATTEMPTS {
        let control = bind(SocketAddr::new(ip, 0), SocketRole::Control)?;

        let Some(midi_port) = local_port(&control, SocketRole::Control)?
            .checked_add(SocketRole::Midi.port_offset())
        else {
            continue;
        };

        match bind(SocketAddr::new(ip, midi_port), SocketRole::Midi) {
            Ok(midi) => return Ok((control, midi)),
            Err(e @ ConstructError::AddressInUse { .. }) => {
                log::debug!("port {midi_port} taken, retrying with another pair");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or(ConstructError::InvalidPort(0)))
}
