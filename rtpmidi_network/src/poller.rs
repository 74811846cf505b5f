//! Registration of sockets with an external readiness notifier.

use core::cell::RefCell;
use std::{io, os::fd::RawFd, rc::Rc, sync::Arc};

use crate::SocketRole;

/// Table of watched descriptors, keyed by raw file descriptor.
type FdMap<V> = rustc_hash::FxHashMap<RawFd, V>;

/// An external readiness notifier, such as an application's event loop.
///
/// A [`Peer`](crate::Peer) registers both of its sockets on construction and
/// deregisters them when dropped, always before closing them. How readiness
/// is waited for is up to the implementor.
pub trait Poller {
    /// Starts watching `fd` for readability.
    fn register(&self, fd: RawFd, socket: SocketRole) -> io::Result<()>;

    /// Stops watching `fd`. Must tolerate descriptors that were never
    /// registered.
    fn deregister(&self, fd: RawFd);
}

impl<P: Poller + ?Sized> Poller for &P {
    #[inline(always)]
    fn register(&self, fd: RawFd, socket: SocketRole) -> io::Result<()> {
        (**self).register(fd, socket)
    }

    #[inline(always)]
    fn deregister(&self, fd: RawFd) {
        (**self).deregister(fd)
    }
}

impl<P: Poller + ?Sized> Poller for Rc<P> {
    #[inline(always)]
    fn register(&self, fd: RawFd, socket: SocketRole) -> io::Result<()> {
        (**self).register(fd, socket)
    }

    #[inline(always)]
    fn deregister(&self, fd: RawFd) {
        (**self).deregister(fd)
    }
}

impl<P: Poller + ?Sized> Poller for Arc<P> {
    #[inline(always)]
    fn register(&self, fd: RawFd, socket: SocketRole) -> io::Result<()> {
        (**self).register(fd, socket)
    }

    #[inline(always)]
    fn deregister(&self, fd: RawFd) {
        (**self).deregister(fd)
    }
}

/// A single-threaded [`Poller`] that only records which descriptors are
/// watched.
///
/// Applications with their own `poll(2)` loop can build their descriptor set
/// from [`Registry::watched`], and route readiness back with
/// [`Peer::on_ready`](crate::Peer::on_ready).
#[derive(Debug, Default)]
pub struct Registry {
    watched: RefCell<FdMap<SocketRole>>,
}

impl Registry {
    #[inline(always)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Role of the socket registered under `fd`, if any.
    #[inline]
    pub fn role_of(&self, fd: RawFd) -> Option<SocketRole> {
        self.watched.borrow().get(&fd).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.watched.borrow().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.watched.borrow().is_empty()
    }

    /// All watched descriptors, in ascending order.
    pub fn watched(&self) -> Vec<(RawFd, SocketRole)> {
        let mut watched: Vec<_> = self
            .watched
            .borrow()
            .iter()
            .map(|(&fd, &role)| (fd, role))
            .collect();
        watched.sort_unstable_by_key(|&(fd, _)| fd);
        watched
    }
}

impl Poller for Registry {
    fn register(&self, fd: RawFd, socket: SocketRole) -> io::Result<()> {
        let mut watched = self.watched.borrow_mut();

        if watched.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("descriptor {fd} is already registered"),
            ));
        }

        watched.insert(fd, socket);
        log::trace!("watching {socket} socket (fd {fd})");
        Ok(())
    }

    fn deregister(&self, fd: RawFd) {
        if let Some(socket) = self.watched.borrow_mut().remove(&fd) {
            log::trace!("no longer watching {socket} socket (fd {fd})");
        }
    }
}
