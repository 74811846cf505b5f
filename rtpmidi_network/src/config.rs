//! Session peer configuration.

use core::net::{IpAddr, Ipv4Addr};
use serde::{Deserialize, Serialize};

/// Everything needed to construct a [`Peer`](crate::Peer).
///
/// [`PeerConfig::new`] gives the defaults: listen on all IPv4 interfaces, a
/// random SSRC, and strict checking of confirmations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    /// Local name, announced in invitations and confirmations.
    pub name: String,
    /// Control port. The data port is always the next one. `0` lets the OS
    /// pick a free pair.
    pub local_base_port: u16,
    /// Address both sockets are bound to.
    pub bind_addr: IpAddr,
    /// SSRC of this endpoint, random if `None`.
    pub local_ssrc: Option<u32>,
    /// Drop confirmations whose initiator id is not ours.
    ///
    /// When disabled, such confirmations are accepted with a warning.
    pub verify_initiator: bool,
    /// Drop invitations and confirmations announcing another protocol version
    /// than [`PROTOCOL_VERSION`](rtpmidi_proto::PROTOCOL_VERSION).
    pub verify_protocol: bool,
}

impl PeerConfig {
    pub fn new(name: impl Into<String>, local_base_port: u16) -> Self {
        Self {
            name: name.into(),
            local_base_port,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            local_ssrc: None,
            verify_initiator: true,
            verify_protocol: true,
        }
    }

    #[inline(always)]
    pub fn with_bind_addr(mut self, bind_addr: IpAddr) -> Self {
        self.bind_addr = bind_addr;
        self
    }

    #[inline(always)]
    pub fn with_local_ssrc(mut self, ssrc: u32) -> Self {
        self.local_ssrc = Some(ssrc);
        self
    }

    #[inline(always)]
    pub fn with_verify_initiator(mut self, verify: bool) -> Self {
        self.verify_initiator = verify;
        self
    }

    #[inline(always)]
    pub fn with_verify_protocol(mut self, verify: bool) -> Self {
        self.verify_protocol = verify;
        self
    }
}
