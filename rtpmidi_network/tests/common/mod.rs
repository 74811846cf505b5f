#![allow(dead_code)]

use core::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};
use std::time::Instant;

use rtpmidi_network::{Peer, PeerConfig, Poller, SocketRole, Wakeup, rtpmidi_utils::MidiSink};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How long to wait for a datagram before failing the test.
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// A peer on loopback, on OS-assigned ports.
pub fn loopback(name: &str) -> PeerConfig {
    PeerConfig::new(name, 0).with_bind_addr(LOCALHOST)
}

pub fn control_addr<P: Poller, S: MidiSink>(peer: &Peer<P, S>) -> SocketAddr {
    peer.local_addr(SocketRole::Control).unwrap()
}

/// Polls `socket` of `peer` until something other than [`Wakeup::Idle`]
/// happens.
pub fn wait<P: Poller, S: MidiSink>(peer: &mut Peer<P, S>, socket: SocketRole) -> Wakeup {
    let deadline = Instant::now() + RECV_TIMEOUT;

    loop {
        match peer.on_ready(socket) {
            Wakeup::Idle if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(1))
            }
            Wakeup::Idle => panic!("{}: nothing received on {socket} socket", peer.name()),
            w => return w,
        }
    }
}

/// Runs both handshakes between `initiator` and `responder`.
pub fn handshake<P1, S1, P2, S2>(initiator: &mut Peer<P1, S1>, responder: &mut Peer<P2, S2>)
where
    P1: Poller,
    S1: MidiSink,
    P2: Poller,
    S2: MidiSink,
{
    initiator.invite(control_addr(responder)).unwrap();

    let steps = [
        // invitation, answered on the control socket
        wait(responder, SocketRole::Control),
        // confirmation, followed by the data port invitation
        wait(initiator, SocketRole::Control),
        wait(responder, SocketRole::Midi),
        wait(initiator, SocketRole::Midi),
    ];

    for wakeup in steps {
        assert!(matches!(wakeup, Wakeup::Command(_)), "handshake failed: {wakeup:?}");
    }
}
