mod common;

use core::net::SocketAddr;
use std::net::UdpSocket;

use common::{LOCALHOST, control_addr, handshake, loopback, wait};
use rtpmidi_network::{
    CloseReason, DispatchError, Peer, PeerConfig, Registry, Role, SessionState, SocketRole,
    Wakeup,
    rtpmidi_proto::command::CommandCode,
    rtpmidi_utils::{MidiSink, queue},
};

fn open<S: MidiSink>(registry: &Registry, config: PeerConfig, sink: S) -> Peer<&Registry, S> {
    Peer::with_config(config, registry, sink).unwrap()
}

#[test]
fn handshake_over_loopback() {
    let registry = Registry::new();
    let mut a = open(&registry, loopback("Alice"), Vec::new());
    let mut b = open(&registry, loopback("Bob"), Vec::new());

    handshake(&mut a, &mut b);

    assert_eq!(a.state(), SessionState::Established);
    assert_eq!(b.state(), SessionState::Established);
    assert_eq!(a.role(), Some(Role::Initiator));
    assert_eq!(b.role(), Some(Role::Responder));

    assert_eq!(a.remote_ssrc(), Some(b.local_ssrc()));
    assert_eq!(b.remote_ssrc(), Some(a.local_ssrc()));
    assert_eq!(a.remote_name(), Some("Bob"));
    assert_eq!(b.remote_name(), Some("Alice"));
    assert_eq!(a.initiator_id(), b.initiator_id());

    assert_eq!(a.remote_base_port(), b.local_base_port());
    assert_eq!(b.remote_base_port(), a.local_base_port());

    assert!(a.data_port_confirmed());
    assert!(b.data_port_confirmed());

    // handshakes are not payload
    assert!(a.sink().is_empty());
    assert!(b.sink().is_empty());
    assert_eq!(registry.len(), 4);
}

#[test]
fn clock_sync_measures_latency_on_both_sides() {
    let registry = Registry::new();
    let mut a = open(&registry, loopback("Alice"), Vec::new());
    let mut b = open(&registry, loopback("Bob"), Vec::new());
    handshake(&mut a, &mut b);

    a.send_clock_sync().unwrap();

    assert!(matches!(
        wait(&mut b, SocketRole::Midi),
        Wakeup::Command(CommandCode::ClockSync)
    ));
    assert_eq!(b.latency_ticks(), None);

    assert!(matches!(
        wait(&mut a, SocketRole::Midi),
        Wakeup::Command(CommandCode::ClockSync)
    ));
    assert!(a.latency_ticks().is_some());

    assert!(matches!(
        wait(&mut b, SocketRole::Midi),
        Wakeup::Command(CommandCode::ClockSync)
    ));
    // measured on the initiator's clock both times
    assert_eq!(b.latency_ticks(), a.latency_ticks());
}

#[test]
fn end_session_closes_both_sides() {
    let registry = Registry::new();
    let mut a = open(&registry, loopback("Alice"), Vec::new());
    let mut b = open(&registry, loopback("Bob"), Vec::new());
    handshake(&mut a, &mut b);

    b.end_session().unwrap();
    assert_eq!(b.close_reason(), Some(CloseReason::EndedLocally));

    assert!(matches!(
        wait(&mut a, SocketRole::Control),
        Wakeup::Command(CommandCode::EndSession)
    ));
    assert_eq!(a.state(), SessionState::Closed);
    assert_eq!(a.close_reason(), Some(CloseReason::EndedByRemote));
    assert_eq!(a.remote_ssrc(), Some(b.local_ssrc()));

    assert!(a.send_midi(&[0xF8]).is_err());
}

#[test]
fn busy_responder_rejects_second_initiator() {
    let registry = Registry::new();
    let mut a = open(&registry, loopback("Alice"), Vec::new());
    let mut b = open(&registry, loopback("Bob"), Vec::new());
    let mut c = open(&registry, loopback("Carol"), Vec::new());
    handshake(&mut a, &mut b);

    c.invite(control_addr(&b)).unwrap();

    assert!(matches!(
        wait(&mut b, SocketRole::Control),
        Wakeup::Dropped(DispatchError::UnexpectedCommand {
            command: CommandCode::Invitation,
            ..
        })
    ));
    assert_eq!(b.remote_ssrc(), Some(a.local_ssrc()));

    assert!(matches!(
        wait(&mut c, SocketRole::Control),
        Wakeup::Command(CommandCode::Reject)
    ));
    assert_eq!(c.close_reason(), Some(CloseReason::Rejected));
    assert_eq!(c.remote_ssrc(), None);
}

#[test]
fn payload_reaches_queue_consumer() {
    let registry = Registry::new();
    let (tx, mut rx) = queue::midi_queue(256);

    let mut a = open(&registry, loopback("Alice"), Vec::new());
    let mut b = open(&registry, loopback("Bob"), tx);
    handshake(&mut a, &mut b);

    let note_on = [0x80, 0x61, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x03, 0x90, 0x3C, 0x7F];
    let clock = [0xF8];

    a.send_midi(&note_on).unwrap();
    a.send_midi(&clock).unwrap();

    assert!(matches!(wait(&mut b, SocketRole::Midi), Wakeup::Payload(12)));
    assert!(matches!(wait(&mut b, SocketRole::Midi), Wakeup::Payload(1)));

    // the consumer can live on another thread
    let received = std::thread::spawn(move || [rx.recv(), rx.recv(), rx.recv()])
        .join()
        .unwrap();

    assert_eq!(received, [Some(note_on.to_vec()), Some(clock.to_vec()), None]);
}

#[test]
fn refused_payload_is_reported() {
    let registry = Registry::new();
    let (tx, mut rx) = queue::midi_queue(4);
    let mut peer = open(&registry, loopback("Local"), tx);
    let sender = UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).unwrap();

    sender
        .send_to(&[0x90, 0x3C, 0x7F, 0x80, 0x3C, 0x00], control_addr(&peer))
        .unwrap();

    assert!(matches!(
        wait(&mut peer, SocketRole::Control),
        Wakeup::PayloadDropped(6)
    ));
    assert_eq!(rx.recv(), None);
}

#[test]
fn empty_and_oversized_datagrams_are_discarded() {
    let registry = Registry::new();
    let mut peer = open(&registry, loopback("Local"), Vec::new());
    let sender = UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).unwrap();

    let oversized = [0xFF; 1501];

    for socket in [SocketRole::Control, SocketRole::Midi] {
        let dest = peer.local_addr(socket).unwrap();

        sender.send_to(&oversized, dest).unwrap();
        assert!(matches!(wait(&mut peer, socket), Wakeup::Oversized));

        // the empty datagram is read and ignored, the marker behind it is
        // the first thing reported
        sender.send_to(&[], dest).unwrap();
        sender.send_to(&[0xF8], dest).unwrap();
        assert!(matches!(wait(&mut peer, socket), Wakeup::Payload(1)));
        assert!(matches!(peer.on_ready(socket), Wakeup::Idle));
    }

    assert_eq!(peer.sink()[..], [vec![0xF8], vec![0xF8]]);
    assert_eq!(peer.state(), SessionState::Uninitiated);
    assert_eq!(peer.remote_ssrc(), None);
}

#[test]
fn ephemeral_ports_are_consecutive() {
    let registry = Registry::new();
    let peer = open(&registry, loopback("Local"), Vec::new());

    assert_ne!(peer.local_base_port(), 0);
    assert_eq!(
        peer.local_addr(SocketRole::Midi).unwrap().port(),
        peer.local_base_port() + 1
    );
}

#[test]
fn unframed_datagrams_are_payload_on_both_ports() {
    let registry = Registry::new();
    let mut peer: Peer<_, Vec<Vec<u8>>> = Peer::new("Local", 5004, &registry, Vec::new()).unwrap();

    assert_eq!(peer.local_base_port(), 5004);
    assert_eq!(peer.local_addr(SocketRole::Control).unwrap().port(), 5004);
    assert_eq!(peer.local_addr(SocketRole::Midi).unwrap().port(), 5005);

    let sender = UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).unwrap();

    let mut unsigned = [0x42; 16];
    unsigned[0] = 0xFF;
    // signed, but too short to be a command
    let short = [0xFF, 0xFF, 0x49, 0x4E, 0, 0, 0, 2];

    for (port, socket) in [(5004, SocketRole::Control), (5005, SocketRole::Midi)] {
        let dest = SocketAddr::new(LOCALHOST, port);

        sender.send_to(&unsigned, dest).unwrap();
        assert!(matches!(wait(&mut peer, socket), Wakeup::Payload(16)));

        sender.send_to(&short, dest).unwrap();
        assert!(matches!(wait(&mut peer, socket), Wakeup::Payload(8)));
    }

    assert_eq!(peer.sink().len(), 4);
    assert!(peer.sink().iter().step_by(2).all(|d| d[..] == unsigned));
    assert_eq!(peer.state(), SessionState::Uninitiated);
}

#[test]
fn unknown_command_is_dropped() {
    let registry = Registry::new();
    let mut peer = open(&registry, loopback("Local"), Vec::new());
    let sender = UdpSocket::bind(SocketAddr::new(LOCALHOST, 0)).unwrap();

    let mut datagram = [0; 20];
    datagram[..4].copy_from_slice(b"\xFF\xFFZZ");
    sender.send_to(&datagram, control_addr(&peer)).unwrap();

    assert!(matches!(
        wait(&mut peer, SocketRole::Control),
        Wakeup::Dropped(DispatchError::NotImplemented(0x5A5A))
    ));
    assert!(peer.sink().is_empty());
    assert_eq!(peer.remote_ssrc(), None);

    // nothing else pending
    assert!(matches!(peer.control_data_ready(), Wakeup::Idle));
    assert!(matches!(peer.midi_data_ready(), Wakeup::Idle));
}
