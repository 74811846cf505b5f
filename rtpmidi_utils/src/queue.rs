//! Datagram-preserving MIDI payload transport over a byte ring buffer.
//!
//! Each datagram is stored as a big-endian `u16` length followed by its bytes.
//! Datagrams are written all-or-nothing, so the consumer never observes a
//! partial one.
//!
//! ```ignore
//! let (tx, mut rx) = queue::midi_queue(4096);
//!
//! // network thread: hand `tx` to the session peer as its sink
//! // sequencer thread:
//! while let Some(datagram) = rx.recv() {
//!     // ...
//! }
//! ```

use std::io::Read;

pub use rtrb;

use crate::MidiSink;

/// Size of the length prefix in front of every datagram.
pub const FRAME_HEADER_LEN: usize = size_of::<u16>();

/// Creates a payload queue able to hold `capacity_bytes` bytes, framing
/// included.
#[inline]
pub fn midi_queue(capacity_bytes: usize) -> (rtrb::Producer<u8>, MidiRx) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity_bytes);
    (tx, MidiRx::new(rx))
}

/// Returns a reader that reads contiguously across a split read chunk.
#[inline(always)]
fn chunk_get_reader<'a>(chunk: &'a rtrb::chunks::ReadChunk<'_, u8>) -> impl Read + 'a {
    let (start, end) = chunk.as_slices();
    Read::chain(start, end)
}

/// Pushes each datagram with its length prefix, or nothing at all if the
/// queue lacks space or the datagram is longer than `u16::MAX`.
impl MidiSink for rtrb::Producer<u8> {
    fn consume_midi(&mut self, payload: &[u8]) -> bool {
        let Ok(len) = u16::try_from(payload.len()) else {
            log::warn!("dropping {} byte MIDI datagram: too long to queue", payload.len());
            return false;
        };

        let total = FRAME_HEADER_LEN + payload.len();

        match self.write_chunk_uninit(total) {
            Ok(chunk) => {
                let written =
                    chunk.fill_from_iter(len.to_be_bytes().into_iter().chain(payload.iter().copied()));
                debug_assert_eq!(written, total);
                true
            }
            Err(_) => {
                log::warn!(
                    "dropping {} byte MIDI datagram: queue full ({} slots free)",
                    payload.len(),
                    self.slots()
                );
                false
            }
        }
    }
}

/// The consuming end of a [`midi_queue`].
#[derive(Debug)]
pub struct MidiRx {
    rx: rtrb::Consumer<u8>,
}

impl MidiRx {
    #[inline(always)]
    pub fn new(rx: rtrb::Consumer<u8>) -> Self {
        Self { rx }
    }

    /// Returns `true` if the producing side was dropped.
    ///
    /// Datagrams already queued can still be received.
    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.rx.is_abandoned()
    }

    /// Length of the next datagram, if one is fully available.
    fn peek_len(&mut self) -> Option<usize> {
        let chunk = self.rx.read_chunk(FRAME_HEADER_LEN).ok()?;

        let mut len = [0; FRAME_HEADER_LEN];
        let res = chunk_get_reader(&chunk).read_exact(&mut len);
        // uncommitted, the header stays in the queue
        drop(chunk);
        res.ok()?;

        let len = usize::from(u16::from_be_bytes(len));

        (self.rx.slots() >= FRAME_HEADER_LEN + len).then_some(len)
    }

    /// Pops the next datagram into `out`, replacing its contents.
    ///
    /// Returns `false`, leaving `out` untouched, if no datagram is available.
    pub fn recv_into(&mut self, out: &mut Vec<u8>) -> bool {
        let Some(len) = self.peek_len() else {
            return false;
        };

        let Ok(chunk) = self.rx.read_chunk(FRAME_HEADER_LEN + len) else {
            return false;
        };

        out.clear();
        out.reserve(len);

        let mut reader = chunk_get_reader(&chunk);
        let mut header = [0; FRAME_HEADER_LEN];

        let res = reader
            .read_exact(&mut header)
            .and_then(|()| reader.by_ref().take(len as u64).read_to_end(out));

        drop(reader);
        chunk.commit_all();

        res.is_ok()
    }

    /// Pops the next datagram, if any.
    #[inline]
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        let mut out = Vec::new();
        self.recv_into(&mut out).then_some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datagrams_keep_their_boundaries() {
        let (mut tx, mut rx) = midi_queue(64);

        assert!(tx.consume_midi(&[0x90, 0x40, 0x7F]));
        assert!(tx.consume_midi(&[]));
        assert!(tx.consume_midi(&[0x80, 0x40, 0x00, 0xF8]));

        assert_eq!(rx.recv(), Some(vec![0x90, 0x40, 0x7F]));
        assert_eq!(rx.recv(), Some(vec![]));
        assert_eq!(rx.recv(), Some(vec![0x80, 0x40, 0x00, 0xF8]));
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn full_queue_drops_whole_datagrams() {
        let (mut tx, mut rx) = midi_queue(8);

        assert!(tx.consume_midi(&[1, 2, 3, 4]));
        // needs 6 slots, only 2 left
        assert!(!tx.consume_midi(&[5, 6, 7, 8]));

        assert_eq!(rx.recv(), Some(vec![1, 2, 3, 4]));
        assert_eq!(rx.recv(), None);
    }

    #[test]
    fn frames_wrap_around_the_ring() {
        let (mut tx, mut rx) = midi_queue(10);
        let mut out = Vec::new();

        for i in 0..20u8 {
            assert!(tx.consume_midi(&[i, i.wrapping_add(1), i.wrapping_add(2)]));
            assert!(rx.recv_into(&mut out));
            assert_eq!(out, [i, i.wrapping_add(1), i.wrapping_add(2)]);
        }

        assert!(!rx.recv_into(&mut out));
    }

    #[test]
    fn abandoned_producer() {
        let (mut tx, mut rx) = midi_queue(16);
        assert!(tx.consume_midi(b"last"));
        drop(tx);

        assert!(rx.is_abandoned());
        assert_eq!(rx.recv().as_deref(), Some(&b"last"[..]));
    }
}
