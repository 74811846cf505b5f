//! Utilities shared by session peers and the consumers of their MIDI payload.
//!
//! This crate provides:
//! - the [`MidiSink`] abstraction through which a session peer hands over every
//!   datagram that is not a session command,
//! - a lock-free, datagram-preserving transport for those payloads built on
//!   [`rtrb`] (see [`queue`]), so the sequencer side can live on another thread,
//! - [`SessionClock`], the time base used by clock synchronization,
//! - [`HexDump`], a small formatting adapter for diagnostics.

use core::fmt;

pub mod queue;

/// Number of clock ticks in one second. One tick is 100 microseconds, the
/// resolution of AppleMIDI clock synchronization timestamps.
pub const TICKS_PER_SECOND: u64 = 10_000;

/// Monotonic time base of a session, in 100 µs ticks since its creation.
///
/// ```ignore
/// let clock = SessionClock::new();
///
/// // later, when answering a clock synchronization request
/// let ts2 = clock.now_ticks();
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SessionClock(std::time::Instant);

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock {
    /// Creates a clock whose zero is the current instant.
    #[inline(always)]
    pub fn new() -> Self {
        Self(std::time::Instant::now())
    }

    /// Returns the time elapsed since the clock was created.
    #[inline(always)]
    pub fn elapsed(&self) -> core::time::Duration {
        self.0.elapsed()
    }

    /// Returns the current time in ticks.
    #[inline]
    pub fn now_ticks(&self) -> u64 {
        duration_to_ticks(self.elapsed())
    }
}

/// Converts a duration into whole ticks, saturating on overflow.
#[inline]
pub fn duration_to_ticks(d: core::time::Duration) -> u64 {
    u64::try_from(d.as_micros() / 100).unwrap_or(u64::MAX)
}

/// Converts ticks back into a duration.
#[inline]
pub fn ticks_to_duration(ticks: u64) -> core::time::Duration {
    core::time::Duration::from_micros(ticks.saturating_mul(100))
}

/// A consumer of MIDI payload datagrams.
///
/// Session peers call [`consume_midi`](Self::consume_midi) once for every
/// received datagram that is not a session command. The payload is passed
/// exactly as received; interpreting it is entirely up to the sink.
pub trait MidiSink {
    /// Takes one datagram.
    ///
    /// Returns `false` if the datagram had to be dropped, e.g. because a
    /// queue is full.
    fn consume_midi(&mut self, payload: &[u8]) -> bool;
}

impl<S: MidiSink + ?Sized> MidiSink for &mut S {
    #[inline(always)]
    fn consume_midi(&mut self, payload: &[u8]) -> bool {
        (**self).consume_midi(payload)
    }
}

impl<S: MidiSink + ?Sized> MidiSink for Box<S> {
    #[inline(always)]
    fn consume_midi(&mut self, payload: &[u8]) -> bool {
        (**self).consume_midi(payload)
    }
}

/// Collects every datagram. Mostly useful in tests and tools.
impl MidiSink for Vec<Vec<u8>> {
    #[inline]
    fn consume_midi(&mut self, payload: &[u8]) -> bool {
        self.push(payload.to_vec());
        true
    }
}

/// A sink that silently drops everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Discard;

impl MidiSink for Discard {
    #[inline(always)]
    fn consume_midi(&mut self, _payload: &[u8]) -> bool {
        true
    }
}

/// Formats a byte slice as space separated hexadecimal pairs.
#[derive(Clone, Copy)]
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes = self.0.iter();

        if let Some(first) = bytes.next() {
            write!(f, "{first:02X}")?;
        }

        for byte in bytes {
            write!(f, " {byte:02X}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{self}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticks() {
        assert_eq!(duration_to_ticks(core::time::Duration::from_secs(1)), TICKS_PER_SECOND);
        assert_eq!(duration_to_ticks(core::time::Duration::from_micros(199)), 1);
        assert_eq!(ticks_to_duration(25), core::time::Duration::from_micros(2500));
        assert_eq!(duration_to_ticks(core::time::Duration::MAX), u64::MAX);
    }

    #[test]
    fn clock_is_monotonic() {
        let clock = SessionClock::new();
        let a = clock.now_ticks();
        std::thread::sleep(core::time::Duration::from_millis(2));
        let b = clock.now_ticks();
        assert!(b > a);
    }

    #[test]
    fn hex_dump() {
        assert_eq!(HexDump(&[]).to_string(), "");
        assert_eq!(HexDump(&[0xFF, 0x0A, 0x00]).to_string(), "FF 0A 00");
        assert_eq!(format!("{:?}", HexDump(&[1])), "[01]");
    }

    #[test]
    fn vec_sink_keeps_datagrams_apart() {
        let mut sink: Vec<Vec<u8>> = Vec::new();
        assert!(sink.consume_midi(b"ab"));
        assert!((&mut sink).consume_midi(b"c"));
        assert_eq!(sink, vec![b"ab".to_vec(), b"c".to_vec()]);
        assert!(Discard.consume_midi(b"ignored"));
    }
}
