//! All session commands exchanged between peers.
//!
//! Every command shares the same four byte header: the
//! [`COMMAND_SIGNATURE`](crate::COMMAND_SIGNATURE) followed by a big-endian
//! [`CommandCode`]. The body layout depends on the code:
//!
//! | code | body |
//! |---|---|
//! | `IN`, `OK` | protocol `u32`, initiator token `u32`, SSRC `u32`, NUL-terminated name |
//! | `NO`, `BY` | protocol `u32`, initiator token `u32`, SSRC `u32` |
//! | `CK` | SSRC `u32`, count `u8`, 3 bytes padding, three `u64` timestamps |
//! | `RS` | SSRC `u32`, sequence number `u16`, 2 reserved bytes |
//!
//! Decoders read the body from a [`ParseBuffer`] positioned right after the
//! command code, so callers that already consumed the header can dispatch on
//! the code themselves.

use crate::{COMMAND_SIGNATURE, Error, MAX_DATAGRAM_SIZE, ParseBuffer};
use serde::{Deserialize, Serialize};

/// A buffer large enough to hold any single datagram.
pub type Datagram = arrayvec::ArrayVec<u8, MAX_DATAGRAM_SIZE>;

/// The 16-bit code identifying a command. Each value spells two ASCII letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CommandCode {
    /// `IN`: a request to open a session.
    Invitation = 0x494E,
    /// `OK`: the invitation was accepted.
    Accept = 0x4F4B,
    /// `NO`: the invitation was rejected.
    Reject = 0x4E4F,
    /// `BY`: the session is over.
    EndSession = 0x4259,
    /// `CK`: one step of the three-way clock synchronization.
    ClockSync = 0x434B,
    /// `RS`: the receiver acknowledges payload up to a sequence number.
    ReceiverFeedback = 0x5253,
}

impl CommandCode {
    #[inline(always)]
    pub const fn from_u16(code: u16) -> Option<Self> {
        Some(match code {
            0x494E => Self::Invitation,
            0x4F4B => Self::Accept,
            0x4E4F => Self::Reject,
            0x4259 => Self::EndSession,
            0x434B => Self::ClockSync,
            0x5253 => Self::ReceiverFeedback,
            _ => return None,
        })
    }

    #[inline(always)]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// The two letter mnemonic used by the protocol, e.g. `"OK"`.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Invitation => "IN",
            Self::Accept => "OK",
            Self::Reject => "NO",
            Self::EndSession => "BY",
            Self::ClockSync => "CK",
            Self::ReceiverFeedback => "RS",
        }
    }
}

impl TryFrom<u16> for CommandCode {
    type Error = Error;

    #[inline(always)]
    fn try_from(code: u16) -> Result<Self, Error> {
        Self::from_u16(code).ok_or(Error::UnknownCommand(code))
    }
}

impl core::fmt::Display for CommandCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[inline(always)]
fn put(out: &mut Datagram, bytes: &[u8]) -> Result<(), Error> {
    out.try_extend_from_slice(bytes).map_err(|_| Error::Overflow)
}

#[inline(always)]
fn put_header(out: &mut Datagram, code: CommandCode) -> Result<(), Error> {
    put(out, &COMMAND_SIGNATURE)?;
    put(out, &code.as_u16().to_be_bytes())
}

/// Body of `IN` and `OK` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handshake<'a> {
    /// Protocol version of the sender, always [`PROTOCOL_VERSION`](crate::PROTOCOL_VERSION)
    /// for compliant peers.
    pub protocol: u32,
    /// Token chosen by the inviting side and echoed back in the answer.
    pub initiator_id: u32,
    /// SSRC of the sender.
    pub ssrc: u32,
    /// Human readable name of the sender.
    #[serde(borrow)]
    pub name: &'a str,
}

impl<'a> Handshake<'a> {
    pub fn decode(buf: &mut ParseBuffer<'a>) -> Result<Self, Error> {
        let protocol = buf.read_uint32()?;
        let initiator_id = buf.read_uint32()?;
        let ssrc = buf.read_uint32()?;
        let name = core::str::from_utf8(buf.read_str0()?).map_err(|_| Error::InvalidName)?;

        Ok(Self {
            protocol,
            initiator_id,
            ssrc,
            name,
        })
    }

    fn emit_body(&self, out: &mut Datagram) -> Result<(), Error> {
        if self.name.contains('\0') {
            return Err(Error::InvalidName);
        }

        put(out, &self.protocol.to_be_bytes())?;
        put(out, &self.initiator_id.to_be_bytes())?;
        put(out, &self.ssrc.to_be_bytes())?;
        put(out, self.name.as_bytes())?;
        put(out, &[0])
    }
}

/// Body of `NO` and `BY` commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Termination {
    pub protocol: u32,
    pub initiator_id: u32,
    pub ssrc: u32,
}

impl Termination {
    /// Decodes the fixed part. Anything after it (some implementations append
    /// their name) is ignored.
    pub fn decode(buf: &mut ParseBuffer<'_>) -> Result<Self, Error> {
        Ok(Self {
            protocol: buf.read_uint32()?,
            initiator_id: buf.read_uint32()?,
            ssrc: buf.read_uint32()?,
        })
    }

    fn emit_body(&self, out: &mut Datagram) -> Result<(), Error> {
        put(out, &self.protocol.to_be_bytes())?;
        put(out, &self.initiator_id.to_be_bytes())?;
        put(out, &self.ssrc.to_be_bytes())
    }
}

/// Body of a `CK` command.
///
/// The initiator sends `count == 0` with its time in `timestamps[0]`, the
/// responder answers with `count == 1` adding its own time in `timestamps[1]`,
/// and the initiator closes with `count == 2` and `timestamps[2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClockSync {
    pub ssrc: u32,
    pub count: u8,
    pub timestamps: [u64; 3],
}

impl ClockSync {
    /// Highest valid value of [`count`](Self::count).
    pub const LAST_COUNT: u8 = 2;

    pub fn decode(buf: &mut ParseBuffer<'_>) -> Result<Self, Error> {
        let ssrc = buf.read_uint32()?;
        let count = buf.read_uint8()?;
        buf.skip(3)?;

        let timestamps = [buf.read_uint64()?, buf.read_uint64()?, buf.read_uint64()?];

        if count > Self::LAST_COUNT {
            return Err(Error::InvalidField);
        }

        Ok(Self {
            ssrc,
            count,
            timestamps,
        })
    }

    fn emit_body(&self, out: &mut Datagram) -> Result<(), Error> {
        if self.count > Self::LAST_COUNT {
            return Err(Error::InvalidField);
        }

        put(out, &self.ssrc.to_be_bytes())?;
        put(out, &[self.count, 0, 0, 0])?;
        for ts in self.timestamps {
            put(out, &ts.to_be_bytes())?;
        }
        Ok(())
    }
}

/// Body of an `RS` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiverFeedback {
    pub ssrc: u32,
    pub sequence: u16,
}

impl ReceiverFeedback {
    pub fn decode(buf: &mut ParseBuffer<'_>) -> Result<Self, Error> {
        let ssrc = buf.read_uint32()?;
        let sequence = buf.read_uint16()?;
        // reserved
        buf.skip(2)?;

        Ok(Self { ssrc, sequence })
    }

    fn emit_body(&self, out: &mut Datagram) -> Result<(), Error> {
        put(out, &self.ssrc.to_be_bytes())?;
        put(out, &self.sequence.to_be_bytes())?;
        put(out, &[0, 0])
    }
}

/// Any session command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command<'a> {
    Invitation(#[serde(borrow)] Handshake<'a>),
    Accept(#[serde(borrow)] Handshake<'a>),
    Reject(Termination),
    EndSession(Termination),
    ClockSync(ClockSync),
    ReceiverFeedback(ReceiverFeedback),
}

impl<'a> Command<'a> {
    #[inline]
    pub const fn code(&self) -> CommandCode {
        match self {
            Self::Invitation(_) => CommandCode::Invitation,
            Self::Accept(_) => CommandCode::Accept,
            Self::Reject(_) => CommandCode::Reject,
            Self::EndSession(_) => CommandCode::EndSession,
            Self::ClockSync(_) => CommandCode::ClockSync,
            Self::ReceiverFeedback(_) => CommandCode::ReceiverFeedback,
        }
    }

    /// Decodes the body of a command whose code was already read.
    pub fn decode_body(code: CommandCode, buf: &mut ParseBuffer<'a>) -> Result<Self, Error> {
        Ok(match code {
            CommandCode::Invitation => Self::Invitation(Handshake::decode(buf)?),
            CommandCode::Accept => Self::Accept(Handshake::decode(buf)?),
            CommandCode::Reject => Self::Reject(Termination::decode(buf)?),
            CommandCode::EndSession => Self::EndSession(Termination::decode(buf)?),
            CommandCode::ClockSync => Self::ClockSync(ClockSync::decode(buf)?),
            CommandCode::ReceiverFeedback => Self::ReceiverFeedback(ReceiverFeedback::decode(buf)?),
        })
    }

    /// Decodes a whole datagram, header included.
    ///
    /// This does not apply the minimum length rule of
    /// [`is_command`](crate::is_command), it only requires the datagram to be
    /// long enough for the fields it reads.
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        let mut buf = ParseBuffer::new(data);

        if buf.read_uint16()?.to_be_bytes() != COMMAND_SIGNATURE {
            return Err(Error::MissingSignature);
        }

        let code = CommandCode::try_from(buf.read_uint16()?)?;
        Self::decode_body(code, &mut buf)
    }

    /// Appends the encoded command, header included, to `out`.
    ///
    /// On error, `out` may contain a partially encoded command.
    pub fn emit(&self, out: &mut Datagram) -> Result<(), Error> {
        put_header(out, self.code())?;

        match self {
            Self::Invitation(h) | Self::Accept(h) => h.emit_body(out),
            Self::Reject(t) | Self::EndSession(t) => t.emit_body(out),
            Self::ClockSync(ck) => ck.emit_body(out),
            Self::ReceiverFeedback(rs) => rs.emit_body(out),
        }
    }

    /// Encodes the command into a fresh [`Datagram`].
    #[inline]
    pub fn to_datagram(&self) -> Result<Datagram, Error> {
        let mut out = Datagram::new();
        self.emit(&mut out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MIN_COMMAND_LEN, PROTOCOL_VERSION, is_command};

    fn accept(name: &str) -> Command<'_> {
        Command::Accept(Handshake {
            protocol: PROTOCOL_VERSION,
            initiator_id: 0xCAFE_BABE,
            ssrc: 0x1234_5678,
            name,
        })
    }

    #[test]
    fn accept_layout() {
        let dgram = accept("Remote").to_datagram().unwrap();

        assert_eq!(
            dgram.as_slice(),
            b"\xFF\xFFOK\x00\x00\x00\x02\xCA\xFE\xBA\xBE\x12\x34\x56\x78Remote\0"
        );
        assert!(is_command(&dgram));
        assert_eq!(Command::parse(&dgram), Ok(accept("Remote")));
    }

    #[test]
    fn codes_spell_their_mnemonic() {
        for code in [
            CommandCode::Invitation,
            CommandCode::Accept,
            CommandCode::Reject,
            CommandCode::EndSession,
            CommandCode::ClockSync,
            CommandCode::ReceiverFeedback,
        ] {
            assert_eq!(&code.as_u16().to_be_bytes(), code.mnemonic().as_bytes());
            assert_eq!(CommandCode::from_u16(code.as_u16()), Some(code));
        }

        assert_eq!(CommandCode::try_from(0x1234), Err(Error::UnknownCommand(0x1234)));
    }

    #[test]
    fn termination_is_exactly_minimum_length() {
        let by = Command::EndSession(Termination {
            protocol: PROTOCOL_VERSION,
            initiator_id: 7,
            ssrc: 9,
        });
        let dgram = by.to_datagram().unwrap();

        assert_eq!(dgram.len(), MIN_COMMAND_LEN);
        assert_eq!(Command::parse(&dgram), Ok(by));
    }

    #[test]
    fn clock_sync_layout() {
        let ck = Command::ClockSync(ClockSync {
            ssrc: 0xAABB_CCDD,
            count: 1,
            timestamps: [1, 2, u64::MAX],
        });
        let dgram = ck.to_datagram().unwrap();

        assert_eq!(dgram.len(), 36);
        assert_eq!(&dgram[4..12], &[0xAA, 0xBB, 0xCC, 0xDD, 1, 0, 0, 0]);
        assert_eq!(Command::parse(&dgram), Ok(ck));
    }

    #[test]
    fn clock_sync_count_is_bounded() {
        let mut dgram = Command::ClockSync(ClockSync {
            ssrc: 1,
            count: 2,
            timestamps: [0; 3],
        })
        .to_datagram()
        .unwrap();

        dgram[8] = 3;
        assert_eq!(Command::parse(&dgram), Err(Error::InvalidField));
    }

    #[test]
    fn receiver_feedback_is_short() {
        let rs = Command::ReceiverFeedback(ReceiverFeedback {
            ssrc: 5,
            sequence: 0x0102,
        });
        let dgram = rs.to_datagram().unwrap();

        assert_eq!(dgram.len(), 12);
        // too short to ever be framed as a command
        assert!(!is_command(&dgram));
        assert_eq!(Command::parse(&dgram), Ok(rs));
    }

    #[test]
    fn truncated_fields() {
        let dgram = accept("Remote").to_datagram().unwrap();

        // exactly the fixed part, no name at all
        assert_eq!(Command::parse(&dgram[..16]), Err(Error::OutOfBounds));
        // name without terminator
        assert_eq!(Command::parse(&dgram[..dgram.len() - 1]), Err(Error::OutOfBounds));
        // missing the SSRC
        assert_eq!(Command::parse(&dgram[..12]), Err(Error::OutOfBounds));
    }

    #[test]
    fn signature_and_code_are_checked() {
        let mut dgram = accept("x").to_datagram().unwrap();
        dgram[2..4].copy_from_slice(&0x5858u16.to_be_bytes());
        assert_eq!(Command::parse(&dgram), Err(Error::UnknownCommand(0x5858)));

        dgram[0] = 0x80;
        assert_eq!(Command::parse(&dgram), Err(Error::MissingSignature));
    }

    #[test]
    fn names_must_be_utf8_without_nul() {
        let mut dgram = accept("ab").to_datagram().unwrap();
        let at = dgram.len() - 2;
        dgram[at] = 0xFF;
        assert_eq!(Command::parse(&dgram), Err(Error::InvalidName));

        assert_eq!(accept("a\0b").to_datagram(), Err(Error::InvalidName));
    }

    #[test]
    fn oversized_name() {
        let name = "n".repeat(MAX_DATAGRAM_SIZE);
        assert_eq!(accept(&name).to_datagram(), Err(Error::Overflow));

        // largest name that still fits, terminator included
        let name = "n".repeat(MAX_DATAGRAM_SIZE - 17);
        assert_eq!(accept(&name).to_datagram().map(|d| d.len()), Ok(MAX_DATAGRAM_SIZE));
    }
}
