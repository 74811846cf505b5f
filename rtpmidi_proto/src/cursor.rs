//! Bounds-checked read cursor over a received datagram.

use crate::Error;

/// A read cursor over a fixed byte buffer.
///
/// All multi-byte reads are big-endian (network order). Every read checks the
/// remaining length first and fails with [`Error::OutOfBounds`] without moving
/// the cursor if the buffer is too short.
///
/// The underlying buffer is never mutated.
#[derive(Debug, Clone)]
pub struct ParseBuffer<'a> {
    data: &'a [u8],
    pos: usize,
    // invariant: pos <= data.len()
}

impl<'a> ParseBuffer<'a> {
    /// Creates a cursor positioned at the first byte of `data`.
    #[inline(always)]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// The whole underlying buffer, regardless of the cursor position.
    #[inline(always)]
    pub const fn start(&self) -> &'a [u8] {
        self.data
    }

    /// Total length of the underlying buffer.
    #[inline(always)]
    pub const fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of bytes already consumed.
    #[inline(always)]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// The bytes not consumed yet.
    #[inline(always)]
    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    #[inline(always)]
    fn take<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let (&bytes, _rem) = self.remaining().split_first_chunk().ok_or(Error::OutOfBounds)?;
        self.pos += N;
        Ok(bytes)
    }

    /// Advances the cursor by `n` bytes without interpreting them.
    #[inline]
    pub fn skip(&mut self, n: usize) -> Result<(), Error> {
        if self.remaining().len() < n {
            return Err(Error::OutOfBounds);
        }
        self.pos += n;
        Ok(())
    }

    #[inline]
    pub fn read_uint8(&mut self) -> Result<u8, Error> {
        self.take().map(u8::from_be_bytes)
    }

    #[inline]
    pub fn read_uint16(&mut self) -> Result<u16, Error> {
        self.take().map(u16::from_be_bytes)
    }

    #[inline]
    pub fn read_uint32(&mut self) -> Result<u32, Error> {
        self.take().map(u32::from_be_bytes)
    }

    #[inline]
    pub fn read_uint64(&mut self) -> Result<u64, Error> {
        self.take().map(u64::from_be_bytes)
    }

    /// Reads a null-terminated string, advancing past the terminator.
    ///
    /// The returned bytes do not include the terminator. Fails with
    /// [`Error::OutOfBounds`] if no terminator is found before the end of the
    /// buffer, in which case the cursor does not move.
    pub fn read_str0(&mut self) -> Result<&'a [u8], Error> {
        let rem = self.remaining();
        let len = rem.iter().position(|&b| b == 0).ok_or(Error::OutOfBounds)?;
        self.pos += len + 1;
        Ok(&rem[..len])
    }
}
