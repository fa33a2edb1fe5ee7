//! # Binary Codec
//!
//! Every ledger entity has a single, deterministic byte layout. Multi-byte
//! integers are big-endian, digests are 32 raw bytes, and there is no
//! padding between fields.
//!
//! ## Contract
//!
//! ```text
//! encode(x)            -> bytes          (deterministic)
//! decode(bytes)        -> (x, rest)      (consumes exactly x's size)
//! encoded_size(x)      == encode(x).len()
//! decode(encode(x)).0  == x
//! ```
//!
//! Decoding goes through [`Reader`], which checks the remaining length
//! before every read. A short buffer produces
//! [`LedgerError::TruncatedInput`], never a panic.

use bytes::Buf;

use crate::config::HASH_LENGTH;
use crate::crypto::hash::Digest;
use crate::error::{LedgerError, Result};

// ---------------------------------------------------------------------------
// BinaryCodec
// ---------------------------------------------------------------------------

/// The encode/decode/size protocol shared by every wire entity.
pub trait BinaryCodec {
    /// Append this entity's encoding to `buf`.
    fn encode_into(&self, buf: &mut Vec<u8>);

    /// Decode one entity from the front of `input`, returning it together
    /// with the bytes that follow it.
    fn decode(input: &[u8]) -> Result<(Self, &[u8])>
    where
        Self: Sized;

    /// Exact length of [`BinaryCodec::encode`]'s output.
    fn encoded_size(&self) -> usize;

    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        self.encode_into(&mut buf);
        buf
    }
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Bounds-checked big-endian cursor over a byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    input: &'a [u8],
    consumed: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, consumed: 0 }
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.input.remaining()
    }

    /// Bytes read so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    /// Fail with `TruncatedInput` unless `needed` bytes are left.
    pub fn ensure(&self, needed: usize) -> Result<()> {
        let remaining = self.input.remaining();
        if remaining < needed {
            return Err(LedgerError::TruncatedInput { needed, remaining });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        self.consumed += 1;
        Ok(self.input.get_u8())
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        self.consumed += 2;
        Ok(self.input.get_u16())
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        self.consumed += 4;
        Ok(self.input.get_u32())
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        self.consumed += 8;
        Ok(self.input.get_u64())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8)?;
        self.consumed += 8;
        Ok(self.input.get_i64())
    }

    pub fn read_digest(&mut self) -> Result<Digest> {
        let bytes = self.read_bytes(HASH_LENGTH)?;
        let mut array = [0u8; HASH_LENGTH];
        array.copy_from_slice(bytes);
        Ok(Digest::new(array))
    }

    /// Borrow the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        self.consumed += len;
        Ok(head)
    }

    /// Decode a nested entity and advance past it.
    pub fn read_decoded<T: BinaryCodec>(&mut self) -> Result<T> {
        let before = self.input.len();
        let (value, rest) = T::decode(self.input)?;
        self.consumed += before - rest.len();
        self.input = rest;
        Ok(value)
    }

    /// Hand back everything that has not been read.
    pub fn into_rest(self) -> &'a [u8] {
        self.input
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn reads_big_endian_fields_in_order() {
        let mut buf = Vec::new();
        buf.put_u8(0xAB);
        buf.put_u16(0x0102);
        buf.put_u32(0x0304_0506);
        buf.put_u64(0x0708_090A_0B0C_0D0E);
        buf.put_i64(-2);
        buf.put_slice(&[0x55; 32]);
        buf.put_slice(b"tail");

        let mut reader = Reader::new(&buf);
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0x0304_0506);
        assert_eq!(reader.read_u64().unwrap(), 0x0708_090A_0B0C_0D0E);
        assert_eq!(reader.read_i64().unwrap(), -2);
        assert_eq!(reader.read_digest().unwrap(), Digest::new([0x55; 32]));
        assert_eq!(reader.consumed(), 1 + 2 + 4 + 8 + 8 + 32);
        assert_eq!(reader.into_rest(), b"tail");
    }

    #[test]
    fn short_reads_report_truncation() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert_eq!(
            reader.read_u32().unwrap_err(),
            LedgerError::TruncatedInput {
                needed: 4,
                remaining: 3
            }
        );
        // A failed read consumes nothing.
        assert_eq!(reader.remaining(), 3);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert!(reader.read_u16().is_err());
        assert!(reader.read_digest().is_err());
    }

    #[test]
    fn read_bytes_borrows_from_input() {
        let data = [9u8, 8, 7, 6];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.read_bytes(0).unwrap(), &[] as &[u8]);
        assert_eq!(reader.read_bytes(3).unwrap(), &[9, 8, 7]);
        assert_eq!(
            reader.read_bytes(2).unwrap_err(),
            LedgerError::TruncatedInput {
                needed: 2,
                remaining: 1
            }
        );
    }

    #[test]
    fn read_decoded_advances_past_nested_entity() {
        let mut buf = Digest::new([3u8; 32]).encode();
        buf.push(0xFF);
        let mut reader = Reader::new(&buf);
        let digest: Digest = reader.read_decoded().unwrap();
        assert_eq!(digest, Digest::new([3u8; 32]));
        assert_eq!(reader.consumed(), 32);
        assert_eq!(reader.read_u8().unwrap(), 0xFF);
    }
}
