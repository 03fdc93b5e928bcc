#![forbid(unsafe_code)]
//! Fixed-width little-endian codecs shared by the on-disk formats.

pub mod le {
    //! Little-endian fixed-width integer helpers.

    use core::convert::TryInto;

    /// Width of an encoded `u32`.
    pub const U32_LEN: usize = core::mem::size_of::<u32>();
    /// Width of an encoded `u64`.
    pub const U64_LEN: usize = core::mem::size_of::<u64>();

    /// Writes `v` into the first four bytes of `dst`.
    pub fn put_u32(dst: &mut [u8], v: u32) {
        assert!(dst.len() >= U32_LEN, "destination too small");
        dst[..U32_LEN].copy_from_slice(&v.to_le_bytes());
    }

    /// Writes `v` into the first eight bytes of `dst`.
    pub fn put_u64(dst: &mut [u8], v: u64) {
        assert!(dst.len() >= U64_LEN, "destination too small");
        dst[..U64_LEN].copy_from_slice(&v.to_le_bytes());
    }

    /// Reads a `u32` at byte offset `off`, or `None` when out of range.
    #[inline]
    pub fn get_u32(src: &[u8], off: usize) -> Option<u32> {
        let end = off.checked_add(U32_LEN)?;
        let bytes: [u8; U32_LEN] = src.get(off..end)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Reads a `u64` at byte offset `off`, or `None` when out of range.
    #[inline]
    pub fn get_u64(src: &[u8], off: usize) -> Option<u64> {
        let end = off.checked_add(U64_LEN)?;
        let bytes: [u8; U64_LEN] = src.get(off..end)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Appends `v` to `out`.
    pub fn push_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    /// Appends `v` to `out`.
    pub fn push_u64(out: &mut Vec<u8>, v: u64) {
        out.extend_from_slice(&v.to_le_bytes());
    }
}

pub mod buf {
    //! A slice-backed cursor for parsing fixed headers.

    use core::fmt;

    use super::le;
    use crate::types::{GraphError, Result};

    /// A cursor for reading little-endian words from a slice.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Reads the next `u32`, failing with `what` as context on short input.
        pub fn u32(&mut self, what: &str) -> Result<u32> {
            let v = le::get_u32(self.buf, self.off).ok_or_else(|| short(what))?;
            self.off += le::U32_LEN;
            Ok(v)
        }

        /// Reads the next `u64`, failing with `what` as context on short input.
        pub fn u64(&mut self, what: &str) -> Result<u64> {
            let v = le::get_u64(self.buf, self.off).ok_or_else(|| short(what))?;
            self.off += le::U64_LEN;
            Ok(v)
        }

        /// Returns the number of bytes remaining in the buffer.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    fn short(what: &str) -> GraphError {
        GraphError::Corruption(format!("{what} truncated"))
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
