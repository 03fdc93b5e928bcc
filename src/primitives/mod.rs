//! Low-level primitives for the block storage layer.
//!
//! Includes fixed-width byte codecs and positioned file I/O.

/// Byte-level utilities and encoding/decoding.
///
/// Little-endian word codecs used by graph headers, indexes and records.
pub mod bytes;

/// I/O abstractions and utilities.
///
/// Positioned reads and writes shared across lane and prefetch threads.
pub mod io;
