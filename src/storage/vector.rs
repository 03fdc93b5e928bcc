#![allow(unsafe_code)]
//! Dense per-node vectors shared by all lanes.
//!
//! Elements are stored as atomics so lanes can scatter into the same vector
//! without locks. Small vectors live on the heap; vectors longer than the
//! out-of-core threshold live in a memory-mapped temporary file.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use memmap2::MmapMut;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::types::{GraphError, Result};

/// An `f32` with atomic load, store and add.
#[repr(transparent)]
#[derive(Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Wraps `v`.
    pub fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    /// Loads the value.
    #[inline]
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    /// Stores `v`.
    #[inline]
    pub fn store(&self, v: f32, order: Ordering) {
        self.0.store(v.to_bits(), order)
    }

    /// Adds `v` with a compare-exchange loop, returning the previous value.
    #[inline]
    pub fn fetch_add(&self, v: f32, order: Ordering) -> f32 {
        let prev = self
            .0
            .fetch_update(order, Ordering::Relaxed, |bits| {
                Some((f32::from_bits(bits) + v).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f32::from_bits(prev)
    }
}

impl fmt::Debug for AtomicF32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}

/// An `f64` with atomic load, store and add.
#[repr(transparent)]
#[derive(Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Wraps `v`.
    pub fn new(v: f64) -> Self {
        Self(AtomicU64::new(v.to_bits()))
    }

    /// Loads the value.
    #[inline]
    pub fn load(&self, order: Ordering) -> f64 {
        f64::from_bits(self.0.load(order))
    }

    /// Stores `v`.
    #[inline]
    pub fn store(&self, v: f64, order: Ordering) {
        self.0.store(v.to_bits(), order)
    }

    /// Adds `v` with a compare-exchange loop, returning the previous value.
    #[inline]
    pub fn fetch_add(&self, v: f64, order: Ordering) -> f64 {
        let prev = self
            .0
            .fetch_update(order, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + v).to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(prev)
    }
}

impl fmt::Debug for AtomicF64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.load(Ordering::Relaxed).fmt(f)
    }
}

/// Scalar types a [`NumericVector`] can hold.
///
/// `Atomic` must have the size, alignment and bit layout of `Self`; mapped
/// vectors reinterpret file bytes as a slice of it.
pub trait Element: Copy + Default + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// Atomic cell holding one element.
    type Atomic: Send + Sync + fmt::Debug;
    /// Encoded width in bytes.
    const WIDTH: usize;

    /// Creates a cell holding `v`.
    fn new_atomic(v: Self) -> Self::Atomic;
    /// Relaxed load.
    fn load(slot: &Self::Atomic) -> Self;
    /// Relaxed store.
    fn store(slot: &Self::Atomic, v: Self);
    /// Appends the little-endian encoding of `self`.
    fn write_le(self, out: &mut Vec<u8>);
    /// Decodes from the first [`Self::WIDTH`] bytes of `src`.
    fn read_le(src: &[u8]) -> Self;
}

/// Floating-point elements with an atomic add.
pub trait FloatElement: Element + Into<f64> {
    /// Nearest representable value.
    fn from_f64(v: f64) -> Self;
    /// Atomically adds `v` to `slot`.
    fn atomic_add(slot: &Self::Atomic, v: Self);
}

impl Element for f32 {
    type Atomic = AtomicF32;
    const WIDTH: usize = 4;

    fn new_atomic(v: Self) -> AtomicF32 {
        AtomicF32::new(v)
    }
    #[inline]
    fn load(slot: &AtomicF32) -> Self {
        slot.load(Ordering::Relaxed)
    }
    #[inline]
    fn store(slot: &AtomicF32, v: Self) {
        slot.store(v, Ordering::Relaxed)
    }
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(src: &[u8]) -> Self {
        f32::from_le_bytes([src[0], src[1], src[2], src[3]])
    }
}

impl FloatElement for f32 {
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    #[inline]
    fn atomic_add(slot: &AtomicF32, v: Self) {
        slot.fetch_add(v, Ordering::Relaxed);
    }
}

impl Element for f64 {
    type Atomic = AtomicF64;
    const WIDTH: usize = 8;

    fn new_atomic(v: Self) -> AtomicF64 {
        AtomicF64::new(v)
    }
    #[inline]
    fn load(slot: &AtomicF64) -> Self {
        slot.load(Ordering::Relaxed)
    }
    #[inline]
    fn store(slot: &AtomicF64, v: Self) {
        slot.store(v, Ordering::Relaxed)
    }
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(src: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&src[..8]);
        f64::from_le_bytes(raw)
    }
}

impl FloatElement for f64 {
    fn from_f64(v: f64) -> Self {
        v
    }
    #[inline]
    fn atomic_add(slot: &AtomicF64, v: Self) {
        slot.fetch_add(v, Ordering::Relaxed);
    }
}

impl Element for u32 {
    type Atomic = AtomicU32;
    const WIDTH: usize = 4;

    fn new_atomic(v: Self) -> AtomicU32 {
        AtomicU32::new(v)
    }
    #[inline]
    fn load(slot: &AtomicU32) -> Self {
        slot.load(Ordering::Relaxed)
    }
    #[inline]
    fn store(slot: &AtomicU32, v: Self) {
        slot.store(v, Ordering::Relaxed)
    }
    fn write_le(self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
    fn read_le(src: &[u8]) -> Self {
        u32::from_le_bytes([src[0], src[1], src[2], src[3]])
    }
}

/// Where a vector's elements live.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorBacking {
    /// Heap allocation.
    Memory,
    /// Memory-mapped temporary file.
    Mapped,
}

/// Controls when vectors move out of core.
#[derive(Clone, Debug)]
pub struct VectorOptions {
    /// Vectors longer than this are file-backed. `0` maps every vector.
    pub out_of_core_threshold: u64,
    /// Directory for temporary backing files; the current directory when unset.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self {
            out_of_core_threshold: u64::MAX,
            scratch_dir: None,
        }
    }
}

impl VectorOptions {
    /// Sets the out-of-core threshold.
    pub fn out_of_core_threshold(mut self, nodes: u64) -> Self {
        self.out_of_core_threshold = nodes;
        self
    }

    /// Sets the scratch directory.
    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    fn backing_for(&self, len: usize) -> VectorBacking {
        if len > 0 && len as u64 > self.out_of_core_threshold {
            VectorBacking::Mapped
        } else {
            VectorBacking::Memory
        }
    }
}

enum Backing<E: Element> {
    Memory(Box<[E::Atomic]>),
    Mapped {
        ptr: NonNull<E::Atomic>,
        map: MmapMut,
        file: NamedTempFile,
    },
}

/// A dense length-`n` vector of atomic elements.
pub struct NumericVector<E: Element> {
    backing: Backing<E>,
    len: usize,
}

// SAFETY: `ptr` points into `map`, which the vector owns and never remaps.
// All access goes through `E::Atomic`, which is `Sync`.
unsafe impl<E: Element> Send for NumericVector<E> {}
// SAFETY: see the `Send` impl above.
unsafe impl<E: Element> Sync for NumericVector<E> {}

impl<E: Element> NumericVector<E> {
    /// Allocates `len` elements set to `E::default()`.
    pub fn new(len: usize, options: &VectorOptions) -> Result<Self> {
        let backing = match options.backing_for(len) {
            VectorBacking::Memory => Backing::Memory(
                (0..len)
                    .map(|_| E::new_atomic(E::default()))
                    .collect::<Vec<_>>()
                    .into_boxed_slice(),
            ),
            VectorBacking::Mapped => Self::map_scratch(len, options)?,
        };
        Ok(Self { backing, len })
    }

    fn map_scratch(len: usize, options: &VectorOptions) -> Result<Backing<E>> {
        debug_assert_eq!(std::mem::size_of::<E::Atomic>(), E::WIDTH);
        let dir = options
            .scratch_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        let bytes = len
            .checked_mul(E::WIDTH)
            .ok_or(GraphError::FormatLimitExceeded {
                what: "vector bytes",
                value: len as u64,
                limit: (usize::MAX / E::WIDTH) as u64,
            })?;
        let file = NamedTempFile::new_in(&dir).map_err(|source| GraphError::open(&dir, source))?;
        file.as_file().set_len(bytes as u64)?;
        // SAFETY: the temp file is private to this vector and sized before
        // mapping; nothing else truncates it while the map is alive.
        let mut map = unsafe { MmapMut::map_mut(file.as_file())? };
        let ptr = NonNull::new(map.as_mut_ptr().cast::<E::Atomic>()).ok_or_else(|| {
            GraphError::Io(std::io::Error::other("mmap returned a null pointer"))
        })?;
        warn!(
            len,
            bytes,
            path = %file.path().display(),
            "vector exceeds out-of-core threshold, using mapped backing"
        );
        Ok(Backing::Mapped { ptr, map, file })
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length vector.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Which backing was chosen.
    pub fn backing(&self) -> VectorBacking {
        match self.backing {
            Backing::Memory(_) => VectorBacking::Memory,
            Backing::Mapped { .. } => VectorBacking::Mapped,
        }
    }

    /// Atomic view of every element.
    #[inline]
    pub fn slots(&self) -> &[E::Atomic] {
        match &self.backing {
            Backing::Memory(slots) => slots,
            // SAFETY: the mapping is page aligned, `len * WIDTH` bytes long,
            // and `E::Atomic` has the layout of `E`. Every byte pattern of the
            // zero-initialised file is a valid element.
            Backing::Mapped { ptr, .. } => unsafe {
                std::slice::from_raw_parts(ptr.as_ptr(), self.len)
            },
        }
    }

    /// Element `i`.
    ///
    /// # Panics
    ///
    /// Panics when `i >= len`.
    #[inline]
    pub fn get(&self, i: usize) -> E {
        E::load(&self.slots()[i])
    }

    /// Sets element `i`.
    ///
    /// # Panics
    ///
    /// Panics when `i >= len`.
    #[inline]
    pub fn set(&self, i: usize, v: E) {
        E::store(&self.slots()[i], v)
    }

    /// Sets every element to `v`.
    pub fn fill(&self, v: E) {
        for slot in self.slots() {
            E::store(slot, v);
        }
    }

    /// Sequential reader starting at element 0.
    pub fn cursor(&self) -> VectorCursor<'_, E> {
        VectorCursor {
            slots: self.slots(),
            pos: 0,
        }
    }

    /// Copies the elements out.
    pub fn to_vec(&self) -> Vec<E> {
        self.cursor().collect()
    }

    /// Writes the elements to `path` as `len` little-endian values.
    ///
    /// A mapped vector is flushed and its temporary file renamed onto `path`;
    /// when the rename is not possible the file is copied instead.
    pub fn persist(self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        match self.backing {
            Backing::Mapped { map, file, .. } if cfg!(target_endian = "little") => {
                map.flush()?;
                drop(map);
                match file.persist(path) {
                    Ok(_) => {}
                    Err(err) => {
                        debug!(path = %path.display(), error = %err.error, "rename failed, copying");
                        std::fs::copy(err.file.path(), path)
                            .map_err(|source| GraphError::open(path, source))?;
                    }
                }
            }
            ref backing => {
                let slots: &[E::Atomic] = match backing {
                    Backing::Memory(slots) => slots,
                    // SAFETY: as in `slots`.
                    Backing::Mapped { ptr, .. } => unsafe {
                        std::slice::from_raw_parts(ptr.as_ptr(), self.len)
                    },
                };
                write_elements::<E>(path, slots)?;
            }
        }
        debug!(path = %path.display(), len = self.len, "vector persisted");
        Ok(())
    }
}

fn write_elements<E: Element>(path: &Path, slots: &[E::Atomic]) -> Result<()> {
    let file = File::create(path).map_err(|source| GraphError::open(path, source))?;
    let mut out = BufWriter::new(file);
    let mut raw = Vec::with_capacity(E::WIDTH);
    for slot in slots {
        raw.clear();
        E::load(slot).write_le(&mut raw);
        out.write_all(&raw)?;
    }
    out.flush()?;
    Ok(())
}

impl<E: Element> fmt::Debug for NumericVector<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumericVector")
            .field("len", &self.len)
            .field("backing", &self.backing())
            .finish()
    }
}

/// Sequential reader over a [`NumericVector`].
#[derive(Debug)]
pub struct VectorCursor<'v, E: Element> {
    slots: &'v [E::Atomic],
    pos: usize,
}

impl<E: Element> VectorCursor<'_, E> {
    /// Returns to element 0.
    pub fn rewind(&mut self) {
        self.pos = 0;
    }

    /// Index of the element `next` will return.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<E: Element> Iterator for VectorCursor<'_, E> {
    type Item = E;

    fn next(&mut self) -> Option<E> {
        let slot = self.slots.get(self.pos)?;
        self.pos += 1;
        Some(E::load(slot))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.slots.len() - self.pos;
        (left, Some(left))
    }
}

impl<E: Element> ExactSizeIterator for VectorCursor<'_, E> {}

/// Reads a persisted vector back into memory.
pub fn read_vector<E: Element>(path: impl AsRef<Path>) -> Result<Vec<E>> {
    let path = path.as_ref();
    let raw = std::fs::read(path).map_err(|source| GraphError::open(path, source))?;
    if raw.len() % E::WIDTH != 0 {
        return Err(GraphError::Corruption(format!(
            "{} is {} bytes, not a multiple of {}",
            path.display(),
            raw.len(),
            E::WIDTH
        )));
    }
    Ok(raw.chunks_exact(E::WIDTH).map(E::read_le).collect())
}
