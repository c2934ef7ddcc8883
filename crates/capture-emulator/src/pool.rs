//! Buffer Pool
//!
//! Fixed set of capture buffers addressed by index. Each buffer owns a byte
//! range in a virtual offset space (fixed when the pool is declared) and,
//! once mapped, an anonymous memory region of exactly its capacity.

use std::ptr::NonNull;
use std::time::Duration;

use memmap2::MmapMut;
use tracing::debug;

use crate::error::DeviceError;

/// One capture buffer
#[derive(Debug)]
pub struct Buffer {
    index: usize,
    length: usize,
    offset: usize,
    bytes_used: usize,
    region: Option<MmapMut>,
    queued: bool,
    sequence: u32,
    timestamp: Duration,
}

impl Buffer {
    fn new(index: usize, length: usize, offset: usize) -> Self {
        Self {
            index,
            length,
            offset,
            bytes_used: 0,
            region: None,
            queued: false,
            sequence: 0,
            timestamp: Duration::ZERO,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Capacity in bytes
    pub fn length(&self) -> usize {
        self.length
    }

    /// Offset callers pass to mmap
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes filled by the last capture
    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }

    pub fn is_mapped(&self) -> bool {
        self.region.is_some()
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    /// Sequence number of the last capture
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Monotonic timestamp of the last capture
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Captured bytes of the last frame
    pub fn data(&self) -> Option<&[u8]> {
        self.region.as_ref().map(|r| &r[..self.bytes_used])
    }

    pub(crate) fn region_mut(&mut self) -> Option<&mut [u8]> {
        self.region.as_mut().map(|r| &mut r[..])
    }

    pub(crate) fn set_queued(&mut self, queued: bool) {
        self.queued = queued;
    }

    pub(crate) fn complete(&mut self, bytes_used: usize, sequence: u32, timestamp: Duration) {
        self.bytes_used = bytes_used;
        self.sequence = sequence;
        self.timestamp = timestamp;
    }

    fn base_addr(&self) -> Option<NonNull<u8>> {
        self.region.as_ref().and_then(|r| NonNull::new(r.as_ptr() as *mut u8))
    }
}

/// A mapped buffer region handed to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub index: usize,
    pub offset: usize,
    pub length: usize,
    addr: NonNull<u8>,
}

impl Mapping {
    /// Base address of the region; valid until the buffer is unmapped or the pool reset
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }
}

/// Fixed-capacity set of capture buffers
#[derive(Debug)]
pub struct BufferPool {
    slots: Vec<Buffer>,
    ceiling: usize,
}

impl BufferPool {
    /// Create an empty pool holding at most `ceiling` buffers
    pub fn new(ceiling: usize) -> Self {
        Self {
            slots: Vec::with_capacity(ceiling),
            ceiling,
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Number of declared buffers
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every buffer and its region
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Reset, then declare `count` buffers of `length` bytes (count clamped to the ceiling)
    pub fn declare(&mut self, count: usize, length: usize) -> usize {
        self.reset();
        let count = count.min(self.ceiling);
        for index in 0..count {
            let offset = index * length;
            debug!("Buffer {}: size={} offset=0x{:x}", index, length, offset);
            self.slots.push(Buffer::new(index, length, offset));
        }
        count
    }

    pub fn get(&self, index: usize) -> Result<&Buffer, DeviceError> {
        self.slots
            .get(index)
            .ok_or_else(|| DeviceError::invalid(format!("buffer index {} out of range (count={})", index, self.len())))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<&mut Buffer, DeviceError> {
        let count = self.len();
        self.slots
            .get_mut(index)
            .ok_or_else(|| DeviceError::invalid(format!("buffer index {} out of range (count={})", index, count)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Buffer> {
        self.slots.iter()
    }

    /// Index of the buffer at `offset`, checking the requested length
    pub fn find_by_offset(&self, offset: usize, length: usize) -> Result<usize, DeviceError> {
        let buffer = self
            .slots
            .iter()
            .find(|b| b.offset == offset)
            .ok_or_else(|| DeviceError::invalid(format!("no buffer at offset 0x{:x}", offset)))?;

        if buffer.length != length {
            return Err(DeviceError::invalid(format!(
                "buffer {} size mismatch (expected {}, got {})",
                buffer.index, buffer.length, length
            )));
        }
        Ok(buffer.index)
    }

    /// Map the region for `index`, allocating it on first use
    pub fn allocate_region(&mut self, index: usize) -> Result<Mapping, DeviceError> {
        let buffer = self.get_mut(index)?;
        if buffer.region.is_none() {
            debug!("Allocating buffer {} of size {}", index, buffer.length);
            buffer.region = Some(MmapMut::map_anon(buffer.length)?);
        }

        let addr = buffer
            .base_addr()
            .ok_or_else(|| DeviceError::Io(format!("buffer {} has no region", index)))?;
        Ok(Mapping {
            index,
            offset: buffer.offset,
            length: buffer.length,
            addr,
        })
    }

    /// Release the region for `index`; queued buffers keep theirs
    pub fn release_region(&mut self, index: usize) -> Result<(), DeviceError> {
        let buffer = self.get_mut(index)?;
        if buffer.region.is_none() {
            return Err(DeviceError::invalid(format!("buffer {} is not mapped", index)));
        }
        if buffer.queued {
            return Err(DeviceError::invalid(format!("buffer {} is queued, cannot unmap", index)));
        }
        buffer.region = None;
        debug!("Unmapped buffer {}", index);
        Ok(())
    }

    /// Index of the buffer whose region starts at `addr`
    pub fn index_for_address(&self, addr: *const u8) -> Option<usize> {
        self.slots
            .iter()
            .find(|b| b.base_addr().map(|p| p.as_ptr() as *const u8) == Some(addr))
            .map(|b| b.index)
    }
}
