// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Buffer handles: reference-counted user-visible memory objects wrapping one DMA region.
//! "get"/"put" from the specification are `Clone`/`Drop` on an `Arc` — Rust's own atomic
//! refcounting already gives the "no lock needed on already-held references" property §5 asks
//! for, and the last `Drop` triggers `DmaRegion`'s own zero-and-release.

use std::sync::Arc;

use npu_protocol::BufferRef;

use crate::dma::{DmaAllocator, DmaRegion};
use crate::Error;

struct BufferInner {
    region: DmaRegion,
}

#[derive(Clone)]
pub struct Buffer(Arc<BufferInner>);

impl Buffer {
    pub fn create(alloc: &dyn DmaAllocator, size: u32) -> Result<Self, Error> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        let region = alloc.alloc(size)?;
        Ok(Self(Arc::new(BufferInner { region })))
    }

    pub fn size(&self) -> u64 {
        self.0.region.size() as u64
    }

    pub fn wire_ref(&self) -> BufferRef {
        BufferRef {
            device_ptr: self.0.region.device_address(),
            size: self.0.region.size(),
        }
    }

    /// Map a window of this buffer's CPU-visible pages. `offset + len` must fit within the
    /// region; out-of-range windows are a caller bug, not a recoverable error, matching the
    /// teacher's own array-indexing panics on malformed input.
    pub fn map(&self, offset: usize, len: usize) -> MappedBuffer {
        assert!(
            offset + len <= self.0.region.size() as usize,
            "map window out of range"
        );
        MappedBuffer {
            buffer: self.clone(),
            offset,
            len,
        }
    }

    /// Number of outstanding handles to this buffer (refcount conservation, spec.md §8).
    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// A live view into a buffer's CPU-visible pages, sharing contents with any accelerator access.
pub struct MappedBuffer {
    buffer: Buffer,
    offset: usize,
    len: usize,
}

impl MappedBuffer {
    pub fn read(&self) -> Vec<u8> {
        self.buffer.0.region.read_at(self.offset, self.len)
    }

    pub fn write(&self, data: &[u8]) {
        assert_eq!(data.len(), self.len, "write must cover the whole window");
        self.buffer.0.region.write_at(self.offset, data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::HeapDmaAllocator;

    #[test]
    fn create_rejects_zero_size() {
        let alloc = HeapDmaAllocator::new();
        assert!(matches!(Buffer::create(&alloc, 0), Err(Error::InvalidArgument)));
    }

    #[test]
    fn refcount_tracks_clones() {
        let alloc = HeapDmaAllocator::new();
        let a = Buffer::create(&alloc, 64).unwrap();
        assert_eq!(a.strong_count(), 1);
        let b = a.clone();
        assert_eq!(a.strong_count(), 2);
        drop(b);
        assert_eq!(a.strong_count(), 1);
    }

    #[test]
    fn map_round_trips_bytes() {
        let alloc = HeapDmaAllocator::new();
        let buf = Buffer::create(&alloc, 256).unwrap();
        let view = buf.map(0, 4);
        view.write(&[9, 9, 9, 9]);
        assert_eq!(view.read(), vec![9, 9, 9, 9]);
    }
}
