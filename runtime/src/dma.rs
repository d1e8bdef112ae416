// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! DMA memory regions. The allocator that actually carves these out of a reserved carveout is
//! an external collaborator (spec.md §1); this module only defines the contract (`DmaAllocator`)
//! and the region type returned by it, plus one in-process reference allocator for the crate's
//! own tests and demo binaries.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::Error;

/// A `(cpu_addr, device_addr, size)` triple. `cpu_addr` and `device_addr` refer to the same
/// underlying memory for the region's lifetime; the memory is zeroed on release.
pub struct DmaRegion {
    device_address: u32,
    size: u32,
    cpu_bytes: Mutex<Vec<u8>>,
}

impl DmaRegion {
    fn new(device_address: u32, size: u32) -> Self {
        Self {
            device_address,
            size,
            cpu_bytes: Mutex::new(vec![0u8; size as usize]),
        }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn device_address(&self) -> u32 {
        self.device_address
    }

    /// Copy `data` into the region starting at `offset`. Used both by the CPU side and to
    /// simulate the accelerator writing OFM results back in tests.
    pub fn write_at(&self, offset: usize, data: &[u8]) {
        let mut bytes = self.cpu_bytes.lock().unwrap();
        bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn read_at(&self, offset: usize, len: usize) -> Vec<u8> {
        let bytes = self.cpu_bytes.lock().unwrap();
        bytes[offset..offset + len].to_vec()
    }
}

impl Drop for DmaRegion {
    fn drop(&mut self) {
        if let Ok(mut bytes) = self.cpu_bytes.lock() {
            bytes.iter_mut().for_each(|b| *b = 0);
        }
    }
}

/// External collaborator: the coherent CPU-visible + device-visible memory allocator.
pub trait DmaAllocator: Send + Sync {
    fn alloc(&self, size: u32) -> Result<DmaRegion, Error>;
}

/// A reference `DmaAllocator` backed by ordinary heap memory, with monotonically increasing
/// synthetic device addresses standing in for carveout offsets. Good enough for this crate's
/// own tests and demo binaries; a real deployment plugs in the platform's carveout allocator.
pub struct HeapDmaAllocator {
    next_device_address: AtomicU32,
}

impl HeapDmaAllocator {
    pub fn new() -> Self {
        Self {
            next_device_address: AtomicU32::new(0x1000),
        }
    }
}

impl Default for HeapDmaAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl DmaAllocator for HeapDmaAllocator {
    fn alloc(&self, size: u32) -> Result<DmaRegion, Error> {
        if size == 0 {
            return Err(Error::InvalidArgument);
        }
        let device_address = self
            .next_device_address
            .fetch_add(size.next_multiple_of(64), Ordering::Relaxed);
        Ok(DmaRegion::new(device_address, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_size_is_invalid() {
        let alloc = HeapDmaAllocator::new();
        assert!(matches!(alloc.alloc(0), Err(Error::InvalidArgument)));
    }

    #[test]
    fn distinct_regions_get_distinct_addresses() {
        let alloc = HeapDmaAllocator::new();
        let a = alloc.alloc(64).unwrap();
        let b = alloc.alloc(64).unwrap();
        assert_ne!(a.device_address(), b.device_address());
    }

    #[test]
    fn write_then_read_round_trips() {
        let alloc = HeapDmaAllocator::new();
        let region = alloc.alloc(16).unwrap();
        region.write_at(0, &[1, 2, 3, 4]);
        assert_eq!(region.read_at(0, 4), vec![1, 2, 3, 4]);
    }
}
