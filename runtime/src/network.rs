// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::sync::Arc;

use npu_protocol::{BufferRef, NetworkRef};

use crate::dma::{DmaAllocator, DmaRegion};
use crate::Error;

enum NetworkKind {
    UserBuffer(DmaRegion),
    Index(u32),
}

struct NetworkInner {
    kind: NetworkKind,
}

/// A loaded model: either a DMA-resident blob copied in from user memory, or an opaque index
/// into firmware-resident models. Exactly one of the two per the invariant in spec.md §3.
#[derive(Clone)]
pub struct Network(Arc<NetworkInner>);

impl Network {
    /// Copies `data` into a freshly allocated DMA region. Fails with `InvalidArgument` on an
    /// empty payload, `OutOfMemory` on allocation failure.
    pub fn from_user_buffer(alloc: &dyn DmaAllocator, data: &[u8]) -> Result<Self, Error> {
        if data.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let region = alloc.alloc(data.len() as u32)?;
        region.write_at(0, data);
        Ok(Self(Arc::new(NetworkInner {
            kind: NetworkKind::UserBuffer(region),
        })))
    }

    pub fn from_index(index: u32) -> Self {
        Self(Arc::new(NetworkInner {
            kind: NetworkKind::Index(index),
        }))
    }

    pub fn wire_ref(&self) -> NetworkRef {
        match &self.0.kind {
            NetworkKind::UserBuffer(region) => NetworkRef::Buffer(BufferRef {
                device_ptr: region.device_address(),
                size: region.size(),
            }),
            NetworkKind::Index(i) => NetworkRef::Index(*i),
        }
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}
