// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The rpmsg transport: reliable, ordered, length-preserving delivery of opaque byte packets,
//! plus a finite pool of outbound transmit slots. This is an external collaborator (spec.md
//! §1); the crate only defines the contract and one in-process reference implementation for
//! its own tests and demo binaries.

use std::io::Write;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use npu_protocol::pipe::Endpoint;

/// The distinguished "no slot available" outcome a real transport's `try_send` must report.
pub enum SendError {
    NoSlot,
    Fatal(String),
}

pub trait Transport: Send + Sync {
    /// Attempt to send one complete packet without blocking. `Err(SendError::NoSlot)` means the
    /// transmit-slot pool is momentarily exhausted and the caller should retry; any other error
    /// is a hard failure.
    fn try_send(&self, bytes: &[u8]) -> Result<(), SendError>;
}

/// A reference transport backed by an in-process datagram pipe (see `npu_protocol::pipe`),
/// with a configurable transmit-slot budget that refills via `release_slot`. Used by this
/// crate's own tests and by `npu_device`'s demo binaries in place of the real rpmsg endpoint.
pub struct PipeTransport {
    endpoint: Mutex<Endpoint>,
    slots: AtomicI64,
}

impl PipeTransport {
    pub fn new(endpoint: Endpoint, slots: i64) -> Self {
        Self {
            endpoint: Mutex::new(endpoint),
            slots: AtomicI64::new(slots),
        }
    }

    /// Simulates a transmit slot freeing up (e.g. because the firmware drained its queue).
    pub fn release_slot(&self) {
        self.slots.fetch_add(1, Ordering::SeqCst);
    }
}

impl Transport for PipeTransport {
    fn try_send(&self, bytes: &[u8]) -> Result<(), SendError> {
        if self
            .slots
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| {
                if s > 0 {
                    Some(s - 1)
                } else {
                    None
                }
            })
            .is_err()
        {
            return Err(SendError::NoSlot);
        }

        let mut endpoint = self.endpoint.lock().unwrap();
        endpoint
            .write_all(bytes)
            .map_err(|e| SendError::Fatal(e.to_string()))
    }
}
