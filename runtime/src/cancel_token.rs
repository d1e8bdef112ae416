// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! A cooperative stand-in for "the calling task received a signal/interrupt while waiting"
//! (spec.md §5). There's no POSIX task to actually signal in a host library; callers that want
//! `Interrupted` semantics share a `CancelToken` with whatever external code would otherwise
//! kill or signal the waiting task, and set it from there.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// A token that can never be cancelled, for callers that don't care.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
