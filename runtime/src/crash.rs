// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! External collaborator: reports a device-wide fatal firmware condition. Recovery (restarting
//! the remote processor) lives outside this crate; calling `report` is what sets that in
//! motion. Triggered by an `ERR` packet, a request timeout, or a cancel-inference that couldn't
//! be confirmed.

use std::sync::Arc;

pub trait CrashReporter: Send + Sync {
    fn report(&self, reason: &str);
}

pub type SharedCrashReporter = Arc<dyn CrashReporter>;

/// A reference reporter that only logs, for tests and demo binaries that don't drive a real
/// remote-processor lifecycle.
pub struct LoggingCrashReporter;

impl CrashReporter for LoggingCrashReporter {
    fn report(&self, reason: &str) {
        log::error!("firmware crash reported: {reason}");
    }
}
