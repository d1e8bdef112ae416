// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

/// Error kinds a caller of the facade can observe, per the specification's error design.
#[derive(Debug)]
pub enum Error {
    InvalidArgument,
    OutOfMemory,
    /// Bad user pointer/length, or an `unwind` failure partway through acquiring resources.
    Faulted,
    /// The mailbox has been shut down (firmware crashed, or the device is tearing down).
    NoDevice,
    /// The calling task's cancel token was set while it was waiting.
    Interrupted,
    /// A wait exceeded its bound; fatal for the whole device.
    Timeout,
    /// A malformed wire packet (bad magic, wrong length).
    BadMessage(String),
    /// An unexpected message type, or a version mismatch.
    ProtocolError(String),
    /// Firmware reported a network-info failure.
    BadFile,
    /// FD_MAX exceeded.
    TooManyFiles,
    /// A fixed-size string field wasn't NUL-terminated.
    MessageTooLong,
    /// The underlying transport returned a hard I/O error.
    Io(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Faulted => write!(f, "faulted"),
            Self::NoDevice => write!(f, "no device"),
            Self::Interrupted => write!(f, "interrupted"),
            Self::Timeout => write!(f, "timeout"),
            Self::BadMessage(s) => write!(f, "bad message: {s}"),
            Self::ProtocolError(s) => write!(f, "protocol error: {s}"),
            Self::BadFile => write!(f, "bad file"),
            Self::TooManyFiles => write!(f, "too many files"),
            Self::MessageTooLong => write!(f, "message too long"),
            Self::Io(s) => write!(f, "I/O error: {s}"),
        }
    }
}

impl From<npu_protocol::Error> for Error {
    fn from(e: npu_protocol::Error) -> Self {
        match e {
            npu_protocol::Error::BadMessage(s) => Self::BadMessage(s),
            npu_protocol::Error::ProtocolError(s) => Self::ProtocolError(s),
        }
    }
}
