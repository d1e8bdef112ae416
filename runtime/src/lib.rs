// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! Host-side runtime for the accelerator's rpmsg protocol: correlation-matched request/response
//! state machines, a fair serialized sender, and the handle types (buffer, network, inference)
//! a device facade is built from. `npu_device` wires this crate's pieces into a user-facing
//! session; this crate has no notion of file descriptors or a particular transport beyond the
//! `Transport`/`DmaAllocator` traits it defines.

mod buffer;
mod cancel;
mod cancel_token;
mod crash;
mod dispatcher;
mod dma;
mod error;
mod inference;
mod mailbox;
mod network;
mod requests;
mod transport;
mod waiter;

pub use buffer::{Buffer, MappedBuffer};
pub use cancel::{cancel_inference, CancelOutcome};
pub use cancel_token::CancelToken;
pub use crash::{CrashReporter, LoggingCrashReporter, SharedCrashReporter};
pub use dispatcher::on_packet;
pub use dma::{DmaAllocator, DmaRegion, HeapDmaAllocator};
pub use error::Error;
pub use inference::{Inference, InferenceSnapshot, InferenceStatus};
pub use mailbox::{Mailbox, RouteOutcome};
pub use network::Network;
pub use requests::{request_capabilities, request_network_info, request_version};
pub use transport::{PipeTransport, SendError, Transport};
pub use waiter::{RequestKind, Waiter};
