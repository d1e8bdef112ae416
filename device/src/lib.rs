// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The device facade: the outward-facing operation surface built on top of `npu_runtime`.
//! `Device::open` performs the startup handshake (mailbox construction, protocol version check,
//! then a capabilities query) before returning anything a caller can use; a handshake failure
//! fails `open` itself rather than handing back a facade whose first real call discovers the
//! problem.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use log::info;

use npu_protocol::{CapabilitiesRsp, Message, NetworkInfoRsp, VersionRsp, PMU_MAX};
use npu_runtime::{
    cancel_inference, on_packet, request_capabilities, request_network_info, request_version,
    Buffer, CancelOutcome, CancelToken, DmaAllocator, Error, Inference, InferenceSnapshot,
    Mailbox, Network, SharedCrashReporter, Transport,
};

const MAX_MINORS: usize = 256;
const PING_MIN_INTERVAL: Duration = Duration::from_millis(500);

static MINOR_TABLE: OnceLock<Mutex<[bool; MAX_MINORS]>> = OnceLock::new();

fn minor_table() -> &'static Mutex<[bool; MAX_MINORS]> {
    MINOR_TABLE.get_or_init(|| Mutex::new([false; MAX_MINORS]))
}

/// Claim the next free minor number. A single process-wide lock over a fixed-size bitmap, the
/// same shape as a program-to-port registry: whichever slot is first free gets claimed.
fn allocate_minor() -> Result<u32, Error> {
    let mut table = minor_table().lock().unwrap();
    match table.iter().position(|used| !*used) {
        Some(i) => {
            table[i] = true;
            Ok(i as u32)
        }
        None => Err(Error::OutOfMemory),
    }
}

fn release_minor(minor: u32) {
    let mut table = minor_table().lock().unwrap();
    if let Some(slot) = table.get_mut(minor as usize) {
        *slot = false;
    }
}

/// One open session against the accelerator.
pub struct Device {
    mailbox: Arc<Mailbox>,
    dma_alloc: Arc<dyn DmaAllocator>,
    crash_reporter: SharedCrashReporter,
    version: VersionRsp,
    capabilities: CapabilitiesRsp,
    minor: u32,
    last_ping: Mutex<Option<Instant>>,
    closed: AtomicBool,
}

impl Device {
    pub fn open(
        transport: Arc<dyn Transport>,
        dma_alloc: Arc<dyn DmaAllocator>,
        crash_reporter: SharedCrashReporter,
    ) -> Result<Self, Error> {
        let minor = allocate_minor()?;
        let mailbox = Arc::new(Mailbox::new(transport));
        let cancel = CancelToken::none();

        let version = match request_version(&mailbox, &crash_reporter, &cancel) {
            Ok(v) => v,
            Err(e) => {
                release_minor(minor);
                return Err(e);
            }
        };
        let capabilities = match request_capabilities(&mailbox, &crash_reporter, &cancel) {
            Ok(c) => c,
            Err(e) => {
                release_minor(minor);
                return Err(e);
            }
        };

        info!(
            "npu device opened: minor {minor}, firmware {}.{}.{}",
            version.major, version.minor, version.patch
        );

        Ok(Self {
            mailbox,
            dma_alloc,
            crash_reporter,
            version,
            capabilities,
            minor,
            last_ping: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Feed one inbound wire packet to the protocol dispatcher. How bytes actually arrive (a
    /// character device, an rpmsg callback, a test harness's reader thread) is outside this
    /// crate's concern; this is the single entry point for all of it.
    pub fn on_packet(&self, bytes: &[u8]) {
        on_packet(bytes, &self.mailbox, &self.crash_reporter);
    }

    /// A client-throttled health check: sends at most one `PING` per `PING_MIN_INTERVAL`,
    /// succeeding without sending anything on calls made sooner than that. The answering `PONG`,
    /// if any, arrives asynchronously and is only logged — there is no per-ping correlation in
    /// the wire protocol to wait on.
    pub fn ping(&self, cancel: &CancelToken) -> Result<(), Error> {
        let mut last = self.last_ping.lock().unwrap();
        if let Some(t) = *last {
            if t.elapsed() < PING_MIN_INTERVAL {
                return Ok(());
            }
        }
        let bytes = Message::Ping.encode(0);
        self.mailbox.send_blocking(&bytes, cancel)?;
        *last = Some(Instant::now());
        Ok(())
    }

    pub fn driver_version_get(&self) -> VersionRsp {
        self.version
    }

    pub fn capabilities(&self) -> CapabilitiesRsp {
        self.capabilities
    }

    pub fn buffer_create(&self, size: u32) -> Result<Buffer, Error> {
        Buffer::create(self.dma_alloc.as_ref(), size)
    }

    pub fn network_create_from_buffer(&self, data: &[u8]) -> Result<Network, Error> {
        Network::from_user_buffer(self.dma_alloc.as_ref(), data)
    }

    pub fn network_create_from_index(&self, index: u32) -> Network {
        Network::from_index(index)
    }

    pub fn network_info(
        &self,
        network: &Network,
        cancel: &CancelToken,
    ) -> Result<NetworkInfoRsp, Error> {
        request_network_info(&self.mailbox, network.wire_ref(), &self.crash_reporter, cancel)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn inference_create(
        &self,
        network: &Network,
        ifm: &[Buffer],
        ofm: &[Buffer],
        pmu_cfg: [u8; PMU_MAX],
        cycle_counter_enable: bool,
        cancel: &CancelToken,
    ) -> Result<Inference, Error> {
        Inference::create(
            self.mailbox.clone(),
            network,
            ifm,
            ofm,
            pmu_cfg,
            cycle_counter_enable,
            cancel,
        )
    }

    pub fn inference_status(&self, inference: &Inference) -> InferenceSnapshot {
        inference.status()
    }

    pub fn inference_cancel(
        &self,
        inference: &Inference,
        cancel: &CancelToken,
    ) -> Result<CancelOutcome, Error> {
        cancel_inference(inference, &self.mailbox, &self.crash_reporter, cancel)
    }

    /// Broadcast failure to every outstanding request and stop accepting new sends. Idempotent;
    /// also run automatically on `Drop`.
    pub fn close(&self) {
        if !self.closed.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.mailbox.shutdown("device closed");
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.close();
        release_minor(self.minor);
    }
}
