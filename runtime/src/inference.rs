// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The inference handle: the richest state machine in this crate. Creation acquires strong
//! references to every input/output buffer and to the network for the handle's full lifetime;
//! the response handler applies the status transition table in §4.6; a separate cancel
//! sub-protocol (`crate::cancel`) can interrupt a still-running inference.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use npu_protocol::{
    InferenceReq, Message, RpmsgStatus, BUFFER_MAX, FD_MAX, PMU_MAX,
};

use crate::buffer::Buffer;
use crate::cancel_token::CancelToken;
use crate::mailbox::Mailbox;
use crate::network::Network;
use crate::waiter::{RequestKind, Waiter};
use crate::Error;

/// `status` field of the inference handle, per spec.md §3/§4.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceStatus {
    Running,
    Ok,
    Error,
    Rejected,
    Aborted,
    Aborting,
}

/// A snapshot of everything `inference_status` exposes. Safe to read at any time; if the
/// inference hasn't completed, the PMU and cycle-counter fields are still zero.
#[derive(Debug, Clone, Copy)]
pub struct InferenceSnapshot {
    pub status: InferenceStatus,
    pub done: bool,
    pub pmu_event_config: [u8; PMU_MAX],
    pub pmu_event_count: [u64; PMU_MAX],
    pub cycle_counter_enable: u32,
    pub cycle_counter_count: u64,
    pub ofm_size: [u32; BUFFER_MAX],
}

pub(crate) struct InferenceState {
    status: InferenceStatus,
    done: bool,
    pmu_event_config: [u8; PMU_MAX],
    pmu_event_count: [u64; PMU_MAX],
    cycle_counter_enable: u32,
    cycle_counter_count: u64,
    ofm_size: [u32; BUFFER_MAX],
}

impl InferenceState {
    pub(crate) fn set_aborting(&mut self) {
        self.status = InferenceStatus::Aborting;
    }

    /// Move to `Aborted` if not already finalized by a racing response/fail-callback; returns
    /// whether this call was the one that finalized it.
    pub(crate) fn finalize_aborted(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.status = InferenceStatus::Aborted;
        self.done = true;
        true
    }
}

pub(crate) struct InferenceInner {
    mailbox: Arc<Mailbox>,
    /// The correlation id this inference registered its `INFERENCE_REQ` under; also the value
    /// carried as `inference_handle` in a `CANCEL_INFERENCE_REQ` naming this inference. Set
    /// once, right after `mailbox.register` returns it, before the request is ever sent.
    msg_id: AtomicU64,
    _network: Network,
    _ifm: Vec<Buffer>,
    _ofm: Vec<Buffer>,
    state: Mutex<InferenceState>,
    cv: Condvar,
    /// While `Some`, this is the mailbox's own strong reference keeping the inference alive
    /// between a successful send and its eventual completion or failure, even if every
    /// user-held `Inference` handle has been dropped in the meantime. Cleared exactly once, by
    /// whichever of `complete`/`fail` finalizes the inference first.
    self_ref: Mutex<Option<Arc<InferenceInner>>>,
}

impl Waiter for InferenceInner {
    fn kind(&self) -> RequestKind {
        RequestKind::Inference
    }

    fn complete(&self, message: Message) {
        let rsp = match message {
            Message::InferenceRsp(r) => r,
            other => {
                self.fail(&format!("unexpected response to inference request: {other:?}"));
                return;
            }
        };

        let mut state = self.state.lock().unwrap();
        if state.done {
            return;
        }

        let next = match state.status {
            InferenceStatus::Aborting | InferenceStatus::Aborted => InferenceStatus::Aborted,
            _ => match rsp.status() {
                Some(RpmsgStatus::Ok) if rsp.ofm_count as usize <= BUFFER_MAX => {
                    InferenceStatus::Ok
                }
                Some(RpmsgStatus::Rejected) => InferenceStatus::Rejected,
                Some(RpmsgStatus::Aborted) => InferenceStatus::Aborted,
                _ => InferenceStatus::Error,
            },
        };

        if next == InferenceStatus::Ok {
            state.pmu_event_config = rsp.pmu_cfg;
            state.pmu_event_count = rsp.pmu_count;
            state.cycle_counter_enable = rsp.cycle_counter_enable;
            state.cycle_counter_count = rsp.cycle_counter_count;
            state.ofm_size = rsp.ofm_size;
        }
        state.status = next;
        state.done = true;
        self.cv.notify_all();
        drop(state);
        self.self_ref.lock().unwrap().take();
    }

    fn fail(&self, _reason: &str) {
        let mut state = self.state.lock().unwrap();
        if state.done {
            return;
        }
        state.status = match state.status {
            InferenceStatus::Aborting => InferenceStatus::Aborted,
            _ => InferenceStatus::Error,
        };
        state.done = true;
        self.cv.notify_all();
        drop(state);
        self.self_ref.lock().unwrap().take();
    }
}

/// A running or completed inference job. Held by the caller and, independently, by the mailbox
/// until the job finishes — dropping every `Inference` clone before a response arrives does not
/// abandon the request; it just means nobody is left to observe the result.
#[derive(Clone)]
pub struct Inference(pub(crate) Arc<InferenceInner>);

impl Inference {
    /// Submit a new inference. `ifm`/`ofm` are consumed by reference — the handle takes its own
    /// clones, so the caller's own buffer handles remain valid and independently refcounted.
    pub fn create(
        mailbox: Arc<Mailbox>,
        network: &Network,
        ifm: &[Buffer],
        ofm: &[Buffer],
        pmu_cfg: [u8; PMU_MAX],
        cycle_counter_enable: bool,
        cancel: &CancelToken,
    ) -> Result<Self, Error> {
        if ifm.len() > FD_MAX || ofm.len() > FD_MAX {
            return Err(Error::Faulted);
        }

        let mut ifm_refs = [npu_protocol::BufferRef::default(); BUFFER_MAX];
        for (slot, b) in ifm_refs.iter_mut().zip(ifm) {
            *slot = b.wire_ref();
        }
        let mut ofm_refs = [npu_protocol::BufferRef::default(); BUFFER_MAX];
        for (slot, b) in ofm_refs.iter_mut().zip(ofm) {
            *slot = b.wire_ref();
        }

        let inner = Arc::new(InferenceInner {
            mailbox: mailbox.clone(),
            msg_id: AtomicU64::new(0),
            _network: network.clone(),
            _ifm: ifm.to_vec(),
            _ofm: ofm.to_vec(),
            state: Mutex::new(InferenceState {
                status: InferenceStatus::Running,
                done: false,
                pmu_event_config: [0; PMU_MAX],
                pmu_event_count: [0; PMU_MAX],
                cycle_counter_enable: 0,
                cycle_counter_count: 0,
                ofm_size: [0; BUFFER_MAX],
            }),
            cv: Condvar::new(),
            self_ref: Mutex::new(None),
        });

        let handle: Arc<dyn Waiter> = inner.clone();
        let msg_id = mailbox.register(&handle);
        inner.msg_id.store(msg_id, Ordering::SeqCst);

        let req = Message::InferenceReq(InferenceReq {
            ifm_count: ifm.len() as u32,
            ifm: ifm_refs,
            ofm_count: ofm.len() as u32,
            ofm: ofm_refs,
            network: network.wire_ref(),
            pmu_cfg,
            cycle_counter_enable: cycle_counter_enable as u32,
        })
        .encode(msg_id);

        if let Err(e) = mailbox.send_blocking(&req, cancel) {
            mailbox.deregister(msg_id);
            return Err(e);
        }

        *inner.self_ref.lock().unwrap() = Some(inner.clone());

        Ok(Self(inner))
    }

    pub fn status(&self) -> InferenceSnapshot {
        let state = self.0.state.lock().unwrap();
        InferenceSnapshot {
            status: state.status,
            done: state.done,
            pmu_event_config: state.pmu_event_config,
            pmu_event_count: state.pmu_event_count,
            cycle_counter_enable: state.cycle_counter_enable,
            cycle_counter_count: state.cycle_counter_count,
            ofm_size: state.ofm_size,
        }
    }

    pub fn is_done(&self) -> bool {
        self.0.state.lock().unwrap().done
    }

    /// Block until the inference reaches a terminal status, or until `timeout` elapses (`None`
    /// waits indefinitely). This is the edge-triggered "readable" surface of spec.md §4.6.
    pub fn wait_done(&self, timeout: Option<Duration>) -> bool {
        let mut state = self.0.state.lock().unwrap();
        match timeout {
            None => {
                while !state.done {
                    state = self.0.cv.wait(state).unwrap();
                }
                true
            }
            Some(timeout) => {
                let deadline = std::time::Instant::now() + timeout;
                while !state.done {
                    let now = std::time::Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    state = self.0.cv.wait_timeout(state, deadline - now).unwrap().0;
                }
                true
            }
        }
    }

    pub fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn mailbox(&self) -> &Arc<Mailbox> {
        &self.0.mailbox
    }

    /// The correlation id this inference's `INFERENCE_REQ` was sent under; used by
    /// `crate::cancel` as the `inference_handle` naming this job in `CANCEL_INFERENCE_REQ`.
    pub(crate) fn wire_handle(&self) -> u64 {
        self.0.msg_id.load(Ordering::SeqCst)
    }

    /// Used by `crate::cancel` right before issuing `CANCEL_INFERENCE_REQ`: if the inference has
    /// already reached a terminal status, returns `false` without changing anything (the cancel
    /// then completes synchronously with a failed outcome per spec.md §4.6); otherwise moves the
    /// inference to `ABORTING`, which the response handler and fail-callback both honor by
    /// collapsing to `ABORTED` no matter what they would otherwise have concluded.
    pub(crate) fn try_begin_cancel(&self) -> bool {
        let mut state = self.0.state.lock().unwrap();
        if state.done {
            return false;
        }
        state.set_aborting();
        true
    }

    /// Used by `crate::cancel` once its own request resolves (success, failure, or timeout): the
    /// target inference becomes `ABORTED` unless a racing `INFERENCE_RSP`/fail-callback already
    /// finalized it first.
    pub(crate) fn finalize_aborted(&self) {
        let mut state = self.0.state.lock().unwrap();
        if state.finalize_aborted() {
            self.0.cv.notify_all();
            drop(state);
            self.0.self_ref.lock().unwrap().take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel_token::CancelToken;
    use crate::dma::HeapDmaAllocator;
    use crate::transport::{SendError, Transport};
    use npu_protocol::InferenceRsp;

    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Transport for RecordingTransport {
        fn try_send(&self, bytes: &[u8]) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    fn sent_msg_id(bytes: &[u8]) -> u64 {
        u64::from_le_bytes(bytes[8..16].try_into().unwrap())
    }

    fn make_inference(mailbox: Arc<Mailbox>) -> Inference {
        let alloc = HeapDmaAllocator::new();
        let network = Network::from_index(0);
        let ifm = vec![Buffer::create(&alloc, 64).unwrap()];
        let ofm = vec![Buffer::create(&alloc, 64).unwrap()];
        Inference::create(
            mailbox,
            &network,
            &ifm,
            &ofm,
            [0; PMU_MAX],
            false,
            &CancelToken::none(),
        )
        .unwrap()
    }

    #[test]
    fn successful_response_transitions_to_ok_and_copies_counters() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport.clone()));
        let inference = make_inference(mailbox.clone());
        assert_eq!(inference.status().status, InferenceStatus::Running);

        let sent = transport.sent.lock().unwrap().clone();
        let msg_id = sent_msg_id(&sent[0]);
        mailbox.route(
            msg_id,
            RequestKind::Inference,
            Message::InferenceRsp(InferenceRsp {
                ofm_count: 1,
                ofm_size: [64; BUFFER_MAX],
                status: RpmsgStatus::Ok as u32,
                pmu_cfg: [0; PMU_MAX],
                pmu_count: [7; PMU_MAX],
                cycle_counter_enable: 1,
                cycle_counter_count: 42,
            }),
        );

        let snap = inference.status();
        assert_eq!(snap.status, InferenceStatus::Ok);
        assert!(snap.done);
        assert_eq!(snap.cycle_counter_count, 42);
        assert_eq!(snap.pmu_event_count[0], 7);
    }

    #[test]
    fn fail_callback_promotes_to_error_when_not_done() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport));
        let inference = make_inference(mailbox.clone());

        mailbox.fail_all("firmware crashed");

        let snap = inference.status();
        assert_eq!(snap.status, InferenceStatus::Error);
        assert!(snap.done);
    }

    #[test]
    fn dropping_every_user_handle_does_not_abandon_the_request() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport.clone()));
        let inference = make_inference(mailbox.clone());
        let sent = transport.sent.lock().unwrap().clone();
        let msg_id = sent_msg_id(&sent[0]);
        drop(inference);

        // No user handle remains, but the mailbox's self-reference keeps the state machine
        // alive to receive its response.
        let outcome = mailbox.route(
            msg_id,
            RequestKind::Inference,
            Message::InferenceRsp(InferenceRsp {
                ofm_count: 1,
                ofm_size: [0; BUFFER_MAX],
                status: RpmsgStatus::Ok as u32,
                pmu_cfg: [0; PMU_MAX],
                pmu_count: [0; PMU_MAX],
                cycle_counter_enable: 0,
                cycle_counter_count: 0,
            }),
        );
        assert_eq!(outcome, crate::mailbox::RouteOutcome::Delivered);
    }
}
