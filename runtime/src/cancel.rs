// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The cancel-inference sub-protocol: a short-lived request, strictly shorter-lived than the
//! inference it targets, that races the inference's own completion and always leaves the
//! target in a terminal state.

use std::sync::Arc;
use std::time::Duration;

use npu_protocol::{CancelInferenceReq, CancelInferenceRsp, Message, RpmsgStatus};

use crate::cancel_token::CancelToken;
use crate::crash::SharedCrashReporter;
use crate::inference::Inference;
use crate::mailbox::Mailbox;
use crate::requests::Outcome;
use crate::waiter::{RequestKind, Waiter};
use crate::Error;

const CANCEL_TIMEOUT: Duration = Duration::from_secs(2);

/// The user-visible result of a cancel attempt. Distinct from `Error`: a cancel that reaches
/// the firmware and is rejected is a normal outcome, not a Rust-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Ok,
    Error,
}

struct CancelWaiter(Outcome<CancelInferenceRsp>);

impl Waiter for CancelWaiter {
    fn kind(&self) -> RequestKind {
        RequestKind::CancelInference
    }

    fn complete(&self, message: Message) {
        match message {
            Message::CancelInferenceRsp(r) => self.0.set_ok(r),
            other => self
                .0
                .set_fail(format!("unexpected response to cancel request: {other:?}")),
        }
    }

    fn fail(&self, reason: &str) {
        self.0.set_fail(reason.to_string());
    }
}

/// Attempt to cancel a running inference. If it has already reached a terminal status, returns
/// `Ok(CancelOutcome::Error)` synchronously without talking to the firmware. Otherwise sends
/// `CANCEL_INFERENCE_REQ` and waits up to 2 seconds; a timeout or mailbox failure is reported to
/// `crash_reporter` (the firmware is considered unresponsive) and still resolves to
/// `CancelOutcome::Error`. In every path where the firmware was actually asked, the target
/// inference ends up `ABORTED` unless a racing response already finalized it first.
pub fn cancel_inference(
    inference: &Inference,
    mailbox: &Mailbox,
    crash_reporter: &SharedCrashReporter,
    cancel: &CancelToken,
) -> Result<CancelOutcome, Error> {
    if !inference.try_begin_cancel() {
        return Ok(CancelOutcome::Error);
    }

    let waiter = Arc::new(CancelWaiter(Outcome::new()));
    let handle: Arc<dyn Waiter> = waiter.clone();
    let msg_id = mailbox.register(&handle);

    let bytes = Message::CancelInferenceReq(CancelInferenceReq {
        inference_handle: inference.wire_handle(),
    })
    .encode(msg_id);

    if let Err(e) = mailbox.send_blocking(&bytes, cancel) {
        mailbox.deregister(msg_id);
        crash_reporter.report(&format!("cancel-inference send failed: {e}"));
        inference.finalize_aborted();
        return Ok(CancelOutcome::Error);
    }

    let result = waiter.0.wait(CANCEL_TIMEOUT, cancel);
    mailbox.deregister(msg_id);
    inference.finalize_aborted();

    match result {
        Ok(rsp) => Ok(match rsp.status() {
            Some(RpmsgStatus::Ok) => CancelOutcome::Ok,
            _ => CancelOutcome::Error,
        }),
        Err(Error::Interrupted) => Err(Error::Interrupted),
        Err(e) => {
            crash_reporter.report(&format!("cancel-inference did not complete: {e}"));
            Ok(CancelOutcome::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Buffer;
    use crate::crash::CrashReporter;
    use crate::dma::HeapDmaAllocator;
    use crate::network::Network;
    use crate::transport::{SendError, Transport};
    use npu_protocol::PMU_MAX;
    use std::sync::Mutex;

    struct RecordingTransport {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Transport for RecordingTransport {
        fn try_send(&self, bytes: &[u8]) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    struct RecordingCrashReporter {
        reports: Mutex<Vec<String>>,
    }

    impl CrashReporter for RecordingCrashReporter {
        fn report(&self, reason: &str) {
            self.reports.lock().unwrap().push(reason.to_string());
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
    fn cancel_on_already_done_inference_is_synchronous_error() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport));
        let inference = make_inference(mailbox.clone());
        mailbox.fail_all("already failed");
        assert!(inference.is_done());

        let crash_reporter: SharedCrashReporter = Arc::new(RecordingCrashReporter {
            reports: Mutex::new(Vec::new()),
        });
        let outcome = cancel_inference(&inference, &mailbox, &crash_reporter, &CancelToken::none());
        assert_eq!(outcome.unwrap(), CancelOutcome::Error);
    }

    #[test]
    fn successful_cancel_response_aborts_the_target() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport.clone()));
        let inference = make_inference(mailbox.clone());
        transport.sent.lock().unwrap().clear();

        let crash_reporter: SharedCrashReporter = Arc::new(RecordingCrashReporter {
            reports: Mutex::new(Vec::new()),
        });

        let mailbox2 = mailbox.clone();
        let transport2 = transport.clone();
        let responder = std::thread::spawn(move || loop {
            let maybe_bytes = transport2.sent.lock().unwrap().pop();
            if let Some(bytes) = maybe_bytes {
                let msg_id = sent_msg_id(&bytes);
                mailbox2.route(
                    msg_id,
                    RequestKind::CancelInference,
                    Message::CancelInferenceRsp(CancelInferenceRsp {
                        status: RpmsgStatus::Ok as u32,
                    }),
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        });

        let outcome = cancel_inference(&inference, &mailbox, &crash_reporter, &CancelToken::none());
        responder.join().unwrap();

        assert_eq!(outcome.unwrap(), CancelOutcome::Ok);
        assert_eq!(inference.status().status, crate::inference::InferenceStatus::Aborted);
    }

    #[test]
    fn unanswered_cancel_reports_a_crash_and_still_aborts() {
        let transport = Arc::new(RecordingTransport {
            sent: Mutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport));
        let inference = make_inference(mailbox.clone());

        let reports = Arc::new(Mutex::new(Vec::new()));
        struct CapturingReporter(Arc<Mutex<Vec<String>>>);
        impl CrashReporter for CapturingReporter {
            fn report(&self, reason: &str) {
                self.0.lock().unwrap().push(reason.to_string());
            }
        }
        let crash_reporter: SharedCrashReporter = Arc::new(CapturingReporter(reports.clone()));

        // No responder thread: the cancel must time out on its own 2s budget.
        let outcome = cancel_inference(&inference, &mailbox, &crash_reporter, &CancelToken::none());
        assert_eq!(outcome.unwrap(), CancelOutcome::Error);
        assert!(!reports.lock().unwrap().is_empty());
        assert_eq!(inference.status().status, crate::inference::InferenceStatus::Aborted);
    }
}
