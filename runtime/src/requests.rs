// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The three simple request/response state machines: protocol version check, capability query,
//! and network metadata lookup. Each follows the same shape — register with the mailbox, send,
//! release the lock and wait with a bounded timeout, reacquire, read the result, deregister —
//! differing only in which response variant they accept, how long they're willing to wait, and
//! what they validate once the response is in hand.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use npu_protocol::{
    CapabilitiesRsp, Message, NetworkInfoReq, NetworkInfoRsp, NetworkRef, RpmsgStatus, VersionRsp,
    EXPECTED_VERSION_MAJOR, EXPECTED_VERSION_MINOR, FD_MAX,
};

use crate::cancel_token::CancelToken;
use crate::crash::SharedCrashReporter;
use crate::mailbox::Mailbox;
use crate::waiter::{RequestKind, Waiter};
use crate::Error;

const VERSION_TIMEOUT: Duration = Duration::from_secs(2);
const CAPABILITIES_TIMEOUT: Duration = Duration::from_secs(2);
const NETWORK_INFO_TIMEOUT: Duration = Duration::from_secs(3);

/// Shared wait/wake core for a one-shot request: set exactly once, by a decode of the expected
/// response variant or by a failure, then woken. The first of `complete`/`fail` to arrive wins;
/// a response racing a mailbox-level failure can't overwrite whichever landed first. Reused by
/// the inference and cancel-inference state machines, which follow the same register/send/wait
/// shape with richer bodies around it.
pub(crate) struct Outcome<T> {
    state: Mutex<Option<Result<T, String>>>,
    cv: Condvar,
}

impl<T> Outcome<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(None),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn set_ok(&self, value: T) {
        let mut state = self.state.lock().unwrap();
        if state.is_none() {
            *state = Some(Ok(value));
            self.cv.notify_all();
        }
    }

    pub(crate) fn set_fail(&self, reason: String) {
        let mut state = self.state.lock().unwrap();
        if state.is_none() {
            *state = Some(Err(reason));
            self.cv.notify_all();
        }
    }

    pub(crate) fn wait(&self, timeout: Duration, cancel: &CancelToken) -> Result<T, Error> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(result) = state.take() {
                return result.map_err(Error::ProtocolError);
            }
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }
            let wait_for = (deadline - now).min(Duration::from_millis(100));
            state = self.cv.wait_timeout(state, wait_for).unwrap().0;
        }
    }
}

struct VersionWaiter(Outcome<VersionRsp>);

impl Waiter for VersionWaiter {
    fn kind(&self) -> RequestKind {
        RequestKind::Version
    }

    fn complete(&self, message: Message) {
        match message {
            Message::VersionRsp(v) => self.0.set_ok(v),
            other => self
                .0
                .set_fail(format!("unexpected response to version request: {other:?}")),
        }
    }

    fn fail(&self, reason: &str) {
        self.0.set_fail(reason.to_string());
    }
}

/// Query the firmware's protocol version and confirm it matches what this build expects. A
/// timeout or mailbox failure while waiting is reported to `crash_reporter` (an unresponsive
/// device is a firmware-fatal condition, not merely this one request's problem) before
/// propagating.
pub fn request_version(
    mailbox: &Mailbox,
    crash_reporter: &SharedCrashReporter,
    cancel: &CancelToken,
) -> Result<VersionRsp, Error> {
    let waiter = Arc::new(VersionWaiter(Outcome::new()));
    let handle: Arc<dyn Waiter> = waiter.clone();
    let msg_id = mailbox.register(&handle);

    let bytes = Message::VersionReq.encode(msg_id);
    if let Err(e) = mailbox.send_blocking(&bytes, cancel) {
        mailbox.deregister(msg_id);
        return Err(e);
    }

    let result = waiter.0.wait(VERSION_TIMEOUT, cancel);
    mailbox.deregister(msg_id);

    let rsp = match result {
        Ok(rsp) => rsp,
        Err(Error::Interrupted) => return Err(Error::Interrupted),
        Err(e) => {
            crash_reporter.report(&format!("version request did not complete: {e}"));
            return Err(e);
        }
    };
    if rsp.major != EXPECTED_VERSION_MAJOR || rsp.minor != EXPECTED_VERSION_MINOR {
        return Err(Error::ProtocolError(format!(
            "firmware protocol version {}.{}.{} does not match expected {}.{}",
            rsp.major, rsp.minor, rsp.patch, EXPECTED_VERSION_MAJOR, EXPECTED_VERSION_MINOR
        )));
    }
    Ok(rsp)
}

struct CapabilitiesWaiter(Outcome<CapabilitiesRsp>);

impl Waiter for CapabilitiesWaiter {
    fn kind(&self) -> RequestKind {
        RequestKind::Capabilities
    }

    fn complete(&self, message: Message) {
        match message {
            Message::CapabilitiesRsp(c) => self.0.set_ok(c),
            other => self.0.set_fail(format!(
                "unexpected response to capabilities request: {other:?}"
            )),
        }
    }

    fn fail(&self, reason: &str) {
        self.0.set_fail(reason.to_string());
    }
}

pub fn request_capabilities(
    mailbox: &Mailbox,
    crash_reporter: &SharedCrashReporter,
    cancel: &CancelToken,
) -> Result<CapabilitiesRsp, Error> {
    let waiter = Arc::new(CapabilitiesWaiter(Outcome::new()));
    let handle: Arc<dyn Waiter> = waiter.clone();
    let msg_id = mailbox.register(&handle);

    let bytes = Message::CapabilitiesReq.encode(msg_id);
    if let Err(e) = mailbox.send_blocking(&bytes, cancel) {
        mailbox.deregister(msg_id);
        return Err(e);
    }

    let result = waiter.0.wait(CAPABILITIES_TIMEOUT, cancel);
    mailbox.deregister(msg_id);
    match result {
        Ok(rsp) => Ok(rsp),
        Err(Error::Interrupted) => Err(Error::Interrupted),
        Err(e) => {
            crash_reporter.report(&format!("capabilities request did not complete: {e}"));
            Err(e)
        }
    }
}

struct NetworkInfoWaiter(Outcome<NetworkInfoRsp>);

impl Waiter for NetworkInfoWaiter {
    fn kind(&self) -> RequestKind {
        RequestKind::NetworkInfo
    }

    fn complete(&self, message: Message) {
        match message {
            Message::NetworkInfoRsp(r) => self.0.set_ok(r),
            other => self.0.set_fail(format!(
                "unexpected response to network info request: {other:?}"
            )),
        }
    }

    fn fail(&self, reason: &str) {
        self.0.set_fail(reason.to_string());
    }
}

/// Query a network's input/output shapes. A `Rejected` status means the handle the firmware
/// was given doesn't name a loaded network; a well-formed `Ok` response is further validated
/// against the limits this host implementation can actually represent.
pub fn request_network_info(
    mailbox: &Mailbox,
    network: NetworkRef,
    crash_reporter: &SharedCrashReporter,
    cancel: &CancelToken,
) -> Result<NetworkInfoRsp, Error> {
    let waiter = Arc::new(NetworkInfoWaiter(Outcome::new()));
    let handle: Arc<dyn Waiter> = waiter.clone();
    let msg_id = mailbox.register(&handle);

    let bytes = Message::NetworkInfoReq(NetworkInfoReq { network }).encode(msg_id);
    if let Err(e) = mailbox.send_blocking(&bytes, cancel) {
        mailbox.deregister(msg_id);
        return Err(e);
    }

    let result = waiter.0.wait(NETWORK_INFO_TIMEOUT, cancel);
    mailbox.deregister(msg_id);
    let rsp = match result {
        Ok(rsp) => rsp,
        Err(Error::Interrupted) => return Err(Error::Interrupted),
        Err(e) => {
            crash_reporter.report(&format!("network info request did not complete: {e}"));
            return Err(e);
        }
    };

    match rsp.status() {
        Some(RpmsgStatus::Ok) => {}
        Some(RpmsgStatus::Rejected) => return Err(Error::BadFile),
        Some(other) => {
            return Err(Error::ProtocolError(format!(
                "unexpected network info status {other:?}"
            )))
        }
        None => {
            return Err(Error::ProtocolError(format!(
                "unrecognized network info status code {}",
                rsp.status
            )))
        }
    }

    if rsp.ifm_count as usize > FD_MAX || rsp.ofm_count as usize > FD_MAX {
        return Err(Error::TooManyFiles);
    }
    if rsp.desc_str().is_none() {
        return Err(Error::MessageTooLong);
    }

    Ok(rsp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crash::CrashReporter;
    use crate::transport::{SendError, Transport};
    use std::sync::Mutex as StdMutex;

    /// A transport that just records what it was asked to send; nothing ever answers it.
    struct BlackHoleTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl Transport for BlackHoleTransport {
        fn try_send(&self, bytes: &[u8]) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    struct RecordingCrashReporter {
        reports: StdMutex<Vec<String>>,
    }

    impl RecordingCrashReporter {
        fn new() -> Self {
            Self {
                reports: StdMutex::new(Vec::new()),
            }
        }
    }

    impl CrashReporter for RecordingCrashReporter {
        fn report(&self, reason: &str) {
            self.reports.lock().unwrap().push(reason.to_string());
        }
    }

    fn sent_msg_id(bytes: &[u8]) -> u64 {
        u64::from_le_bytes(bytes[8..16].try_into().unwrap())
    }

    #[test]
    fn unanswered_request_times_out() {
        let waiter = Arc::new(VersionWaiter(Outcome::new()));
        let result = waiter.0.wait(Duration::from_millis(20), &CancelToken::none());
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[test]
    fn version_mismatch_is_reported_as_protocol_error() {
        let transport = Arc::new(BlackHoleTransport {
            sent: StdMutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport.clone()));

        let responder = {
            let mailbox = mailbox.clone();
            let transport = transport.clone();
            std::thread::spawn(move || loop {
                let maybe_bytes = transport.sent.lock().unwrap().pop();
                if let Some(bytes) = maybe_bytes {
                    let msg_id = sent_msg_id(&bytes);
                    mailbox.route(
                        msg_id,
                        RequestKind::Version,
                        Message::VersionRsp(VersionRsp {
                            major: 9,
                            minor: 9,
                            patch: 0,
                        }),
                    );
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            })
        };

        let crash_reporter: SharedCrashReporter = Arc::new(RecordingCrashReporter::new());
        let result = request_version(&mailbox, &crash_reporter, &CancelToken::none());
        responder.join().unwrap();
        assert!(matches!(result, Err(Error::ProtocolError(_))));
    }

    #[test]
    fn cancel_token_interrupts_an_outstanding_wait() {
        let mailbox = Mailbox::new(Arc::new(BlackHoleTransport {
            sent: StdMutex::new(Vec::new()),
        }));
        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel2.cancel();
        });
        let crash_reporter: SharedCrashReporter = Arc::new(RecordingCrashReporter::new());
        let result = request_version(&mailbox, &crash_reporter, &cancel);
        assert!(matches!(result, Err(Error::Interrupted)));
    }

    #[test]
    fn unanswered_version_request_reports_a_crash() {
        let mailbox = Mailbox::new(Arc::new(BlackHoleTransport {
            sent: StdMutex::new(Vec::new()),
        }));
        let reports = Arc::new(StdMutex::new(Vec::new()));
        struct CapturingReporter(Arc<StdMutex<Vec<String>>>);
        impl CrashReporter for CapturingReporter {
            fn report(&self, reason: &str) {
                self.0.lock().unwrap().push(reason.to_string());
            }
        }
        let crash_reporter: SharedCrashReporter = Arc::new(CapturingReporter(reports.clone()));

        let result = request_version(&mailbox, &crash_reporter, &CancelToken::none());
        assert!(matches!(result, Err(Error::Timeout)));
        assert!(!reports.lock().unwrap().is_empty());
    }

    #[test]
    fn network_info_rejects_too_many_files() {
        let transport = Arc::new(BlackHoleTransport {
            sent: StdMutex::new(Vec::new()),
        });
        let mailbox = Arc::new(Mailbox::new(transport.clone()));

        let mut desc = [0u8; 32];
        desc[0] = b'x';
        let bad_rsp = NetworkInfoRsp {
            desc,
            ifm_count: (FD_MAX as u32) + 1,
            ifm_size: [0; 16],
            ofm_count: 1,
            ofm_size: [0; 16],
            status: RpmsgStatus::Ok as u32,
        };

        let responder = {
            let mailbox = mailbox.clone();
            let transport = transport.clone();
            std::thread::spawn(move || loop {
                let maybe_bytes = transport.sent.lock().unwrap().pop();
                if let Some(bytes) = maybe_bytes {
                    let msg_id = sent_msg_id(&bytes);
                    mailbox.route(
                        msg_id,
                        RequestKind::NetworkInfo,
                        Message::NetworkInfoRsp(bad_rsp),
                    );
                    break;
                }
                std::thread::sleep(Duration::from_millis(5));
            })
        };

        let crash_reporter: SharedCrashReporter = Arc::new(RecordingCrashReporter::new());
        let result = request_network_info(
            &mailbox,
            NetworkRef::Index(0),
            &crash_reporter,
            &CancelToken::none(),
        );
        responder.join().unwrap();
        assert!(matches!(result, Err(Error::TooManyFiles)));
    }
}
