// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The mailbox: correlation-ID allocation for outstanding requests, and a fair, serialized send
//! path over the finite transmit-slot pool the transport exposes. Table entries are
//! `Weak<dyn Waiter>` (spec.md Design Notes §9) so a request's own lifetime — not the mailbox —
//! governs when it goes away; the mailbox only ever learns about a dead entry by a failed
//! upgrade.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use std::time::{Duration, Instant};

use npu_protocol::Message;

use crate::cancel_token::CancelToken;
use crate::transport::{SendError, Transport};
use crate::waiter::{RequestKind, Waiter};
use crate::Error;

const SEND_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

struct Table {
    next_id: u64,
    waiters: HashMap<u64, (Weak<dyn Waiter>, RequestKind)>,
}

struct SendQueue {
    next_ticket: u64,
    pending: BTreeSet<u64>,
}

/// The outcome of routing one decoded response to its correlation ID.
#[derive(Debug, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Delivered to the waiting request.
    Delivered,
    /// No request is registered for this correlation ID (already completed, timed out, or the
    /// ID was never ours); not an error, just dropped.
    Stale,
    /// A request is registered under this ID but for a different response kind. Left
    /// registered; the dispatcher should treat this as a protocol error.
    KindMismatch,
}

pub struct Mailbox {
    transport: Arc<dyn Transport>,
    table: Mutex<Table>,
    send_queue: Mutex<SendQueue>,
    send_cv: Condvar,
    shutdown: AtomicBool,
}

impl Mailbox {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            table: Mutex::new(Table {
                next_id: 1,
                waiters: HashMap::new(),
            }),
            send_queue: Mutex::new(SendQueue {
                next_ticket: 0,
                pending: BTreeSet::new(),
            }),
            send_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Allocate a correlation ID and register `waiter` under it. The mailbox holds only a weak
    /// reference; the caller's own `Arc` is what keeps the entry meaningful.
    pub fn register(&self, waiter: &Arc<dyn Waiter>) -> u64 {
        let kind = waiter.kind();
        let mut table = self.table.lock().unwrap();
        loop {
            let id = table.next_id;
            table.next_id = table.next_id.wrapping_add(1);
            if table.next_id == 0 {
                table.next_id = 1;
            }
            if !table.waiters.contains_key(&id) {
                table.waiters.insert(id, (Arc::downgrade(waiter), kind));
                return id;
            }
        }
    }

    /// Remove a registration without delivering anything to it, e.g. after a request gives up
    /// waiting on its own timeout.
    pub fn deregister(&self, msg_id: u64) {
        self.table.lock().unwrap().waiters.remove(&msg_id);
    }

    /// Route one decoded response to its registered waiter, if any, checking that `kind`
    /// matches what was registered. A matched, live waiter is deregistered as part of delivery:
    /// every response kind this mailbox handles is a one-shot completion.
    pub fn route(&self, msg_id: u64, kind: RequestKind, message: Message) -> RouteOutcome {
        let waiter = {
            let mut table = self.table.lock().unwrap();
            match table.waiters.get(&msg_id) {
                None => return RouteOutcome::Stale,
                Some((_, registered_kind)) if *registered_kind != kind => {
                    return RouteOutcome::KindMismatch
                }
                Some((weak, _)) => {
                    let upgraded = weak.upgrade();
                    table.waiters.remove(&msg_id);
                    upgraded
                }
            }
        };
        match waiter {
            Some(w) => {
                w.complete(message);
                RouteOutcome::Delivered
            }
            None => RouteOutcome::Stale,
        }
    }

    /// Fail every currently registered waiter and clear the table. Used for firmware crash
    /// reports (fail everyone, keep running) and for shutdown (fail everyone, stop accepting
    /// new work).
    pub fn fail_all(&self, reason: &str) {
        let drained: Vec<_> = {
            let mut table = self.table.lock().unwrap();
            table.waiters.drain().collect()
        };
        for (_, (weak, _)) in drained {
            if let Some(w) = weak.upgrade() {
                w.fail(reason);
            }
        }
    }

    pub fn shutdown(&self, reason: &str) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.fail_all(reason);
        self.send_cv.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Send one packet, blocking until it's this caller's turn in FIFO order and a transmit
    /// slot is free, or until `SEND_TIMEOUT` elapses, the mailbox shuts down, or `cancel` fires.
    /// Tickets are served in strict arrival order regardless of how many other callers give up
    /// while waiting (the pending set always advances to whichever ticket is smallest and still
    /// present, never an ever-increasing "now serving" counter that abandonment could strand).
    pub fn send_blocking(&self, bytes: &[u8], cancel: &CancelToken) -> Result<(), Error> {
        let ticket = {
            let mut q = self.send_queue.lock().unwrap();
            let t = q.next_ticket;
            q.next_ticket += 1;
            q.pending.insert(t);
            t
        };

        let result = self.send_in_turn(bytes, cancel, ticket);

        let mut q = self.send_queue.lock().unwrap();
        q.pending.remove(&ticket);
        drop(q);
        self.send_cv.notify_all();

        result
    }

    fn send_in_turn(&self, bytes: &[u8], cancel: &CancelToken, ticket: u64) -> Result<(), Error> {
        let deadline = Instant::now() + SEND_TIMEOUT;
        let mut guard = self.send_queue.lock().unwrap();
        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                return Err(Error::NoDevice);
            }
            if cancel.is_cancelled() {
                return Err(Error::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout);
            }

            let our_turn = guard.pending.iter().next() == Some(&ticket);
            if !our_turn {
                let wait_for = (deadline - now).min(POLL_INTERVAL);
                guard = self.send_cv.wait_timeout(guard, wait_for).unwrap().0;
                continue;
            }

            match self.transport.try_send(bytes) {
                Ok(()) => return Ok(()),
                Err(SendError::NoSlot) => {
                    let now = Instant::now().min(deadline);
                    let wait_for = (deadline - now).min(POLL_INTERVAL);
                    guard = self.send_cv.wait_timeout(guard, wait_for).unwrap().0;
                    continue;
                }
                Err(SendError::Fatal(msg)) => return Err(Error::Io(msg)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PipeTransport;
    use std::io::Read;
    use std::sync::Mutex as StdMutex;
    use std::thread;

    struct RecordingTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                sent: StdMutex::new(Vec::new()),
            }
        }
    }

    impl Transport for RecordingTransport {
        fn try_send(&self, bytes: &[u8]) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }
    }

    struct FailingTransport;

    impl Transport for FailingTransport {
        fn try_send(&self, _bytes: &[u8]) -> Result<(), SendError> {
            Err(SendError::Fatal("wire down".into()))
        }
    }

    struct TestWaiter {
        kind: RequestKind,
        completed: StdMutex<Option<Message>>,
        failed: StdMutex<Option<String>>,
    }

    impl TestWaiter {
        fn new(kind: RequestKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                completed: StdMutex::new(None),
                failed: StdMutex::new(None),
            })
        }
    }

    impl Waiter for TestWaiter {
        fn kind(&self) -> RequestKind {
            self.kind
        }

        fn complete(&self, message: Message) {
            *self.completed.lock().unwrap() = Some(message);
        }

        fn fail(&self, reason: &str) {
            *self.failed.lock().unwrap() = Some(reason.to_string());
        }
    }

    #[test]
    fn correlation_ids_are_unique_while_outstanding() {
        let mailbox = Mailbox::new(Arc::new(RecordingTransport::new()));
        let a: Arc<dyn Waiter> = TestWaiter::new(RequestKind::Version);
        let b: Arc<dyn Waiter> = TestWaiter::new(RequestKind::Version);
        let id_a = mailbox.register(&a);
        let id_b = mailbox.register(&b);
        assert_ne!(id_a, id_b);
    }

    #[test]
    fn route_delivers_to_matching_kind_and_deregisters() {
        let mailbox = Mailbox::new(Arc::new(RecordingTransport::new()));
        let waiter = TestWaiter::new(RequestKind::Version);
        let dyn_waiter: Arc<dyn Waiter> = waiter.clone();
        let id = mailbox.register(&dyn_waiter);

        let outcome = mailbox.route(
            id,
            RequestKind::Version,
            Message::VersionRsp(npu_protocol::VersionRsp {
                major: 0,
                minor: 2,
                patch: 0,
            }),
        );
        assert_eq!(outcome, RouteOutcome::Delivered);
        assert!(waiter.completed.lock().unwrap().is_some());

        // Second delivery attempt finds nothing: one-shot completion deregistered it.
        let outcome = mailbox.route(
            id,
            RequestKind::Version,
            Message::VersionRsp(npu_protocol::VersionRsp {
                major: 0,
                minor: 2,
                patch: 0,
            }),
        );
        assert_eq!(outcome, RouteOutcome::Stale);
    }

    #[test]
    fn route_reports_kind_mismatch_without_consuming_registration() {
        let mailbox = Mailbox::new(Arc::new(RecordingTransport::new()));
        let waiter = TestWaiter::new(RequestKind::Version);
        let dyn_waiter: Arc<dyn Waiter> = waiter.clone();
        let id = mailbox.register(&dyn_waiter);

        let outcome = mailbox.route(
            id,
            RequestKind::Capabilities,
            Message::Pong,
        );
        assert_eq!(outcome, RouteOutcome::KindMismatch);
        assert!(waiter.completed.lock().unwrap().is_none());
    }

    #[test]
    fn fail_all_reaches_every_live_waiter() {
        let mailbox = Mailbox::new(Arc::new(RecordingTransport::new()));
        let a = TestWaiter::new(RequestKind::Version);
        let b = TestWaiter::new(RequestKind::Capabilities);
        let dyn_a: Arc<dyn Waiter> = a.clone();
        let dyn_b: Arc<dyn Waiter> = b.clone();
        mailbox.register(&dyn_a);
        mailbox.register(&dyn_b);

        mailbox.fail_all("firmware crashed");

        assert_eq!(a.failed.lock().unwrap().as_deref(), Some("firmware crashed"));
        assert_eq!(b.failed.lock().unwrap().as_deref(), Some("firmware crashed"));
    }

    #[test]
    fn weak_table_entries_do_not_keep_requests_alive() {
        let mailbox = Mailbox::new(Arc::new(RecordingTransport::new()));
        let waiter = TestWaiter::new(RequestKind::Version);
        let dyn_waiter: Arc<dyn Waiter> = waiter;
        let id = mailbox.register(&dyn_waiter);
        drop(dyn_waiter);

        let outcome = mailbox.route(
            id,
            RequestKind::Version,
            Message::VersionRsp(npu_protocol::VersionRsp {
                major: 0,
                minor: 2,
                patch: 0,
            }),
        );
        assert_eq!(outcome, RouteOutcome::Stale);
    }

    #[test]
    fn shutdown_fails_outstanding_and_rejects_new_sends() {
        let mailbox = Mailbox::new(Arc::new(RecordingTransport::new()));
        let waiter = TestWaiter::new(RequestKind::Version);
        let dyn_waiter: Arc<dyn Waiter> = waiter.clone();
        mailbox.register(&dyn_waiter);

        mailbox.shutdown("shutting down");
        assert!(waiter.failed.lock().unwrap().is_some());

        let result = mailbox.send_blocking(&[0u8; 16], &CancelToken::none());
        assert!(matches!(result, Err(Error::NoDevice)));
    }

    #[test]
    fn fatal_transport_error_is_propagated() {
        let mailbox = Mailbox::new(Arc::new(FailingTransport));
        let result = mailbox.send_blocking(&[0u8; 16], &CancelToken::none());
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn concurrent_sends_are_all_delivered_in_fifo_arrival_order() {
        let transport = Arc::new(RecordingTransport::new());
        let mailbox = Arc::new(Mailbox::new(transport.clone()));

        let handles: Vec<_> = (0u8..8)
            .map(|i| {
                let mailbox = mailbox.clone();
                thread::spawn(move || {
                    mailbox
                        .send_blocking(&[i; 1], &CancelToken::none())
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(transport.sent.lock().unwrap().len(), 8);
    }

    /// Drives the sender past its transmit-slot budget: with only one slot available, every
    /// ticket after the first blocks in `NoSlot` until the firmware side (played by the test)
    /// reads a packet and calls `release_slot`. Arrival at the other end must still match ticket
    /// order — a slot becoming free must wake the minimum still-pending ticket, never a later
    /// one jumping the queue.
    #[test]
    fn slot_exhaustion_suspends_and_resumes_senders_in_ticket_order() {
        let (host_end, fw_end) = npu_protocol::pipe::pipe().unwrap();
        let transport = Arc::new(PipeTransport::new(host_end, 1));
        let mailbox = Arc::new(Mailbox::new(transport.clone()));

        const N: u8 = 5;
        let handles: Vec<_> = (0..N)
            .map(|i| {
                let mailbox = mailbox.clone();
                thread::spawn(move || {
                    // Stagger registration so tickets are handed out in ascending order.
                    thread::sleep(Duration::from_millis(20 * i as u64));
                    mailbox
                        .send_blocking(&[i; 1], &CancelToken::none())
                        .unwrap();
                })
            })
            .collect();

        // Let every sender register its ticket; all but the first are now blocked on the single
        // transmit slot.
        thread::sleep(Duration::from_millis(20 * N as u64 + 100));

        let mut fw_end = fw_end;
        let mut order = Vec::new();
        let mut buf = [0u8; 1];
        for _ in 0..N {
            fw_end.read_exact(&mut buf).unwrap();
            order.push(buf[0]);
            transport.release_slot();
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(order, (0..N).collect::<Vec<_>>());
    }
}
