// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

//! The protocol dispatcher: the single entry point for inbound packets. Validates the header,
//! then switches on message type — asynchronous events (ping/pong, error) are handled inline;
//! responses are routed to whichever request registered the correlation id.

use npu_protocol::Message;

use crate::cancel_token::CancelToken;
use crate::crash::SharedCrashReporter;
use crate::mailbox::{Mailbox, RouteOutcome};
use crate::waiter::RequestKind;

/// Decode and handle one inbound packet. Malformed packets (bad magic, wrong length for their
/// type, unknown type) are logged and dropped rather than propagated — per spec.md §7, a
/// response-lookup problem is the stale sender's concern, not a fatal condition for the
/// dispatcher itself.
pub fn on_packet(bytes: &[u8], mailbox: &Mailbox, crash_reporter: &SharedCrashReporter) {
    let (message, msg_id) = match Message::decode(bytes) {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("dropping malformed packet: {e}");
            return;
        }
    };

    match message {
        Message::Err(payload) => {
            if !payload.is_terminated() {
                log::warn!("firmware error payload was not NUL-terminated");
            }
            crash_reporter.report(&format!(
                "firmware reported error {}: {}",
                payload.err_type,
                payload.message()
            ));
        }
        Message::Ping => {
            let pong = Message::Pong.encode(msg_id);
            if let Err(e) = mailbox.send_blocking(&pong, &CancelToken::none()) {
                log::warn!("failed to answer ping: {e}");
            }
        }
        Message::Pong => {
            log::debug!("received unsolicited pong (id {msg_id})");
        }
        Message::VersionRsp(_) => route_or_log(mailbox, msg_id, RequestKind::Version, message),
        Message::CapabilitiesRsp(_) => {
            route_or_log(mailbox, msg_id, RequestKind::Capabilities, message)
        }
        Message::NetworkInfoRsp(_) => {
            route_or_log(mailbox, msg_id, RequestKind::NetworkInfo, message)
        }
        Message::InferenceRsp(_) => route_or_log(mailbox, msg_id, RequestKind::Inference, message),
        Message::CancelInferenceRsp(_) => {
            route_or_log(mailbox, msg_id, RequestKind::CancelInference, message)
        }
        // The host never receives these; the firmware would only send them to us in error.
        Message::VersionReq
        | Message::CapabilitiesReq
        | Message::InferenceReq(_)
        | Message::NetworkInfoReq(_)
        | Message::CancelInferenceReq(_) => {
            log::warn!("received a request-shaped packet on the host side (id {msg_id})");
        }
    }
}

fn route_or_log(mailbox: &Mailbox, msg_id: u64, kind: RequestKind, message: Message) {
    match mailbox.route(msg_id, kind, message) {
        RouteOutcome::Delivered => {}
        RouteOutcome::Stale => {
            log::debug!("dropping response for unknown or already-resolved id {msg_id}")
        }
        RouteOutcome::KindMismatch => {
            log::warn!("response for id {msg_id} arrived with the wrong kind")
        }
    }
}
