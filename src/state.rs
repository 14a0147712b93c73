/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Protocol state machine: event-driven states, the T1/T2 retransmit
//! timers and Commit-collision role arbitration. The packet contents
//! are prepared and validated by the engine half in `session.rs`; this
//! file decides what happens when.

use crate::callback::KeyDirection;
use crate::codes::{InfoCode, MessageSeverity, SevereCode};
use crate::error::ZrtpErrorCode;
use crate::packet::{encode_ack, CommitMessage, CommitVariant, ErrorMessage, MessageType};
use crate::proto::*;
use crate::session::{
    ZrtpSession, RETRY_COMMIT, RETRY_CONFIRM2, RETRY_DHPART2, RETRY_ERROR, RETRY_HELLO,
};

/// Protocol states. Depending on the role not every state is visited
/// during a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing happened yet, or the engine was stopped or failed.
    Initial,
    /// Sending Hello, waiting to detect a ZRTP peer.
    Detect,
    /// Peer acknowledged our Hello, waiting for its Hello.
    AckDetected,
    /// We acknowledged the peer's Hello and keep sending our own.
    AckSent,
    /// Responder waiting for a Commit after the Hello handshake.
    WaitCommit,
    /// Initiator sent its Commit.
    CommitSent,
    /// Responder sent DHPart1, waiting for DHPart2.
    WaitDHPart2,
    /// Initiator sent DHPart2, waiting for Confirm1.
    WaitConfirm1,
    /// Responder sent Confirm1, waiting for Confirm2.
    WaitConfirm2,
    /// Initiator sent Confirm2, waiting for Conf2Ack.
    WaitConfAck,
    /// GoClear side-state, retained for completeness.
    WaitClearAck,
    /// SRTP is on in both directions.
    Secure,
    /// An Error message is in flight.
    WaitErrorAck,
}

/// Sub-state of `Secure` handling SAS relay acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SecureSubState {
    Normal,
    WaitSasRelayAck,
}

/// Retransmission timer; doubles until capped, the counter tracks how
/// many resends were spent.
pub(crate) struct Timer {
    pub start: i32,
    pub time: i32,
    pub capping: i32,
    pub counter: i32,
    pub max_resend: i32,
}

impl Timer {
    pub fn t1_default() -> Self {
        Timer {
            start: T1_START_MS,
            time: T1_START_MS,
            capping: T1_CAPPING_MS,
            counter: 0,
            max_resend: T1_MAX_RESEND,
        }
    }

    pub fn t2_default() -> Self {
        Timer {
            start: T2_START_MS,
            time: T2_START_MS,
            capping: T2_CAPPING_MS,
            counter: 0,
            max_resend: T2_MAX_RESEND,
        }
    }

    fn rearm(&mut self) -> i32 {
        self.time = self.start;
        self.counter = 0;
        self.time
    }

    /// Next interval, or -1 once the resend budget is spent.
    fn next(&mut self) -> i32 {
        self.time = (self.time + self.time).min(self.capping);
        if self.max_resend > 0 {
            self.counter += 1;
            if self.counter > self.max_resend {
                return -1;
            }
        }
        self.time
    }
}

impl ZrtpSession {
    /* Timer plumbing */

    fn start_t1(&mut self) -> bool {
        let ms = self.t1.rearm();
        self.activate_timer(ms)
    }

    fn start_t2(&mut self) -> bool {
        let ms = self.t2.rearm();
        self.activate_timer(ms)
    }

    fn next_t1(&mut self) -> i32 {
        let ms = self.t1.next();
        if ms < 0 {
            return -1;
        }
        if self.activate_timer(ms) {
            1
        } else {
            0
        }
    }

    fn next_t2(&mut self) -> i32 {
        let ms = self.t2.next();
        if ms < 0 {
            return -1;
        }
        if self.activate_timer(ms) {
            1
        } else {
            0
        }
    }

    fn resend_stored(&mut self) -> bool {
        match self.sent_packet.clone() {
            Some(pkt) => self.send_message(&pkt),
            None => false,
        }
    }

    fn send_failed(&mut self) {
        self.sent_packet = None;
        self.state = State::Initial;
        self.negotiation_failed(MessageSeverity::Severe, SevereCode::CannotSend as u32);
    }

    fn timer_failed(&mut self, sub_code: SevereCode) {
        self.sent_packet = None;
        self.state = State::Initial;
        self.negotiation_failed(MessageSeverity::Severe, sub_code as u32);
    }

    /// Send an Error message and move into the error overlay state.
    pub(crate) fn send_error_packet(&mut self, code: ZrtpErrorCode) {
        self.cancel_timer();
        let bytes = ErrorMessage { code: code as u32 }.encode();
        self.negotiation_failed(MessageSeverity::ZrtpError, code as u32);
        self.sent_packet = Some(bytes.clone());
        self.state = State::WaitErrorAck;
        if !self.send_message(&bytes) || !self.start_t2() {
            self.send_failed();
        }
    }

    /// PBX side: send a SASrelay and wait for the RelayAck.
    pub(crate) fn start_sas_relay(&mut self, bytes: Vec<u8>) -> bool {
        self.cancel_timer();
        self.sent_packet = Some(bytes.clone());
        self.sub_state = SecureSubState::WaitSasRelayAck;
        if !self.send_message(&bytes) || !self.start_t2() {
            self.send_failed();
            return false;
        }
        true
    }

    /* Event entry points */

    /// Engine start (and restart while still discovering).
    pub(crate) fn process_event_initial(&mut self) {
        match self.state {
            State::Initial => {
                let hello = self.hello_bytes();
                self.sent_packet = Some(hello.clone());
                if !self.send_message(&hello) {
                    self.send_failed();
                    return;
                }
                if !self.start_t1() {
                    self.timer_failed(SevereCode::NoTimer);
                    return;
                }
                self.state = State::Detect;
            }
            State::Detect => {
                // host re-started discovery
                self.cancel_timer();
                if !self.resend_stored() {
                    self.send_failed();
                    return;
                }
                if !self.start_t1() {
                    self.timer_failed(SevereCode::NoTimer);
                }
            }
            _ => {}
        }
    }

    pub(crate) fn process_event_packet(&mut self, mtype: MessageType, body: &[u8]) {
        match self.state {
            State::Initial | State::WaitClearAck => {}
            State::Detect => self.ev_detect(mtype, body),
            State::AckDetected => self.ev_ack_detected(mtype, body),
            State::AckSent => self.ev_ack_sent(mtype, body),
            State::WaitCommit => self.ev_wait_commit(mtype, body),
            State::CommitSent => self.ev_commit_sent(mtype, body),
            State::WaitDHPart2 => self.ev_wait_dhpart2(mtype, body),
            State::WaitConfirm1 => self.ev_wait_confirm1(mtype, body),
            State::WaitConfirm2 => self.ev_wait_confirm2(mtype, body),
            State::WaitConfAck => self.ev_wait_confack(mtype, body),
            State::Secure => self.ev_secure(mtype, body),
            State::WaitErrorAck => self.ev_wait_error_ack(mtype),
        }
    }

    pub(crate) fn process_event_timeout(&mut self) {
        match self.state {
            State::Detect => self.timeout_detect(),
            State::AckSent => self.timeout_ack_sent(),
            State::CommitSent => self.timeout_resend(RETRY_COMMIT),
            State::WaitConfirm1 => self.timeout_resend(RETRY_DHPART2),
            State::WaitConfAck => self.timeout_confack(),
            State::WaitErrorAck => self.timeout_resend(RETRY_ERROR),
            State::Secure => self.timeout_secure(),
            _ => {}
        }
    }

    /// A wire Error message arrived (the ErrorAck already went out).
    pub(crate) fn process_event_error(&mut self, code: u32) {
        if self.state == State::Secure {
            // Ignore Error injection once secure.
            return;
        }
        if self.state == State::Initial {
            return;
        }
        self.sent_packet = None;
        self.commit_pkt = None;
        self.negotiation_failed(MessageSeverity::ZrtpError, code);
        self.state = State::Initial;
    }

    /// The host saw the first valid SRTP packet instead of a Conf2Ack.
    pub(crate) fn process_event_conf2ack_emulated(&mut self) {
        if self.state == State::WaitConfAck {
            self.ev_wait_confack(MessageType::Conf2Ack, &[]);
        }
    }

    /* Detect: our Hello is out, nothing else happened yet. */

    fn ev_detect(&mut self, mtype: MessageType, body: &[u8]) {
        match mtype {
            MessageType::HelloAck => {
                self.cancel_timer();
                self.sent_packet = None;
                self.state = State::AckDetected;
            }
            MessageType::Hello => {
                if self.save_peer_hello(body).is_err() {
                    self.send_error_packet(ZrtpErrorCode::MalformedPacket);
                    return;
                }
                self.cancel_timer();
                self.send_info(MessageSeverity::Info, InfoCode::HelloReceived as u32);

                // Version negotiation: a peer with a higher version
                // will downgrade on its own, keep sending our Hello.
                let recv = self.peer_version_int();
                if recv > self.sent_version_int() {
                    if !self.start_t1() {
                        self.timer_failed(SevereCode::NoTimer);
                    }
                    return;
                }
                if recv != self.sent_version_int() {
                    self.send_error_packet(ZrtpErrorCode::UnsuppZrtpVersion);
                    return;
                }

                let ack = encode_ack(MessageType::HelloAck);
                if !self.send_message(&ack) {
                    self.negotiation_failed(
                        MessageSeverity::Severe,
                        SevereCode::CannotSend as u32,
                    );
                    return;
                }
                // Build the Commit now; the peer's Hello hash goes into
                // the hvi. AckSent may need it at any moment.
                let commit = self.prepare_commit();
                self.state = State::AckSent;
                match commit {
                    Ok(bytes) => self.commit_pkt = Some(bytes),
                    Err(code) => {
                        self.send_error_packet(
                            code.unwrap_or(ZrtpErrorCode::CriticalSwError),
                        );
                        return;
                    }
                }
                if !self.start_t1() {
                    self.timer_failed(SevereCode::NoTimer);
                    return;
                }
                // more retries to extend the discovery time
                self.t1.max_resend = self.t1_resend_extend;
            }
            _ => {}
        }
    }

    fn timeout_detect(&mut self) {
        // The budget is checked before resending so the peer sees
        // exactly max_resend retransmits, then the extended batch at
        // the capped interval, then silence.
        if self.t1.max_resend > 0 && self.t1.counter >= self.t1.max_resend {
            if !self.t1_extended_used {
                self.t1_extended_used = true;
                self.t1.counter = 0;
                self.t1.max_resend = self.t1_resend_extend;
                self.t1.time = self.t1.capping;
                if !self.activate_timer(self.t1.capping) {
                    self.timer_failed(SevereCode::NoTimer);
                }
                return;
            }
            self.commit_pkt = None;
            self.zrtp_not_supp_other();
            // Stay in Detect; a late peer can still wake us up.
            self.state = State::Detect;
            return;
        }
        if !self.resend_stored() {
            self.send_failed();
            return;
        }
        self.retry_counters[RETRY_HELLO] += 1;
        self.t1.counter += 1;
        self.t1.time = (self.t1.time + self.t1.time).min(self.t1.capping);
        let ms = self.t1.time;
        if !self.activate_timer(ms) {
            self.timer_failed(SevereCode::NoTimer);
        }
    }

    /* AckDetected: peer saw our Hello, now we wait for its Hello. */

    fn ev_ack_detected(&mut self, mtype: MessageType, body: &[u8]) {
        if mtype != MessageType::Hello {
            return;
        }
        if self.save_peer_hello(body).is_err() {
            self.send_error_packet(ZrtpErrorCode::MalformedPacket);
            return;
        }
        self.send_info(MessageSeverity::Info, InfoCode::HelloReceived as u32);
        // Prepare a Commit even though we answer with HelloAck: this
        // checks the Hello and sets up the shared secret data.
        if let Err(code) = self.prepare_commit() {
            self.send_error_packet(code.unwrap_or(ZrtpErrorCode::CriticalSwError));
            return;
        }
        let ack = encode_ack(MessageType::HelloAck);
        self.state = State::WaitCommit;
        self.sent_packet = Some(ack.clone());
        if !self.send_message(&ack) {
            self.send_failed();
        }
    }

    /* AckSent: we acknowledged the peer's Hello and still send ours. */

    fn ev_ack_sent(&mut self, mtype: MessageType, body: &[u8]) {
        match mtype {
            MessageType::HelloAck => {
                self.cancel_timer();
                let Some(commit) = self.commit_pkt.take() else {
                    self.send_error_packet(ZrtpErrorCode::CriticalSwError);
                    return;
                };
                self.sent_packet = Some(commit.clone());
                self.state = State::CommitSent;
                if !self.send_message(&commit) {
                    self.send_failed();
                    return;
                }
                if !self.start_t2() {
                    self.timer_failed(SevereCode::NoTimer);
                }
            }
            MessageType::Hello => {
                // peer did not catch our HelloAck yet
                let ack = encode_ack(MessageType::HelloAck);
                if !self.send_message(&ack) {
                    self.state = State::Detect;
                    self.negotiation_failed(
                        MessageSeverity::Severe,
                        SevereCode::CannotSend as u32,
                    );
                }
            }
            MessageType::Commit => {
                self.cancel_timer();
                self.commit_pkt = None;
                self.respond_to_commit(body);
            }
            _ => {}
        }
    }

    fn timeout_ack_sent(&mut self) {
        if !self.resend_stored() {
            self.send_failed();
            return;
        }
        self.retry_counters[RETRY_HELLO] += 1;
        if self.next_t1() <= 0 {
            self.zrtp_not_supp_other();
            self.commit_pkt = None;
            // Stay around in Detect so a slow peer may still connect.
            self.state = State::Detect;
        }
    }

    /* WaitCommit: responder with HelloAck out. */

    fn ev_wait_commit(&mut self, mtype: MessageType, body: &[u8]) {
        match mtype {
            MessageType::Hello => {
                if !self.resend_stored() {
                    self.send_failed();
                }
            }
            MessageType::Commit => self.respond_to_commit(body),
            _ => {}
        }
    }

    /// Common responder path: answer a Commit with DHPart1, or with
    /// Confirm1 in multi-stream mode.
    fn respond_to_commit(&mut self, body: &[u8]) {
        if self.is_multi_stream() {
            match self.prepare_confirm1_multi(body) {
                Ok(confirm) => {
                    self.sent_packet = Some(confirm.clone());
                    self.state = State::WaitConfirm2;
                    if !self.send_message(&confirm) {
                        self.send_failed();
                    }
                }
                Err(Some(code)) => self.send_error_packet(code),
                Err(None) => {}
            }
        } else {
            match self.prepare_dhpart1(body) {
                Ok(dhpart1) => {
                    self.sent_packet = Some(dhpart1.clone());
                    self.state = State::WaitDHPart2;
                    if !self.send_message(&dhpart1) {
                        self.send_failed();
                    }
                }
                Err(Some(code)) => self.send_error_packet(code),
                Err(None) => {}
            }
        }
    }

    /* CommitSent: we try the Initiator role. */

    fn ev_commit_sent(&mut self, mtype: MessageType, body: &[u8]) {
        match mtype {
            // Delayed discovery messages, ignore.
            MessageType::Hello | MessageType::HelloAck => {}
            MessageType::Commit => self.commit_collision(body),
            MessageType::DhPart1 if !self.is_multi_stream() => {
                self.cancel_timer();
                self.sent_packet = None;
                match self.prepare_dhpart2(body) {
                    Ok(dhpart2) => {
                        self.sent_packet = Some(dhpart2.clone());
                        self.state = State::WaitConfirm1;
                        if !self.send_message(&dhpart2) {
                            self.send_failed();
                            return;
                        }
                        if self.start_t2() {
                            return;
                        }
                        self.timer_failed(SevereCode::NoTimer);
                    }
                    Err(Some(code)) => self.send_error_packet(code),
                    Err(None) => {
                        // Duplicate or early packet; give the peer more
                        // time to send a valid one.
                        if !self.start_t2() {
                            self.timer_failed(SevereCode::NoTimer);
                        }
                    }
                }
            }
            MessageType::Confirm1 if self.is_multi_stream() => {
                self.cancel_timer();
                match self.prepare_confirm2(body) {
                    Ok(confirm2) => {
                        self.sent_packet = Some(confirm2.clone());
                        self.state = State::WaitConfAck;
                        if !self.send_message(&confirm2) {
                            self.send_failed();
                            return;
                        }
                        if !self.start_t2() {
                            self.timer_failed(SevereCode::NoTimer);
                            return;
                        }
                        // Be ready to receive SRTP before the peer gets
                        // our Confirm2.
                        if !self.srtp_secrets_ready(KeyDirection::ForReceiver) {
                            self.send_info(
                                MessageSeverity::Severe,
                                ZrtpErrorCode::CriticalSwError as u32,
                            );
                            self.send_error_packet(ZrtpErrorCode::CriticalSwError);
                        }
                    }
                    Err(Some(code)) => self.send_error_packet(code),
                    Err(None) => {}
                }
            }
            _ => {}
        }
    }

    /// Both sides sent a Commit; higher hvi (or nonce) keeps the
    /// Initiator role, equality is a protocol violation.
    fn commit_collision(&mut self, body: &[u8]) {
        if !self.verify_commit_h2(body) {
            return;
        }
        self.cancel_timer();
        let Ok(commit) = CommitMessage::parse(body) else {
            self.send_error_packet(ZrtpErrorCode::CriticalSwError);
            return;
        };
        match self.compare_commit(&commit) {
            std::cmp::Ordering::Less => self.respond_to_commit(body),
            std::cmp::Ordering::Greater => {
                // We stay Initiator; keep resending our Commit.
                if !self.start_t2() {
                    self.timer_failed(SevereCode::NoTimer);
                }
            }
            std::cmp::Ordering::Equal => {
                let code = match commit.variant {
                    CommitVariant::MultiStream { .. } => ZrtpErrorCode::NonceReused,
                    CommitVariant::Dh { .. } => ZrtpErrorCode::DhErrorWrongHvi,
                };
                self.send_error_packet(code);
            }
        }
    }

    /* WaitDHPart2: responder, DHPart1 is out, no timer. */

    fn ev_wait_dhpart2(&mut self, mtype: MessageType, body: &[u8]) {
        match mtype {
            MessageType::Commit => {
                // peer missed our DHPart1
                if !self.resend_stored() {
                    self.send_failed();
                }
            }
            MessageType::DhPart2 => match self.prepare_confirm1(body) {
                Ok(confirm1) => {
                    self.sent_packet = Some(confirm1.clone());
                    self.state = State::WaitConfirm2;
                    if !self.send_message(&confirm1) {
                        self.send_failed();
                    }
                }
                Err(Some(code)) => self.send_error_packet(code),
                Err(None) => {}
            },
            _ => {}
        }
    }

    /* WaitConfirm1: initiator, DHPart2 is out, T2 running. */

    fn ev_wait_confirm1(&mut self, mtype: MessageType, body: &[u8]) {
        if mtype != MessageType::Confirm1 {
            return;
        }
        self.cancel_timer();
        match self.prepare_confirm2(body) {
            Ok(confirm2) => {
                // Receiver must be up before Confirm2 reaches the peer.
                if !self.srtp_secrets_ready(KeyDirection::ForReceiver) {
                    self.send_info(
                        MessageSeverity::Severe,
                        ZrtpErrorCode::CriticalSwError as u32,
                    );
                    self.send_error_packet(ZrtpErrorCode::CriticalSwError);
                    return;
                }
                self.sent_packet = Some(confirm2.clone());
                self.state = State::WaitConfAck;
                if !self.send_message(&confirm2) {
                    self.send_failed();
                    return;
                }
                if !self.start_t2() {
                    self.timer_failed(SevereCode::NoTimer);
                }
            }
            Err(Some(code)) => self.send_error_packet(code),
            Err(None) => {}
        }
    }

    /* WaitConfirm2: responder, Confirm1 is out, no timer. */

    fn ev_wait_confirm2(&mut self, mtype: MessageType, body: &[u8]) {
        let repeat = mtype == MessageType::DhPart2
            || (self.is_multi_stream() && mtype == MessageType::Commit);
        if repeat {
            if !self.resend_stored() {
                self.send_failed();
            }
            return;
        }
        if mtype != MessageType::Confirm2 {
            return;
        }
        match self.prepare_conf2ack(body) {
            Ok(ack) => {
                self.sent_packet = Some(ack.clone());
                if !self.send_message(&ack) {
                    self.send_failed();
                    return;
                }
                if !self.srtp_secrets_ready(KeyDirection::ForReceiver)
                    || !self.srtp_secrets_ready(KeyDirection::ForSender)
                {
                    self.send_info(
                        MessageSeverity::Severe,
                        ZrtpErrorCode::CriticalSwError as u32,
                    );
                    self.send_error_packet(ZrtpErrorCode::CriticalSwError);
                    return;
                }
                self.state = State::Secure;
                self.send_info(MessageSeverity::Info, InfoCode::SecureStateOn as u32);
                self.secrets_on();
            }
            Err(Some(code)) => self.send_error_packet(code),
            Err(None) => {}
        }
    }

    /* WaitConfAck: initiator, Confirm2 is out, T2 running. */

    fn ev_wait_confack(&mut self, mtype: MessageType, _body: &[u8]) {
        if mtype != MessageType::Conf2Ack {
            return;
        }
        self.cancel_timer();
        self.sent_packet = None;
        // Receiver went active with Confirm2 already.
        if !self.srtp_secrets_ready(KeyDirection::ForSender) {
            self.send_info(MessageSeverity::Severe, ZrtpErrorCode::CriticalSwError as u32);
            self.send_error_packet(ZrtpErrorCode::CriticalSwError);
            return;
        }
        self.state = State::Secure;
        self.send_info(MessageSeverity::Info, InfoCode::SecureStateOn as u32);
        self.secrets_on();
    }

    fn timeout_confack(&mut self) {
        if !self.resend_stored() {
            self.send_failed();
            self.srtp_secrets_off(KeyDirection::ForReceiver);
            return;
        }
        self.retry_counters[RETRY_CONFIRM2] += 1;
        if self.next_t2() <= 0 {
            self.timer_failed(SevereCode::TooMuchRetries);
            self.srtp_secrets_off(KeyDirection::ForReceiver);
        }
    }

    /* Secure */

    fn ev_secure(&mut self, mtype: MessageType, _body: &[u8]) {
        if self.sub_state == SecureSubState::WaitSasRelayAck {
            if mtype == MessageType::RelayAck {
                self.cancel_timer();
                self.sub_state = SecureSubState::Normal;
                self.sent_packet = None;
            }
            return;
        }
        // Peer missed our Conf2Ack and repeats Confirm2.
        if mtype == MessageType::Confirm2 && self.sent_packet.is_some() && !self.resend_stored() {
            self.sent_packet = None;
            self.state = State::Initial;
            self.srtp_secrets_off(KeyDirection::ForSender);
            self.srtp_secrets_off(KeyDirection::ForReceiver);
            self.negotiation_failed(MessageSeverity::Severe, SevereCode::CannotSend as u32);
        }
    }

    fn timeout_secure(&mut self) {
        if self.sub_state != SecureSubState::WaitSasRelayAck {
            return;
        }
        if !self.resend_stored() {
            self.send_failed();
            return;
        }
        if self.next_t2() <= 0 {
            // Relay never acknowledged; give up on the sub-state.
            self.sub_state = SecureSubState::Normal;
            self.sent_packet = None;
        }
    }

    /* WaitErrorAck */

    fn ev_wait_error_ack(&mut self, mtype: MessageType) {
        if mtype == MessageType::ErrorAck {
            self.cancel_timer();
            self.sent_packet = None;
            self.state = State::Initial;
        }
    }

    /// Shared timeout path for states that plainly resend over T2.
    fn timeout_resend(&mut self, counter: usize) {
        if !self.resend_stored() {
            self.send_failed();
            return;
        }
        self.retry_counters[counter] += 1;
        if self.next_t2() <= 0 {
            self.timer_failed(SevereCode::TooMuchRetries);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timer_doubles_until_capped() {
        let mut t = Timer::t2_default();
        t.rearm();
        assert_eq!(t.time, 150);
        let mut seen = Vec::new();
        loop {
            let ms = t.next();
            if ms < 0 {
                break;
            }
            seen.push(ms);
        }
        assert_eq!(seen, vec![300, 600, 1200, 1200, 1200, 1200, 1200, 1200, 1200, 1200]);
    }

    #[test]
    fn t1_budget_is_twenty() {
        let mut t = Timer::t1_default();
        t.rearm();
        let mut n = 0;
        while t.next() >= 0 {
            n += 1;
        }
        assert_eq!(n, T1_MAX_RESEND);
    }
}
