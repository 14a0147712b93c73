/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The ZRTP protocol engine. One `ZrtpSession` drives one media stream:
//! it prepares and validates packets, owns the negotiated suite and all
//! derived key material, talks to the ZID cache, and surfaces events to
//! the host through the callback trait. Protocol timing and retransmits
//! live in the state machine half (`state.rs`).

use std::sync::{Arc, Mutex, Weak};

use log::{debug, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::cache::{Zid, ZidCache, ZidRecord};
use crate::callback::{EnrollmentInfo, KeyDirection, ZrtpCallback};
use crate::codes::{InfoCode, MessageSeverity, SevereCode, WarningCode};
use crate::config::ZrtpConfig;
use crate::crypto::hash::{implicit_digest, implicit_hmac};
use crate::crypto::{secure_eq, select_suite, NegotiatedSuite};
use crate::crypto::{AuthTag, CipherAlgorithm, DhContext, HashAlgorithm, KeyAgreement, SasType};
use crate::error::{ZrtpError, ZrtpErrorCode};
use crate::frames::FrameAssembler;
use crate::keys::{
    compute_pbx_secret, compute_s0_dh, compute_s0_multi, secret_ids, verify_chain_link,
    HashChain, KeyMaterial, Role, SrtpSecrets, SECRET_AUX, SECRET_PBX, SECRET_RS1, SECRET_RS2,
};
use crate::packet::*;
use crate::proto::*;
use crate::state::{SecureSubState, State, Timer};

/// Negotiation details the host can query after the handshake.
#[derive(Debug, Clone, Default)]
pub struct DetailInfo {
    /// SECRET_* bits for the secrets found in the cache.
    pub secrets_cached: u32,
    /// SECRET_* bits for the secrets both sides matched.
    pub secrets_matched: u32,
    pub hash: String,
    pub cipher: String,
    pub pub_key: String,
    pub sas_type: String,
    pub auth_length: String,
}

/// Everything a second stream needs to key itself off a master session.
/// The master's session key is copied here; the sessions share nothing.
pub struct MultiStreamParams {
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub auth_tag: AuthTag,
    pub(crate) session_key: Zeroizing<Vec<u8>>,
}

impl MultiStreamParams {
    /// Opaque serialization for hosts that pass the parameters through
    /// signaling-style plumbing.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Vec::with_capacity(12 + self.session_key.len());
        out.extend_from_slice(self.hash.code());
        out.extend_from_slice(self.cipher.code());
        out.extend_from_slice(self.auth_tag.code());
        out.extend_from_slice(&self.session_key);
        Zeroizing::new(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() <= 12 {
            return None;
        }
        Some(MultiStreamParams {
            hash: HashAlgorithm::from_code(&bytes[0..4])?,
            cipher: CipherAlgorithm::from_code(&bytes[4..8])?,
            auth_tag: AuthTag::from_code(&bytes[8..12])?,
            session_key: Zeroizing::new(bytes[12..].to_vec()),
        })
    }
}

/// The eight role-keyed retained-secret identifiers.
#[derive(Default)]
pub(crate) struct SecretIds {
    pub rs1_i: [u8; RS_ID_SIZE],
    pub rs1_r: [u8; RS_ID_SIZE],
    pub rs2_i: [u8; RS_ID_SIZE],
    pub rs2_r: [u8; RS_ID_SIZE],
    pub aux_i: [u8; RS_ID_SIZE],
    pub aux_r: [u8; RS_ID_SIZE],
    pub pbx_i: [u8; RS_ID_SIZE],
    pub pbx_r: [u8; RS_ID_SIZE],
}

/// `Err(None)` means drop the packet silently, `Err(Some(code))` sends
/// a wire Error message.
pub(crate) type PrepareResult<T> = Result<T, Option<ZrtpErrorCode>>;

/// Retry counter indices, mirroring the statistics surface.
pub(crate) const RETRY_HELLO: usize = 0;
pub(crate) const RETRY_COMMIT: usize = 1;
pub(crate) const RETRY_DHPART2: usize = 2;
pub(crate) const RETRY_CONFIRM2: usize = 3;
pub(crate) const RETRY_ERROR: usize = 4;

pub struct ZrtpSession {
    pub(crate) callback: Weak<dyn ZrtpCallback>,
    pub(crate) cache: Arc<Mutex<dyn ZidCache>>,
    pub(crate) config: ZrtpConfig,

    /* state machine */
    pub(crate) state: State,
    pub(crate) sub_state: SecureSubState,
    pub(crate) t1: Timer,
    pub(crate) t2: Timer,
    pub(crate) t1_resend_extend: i32,
    pub(crate) t1_extended_used: bool,
    pub(crate) sent_packet: Option<Vec<u8>>,
    pub(crate) commit_pkt: Option<Vec<u8>>,
    pub(crate) retry_counters: [u32; 5],
    pub(crate) transport_overhead: usize,
    pub(crate) started: bool,

    /* identity and roles */
    own_zid: Zid,
    peer_zid: Option<Zid>,
    role: Role,

    /* transcript captures, raw message bytes without CRC */
    own_hello: Vec<u8>,
    hello_hash: [u8; HASH_IMAGE_SIZE],
    peer_hello: Option<HelloMessage>,
    peer_hello_bytes: Vec<u8>,
    peer_hello_hash: [u8; HASH_IMAGE_SIZE],
    own_commit: Option<Vec<u8>>,
    peer_commit_bytes: Vec<u8>,
    own_dhpart1: Option<Vec<u8>>,
    own_dhpart2: Option<Vec<u8>>,
    peer_dhpart_bytes: Vec<u8>,

    /* hash chain */
    chain: HashChain,
    peer_h3: [u8; HASH_IMAGE_SIZE],
    peer_h2: [u8; HASH_IMAGE_SIZE],
    peer_h1: [u8; HASH_IMAGE_SIZE],

    /* negotiation */
    suite: Option<NegotiatedSuite>,
    multi_stream: bool,
    multi_stream_available: bool,
    master_params: Option<MultiStreamParams>,
    peer_nonces: Vec<[u8; NONCE_SIZE]>,

    /* key agreement */
    dh: Option<DhContext>,
    hvi: [u8; HVI_SIZE],
    peer_hvi: [u8; HVI_SIZE],
    own_nonce: [u8; NONCE_SIZE],

    /* retained secrets */
    zid_rec: Option<ZidRecord>,
    ids: SecretIds,
    aux_secret: Option<Zeroizing<Vec<u8>>>,
    save_zid_record: bool,

    /* derived material */
    keys: Option<KeyMaterial>,
    sas: String,

    /* confirm bookkeeping */
    enrollment_mode: bool,
    mitm_seen: bool,
    peer_is_enrolled: bool,
    pbx_secret_tmp: Option<Zeroizing<Vec<u8>>>,
    signature_data_out: Option<Vec<u8>>,
    signature_data_in: Option<Vec<u8>>,
    sign_sas_seen: bool,
    peer_disclosure_seen: bool,
    peer_client_id: String,
    peer_version: [u8; 4],
    peer_ssrc: u32,
    detail: DetailInfo,

    /* frames */
    pub(crate) frame_batch: u8,
    pub(crate) assembler: FrameAssembler,
}

impl ZrtpSession {
    /// Build a session. `client_id` lands in the Hello message (at most
    /// 16 characters, blank padded). The engine stays quiet until
    /// [`start_zrtp_engine`](Self::start_zrtp_engine).
    pub fn new(
        client_id: &str,
        callback: Weak<dyn ZrtpCallback>,
        mut config: ZrtpConfig,
        cache: Arc<Mutex<dyn ZidCache>>,
    ) -> Result<Self, ZrtpError> {
        config.ensure_mandatory();
        let own_zid = cache
            .lock()
            .map_err(|_| ZrtpError::Cache("poisoned cache lock".into()))?
            .local_zid();

        let mut session = ZrtpSession {
            callback,
            cache,
            config,
            state: State::Initial,
            sub_state: SecureSubState::Normal,
            t1: Timer::t1_default(),
            t2: Timer::t2_default(),
            t1_resend_extend: T1_RESEND_EXTEND,
            t1_extended_used: false,
            sent_packet: None,
            commit_pkt: None,
            retry_counters: [0; 5],
            transport_overhead: RTP_HEADER_SIZE,
            started: false,
            own_zid,
            peer_zid: None,
            role: Role::NoRole,
            own_hello: Vec::new(),
            hello_hash: [0; HASH_IMAGE_SIZE],
            peer_hello: None,
            peer_hello_bytes: Vec::new(),
            peer_hello_hash: [0; HASH_IMAGE_SIZE],
            own_commit: None,
            peer_commit_bytes: Vec::new(),
            own_dhpart1: None,
            own_dhpart2: None,
            peer_dhpart_bytes: Vec::new(),
            chain: HashChain::generate(),
            peer_h3: [0; HASH_IMAGE_SIZE],
            peer_h2: [0; HASH_IMAGE_SIZE],
            peer_h1: [0; HASH_IMAGE_SIZE],
            suite: None,
            multi_stream: false,
            multi_stream_available: false,
            master_params: None,
            peer_nonces: Vec::new(),
            dh: None,
            hvi: [0; HVI_SIZE],
            peer_hvi: [0; HVI_SIZE],
            own_nonce: [0; NONCE_SIZE],
            zid_rec: None,
            ids: SecretIds::default(),
            aux_secret: None,
            save_zid_record: true,
            keys: None,
            sas: String::new(),
            enrollment_mode: false,
            mitm_seen: false,
            peer_is_enrolled: false,
            pbx_secret_tmp: None,
            signature_data_out: None,
            signature_data_in: None,
            sign_sas_seen: false,
            peer_disclosure_seen: false,
            peer_client_id: String::new(),
            peer_version: [0; 4],
            peer_ssrc: 0,
            detail: DetailInfo::default(),
            frame_batch: 0,
            assembler: FrameAssembler::new(),
        };
        session.build_hello(client_id);
        Ok(session)
    }

    fn build_hello(&mut self, client_id: &str) {
        let mut id = *CLIENT_ID;
        let given = client_id.as_bytes();
        let n = given.len().min(CLIENT_ID_SIZE);
        id[..n].copy_from_slice(&given[..n]);
        for b in id.iter_mut().skip(n) {
            *b = b' ';
        }

        let mut flags = 0u8;
        if self.config.mitm_enabled {
            flags |= HELLO_FLAG_MITM;
        }
        if self.config.sas_sign_support {
            flags |= HELLO_FLAG_SIGNATURE;
        }
        if self.config.disclosure_flag {
            flags |= HELLO_FLAG_DISCLOSURE;
        }

        let hello = HelloMessage {
            version: *ZRTP_VERSION,
            client_id: id,
            h3: self.chain.h3,
            zid: self.own_zid,
            flags,
            hashes: self.config.hash_algos.iter().map(|a| *a.code()).collect(),
            ciphers: self.config.cipher_algos.iter().map(|a| *a.code()).collect(),
            auth_tags: self.config.auth_tag_algos.iter().map(|a| *a.code()).collect(),
            key_agreements: self.config.key_agreement_algos.iter().map(|a| *a.code()).collect(),
            sas_types: self.config.sas_algos.iter().map(|a| *a.code()).collect(),
            mac: [0; MESSAGE_MAC_SIZE],
        };
        let mut bytes = hello.encode();
        patch_mac(&mut bytes, &self.chain.h2);
        self.hello_hash = implicit_digest(&bytes);
        self.own_hello = bytes;
    }

    /* Host-facing API */

    /// Kick off the discovery phase: send Hello, arm T1. Calling it
    /// again while still in discovery restarts the Hello schedule.
    pub fn start_zrtp_engine(&mut self) {
        if !self.started {
            self.started = true;
            self.process_event_initial();
        } else if self.state == State::Detect {
            self.process_event_initial();
        }
    }

    /// Stop ZRTP processing, zeroize derived material and return to
    /// Initial. Idempotent; inbound traffic afterwards is dropped.
    pub fn stop_zrtp(&mut self) {
        if !self.started && self.state == State::Initial {
            return;
        }
        self.cancel_timer();
        self.keys = None;
        self.dh = None;
        self.pbx_secret_tmp = None;
        self.sas.clear();
        self.assembler.clear();
        if let Some(cb) = self.cb() {
            cb.srtp_secrets_off(KeyDirection::ForSender);
            cb.srtp_secrets_off(KeyDirection::ForReceiver);
        }
        self.sent_packet = None;
        self.commit_pkt = None;
        self.state = State::Initial;
        self.sub_state = SecureSubState::Normal;
        self.started = false;
    }

    /// Process one inbound ZRTP message. `msg` starts at the message
    /// preamble and includes the trailing CRC, which the host has
    /// already verified. `packet_length` is the length of the whole
    /// received packet including the transport header.
    pub fn process_zrtp_message(&mut self, msg: &[u8], peer_ssrc: u32, packet_length: usize) {
        self.peer_ssrc = peer_ssrc;
        self.dispatch_message(msg, packet_length);
    }

    /// Process one inbound ZRTP-2022 frame (CRC included). Complete
    /// messages pop out of the reassembler and run the normal path.
    pub fn process_zrtp_frame(&mut self, frame: &[u8], peer_ssrc: u32) {
        if !self.started || frame.len() <= CRC_SIZE {
            return;
        }
        self.peer_ssrc = peer_ssrc;
        let body = &frame[..frame.len() - CRC_SIZE];
        match self.assembler.add(body) {
            Ok(Some(message)) => {
                // length checks were done per frame, signalled by 0
                let mut sealed = message;
                crate::crc::append(&mut sealed);
                self.dispatch_message(&sealed, 0);
            }
            Ok(None) => {}
            Err(_) => self.send_error_packet(ZrtpErrorCode::MalformedPacket),
        }
    }

    /// Timer service tick from the host.
    pub fn process_timeout(&mut self) {
        if self.started {
            // A protocol timeout also obsoletes any half-assembled
            // frame batch; the peer retransmits whole batches.
            self.assembler.clear();
            self.process_event_timeout();
        }
    }

    /// Set the auxiliary shared secret; must happen before the engine
    /// starts.
    pub fn set_aux_secret(&mut self, secret: &[u8]) {
        if !self.started {
            self.aux_secret = Some(Zeroizing::new(secret.to_vec()));
        }
    }

    /// The user confirmed the SAS. Ignored in paranoid mode.
    pub fn sas_verified(&mut self) {
        if self.config.paranoid_mode {
            return;
        }
        if let Some(rec) = self.zid_rec.as_mut() {
            rec.set_sas_verified(true);
            let rec = rec.clone();
            self.save_record(&rec);
        }
    }

    /// Clear the stored SAS-verified flag for this peer.
    pub fn reset_sas_verified(&mut self) {
        if let Some(rec) = self.zid_rec.as_mut() {
            rec.set_sas_verified(false);
            let rec = rec.clone();
            self.save_record(&rec);
        }
    }

    pub fn is_sas_verified(&self) -> bool {
        self.zid_rec.as_ref().map_or(false, |r| r.is_sas_verified())
    }

    /// `"<version> <hex>"` of our Hello, for SDP signaling. Only index
    /// 0 exists while a single protocol version is supported.
    pub fn get_hello_hash(&self, index: usize) -> Option<String> {
        if index != 0 {
            return None;
        }
        Some(format!(
            "{} {}",
            String::from_utf8_lossy(ZRTP_VERSION),
            hex::encode(self.hello_hash)
        ))
    }

    /// Hash of the peer's Hello, empty until one arrived.
    pub fn get_peer_hello_hash(&self) -> Option<String> {
        if self.peer_hello.is_none() {
            return None;
        }
        Some(format!(
            "{} {}",
            String::from_utf8_lossy(&self.peer_version),
            hex::encode(self.peer_hello_hash)
        ))
    }

    /// Multi-stream parameters of a secure DH session, for keying
    /// additional streams.
    pub fn get_multi_str_params(&self) -> Option<MultiStreamParams> {
        let suite = self.suite?;
        let keys = self.keys.as_ref()?;
        if self.state != State::Secure || self.multi_stream || keys.zrtp_session.is_empty() {
            return None;
        }
        Some(MultiStreamParams {
            hash: suite.hash,
            cipher: suite.cipher,
            auth_tag: suite.auth_tag,
            session_key: keys.zrtp_session.clone(),
        })
    }

    /// Make this session a multi-stream slave of the session that
    /// produced `params`. Must be called before the engine starts.
    pub fn set_multi_str_params(&mut self, params: MultiStreamParams) -> Result<(), ZrtpError> {
        if self.started {
            return Err(ZrtpError::InvalidState);
        }
        self.multi_stream = true;
        self.master_params = Some(params);
        Ok(())
    }

    pub fn is_multi_stream(&self) -> bool {
        self.multi_stream
    }

    /// True when the peer's Hello offered multi-stream mode.
    pub fn is_multi_stream_available(&self) -> bool {
        self.multi_stream_available
    }

    /// Emulate Conf2Ack: the first valid SRTP packet received by the
    /// Initiator switches security on even if the Conf2Ack was lost.
    pub fn conf2_ack_secure(&mut self) {
        if self.state == State::WaitConfAck {
            self.process_event_conf2ack_emulated();
        }
    }

    pub fn get_peer_zid(&self) -> Option<Zid> {
        self.peer_zid
    }

    pub fn get_detail_info(&self) -> &DetailInfo {
        &self.detail
    }

    pub fn peer_client_id(&self) -> &str {
        &self.peer_client_id
    }

    pub fn peer_protocol_version(&self) -> String {
        if self.peer_version == [0; 4] {
            String::new()
        } else {
            String::from_utf8_lossy(&self.peer_version).into_owned()
        }
    }

    /// Install signature data to be carried in our Confirm message.
    /// Length must be a multiple of 4 and fit the 9-bit length field.
    pub fn set_signature_data(&mut self, data: &[u8]) -> bool {
        if data.is_empty()
            || data.len() % ZRTP_WORD_SIZE != 0
            || data.len() / ZRTP_WORD_SIZE > MAX_SIGNATURE_WORDS
        {
            return false;
        }
        self.signature_data_out = Some(data.to_vec());
        true
    }

    /// Signature data received in the peer's Confirm message.
    pub fn get_signature_data(&self) -> Option<&[u8]> {
        self.signature_data_in.as_deref()
    }

    /// The full SAS hash, for PBX SAS-relay construction.
    pub fn get_sas_hash(&self) -> Option<&[u8]> {
        self.keys.as_ref().map(|k| &k.sas_hash[..])
    }

    pub fn get_sas_type(&self) -> Option<SasType> {
        self.suite.map(|s| s.sas_type)
    }

    /// The exported key (RFC 6189 section 4.5.2).
    pub fn get_exported_key(&self) -> Option<&[u8]> {
        self.keys.as_ref().map(|k| &k.exported_key[..])
    }

    pub fn get_zrtp_role(&self) -> Role {
        self.role
    }

    pub fn is_peer_disclosure_flag(&self) -> bool {
        self.peer_disclosure_seen
    }

    pub fn is_peer_enrolled(&self) -> bool {
        self.peer_is_enrolled
    }

    pub fn secure_since(&self) -> i64 {
        self.zid_rec.as_ref().map_or(0, |r| r.secure_since)
    }

    /// Enable PBX enrollment actions for this session. Only effective
    /// when the configuration has MitM support switched on.
    pub fn set_enrollment_mode(&mut self, enrollment: bool) {
        self.enrollment_mode = enrollment && self.config.mitm_enabled;
    }

    pub fn is_enrollment_mode(&self) -> bool {
        self.enrollment_mode
    }

    /// The user answered the enrollment dialog.
    pub fn accept_enrollment(&mut self, accepted: bool) {
        let Some(cb) = self.cb() else { return };
        if !accepted {
            cb.inform_enrollment(EnrollmentInfo::Canceled);
            return;
        }
        match (self.zid_rec.as_mut(), self.pbx_secret_tmp.as_ref()) {
            (Some(rec), Some(secret)) => {
                rec.set_mitm_key(secret);
                let rec = rec.clone();
                self.save_record(&rec);
                self.peer_is_enrolled = true;
                cb.inform_enrollment(EnrollmentInfo::Ok);
            }
            _ => cb.inform_enrollment(EnrollmentInfo::Canceled),
        }
    }

    /// Promote RS2 to valid, e.g. after the user confirmed the SAS
    /// following a cache mismatch.
    pub fn set_rs2_valid(&mut self) {
        if let Some(rec) = self.zid_rec.as_mut() {
            rec.set_rs2_valid();
            let rec = rec.clone();
            self.save_record(&rec);
        }
    }

    pub fn in_state(&self, state: State) -> bool {
        self.state == state
    }

    /// Per-message retransmit counters: Hello, Commit, DHPart2,
    /// Confirm2, Error.
    pub fn retry_counters(&self) -> [u32; 5] {
        self.retry_counters
    }

    /* Timer and transport tuning */

    pub fn set_t1_resend(&mut self, counter: i32) {
        if counter < 0 || counter >= MIN_RESEND_COUNTER {
            self.t1.max_resend = counter;
        }
    }

    pub fn set_t1_resend_extend(&mut self, counter: i32) {
        self.t1_resend_extend = counter;
    }

    pub fn set_t1_capping(&mut self, capping: i32) {
        if capping >= T1_MIN_CAPPING_MS {
            self.t1.capping = capping;
        }
    }

    pub fn set_t2_resend(&mut self, counter: i32) {
        if counter < 0 || counter >= MIN_RESEND_COUNTER {
            self.t2.max_resend = counter;
        }
    }

    pub fn set_t2_capping(&mut self, capping: i32) {
        if capping >= T2_MIN_CAPPING_MS {
            self.t2.capping = capping;
        }
    }

    /// Transport header length used for inbound length sanity checks.
    pub fn set_transport_overhead(&mut self, overhead: usize) {
        self.transport_overhead = overhead;
    }

    /// Build and send a SASrelay packet (trusted PBX side).
    pub fn send_sas_relay_packet(&mut self, sas_hash: &[u8; HASH_IMAGE_SIZE], render: SasType) -> bool {
        if self.state != State::Secure {
            return false;
        }
        let Some(relay) = self.build_sas_relay(sas_hash, render) else {
            return false;
        };
        self.start_sas_relay(relay)
    }

    /* Internal plumbing shared with the state machine */

    pub(crate) fn cb(&self) -> Option<Arc<dyn ZrtpCallback>> {
        self.callback.upgrade()
    }

    pub(crate) fn send_info(&self, severity: MessageSeverity, sub_code: u32) {
        if let Some(cb) = self.cb() {
            cb.send_info(severity, sub_code);
        }
    }

    pub(crate) fn negotiation_failed(&self, severity: MessageSeverity, sub_code: u32) {
        if let Some(cb) = self.cb() {
            cb.negotiation_failed(severity, sub_code);
        }
    }

    pub(crate) fn zrtp_not_supp_other(&self) {
        if let Some(cb) = self.cb() {
            cb.zrtp_not_supp_other();
        }
    }

    pub(crate) fn activate_timer(&self, ms: i32) -> bool {
        self.cb().map_or(false, |cb| cb.activate_timer(ms))
    }

    pub(crate) fn cancel_timer(&self) -> bool {
        self.cb().map_or(false, |cb| cb.cancel_timer())
    }

    /// Seal and hand a message to the transport, as plain message or
    /// wrapped into ZRTP frames.
    pub(crate) fn send_message(&mut self, message: &[u8]) -> bool {
        let Some(cb) = self.cb() else { return false };
        if self.config.use_zrtp_frames {
            let batch = self.frame_batch;
            self.frame_batch = self.frame_batch.wrapping_add(1);
            for frame in crate::frames::pack(message, batch) {
                if !cb.send_data(&seal(frame)) {
                    return false;
                }
            }
            true
        } else {
            cb.send_data(&seal(message.to_vec()))
        }
    }

    pub(crate) fn srtp_secrets_ready(&mut self, part: KeyDirection) -> bool {
        let Some(cb) = self.cb() else { return false };
        let Some(keys) = self.keys.as_ref() else { return false };
        let Some(suite) = self.suite else { return false };
        let secrets = SrtpSecrets {
            cipher: suite.cipher,
            auth_tag: suite.auth_tag,
            key_initiator: keys.srtp_key_i.clone(),
            salt_initiator: keys.srtp_salt_i.clone(),
            key_responder: keys.srtp_key_r.clone(),
            salt_responder: keys.srtp_salt_r.clone(),
            role: self.role,
            sas: self.sas.clone(),
        };
        cb.srtp_secrets_ready(&secrets, part)
    }

    pub(crate) fn srtp_secrets_off(&self, part: KeyDirection) {
        if let Some(cb) = self.cb() {
            cb.srtp_secrets_off(part);
        }
    }

    /// Entering the secure state: announce cipher and SAS to the host.
    pub(crate) fn secrets_on(&self) {
        let Some(cb) = self.cb() else { return };
        let Some(suite) = self.suite else { return };
        let cipher = format!(
            "{}/{}",
            String::from_utf8_lossy(suite.cipher.code()).trim_end(),
            String::from_utf8_lossy(suite.auth_tag.code()).trim_end(),
        );
        let verified = !self.config.paranoid_mode && self.is_sas_verified();
        cb.srtp_secrets_on(cipher, self.sas.clone(), verified);
    }

    fn save_record(&self, record: &ZidRecord) {
        if let Ok(mut cache) = self.cache.lock() {
            if let Err(e) = cache.save_record(record) {
                warn!("ZID cache save failed: {}", e);
                self.send_info(MessageSeverity::Severe, SevereCode::ProtocolError as u32);
            }
        }
    }

    /* Inbound dispatch */

    fn dispatch_message(&mut self, msg: &[u8], packet_length: usize) {
        if !self.started {
            return;
        }
        if msg.len() <= CRC_SIZE {
            return;
        }
        let body = &msg[..msg.len() - CRC_SIZE];
        let Some(mtype) = MessageType::of(body) else {
            self.send_error_packet(ZrtpErrorCode::MalformedPacket);
            return;
        };

        // Length sanity for all states except WaitErrorAck; frame
        // reassembly passes 0 because frames were checked individually.
        if self.state != State::WaitErrorAck && packet_length > 0 {
            let words = u16::from_be_bytes([body[2], body[3]]) as usize;
            let expected = words * ZRTP_WORD_SIZE + CRC_SIZE + self.transport_overhead;
            if words * ZRTP_WORD_SIZE != body.len() || expected != packet_length {
                debug!("length mismatch: expected {} got {}", expected, packet_length);
                self.send_error_packet(ZrtpErrorCode::MalformedPacket);
                return;
            }
        }

        match mtype {
            MessageType::Error => {
                // Stop retransmits, acknowledge, let the state decide.
                self.cancel_timer();
                if let Ok(err) = ErrorMessage::parse(body) {
                    let ack = encode_ack(MessageType::ErrorAck);
                    self.send_message(&ack);
                    self.process_event_error(err.code);
                }
            }
            MessageType::Ping => {
                if let Ok(ping) = PingMessage::parse(body) {
                    let ack = self.prepare_ping_ack(&ping);
                    self.send_message(&ack);
                }
            }
            MessageType::SasRelay => {
                if let Ok(relay) = SasRelayMessage::parse(body) {
                    if self.process_sas_relay(&relay) {
                        let ack = encode_ack(MessageType::RelayAck);
                        self.send_message(&ack);
                    }
                }
            }
            MessageType::GoClear => {
                // GoClear is optional; outside the secure state it is
                // just noise.
                if self.state == State::Secure {
                    if self.config.allow_clear {
                        let ack = encode_ack(MessageType::ClearAck);
                        self.send_message(&ack);
                    } else {
                        self.send_error_packet(ZrtpErrorCode::GoClearNotAllowed);
                    }
                }
            }
            _ => self.process_event_packet(mtype, body),
        }
    }

    /* Packet preparation, the ZRtp half of the engine */

    pub(crate) fn hello_bytes(&self) -> Vec<u8> {
        self.own_hello.clone()
    }

    pub(crate) fn sent_version_int(&self) -> i32 {
        ZRTP_VERSION_INT
    }

    /// Remember everything interesting about a peer Hello.
    pub(crate) fn save_peer_hello(&mut self, bytes: &[u8]) -> Result<(), ZrtpErrorCode> {
        let hello = HelloMessage::parse(bytes).map_err(|_| ZrtpErrorCode::MalformedPacket)?;
        self.peer_hello_bytes = bytes.to_vec();
        self.peer_hello_hash = implicit_digest(bytes);
        self.peer_h3 = hello.h3;
        self.peer_zid = Some(hello.zid);
        self.peer_version = hello.version;
        self.peer_client_id = String::from_utf8_lossy(&hello.client_id).trim_end().to_string();
        self.multi_stream_available = hello.key_agreements.iter().any(|c| c == b"Mult");
        self.mitm_seen = hello.is_mitm();
        self.sign_sas_seen = hello.is_sas_sign();
        self.peer_hello = Some(hello);
        Ok(())
    }

    pub(crate) fn peer_version_int(&self) -> i32 {
        // "1.10" -> 11, mirrors the integer comparison of versions
        let major = (self.peer_version[0] as char).to_digit(10).unwrap_or(0) as i32;
        let minor = (self.peer_version[2] as char).to_digit(10).unwrap_or(0) as i32;
        major * 10 + minor
    }

    /// Build our Commit from the peer's Hello: select algorithms, set
    /// up the DH context, precompute DHPart2 and the hvi.
    pub(crate) fn prepare_commit(&mut self) -> PrepareResult<Vec<u8>> {
        let Some(hello) = self.peer_hello.clone() else {
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        };
        if hello.zid == self.own_zid {
            return Err(Some(ZrtpErrorCode::EqualZidHello));
        }
        if self.multi_stream {
            return self.prepare_commit_multi();
        }

        let suite = select_suite(
            self.config.selection_policy,
            &self.config.hash_algos,
            &self.config.cipher_algos,
            &self.config.auth_tag_algos,
            &self.config.key_agreement_algos,
            &self.config.sas_algos,
            &hello.hashes,
            &hello.ciphers,
            &hello.auth_tags,
            &hello.key_agreements,
            &hello.sas_types,
        );
        self.adopt_suite(suite);
        self.role = Role::Initiator;

        self.load_zid_record()?;
        self.compute_secret_ids();

        let dh = DhContext::generate(suite.key_agreement)
            .ok_or(Some(ZrtpErrorCode::UnsuppPkExchange))?;

        // DHPart2 must exist before Commit: the hvi commits us to it.
        let dhpart2 = self.build_dhpart(MessageType::DhPart2, &dh);
        self.hvi = {
            let mut hvi = [0u8; HVI_SIZE];
            let digest = suite.hash.digest_list(&[&dhpart2, &self.peer_hello_bytes]);
            hvi.copy_from_slice(&digest[..HVI_SIZE]);
            hvi
        };
        self.dh = Some(dh);
        self.own_dhpart2 = Some(dhpart2);

        let commit = CommitMessage {
            h2: self.chain.h2,
            zid: self.own_zid,
            hash: *suite.hash.code(),
            cipher: *suite.cipher.code(),
            auth_tag: *suite.auth_tag.code(),
            key_agreement: *suite.key_agreement.code(),
            sas_type: *suite.sas_type.code(),
            variant: CommitVariant::Dh { hvi: self.hvi },
            mac: [0; MESSAGE_MAC_SIZE],
        };
        let mut bytes = commit.encode();
        patch_mac(&mut bytes, &self.chain.h1);
        self.own_commit = Some(bytes.clone());
        self.send_info(MessageSeverity::Info, InfoCode::CommitGenerated as u32);
        Ok(bytes)
    }

    fn prepare_commit_multi(&mut self) -> PrepareResult<Vec<u8>> {
        let hello = self.peer_hello.as_ref().expect("checked by caller");
        if !self.multi_stream_available {
            return Err(Some(ZrtpErrorCode::UnsuppPkExchange));
        }
        let Some(master) = self.master_params.as_ref() else {
            return Err(Some(ZrtpErrorCode::NoSharedSecret));
        };
        // Algorithms are pinned by the master session; the peer must
        // support them or the master negotiation would have failed.
        let suite = NegotiatedSuite {
            hash: master.hash,
            cipher: master.cipher,
            auth_tag: master.auth_tag,
            key_agreement: KeyAgreement::Mult,
            sas_type: crate::crypto::find_best_sas_type(&self.config.sas_algos, &hello.sas_types),
        };
        self.adopt_suite(suite);
        self.role = Role::Initiator;
        OsRng.fill_bytes(&mut self.own_nonce);

        let commit = CommitMessage {
            h2: self.chain.h2,
            zid: self.own_zid,
            hash: *suite.hash.code(),
            cipher: *suite.cipher.code(),
            auth_tag: *suite.auth_tag.code(),
            key_agreement: *KeyAgreement::Mult.code(),
            sas_type: *suite.sas_type.code(),
            variant: CommitVariant::MultiStream { nonce: self.own_nonce },
            mac: [0; MESSAGE_MAC_SIZE],
        };
        let mut bytes = commit.encode();
        patch_mac(&mut bytes, &self.chain.h1);
        self.own_commit = Some(bytes.clone());
        Ok(bytes)
    }

    fn adopt_suite(&mut self, suite: NegotiatedSuite) {
        self.suite = Some(suite);
        self.detail.hash = String::from_utf8_lossy(suite.hash.code()).trim_end().to_string();
        self.detail.cipher = String::from_utf8_lossy(suite.cipher.code()).trim_end().to_string();
        self.detail.pub_key =
            String::from_utf8_lossy(suite.key_agreement.code()).trim_end().to_string();
        self.detail.sas_type =
            String::from_utf8_lossy(suite.sas_type.code()).trim_end().to_string();
        self.detail.auth_length =
            String::from_utf8_lossy(suite.auth_tag.code()).trim_end().to_string();
    }

    fn load_zid_record(&mut self) -> PrepareResult<()> {
        let peer = self.peer_zid.expect("peer hello parsed first");
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Some(ZrtpErrorCode::CriticalSwError))?;
        match cache.get_record(&peer) {
            Ok(rec) => {
                self.peer_is_enrolled = rec.is_mitm_key_available();
                self.detail.secrets_cached = 0;
                if rec.is_rs1_valid() {
                    self.detail.secrets_cached |= SECRET_RS1;
                }
                if rec.is_rs2_valid() {
                    self.detail.secrets_cached |= SECRET_RS2;
                }
                if rec.is_mitm_key_available() {
                    self.detail.secrets_cached |= SECRET_PBX;
                }
                self.zid_rec = Some(rec);
                Ok(())
            }
            Err(_) => Err(Some(ZrtpErrorCode::EqualZidHello)),
        }
    }

    /// Retained-secret identifiers under the negotiated hash. Slots
    /// without a cached secret get random identifiers, so a peer can
    /// not probe what we have cached.
    fn compute_secret_ids(&mut self) {
        let hash = self.suite.expect("suite adopted").hash;
        let rec = self.zid_rec.as_ref().expect("record loaded");
        let mut ids = SecretIds::default();

        if rec.is_rs1_valid() {
            (ids.rs1_i, ids.rs1_r) = secret_ids(hash, &rec.rs1);
        } else {
            OsRng.fill_bytes(&mut ids.rs1_i);
            OsRng.fill_bytes(&mut ids.rs1_r);
        }
        if rec.is_rs2_valid() {
            (ids.rs2_i, ids.rs2_r) = secret_ids(hash, &rec.rs2);
        } else {
            OsRng.fill_bytes(&mut ids.rs2_i);
            OsRng.fill_bytes(&mut ids.rs2_r);
        }
        match self.aux_secret.as_ref() {
            // The aux secret ids are role keyed like the others; both
            // sides must install the same aux secret out of band.
            Some(aux) => (ids.aux_i, ids.aux_r) = secret_ids(hash, aux),
            None => {
                OsRng.fill_bytes(&mut ids.aux_i);
                OsRng.fill_bytes(&mut ids.aux_r);
            }
        }
        if rec.is_mitm_key_available() {
            (ids.pbx_i, ids.pbx_r) = secret_ids(hash, &rec.mitm_key);
        } else {
            OsRng.fill_bytes(&mut ids.pbx_i);
            OsRng.fill_bytes(&mut ids.pbx_r);
        }
        self.ids = ids;
    }

    fn build_dhpart(&self, mtype: MessageType, dh: &DhContext) -> Vec<u8> {
        let initiator = mtype == MessageType::DhPart2;
        let msg = DhPartMessage {
            mtype,
            h1: self.chain.h1,
            rs1_id: if initiator { self.ids.rs1_i } else { self.ids.rs1_r },
            rs2_id: if initiator { self.ids.rs2_i } else { self.ids.rs2_r },
            aux_secret_id: if initiator { self.ids.aux_i } else { self.ids.aux_r },
            pbx_secret_id: if initiator { self.ids.pbx_i } else { self.ids.pbx_r },
            pv: dh.public_value().to_vec(),
            mac: [0; MESSAGE_MAC_SIZE],
        };
        let mut bytes = msg.encode();
        patch_mac(&mut bytes, &*self.chain.h0);
        bytes
    }

    /// Responder path: peer's Commit arrived, answer with DHPart1.
    pub(crate) fn prepare_dhpart1(&mut self, commit_bytes: &[u8]) -> PrepareResult<Vec<u8>> {
        let commit =
            CommitMessage::parse(commit_bytes).map_err(|_| Some(ZrtpErrorCode::MalformedPacket))?;
        if commit.is_multi_stream() {
            return Err(Some(ZrtpErrorCode::UnsuppPkExchange));
        }

        // Hash chain: H3 from the Hello must be the image of this H2,
        // and H2 unlocks the MAC of the stored Hello.
        if !verify_chain_link(&commit.h2, &self.peer_h3) {
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        if !check_message_mac(&self.peer_hello_bytes, &commit.h2) {
            self.send_info(MessageSeverity::Severe, SevereCode::HelloHmacFailed as u32);
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        self.peer_h2 = commit.h2;
        self.send_info(MessageSeverity::Info, InfoCode::RespCommitReceived as u32);

        // The initiator picked the suite; validate and adopt it.
        let suite = self.suite_from_commit(&commit)?;
        let need_new_ids = self.suite.map(|s| s.hash) != Some(suite.hash);
        self.adopt_suite(suite);
        if self.zid_rec.is_none() {
            self.load_zid_record()?;
        }
        if need_new_ids || self.ids.rs1_i == [0; RS_ID_SIZE] {
            self.compute_secret_ids();
        }

        let dh = match self.dh.take() {
            Some(dh) if dh.algorithm() == suite.key_agreement => dh,
            _ => DhContext::generate(suite.key_agreement)
                .ok_or(Some(ZrtpErrorCode::UnsuppPkExchange))?,
        };

        self.role = Role::Responder;
        if let CommitVariant::Dh { hvi } = commit.variant {
            self.peer_hvi = hvi;
        }
        self.peer_commit_bytes = commit_bytes.to_vec();
        self.peer_zid = Some(commit.zid);

        let bytes = self.build_dhpart(MessageType::DhPart1, &dh);
        self.dh = Some(dh);
        self.own_dhpart1 = Some(bytes.clone());
        self.send_info(MessageSeverity::Info, InfoCode::Dh1Generated as u32);
        Ok(bytes)
    }

    fn suite_from_commit(&self, commit: &CommitMessage) -> PrepareResult<NegotiatedSuite> {
        let hash = HashAlgorithm::from_code(&commit.hash)
            .filter(|a| self.config.hash_algos.contains(a))
            .ok_or(Some(ZrtpErrorCode::UnsuppHashType))?;
        let cipher = CipherAlgorithm::from_code(&commit.cipher)
            .filter(|a| self.config.cipher_algos.contains(a))
            .ok_or(Some(ZrtpErrorCode::UnsuppCipherType))?;
        let auth_tag = AuthTag::from_code(&commit.auth_tag)
            .filter(|a| self.config.auth_tag_algos.contains(a))
            .ok_or(Some(ZrtpErrorCode::UnsuppSrtpAuthTag))?;
        let key_agreement = KeyAgreement::from_code(&commit.key_agreement)
            .filter(|a| {
                *a == KeyAgreement::Mult || self.config.key_agreement_algos.contains(a)
            })
            .ok_or(Some(ZrtpErrorCode::UnsuppPkExchange))?;
        let sas_type = SasType::from_code(&commit.sas_type)
            .filter(|a| self.config.sas_algos.contains(a))
            .ok_or(Some(ZrtpErrorCode::UnsuppSasScheme))?;
        Ok(NegotiatedSuite { hash, cipher, auth_tag, key_agreement, sas_type })
    }

    /// Initiator path: peer's DHPart1 arrived, answer with the DHPart2
    /// we committed to and derive all keys.
    pub(crate) fn prepare_dhpart2(&mut self, dhpart1_bytes: &[u8]) -> PrepareResult<Vec<u8>> {
        let dhpart1 = DhPartMessage::parse(dhpart1_bytes)
            .map_err(|_| Some(ZrtpErrorCode::MalformedPacket))?;
        if dhpart1.mtype != MessageType::DhPart1 {
            return Err(None);
        }
        let suite = self.suite.ok_or(Some(ZrtpErrorCode::CriticalSwError))?;

        // Without a Commit from the responder, H2 derives from H1.
        let h2 = implicit_digest(&dhpart1.h1);
        if !verify_chain_link(&h2, &self.peer_h3) {
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        if !check_message_mac(&self.peer_hello_bytes, &h2) {
            self.send_info(MessageSeverity::Severe, SevereCode::HelloHmacFailed as u32);
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        self.peer_h2 = h2;
        self.peer_h1 = dhpart1.h1;
        self.send_info(MessageSeverity::Info, InfoCode::InitDh1Received as u32);

        if dhpart1.pv.len() != suite.key_agreement.pv_length() {
            return Err(Some(ZrtpErrorCode::DhErrorWrongPv));
        }
        let dh = self.dh.as_ref().ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        let dhss = dh.agree(&dhpart1.pv).map_err(Some)?;

        self.role = Role::Initiator;
        self.peer_dhpart_bytes = dhpart1_bytes.to_vec();

        let dhpart2 = self.own_dhpart2.clone().ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        self.generate_keys_dh(&dhss, &dhpart1, dhpart1_bytes, &dhpart2)?;
        drop(dhss); // zeroed here, s0 is computed

        Ok(dhpart2)
    }

    /// Responder: peer's DHPart2 closes the exchange, answer Confirm1.
    pub(crate) fn prepare_confirm1(&mut self, dhpart2_bytes: &[u8]) -> PrepareResult<Vec<u8>> {
        let dhpart2 = DhPartMessage::parse(dhpart2_bytes)
            .map_err(|_| Some(ZrtpErrorCode::MalformedPacket))?;
        if dhpart2.mtype != MessageType::DhPart2 {
            return Err(None);
        }
        let suite = self.suite.ok_or(Some(ZrtpErrorCode::CriticalSwError))?;

        if !verify_chain_link(&dhpart2.h1, &self.peer_h2) {
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        if !check_message_mac(&self.peer_commit_bytes, &dhpart2.h1) {
            self.send_info(MessageSeverity::Severe, SevereCode::CommitHmacFailed as u32);
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        self.peer_h1 = dhpart2.h1;
        self.send_info(MessageSeverity::Info, InfoCode::RespDh2Received as u32);

        // The hvi from the Commit must match the DHPart2 we now see.
        let hvi = suite.hash.digest_list(&[dhpart2_bytes, &self.own_hello]);
        if !secure_eq(&hvi[..HVI_SIZE], &self.peer_hvi) {
            return Err(Some(ZrtpErrorCode::DhErrorWrongHvi));
        }

        if dhpart2.pv.len() != suite.key_agreement.pv_length() {
            return Err(Some(ZrtpErrorCode::DhErrorWrongPv));
        }
        let dh = self.dh.as_ref().ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        let dhss = dh.agree(&dhpart2.pv).map_err(Some)?;

        self.peer_dhpart_bytes = dhpart2_bytes.to_vec();
        let dhpart1 = self.own_dhpart1.clone().ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        self.generate_keys_dh(&dhss, &dhpart2, &dhpart1, dhpart2_bytes)?;
        drop(dhss);

        self.build_confirm(MessageType::Confirm1)
    }

    /// Initiator: verify Confirm1, answer Confirm2.
    pub(crate) fn prepare_confirm2(&mut self, confirm1_bytes: &[u8]) -> PrepareResult<Vec<u8>> {
        let confirm = ConfirmMessage::parse(confirm1_bytes)
            .map_err(|_| Some(ZrtpErrorCode::MalformedPacket))?;
        if confirm.mtype != MessageType::Confirm1 {
            return Err(None);
        }
        if self.multi_stream {
            return self.prepare_confirm2_multi(&confirm);
        }
        let plain = self.open_confirm(&confirm, Role::Responder)?;

        if !verify_chain_link(&plain.h0, &self.peer_h1) {
            return Err(Some(ZrtpErrorCode::ConfirmHmacWrong));
        }
        if !check_message_mac(&self.peer_dhpart_bytes, &plain.h0) {
            self.send_info(MessageSeverity::Severe, SevereCode::Dh1HmacFailed as u32);
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        self.send_info(MessageSeverity::Info, InfoCode::InitConf1Received as u32);

        self.absorb_confirm_flags(&plain);
        self.update_cache_on_success();
        self.build_confirm(MessageType::Confirm2)
    }

    fn prepare_confirm2_multi(&mut self, confirm: &ConfirmMessage) -> PrepareResult<Vec<u8>> {
        // Multi-stream initiator receiving Confirm1: derive the stream
        // keys from the master secret first, the chain closes over the
        // Hello.
        self.generate_keys_multi()?;
        let plain = self.open_confirm(confirm, Role::Responder)?;

        let h1 = implicit_digest(&plain.h0);
        let h2 = implicit_digest(&h1);
        if !verify_chain_link(&h2, &self.peer_h3) {
            return Err(Some(ZrtpErrorCode::ConfirmHmacWrong));
        }
        if !check_message_mac(&self.peer_hello_bytes, &h2) {
            self.send_info(MessageSeverity::Severe, SevereCode::HelloHmacFailed as u32);
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        self.absorb_confirm_flags(&plain);
        self.build_confirm(MessageType::Confirm2)
    }

    /// Responder: verify Confirm2, answer Conf2Ack.
    pub(crate) fn prepare_conf2ack(&mut self, confirm2_bytes: &[u8]) -> PrepareResult<Vec<u8>> {
        let confirm = ConfirmMessage::parse(confirm2_bytes)
            .map_err(|_| Some(ZrtpErrorCode::MalformedPacket))?;
        if confirm.mtype != MessageType::Confirm2 {
            return Err(None);
        }
        let plain = self.open_confirm(&confirm, Role::Initiator)?;

        if self.multi_stream {
            let h1 = implicit_digest(&plain.h0);
            if !verify_chain_link(&h1, &self.peer_h2) {
                return Err(Some(ZrtpErrorCode::ConfirmHmacWrong));
            }
            if !check_message_mac(&self.peer_commit_bytes, &h1) {
                self.send_info(MessageSeverity::Severe, SevereCode::CommitHmacFailed as u32);
                return Err(Some(ZrtpErrorCode::CriticalSwError));
            }
        } else {
            if !verify_chain_link(&plain.h0, &self.peer_h1) {
                return Err(Some(ZrtpErrorCode::ConfirmHmacWrong));
            }
            if !check_message_mac(&self.peer_dhpart_bytes, &plain.h0) {
                self.send_info(MessageSeverity::Severe, SevereCode::Dh2HmacFailed as u32);
                return Err(Some(ZrtpErrorCode::CriticalSwError));
            }
        }
        self.send_info(MessageSeverity::Info, InfoCode::RespConf2Received as u32);

        self.absorb_confirm_flags(&plain);
        if !self.multi_stream {
            self.update_cache_on_success();
        }
        Ok(encode_ack(MessageType::Conf2Ack))
    }

    /// Responder in multi-stream mode answers a Commit with Confirm1.
    pub(crate) fn prepare_confirm1_multi(&mut self, commit_bytes: &[u8]) -> PrepareResult<Vec<u8>> {
        let commit =
            CommitMessage::parse(commit_bytes).map_err(|_| Some(ZrtpErrorCode::MalformedPacket))?;
        let CommitVariant::MultiStream { nonce } = commit.variant else {
            return Err(Some(ZrtpErrorCode::UnsuppPkExchange));
        };
        if !verify_chain_link(&commit.h2, &self.peer_h3) {
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        if !check_message_mac(&self.peer_hello_bytes, &commit.h2) {
            self.send_info(MessageSeverity::Severe, SevereCode::HelloHmacFailed as u32);
            return Err(Some(ZrtpErrorCode::CriticalSwError));
        }
        if self.peer_nonces.contains(&nonce) {
            return Err(Some(ZrtpErrorCode::NonceReused));
        }
        self.peer_nonces.push(nonce);
        self.peer_h2 = commit.h2;

        let suite = self.suite_from_commit(&commit)?;
        if suite.key_agreement != KeyAgreement::Mult {
            return Err(Some(ZrtpErrorCode::UnsuppPkExchange));
        }
        self.adopt_suite(suite);
        self.role = Role::Responder;
        self.peer_commit_bytes = commit_bytes.to_vec();
        self.peer_zid = Some(commit.zid);

        self.generate_keys_multi()?;
        self.build_confirm(MessageType::Confirm1)
    }

    /* Key generation */

    /// The DH transcript hash: responder Hello, Commit, DHPart1, DHPart2.
    fn total_hash_dh(&self, dhpart1: &[u8], dhpart2: &[u8]) -> Vec<u8> {
        let suite = self.suite.expect("suite settled");
        let (hello_r, commit) = match self.role {
            Role::Initiator => (&self.peer_hello_bytes, self.own_commit.as_deref().unwrap_or(&[])),
            _ => (&self.own_hello, self.peer_commit_bytes.as_slice()),
        };
        suite.hash.digest_list(&[hello_r, commit, dhpart1, dhpart2])
    }

    fn generate_keys_dh(
        &mut self,
        dhss: &[u8],
        peer_dhpart: &DhPartMessage,
        dhpart1_bytes: &[u8],
        dhpart2_bytes: &[u8],
    ) -> PrepareResult<()> {
        let suite = self.suite.expect("suite settled");
        let total_hash = self.total_hash_dh(dhpart1_bytes, dhpart2_bytes);

        let (zid_i, zid_r) = self.ordered_zids();
        let (s1, s2, s3) = self.match_secrets(peer_dhpart);

        let s0 = compute_s0_dh(
            suite.hash,
            dhss,
            &zid_i,
            &zid_r,
            &total_hash,
            s1.as_deref().map(|v| v.as_slice()),
            s2.as_deref().map(|v| v.as_slice()),
            s3.as_deref().map(|v| v.as_slice()),
        );

        let mut context = Vec::with_capacity(2 * ZID_SIZE + total_hash.len());
        context.extend_from_slice(&zid_i);
        context.extend_from_slice(&zid_r);
        context.extend_from_slice(&total_hash);

        let keys = KeyMaterial::derive(suite.hash, suite.cipher, s0, &context, true);
        self.sas = suite.sas_type.render(keys.sas_value());
        self.keys = Some(keys);
        Ok(())
    }

    fn generate_keys_multi(&mut self) -> PrepareResult<()> {
        let suite = self.suite.ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        let master = self.master_params.as_ref().ok_or(Some(ZrtpErrorCode::NoSharedSecret))?;
        if master.session_key.is_empty() {
            return Err(Some(ZrtpErrorCode::NoSharedSecret));
        }

        // Transcript of a multi-stream run: both Hellos and the Commit,
        // responder Hello first.
        let (hello_r, hello_i) = match self.role {
            Role::Initiator => (self.peer_hello_bytes.as_slice(), self.own_hello.as_slice()),
            _ => (self.own_hello.as_slice(), self.peer_hello_bytes.as_slice()),
        };
        let commit = match self.role {
            Role::Initiator => self.own_commit.as_deref().unwrap_or(&[]),
            _ => self.peer_commit_bytes.as_slice(),
        };
        let total_hash = suite.hash.digest_list(&[hello_r, hello_i, commit]);

        let (zid_i, zid_r) = self.ordered_zids();
        let mut context = Vec::with_capacity(2 * ZID_SIZE + total_hash.len());
        context.extend_from_slice(&zid_i);
        context.extend_from_slice(&zid_r);
        context.extend_from_slice(&total_hash);

        let s0 = compute_s0_multi(suite.hash, &master.session_key, &context);
        let keys = KeyMaterial::derive(suite.hash, suite.cipher, s0, &context, false);
        // No SAS of its own; the master stream displayed one already.
        self.sas.clear();
        self.keys = Some(keys);
        Ok(())
    }

    fn ordered_zids(&self) -> ([u8; ZID_SIZE], [u8; ZID_SIZE]) {
        let peer = self.peer_zid.expect("peer known");
        match self.role {
            Role::Initiator => (*self.own_zid.as_bytes(), *peer.as_bytes()),
            _ => (*peer.as_bytes(), *self.own_zid.as_bytes()),
        }
    }

    /// Find the matched retained secrets s1/s2/s3 (RS, aux, PBX) by
    /// comparing the peer's DHPart identifiers with our counterparts.
    fn match_secrets(
        &mut self,
        peer: &DhPartMessage,
    ) -> (
        Option<Zeroizing<Vec<u8>>>,
        Option<Zeroizing<Vec<u8>>>,
        Option<Zeroizing<Vec<u8>>>,
    ) {
        let rec = self.zid_rec.as_ref().expect("record loaded");
        // The peer sent counterpart-role ids: as initiator we see the
        // responder variants and vice versa.
        let we_are_initiator = self.role == Role::Initiator;
        let (our_rs1, our_rs2, our_aux, our_pbx) = if we_are_initiator {
            (self.ids.rs1_r, self.ids.rs2_r, self.ids.aux_r, self.ids.pbx_r)
        } else {
            (self.ids.rs1_i, self.ids.rs2_i, self.ids.aux_i, self.ids.pbx_i)
        };

        let mut matched = 0u32;
        let mut s1 = None;
        if rec.is_rs1_valid()
            && (secure_eq(&peer.rs1_id, &our_rs1) || secure_eq(&peer.rs2_id, &our_rs1))
        {
            s1 = Some(Zeroizing::new(rec.rs1.to_vec()));
            matched |= SECRET_RS1;
        } else if rec.is_rs2_valid()
            && (secure_eq(&peer.rs1_id, &our_rs2) || secure_eq(&peer.rs2_id, &our_rs2))
        {
            s1 = Some(Zeroizing::new(rec.rs2.to_vec()));
            matched |= SECRET_RS2;
        }

        let mut s2 = None;
        if let Some(aux) = self.aux_secret.as_ref() {
            if secure_eq(&peer.aux_secret_id, &our_aux) {
                s2 = Some(aux.clone());
                matched |= SECRET_AUX;
            } else {
                self.send_info(
                    MessageSeverity::Warning,
                    WarningCode::NoExpectedAuxMatch as u32,
                );
            }
        }

        let mut s3 = None;
        if rec.is_mitm_key_available() && secure_eq(&peer.pbx_secret_id, &our_pbx) {
            s3 = Some(Zeroizing::new(rec.mitm_key.to_vec()));
            matched |= SECRET_PBX;
        }

        if s1.is_some() {
            self.send_info(MessageSeverity::Info, InfoCode::RsMatchFound as u32);
        } else if rec.is_rs1_valid() || rec.is_rs2_valid() {
            // We expected continuity but the peer lost it; warn and
            // hold the record until the user re-verifies the SAS.
            self.send_info(MessageSeverity::Warning, WarningCode::NoExpectedRsMatch as u32);
            self.save_zid_record = false;
        } else {
            self.send_info(MessageSeverity::Warning, WarningCode::NoRsMatch as u32);
        }

        self.detail.secrets_matched = matched;
        (s1, s2, s3)
    }

    /* Confirm handling */

    fn confirm_keys(&self, sender: Role) -> Option<(Zeroizing<Vec<u8>>, Zeroizing<Vec<u8>>)> {
        let keys = self.keys.as_ref()?;
        Some(match sender {
            Role::Initiator => (keys.zrtp_key_i.clone(), keys.hmac_key_i.clone()),
            _ => (keys.zrtp_key_r.clone(), keys.hmac_key_r.clone()),
        })
    }

    /// Build our Confirm message, encrypting under our role's keys.
    fn build_confirm(&mut self, mtype: MessageType) -> PrepareResult<Vec<u8>> {
        let suite = self.suite.ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        let sender = if mtype == MessageType::Confirm2 { Role::Initiator } else { Role::Responder };
        let (cipher_key, hmac_key) =
            self.confirm_keys(sender).ok_or(Some(ZrtpErrorCode::CriticalSwError))?;

        let mut flags = 0u8;
        if !self.config.paranoid_mode && self.is_sas_verified() {
            flags |= CONFIRM_FLAG_SAS_VERIFIED;
        }
        if self.enrollment_mode {
            flags |= CONFIRM_FLAG_PBX_ENROLLMENT;
        }
        if self.config.disclosure_flag {
            flags |= CONFIRM_FLAG_DISCLOSURE;
        }
        if self.config.allow_clear {
            flags |= CONFIRM_FLAG_ALLOW_CLEAR;
        }

        // The enrolling PBX derives the trusted-MitM key on its side
        // too, so accept_enrollment can persist it after the user okay.
        if self.enrollment_mode && !self.multi_stream {
            if let Some(keys) = self.keys.as_ref() {
                if !keys.zrtp_session.is_empty() {
                    let (zid_i, zid_r) = self.ordered_zids();
                    self.pbx_secret_tmp = Some(compute_pbx_secret(
                        suite.hash,
                        &keys.zrtp_session,
                        &zid_i,
                        &zid_r,
                    ));
                }
            }
        }

        // Give the host a chance to sign the SAS hash first.
        let mut signature = Vec::new();
        if self.config.sas_sign_support && self.sign_sas_seen && !self.multi_stream {
            if let (Some(cb), Some(keys)) = (self.cb(), self.keys.as_ref()) {
                if cb.sign_sas(&keys.sas_hash) {
                    if let Some(data) = self.signature_data_out.clone() {
                        signature = data;
                    }
                }
            }
        }

        let plain = ConfirmPlaintext {
            h0: *self.chain.h0,
            sig_len_words: (signature.len() / ZRTP_WORD_SIZE) as u16,
            flags,
            expire_interval: 0xffff_ffff,
            signature,
        };
        let mut encrypted = plain.encode();
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        suite.cipher.encrypt(&cipher_key, &iv, &mut encrypted);
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&suite.hash.hmac(&hmac_key, &encrypted)[..MESSAGE_MAC_SIZE]);

        Ok(ConfirmMessage { mtype, mac, iv, encrypted }.encode())
    }

    /// Verify and decrypt a peer Confirm.
    fn open_confirm(
        &mut self,
        confirm: &ConfirmMessage,
        sender: Role,
    ) -> PrepareResult<ConfirmPlaintext> {
        let suite = self.suite.ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        let (cipher_key, hmac_key) =
            self.confirm_keys(sender).ok_or(Some(ZrtpErrorCode::CriticalSwError))?;
        let mac = suite.hash.hmac(&hmac_key, &confirm.encrypted);
        if !secure_eq(&mac[..MESSAGE_MAC_SIZE], &confirm.mac) {
            return Err(Some(ZrtpErrorCode::ConfirmHmacWrong));
        }
        let mut plain = confirm.encrypted.clone();
        suite.cipher.decrypt(&cipher_key, &confirm.iv, &mut plain);
        ConfirmPlaintext::parse(&plain).map_err(|_| Some(ZrtpErrorCode::MalformedPacket))
    }

    fn absorb_confirm_flags(&mut self, plain: &ConfirmPlaintext) {
        self.peer_disclosure_seen = plain.flags & CONFIRM_FLAG_DISCLOSURE != 0;

        // SAS verified only holds while both sides claim it.
        if plain.flags & CONFIRM_FLAG_SAS_VERIFIED == 0 {
            if let Some(rec) = self.zid_rec.as_mut() {
                if rec.is_sas_verified() {
                    rec.set_sas_verified(false);
                }
            }
        }

        if !plain.signature.is_empty() {
            self.signature_data_in = Some(plain.signature.clone());
            if let (Some(cb), Some(keys)) = (self.cb(), self.keys.as_ref()) {
                if !cb.check_sas_signature(&keys.sas_hash) {
                    if let Some(rec) = self.zid_rec.as_mut() {
                        rec.set_sas_verified(false);
                    }
                }
            }
        }

        // Enrollment: the peer is a PBX asking to become trusted MitM.
        if plain.flags & CONFIRM_FLAG_PBX_ENROLLMENT != 0
            && self.config.mitm_enabled
            && self.mitm_seen
            && !self.multi_stream
        {
            if let Some(keys) = self.keys.as_ref() {
                if !keys.zrtp_session.is_empty() {
                    let (zid_i, zid_r) = self.ordered_zids();
                    let suite = self.suite.expect("suite settled");
                    self.pbx_secret_tmp = Some(compute_pbx_secret(
                        suite.hash,
                        &keys.zrtp_session,
                        &zid_i,
                        &zid_r,
                    ));
                    if let Some(cb) = self.cb() {
                        cb.ask_enrollment(EnrollmentInfo::Request);
                    }
                }
            }
        }
    }

    /// Rotate the retained secret after both sides proved possession.
    fn update_cache_on_success(&mut self) {
        let Some(rec) = self.zid_rec.as_mut() else { return };
        let Some(keys) = self.keys.as_ref() else { return };
        if keys.new_rs1.is_empty() {
            return;
        }
        rec.set_new_rs1(&keys.new_rs1);
        if self.save_zid_record {
            let rec = rec.clone();
            self.save_record(&rec);
        }
    }

    /* Commit collision */

    /// Compare our Commit against the peer's for role arbitration.
    /// Greater than zero means we stay Initiator. Equality is a
    /// protocol violation reported by the caller.
    pub(crate) fn compare_commit(&mut self, commit: &CommitMessage) -> std::cmp::Ordering {
        match (&commit.variant, self.multi_stream) {
            (CommitVariant::MultiStream { nonce }, true) => self.own_nonce.cmp(nonce),
            (CommitVariant::Dh { hvi }, _) => self.hvi.cmp(hvi),
            (CommitVariant::MultiStream { nonce }, false) => {
                // Mixed modes: DH beats multi-stream, compare anyway to
                // stay deterministic on both sides.
                self.hvi[..NONCE_SIZE].cmp(&nonce[..])
            }
        }
    }

    /// H3 check for a Commit during collision handling; a failure means
    /// the Commit is spoofed and must be ignored.
    pub(crate) fn verify_commit_h2(&self, commit_bytes: &[u8]) -> bool {
        match CommitMessage::parse(commit_bytes) {
            Ok(commit) => verify_chain_link(&commit.h2, &self.peer_h3),
            Err(_) => false,
        }
    }

    /* Ping and SAS relay */

    fn prepare_ping_ack(&self, ping: &PingMessage) -> Vec<u8> {
        let own_hash = implicit_digest(self.own_zid.as_bytes());
        PingAckMessage {
            version: *ZRTP_VERSION,
            sender_hash: own_hash[..8].try_into().unwrap(),
            received_hash: ping.endpoint_hash,
            ssrc: self.peer_ssrc,
        }
        .encode()
    }

    fn build_sas_relay(&mut self, sas_hash: &[u8; HASH_IMAGE_SIZE], render: SasType) -> Option<Vec<u8>> {
        let suite = self.suite?;
        let rec = self.zid_rec.as_ref()?;
        if !rec.is_mitm_key_available() {
            return None;
        }
        let sender = self.role;
        let (cipher_key, _) = self.confirm_keys(sender)?;

        let mut flags = 0u8;
        if !self.config.paranoid_mode && self.is_sas_verified() {
            flags |= CONFIRM_FLAG_SAS_VERIFIED;
        }
        let plain = SasRelayPlaintext {
            sig_len_words: 0,
            flags,
            sas_scheme: *render.code(),
            sas_hash: *sas_hash,
            signature: Vec::new(),
        };
        let mut encrypted = plain.encode();
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);
        suite.cipher.encrypt(&cipher_key, &iv, &mut encrypted);
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&suite.hash.hmac(&rec.mitm_key, &encrypted)[..MESSAGE_MAC_SIZE]);

        Some(SasRelayMessage { mac, iv, encrypted }.encode())
    }

    /// Validate a relayed SAS from an enrolled PBX. Returns true when a
    /// RelayAck should be sent.
    fn process_sas_relay(&mut self, relay: &SasRelayMessage) -> bool {
        if self.state != State::Secure {
            return false;
        }
        // Acknowledge but ignore relayed content in paranoid mode.
        if self.config.paranoid_mode {
            return true;
        }
        let Some(suite) = self.suite else { return false };
        let Some(rec) = self.zid_rec.as_ref() else { return false };
        if !self.mitm_seen || !rec.is_mitm_key_available() {
            self.send_info(
                MessageSeverity::ZrtpError,
                ZrtpErrorCode::SasUntrustedMitm as u32,
            );
            return false;
        }
        let mac = suite.hash.hmac(&rec.mitm_key, &relay.encrypted);
        if !secure_eq(&mac[..MESSAGE_MAC_SIZE], &relay.mac) {
            self.send_info(
                MessageSeverity::ZrtpError,
                ZrtpErrorCode::SasUntrustedMitm as u32,
            );
            return false;
        }
        let sender = match self.role {
            Role::Initiator => Role::Responder,
            _ => Role::Initiator,
        };
        let Some((cipher_key, _)) = self.confirm_keys(sender) else { return false };
        let mut plain = relay.encrypted.clone();
        suite.cipher.decrypt(&cipher_key, &relay.iv, &mut plain);
        let Ok(plain) = SasRelayPlaintext::parse(&plain) else {
            return false;
        };
        let Some(render) = SasType::from_code(&plain.sas_scheme) else {
            return false;
        };

        // Substitute the relayed SAS; it is by definition unverified.
        let mut value = [0u8; 4];
        value.copy_from_slice(&plain.sas_hash[..4]);
        self.sas = render.render(value);
        if let Some(cb) = self.cb() {
            let cipher = format!(
                "{}/{}",
                String::from_utf8_lossy(suite.cipher.code()).trim_end(),
                String::from_utf8_lossy(suite.auth_tag.code()).trim_end(),
            );
            cb.srtp_secrets_on(cipher, self.sas.clone(), false);
        }
        true
    }
}

/// Compute the truncated MAC over everything but the MAC itself and
/// write it into the message's trailing MAC field.
fn patch_mac(message: &mut [u8], key: &[u8]) {
    let cut = message.len() - MESSAGE_MAC_SIZE;
    let mac = implicit_hmac(key, &message[..cut]);
    message[cut..].copy_from_slice(&mac[..MESSAGE_MAC_SIZE]);
}

/// Recompute the MAC of a stored message once its key was revealed.
fn check_message_mac(message: &[u8], key: &[u8]) -> bool {
    if message.len() <= MESSAGE_MAC_SIZE {
        return false;
    }
    let cut = message.len() - MESSAGE_MAC_SIZE;
    let mac = implicit_hmac(key, &message[..cut]);
    secure_eq(&mac[..MESSAGE_MAC_SIZE], &message[cut..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patched_mac_verifies_and_binds_content() {
        let mut msg = vec![0u8; 64];
        for (i, b) in msg.iter_mut().enumerate() {
            *b = i as u8;
        }
        let key = [0x55u8; 32];
        patch_mac(&mut msg, &key);
        assert!(check_message_mac(&msg, &key));
        msg[5] ^= 1;
        assert!(!check_message_mac(&msg, &key));
    }

    #[test]
    fn multi_stream_params_roundtrip() {
        let params = MultiStreamParams {
            hash: HashAlgorithm::S256,
            cipher: CipherAlgorithm::Aes1,
            auth_tag: AuthTag::Hs80,
            session_key: Zeroizing::new(vec![9u8; 32]),
        };
        let bytes = params.to_bytes();
        let back = MultiStreamParams::from_bytes(&bytes).unwrap();
        assert_eq!(back.hash, HashAlgorithm::S256);
        assert_eq!(back.cipher, CipherAlgorithm::Aes1);
        assert_eq!(back.auth_tag, AuthTag::Hs80);
        assert_eq!(&back.session_key[..], &[9u8; 32]);
    }
}
