//! End-to-end handshake scenarios driven over an in-memory transport.
//! Two sessions are wired back to back; the tests control delivery
//! order to exercise the clean run, key continuity, tampering, Commit
//! collision, multi-stream mode and the Hello retransmit schedule.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use zrtp::cache::{InMemoryZidCache, Zid, ZidCache};
use zrtp::callback::{KeyDirection, ZrtpCallback};
use zrtp::codes::MessageSeverity;
use zrtp::keys::{secret_ids, Role, SrtpSecrets};
use zrtp::packet::{CommitMessage, CommitVariant, DhPartMessage, MessageType};
use zrtp::proto::RS_SIZE;
use zrtp::session::ZrtpSession;
use zrtp::state::State;
use zrtp::{HashAlgorithm, ZrtpConfig};

const TRANSPORT_OVERHEAD: usize = 12;

#[derive(Default)]
struct CallbackState {
    outbox: VecDeque<Vec<u8>>,
    timer: Option<i32>,
    timer_history: Vec<i32>,
    infos: Vec<(MessageSeverity, u32)>,
    failures: Vec<(MessageSeverity, u32)>,
    not_supp_count: u32,
    send_count: u32,
    srtp_keys: Vec<(Vec<u8>, Vec<u8>, Vec<u8>, Vec<u8>)>,
    sas_display: Option<(String, bool)>,
    enrollment_requests: u32,
}

struct TestCallback {
    state: Mutex<CallbackState>,
}

impl TestCallback {
    fn new() -> Arc<Self> {
        Arc::new(TestCallback { state: Mutex::new(CallbackState::default()) })
    }

    fn with<R>(&self, f: impl FnOnce(&mut CallbackState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }
}

impl ZrtpCallback for TestCallback {
    fn send_data(&self, data: &[u8]) -> bool {
        self.with(|s| {
            s.send_count += 1;
            s.outbox.push_back(data.to_vec());
        });
        true
    }

    fn activate_timer(&self, ms: i32) -> bool {
        self.with(|s| {
            s.timer = Some(ms);
            s.timer_history.push(ms);
        });
        true
    }

    fn cancel_timer(&self) -> bool {
        self.with(|s| s.timer = None);
        true
    }

    fn send_info(&self, severity: MessageSeverity, sub_code: u32) {
        self.with(|s| s.infos.push((severity, sub_code)));
    }

    fn negotiation_failed(&self, severity: MessageSeverity, sub_code: u32) {
        self.with(|s| s.failures.push((severity, sub_code)));
    }

    fn zrtp_not_supp_other(&self) {
        self.with(|s| s.not_supp_count += 1);
    }

    fn srtp_secrets_ready(&self, secrets: &SrtpSecrets, _part: KeyDirection) -> bool {
        self.with(|s| {
            s.srtp_keys.push((
                secrets.key_initiator.to_vec(),
                secrets.salt_initiator.to_vec(),
                secrets.key_responder.to_vec(),
                secrets.salt_responder.to_vec(),
            ))
        });
        true
    }

    fn srtp_secrets_on(&self, _cipher: String, sas: String, verified: bool) {
        self.with(|s| s.sas_display = Some((sas, verified)));
    }

    fn srtp_secrets_off(&self, _part: KeyDirection) {}

    fn ask_enrollment(&self, _info: zrtp::EnrollmentInfo) {
        self.with(|s| s.enrollment_requests += 1);
    }
}

struct Endpoint {
    session: ZrtpSession,
    cb: Arc<TestCallback>,
    use_frames: bool,
}

impl Endpoint {
    fn new(zid: [u8; 12], config: ZrtpConfig) -> Endpoint {
        let cache: Arc<Mutex<dyn ZidCache>> =
            Arc::new(Mutex::new(InMemoryZidCache::with_local_zid(Zid::new(zid))));
        Endpoint::with_cache(cache, config)
    }

    fn with_cache(cache: Arc<Mutex<dyn ZidCache>>, config: ZrtpConfig) -> Endpoint {
        let use_frames = config.use_zrtp_frames;
        let cb = TestCallback::new();
        let weak: Weak<dyn ZrtpCallback> = Arc::downgrade(&cb);
        let session = ZrtpSession::new("test client", weak, config, cache).unwrap();
        Endpoint { session, cb, use_frames }
    }

    fn start(&mut self) {
        self.session.start_zrtp_engine();
    }

    fn pop_message(&self) -> Option<Vec<u8>> {
        self.cb.with(|s| s.outbox.pop_front())
    }

    fn deliver(&mut self, msg: &[u8]) {
        if self.use_frames {
            self.session.process_zrtp_frame(msg, 0xdeadbeef);
        } else {
            self.session.process_zrtp_message(msg, 0xdeadbeef, msg.len() + TRANSPORT_OVERHEAD);
        }
    }

    fn fire_timer(&mut self) -> bool {
        let armed = self.cb.with(|s| s.timer.take());
        if armed.is_some() {
            self.session.process_timeout();
            true
        } else {
            false
        }
    }

    fn is_secure(&self) -> bool {
        self.session.in_state(State::Secure)
    }

    fn sas(&self) -> Option<String> {
        self.cb.with(|s| s.sas_display.clone().map(|(sas, _)| sas))
    }
}

/// Deliver messages strictly alternating one at a time; both sides
/// start simultaneously so both send a Commit (collision).
fn pump_round_robin(a: &mut Endpoint, b: &mut Endpoint) {
    for _ in 0..64 {
        let mut progress = false;
        if let Some(msg) = a.pop_message() {
            b.deliver(&msg);
            progress = true;
        }
        if let Some(msg) = b.pop_message() {
            a.deliver(&msg);
            progress = true;
        }
        if !progress {
            break;
        }
    }
}

/// Run a handshake with a deterministic role split: `a` becomes the
/// initiator, `b` the responder.
fn run_clean_handshake(a: &mut Endpoint, b: &mut Endpoint) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut a_wire = Vec::new();
    let mut b_wire = Vec::new();

    a.start();
    b.start();
    let hello_a = a.pop_message().expect("hello from a");
    let hello_b = b.pop_message().expect("hello from b");

    // a sees b's Hello first and acknowledges it
    a.deliver(&hello_b);
    let hello_ack_a = a.pop_message().expect("helloack from a");
    // b learns its Hello was seen before it sees a's Hello, so b takes
    // the responder path
    b.deliver(&hello_ack_a);
    b.deliver(&hello_a);
    let hello_ack_b = b.pop_message().expect("helloack from b");
    a.deliver(&hello_ack_b);
    b_wire.push(hello_b);
    a_wire.push(hello_a);

    // from here on simple alternation drains the handshake
    for _ in 0..32 {
        let mut progress = false;
        while let Some(msg) = a.pop_message() {
            a_wire.push(msg.clone());
            b.deliver(&msg);
            progress = true;
        }
        while let Some(msg) = b.pop_message() {
            b_wire.push(msg.clone());
            a.deliver(&msg);
            progress = true;
        }
        if !progress {
            break;
        }
    }
    (a_wire, b_wire)
}

fn message_type(msg: &[u8]) -> Option<MessageType> {
    MessageType::of(&msg[..msg.len() - 4])
}

fn alice_zid() -> [u8; 12] {
    [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]
}

fn bob_zid() -> [u8; 12] {
    [13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24]
}

fn shared_cache(zid: [u8; 12]) -> Arc<Mutex<dyn ZidCache>> {
    Arc::new(Mutex::new(InMemoryZidCache::with_local_zid(Zid::new(zid))))
}

fn cache_rs1(cache: &Arc<Mutex<dyn ZidCache>>, peer: [u8; 12]) -> Option<([u8; RS_SIZE], bool, bool, bool)> {
    let cache = cache.lock().unwrap();
    cache
        .read_all()
        .into_iter()
        .find(|r| r.zid == Zid::new(peer))
        .map(|r| (r.rs1, r.is_rs1_valid(), r.is_rs2_valid(), r.is_sas_verified()))
}

#[test]
fn s1_fresh_pair_reaches_secure_with_matching_sas() {
    let mandatory = ZrtpConfig::mandatory_only();
    let alice_cache = shared_cache(alice_zid());
    let bob_cache = shared_cache(bob_zid());
    let mut alice = Endpoint::with_cache(alice_cache.clone(), mandatory.clone());
    let mut bob = Endpoint::with_cache(bob_cache.clone(), mandatory);

    run_clean_handshake(&mut alice, &mut bob);

    assert!(alice.is_secure(), "alice not secure");
    assert!(bob.is_secure(), "bob not secure");
    assert_eq!(alice.session.get_zrtp_role(), Role::Initiator);
    assert_eq!(bob.session.get_zrtp_role(), Role::Responder);

    // identical 4-character SAS on both sides
    let sas_a = alice.sas().expect("alice sas");
    let sas_b = bob.sas().expect("bob sas");
    assert_eq!(sas_a, sas_b);
    assert_eq!(sas_a.len(), 4);

    // both derive bit-identical SRTP key material
    let keys_a = alice.cb.with(|s| s.srtp_keys.clone());
    let keys_b = bob.cb.with(|s| s.srtp_keys.clone());
    assert!(!keys_a.is_empty() && !keys_b.is_empty());
    assert_eq!(keys_a[0], keys_b[0]);

    // one fresh record each: RS1 set, RS2 empty, SAS unverified
    let (rs1_a, rs1_valid_a, rs2_valid_a, verified_a) =
        cache_rs1(&alice_cache, bob_zid()).expect("alice record");
    let (rs1_b, rs1_valid_b, rs2_valid_b, verified_b) =
        cache_rs1(&bob_cache, alice_zid()).expect("bob record");
    assert!(rs1_valid_a && rs1_valid_b);
    assert!(!rs2_valid_a && !rs2_valid_b);
    assert!(!verified_a && !verified_b);
    assert_eq!(rs1_a, rs1_b);
    assert_ne!(rs1_a, [0u8; RS_SIZE]);
}

#[test]
fn s2_second_run_matches_retained_secret() {
    let alice_cache = shared_cache(alice_zid());
    let bob_cache = shared_cache(bob_zid());

    {
        let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
        let mut bob = Endpoint::with_cache(bob_cache.clone(), ZrtpConfig::default());
        run_clean_handshake(&mut alice, &mut bob);
        assert!(alice.is_secure() && bob.is_secure());
    }
    let (rs1_after_first, ..) = cache_rs1(&alice_cache, bob_zid()).expect("record exists");

    let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
    let mut bob = Endpoint::with_cache(bob_cache.clone(), ZrtpConfig::default());
    let (a_wire, b_wire) = run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure() && bob.is_secure());

    // continuity: the DHPart1 of the second run carries
    // HMAC(first run's newRS1, "Responder")
    let commit = a_wire
        .iter()
        .find(|m| message_type(m) == Some(MessageType::Commit))
        .expect("commit on the wire");
    let commit = CommitMessage::parse(&commit[..commit.len() - 4]).unwrap();
    let hash = HashAlgorithm::from_code(&commit.hash).unwrap();

    let dhpart1 = b_wire
        .iter()
        .find(|m| message_type(m) == Some(MessageType::DhPart1))
        .expect("dhpart1 on the wire");
    let dhpart1 = DhPartMessage::parse(&dhpart1[..dhpart1.len() - 4]).unwrap();

    let (_, expected_rs1_id_r) = secret_ids(hash, &rs1_after_first);
    assert_eq!(dhpart1.rs1_id, expected_rs1_id_r);

    // the engine reports the RS1 match
    assert_ne!(alice.session.get_detail_info().secrets_matched & 1, 0);
    assert_ne!(bob.session.get_detail_info().secrets_matched & 1, 0);

    // RS2 now holds the previous RS1
    let (_, _, rs2_valid, _) = cache_rs1(&alice_cache, bob_zid()).unwrap();
    assert!(rs2_valid);
}

#[test]
fn s3_tampered_hash_chain_fails_without_cache_update() {
    let alice_cache = shared_cache(alice_zid());
    let bob_cache = shared_cache(bob_zid());

    {
        let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
        let mut bob = Endpoint::with_cache(bob_cache.clone(), ZrtpConfig::default());
        run_clean_handshake(&mut alice, &mut bob);
        assert!(alice.is_secure() && bob.is_secure());
    }
    let (rs1_before, ..) = cache_rs1(&alice_cache, bob_zid()).unwrap();

    let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
    let mut bob = Endpoint::with_cache(bob_cache.clone(), ZrtpConfig::default());

    alice.start();
    bob.start();
    let mut hello_a = alice.pop_message().unwrap();
    let hello_b = bob.pop_message().unwrap();

    // flip one bit inside Alice's H3 (offset 32 into the message) and
    // reseal the CRC so only the hash chain breaks
    let cut = hello_a.len() - 4;
    hello_a.truncate(cut);
    hello_a[32 + 3] ^= 0x01;
    let hello_a = zrtp::packet::seal(hello_a);

    alice.deliver(&hello_b);
    let hello_ack_a = alice.pop_message().unwrap();
    bob.deliver(&hello_ack_a);
    bob.deliver(&hello_a);
    let hello_ack_b = bob.pop_message().unwrap();
    alice.deliver(&hello_ack_b);

    for _ in 0..16 {
        let mut progress = false;
        while let Some(msg) = alice.pop_message() {
            bob.deliver(&msg);
            progress = true;
        }
        while let Some(msg) = bob.pop_message() {
            alice.deliver(&msg);
            progress = true;
        }
        if !progress {
            break;
        }
    }

    assert!(!alice.is_secure());
    assert!(!bob.is_secure());
    // bob detected the broken chain and sent a wire error
    let bob_failed = bob.cb.with(|s| {
        s.failures.iter().any(|(sev, _)| *sev == MessageSeverity::ZrtpError)
    });
    assert!(bob_failed, "bob accepted a tampered hash chain");
    // retained secrets rolled back nowhere: cache still has the old RS1
    let (rs1_after, ..) = cache_rs1(&alice_cache, bob_zid()).unwrap();
    assert_eq!(rs1_before, rs1_after);
}

#[test]
fn s4_commit_collision_resolves_single_handshake() {
    let mut alice = Endpoint::new(alice_zid(), ZrtpConfig::mandatory_only());
    let mut bob = Endpoint::new(bob_zid(), ZrtpConfig::mandatory_only());

    alice.start();
    bob.start();
    pump_round_robin(&mut alice, &mut bob);

    assert!(alice.is_secure(), "alice not secure after collision");
    assert!(bob.is_secure(), "bob not secure after collision");

    // exactly one side kept the initiator role
    let roles = (alice.session.get_zrtp_role(), bob.session.get_zrtp_role());
    assert!(
        roles == (Role::Initiator, Role::Responder)
            || roles == (Role::Responder, Role::Initiator),
        "roles not resolved: {:?}",
        roles
    );
    assert_eq!(alice.sas(), bob.sas());
}

#[test]
fn s5_multi_stream_skips_dh() {
    let alice_cache = shared_cache(alice_zid());
    let bob_cache = shared_cache(bob_zid());
    let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
    let mut bob = Endpoint::with_cache(bob_cache.clone(), ZrtpConfig::default());
    run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure() && bob.is_secure());

    let alice_params = alice.session.get_multi_str_params().expect("master params");
    let bob_params = bob.session.get_multi_str_params().expect("master params");

    let mut alice2 = Endpoint::with_cache(alice_cache, ZrtpConfig::default());
    let mut bob2 = Endpoint::with_cache(bob_cache, ZrtpConfig::default());
    alice2.session.set_multi_str_params(alice_params).unwrap();
    bob2.session.set_multi_str_params(bob_params).unwrap();
    assert!(alice2.session.is_multi_stream());

    let (a_wire, b_wire) = run_clean_handshake(&mut alice2, &mut bob2);

    assert!(alice2.is_secure(), "multi-stream alice not secure");
    assert!(bob2.is_secure(), "multi-stream bob not secure");

    // no DH traffic at all in multi-stream mode
    for wire in [&a_wire, &b_wire] {
        assert!(!wire.iter().any(|m| matches!(
            message_type(m),
            Some(MessageType::DhPart1) | Some(MessageType::DhPart2)
        )));
    }
    // the commit carries a nonce instead of an hvi
    let commit = a_wire
        .iter()
        .find(|m| message_type(m) == Some(MessageType::Commit))
        .expect("multi-stream commit");
    let commit = CommitMessage::parse(&commit[..commit.len() - 4]).unwrap();
    assert!(matches!(commit.variant, CommitVariant::MultiStream { .. }));

    // both streams derived the same SRTP material from the master key
    let keys_a = alice2.cb.with(|s| s.srtp_keys.clone());
    let keys_b = bob2.cb.with(|s| s.srtp_keys.clone());
    assert!(!keys_a.is_empty());
    assert_eq!(keys_a[0], keys_b[0]);
}

#[test]
fn s6_hello_retransmit_budget_then_give_up() {
    let mut alice = Endpoint::new(alice_zid(), ZrtpConfig::default());
    alice.start();

    // swallow the Hello traffic, nobody answers
    for _ in 0..200 {
        if !alice.fire_timer() {
            break;
        }
    }

    let (sends, not_supp, history) =
        alice.cb.with(|s| (s.send_count, s.not_supp_count, s.timer_history.clone()));
    // initial Hello plus 20 regular and 60 extended retransmits
    assert_eq!(sends, 1 + 20 + 60);
    assert_eq!(not_supp, 1);
    // doubling from 50 ms capped at 200 ms
    assert_eq!(&history[..4], &[50, 100, 200, 200]);
    assert!(history[4..].iter().all(|&ms| ms == 200));
    // engine stays in Detect for late peers
    assert!(alice.session.in_state(State::Detect));
}

#[test]
fn handshake_over_zrtp_frames() {
    let cfg = ZrtpConfig { use_zrtp_frames: true, ..ZrtpConfig::mandatory_only() };
    let mut alice = Endpoint::new(alice_zid(), cfg.clone());
    let mut bob = Endpoint::new(bob_zid(), cfg);
    run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure(), "alice not secure over frames");
    assert!(bob.is_secure(), "bob not secure over frames");
    assert_eq!(alice.sas(), bob.sas());
}

#[test]
fn stop_zrtp_zeroizes_session_material() {
    let mut alice = Endpoint::new(alice_zid(), ZrtpConfig::mandatory_only());
    let mut bob = Endpoint::new(bob_zid(), ZrtpConfig::mandatory_only());
    run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure());
    assert!(alice.session.get_sas_hash().is_some());
    assert!(alice.session.get_exported_key().is_some());

    alice.session.stop_zrtp();
    assert!(alice.session.in_state(State::Initial));
    assert!(alice.session.get_sas_hash().is_none());
    assert!(alice.session.get_exported_key().is_none());
    // a second stop is a no-op
    alice.session.stop_zrtp();
}

#[test]
fn sas_verified_flag_is_sticky() {
    let alice_cache = shared_cache(alice_zid());
    let bob_cache = shared_cache(bob_zid());
    {
        let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
        let mut bob = Endpoint::with_cache(bob_cache.clone(), ZrtpConfig::default());
        run_clean_handshake(&mut alice, &mut bob);
        alice.session.sas_verified();
        bob.session.sas_verified();
        assert!(alice.session.is_sas_verified());
    }
    // next call between the same pair reports verified via the cache
    let mut alice = Endpoint::with_cache(alice_cache.clone(), ZrtpConfig::default());
    let mut bob = Endpoint::with_cache(bob_cache, ZrtpConfig::default());
    run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure());
    assert!(alice.session.is_sas_verified());
    let (_, _, _, verified) = cache_rs1(&alice_cache, bob_zid()).unwrap();
    assert!(verified);
}

#[test]
fn enrollment_then_sas_relay_substitutes_display() {
    // alice plays the enrolling PBX, bob the client
    let pbx_config = ZrtpConfig { mitm_enabled: true, ..ZrtpConfig::default() };
    let client_config = ZrtpConfig { mitm_enabled: true, ..ZrtpConfig::default() };
    let mut alice = Endpoint::new(alice_zid(), pbx_config);
    let mut bob = Endpoint::new(bob_zid(), client_config);
    alice.session.set_enrollment_mode(true);
    assert!(alice.session.is_enrollment_mode());

    run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure() && bob.is_secure());

    // bob saw the E flag and asked its user
    assert_eq!(bob.cb.with(|s| s.enrollment_requests), 1);
    bob.session.accept_enrollment(true);
    alice.session.accept_enrollment(true);
    assert!(bob.session.is_peer_enrolled());

    let sas_before = bob.sas().unwrap();

    // the PBX relays a foreign SAS hash into this leg
    let relayed_hash = [0xab; 32];
    assert!(alice.session.send_sas_relay_packet(&relayed_hash, zrtp::SasType::B32));
    let relay = alice.pop_message().expect("sas relay on the wire");
    bob.deliver(&relay);
    let relay_ack = bob.pop_message().expect("relay ack");
    assert_eq!(message_type(&relay_ack), Some(MessageType::RelayAck));
    alice.deliver(&relay_ack);

    // bob now displays the relayed SAS, flagged unverified
    let (sas_after, verified) = bob.cb.with(|s| s.sas_display.clone()).unwrap();
    assert_ne!(sas_before, sas_after);
    assert!(!verified);
}

#[test]
fn paranoid_client_acknowledges_but_ignores_relay() {
    let pbx_config = ZrtpConfig { mitm_enabled: true, ..ZrtpConfig::default() };
    let client_config = ZrtpConfig {
        mitm_enabled: true,
        paranoid_mode: true,
        ..ZrtpConfig::default()
    };
    let mut alice = Endpoint::new(alice_zid(), pbx_config);
    let mut bob = Endpoint::new(bob_zid(), client_config);
    alice.session.set_enrollment_mode(true);
    run_clean_handshake(&mut alice, &mut bob);
    assert!(alice.is_secure() && bob.is_secure());
    alice.session.accept_enrollment(true);

    let sas_before = bob.sas().unwrap();
    assert!(alice.session.send_sas_relay_packet(&[0xab; 32], zrtp::SasType::B32));
    let relay = alice.pop_message().unwrap();
    bob.deliver(&relay);
    // acknowledged so the PBX stops resending, but the SAS stays put
    let relay_ack = bob.pop_message().expect("relay ack in paranoid mode");
    assert_eq!(message_type(&relay_ack), Some(MessageType::RelayAck));
    assert_eq!(bob.sas().unwrap(), sas_before);
}

#[test]
fn hello_hash_is_published_before_start() {
    let alice = Endpoint::new(alice_zid(), ZrtpConfig::default());
    let hash = alice.session.get_hello_hash(0).expect("hello hash");
    assert!(hash.starts_with("1.10 "));
    assert_eq!(hash.len(), "1.10 ".len() + 64);
    assert!(alice.session.get_hello_hash(1).is_none());
    assert!(alice.session.get_peer_hello_hash().is_none());
}
