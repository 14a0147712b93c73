/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Wire codec for the sixteen ZRTP message types.
//!
//! Every message is a multiple of 4 bytes: a 3-word header (preamble,
//! length in words, 8-ASCII type tag) followed by the type-specific
//! body. `encode` returns the message without the trailing CRC (the
//! transcript hash and the temporal MACs cover exactly these bytes);
//! `seal` appends it for the wire.

use crate::cache::Zid;
use crate::crc;
use crate::error::ZrtpError;
use crate::proto::*;

/// Per-list cap on offered algorithms, RFC 6189 Hello counts are 4 bits
/// but nothing sane offers more than this.
pub(crate) const MAX_ALGOS_PER_LIST: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hello,
    HelloAck,
    Commit,
    DhPart1,
    DhPart2,
    Confirm1,
    Confirm2,
    Conf2Ack,
    Error,
    ErrorAck,
    GoClear,
    ClearAck,
    Ping,
    PingAck,
    SasRelay,
    RelayAck,
}

impl MessageType {
    pub fn tag(&self) -> &'static [u8; 8] {
        match self {
            MessageType::Hello => TAG_HELLO,
            MessageType::HelloAck => TAG_HELLO_ACK,
            MessageType::Commit => TAG_COMMIT,
            MessageType::DhPart1 => TAG_DHPART1,
            MessageType::DhPart2 => TAG_DHPART2,
            MessageType::Confirm1 => TAG_CONFIRM1,
            MessageType::Confirm2 => TAG_CONFIRM2,
            MessageType::Conf2Ack => TAG_CONF2_ACK,
            MessageType::Error => TAG_ERROR,
            MessageType::ErrorAck => TAG_ERROR_ACK,
            MessageType::GoClear => TAG_GO_CLEAR,
            MessageType::ClearAck => TAG_CLEAR_ACK,
            MessageType::Ping => TAG_PING,
            MessageType::PingAck => TAG_PING_ACK,
            MessageType::SasRelay => TAG_SAS_RELAY,
            MessageType::RelayAck => TAG_RELAY_ACK,
        }
    }

    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        Some(match tag {
            t if t == TAG_HELLO => MessageType::Hello,
            t if t == TAG_HELLO_ACK => MessageType::HelloAck,
            t if t == TAG_COMMIT => MessageType::Commit,
            t if t == TAG_DHPART1 => MessageType::DhPart1,
            t if t == TAG_DHPART2 => MessageType::DhPart2,
            t if t == TAG_CONFIRM1 => MessageType::Confirm1,
            t if t == TAG_CONFIRM2 => MessageType::Confirm2,
            t if t == TAG_CONF2_ACK => MessageType::Conf2Ack,
            t if t == TAG_ERROR => MessageType::Error,
            t if t == TAG_ERROR_ACK => MessageType::ErrorAck,
            t if t == TAG_GO_CLEAR => MessageType::GoClear,
            t if t == TAG_CLEAR_ACK => MessageType::ClearAck,
            t if t == TAG_PING => MessageType::Ping,
            t if t == TAG_PING_ACK => MessageType::PingAck,
            t if t == TAG_SAS_RELAY => MessageType::SasRelay,
            t if t == TAG_RELAY_ACK => MessageType::RelayAck,
            _ => return None,
        })
    }

    /// Peek at the type of an encoded message.
    pub fn of(message: &[u8]) -> Option<Self> {
        if message.len() < HEADER_WORDS * ZRTP_WORD_SIZE {
            return None;
        }
        Self::from_tag(&message[4..12])
    }
}

/// Validate header structure and return (type, length in words).
/// The slice must contain exactly the message, no CRC.
pub fn parse_header(message: &[u8]) -> Result<(MessageType, usize), ZrtpError> {
    if message.len() < HEADER_WORDS * ZRTP_WORD_SIZE
        || message.len() % ZRTP_WORD_SIZE != 0
        || message.len() > MAX_MESSAGE_SIZE
    {
        return Err(ZrtpError::Malformed);
    }
    let preamble = u16::from_be_bytes([message[0], message[1]]);
    if preamble != MESSAGE_PREAMBLE {
        return Err(ZrtpError::Malformed);
    }
    let length = u16::from_be_bytes([message[2], message[3]]) as usize;
    if length * ZRTP_WORD_SIZE != message.len() {
        return Err(ZrtpError::LengthMismatch);
    }
    let mtype = MessageType::from_tag(&message[4..12]).ok_or(ZrtpError::Malformed)?;
    Ok((mtype, length))
}

/// Append the trailing CRC to an encoded message.
pub fn seal(mut message: Vec<u8>) -> Vec<u8> {
    crc::append(&mut message);
    message
}

/// Check the trailing CRC of a raw message as received from the wire.
pub fn verify_crc(message_with_crc: &[u8]) -> bool {
    crc::verify(message_with_crc)
}

fn begin(mtype: MessageType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&MESSAGE_PREAMBLE.to_be_bytes());
    buf.extend_from_slice(&[0, 0]); // length patched in finish()
    buf.extend_from_slice(mtype.tag());
    buf
}

fn finish(mut buf: Vec<u8>) -> Vec<u8> {
    debug_assert!(buf.len() % ZRTP_WORD_SIZE == 0);
    let words = (buf.len() / ZRTP_WORD_SIZE) as u16;
    buf[2..4].copy_from_slice(&words.to_be_bytes());
    buf
}

fn body_of(message: &[u8], expected: MessageType) -> Result<&[u8], ZrtpError> {
    let (mtype, _) = parse_header(message)?;
    if mtype != expected {
        return Err(ZrtpError::Malformed);
    }
    Ok(&message[HEADER_WORDS * ZRTP_WORD_SIZE..])
}

/* Hello */

pub const HELLO_FLAG_SIGNATURE: u8 = 0x40;
pub const HELLO_FLAG_MITM: u8 = 0x20;
pub const HELLO_FLAG_PASSIVE: u8 = 0x10;
pub const HELLO_FLAG_DISCLOSURE: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloMessage {
    pub version: [u8; 4],
    pub client_id: [u8; CLIENT_ID_SIZE],
    pub h3: [u8; HASH_IMAGE_SIZE],
    pub zid: Zid,
    pub flags: u8,
    pub hashes: Vec<[u8; 4]>,
    pub ciphers: Vec<[u8; 4]>,
    pub auth_tags: Vec<[u8; 4]>,
    pub key_agreements: Vec<[u8; 4]>,
    pub sas_types: Vec<[u8; 4]>,
    pub mac: [u8; MESSAGE_MAC_SIZE],
}

impl HelloMessage {
    pub fn is_sas_sign(&self) -> bool {
        self.flags & HELLO_FLAG_SIGNATURE != 0
    }
    pub fn is_mitm(&self) -> bool {
        self.flags & HELLO_FLAG_MITM != 0
    }
    pub fn is_passive(&self) -> bool {
        self.flags & HELLO_FLAG_PASSIVE != 0
    }
    pub fn is_disclosure(&self) -> bool {
        self.flags & HELLO_FLAG_DISCLOSURE != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::Hello);
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(&self.client_id);
        buf.extend_from_slice(&self.h3);
        buf.extend_from_slice(self.zid.as_bytes());
        buf.push(self.flags & 0x78);
        buf.push(self.hashes.len() as u8 & 0x0f);
        buf.push(((self.ciphers.len() as u8 & 0x0f) << 4) | (self.auth_tags.len() as u8 & 0x0f));
        buf.push(((self.key_agreements.len() as u8 & 0x0f) << 4) | (self.sas_types.len() as u8 & 0x0f));
        for list in [
            &self.hashes,
            &self.ciphers,
            &self.auth_tags,
            &self.key_agreements,
            &self.sas_types,
        ] {
            for code in list.iter() {
                buf.extend_from_slice(code);
            }
        }
        buf.extend_from_slice(&self.mac);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let body = body_of(message, MessageType::Hello)?;
        // fixed body: version, client id, H3, zid, flag/count word, MAC
        let fixed = 4 + CLIENT_ID_SIZE + HASH_IMAGE_SIZE + ZID_SIZE + 4 + MESSAGE_MAC_SIZE;
        if body.len() < fixed {
            return Err(ZrtpError::Malformed);
        }
        let mut at = 0usize;
        let mut version = [0u8; 4];
        version.copy_from_slice(&body[at..at + 4]);
        at += 4;
        let mut client_id = [0u8; CLIENT_ID_SIZE];
        client_id.copy_from_slice(&body[at..at + CLIENT_ID_SIZE]);
        at += CLIENT_ID_SIZE;
        let mut h3 = [0u8; HASH_IMAGE_SIZE];
        h3.copy_from_slice(&body[at..at + HASH_IMAGE_SIZE]);
        at += HASH_IMAGE_SIZE;
        let zid = Zid::from_slice(&body[at..at + ZID_SIZE]);
        at += ZID_SIZE;
        let flags = body[at] & 0x78;
        let hc = (body[at + 1] & 0x0f) as usize;
        let cc = (body[at + 2] >> 4) as usize;
        let ac = (body[at + 2] & 0x0f) as usize;
        let kc = (body[at + 3] >> 4) as usize;
        let sc = (body[at + 3] & 0x0f) as usize;
        at += 4;
        let counts = [hc, cc, ac, kc, sc];
        if counts.iter().any(|&n| n > MAX_ALGOS_PER_LIST) {
            return Err(ZrtpError::Malformed);
        }
        let names = hc + cc + ac + kc + sc;
        if body.len() != fixed + names * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        let mut take = |n: usize| -> Vec<[u8; 4]> {
            let mut out = Vec::with_capacity(n);
            for _ in 0..n {
                let mut code = [0u8; 4];
                code.copy_from_slice(&body[at..at + 4]);
                out.push(code);
                at += 4;
            }
            out
        };
        let hashes = take(hc);
        let ciphers = take(cc);
        let auth_tags = take(ac);
        let key_agreements = take(kc);
        let sas_types = take(sc);
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&body[at..at + MESSAGE_MAC_SIZE]);
        Ok(HelloMessage {
            version,
            client_id,
            h3,
            zid,
            flags,
            hashes,
            ciphers,
            auth_tags,
            key_agreements,
            sas_types,
            mac,
        })
    }
}

/* Commit */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitVariant {
    /// DH exchange: the hash commitment binding the initiator's DHPart2.
    Dh { hvi: [u8; HVI_SIZE] },
    /// Multi-stream: a fresh random nonce in place of the hvi.
    MultiStream { nonce: [u8; NONCE_SIZE] },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitMessage {
    pub h2: [u8; HASH_IMAGE_SIZE],
    pub zid: Zid,
    pub hash: [u8; 4],
    pub cipher: [u8; 4],
    pub auth_tag: [u8; 4],
    pub key_agreement: [u8; 4],
    pub sas_type: [u8; 4],
    pub variant: CommitVariant,
    pub mac: [u8; MESSAGE_MAC_SIZE],
}

impl CommitMessage {
    pub fn is_multi_stream(&self) -> bool {
        matches!(self.variant, CommitVariant::MultiStream { .. })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::Commit);
        buf.extend_from_slice(&self.h2);
        buf.extend_from_slice(self.zid.as_bytes());
        buf.extend_from_slice(&self.hash);
        buf.extend_from_slice(&self.cipher);
        buf.extend_from_slice(&self.auth_tag);
        buf.extend_from_slice(&self.key_agreement);
        buf.extend_from_slice(&self.sas_type);
        match &self.variant {
            CommitVariant::Dh { hvi } => buf.extend_from_slice(hvi),
            CommitVariant::MultiStream { nonce } => buf.extend_from_slice(nonce),
        }
        buf.extend_from_slice(&self.mac);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let body = body_of(message, MessageType::Commit)?;
        let words = message.len() / ZRTP_WORD_SIZE;
        let multi = match words {
            COMMIT_DH_WORDS => false,
            COMMIT_MULTI_WORDS => true,
            _ => return Err(ZrtpError::LengthMismatch),
        };
        let mut at = 0usize;
        let mut h2 = [0u8; HASH_IMAGE_SIZE];
        h2.copy_from_slice(&body[at..at + HASH_IMAGE_SIZE]);
        at += HASH_IMAGE_SIZE;
        let zid = Zid::from_slice(&body[at..at + ZID_SIZE]);
        at += ZID_SIZE;
        let mut codes = [[0u8; 4]; 5];
        for code in codes.iter_mut() {
            code.copy_from_slice(&body[at..at + 4]);
            at += 4;
        }
        let variant = if multi {
            let mut nonce = [0u8; NONCE_SIZE];
            nonce.copy_from_slice(&body[at..at + NONCE_SIZE]);
            at += NONCE_SIZE;
            CommitVariant::MultiStream { nonce }
        } else {
            let mut hvi = [0u8; HVI_SIZE];
            hvi.copy_from_slice(&body[at..at + HVI_SIZE]);
            at += HVI_SIZE;
            CommitVariant::Dh { hvi }
        };
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&body[at..at + MESSAGE_MAC_SIZE]);
        Ok(CommitMessage {
            h2,
            zid,
            hash: codes[0],
            cipher: codes[1],
            auth_tag: codes[2],
            key_agreement: codes[3],
            sas_type: codes[4],
            variant,
            mac,
        })
    }
}

/* DHPart1 / DHPart2 */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DhPartMessage {
    pub mtype: MessageType,
    pub h1: [u8; HASH_IMAGE_SIZE],
    pub rs1_id: [u8; RS_ID_SIZE],
    pub rs2_id: [u8; RS_ID_SIZE],
    pub aux_secret_id: [u8; RS_ID_SIZE],
    pub pbx_secret_id: [u8; RS_ID_SIZE],
    pub pv: Vec<u8>,
    pub mac: [u8; MESSAGE_MAC_SIZE],
}

impl DhPartMessage {
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(matches!(self.mtype, MessageType::DhPart1 | MessageType::DhPart2));
        debug_assert!(self.pv.len() % ZRTP_WORD_SIZE == 0);
        let mut buf = begin(self.mtype);
        buf.extend_from_slice(&self.h1);
        buf.extend_from_slice(&self.rs1_id);
        buf.extend_from_slice(&self.rs2_id);
        buf.extend_from_slice(&self.aux_secret_id);
        buf.extend_from_slice(&self.pbx_secret_id);
        buf.extend_from_slice(&self.pv);
        buf.extend_from_slice(&self.mac);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let (mtype, words) = parse_header(message)?;
        if !matches!(mtype, MessageType::DhPart1 | MessageType::DhPart2) {
            return Err(ZrtpError::Malformed);
        }
        if words < DHPART_FIXED_WORDS {
            return Err(ZrtpError::LengthMismatch);
        }
        let body = &message[HEADER_WORDS * ZRTP_WORD_SIZE..];
        let pv_len = (words - DHPART_FIXED_WORDS) * ZRTP_WORD_SIZE;
        let mut at = 0usize;
        let mut h1 = [0u8; HASH_IMAGE_SIZE];
        h1.copy_from_slice(&body[at..at + HASH_IMAGE_SIZE]);
        at += HASH_IMAGE_SIZE;
        let mut ids = [[0u8; RS_ID_SIZE]; 4];
        for id in ids.iter_mut() {
            id.copy_from_slice(&body[at..at + RS_ID_SIZE]);
            at += RS_ID_SIZE;
        }
        let pv = body[at..at + pv_len].to_vec();
        at += pv_len;
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&body[at..at + MESSAGE_MAC_SIZE]);
        Ok(DhPartMessage {
            mtype,
            h1,
            rs1_id: ids[0],
            rs2_id: ids[1],
            aux_secret_id: ids[2],
            pbx_secret_id: ids[3],
            pv,
            mac,
        })
    }
}

/* Confirm1 / Confirm2 */

pub const CONFIRM_FLAG_PBX_ENROLLMENT: u8 = 0x08;
pub const CONFIRM_FLAG_SAS_VERIFIED: u8 = 0x04;
pub const CONFIRM_FLAG_ALLOW_CLEAR: u8 = 0x02;
pub const CONFIRM_FLAG_DISCLOSURE: u8 = 0x01;

/// Confirm on the wire: outer MAC, CFB IV and the encrypted region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmMessage {
    pub mtype: MessageType,
    pub mac: [u8; MESSAGE_MAC_SIZE],
    pub iv: [u8; IV_SIZE],
    pub encrypted: Vec<u8>,
}

/// The decrypted interior of a Confirm message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmPlaintext {
    pub h0: [u8; HASH_IMAGE_SIZE],
    pub sig_len_words: u16,
    pub flags: u8,
    pub expire_interval: u32,
    pub signature: Vec<u8>,
}

impl ConfirmPlaintext {
    pub fn encode(&self) -> Vec<u8> {
        debug_assert_eq!(self.signature.len(), self.sig_len_words as usize * ZRTP_WORD_SIZE);
        let mut buf = Vec::with_capacity(HASH_IMAGE_SIZE + 8 + self.signature.len());
        buf.extend_from_slice(&self.h0);
        // sig length is 9 bits; the high bit rides in bit 0 of the
        // second filler byte, the low byte follows, then the flags.
        buf.push(0);
        buf.push(if self.sig_len_words & 0x100 != 0 { 1 } else { 0 });
        buf.push((self.sig_len_words & 0xff) as u8);
        buf.push(self.flags);
        buf.extend_from_slice(&self.expire_interval.to_be_bytes());
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn parse(plain: &[u8]) -> Result<Self, ZrtpError> {
        if plain.len() < HASH_IMAGE_SIZE + 8 {
            return Err(ZrtpError::Malformed);
        }
        let mut h0 = [0u8; HASH_IMAGE_SIZE];
        h0.copy_from_slice(&plain[..HASH_IMAGE_SIZE]);
        let mut sig_len_words = plain[HASH_IMAGE_SIZE + 2] as u16;
        if plain[HASH_IMAGE_SIZE + 1] & 0x01 != 0 {
            sig_len_words |= 0x100;
        }
        if sig_len_words as usize > MAX_SIGNATURE_WORDS {
            return Err(ZrtpError::Malformed);
        }
        let flags = plain[HASH_IMAGE_SIZE + 3];
        let expire_interval = u32::from_be_bytes(
            plain[HASH_IMAGE_SIZE + 4..HASH_IMAGE_SIZE + 8].try_into().unwrap(),
        );
        let signature = plain[HASH_IMAGE_SIZE + 8..].to_vec();
        if signature.len() != sig_len_words as usize * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        Ok(ConfirmPlaintext { h0, sig_len_words, flags, expire_interval, signature })
    }
}

impl ConfirmMessage {
    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(matches!(self.mtype, MessageType::Confirm1 | MessageType::Confirm2));
        let mut buf = begin(self.mtype);
        buf.extend_from_slice(&self.mac);
        buf.extend_from_slice(&self.iv);
        buf.extend_from_slice(&self.encrypted);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let (mtype, words) = parse_header(message)?;
        if !matches!(mtype, MessageType::Confirm1 | MessageType::Confirm2) {
            return Err(ZrtpError::Malformed);
        }
        if words < CONFIRM_FIXED_WORDS {
            return Err(ZrtpError::LengthMismatch);
        }
        let body = &message[HEADER_WORDS * ZRTP_WORD_SIZE..];
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&body[..MESSAGE_MAC_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&body[MESSAGE_MAC_SIZE..MESSAGE_MAC_SIZE + IV_SIZE]);
        let encrypted = body[MESSAGE_MAC_SIZE + IV_SIZE..].to_vec();
        Ok(ConfirmMessage { mtype, mac, iv, encrypted })
    }
}

/* Error */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: u32,
}

impl ErrorMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::Error);
        buf.extend_from_slice(&self.code.to_be_bytes());
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let body = body_of(message, MessageType::Error)?;
        if body.len() != (ERROR_WORDS - HEADER_WORDS) * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        Ok(ErrorMessage { code: u32::from_be_bytes(body[..4].try_into().unwrap()) })
    }
}

/* GoClear */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoClearMessage {
    pub clear_mac: [u8; MESSAGE_MAC_SIZE],
}

impl GoClearMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::GoClear);
        buf.extend_from_slice(&self.clear_mac);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let body = body_of(message, MessageType::GoClear)?;
        if body.len() != (GO_CLEAR_WORDS - HEADER_WORDS) * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        let mut clear_mac = [0u8; MESSAGE_MAC_SIZE];
        clear_mac.copy_from_slice(&body[..MESSAGE_MAC_SIZE]);
        Ok(GoClearMessage { clear_mac })
    }
}

/* Ping / PingAck */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingMessage {
    pub version: [u8; 4],
    pub endpoint_hash: [u8; 8],
}

impl PingMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::Ping);
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(&self.endpoint_hash);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let body = body_of(message, MessageType::Ping)?;
        if body.len() != (PING_WORDS - HEADER_WORDS) * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        Ok(PingMessage {
            version: body[..4].try_into().unwrap(),
            endpoint_hash: body[4..12].try_into().unwrap(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingAckMessage {
    pub version: [u8; 4],
    pub sender_hash: [u8; 8],
    pub received_hash: [u8; 8],
    pub ssrc: u32,
}

impl PingAckMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::PingAck);
        buf.extend_from_slice(&self.version);
        buf.extend_from_slice(&self.sender_hash);
        buf.extend_from_slice(&self.received_hash);
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let body = body_of(message, MessageType::PingAck)?;
        if body.len() != (PING_ACK_WORDS - HEADER_WORDS) * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        Ok(PingAckMessage {
            version: body[..4].try_into().unwrap(),
            sender_hash: body[4..12].try_into().unwrap(),
            received_hash: body[12..20].try_into().unwrap(),
            ssrc: u32::from_be_bytes(body[20..24].try_into().unwrap()),
        })
    }
}

/* SASrelay */

/// SASrelay mirrors Confirm on the wire; the encrypted interior carries
/// the rendering scheme and the relayed SAS hash instead of H0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasRelayMessage {
    pub mac: [u8; MESSAGE_MAC_SIZE],
    pub iv: [u8; IV_SIZE],
    pub encrypted: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SasRelayPlaintext {
    pub sig_len_words: u16,
    pub flags: u8,
    pub sas_scheme: [u8; 4],
    pub sas_hash: [u8; HASH_IMAGE_SIZE],
    pub signature: Vec<u8>,
}

impl SasRelayPlaintext {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + HASH_IMAGE_SIZE + self.signature.len());
        buf.push(0);
        buf.push(if self.sig_len_words & 0x100 != 0 { 1 } else { 0 });
        buf.push((self.sig_len_words & 0xff) as u8);
        buf.push(self.flags);
        buf.extend_from_slice(&self.sas_scheme);
        buf.extend_from_slice(&self.sas_hash);
        buf.extend_from_slice(&self.signature);
        buf
    }

    pub fn parse(plain: &[u8]) -> Result<Self, ZrtpError> {
        if plain.len() < 8 + HASH_IMAGE_SIZE {
            return Err(ZrtpError::Malformed);
        }
        let mut sig_len_words = plain[2] as u16;
        if plain[1] & 0x01 != 0 {
            sig_len_words |= 0x100;
        }
        let flags = plain[3];
        let sas_scheme: [u8; 4] = plain[4..8].try_into().unwrap();
        let mut sas_hash = [0u8; HASH_IMAGE_SIZE];
        sas_hash.copy_from_slice(&plain[8..8 + HASH_IMAGE_SIZE]);
        let signature = plain[8 + HASH_IMAGE_SIZE..].to_vec();
        if signature.len() != sig_len_words as usize * ZRTP_WORD_SIZE {
            return Err(ZrtpError::LengthMismatch);
        }
        Ok(SasRelayPlaintext { sig_len_words, flags, sas_scheme, sas_hash, signature })
    }
}

impl SasRelayMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = begin(MessageType::SasRelay);
        buf.extend_from_slice(&self.mac);
        buf.extend_from_slice(&self.iv);
        buf.extend_from_slice(&self.encrypted);
        finish(buf)
    }

    pub fn parse(message: &[u8]) -> Result<Self, ZrtpError> {
        let (mtype, words) = parse_header(message)?;
        if mtype != MessageType::SasRelay {
            return Err(ZrtpError::Malformed);
        }
        if words < SAS_RELAY_FIXED_WORDS {
            return Err(ZrtpError::LengthMismatch);
        }
        let body = &message[HEADER_WORDS * ZRTP_WORD_SIZE..];
        let mut mac = [0u8; MESSAGE_MAC_SIZE];
        mac.copy_from_slice(&body[..MESSAGE_MAC_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&body[MESSAGE_MAC_SIZE..MESSAGE_MAC_SIZE + IV_SIZE]);
        let encrypted = body[MESSAGE_MAC_SIZE + IV_SIZE..].to_vec();
        Ok(SasRelayMessage { mac, iv, encrypted })
    }
}

/* Plain acknowledgements */

/// HelloACK, Conf2ACK, ErrorACK, ClearACK, RelayACK are header-only.
pub fn encode_ack(mtype: MessageType) -> Vec<u8> {
    debug_assert!(matches!(
        mtype,
        MessageType::HelloAck
            | MessageType::Conf2Ack
            | MessageType::ErrorAck
            | MessageType::ClearAck
            | MessageType::RelayAck
    ));
    finish(begin(mtype))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_hello() -> HelloMessage {
        HelloMessage {
            version: *ZRTP_VERSION,
            client_id: *CLIENT_ID,
            h3: [3u8; 32],
            zid: Zid::from_slice(&[9u8; 12]),
            flags: HELLO_FLAG_MITM,
            hashes: vec![*b"S256", *b"S384"],
            ciphers: vec![*b"AES1"],
            auth_tags: vec![*b"HS32", *b"HS80"],
            key_agreements: vec![*b"DH3k", *b"EC25", *b"Mult"],
            sas_types: vec![*b"B32 "],
            mac: [0xaa; 8],
        }
    }

    #[test]
    fn hello_roundtrip() {
        let hello = sample_hello();
        let bytes = hello.encode();
        assert_eq!(bytes.len() % ZRTP_WORD_SIZE, 0);
        let parsed = HelloMessage::parse(&bytes).unwrap();
        assert_eq!(parsed, hello);
        assert_eq!(parsed.encode(), bytes);
        assert!(parsed.is_mitm());
        assert!(!parsed.is_sas_sign());
    }

    #[test]
    fn hello_length_word_is_checked() {
        let mut bytes = sample_hello().encode();
        bytes[3] ^= 1;
        assert!(HelloMessage::parse(&bytes).is_err());
    }

    #[test]
    fn commit_dh_roundtrip() {
        let commit = CommitMessage {
            h2: [2u8; 32],
            zid: Zid::from_slice(&[1u8; 12]),
            hash: *b"S256",
            cipher: *b"AES1",
            auth_tag: *b"HS32",
            key_agreement: *b"DH3k",
            sas_type: *b"B32 ",
            variant: CommitVariant::Dh { hvi: [0x11; 32] },
            mac: [0xbb; 8],
        };
        let bytes = commit.encode();
        assert_eq!(bytes.len(), COMMIT_DH_WORDS * ZRTP_WORD_SIZE);
        assert_eq!(CommitMessage::parse(&bytes).unwrap(), commit);
    }

    #[test]
    fn commit_multi_roundtrip() {
        let commit = CommitMessage {
            h2: [2u8; 32],
            zid: Zid::from_slice(&[1u8; 12]),
            hash: *b"S256",
            cipher: *b"AES1",
            auth_tag: *b"HS32",
            key_agreement: *b"Mult",
            sas_type: *b"B32 ",
            variant: CommitVariant::MultiStream { nonce: [0x22; 16] },
            mac: [0xcc; 8],
        };
        let bytes = commit.encode();
        assert_eq!(bytes.len(), COMMIT_MULTI_WORDS * ZRTP_WORD_SIZE);
        assert_eq!(CommitMessage::parse(&bytes).unwrap(), commit);
    }

    #[test]
    fn dhpart_roundtrip() {
        let dh = DhPartMessage {
            mtype: MessageType::DhPart1,
            h1: [1u8; 32],
            rs1_id: [1; 8],
            rs2_id: [2; 8],
            aux_secret_id: [3; 8],
            pbx_secret_id: [4; 8],
            pv: vec![0x55; 384],
            mac: [0xdd; 8],
        };
        let bytes = dh.encode();
        assert_eq!(bytes.len() / ZRTP_WORD_SIZE, DHPART_FIXED_WORDS + 96);
        assert_eq!(DhPartMessage::parse(&bytes).unwrap(), dh);
    }

    #[test]
    fn confirm_roundtrip_with_signature() {
        // exercise the 9th signature-length bit
        let sig_words = 0x101u16;
        let plain = ConfirmPlaintext {
            h0: [7u8; 32],
            sig_len_words: sig_words,
            flags: CONFIRM_FLAG_SAS_VERIFIED | CONFIRM_FLAG_PBX_ENROLLMENT,
            expire_interval: 0xffff_ffff,
            signature: vec![0x66; sig_words as usize * ZRTP_WORD_SIZE],
        };
        let encoded = plain.encode();
        let parsed = ConfirmPlaintext::parse(&encoded).unwrap();
        assert_eq!(parsed, plain);
        assert_eq!(encoded[HASH_IMAGE_SIZE + 1], 1);

        let msg = ConfirmMessage {
            mtype: MessageType::Confirm1,
            mac: [0xee; 8],
            iv: [0x10; 16],
            encrypted: encoded,
        };
        let bytes = msg.encode();
        assert_eq!(ConfirmMessage::parse(&bytes).unwrap(), msg);
    }

    #[test]
    fn error_roundtrip() {
        let err = ErrorMessage { code: 0x62 };
        let bytes = err.encode();
        assert_eq!(bytes.len(), ERROR_WORDS * ZRTP_WORD_SIZE);
        assert_eq!(ErrorMessage::parse(&bytes).unwrap(), err);
    }

    #[test]
    fn ping_roundtrip() {
        let ping = PingMessage { version: *ZRTP_VERSION, endpoint_hash: [5u8; 8] };
        assert_eq!(PingMessage::parse(&ping.encode()).unwrap(), ping);
        let ack = PingAckMessage {
            version: *ZRTP_VERSION,
            sender_hash: [6u8; 8],
            received_hash: [5u8; 8],
            ssrc: 0xdeadbeef,
        };
        assert_eq!(PingAckMessage::parse(&ack.encode()).unwrap(), ack);
    }

    #[test]
    fn sas_relay_roundtrip() {
        let plain = SasRelayPlaintext {
            sig_len_words: 0,
            flags: 0,
            sas_scheme: *b"B32 ",
            sas_hash: [0x42; 32],
            signature: Vec::new(),
        };
        let msg = SasRelayMessage { mac: [1; 8], iv: [2; 16], encrypted: plain.encode() };
        let bytes = msg.encode();
        assert_eq!(bytes.len(), SAS_RELAY_FIXED_WORDS * ZRTP_WORD_SIZE);
        let parsed = SasRelayMessage::parse(&bytes).unwrap();
        assert_eq!(SasRelayPlaintext::parse(&parsed.encrypted).unwrap(), plain);
    }

    #[test]
    fn acks_are_three_words() {
        for t in [
            MessageType::HelloAck,
            MessageType::Conf2Ack,
            MessageType::ErrorAck,
            MessageType::ClearAck,
            MessageType::RelayAck,
        ] {
            let bytes = encode_ack(t);
            assert_eq!(bytes.len(), ACK_WORDS * ZRTP_WORD_SIZE);
            assert_eq!(parse_header(&bytes).unwrap(), (t, ACK_WORDS));
        }
    }

    #[test]
    fn sealed_message_verifies() {
        let bytes = seal(encode_ack(MessageType::HelloAck));
        assert!(verify_crc(&bytes));
    }

    #[test]
    fn preamble_is_required() {
        let mut bytes = encode_ack(MessageType::HelloAck);
        bytes[0] = 0;
        assert!(parse_header(&bytes).is_err());
    }
}
