/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

/* Common constants */

/// Basic unit of every ZRTP message. All length fields count these.
pub const ZRTP_WORD_SIZE: usize = 4;

/// ZRTP endpoint identifier length in bytes.
pub const ZID_SIZE: usize = 12;

/// Message preamble, the first two bytes of every ZRTP message.
pub const MESSAGE_PREAMBLE: u16 = 0x505a;

/// Length of the client id field in the Hello message.
pub const CLIENT_ID_SIZE: usize = 16;

/// Size of a hash image (H0..H3) as carried on the wire.
pub const HASH_IMAGE_SIZE: usize = 32;

/// Size of a retained secret and of the retained-secret slots in the cache.
pub const RS_SIZE: usize = 32;

/// Size of a retained-secret identifier on the wire (2 words).
pub const RS_ID_SIZE: usize = 8;

/// Size of the truncated MAC carried by Hello/Commit/DHPart messages (2 words).
pub const MESSAGE_MAC_SIZE: usize = 8;

/// Size of the CFB initialization vector in Confirm/SASrelay messages.
pub const IV_SIZE: usize = 16;

/// Size of the multi-stream Commit nonce (4 words).
pub const NONCE_SIZE: usize = 16;

/// Size of the hvi field in a DH-mode Commit (8 words).
pub const HVI_SIZE: usize = 32;

/// Trailing CRC length in bytes.
pub const CRC_SIZE: usize = 4;

/// Largest digest this implementation produces (SHA-384 / Skein-384).
pub const MAX_DIGEST_SIZE: usize = 48;

/// SRTP master salt length derived for either direction.
pub const SRTP_SALT_SIZE: usize = 14;

pub(crate) const RTP_HEADER_SIZE: usize = 12;

/// Upper bound on a single ZRTP message accepted from the wire, in bytes.
/// A full Hello with every algorithm list populated stays well below this.
pub(crate) const MAX_MESSAGE_SIZE: usize = 3072;

/* Protocol version */

/// The protocol version this implementation sends in its Hello.
pub const ZRTP_VERSION: &[u8; 4] = b"1.10";
pub(crate) const ZRTP_VERSION_INT: i32 = 11;

pub(crate) const CLIENT_ID: &[u8; CLIENT_ID_SIZE] = b"zrtp-rs 0.1     ";

/* Message type tags, 2 words of ASCII */

pub(crate) const TAG_HELLO: &[u8; 8] = b"Hello   ";
pub(crate) const TAG_HELLO_ACK: &[u8; 8] = b"HelloACK";
pub(crate) const TAG_COMMIT: &[u8; 8] = b"Commit  ";
pub(crate) const TAG_DHPART1: &[u8; 8] = b"DHPart1 ";
pub(crate) const TAG_DHPART2: &[u8; 8] = b"DHPart2 ";
pub(crate) const TAG_CONFIRM1: &[u8; 8] = b"Confirm1";
pub(crate) const TAG_CONFIRM2: &[u8; 8] = b"Confirm2";
pub(crate) const TAG_CONF2_ACK: &[u8; 8] = b"Conf2ACK";
pub(crate) const TAG_ERROR: &[u8; 8] = b"Error   ";
pub(crate) const TAG_ERROR_ACK: &[u8; 8] = b"ErrorACK";
pub(crate) const TAG_GO_CLEAR: &[u8; 8] = b"GoClear ";
pub(crate) const TAG_CLEAR_ACK: &[u8; 8] = b"ClearACK";
pub(crate) const TAG_PING: &[u8; 8] = b"Ping    ";
pub(crate) const TAG_PING_ACK: &[u8; 8] = b"PingACK ";
pub(crate) const TAG_SAS_RELAY: &[u8; 8] = b"SASrelay";
pub(crate) const TAG_RELAY_ACK: &[u8; 8] = b"RelayACK";

/* KDF labels, RFC 6189 chapter 4.5 */

pub(crate) const LABEL_ROLE_INITIATOR: &[u8] = b"Initiator";
pub(crate) const LABEL_ROLE_RESPONDER: &[u8] = b"Responder";
pub(crate) const LABEL_KDF: &[u8] = b"ZRTP-HMAC-KDF";
pub(crate) const LABEL_INI_SRTP_KEY: &[u8] = b"Initiator SRTP master key";
pub(crate) const LABEL_INI_SRTP_SALT: &[u8] = b"Initiator SRTP master salt";
pub(crate) const LABEL_RESP_SRTP_KEY: &[u8] = b"Responder SRTP master key";
pub(crate) const LABEL_RESP_SRTP_SALT: &[u8] = b"Responder SRTP master salt";
pub(crate) const LABEL_INI_HMAC_KEY: &[u8] = b"Initiator HMAC key";
pub(crate) const LABEL_RESP_HMAC_KEY: &[u8] = b"Responder HMAC key";
pub(crate) const LABEL_INI_ZRTP_KEY: &[u8] = b"Initiator ZRTP key";
pub(crate) const LABEL_RESP_ZRTP_KEY: &[u8] = b"Responder ZRTP key";
pub(crate) const LABEL_RETAINED_SECRET: &[u8] = b"retained secret";
pub(crate) const LABEL_SAS: &[u8] = b"SAS";
pub(crate) const LABEL_SESSION_KEY: &[u8] = b"ZRTP Session Key";
pub(crate) const LABEL_EXPORTED_KEY: &[u8] = b"Exported key";
pub(crate) const LABEL_MSK: &[u8] = b"ZRTP MSK";
pub(crate) const LABEL_TRUSTED_MITM: &[u8] = b"Trusted MiTM key";

/* Timer defaults, chapter 6 of RFC 6189 with the extended Hello budget */

pub(crate) const T1_START_MS: i32 = 50;
pub(crate) const T1_CAPPING_MS: i32 = 200;
pub(crate) const T1_MAX_RESEND: i32 = 20;
pub(crate) const T1_RESEND_EXTEND: i32 = 60;

pub(crate) const T2_START_MS: i32 = 150;
pub(crate) const T2_CAPPING_MS: i32 = 1200;
pub(crate) const T2_MAX_RESEND: i32 = 10;

/// Resend counters below this are rejected by the tuning setters.
pub(crate) const MIN_RESEND_COUNTER: i32 = 10;
/// Lower bounds for the timer capping setters.
pub(crate) const T1_MIN_CAPPING_MS: i32 = 50;
pub(crate) const T2_MIN_CAPPING_MS: i32 = 150;

/* ZRTP 2022 frames */

/// Frame header is one ZRTP word: length, batch id, fragment info.
pub(crate) const FRAME_HEADER_WORDS: usize = 1;
/// Maximum message words carried by a single frame.
pub(crate) const MAX_FRAME_CONTENT_WORDS: usize = 128;
/// Continuation bit in the fragment info byte.
pub(crate) const FRAME_CONTINUATION: u8 = 0x80;
/// Maximum fragments a batch may consist of.
pub(crate) const MAX_FRAGMENTS: usize = 48;

/* Fixed message lengths in words, header included */

pub(crate) const HEADER_WORDS: usize = 3;
pub(crate) const COMMIT_DH_WORDS: usize = 29;
pub(crate) const COMMIT_MULTI_WORDS: usize = 25;
pub(crate) const DHPART_FIXED_WORDS: usize = 21;
pub(crate) const CONFIRM_FIXED_WORDS: usize = 19;
pub(crate) const ERROR_WORDS: usize = 4;
pub(crate) const PING_WORDS: usize = 6;
pub(crate) const PING_ACK_WORDS: usize = 9;
pub(crate) const GO_CLEAR_WORDS: usize = 5;
pub(crate) const ACK_WORDS: usize = 3;
pub(crate) const SAS_RELAY_FIXED_WORDS: usize = 19;

/// Maximum signature block length in words carried by a Confirm message.
pub(crate) const MAX_SIGNATURE_WORDS: usize = 512;
