/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use thiserror::Error;

/// Wire-visible ZRTP error codes, sent in Error messages (RFC 6189 §5.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ZrtpErrorCode {
    /// Malformed packet (CRC OK but wrong structure).
    MalformedPacket = 0x10,
    /// Critical software error.
    CriticalSwError = 0x20,
    /// Unsupported ZRTP version.
    UnsuppZrtpVersion = 0x30,
    /// Hello components mismatch.
    HelloCompMismatch = 0x40,
    /// No mandatory fallback for an offered component. Compliant peers
    /// always offer the mandatory set, so this should never hit the wire.
    UnsuppComponent = 0x50,
    /// Hash type not supported.
    UnsuppHashType = 0x51,
    /// Cipher type not supported.
    UnsuppCipherType = 0x52,
    /// Public key exchange not supported.
    UnsuppPkExchange = 0x53,
    /// SRTP auth tag not supported.
    UnsuppSrtpAuthTag = 0x54,
    /// SAS rendering scheme not supported.
    UnsuppSasScheme = 0x55,
    /// No shared secret available, DH mode required.
    NoSharedSecret = 0x56,
    /// DH error: bad public value (pvi or pvr).
    DhErrorWrongPv = 0x61,
    /// DH error: hvi does not match the hashed DHPart2/Hello data.
    DhErrorWrongHvi = 0x62,
    /// Received relayed SAS from an untrusted MitM.
    SasUntrustedMitm = 0x63,
    /// Auth error: bad Confirm packet MAC.
    ConfirmHmacWrong = 0x70,
    /// Nonce reuse.
    NonceReused = 0x80,
    /// Equal ZIDs in Hello.
    EqualZidHello = 0x90,
    /// SSRC collision.
    SsrcCollision = 0x91,
    /// Service unavailable.
    ServiceUnavailable = 0xA0,
    /// Protocol timeout error.
    ProtocolTimeout = 0xB0,
    /// GoClear received but not allowed.
    GoClearNotAllowed = 0x100,
}

impl ZrtpErrorCode {
    pub fn from_wire(value: u32) -> Option<Self> {
        use ZrtpErrorCode::*;
        Some(match value {
            0x10 => MalformedPacket,
            0x20 => CriticalSwError,
            0x30 => UnsuppZrtpVersion,
            0x40 => HelloCompMismatch,
            0x50 => UnsuppComponent,
            0x51 => UnsuppHashType,
            0x52 => UnsuppCipherType,
            0x53 => UnsuppPkExchange,
            0x54 => UnsuppSrtpAuthTag,
            0x55 => UnsuppSasScheme,
            0x56 => NoSharedSecret,
            0x61 => DhErrorWrongPv,
            0x62 => DhErrorWrongHvi,
            0x63 => SasUntrustedMitm,
            0x70 => ConfirmHmacWrong,
            0x80 => NonceReused,
            0x90 => EqualZidHello,
            0x91 => SsrcCollision,
            0xA0 => ServiceUnavailable,
            0xB0 => ProtocolTimeout,
            0x100 => GoClearNotAllowed,
            _ => return None,
        })
    }
}

/// Errors surfaced to the host at the message-processing boundary.
///
/// The engine never unwinds across the callback boundary; a failed
/// negotiation is reported through the callback surface and the state
/// machine, these errors cover API misuse and storage trouble.
#[derive(Debug, Error)]
pub enum ZrtpError {
    /// Inbound bytes do not form a ZRTP message.
    #[error("malformed ZRTP message")]
    Malformed,

    /// Message was well-formed but carries an inconsistent length field.
    #[error("message length field does not match received data")]
    LengthMismatch,

    /// The operation is not valid in the current protocol state.
    #[error("invalid state for this operation")]
    InvalidState,

    /// An invalid parameter was supplied by the host.
    #[error("invalid parameter")]
    InvalidParameter,

    /// The ZID cache rejected or failed an operation.
    #[error("ZID cache failure: {0}")]
    Cache(String),

    /// Multi-stream parameters refer to a master session that is not secure.
    #[error("master stream is not in secure state")]
    MasterNotSecure,
}
