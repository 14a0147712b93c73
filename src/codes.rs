/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Severity and sub-code values delivered through the `send_info` and
//! `negotiation_failed` callbacks. Sub-codes travel as plain `u32` so a
//! host can forward them without matching every variant.

/// Severity of an engine-to-host information message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    /// Progress information, keeps UIs honest about what the engine does.
    Info,
    /// Something unusual happened but the negotiation continues.
    Warning,
    /// The negotiation failed and the engine returned to Initial.
    Severe,
    /// A wire-visible ZRTP error code, see [`crate::ZrtpErrorCode`].
    ZrtpError,
}

/// Sub-codes for `MessageSeverity::Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum InfoCode {
    HelloReceived = 1,
    CommitGenerated = 2,
    RespCommitReceived = 3,
    Dh1Generated = 4,
    InitDh1Received = 5,
    RespDh2Received = 6,
    InitConf1Received = 7,
    RespConf2Received = 8,
    RsMatchFound = 9,
    SecureStateOn = 10,
    SecureStateOff = 11,
}

/// Sub-codes for `MessageSeverity::Warning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WarningCode {
    /// Commit offers an AES key longer than the negotiated DH strength.
    DhAesMismatch = 1,
    /// No retained secret matched, the SAS must be verified by voice.
    NoRsMatch = 2,
    /// DH public value sanity check hit a short value.
    DhShort = 3,
    /// We cached a retained secret but the peer did not match it.
    NoExpectedRsMatch = 4,
    /// CRC mismatch reported by the host.
    CrcMismatch = 5,
    /// The peer offered an auxiliary secret we could not match.
    NoExpectedAuxMatch = 6,
}

/// Sub-codes for `MessageSeverity::Severe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SevereCode {
    HelloHmacFailed = 1,
    CommitHmacFailed = 2,
    Dh1HmacFailed = 3,
    Dh2HmacFailed = 4,
    CannotSend = 5,
    ProtocolError = 6,
    NoTimer = 7,
    TooMuchRetries = 8,
}
