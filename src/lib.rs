/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Endpoint side of the ZRTP key-agreement protocol (RFC 6189).
//!
//! ZRTP negotiates SRTP keys in the media path between two peers with
//! no pre-shared authentication infrastructure. Authentication rests on
//! a short authentication string the users read to each other and on
//! retained secrets cached from earlier calls.
//!
//! This crate transports nothing itself. A host application supplies
//! wire I/O, a timer service and retained-secret storage through the
//! [`ZrtpCallback`] trait and a [`cache::ZidCache`] implementation, and
//! receives negotiated SRTP keys, SAS display events, warnings and
//! state changes back through the same callback surface:
//!
//! ```text
//! inbound bytes -> packet codec -> state machine -> engine
//!        -> packet codec -> outbound bytes (via ZrtpCallback)
//! ```
//!
//! A session is driven by exactly two host calls,
//! [`ZrtpSession::process_zrtp_message`] and
//! [`ZrtpSession::process_timeout`], which must be serialized per
//! session. The engine never blocks and holds no internal threads.

pub mod cache;
pub mod callback;
pub mod codes;
pub mod config;
pub mod crc;
pub mod crypto;
pub mod error;
pub mod frames;
pub mod keys;
pub mod packet;
pub mod proto;
pub mod session;
pub mod state;

pub use cache::{FileZidCache, InMemoryZidCache, Zid, ZidCache, ZidRecord};
pub use callback::{EnrollmentInfo, KeyDirection, ZrtpCallback};
pub use codes::{InfoCode, MessageSeverity, SevereCode, WarningCode};
pub use config::ZrtpConfig;
pub use crypto::{
    AuthTag, CipherAlgorithm, HashAlgorithm, KeyAgreement, SasType, SelectionPolicy,
};
pub use error::{ZrtpError, ZrtpErrorCode};
pub use keys::{Role, SrtpSecrets};
pub use session::{DetailInfo, MultiStreamParams, ZrtpSession};
pub use state::State;
