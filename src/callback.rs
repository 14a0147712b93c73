/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! The host glue trait. Implementing this trait is all a host needs to
//! plug the engine into its transport, timer service and UI. The
//! session holds the callback as a `Weak` observer: if the host drops
//! it, every send fails and the negotiation aborts cleanly.

use crate::codes::MessageSeverity;
use crate::keys::SrtpSecrets;

/// Which half of the SRTP association a secrets call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyDirection {
    ForSender,
    ForReceiver,
}

/// Information the host needs to run a PBX enrollment dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentInfo {
    /// A PBX asks to become the trusted MitM for this endpoint.
    Request,
    /// The peer canceled a pending enrollment.
    Canceled,
    /// Enrollment completed on the PBX side.
    Ok,
}

/// Callbacks the engine drives. All methods are non-blocking; user
/// interaction (SAS display, enrollment decisions) may complete later
/// through the session API.
pub trait ZrtpCallback {
    /// Hand an encoded ZRTP message (CRC included) to the transport.
    /// Returns false when sending is impossible.
    fn send_data(&self, data: &[u8]) -> bool;

    /// Arm the single protocol timer. Only one timer is outstanding at
    /// any time; a second call re-arms it.
    fn activate_timer(&self, ms: i32) -> bool;

    /// Cancel the protocol timer.
    fn cancel_timer(&self) -> bool;

    /// Engine status, warnings and error reports.
    fn send_info(&self, severity: MessageSeverity, sub_code: u32);

    /// Terminal negotiation failure.
    fn negotiation_failed(&self, severity: MessageSeverity, sub_code: u32);

    /// The peer never answered our Hello messages.
    fn zrtp_not_supp_other(&self);

    /// SRTP key material for one direction is ready. Returning false
    /// aborts with a critical error.
    fn srtp_secrets_ready(&self, secrets: &SrtpSecrets, part: KeyDirection) -> bool;

    /// Both directions are up; display the SAS to the user.
    fn srtp_secrets_on(&self, cipher: String, sas: String, verified: bool);

    /// Security for one direction has been switched off.
    fn srtp_secrets_off(&self, part: KeyDirection);

    /// Check the peer's SAS signature. Returns true when it verifies.
    fn check_sas_signature(&self, _sas_hash: &[u8]) -> bool {
        true
    }

    /// The host may sign the SAS hash and install the result through
    /// [`crate::ZrtpSession::set_signature_data`] before Confirm is built.
    fn sign_sas(&self, _sas_hash: &[u8]) -> bool {
        true
    }

    /// PBX enrollment progress; answer with
    /// [`crate::ZrtpSession::accept_enrollment`].
    fn ask_enrollment(&self, _info: EnrollmentInfo) {}

    /// Enrollment result report.
    fn inform_enrollment(&self, _info: EnrollmentInfo) {}
}
