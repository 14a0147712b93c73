/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::crypto::{
    AuthTag, CipherAlgorithm, HashAlgorithm, KeyAgreement, SasType, SelectionPolicy,
};

/// Algorithm lists and behavior switches for one session.
///
/// Lists are in local preference order. The mandatory entries (S256,
/// AES1, HS32/HS80, DH3k, B32) are appended automatically when missing,
/// so negotiation always has its fallback.
#[derive(Debug, Clone)]
pub struct ZrtpConfig {
    pub hash_algos: Vec<HashAlgorithm>,
    pub cipher_algos: Vec<CipherAlgorithm>,
    pub auth_tag_algos: Vec<AuthTag>,
    pub key_agreement_algos: Vec<KeyAgreement>,
    pub sas_algos: Vec<SasType>,
    pub selection_policy: SelectionPolicy,
    /// Honor the PBX enrollment flags and callbacks.
    pub mitm_enabled: bool,
    /// Announce SAS signature support in the Hello.
    pub sas_sign_support: bool,
    /// Force SAS-unverified handling and ignore relayed SAS content.
    pub paranoid_mode: bool,
    /// Wrap outbound messages into ZRTP-2022 frames.
    pub use_zrtp_frames: bool,
    /// Answer a GoClear with ClearAck instead of treating it as illegal.
    pub allow_clear: bool,
    /// Set the disclosure flag in Confirm messages.
    pub disclosure_flag: bool,
}

impl Default for ZrtpConfig {
    fn default() -> Self {
        ZrtpConfig {
            hash_algos: vec![HashAlgorithm::S384, HashAlgorithm::S256],
            cipher_algos: vec![CipherAlgorithm::Aes3, CipherAlgorithm::Aes1],
            auth_tag_algos: vec![AuthTag::Hs32, AuthTag::Hs80],
            key_agreement_algos: vec![
                KeyAgreement::Ec25,
                KeyAgreement::Dh3k,
                KeyAgreement::Mult,
            ],
            sas_algos: vec![SasType::B32],
            selection_policy: SelectionPolicy::Standard,
            mitm_enabled: false,
            sas_sign_support: false,
            paranoid_mode: false,
            use_zrtp_frames: false,
            allow_clear: false,
            disclosure_flag: false,
        }
    }
}

impl ZrtpConfig {
    /// Reduce every list to the mandatory entries.
    pub fn mandatory_only() -> Self {
        ZrtpConfig {
            hash_algos: vec![HashAlgorithm::S256],
            cipher_algos: vec![CipherAlgorithm::Aes1],
            auth_tag_algos: vec![AuthTag::Hs32, AuthTag::Hs80],
            key_agreement_algos: vec![KeyAgreement::Dh3k, KeyAgreement::Mult],
            sas_algos: vec![SasType::B32],
            ..Default::default()
        }
    }

    /// Append missing mandatory entries so the lists can always settle
    /// on something a compliant peer offers.
    pub(crate) fn ensure_mandatory(&mut self) {
        if !self.hash_algos.contains(&HashAlgorithm::MANDATORY) {
            self.hash_algos.push(HashAlgorithm::MANDATORY);
        }
        if !self.cipher_algos.contains(&CipherAlgorithm::MANDATORY) {
            self.cipher_algos.push(CipherAlgorithm::MANDATORY);
        }
        if !self.auth_tag_algos.contains(&AuthTag::Hs32) {
            self.auth_tag_algos.push(AuthTag::Hs32);
        }
        if !self.auth_tag_algos.contains(&AuthTag::Hs80) {
            self.auth_tag_algos.push(AuthTag::Hs80);
        }
        if !self.key_agreement_algos.contains(&KeyAgreement::MANDATORY) {
            self.key_agreement_algos.push(KeyAgreement::MANDATORY);
        }
        if !self.sas_algos.contains(&SasType::MANDATORY) {
            self.sas_algos.push(SasType::MANDATORY);
        }
        self.hash_algos.truncate(7);
        self.cipher_algos.truncate(7);
        self.auth_tag_algos.truncate(7);
        self.key_agreement_algos.truncate(7);
        self.sas_algos.truncate(7);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_contain_mandatory_entries() {
        let mut cfg = ZrtpConfig::default();
        cfg.ensure_mandatory();
        assert!(cfg.hash_algos.contains(&HashAlgorithm::S256));
        assert!(cfg.cipher_algos.contains(&CipherAlgorithm::Aes1));
        assert!(cfg.key_agreement_algos.contains(&KeyAgreement::Dh3k));
        assert!(cfg.sas_algos.contains(&SasType::B32));
    }

    #[test]
    fn mandatory_is_appended_to_custom_lists() {
        let mut cfg = ZrtpConfig {
            hash_algos: vec![HashAlgorithm::Skn3],
            key_agreement_algos: vec![KeyAgreement::E255],
            ..Default::default()
        };
        cfg.ensure_mandatory();
        assert_eq!(cfg.hash_algos.last(), Some(&HashAlgorithm::S256));
        assert_eq!(cfg.key_agreement_algos.last(), Some(&KeyAgreement::Dh3k));
    }
}
