/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Crypto suite registry. Algorithms are identified by 4-ASCII codes in
//! five lists; each list is ordered by local preference and always
//! contains the mandatory entry as a fallback. The registry is plain
//! data, process-wide and immutable once a session copied its lists.

pub mod cipher;
pub mod dh;
pub mod hash;
pub mod sas;

pub use cipher::CipherAlgorithm;
pub use dh::{DhContext, KeyAgreement};
pub use hash::HashAlgorithm;
pub use sas::SasType;

/// Constant time byte slice equality.
#[inline]
pub fn secure_eq<A: AsRef<[u8]> + ?Sized, B: AsRef<[u8]> + ?Sized>(a: &A, b: &B) -> bool {
    let (a, b) = (a.as_ref(), b.as_ref());
    if a.len() == b.len() {
        let mut x = 0u8;
        for (aa, bb) in a.iter().zip(b.iter()) {
            x |= *aa ^ *bb;
        }
        x == 0
    } else {
        false
    }
}

/// SRTP authentication tag algorithms. These only name the tag the SRTP
/// layer will use; the engine negotiates and reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTag {
    /// 32 bits of HMAC-SHA1, mandatory.
    Hs32,
    /// 80 bits of HMAC-SHA1, mandatory.
    Hs80,
    /// 32 bits of Skein MAC.
    Sk32,
    /// 64 bits of Skein MAC.
    Sk64,
}

impl AuthTag {
    pub const MANDATORY: AuthTag = AuthTag::Hs32;

    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            AuthTag::Hs32 => b"HS32",
            AuthTag::Hs80 => b"HS80",
            AuthTag::Sk32 => b"SK32",
            AuthTag::Sk64 => b"SK64",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"HS32" => Some(AuthTag::Hs32),
            b"HS80" => Some(AuthTag::Hs80),
            b"SK32" => Some(AuthTag::Sk32),
            b"SK64" => Some(AuthTag::Sk64),
            _ => None,
        }
    }

    /// Tag length in bits.
    pub fn tag_bits(&self) -> usize {
        match self {
            AuthTag::Hs32 | AuthTag::Sk32 => 32,
            AuthTag::Sk64 => 64,
            AuthTag::Hs80 => 80,
        }
    }

    pub fn is_non_nist(&self) -> bool {
        matches!(self, AuthTag::Sk32 | AuthTag::Sk64)
    }
}

/// How the selector weighs offered algorithms against the local lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionPolicy {
    /// Pick by local preference order alone.
    #[default]
    Standard,
    /// When the chosen key agreement is a non-NIST curve, prefer the
    /// non-NIST hash/cipher/authTag entries (Skein, Twofish) when offered.
    NonNist,
}

/// The algorithm quintuple a Commit locks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedSuite {
    pub hash: HashAlgorithm,
    pub cipher: CipherAlgorithm,
    pub auth_tag: AuthTag,
    pub key_agreement: KeyAgreement,
    pub sas_type: SasType,
}

/// Pick the best element present in both lists. The local list's order
/// is the canonical ordering; the mandatory entry covers the empty
/// intersection (compliant peers always offer it).
fn select<T: Copy + PartialEq>(
    local: &[T],
    offered: impl Fn(&T) -> bool,
    mandatory: T,
) -> T {
    local.iter().copied().find(|a| offered(a)).unwrap_or(mandatory)
}

pub(crate) fn find_best_hash(local: &[HashAlgorithm], offered: &[[u8; 4]]) -> HashAlgorithm {
    select(
        local,
        |a| offered.iter().any(|c| c == a.code()),
        HashAlgorithm::MANDATORY,
    )
}

pub(crate) fn find_best_cipher(local: &[CipherAlgorithm], offered: &[[u8; 4]]) -> CipherAlgorithm {
    select(
        local,
        |a| offered.iter().any(|c| c == a.code()),
        CipherAlgorithm::MANDATORY,
    )
}

pub(crate) fn find_best_auth_tag(local: &[AuthTag], offered: &[[u8; 4]]) -> AuthTag {
    select(
        local,
        |a| offered.iter().any(|c| c == a.code()),
        AuthTag::MANDATORY,
    )
}

pub(crate) fn find_best_key_agreement(
    local: &[KeyAgreement],
    offered: &[[u8; 4]],
) -> KeyAgreement {
    select(
        local,
        |a| *a != KeyAgreement::Mult && offered.iter().any(|c| c == a.code()),
        KeyAgreement::MANDATORY,
    )
}

pub(crate) fn find_best_sas_type(local: &[SasType], offered: &[[u8; 4]]) -> SasType {
    select(
        local,
        |a| offered.iter().any(|c| c == a.code()),
        SasType::MANDATORY,
    )
}

/// Full suite selection over a peer's offered lists.
///
/// The key agreement is chosen first; under the non-NIST policy a
/// non-NIST curve then steers hash, cipher and auth tag towards their
/// non-NIST entries where both sides offer them.
pub(crate) fn select_suite(
    policy: SelectionPolicy,
    local_hashes: &[HashAlgorithm],
    local_ciphers: &[CipherAlgorithm],
    local_auth_tags: &[AuthTag],
    local_key_agreements: &[KeyAgreement],
    local_sas_types: &[SasType],
    offered_hashes: &[[u8; 4]],
    offered_ciphers: &[[u8; 4]],
    offered_auth_tags: &[[u8; 4]],
    offered_key_agreements: &[[u8; 4]],
    offered_sas_types: &[[u8; 4]],
) -> NegotiatedSuite {
    let key_agreement = find_best_key_agreement(local_key_agreements, offered_key_agreements);

    let prefer_non_nist = policy == SelectionPolicy::NonNist && key_agreement.is_non_nist();

    let hash = if prefer_non_nist {
        let non_nist: Vec<HashAlgorithm> =
            local_hashes.iter().copied().filter(|h| h.is_non_nist()).collect();
        let picked = select(
            &non_nist,
            |a| offered_hashes.iter().any(|c| c == a.code()),
            HashAlgorithm::MANDATORY,
        );
        if picked.is_non_nist() {
            picked
        } else {
            find_best_hash(local_hashes, offered_hashes)
        }
    } else {
        find_best_hash(local_hashes, offered_hashes)
    };

    let cipher = if prefer_non_nist {
        let non_nist: Vec<CipherAlgorithm> =
            local_ciphers.iter().copied().filter(|c| c.is_non_nist()).collect();
        let picked = select(
            &non_nist,
            |a| offered_ciphers.iter().any(|c| c == a.code()),
            CipherAlgorithm::MANDATORY,
        );
        if picked.is_non_nist() {
            picked
        } else {
            find_best_cipher(local_ciphers, offered_ciphers)
        }
    } else {
        find_best_cipher(local_ciphers, offered_ciphers)
    };

    let auth_tag = if prefer_non_nist {
        let non_nist: Vec<AuthTag> =
            local_auth_tags.iter().copied().filter(|t| t.is_non_nist()).collect();
        let picked = select(
            &non_nist,
            |a| offered_auth_tags.iter().any(|c| c == a.code()),
            AuthTag::MANDATORY,
        );
        if picked.is_non_nist() {
            picked
        } else {
            find_best_auth_tag(local_auth_tags, offered_auth_tags)
        }
    } else {
        find_best_auth_tag(local_auth_tags, offered_auth_tags)
    };

    let sas_type = find_best_sas_type(local_sas_types, offered_sas_types);

    NegotiatedSuite { hash, cipher, auth_tag, key_agreement, sas_type }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_eq_basics() {
        assert!(secure_eq(b"abcd", b"abcd"));
        assert!(!secure_eq(b"abcd", b"abce"));
        assert!(!secure_eq(b"abc", b"abcd"));
    }

    #[test]
    fn selection_uses_local_order() {
        let local = [HashAlgorithm::S384, HashAlgorithm::S256];
        let offered = [*b"S256", *b"S384"];
        assert_eq!(find_best_hash(&local, &offered), HashAlgorithm::S384);
    }

    #[test]
    fn selection_falls_back_to_mandatory() {
        let local = [HashAlgorithm::S256, HashAlgorithm::S384];
        let offered = [*b"XXXX"];
        assert_eq!(find_best_hash(&local, &offered), HashAlgorithm::S256);
        let offered_pk = [*b"Mult"];
        assert_eq!(
            find_best_key_agreement(&[KeyAgreement::Dh3k, KeyAgreement::Ec25], &offered_pk),
            KeyAgreement::Dh3k
        );
    }

    #[test]
    fn non_nist_policy_steers_companions() {
        let suite = select_suite(
            SelectionPolicy::NonNist,
            &[HashAlgorithm::S256, HashAlgorithm::Skn2],
            &[CipherAlgorithm::Aes1, CipherAlgorithm::TwoFish1],
            &[AuthTag::Hs32, AuthTag::Sk32],
            &[KeyAgreement::E255, KeyAgreement::Dh3k],
            &[SasType::B32],
            &[*b"S256", *b"SKN2"],
            &[*b"AES1", *b"2FS1"],
            &[*b"HS32", *b"SK32"],
            &[*b"E255", *b"DH3k"],
            &[*b"B32 "],
        );
        assert_eq!(suite.key_agreement, KeyAgreement::E255);
        assert_eq!(suite.hash, HashAlgorithm::Skn2);
        assert_eq!(suite.cipher, CipherAlgorithm::TwoFish1);
        assert_eq!(suite.auth_tag, AuthTag::Sk32);
    }

    #[test]
    fn standard_policy_ignores_non_nist_steering() {
        let suite = select_suite(
            SelectionPolicy::Standard,
            &[HashAlgorithm::S256, HashAlgorithm::Skn2],
            &[CipherAlgorithm::Aes1, CipherAlgorithm::TwoFish1],
            &[AuthTag::Hs32, AuthTag::Sk32],
            &[KeyAgreement::E255, KeyAgreement::Dh3k],
            &[SasType::B32],
            &[*b"S256", *b"SKN2"],
            &[*b"AES1", *b"2FS1"],
            &[*b"HS32", *b"SK32"],
            &[*b"E255", *b"DH3k"],
            &[*b"B32 "],
        );
        assert_eq!(suite.hash, HashAlgorithm::S256);
        assert_eq!(suite.cipher, CipherAlgorithm::Aes1);
    }
}
