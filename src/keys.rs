/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Key schedule: hash chain, retained-secret identifiers, s0, the ZRTP
//! KDF and everything derived from it. All outputs live in zeroizing
//! buffers owned by the session.

use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::crypto::cipher::CipherAlgorithm;
use crate::crypto::hash::{implicit_digest, HashAlgorithm};
use crate::crypto::AuthTag;
use crate::proto::*;

/// Which role this endpoint plays in the current negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    NoRole,
    Initiator,
    Responder,
}

/// Matched-secret bits for the detail info surface.
pub const SECRET_RS1: u32 = 1;
pub const SECRET_RS2: u32 = 2;
pub const SECRET_PBX: u32 = 4;
pub const SECRET_AUX: u32 = 8;

/// The H0..H3 pre-image chain. H0 is random; each following image is
/// the SHA-256 of its predecessor, stored truncated to 32 bytes.
pub struct HashChain {
    pub h0: Zeroizing<[u8; HASH_IMAGE_SIZE]>,
    pub h1: [u8; HASH_IMAGE_SIZE],
    pub h2: [u8; HASH_IMAGE_SIZE],
    pub h3: [u8; HASH_IMAGE_SIZE],
}

impl HashChain {
    pub fn generate() -> Self {
        let mut h0 = Zeroizing::new([0u8; HASH_IMAGE_SIZE]);
        OsRng.fill_bytes(&mut *h0);
        Self::from_h0(h0)
    }

    pub fn from_h0(h0: Zeroizing<[u8; HASH_IMAGE_SIZE]>) -> Self {
        let h1 = implicit_digest(&*h0);
        let h2 = implicit_digest(&h1);
        let h3 = implicit_digest(&h2);
        HashChain { h0, h1, h2, h3 }
    }
}

/// Verify one link of a peer's chain: `hash(lower)` must equal the
/// previously received `upper` image.
pub fn verify_chain_link(lower: &[u8], upper: &[u8; HASH_IMAGE_SIZE]) -> bool {
    let mut lower32 = [0u8; HASH_IMAGE_SIZE];
    lower32.copy_from_slice(&lower[..HASH_IMAGE_SIZE]);
    crate::crypto::secure_eq(&implicit_digest(&lower32), upper)
}

/// Compute both role-keyed identifiers of a retained secret:
/// `HMAC(secret, "Initiator")` and `HMAC(secret, "Responder")`,
/// truncated to 8 bytes each.
pub fn secret_ids(hash: HashAlgorithm, secret: &[u8]) -> ([u8; RS_ID_SIZE], [u8; RS_ID_SIZE]) {
    let mut id_i = [0u8; RS_ID_SIZE];
    let mut id_r = [0u8; RS_ID_SIZE];
    id_i.copy_from_slice(&hash.hmac(secret, LABEL_ROLE_INITIATOR)[..RS_ID_SIZE]);
    id_r.copy_from_slice(&hash.hmac(secret, LABEL_ROLE_RESPONDER)[..RS_ID_SIZE]);
    (id_i, id_r)
}

/// The ZRTP KDF (RFC 6189 section 4.5.1):
/// `KDF(KI, Label, Context, L) = HMAC(KI, 0x00000001 || Label || 0x00 || Context || L)`
/// truncated to `length` bytes.
pub fn kdf(
    hash: HashAlgorithm,
    ki: &[u8],
    label: &[u8],
    context: &[u8],
    length: usize,
) -> Zeroizing<Vec<u8>> {
    let l_bits = ((length * 8) as u32).to_be_bytes();
    let counter = 1u32.to_be_bytes();
    let mut out = hash.hmac_list(ki, &[&counter, label, &[0u8], context, &l_bits]);
    out.truncate(length);
    Zeroizing::new(out)
}

/// s0 for a DH exchange (RFC 6189 section 4.4.1.4):
/// the negotiated hash over counter, DHss, the KDF string, both ZIDs,
/// the total hash and the three length-prefixed matched secrets.
/// Absent secrets contribute a zero length and no bytes.
pub fn compute_s0_dh(
    hash: HashAlgorithm,
    dhss: &[u8],
    zid_i: &[u8; ZID_SIZE],
    zid_r: &[u8; ZID_SIZE],
    total_hash: &[u8],
    s1: Option<&[u8]>,
    s2: Option<&[u8]>,
    s3: Option<&[u8]>,
) -> Zeroizing<Vec<u8>> {
    let counter = 1u32.to_be_bytes();
    let mut parts: Vec<&[u8]> = vec![&counter, dhss, LABEL_KDF, zid_i, zid_r, total_hash];
    let lengths: Vec<[u8; 4]> = [s1, s2, s3]
        .iter()
        .map(|s| (s.map_or(0, |s| s.len()) as u32).to_be_bytes())
        .collect();
    for (len, secret) in lengths.iter().zip([s1, s2, s3]) {
        parts.push(len);
        if let Some(secret) = secret {
            parts.push(secret);
        }
    }
    Zeroizing::new(hash.digest_list(&parts))
}

/// s0 for a multi-stream session: KDF over the master's session key.
pub fn compute_s0_multi(
    hash: HashAlgorithm,
    master_session_key: &[u8],
    context: &[u8],
) -> Zeroizing<Vec<u8>> {
    kdf(hash, master_session_key, LABEL_MSK, context, hash.length())
}

/// Everything the KDF derives from s0 for one stream.
pub struct KeyMaterial {
    pub s0: Zeroizing<Vec<u8>>,
    pub zrtp_session: Zeroizing<Vec<u8>>,
    pub exported_key: Zeroizing<Vec<u8>>,
    pub sas_hash: Zeroizing<Vec<u8>>,
    pub new_rs1: Zeroizing<Vec<u8>>,
    pub hmac_key_i: Zeroizing<Vec<u8>>,
    pub hmac_key_r: Zeroizing<Vec<u8>>,
    pub zrtp_key_i: Zeroizing<Vec<u8>>,
    pub zrtp_key_r: Zeroizing<Vec<u8>>,
    pub srtp_key_i: Zeroizing<Vec<u8>>,
    pub srtp_salt_i: Zeroizing<Vec<u8>>,
    pub srtp_key_r: Zeroizing<Vec<u8>>,
    pub srtp_salt_r: Zeroizing<Vec<u8>>,
}

impl KeyMaterial {
    /// Run the full derivation with `Context = ZIDi || ZIDr || total_hash`.
    ///
    /// `derive_continuity` is false for multi-stream sessions, which
    /// produce neither a new retained secret nor a session key of their
    /// own (they borrow the master's).
    pub fn derive(
        hash: HashAlgorithm,
        cipher: CipherAlgorithm,
        s0: Zeroizing<Vec<u8>>,
        context: &[u8],
        derive_continuity: bool,
    ) -> KeyMaterial {
        let hlen = hash.length();
        let klen = cipher.key_length();
        let d = |label: &[u8], len: usize| kdf(hash, &s0, label, context, len);

        let zrtp_session = if derive_continuity {
            d(LABEL_SESSION_KEY, hlen)
        } else {
            Zeroizing::new(Vec::new())
        };
        let new_rs1 = if derive_continuity {
            d(LABEL_RETAINED_SECRET, hlen)
        } else {
            Zeroizing::new(Vec::new())
        };
        let exported_key = d(LABEL_EXPORTED_KEY, hlen);
        let sas_hash = d(LABEL_SAS, hlen);
        let hmac_key_i = d(LABEL_INI_HMAC_KEY, hlen);
        let hmac_key_r = d(LABEL_RESP_HMAC_KEY, hlen);
        let zrtp_key_i = d(LABEL_INI_ZRTP_KEY, klen);
        let zrtp_key_r = d(LABEL_RESP_ZRTP_KEY, klen);
        let srtp_key_i = d(LABEL_INI_SRTP_KEY, klen);
        let srtp_salt_i = d(LABEL_INI_SRTP_SALT, SRTP_SALT_SIZE);
        let srtp_key_r = d(LABEL_RESP_SRTP_KEY, klen);
        let srtp_salt_r = d(LABEL_RESP_SRTP_SALT, SRTP_SALT_SIZE);

        KeyMaterial {
            s0,
            zrtp_session,
            exported_key,
            sas_hash,
            new_rs1,
            hmac_key_i,
            hmac_key_r,
            zrtp_key_i,
            zrtp_key_r,
            srtp_key_i,
            srtp_salt_i,
            srtp_key_r,
            srtp_salt_r,
        }
    }

    /// Leftmost 32 bits of the SAS hash, input to the SAS rendering.
    pub fn sas_value(&self) -> [u8; 4] {
        let mut v = [0u8; 4];
        v.copy_from_slice(&self.sas_hash[..4]);
        v
    }
}

/// The PBX trusted-MitM secret, derived from the ZRTP session key with
/// `Context = ZIDi || ZIDr` (no total hash, RFC 6189 section 7.3.1).
pub fn compute_pbx_secret(
    hash: HashAlgorithm,
    zrtp_session: &[u8],
    zid_i: &[u8; ZID_SIZE],
    zid_r: &[u8; ZID_SIZE],
) -> Zeroizing<Vec<u8>> {
    let mut context = Vec::with_capacity(2 * ZID_SIZE);
    context.extend_from_slice(zid_i);
    context.extend_from_slice(zid_r);
    kdf(hash, zrtp_session, LABEL_TRUSTED_MITM, &context, RS_SIZE)
}

/// SRTP key material handed to the host, one direction at a time.
pub struct SrtpSecrets {
    pub cipher: CipherAlgorithm,
    pub auth_tag: AuthTag,
    pub key_initiator: Zeroizing<Vec<u8>>,
    pub salt_initiator: Zeroizing<Vec<u8>>,
    pub key_responder: Zeroizing<Vec<u8>>,
    pub salt_responder: Zeroizing<Vec<u8>>,
    pub role: Role,
    pub sas: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_chain_links_verify() {
        let chain = HashChain::generate();
        assert!(verify_chain_link(&*chain.h0, &chain.h1));
        assert!(verify_chain_link(&chain.h1, &chain.h2));
        assert!(verify_chain_link(&chain.h2, &chain.h3));
        assert!(!verify_chain_link(&chain.h0[..], &chain.h3));
    }

    #[test]
    fn kdf_truncates_to_requested_length() {
        let out = kdf(HashAlgorithm::S256, b"key", b"label", b"ctx", 16);
        assert_eq!(out.len(), 16);
        let full = kdf(HashAlgorithm::S256, b"key", b"label", b"ctx", 32);
        // truncation is a prefix, L is part of the MAC input so the
        // two outputs differ beyond the cut
        assert_ne!(&full[..16], &out[..]);
    }

    #[test]
    fn kdf_separates_labels() {
        let a = kdf(HashAlgorithm::S256, b"key", LABEL_INI_HMAC_KEY, b"ctx", 32);
        let b = kdf(HashAlgorithm::S256, b"key", LABEL_RESP_HMAC_KEY, b"ctx", 32);
        assert_ne!(&a[..], &b[..]);
    }

    #[test]
    fn secret_ids_differ_by_role() {
        let (id_i, id_r) = secret_ids(HashAlgorithm::S256, &[0x11; 32]);
        assert_ne!(id_i, id_r);
    }

    #[test]
    fn s0_depends_on_matched_secrets() {
        let zid_i = [1u8; ZID_SIZE];
        let zid_r = [2u8; ZID_SIZE];
        let th = [3u8; 32];
        let dhss = [4u8; 384];
        let without =
            compute_s0_dh(HashAlgorithm::S256, &dhss, &zid_i, &zid_r, &th, None, None, None);
        let rs1 = [5u8; 32];
        let with = compute_s0_dh(
            HashAlgorithm::S256,
            &dhss,
            &zid_i,
            &zid_r,
            &th,
            Some(&rs1),
            None,
            None,
        );
        assert_ne!(&without[..], &with[..]);
    }

    #[test]
    fn both_roles_derive_identical_material() {
        let s0 = Zeroizing::new(vec![9u8; 32]);
        let ctx = b"context bytes".to_vec();
        let a = KeyMaterial::derive(
            HashAlgorithm::S256,
            CipherAlgorithm::Aes1,
            s0.clone(),
            &ctx,
            true,
        );
        let b = KeyMaterial::derive(
            HashAlgorithm::S256,
            CipherAlgorithm::Aes1,
            s0,
            &ctx,
            true,
        );
        assert_eq!(&a.srtp_key_i[..], &b.srtp_key_i[..]);
        assert_eq!(&a.srtp_salt_r[..], &b.srtp_salt_r[..]);
        assert_eq!(&a.sas_hash[..], &b.sas_hash[..]);
        assert_eq!(a.srtp_key_i.len(), 16);
        assert_eq!(a.srtp_salt_i.len(), SRTP_SALT_SIZE);
    }

    #[test]
    fn multi_stream_material_skips_continuity() {
        let s0 = compute_s0_multi(HashAlgorithm::S256, &[7u8; 32], b"ms-context");
        let km = KeyMaterial::derive(
            HashAlgorithm::S256,
            CipherAlgorithm::Aes1,
            s0,
            b"ms-context",
            false,
        );
        assert!(km.zrtp_session.is_empty());
        assert!(km.new_rs1.is_empty());
        assert!(!km.srtp_key_i.is_empty());
    }
}
