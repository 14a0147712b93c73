/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Negotiated hash dispatch plus the implicit SHA-256 helpers.
//!
//! The implicit hash drives the H0..H3 chain and the truncated message
//! MACs because those exist before negotiation completes. Everything
//! derived after Commit (hvi, total_hash, s0, KDF, retained-secret ids)
//! uses the negotiated hash selected here.

use hmac::{Hmac, Mac};
use sha2::digest::consts::{U32, U48};
use sha2::{Digest, Sha256, Sha384};
use skein::{Skein256, Skein512};

use crate::proto::HASH_IMAGE_SIZE;

type Skein256_32 = Skein256<U32>;
type Skein512_48 = Skein512<U48>;

/// Negotiable hash algorithms, identified by their 4-ASCII wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256, mandatory.
    S256,
    /// SHA-384.
    S384,
    /// Skein-256, the non-NIST companion of S256.
    Skn2,
    /// Skein-384, the non-NIST companion of S384.
    Skn3,
}

impl HashAlgorithm {
    pub const MANDATORY: HashAlgorithm = HashAlgorithm::S256;

    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            HashAlgorithm::S256 => b"S256",
            HashAlgorithm::S384 => b"S384",
            HashAlgorithm::Skn2 => b"SKN2",
            HashAlgorithm::Skn3 => b"SKN3",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"S256" => Some(HashAlgorithm::S256),
            b"S384" => Some(HashAlgorithm::S384),
            b"SKN2" => Some(HashAlgorithm::Skn2),
            b"SKN3" => Some(HashAlgorithm::Skn3),
            _ => None,
        }
    }

    /// Digest length in bytes.
    pub fn length(&self) -> usize {
        match self {
            HashAlgorithm::S256 | HashAlgorithm::Skn2 => 32,
            HashAlgorithm::S384 | HashAlgorithm::Skn3 => 48,
        }
    }

    pub fn is_non_nist(&self) -> bool {
        matches!(self, HashAlgorithm::Skn2 | HashAlgorithm::Skn3)
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        self.digest_list(&[data])
    }

    /// Hash an ordered concatenation of byte slices.
    pub fn digest_list(&self, parts: &[&[u8]]) -> Vec<u8> {
        let mut ctx = HashCtx::new(*self);
        for p in parts {
            ctx.update(p);
        }
        ctx.finalize()
    }

    pub fn hmac(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        self.hmac_list(key, &[data])
    }

    /// HMAC over an ordered concatenation of byte slices.
    pub fn hmac_list(&self, key: &[u8], parts: &[&[u8]]) -> Vec<u8> {
        match self {
            HashAlgorithm::S256 => hmac_parts::<Sha256>(key, parts),
            HashAlgorithm::S384 => hmac_parts::<Sha384>(key, parts),
            HashAlgorithm::Skn2 => hmac_parts::<Skein256_32>(key, parts),
            HashAlgorithm::Skn3 => hmac_parts::<Skein512_48>(key, parts),
        }
    }
}

fn hmac_parts<D>(key: &[u8], parts: &[&[u8]]) -> Vec<u8>
where
    Hmac<D>: Mac + hmac::digest::KeyInit,
    D: Digest + hmac::digest::core_api::CoreProxy,
    D::Core: hmac::digest::HashMarker
        + hmac::digest::core_api::UpdateCore
        + hmac::digest::core_api::FixedOutputCore
        + hmac::digest::core_api::BufferKindUser<BufferKind = hmac::digest::block_buffer::Eager>
        + Default
        + Clone,
    <D::Core as hmac::digest::core_api::BlockSizeUser>::BlockSize:
        hmac::digest::typenum::IsLess<hmac::digest::consts::U256>,
    hmac::digest::typenum::Le<<D::Core as hmac::digest::core_api::BlockSizeUser>::BlockSize, hmac::digest::consts::U256>:
        hmac::digest::typenum::NonZero,
{
    let mut mac = <Hmac<D> as Mac>::new_from_slice(key).expect("hmac accepts keys of any length");
    for p in parts {
        mac.update(p);
    }
    mac.finalize().into_bytes().to_vec()
}

/// Incremental hashing context over the negotiated algorithm, used for
/// the running transcript hash of the negotiation messages.
pub enum HashCtx {
    S256(Sha256),
    S384(Sha384),
    Skn2(Skein256_32),
    Skn3(Skein512_48),
}

impl HashCtx {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::S256 => HashCtx::S256(Sha256::new()),
            HashAlgorithm::S384 => HashCtx::S384(Sha384::new()),
            HashAlgorithm::Skn2 => HashCtx::Skn2(Skein256_32::new()),
            HashAlgorithm::Skn3 => HashCtx::Skn3(Skein512_48::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            HashCtx::S256(c) => c.update(data),
            HashCtx::S384(c) => c.update(data),
            HashCtx::Skn2(c) => c.update(data),
            HashCtx::Skn3(c) => c.update(data),
        }
    }

    pub fn finalize(self) -> Vec<u8> {
        match self {
            HashCtx::S256(c) => c.finalize().to_vec(),
            HashCtx::S384(c) => c.finalize().to_vec(),
            HashCtx::Skn2(c) => c.finalize().to_vec(),
            HashCtx::Skn3(c) => c.finalize().to_vec(),
        }
    }
}

/* Implicit hash (SHA-256) helpers */

/// SHA-256 digest, truncated to the 32-byte hash-image width.
pub fn implicit_digest(data: &[u8]) -> [u8; HASH_IMAGE_SIZE] {
    let mut out = [0u8; HASH_IMAGE_SIZE];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// HMAC-SHA256 over message bytes, keyed with a hash-chain image.
pub fn implicit_hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    hmac_parts::<Sha256>(key, &[data])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for alg in [
            HashAlgorithm::S256,
            HashAlgorithm::S384,
            HashAlgorithm::Skn2,
            HashAlgorithm::Skn3,
        ] {
            assert_eq!(HashAlgorithm::from_code(alg.code()), Some(alg));
            assert_eq!(alg.digest(b"x").len(), alg.length());
        }
    }

    #[test]
    fn digest_list_matches_concatenation() {
        let alg = HashAlgorithm::S256;
        let whole = alg.digest(b"hello world");
        let parts = alg.digest_list(&[b"hello", b" ", b"world"]);
        assert_eq!(whole, parts);
    }

    #[test]
    fn sha256_known_vector() {
        // SHA-256("abc"), FIPS 180-2 appendix B.1.
        let d = implicit_digest(b"abc");
        assert_eq!(
            d[..4],
            [0xba, 0x78, 0x16, 0xbf],
        );
        assert_eq!(d[28..], [0xf2, 0x00, 0x15, 0xad]);
    }

    #[test]
    fn hmac_is_keyed() {
        let alg = HashAlgorithm::S384;
        assert_ne!(alg.hmac(b"key1", b"data"), alg.hmac(b"key2", b"data"));
        assert_eq!(alg.hmac(b"key1", b"data").len(), 48);
    }
}
