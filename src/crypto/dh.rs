/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Key agreement: RFC 3526 finite-field groups and the EC25/EC38/E255
//! curves. The DH context lives for one negotiation, exposes its public
//! value in ZRTP wire format and computes the shared secret once the
//! peer's value arrives. Public values failing the identity or subgroup
//! checks map to the DHErrorWrongPV wire code.

use num_bigint_dig::BigUint;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::ZrtpErrorCode;

/// RFC 3526 group 14, 2048-bit MODP prime.
const MODP_2048: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

/// RFC 3526 group 15, 3072-bit MODP prime. DH3k is mandatory to implement.
const MODP_3072: &str = "\
FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74\
020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437\
4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED\
EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05\
98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB\
9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B\
E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718\
3995497CEA956AE515D2261898FA051015728E5A8AAAC42DAD33170D04507A33\
A85521ABDF1CBA64ECFB850458DBEF0A8AEA71575D060C7DB3970F85A6E1E4C7\
ABF5AE8CDB0933D71E8C94E04A25619DCEE3D2261AD2EE6BF12FFA06D98A0864\
D87602733EC86A64521F2B18177B200CBBE117577A615D6C770988C0BAD946E2\
08E24FA074E5AB3143DB5BFCE0FD108E4B82D120A93AD2CAFFFFFFFFFFFFFFFF";

/// Private exponent size for the finite-field groups.
const MODP_EXPONENT_SIZE: usize = 64;

/// Negotiable key agreement algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAgreement {
    /// 2048-bit finite field, not recommended anymore but still offered.
    Dh2k,
    /// 3072-bit finite field, mandatory.
    Dh3k,
    /// NIST P-256.
    Ec25,
    /// NIST P-384.
    Ec38,
    /// Curve25519.
    E255,
    /// Multi-stream mode marker, no key agreement of its own.
    Mult,
}

impl KeyAgreement {
    pub const MANDATORY: KeyAgreement = KeyAgreement::Dh3k;

    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            KeyAgreement::Dh2k => b"DH2k",
            KeyAgreement::Dh3k => b"DH3k",
            KeyAgreement::Ec25 => b"EC25",
            KeyAgreement::Ec38 => b"EC38",
            KeyAgreement::E255 => b"E255",
            KeyAgreement::Mult => b"Mult",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"DH2k" => Some(KeyAgreement::Dh2k),
            b"DH3k" => Some(KeyAgreement::Dh3k),
            b"EC25" => Some(KeyAgreement::Ec25),
            b"EC38" => Some(KeyAgreement::Ec38),
            b"E255" => Some(KeyAgreement::E255),
            b"Mult" => Some(KeyAgreement::Mult),
            _ => None,
        }
    }

    /// Length of the public value on the wire.
    pub fn pv_length(&self) -> usize {
        match self {
            KeyAgreement::Dh2k => 256,
            KeyAgreement::Dh3k => 384,
            KeyAgreement::Ec25 => 64,
            KeyAgreement::Ec38 => 96,
            KeyAgreement::E255 => 32,
            KeyAgreement::Mult => 0,
        }
    }

    pub fn is_non_nist(&self) -> bool {
        matches!(self, KeyAgreement::E255)
    }
}

/// One-shot DH context for a single negotiation.
pub enum DhContext {
    Modp {
        group: KeyAgreement,
        prime: BigUint,
        secret: Zeroizing<Vec<u8>>,
        public: Vec<u8>,
    },
    Ec25 {
        secret: p256::ecdh::EphemeralSecret,
        public: Vec<u8>,
    },
    Ec38 {
        secret: p384::ecdh::EphemeralSecret,
        public: Vec<u8>,
    },
    E255 {
        secret: x25519_dalek::StaticSecret,
        public: Vec<u8>,
    },
}

impl DhContext {
    /// Generate an ephemeral key pair for the given algorithm.
    /// `Mult` has no DH context and yields `None`.
    pub fn generate(algorithm: KeyAgreement) -> Option<Self> {
        match algorithm {
            KeyAgreement::Dh2k => Some(Self::generate_modp(algorithm, MODP_2048)),
            KeyAgreement::Dh3k => Some(Self::generate_modp(algorithm, MODP_3072)),
            KeyAgreement::Ec25 => {
                let secret = p256::ecdh::EphemeralSecret::random(&mut OsRng);
                let point = secret.public_key().to_encoded_point(false);
                // wire format is X || Y without the SEC1 tag byte
                let public = point.as_bytes()[1..].to_vec();
                Some(DhContext::Ec25 { secret, public })
            }
            KeyAgreement::Ec38 => {
                let secret = p384::ecdh::EphemeralSecret::random(&mut OsRng);
                let point = secret.public_key().to_encoded_point(false);
                let public = point.as_bytes()[1..].to_vec();
                Some(DhContext::Ec38 { secret, public })
            }
            KeyAgreement::E255 => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret).as_bytes().to_vec();
                Some(DhContext::E255 { secret, public })
            }
            KeyAgreement::Mult => None,
        }
    }

    fn generate_modp(group: KeyAgreement, prime_hex: &str) -> Self {
        let prime = BigUint::parse_bytes(prime_hex.as_bytes(), 16).expect("fixed group prime");
        let mut exponent = Zeroizing::new(vec![0u8; MODP_EXPONENT_SIZE]);
        OsRng.fill_bytes(&mut exponent);
        let x = BigUint::from_bytes_be(&exponent);
        let g = BigUint::from(2u32);
        let public = left_pad(&g.modpow(&x, &prime).to_bytes_be(), group.pv_length());
        DhContext::Modp { group, prime, secret: exponent, public }
    }

    pub fn algorithm(&self) -> KeyAgreement {
        match self {
            DhContext::Modp { group, .. } => *group,
            DhContext::Ec25 { .. } => KeyAgreement::Ec25,
            DhContext::Ec38 { .. } => KeyAgreement::Ec38,
            DhContext::E255 { .. } => KeyAgreement::E255,
        }
    }

    /// Own public value in wire format.
    pub fn public_value(&self) -> &[u8] {
        match self {
            DhContext::Modp { public, .. } => public,
            DhContext::Ec25 { public, .. } => public,
            DhContext::Ec38 { public, .. } => public,
            DhContext::E255 { public, .. } => public,
        }
    }

    /// Run the agreement against the peer's public value.
    ///
    /// Returns the shared secret: the X coordinate for the elliptic
    /// curves (big endian, zero-stripped to algorithm length), the raw
    /// 32 bytes for Curve25519, the shared integer for the MODP groups.
    pub fn agree(&self, peer_pv: &[u8]) -> Result<Zeroizing<Vec<u8>>, ZrtpErrorCode> {
        if peer_pv.len() != self.algorithm().pv_length() {
            return Err(ZrtpErrorCode::DhErrorWrongPv);
        }
        match self {
            DhContext::Modp { prime, secret, .. } => {
                let pv = BigUint::from_bytes_be(peer_pv);
                let one = BigUint::from(1u32);
                // reject the identity and the order-2 element
                if pv <= one || pv >= prime - &one {
                    return Err(ZrtpErrorCode::DhErrorWrongPv);
                }
                let x = BigUint::from_bytes_be(secret);
                let shared = pv.modpow(&x, prime);
                Ok(Zeroizing::new(left_pad(
                    &shared.to_bytes_be(),
                    self.algorithm().pv_length(),
                )))
            }
            DhContext::Ec25 { secret, .. } => {
                let pk = decode_p256(peer_pv)?;
                let shared = secret.diffie_hellman(&pk);
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            DhContext::Ec38 { secret, .. } => {
                let pk = decode_p384(peer_pv)?;
                let shared = secret.diffie_hellman(&pk);
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            DhContext::E255 { secret, .. } => {
                let mut pv = [0u8; 32];
                pv.copy_from_slice(peer_pv);
                let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(pv));
                if !shared.was_contributory() {
                    return Err(ZrtpErrorCode::DhErrorWrongPv);
                }
                Ok(Zeroizing::new(shared.as_bytes().to_vec()))
            }
        }
    }
}

// SEC1 parsing rejects off-curve points and the identity, which covers
// the DH public value checks the wire error code asks for.
fn decode_p256(pv: &[u8]) -> Result<p256::PublicKey, ZrtpErrorCode> {
    let mut sec1 = Vec::with_capacity(1 + pv.len());
    sec1.push(0x04);
    sec1.extend_from_slice(pv);
    p256::PublicKey::from_sec1_bytes(&sec1).map_err(|_| ZrtpErrorCode::DhErrorWrongPv)
}

fn decode_p384(pv: &[u8]) -> Result<p384::PublicKey, ZrtpErrorCode> {
    let mut sec1 = Vec::with_capacity(1 + pv.len());
    sec1.push(0x04);
    sec1.extend_from_slice(pv);
    p384::PublicKey::from_sec1_bytes(&sec1).map_err(|_| ZrtpErrorCode::DhErrorWrongPv)
}

fn left_pad(bytes: &[u8], width: usize) -> Vec<u8> {
    if bytes.len() >= width {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; width - bytes.len()];
    out.extend_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agree_both(alg: KeyAgreement) {
        let a = DhContext::generate(alg).unwrap();
        let b = DhContext::generate(alg).unwrap();
        let s1 = a.agree(b.public_value()).unwrap();
        let s2 = b.agree(a.public_value()).unwrap();
        assert_eq!(&*s1, &*s2);
        assert!(!s1.iter().all(|&b| b == 0));
    }

    #[test]
    fn ec25_agreement() {
        agree_both(KeyAgreement::Ec25);
    }

    #[test]
    fn ec38_agreement() {
        agree_both(KeyAgreement::Ec38);
    }

    #[test]
    fn e255_agreement() {
        agree_both(KeyAgreement::E255);
    }

    #[test]
    fn dh3k_agreement() {
        agree_both(KeyAgreement::Dh3k);
    }

    #[test]
    fn modp_rejects_degenerate_values() {
        let ctx = DhContext::generate(KeyAgreement::Dh3k).unwrap();
        let one = left_pad(&[1], 384);
        assert!(matches!(ctx.agree(&one), Err(ZrtpErrorCode::DhErrorWrongPv)));
        let zero = vec![0u8; 384];
        assert!(matches!(ctx.agree(&zero), Err(ZrtpErrorCode::DhErrorWrongPv)));
    }

    #[test]
    fn wrong_length_pv_is_rejected() {
        let ctx = DhContext::generate(KeyAgreement::Ec25).unwrap();
        assert!(matches!(ctx.agree(&[0u8; 63]), Err(ZrtpErrorCode::DhErrorWrongPv)));
    }
}
