/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Symmetric ciphers for the Confirm/SASrelay encrypted block. ZRTP runs
//! the negotiated block cipher in full-block CFB mode with the random IV
//! carried by the message.

use aes::{Aes128, Aes192, Aes256};
use cfb_mode::cipher::KeyIvInit;
use cfb_mode::{Decryptor, Encryptor};
use twofish::Twofish;

use crate::proto::IV_SIZE;

// Twofish defines keys shorter than 256 bits as zero-padded, so one cipher
// type serves all three 2FS key lengths.
const TWOFISH_KEY_SIZE: usize = 32;

/// Negotiable symmetric ciphers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherAlgorithm {
    /// AES with 128-bit key, mandatory.
    Aes1,
    /// AES with 192-bit key.
    Aes2,
    /// AES with 256-bit key.
    Aes3,
    /// Twofish with 128-bit key.
    TwoFish1,
    /// Twofish with 192-bit key.
    TwoFish2,
    /// Twofish with 256-bit key.
    TwoFish3,
}

impl CipherAlgorithm {
    pub const MANDATORY: CipherAlgorithm = CipherAlgorithm::Aes1;

    pub fn code(&self) -> &'static [u8; 4] {
        match self {
            CipherAlgorithm::Aes1 => b"AES1",
            CipherAlgorithm::Aes2 => b"AES2",
            CipherAlgorithm::Aes3 => b"AES3",
            CipherAlgorithm::TwoFish1 => b"2FS1",
            CipherAlgorithm::TwoFish2 => b"2FS2",
            CipherAlgorithm::TwoFish3 => b"2FS3",
        }
    }

    pub fn from_code(code: &[u8]) -> Option<Self> {
        match code {
            b"AES1" => Some(CipherAlgorithm::Aes1),
            b"AES2" => Some(CipherAlgorithm::Aes2),
            b"AES3" => Some(CipherAlgorithm::Aes3),
            b"2FS1" => Some(CipherAlgorithm::TwoFish1),
            b"2FS2" => Some(CipherAlgorithm::TwoFish2),
            b"2FS3" => Some(CipherAlgorithm::TwoFish3),
        _ => None,
        }
    }

    /// Key length in bytes, also the SRTP master key length.
    pub fn key_length(&self) -> usize {
        match self {
            CipherAlgorithm::Aes1 | CipherAlgorithm::TwoFish1 => 16,
            CipherAlgorithm::Aes2 | CipherAlgorithm::TwoFish2 => 24,
            CipherAlgorithm::Aes3 | CipherAlgorithm::TwoFish3 => 32,
        }
    }

    pub fn is_non_nist(&self) -> bool {
        matches!(
            self,
            CipherAlgorithm::TwoFish1 | CipherAlgorithm::TwoFish2 | CipherAlgorithm::TwoFish3
        )
    }

    /// Encrypt `buf` in place. `key` must be `key_length()` bytes.
    pub fn encrypt(&self, key: &[u8], iv: &[u8; IV_SIZE], buf: &mut [u8]) {
        debug_assert_eq!(key.len(), self.key_length());
        match self {
            CipherAlgorithm::Aes1 => cfb_encrypt::<Aes128>(key, iv, buf),
            CipherAlgorithm::Aes2 => cfb_encrypt::<Aes192>(key, iv, buf),
            CipherAlgorithm::Aes3 => cfb_encrypt::<Aes256>(key, iv, buf),
            CipherAlgorithm::TwoFish1 | CipherAlgorithm::TwoFish2 | CipherAlgorithm::TwoFish3 => {
                let mut padded = [0u8; TWOFISH_KEY_SIZE];
                padded[..key.len()].copy_from_slice(key);
                cfb_encrypt::<Twofish>(&padded, iv, buf);
            }
        }
    }

    /// Decrypt `buf` in place. `key` must be `key_length()` bytes.
    pub fn decrypt(&self, key: &[u8], iv: &[u8; IV_SIZE], buf: &mut [u8]) {
        debug_assert_eq!(key.len(), self.key_length());
        match self {
            CipherAlgorithm::Aes1 => cfb_decrypt::<Aes128>(key, iv, buf),
            CipherAlgorithm::Aes2 => cfb_decrypt::<Aes192>(key, iv, buf),
            CipherAlgorithm::Aes3 => cfb_decrypt::<Aes256>(key, iv, buf),
            CipherAlgorithm::TwoFish1 | CipherAlgorithm::TwoFish2 | CipherAlgorithm::TwoFish3 => {
                let mut padded = [0u8; TWOFISH_KEY_SIZE];
                padded[..key.len()].copy_from_slice(key);
                cfb_decrypt::<Twofish>(&padded, iv, buf);
            }
        }
    }
}

fn cfb_encrypt<C>(key: &[u8], iv: &[u8; IV_SIZE], buf: &mut [u8])
where
    C: aes::cipher::BlockCipherEncrypt + aes::cipher::KeyInit,
{
    // Key and IV lengths are fixed by the registry, the unwrap cannot fire.
    let enc: Encryptor<C> = Encryptor::new_from_slices(key, iv).expect("registry key/iv lengths");
    enc.encrypt(buf);
}

fn cfb_decrypt<C>(key: &[u8], iv: &[u8; IV_SIZE], buf: &mut [u8])
where
    C: aes::cipher::BlockCipherEncrypt + aes::cipher::KeyInit,
{
    let dec: Decryptor<C> = Decryptor::new_from_slices(key, iv).expect("registry key/iv lengths");
    dec.decrypt(buf);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip() {
        for alg in [
            CipherAlgorithm::Aes1,
            CipherAlgorithm::Aes2,
            CipherAlgorithm::Aes3,
            CipherAlgorithm::TwoFish1,
            CipherAlgorithm::TwoFish2,
            CipherAlgorithm::TwoFish3,
        ] {
            assert_eq!(CipherAlgorithm::from_code(alg.code()), Some(alg));
        }
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let iv = [7u8; IV_SIZE];
        for alg in [
            CipherAlgorithm::Aes1,
            CipherAlgorithm::Aes3,
            CipherAlgorithm::TwoFish1,
            CipherAlgorithm::TwoFish3,
        ] {
            let key = vec![0x42u8; alg.key_length()];
            let mut buf = b"confirm body with some words....".to_vec();
            let original = buf.clone();
            alg.encrypt(&key, &iv, &mut buf);
            assert_ne!(buf, original);
            alg.decrypt(&key, &iv, &mut buf);
            assert_eq!(buf, original);
        }
    }

    #[test]
    fn cfb_handles_partial_blocks() {
        let alg = CipherAlgorithm::Aes1;
        let key = [1u8; 16];
        let iv = [2u8; IV_SIZE];
        let mut buf = b"nineteen byte input".to_vec();
        let original = buf.clone();
        alg.encrypt(&key, &iv, &mut buf);
        alg.decrypt(&key, &iv, &mut buf);
        assert_eq!(buf, original);
    }
}
