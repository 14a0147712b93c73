/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! Trailing message checksum. ZRTP closes every message with a 4-byte
//! CRC-32 (polynomial 0xEDB88320, reflected) over the message bytes.

use crate::proto::CRC_SIZE;

/// Compute the CRC over `data` and return it as the 4 bytes to append.
pub fn compute(data: &[u8]) -> [u8; CRC_SIZE] {
    crc32fast::hash(data).to_be_bytes()
}

/// Append the CRC to an encoded message in place.
pub fn append(message: &mut Vec<u8>) {
    let crc = compute(message);
    message.extend_from_slice(&crc);
}

/// Check a message that carries its CRC in the last four bytes.
///
/// Verification on inbound traffic is the host's responsibility; this is
/// the helper it is expected to use before handing bytes to the session.
pub fn verify(message_with_crc: &[u8]) -> bool {
    if message_with_crc.len() <= CRC_SIZE {
        return false;
    }
    let (body, crc) = message_with_crc.split_at(message_with_crc.len() - CRC_SIZE);
    compute(body) == crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc_roundtrip() {
        let mut msg = b"Hello   test message".to_vec();
        append(&mut msg);
        assert!(verify(&msg));
    }

    #[test]
    fn crc_detects_flip() {
        let mut msg = b"Commit  data".to_vec();
        append(&mut msg);
        msg[3] ^= 0x01;
        assert!(!verify(&msg));
    }

    #[test]
    fn crc_rejects_short_input() {
        assert!(!verify(&[0u8; 4]));
        assert!(!verify(&[]));
    }
}
