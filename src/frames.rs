/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

//! ZRTP-2022 frame layer. A message larger than one frame is split
//! across frames keyed by a batch id and fragment index; the assembler
//! rebuilds by batch id and throws partial batches away when a new
//! batch shows up or the engine times out.
//!
//! Frame header, one word:
//! `[ length:u16 (words, header included) | batch:u8 | frag:u8 ]`
//! where `frag` carries the continuation bit (0x80) and the fragment
//! index; a frame without the continuation bit is the last of its batch.

use crate::error::ZrtpError;
use crate::proto::{
    FRAME_CONTINUATION, FRAME_HEADER_WORDS, MAX_FRAGMENTS, MAX_FRAME_CONTENT_WORDS,
    ZRTP_WORD_SIZE,
};

/// Split an encoded message (no CRC) into frames, each without CRC.
/// The caller seals each frame for the wire.
pub fn pack(message: &[u8], batch: u8) -> Vec<Vec<u8>> {
    debug_assert!(message.len() % ZRTP_WORD_SIZE == 0);
    let max_content = MAX_FRAME_CONTENT_WORDS * ZRTP_WORD_SIZE;
    let mut frames = Vec::with_capacity(message.len() / max_content + 1);
    let mut remaining = message;
    let mut index = 0u8;
    loop {
        let chunk_len = remaining.len().min(max_content);
        let (chunk, rest) = remaining.split_at(chunk_len);
        let last = rest.is_empty();
        let words = (FRAME_HEADER_WORDS + chunk.len() / ZRTP_WORD_SIZE) as u16;
        let mut frame = Vec::with_capacity(words as usize * ZRTP_WORD_SIZE);
        frame.extend_from_slice(&words.to_be_bytes());
        frame.push(batch);
        frame.push(if last { index } else { FRAME_CONTINUATION | index });
        frame.extend_from_slice(chunk);
        frames.push(frame);
        if last {
            break;
        }
        remaining = rest;
        index += 1;
    }
    frames
}

/// Reassembles one message at a time from inbound frames.
pub struct FrameAssembler {
    batch: u8,
    have: u64,
    total: Option<usize>,
    slots: Vec<Option<Vec<u8>>>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            batch: 0,
            have: 0,
            total: None,
            slots: (0..MAX_FRAGMENTS).map(|_| None).collect(),
        }
    }

    /// Drop any partial batch, for timeouts and state resets.
    pub fn clear(&mut self) {
        self.have = 0;
        self.total = None;
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
    }

    /// Feed one frame (CRC already stripped). Returns the assembled
    /// message once the batch is complete.
    pub fn add(&mut self, frame: &[u8]) -> Result<Option<Vec<u8>>, ZrtpError> {
        if frame.len() < (FRAME_HEADER_WORDS + 1) * ZRTP_WORD_SIZE
            || frame.len() % ZRTP_WORD_SIZE != 0
        {
            return Err(ZrtpError::Malformed);
        }
        let words = u16::from_be_bytes([frame[0], frame[1]]) as usize;
        if words * ZRTP_WORD_SIZE != frame.len() {
            return Err(ZrtpError::LengthMismatch);
        }
        let batch = frame[2];
        let last = frame[3] & FRAME_CONTINUATION == 0;
        let index = (frame[3] & !FRAME_CONTINUATION) as usize;
        if index >= MAX_FRAGMENTS {
            return Err(ZrtpError::Malformed);
        }

        // A new batch id obsoletes whatever was pending.
        if self.have != 0 && batch != self.batch {
            self.clear();
        }
        self.batch = batch;

        let got = 1u64 << index;
        if self.have & got == 0 {
            self.have |= got;
            self.slots[index] = Some(frame[FRAME_HEADER_WORDS * ZRTP_WORD_SIZE..].to_vec());
        }
        if last {
            self.total = Some(index + 1);
        }

        if let Some(total) = self.total {
            if self.have == (1u64 << total) - 1 {
                let mut message = Vec::new();
                for slot in self.slots.iter_mut().take(total) {
                    message.extend_from_slice(slot.as_ref().expect("bitmask says present"));
                    *slot = None;
                }
                self.clear();
                return Ok(Some(message));
            }
        }
        Ok(None)
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(words: usize) -> Vec<u8> {
        (0..words * ZRTP_WORD_SIZE).map(|i| i as u8).collect()
    }

    #[test]
    fn small_message_is_one_frame() {
        let msg = message(10);
        let frames = pack(&msg, 1);
        assert_eq!(frames.len(), 1);
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.add(&frames[0]).unwrap(), Some(msg));
    }

    #[test]
    fn large_message_fragments_and_reassembles() {
        let msg = message(MAX_FRAME_CONTENT_WORDS * 2 + 5);
        let frames = pack(&msg, 3);
        assert_eq!(frames.len(), 3);
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.add(&frames[0]).unwrap(), None);
        assert_eq!(asm.add(&frames[1]).unwrap(), None);
        assert_eq!(asm.add(&frames[2]).unwrap(), Some(msg));
    }

    #[test]
    fn out_of_order_frames_reassemble() {
        let msg = message(MAX_FRAME_CONTENT_WORDS + 8);
        let frames = pack(&msg, 7);
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.add(&frames[1]).unwrap(), None);
        assert_eq!(asm.add(&frames[0]).unwrap(), Some(msg));
    }

    #[test]
    fn duplicate_frames_are_absorbed() {
        let msg = message(MAX_FRAME_CONTENT_WORDS + 1);
        let frames = pack(&msg, 9);
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.add(&frames[0]).unwrap(), None);
        assert_eq!(asm.add(&frames[0]).unwrap(), None);
        assert_eq!(asm.add(&frames[1]).unwrap(), Some(msg));
    }

    #[test]
    fn new_batch_discards_partial() {
        let first = message(MAX_FRAME_CONTENT_WORDS + 1);
        let second = message(6);
        let frames1 = pack(&first, 1);
        let frames2 = pack(&second, 2);
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.add(&frames1[0]).unwrap(), None);
        // frame of a new batch obsoletes batch 1
        assert_eq!(asm.add(&frames2[0]).unwrap(), Some(second));
    }

    #[test]
    fn bogus_frame_is_rejected() {
        let mut asm = FrameAssembler::new();
        assert!(asm.add(&[0u8; 4]).is_err());
        let mut frame = pack(&message(4), 0).remove(0);
        frame[0] ^= 0x40;
        assert!(asm.add(&frame).is_err());
    }
}
