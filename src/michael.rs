// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The Michael message integrity code (IEEE Std 802.11-2007, 8.3.2.3):
//! a 64-bit keyed MAC over 32-bit little-endian words, deliberately cheap
//! enough for the access points TKIP was retrofitted onto.

use byteorder::{ByteOrder, LittleEndian};

pub struct Michael {
    l: u32,
    r: u32,
    word: [u8; 4],
    pending: usize,
}

impl Michael {
    pub fn new(key: &[u8; 8]) -> Self {
        Michael {
            l: LittleEndian::read_u32(&key[..4]),
            r: LittleEndian::read_u32(&key[4..]),
            word: [0; 4],
            pending: 0,
        }
    }

    pub fn update(&mut self, mut data: &[u8]) {
        if self.pending > 0 {
            while self.pending < 4 && !data.is_empty() {
                self.word[self.pending] = data[0];
                self.pending += 1;
                data = &data[1..];
            }
            if self.pending < 4 {
                return;
            }
            self.block(LittleEndian::read_u32(&self.word));
            self.pending = 0;
        }
        while data.len() >= 4 {
            self.block(LittleEndian::read_u32(&data[..4]));
            data = &data[4..];
        }
        self.word[..data.len()].copy_from_slice(data);
        self.pending = data.len();
    }

    pub fn finalize(mut self) -> [u8; 8] {
        // IEEE Std 802.11-2007, 8.3.2.3.3: pad with 0x5a and zeros, then
        // run one more zero word through the block function.
        let mut last = [0u8; 4];
        last[..self.pending].copy_from_slice(&self.word[..self.pending]);
        last[self.pending] = 0x5a;
        self.block(LittleEndian::read_u32(&last));
        self.block(0);

        let mut mic = [0u8; 8];
        LittleEndian::write_u32(&mut mic[..4], self.l);
        LittleEndian::write_u32(&mut mic[4..], self.r);
        mic
    }

    fn block(&mut self, word: u32) {
        self.l ^= word;
        self.r ^= self.l.rotate_left(17);
        self.l = self.l.wrapping_add(self.r);
        self.r ^= xswap(self.l);
        self.l = self.l.wrapping_add(self.r);
        self.r ^= self.l.rotate_left(3);
        self.l = self.l.wrapping_add(self.r);
        self.r ^= self.l.rotate_right(2);
        self.l = self.l.wrapping_add(self.r);
    }
}

fn xswap(v: u32) -> u32 {
    ((v & 0xFF00_FF00) >> 8) | ((v & 0x00FF_00FF) << 8)
}
