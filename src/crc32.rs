// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-reflected Ethernet CRC-32, the WEP/TKIP integrity check value.
//! Seed with `!0`, fold data in with [`update`], complement the result.

const POLY: u32 = 0xEDB8_8320;

pub fn update(mut crc: u32, data: &[u8]) -> u32 {
    for &byte in data {
        crc ^= u32::from(byte);
        for _ in 0..8 {
            let carry = crc & 1;
            crc >>= 1;
            if carry != 0 {
                crc ^= POLY;
            }
        }
    }
    crc
}
