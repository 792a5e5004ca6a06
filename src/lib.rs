// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Per-frame link-layer encryption for IEEE 802.11 data and management
//! frames.
//!
//! Two ciphers are implemented: CCMP (IEEE Std 802.11-2007, 8.3.3; AES in
//! CCM mode with M=8, L=2 per RFC 3610) and TKIP (8.3.2; RC4 with per-frame
//! key mixing, the Michael MIC and a WEP-style CRC-32 ICV). Frames are
//! consumed and produced as segmented buffer chains so the cipher loops can
//! run over non-contiguous receive descriptors without reassembly.
//!
//! Each installed [`key::Key`] owns its cipher schedule, a 48-bit transmit
//! counter and per-TID receive counters. TKIP Michael MIC failures feed the
//! countermeasures state machine in [`countermeasures`].

pub mod buffer;
pub mod ccmp;
pub mod countermeasures;
pub mod crc32;
pub mod key;
pub mod mac;
pub mod michael;
pub mod test_utils;
pub mod tkip;

pub use {
    countermeasures::{Iface, MlmeActions, OpMode},
    key::{CipherType, Error, Key},
};

// IEEE Std 802.11-2007, 8.3.3.2
pub const CCMP_HDR_LEN: usize = 8;
pub const CCMP_MIC_LEN: usize = 8;

// IEEE Std 802.11-2007, 8.3.2.2
pub const TKIP_HDR_LEN: usize = 8;
pub const TKIP_MIC_LEN: usize = 8;
pub const WEP_CRC_LEN: usize = 4;
pub const TKIP_TAIL_LEN: usize = TKIP_MIC_LEN + WEP_CRC_LEN;
pub const TKIP_OVERHEAD: usize = TKIP_HDR_LEN + TKIP_TAIL_LEN;

/// ExtIV flag in octet 3 of the CCMP/TKIP header, indicating the 48-bit
/// extended IV format.
pub const EXT_IV: u8 = 0x20;
