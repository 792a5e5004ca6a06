// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Just enough 802.11 MAC header inspection for the cipher engines: header
//! length, QoS/4-address/HT-control detection and the address selections
//! the CCMP AAD and Michael pseudo-header need.

use {
    bitfield::bitfield,
    byteorder::{ByteOrder, LittleEndian},
    std::mem,
    zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned},
};

pub type MacAddr = [u8; 6];

// IEEE Std 802.11-2007, 7.1.3.1: raw frame control octet masks, used where
// the AAD construction manipulates header bytes directly.
pub const FC0_TYPE_MASK: u8 = 0x0C;
pub const FC0_TYPE_MGMT: u8 = 0x00;
pub const FC0_TYPE_DATA: u8 = 0x08;
pub const FC0_SUBTYPE_MASK: u8 = 0xF0;
pub const FC1_RETRY: u8 = 0x08;
pub const FC1_PWR_MGT: u8 = 0x10;
pub const FC1_MORE_DATA: u8 = 0x20;
pub const FC1_PROTECTED: u8 = 0x40;
pub const FC1_ORDER: u8 = 0x80;

// IEEE Std 802.11-2007, 7.1.3.5
pub const QOS_TID_MASK: u16 = 0x000F;

pub const FRAME_TYPE_MGMT: u16 = 0;
pub const FRAME_TYPE_DATA: u16 = 2;

// Subtype bit 3 marks the QoS variants of the data subtypes.
const SUBTYPE_QOS_BIT: u16 = 0b1000;

// IEEE Std 802.11-2007, 7.1.3.1
bitfield! {
    #[derive(Clone, Copy, PartialEq)]
    pub struct FrameControl(u16);
    impl Debug;

    pub protocol_version, set_protocol_version: 1, 0;
    pub frame_type, set_frame_type: 3, 2;
    pub frame_subtype, set_frame_subtype: 7, 4;
    pub to_ds, set_to_ds: 8;
    pub from_ds, set_from_ds: 9;
    pub more_frag, set_more_frag: 10;
    pub retry, set_retry: 11;
    pub pwr_mgmt, set_pwr_mgmt: 12;
    pub more_data, set_more_data: 13;
    pub protected, set_protected: 14;
    pub htc_order, set_htc_order: 15;

    pub value, _: 15, 0;
}

/// Fixed portion of the 802.11 MAC header (IEEE Std 802.11-2007, 7.1.2).
/// All fields are byte arrays: the header has no alignment guarantee inside
/// a receive buffer and is little-endian on the wire regardless of host.
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy)]
#[repr(C, packed)]
pub struct FrameHdr {
    pub frame_ctrl: [u8; 2],
    pub duration: [u8; 2],
    pub addr1: MacAddr,
    pub addr2: MacAddr,
    pub addr3: MacAddr,
    pub seq_ctrl: [u8; 2],
}

pub const FIXED_HDR_LEN: usize = mem::size_of::<FrameHdr>();
pub const ADDR4_LEN: usize = 6;
pub const QOS_CTRL_LEN: usize = 2;
pub const HT_CTRL_LEN: usize = 4;
pub const MAX_HDR_LEN: usize = FIXED_HDR_LEN + ADDR4_LEN + QOS_CTRL_LEN + HT_CTRL_LEN;

/// Borrowed view of a MAC header and its optional fields. The header must
/// be contiguous at the front of the passed slice; the frame body may be
/// segmented arbitrarily.
pub struct MacHeader<'a> {
    bytes: &'a [u8],
    fixed: LayoutVerified<&'a [u8], FrameHdr>,
    fc: FrameControl,
    addr4: Option<MacAddr>,
    qos_ctrl: Option<u16>,
    htc: bool,
    hdr_len: usize,
}

impl<'a> MacHeader<'a> {
    pub fn parse(bytes: &'a [u8]) -> Option<Self> {
        let (fixed, _) = LayoutVerified::<&[u8], FrameHdr>::new_from_prefix(bytes)?;
        let fc = FrameControl(LittleEndian::read_u16(&fixed.frame_ctrl));
        let mut hdr_len = FIXED_HDR_LEN;

        let addr4 = if fc.to_ds() && fc.from_ds() {
            let mut addr = [0u8; ADDR4_LEN];
            addr.copy_from_slice(bytes.get(hdr_len..hdr_len + ADDR4_LEN)?);
            hdr_len += ADDR4_LEN;
            Some(addr)
        } else {
            None
        };

        let has_qos =
            fc.frame_type() == FRAME_TYPE_DATA && fc.frame_subtype() & SUBTYPE_QOS_BIT != 0;
        let qos_ctrl = if has_qos {
            let raw = bytes.get(hdr_len..hdr_len + QOS_CTRL_LEN)?;
            hdr_len += QOS_CTRL_LEN;
            Some(LittleEndian::read_u16(raw))
        } else {
            None
        };

        // IEEE Std 802.11-2007, 7.1.3.1.10: the order bit signals an HT
        // control field only in QoS data and management frames.
        let htc = fc.htc_order() && (has_qos || fc.frame_type() == FRAME_TYPE_MGMT);
        if htc {
            bytes.get(hdr_len..hdr_len + HT_CTRL_LEN)?;
            hdr_len += HT_CTRL_LEN;
        }

        Some(MacHeader { bytes, fixed, fc, addr4, qos_ctrl, htc, hdr_len })
    }

    pub fn hdr_len(&self) -> usize {
        self.hdr_len
    }

    pub fn fc(&self) -> FrameControl {
        self.fc
    }

    pub fn fc0(&self) -> u8 {
        self.fixed.frame_ctrl[0]
    }

    pub fn fc1(&self) -> u8 {
        self.fixed.frame_ctrl[1]
    }

    pub fn addr1(&self) -> MacAddr {
        self.fixed.addr1
    }

    pub fn addr2(&self) -> MacAddr {
        self.fixed.addr2
    }

    pub fn addr3(&self) -> MacAddr {
        self.fixed.addr3
    }

    pub fn addr4(&self) -> Option<MacAddr> {
        self.addr4
    }

    /// Fragment-number octet of the sequence control field.
    pub fn seq_ctrl_lo(&self) -> u8 {
        self.fixed.seq_ctrl[0]
    }

    pub fn is_data(&self) -> bool {
        self.fc.frame_type() == FRAME_TYPE_DATA
    }

    pub fn is_mgmt(&self) -> bool {
        self.fc.frame_type() == FRAME_TYPE_MGMT
    }

    pub fn has_qos(&self) -> bool {
        self.qos_ctrl.is_some()
    }

    pub fn has_addr4(&self) -> bool {
        self.addr4.is_some()
    }

    pub fn has_htc(&self) -> bool {
        self.htc
    }

    pub fn qos_ctrl(&self) -> Option<u16> {
        self.qos_ctrl
    }

    /// Traffic identifier; 0 for frames without a QoS control field.
    pub fn tid(&self) -> u8 {
        self.qos_ctrl.map_or(0, |qos| (qos & QOS_TID_MASK) as u8)
    }

    /// DA/SA pair for the Michael MIC pseudo-header, selected by the DS
    /// bits (IEEE Std 802.11-2007, 8.3.2.3.1).
    pub fn michael_peers(&self) -> Option<(MacAddr, MacAddr)> {
        Some(match (self.fc.to_ds(), self.fc.from_ds()) {
            (false, false) => (self.addr1(), self.addr2()),
            (true, false) => (self.addr3(), self.addr2()),
            (false, true) => (self.addr1(), self.addr3()),
            (true, true) => (self.addr3(), self.addr4?),
        })
    }

    /// The underlying slice the header was parsed from.
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}
