// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CCMP: AES in CCM mode over 802.11 frames (IEEE Std 802.11-2007, 8.3.3),
//! with the CCM parameters fixed at M=8, L=2 (RFC 3610).
//!
//! The counter-mode keystream and the CBC-MAC run in lockstep over the
//! frame body, one pass, so the engine can stream across segmented buffers
//! without ever materializing a contiguous copy.

use {
    crate::{
        buffer::{BufferChain, BufferPool, ChainReader, ChainWriter},
        mac::{self, MacHeader, MAX_HDR_LEN},
        CCMP_HDR_LEN, CCMP_MIC_LEN, EXT_IV,
    },
    byteorder::{BigEndian, ByteOrder},
    crypto::{aessafe::AesSafe128Encryptor, symmetriccipher::BlockEncryptor},
    subtle::ConstantTimeEq,
};

/// Software CCMP context: the AES-128 encryption-only key schedule, derived
/// once at key installation.
pub(crate) struct CcmpCtx {
    cipher: AesSafe128Encryptor,
}

pub(crate) fn init_ctx(tk: &[u8; 32]) -> CcmpCtx {
    CcmpCtx { cipher: AesSafe128Encryptor::new(&tk[..16]) }
}

// IEEE Std 802.11-2007, 8.3.3.2: the 8-octet CCMP header following the
// 802.11 header.
fn ccmp_header(pn: u64, key_id: u8) -> [u8; CCMP_HDR_LEN] {
    [
        pn as u8,
        (pn >> 8) as u8,
        0, // reserved
        key_id << 6 | EXT_IV,
        (pn >> 16) as u8,
        (pn >> 24) as u8,
        (pn >> 32) as u8,
        (pn >> 40) as u8,
    ]
}

// IEEE Std 802.11-2007, 8.3.3.3.3: TID (with the 11w management bit),
// transmitter address and the packet number, big-endian.
fn build_nonce(hdr: &MacHeader<'_>, pn: u64) -> [u8; 13] {
    let mut nonce = [0u8; 13];
    nonce[0] = hdr.tid();
    if hdr.is_mgmt() {
        nonce[0] |= 1 << 4;
    }
    nonce[1..7].copy_from_slice(&hdr.addr2());
    for i in 0..6 {
        nonce[7 + i] = (pn >> (40 - 8 * i)) as u8;
    }
    nonce
}

// IEEE Std 802.11-2007, 8.3.3.3.2: header fields authenticated but not
// encrypted. Mutable fields are masked; the sequence number is not
// authenticated at all.
fn build_aad(hdr: &MacHeader<'_>) -> ([u8; 30], usize) {
    let mut aad = [0u8; 30];

    let mut fc0 = hdr.fc0();
    if hdr.is_data() {
        // 11w: mask the subtype field
        fc0 &= !mac::FC0_SUBTYPE_MASK;
    }
    aad[0] = fc0;

    let mut fc1 = hdr.fc1() & !(mac::FC1_RETRY | mac::FC1_PWR_MGT | mac::FC1_MORE_DATA);
    if hdr.has_htc() {
        // 11n: mask the order bit
        fc1 &= !mac::FC1_ORDER;
    }
    aad[1] = fc1;

    aad[2..8].copy_from_slice(&hdr.addr1());
    aad[8..14].copy_from_slice(&hdr.addr2());
    aad[14..20].copy_from_slice(&hdr.addr3());
    aad[20] = hdr.seq_ctrl_lo() & 0x0F;
    aad[21] = 0;

    let mut len = 22;
    if let Some(addr4) = hdr.addr4() {
        aad[len..len + 6].copy_from_slice(&addr4);
        len += 6;
    }
    if hdr.has_qos() {
        aad[len] = hdr.tid();
        aad[len + 1] = 0;
        len += 2;
    }
    (aad, len)
}

fn encrypt_block(cipher: &AesSafe128Encryptor, input: &[u8; 16]) -> [u8; 16] {
    let mut out = [0u8; 16];
    cipher.encrypt_block(&input[..], &mut out);
    out
}

/// Joint CBC-MAC and counter-mode state (RFC 3610). `b` accumulates the
/// MAC over cleartext, `s` is the current keystream block, and the two
/// advance together byte by byte.
struct CcmState<'a> {
    cipher: &'a AesSafe128Encryptor,
    b: [u8; 16],
    a: [u8; 16],
    s0: [u8; 16],
    s: [u8; 16],
    ctr: u16,
    j: usize,
}

impl<'a> CcmState<'a> {
    fn new(
        cipher: &'a AesSafe128Encryptor,
        nonce: &[u8; 13],
        aad: &[u8],
        payload_len: usize,
    ) -> Self {
        // B_0: flags 0x59 = 64*Adata + 8*((M-2)/2) + (L-1), then the nonce
        // and the big-endian payload length.
        let mut b = [0u8; 16];
        b[0] = 0x59;
        b[1..14].copy_from_slice(nonce);
        BigEndian::write_u16(&mut b[14..16], payload_len as u16);
        let mut b = encrypt_block(cipher, &b);

        // l(a) followed by the AAD, zero padded to whole blocks.
        debug_assert!(aad.len() <= 30);
        let mut auth = [0u8; 32];
        BigEndian::write_u16(&mut auth[..2], aad.len() as u16);
        auth[2..2 + aad.len()].copy_from_slice(aad);
        let blocks = (2 + aad.len() + 15) / 16;
        for blk in 0..blocks {
            for i in 0..16 {
                b[i] ^= auth[blk * 16 + i];
            }
            b = encrypt_block(cipher, &b);
        }

        // A_0 yields S_0 for the final MIC masking; the payload keystream
        // starts at counter 1.
        let mut a = [0u8; 16];
        a[0] = 0x01; // flags = L - 1
        a[1..14].copy_from_slice(nonce);
        let s0 = encrypt_block(cipher, &a);

        let mut state = CcmState { cipher, b, a, s0, s: [0; 16], ctr: 0, j: 0 };
        state.next_keystream();
        state
    }

    fn next_keystream(&mut self) {
        self.ctr += 1;
        BigEndian::write_u16(&mut self.a[14..16], self.ctr);
        self.s = encrypt_block(self.cipher, &self.a);
    }

    fn encrypt_run(&mut self, src: &[u8], dst: &mut [u8]) {
        for (i, &clear) in src.iter().enumerate() {
            self.b[self.j] ^= clear;
            dst[i] = clear ^ self.s[self.j];
            self.advance();
        }
    }

    fn decrypt_run(&mut self, src: &[u8], dst: &mut [u8]) {
        for (i, &enc) in src.iter().enumerate() {
            let clear = enc ^ self.s[self.j];
            dst[i] = clear;
            self.b[self.j] ^= clear;
            self.advance();
        }
    }

    fn advance(&mut self) {
        self.j += 1;
        if self.j == 16 {
            self.b = encrypt_block(self.cipher, &self.b);
            self.next_keystream();
            self.j = 0;
        }
    }

    /// Finalizes the MAC (zero-padded trailing block) and masks it with
    /// S_0: U = T xor first-M-bytes(S_0).
    fn finalize(mut self) -> [u8; CCMP_MIC_LEN] {
        if self.j != 0 {
            self.b = encrypt_block(self.cipher, &self.b);
        }
        let mut mic = [0u8; CCMP_MIC_LEN];
        for (i, m) in mic.iter_mut().enumerate() {
            *m = self.b[i] ^ self.s0[i];
        }
        mic
    }
}

pub(crate) fn encrypt(
    ctx: &CcmpCtx,
    tsc: &mut u64,
    key_id: u8,
    pool: &BufferPool,
    frame: BufferChain,
) -> Option<BufferChain> {
    let hdr = MacHeader::parse(frame.first())?;
    let hdr_len = hdr.hdr_len();
    let body_len = frame.pkt_len().checked_sub(hdr_len)?;

    *tsc += 1; // the 48-bit PN
    let pn = *tsc;

    let mut writer = ChainWriter::new(pool);
    writer.append(&hdr.bytes()[..hdr_len])?;
    writer.append(&ccmp_header(pn, key_id))?;

    let nonce = build_nonce(&hdr, pn);
    let (aad, aad_len) = build_aad(&hdr);
    let mut state = CcmState::new(&ctx.cipher, &nonce, &aad[..aad_len], body_len);

    let mut reader = ChainReader::new(&frame, hdr_len);
    writer.transform_from(&mut reader, body_len, |src, dst| state.encrypt_run(src, dst))?;

    writer.append(&state.finalize())?;
    Some(writer.finish())
}

pub(crate) fn decrypt(
    ctx: &CcmpCtx,
    rsc: &mut [u64; 16],
    mgmt_rsc: &mut u64,
    pool: &BufferPool,
    frame: BufferChain,
) -> Option<BufferChain> {
    let hdr = MacHeader::parse(frame.first())?;
    let hdr_len = hdr.hdr_len();
    if frame.pkt_len() < hdr_len + CCMP_HDR_LEN + CCMP_MIC_LEN {
        return None;
    }

    let mut ivp = [0u8; CCMP_HDR_LEN];
    frame.copy_out(hdr_len, &mut ivp)?;
    if ivp[3] & EXT_IV == 0 {
        return None;
    }

    // 11w: management frames have their own replay counter.
    let prsc = if hdr.is_data() { &mut rsc[hdr.tid() as usize] } else { mgmt_rsc };

    let pn = u64::from(ivp[0])
        | u64::from(ivp[1]) << 8
        | u64::from(ivp[4]) << 16
        | u64::from(ivp[5]) << 24
        | u64::from(ivp[6]) << 32
        | u64::from(ivp[7]) << 40;
    if pn <= *prsc {
        // replayed frame, discard
        return None;
    }

    let body_len = frame.pkt_len() - hdr_len - CCMP_HDR_LEN - CCMP_MIC_LEN;

    // The nonce and AAD come from the inbound header; only the outbound
    // copy loses the protected bit.
    let nonce = build_nonce(&hdr, pn);
    let (aad, aad_len) = build_aad(&hdr);
    let mut state = CcmState::new(&ctx.cipher, &nonce, &aad[..aad_len], body_len);

    let mut writer = ChainWriter::new(pool);
    let mut out_hdr = [0u8; MAX_HDR_LEN];
    let out_hdr = &mut out_hdr[..hdr_len];
    out_hdr.copy_from_slice(&hdr.bytes()[..hdr_len]);
    out_hdr[1] &= !mac::FC1_PROTECTED;
    writer.append(out_hdr)?;

    let mut reader = ChainReader::new(&frame, hdr_len + CCMP_HDR_LEN);
    writer.transform_from(&mut reader, body_len, |src, dst| state.decrypt_run(src, dst))?;

    let mic = state.finalize();
    let mut mic0 = [0u8; CCMP_MIC_LEN];
    frame.copy_out(hdr_len + CCMP_HDR_LEN + body_len, &mut mic0)?;
    if !bool::from(mic.ct_eq(&mic0)) {
        return None;
    }

    // The MIC verified; only now does the replay counter move.
    *prsc = pn;
    Some(writer.finish())
}
