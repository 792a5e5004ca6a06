// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! TKIP: RC4 with per-frame key mixing, the Michael MIC and a WEP-style
//! CRC-32 ICV (IEEE Std 802.11-2007, 8.3.2).
//!
//! The Phase 1 mixing output is cached per direction and reused while the
//! upper 32 counter bits stand still; Phase 2 runs on every frame. The
//! Michael MIC covers a DA/SA/priority pseudo-header plus the cleartext
//! body, and a verified failure on receive feeds the countermeasures state
//! machine.

mod mix;

use {
    crate::{
        buffer::{BufferChain, BufferPool, ChainReader, ChainWriter},
        countermeasures::{self, Iface, MlmeActions, OpMode},
        crc32,
        mac::{self, MacHeader, MAX_HDR_LEN},
        michael::Michael,
        EXT_IV, TKIP_HDR_LEN, TKIP_MIC_LEN, TKIP_OVERHEAD, TKIP_TAIL_LEN, WEP_CRC_LEN,
    },
    byteorder::{ByteOrder, LittleEndian},
    crypto::{rc4::Rc4, symmetriccipher::SynchronousStreamCipher},
    std::time::Instant,
    subtle::ConstantTimeEq,
};

/// Software TKIP context: the directional Michael sub-keys and the cached
/// Phase 1 outputs (TTAKs) with their validity flags.
pub(crate) struct TkipCtx {
    txmic: [u8; 8],
    rxmic: [u8; 8],
    txttak: [u16; 5],
    rxttak: [u16; 5],
    txttak_ok: bool,
    rxttak_ok: bool,
}

pub(crate) fn init_ctx(tk: &[u8; 32], opmode: OpMode) -> TkipCtx {
    // Bits 128-191 of the temporal key are the Michael key for the
    // authenticator-to-supplicant direction, bits 192-255 the reverse.
    let (tx_off, rx_off) = match opmode {
        OpMode::Ap => (16, 24),
        OpMode::Sta => (24, 16),
    };
    let mut txmic = [0u8; 8];
    txmic.copy_from_slice(&tk[tx_off..tx_off + 8]);
    let mut rxmic = [0u8; 8];
    rxmic.copy_from_slice(&tk[rx_off..rx_off + 8]);
    TkipCtx { txmic, rxmic, txttak: [0; 5], rxttak: [0; 5], txttak_ok: false, rxttak_ok: false }
}

// IEEE Std 802.11-2007, 8.3.2.2: the 8-octet TKIP header. Octet 1 is the
// WEP seed override (TSC1 | 0x20) & 0x7f.
fn tkip_header(tsc: u64, key_id: u8) -> [u8; TKIP_HDR_LEN] {
    let tsc1 = (tsc >> 8) as u8;
    [
        tsc1,
        (tsc1 | 0x20) & 0x7F,
        tsc as u8,
        key_id << 6 | EXT_IV,
        (tsc >> 16) as u8,
        (tsc >> 24) as u8,
        (tsc >> 32) as u8,
        (tsc >> 40) as u8,
    ]
}

/// Computes the Michael MIC over the frame body starting `offset` bytes
/// into the chain, with the pseudo-header derived from the 802.11 header.
/// Kept independent of the cipher context so drivers doing hardware crypto
/// but not MIC can call it without one.
pub fn tkip_mic(frame: &BufferChain, offset: usize, key: &[u8; 8]) -> Option<[u8; TKIP_MIC_LEN]> {
    let hdr = MacHeader::parse(frame.first())?;
    let (da, sa) = hdr.michael_peers()?;

    // IEEE Std 802.11-2007, 8.3.2.3.1: DA, SA, priority, three zero octets.
    let mut pseudo = [0u8; 14];
    pseudo[..6].copy_from_slice(&da);
    pseudo[6..12].copy_from_slice(&sa);
    pseudo[12] = hdr.tid();

    let mut mic = Michael::new(key);
    mic.update(&pseudo);
    let mut reader = ChainReader::new(frame, offset);
    loop {
        let run = reader.next_run(usize::MAX);
        if run.is_empty() {
            break;
        }
        mic.update(run);
    }
    Some(mic.finalize())
}

pub(crate) fn encrypt(
    ctx: &mut TkipCtx,
    tk: &[u8; 32],
    tsc: &mut u64,
    key_id: u8,
    pool: &BufferPool,
    frame: BufferChain,
) -> Option<BufferChain> {
    let hdr = MacHeader::parse(frame.first())?;
    let hdr_len = hdr.hdr_len();
    let body_len = frame.pkt_len().checked_sub(hdr_len)?;

    *tsc += 1; // the 48-bit TSC
    let tsc = *tsc;

    let mut writer = ChainWriter::new(pool);
    writer.append(&hdr.bytes()[..hdr_len])?;
    writer.append(&tkip_header(tsc, key_id))?;

    // Compute the WEP seed; Phase 1 is reused until IV16 rolls over.
    if !ctx.txttak_ok || tsc & 0xFFFF == 0 {
        mix::phase1(&mut ctx.txttak, &tk[..16], &hdr.addr2(), (tsc >> 16) as u32);
        ctx.txttak_ok = true;
    }
    let mut seed = [0u8; 16];
    mix::phase2(&mut seed, &tk[..16], &ctx.txttak, tsc as u16);
    let mut rc4 = Rc4::new(&seed);

    // Encrypt the body while folding the cleartext into the ICV.
    let mut crc = !0u32;
    let mut reader = ChainReader::new(&frame, hdr_len);
    writer.transform_from(&mut reader, body_len, |src, dst| {
        crc = crc32::update(crc, src);
        rc4.process(src, dst);
    })?;

    // Michael MIC over the cleartext, encrypted with the continuing RC4
    // stream and included in the ICV.
    let mic = tkip_mic(&frame, hdr_len, &ctx.txmic)?;
    crc = crc32::update(crc, &mic);
    let mut enc_mic = [0u8; TKIP_MIC_LEN];
    rc4.process(&mic, &mut enc_mic);
    writer.append(&enc_mic)?;

    let mut icv = [0u8; WEP_CRC_LEN];
    LittleEndian::write_u32(&mut icv, !crc);
    let mut enc_icv = [0u8; WEP_CRC_LEN];
    rc4.process(&icv, &mut enc_icv);
    writer.append(&enc_icv)?;

    Some(writer.finish())
}

pub(crate) fn decrypt<A: MlmeActions>(
    ctx: &mut TkipCtx,
    tk: &[u8; 32],
    rsc: &mut [u64; 16],
    iface: &mut Iface,
    actions: &mut A,
    now: Instant,
    pool: &BufferPool,
    frame: BufferChain,
) -> Option<BufferChain> {
    let hdr = MacHeader::parse(frame.first())?;
    let hdr_len = hdr.hdr_len();
    if frame.pkt_len() < hdr_len + TKIP_OVERHEAD {
        return None;
    }

    let mut ivp = [0u8; TKIP_HDR_LEN];
    frame.copy_out(hdr_len, &mut ivp)?;
    if ivp[3] & EXT_IV == 0 {
        return None;
    }

    let prsc = &mut rsc[hdr.tid() as usize];
    let tsc = u64::from(ivp[2])
        | u64::from(ivp[0]) << 8
        | u64::from(ivp[4]) << 16
        | u64::from(ivp[5]) << 24
        | u64::from(ivp[6]) << 32
        | u64::from(ivp[7]) << 40;
    if tsc <= *prsc {
        // replayed frame, discard
        return None;
    }

    let body_len = frame.pkt_len() - hdr_len - TKIP_OVERHEAD;

    // Compute the WEP seed, reusing the cached Phase 1 while the upper 32
    // counter bits match the last verified frame.
    if !ctx.rxttak_ok || (tsc >> 16) != (*prsc >> 16) {
        ctx.rxttak_ok = false; // stays invalid until a frame verifies
        mix::phase1(&mut ctx.rxttak, &tk[..16], &hdr.addr2(), (tsc >> 16) as u32);
    }
    let mut seed = [0u8; 16];
    mix::phase2(&mut seed, &tk[..16], &ctx.rxttak, tsc as u16);
    let mut rc4 = Rc4::new(&seed);

    let mut writer = ChainWriter::new(pool);
    let mut out_hdr = [0u8; MAX_HDR_LEN];
    let out_hdr = &mut out_hdr[..hdr_len];
    out_hdr.copy_from_slice(&hdr.bytes()[..hdr_len]);
    out_hdr[1] &= !mac::FC1_PROTECTED;
    writer.append(out_hdr)?;

    // Decrypt the body, folding the decrypted bytes into the ICV.
    let mut crc = !0u32;
    let mut reader = ChainReader::new(&frame, hdr_len + TKIP_HDR_LEN);
    writer.transform_from(&mut reader, body_len, |src, dst| {
        rc4.process(src, dst);
        crc = crc32::update(crc, dst);
    })?;

    // Decrypt the trailing MIC and ICV; the MIC cleartext is part of the
    // ICV coverage.
    let mut trailer = [0u8; TKIP_TAIL_LEN];
    frame.copy_out(hdr_len + TKIP_HDR_LEN + body_len, &mut trailer)?;
    let mut clear = [0u8; TKIP_TAIL_LEN];
    rc4.process(&trailer, &mut clear);

    crc = crc32::update(crc, &clear[..TKIP_MIC_LEN]);
    let icv0 = LittleEndian::read_u32(&clear[TKIP_MIC_LEN..]);
    if !crc != icv0 {
        // A bad ICV is dropped without any reaction: reacting would hand an
        // attacker a CRC oracle.
        return None;
    }

    let out = writer.finish();
    let mic = tkip_mic(&out, hdr_len, &ctx.rxmic)?;
    if !bool::from(mic.ct_eq(&clear[..TKIP_MIC_LEN])) {
        countermeasures::michael_mic_failure(iface, actions, now, tsc);
        return None;
    }

    // The MIC verified: commit the replay counter and keep the TTAK.
    *prsc = tsc;
    ctx.rxttak_ok = true;
    Some(out)
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            buffer::Segment,
            key::{CipherType, Key},
            test_utils::NullMlme,
        },
        hex::FromHex,
    };

    const SEG_CAPACITY: usize = 48;
    const BSS: [u8; 6] = [0xB5; 6];

    fn key_material() -> Vec<u8> {
        (0x20..0x40).collect()
    }

    fn sta_key() -> Key {
        let mut key = Key::new(CipherType::Tkip, 1, false, &key_material());
        key.install(&Iface::new(OpMode::Sta, "wlan0", BSS)).expect("install failed");
        key
    }

    fn ap_key() -> Key {
        let mut key = Key::new(CipherType::Tkip, 1, false, &key_material());
        key.install(&Iface::new(OpMode::Ap, "wlan0-ap", BSS)).expect("install failed");
        key
    }

    fn data_hdr() -> Vec<u8> {
        #[cfg_attr(rustfmt, rustfmt_skip)]
        let hdr = vec![
            0x08, 0x40, // fc: data, NODS, protected
            0x00, 0x00, // duration
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, // addr1
            0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff, // addr2
            0x10, 0x20, 0x30, 0x40, 0x50, 0x60, // addr3
            0x10, 0x00, // sequence control
        ];
        hdr
    }

    fn plaintext_frame() -> Vec<u8> {
        let mut frame = data_hdr();
        frame.extend((0..40u32).map(|i| (i * 7 + 3) as u8));
        frame
    }

    fn golden_ciphertext() -> Vec<u8> {
        Vec::from_hex(
            "08400000112233445566aabbccddeeff10203040506010000020016000000000\
             475f103d88b2c0933d318b02b9b7efd9083e48eb95c99418fbdc30c69c602c20\
             d1859db816a1f3fe5d1308f96e882a375c21cf42",
        )
        .unwrap()
    }

    fn decrypt_with(
        key: &mut Key,
        iface: &mut Iface,
        pool: &BufferPool,
        frame: BufferChain,
    ) -> Option<BufferChain> {
        key.decrypt(iface, &mut NullMlme::default(), Instant::now(), pool, frame)
    }

    #[test]
    fn encrypt_golden_frame() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut key = sta_key();
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let out = key.encrypt(&pool, frame).expect("encrypt failed");
        assert_eq!(out.to_vec(), golden_ciphertext());
        assert_eq!(key.tsc, 1);
    }

    #[test]
    fn iv16_rollover_recomputes_phase1() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut key = sta_key();

        // Prime the TX TTAK cache inside IV32 = 0.
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        key.encrypt(&pool, frame).expect("encrypt failed");

        // Force the rollover into IV32 = 1; a stale cache would produce a
        // different keystream.
        key.tsc = 0xFFFF;
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let out = key.encrypt(&pool, frame).expect("encrypt failed");
        assert_eq!(
            out.to_vec(),
            Vec::from_hex(
                "08400000112233445566aabbccddeeff1020304050601000002000600100000\
                 04c37514c6f2516bf6619a50cf9b746508f4eaae9576efdb40409e5aa845b89\
                 41f1ca51f1f8f4b492805b1b804c5a8af2f044e828"
            )
            .unwrap()
        );
    }

    #[test]
    fn decrypt_restores_plaintext_and_clears_protected() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut tx_key = sta_key();
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");

        // The access point side sees the station's TX Michael key as its RX
        // key.
        let mut rx_key = ap_key();
        let mut iface = Iface::new(OpMode::Ap, "wlan0-ap", BSS);
        let out = decrypt_with(&mut rx_key, &mut iface, &pool, encrypted).expect("decrypt failed");

        let mut expected = plaintext_frame();
        expected[1] &= !mac::FC1_PROTECTED;
        assert_eq!(out.to_vec(), expected);
        assert_eq!(rx_key.rsc[0], 1);
        assert!(iface.micfail_tick.is_none());
    }

    #[test]
    fn cached_and_recomputed_phase1_paths_both_verify() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut tx_key = sta_key();
        let mut rx_key = ap_key();
        let mut iface = Iface::new(OpMode::Ap, "wlan0-ap", BSS);

        // Two frames inside the same IV32: the second decrypt reuses the
        // cached TTAK.
        for _ in 0..2 {
            let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
            let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");
            assert!(decrypt_with(&mut rx_key, &mut iface, &pool, encrypted).is_some());
        }

        // Crossing into the next IV32 forces a Phase 1 recompute on receive.
        tx_key.tsc = 0xFFFF;
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, encrypted).is_some());
        assert_eq!(rx_key.rsc[0], 0x1_0000);
    }

    #[test]
    fn replayed_frames_are_rejected() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut tx_key = sta_key();
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");
        let copy = BufferChain::from_slice(&pool, &encrypted.to_vec()).unwrap();

        let mut rx_key = ap_key();
        let mut iface = Iface::new(OpMode::Ap, "wlan0-ap", BSS);
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, encrypted).is_some());
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, copy).is_none());
    }

    #[test]
    fn corrupted_body_fails_icv_silently() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut tx_key = sta_key();
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");

        let mut bytes = encrypted.to_vec();
        bytes[24 + TKIP_HDR_LEN + 5] ^= 0x04;

        let mut rx_key = ap_key();
        let mut iface = Iface::new(OpMode::Ap, "wlan0-ap", BSS);
        let chain = BufferChain::from_slice(&pool, &bytes).unwrap();
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, chain).is_none());
        // An ICV failure must not reach the Michael failure handler.
        assert!(iface.micfail_tick.is_none());
        assert_eq!(rx_key.rsc[0], 0);
    }

    #[test]
    fn michael_mismatch_reports_mic_failure() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut tx_key = sta_key();
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");

        // Decrypting with a station-installed key swaps the Michael
        // sub-keys: the stream cipher and ICV check out, the MIC does not.
        let mut rx_key = sta_key();
        let mut iface = Iface::new(OpMode::Sta, "wlan0", BSS);
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, encrypted).is_none());
        assert!(iface.micfail_tick.is_some());
        assert_eq!(iface.micfail_tsc, 1);
        // Nothing was committed.
        assert_eq!(rx_key.rsc[0], 0);
    }

    #[test]
    fn missing_ext_iv_and_short_frames_are_rejected() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let mut tx_key = sta_key();
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let encrypted = tx_key.encrypt(&pool, frame).expect("encrypt failed");

        let mut bytes = encrypted.to_vec();
        bytes[24 + 3] &= !EXT_IV;
        let mut rx_key = ap_key();
        let mut iface = Iface::new(OpMode::Ap, "wlan0-ap", BSS);
        let chain = BufferChain::from_slice(&pool, &bytes).unwrap();
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, chain).is_none());

        let mut short = data_hdr();
        short.extend_from_slice(&[0u8; TKIP_OVERHEAD - 1]);
        let chain = BufferChain::from_slice(&pool, &short).unwrap();
        assert!(decrypt_with(&mut rx_key, &mut iface, &pool, chain).is_none());
    }

    #[test]
    fn allocator_exhaustion_drops_the_frame() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let frame = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let empty_pool = BufferPool::with_quota(SEG_CAPACITY, 0);
        let mut key = sta_key();
        assert!(key.encrypt(&empty_pool, frame).is_none());
    }

    #[test]
    fn segmented_payload_matches_contiguous_reference() {
        let pool = BufferPool::new(SEG_CAPACITY);
        let frame = plaintext_frame();

        // Body split mid-word at uneven offsets.
        let mut chain = BufferChain::new();
        chain.append_segment(Segment::from_slice(&frame[..29]));
        chain.append_segment(Segment::from_slice(&frame[29..42]));
        chain.append_segment(Segment::from_slice(&frame[42..]));

        let mut key = sta_key();
        let out = key.encrypt(&pool, chain).expect("encrypt failed");
        assert_eq!(out.to_vec(), golden_ciphertext());
    }

    #[test]
    fn standalone_mic_matches_reference_vectors() {
        let pool = BufferPool::new(SEG_CAPACITY);

        let mut frame = data_hdr();
        frame.extend_from_slice(b"The quick brown fox");
        let chain = BufferChain::from_slice(&pool, &frame).unwrap();
        let mut mic_key = [0u8; 8];
        mic_key.copy_from_slice(&Vec::from_hex("82925c1ca1d130b8").unwrap());
        assert_eq!(
            tkip_mic(&chain, 24, &mic_key).expect("mic failed").to_vec(),
            Vec::from_hex("0b59de17e0b4607a").unwrap()
        );

        // The station-side TX Michael sub-key lives in bits 192-255.
        let chain = BufferChain::from_slice(&pool, &plaintext_frame()).unwrap();
        let mut tx_mic_key = [0u8; 8];
        tx_mic_key.copy_from_slice(&key_material()[24..32]);
        assert_eq!(
            tkip_mic(&chain, 24, &tx_mic_key).expect("mic failed").to_vec(),
            Vec::from_hex("ad1c507d36408c40").unwrap()
        );
    }
}
