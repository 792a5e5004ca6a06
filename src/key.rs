// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Key records and per-cipher context dispatch.
//!
//! A [`Key`] carries the raw key material, the 2-bit key index, the 48-bit
//! transmit counter and the per-TID receive counters. Installing the key
//! derives the cipher-specific schedule exactly once and stores it as a
//! tagged variant; frame operations dispatch on that variant. Drivers
//! offloading crypto to hardware can skip installation entirely and use the
//! standalone [`crate::tkip::tkip_mic`] and
//! [`crate::countermeasures::michael_mic_failure`] entry points.

use {
    crate::{
        buffer::{BufferChain, BufferPool},
        ccmp::{self, CcmpCtx},
        countermeasures::{Iface, MlmeActions},
        tkip::{self, TkipCtx},
    },
    std::time::Instant,
    thiserror::Error,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CipherType {
    Ccmp,
    Tkip,
}

impl CipherType {
    /// Key material length: 128 bits, plus the two 64-bit Michael sub-keys
    /// for TKIP.
    pub fn key_len(&self) -> usize {
        match self {
            CipherType::Ccmp => 16,
            CipherType::Tkip => 32,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("{cipher:?} requires {expected} bytes of key material, got {actual}")]
    KeyMaterialLength { cipher: CipherType, expected: usize, actual: usize },
}

pub(crate) enum CipherCtx {
    Ccmp(CcmpCtx),
    Tkip(TkipCtx),
}

const MAX_KEY_LEN: usize = 32;
const RSC_COUNT: usize = 16;

/// One pairwise or group key with its counters and, once installed, its
/// cipher schedule.
pub struct Key {
    cipher: CipherType,
    id: u8,
    group: bool,
    tk: [u8; MAX_KEY_LEN],
    tk_len: usize,
    pub(crate) tsc: u64,
    pub(crate) rsc: [u64; RSC_COUNT],
    pub(crate) mgmt_rsc: u64,
    ctx: Option<CipherCtx>,
}

impl Key {
    pub fn new(cipher: CipherType, id: u8, group: bool, material: &[u8]) -> Self {
        let mut tk = [0u8; MAX_KEY_LEN];
        let tk_len = material.len().min(MAX_KEY_LEN);
        tk[..tk_len].copy_from_slice(&material[..tk_len]);
        Key {
            cipher,
            id: id & 0x3,
            group,
            tk,
            tk_len,
            tsc: 0,
            rsc: [0; RSC_COUNT],
            mgmt_rsc: 0,
            ctx: None,
        }
    }

    pub fn cipher(&self) -> CipherType {
        self.cipher
    }

    pub fn key_id(&self) -> u8 {
        self.id
    }

    pub fn is_group(&self) -> bool {
        self.group
    }

    pub fn is_installed(&self) -> bool {
        self.ctx.is_some()
    }

    /// Derives the cipher schedule and resets all counters. Replaces any
    /// previously installed context.
    pub fn install(&mut self, iface: &Iface) -> Result<(), Error> {
        if self.tk_len != self.cipher.key_len() {
            return Err(Error::KeyMaterialLength {
                cipher: self.cipher,
                expected: self.cipher.key_len(),
                actual: self.tk_len,
            });
        }
        self.ctx = Some(match self.cipher {
            CipherType::Ccmp => CipherCtx::Ccmp(ccmp::init_ctx(&self.tk)),
            CipherType::Tkip => CipherCtx::Tkip(tkip::init_ctx(&self.tk, iface.opmode())),
        });
        self.tsc = 0;
        self.rsc = [0; RSC_COUNT];
        self.mgmt_rsc = 0;
        Ok(())
    }

    /// Releases the cipher schedule. Safe to call repeatedly.
    pub fn uninstall(&mut self) {
        self.ctx = None;
    }

    /// Encrypts `frame` under this key, consuming the input chain and
    /// returning a freshly allocated output chain. `None` means the frame
    /// was dropped (no installed context or allocator exhaustion).
    pub fn encrypt(&mut self, pool: &BufferPool, frame: BufferChain) -> Option<BufferChain> {
        let Key { ctx, tsc, id, tk, .. } = self;
        match ctx.as_mut()? {
            CipherCtx::Ccmp(ctx) => ccmp::encrypt(ctx, tsc, *id, pool, frame),
            CipherCtx::Tkip(ctx) => tkip::encrypt(ctx, tk, tsc, *id, pool, frame),
        }
    }

    /// Decrypts and verifies `frame`, consuming the input chain. `None`
    /// means the frame was rejected: too short, missing ExtIV, replayed, or
    /// failing integrity checks. A TKIP Michael MIC failure additionally
    /// reports into the countermeasures state machine.
    pub fn decrypt<A: MlmeActions>(
        &mut self,
        iface: &mut Iface,
        actions: &mut A,
        now: Instant,
        pool: &BufferPool,
        frame: BufferChain,
    ) -> Option<BufferChain> {
        let Key { ctx, rsc, mgmt_rsc, tk, .. } = self;
        match ctx.as_mut()? {
            CipherCtx::Ccmp(ctx) => ccmp::decrypt(ctx, rsc, mgmt_rsc, pool, frame),
            CipherCtx::Tkip(ctx) => {
                tkip::decrypt(ctx, tk, rsc, iface, actions, now, pool, frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{assert_variant, countermeasures::OpMode, test_utils::NullMlme},
        crate::buffer::DEFAULT_SEG_CAPACITY,
    };

    fn iface() -> Iface {
        Iface::new(OpMode::Sta, "wlan0", [0xB5; 6])
    }

    #[test]
    fn install_rejects_short_material() {
        let mut key = Key::new(CipherType::Ccmp, 0, false, &[0xAA; 5]);
        assert_variant!(
            key.install(&iface()),
            Err(Error::KeyMaterialLength { expected: 16, actual: 5, .. })
        );
        assert!(!key.is_installed());

        let mut key = Key::new(CipherType::Tkip, 0, false, &[0xAA; 16]);
        assert_variant!(
            key.install(&iface()),
            Err(Error::KeyMaterialLength { expected: 32, actual: 16, .. })
        );
    }

    #[test]
    fn install_resets_counters() {
        let mut key = Key::new(CipherType::Ccmp, 1, false, &[0xAA; 16]);
        key.tsc = 77;
        key.rsc[3] = 12;
        key.mgmt_rsc = 9;
        key.install(&iface()).expect("install failed");
        assert_eq!(key.tsc, 0);
        assert_eq!(key.rsc, [0; 16]);
        assert_eq!(key.mgmt_rsc, 0);
    }

    #[test]
    fn uninstall_is_idempotent() {
        let mut key = Key::new(CipherType::Ccmp, 0, false, &[0xAA; 16]);
        key.install(&iface()).expect("install failed");
        assert!(key.is_installed());
        key.uninstall();
        assert!(!key.is_installed());
        key.uninstall();
        assert!(!key.is_installed());
    }

    #[test]
    fn frame_ops_require_installed_context() {
        let pool = BufferPool::new(DEFAULT_SEG_CAPACITY);
        let mut key = Key::new(CipherType::Ccmp, 0, false, &[0xAA; 16]);
        let frame = BufferChain::from_slice(&pool, &[0u8; 40]).unwrap();
        assert!(key.encrypt(&pool, frame).is_none());

        let frame = BufferChain::from_slice(&pool, &[0u8; 40]).unwrap();
        let mut ifc = iface();
        assert!(key
            .decrypt(&mut ifc, &mut NullMlme::default(), std::time::Instant::now(), &pool, frame)
            .is_none());
    }

    #[test]
    fn key_id_is_masked_to_two_bits() {
        let key = Key::new(CipherType::Ccmp, 0x7, false, &[0xAA; 16]);
        assert_eq!(key.key_id(), 0x3);
    }
}
