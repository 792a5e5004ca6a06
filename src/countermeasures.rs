// Copyright 2021 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! TKIP countermeasures (IEEE Std 802.11-2007, 8.3.2.4).
//!
//! A Michael MIC failure on its own is only recorded. A second failure
//! within sixty seconds trips the countermeasures: an access point
//! deauthenticates every TKIP station and refuses new TKIP associations
//! until higher-level policy clears the flag; a station reports both
//! failures to its access point and leaves the BSS.

use {
    crate::{key::CipherType, mac::MacAddr},
    log::error,
    std::time::{Duration, Instant},
};

/// Two Michael MIC failures within this window trigger countermeasures.
pub const MIC_FAILURE_WINDOW: Duration = Duration::from_secs(60);

/// IEEE Std 802.11-2007, 7.3.1.7, reason code 14.
pub const REASON_MIC_FAILURE: u16 = 14;

// EAPOL-Key information bits carried on a Michael MIC failure report.
pub const EAPOL_KEY_KEYMIC: u16 = 0x0100;
pub const EAPOL_KEY_SECURE: u16 = 0x0200;
pub const EAPOL_KEY_ERROR: u16 = 0x0400;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpMode {
    Sta,
    Ap,
}

/// An associated peer as the MLME sees it, reduced to what the
/// countermeasures decision needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Station {
    pub addr: MacAddr,
    pub associated: bool,
    pub pairwise_cipher: Option<CipherType>,
}

/// Decouples the countermeasures state machine from the rest of the MLME
/// without tying it to a particular STA or AP implementation.
pub trait MlmeActions {
    /// Transmit a deauthentication frame to `peer`.
    fn send_deauth(&mut self, peer: MacAddr, reason: u16);
    /// Transmit an EAPOL-Key request frame carrying the given information
    /// bits and TKIP sequence counter.
    fn send_eapol_key_req(&mut self, info: u16, tsc: u64);
    /// Snapshot of the association table.
    fn stations(&self) -> Vec<Station>;
    /// Drop `addr` from the association table.
    fn remove_station(&mut self, addr: MacAddr);
    /// Leave the BSS and resume scanning.
    fn request_scan(&mut self);
}

/// Per-interface cipher state: operating mode, the BSS peer, and the
/// Michael failure bookkeeping.
pub struct Iface {
    opmode: OpMode,
    ifname: String,
    bss: MacAddr,
    group_cipher: Option<CipherType>,
    pub(crate) countermeasures_active: bool,
    pub(crate) micfail_tick: Option<Instant>,
    pub(crate) micfail_tsc: u64,
}

impl Iface {
    pub fn new(opmode: OpMode, ifname: impl Into<String>, bss: MacAddr) -> Self {
        Iface {
            opmode,
            ifname: ifname.into(),
            bss,
            group_cipher: None,
            countermeasures_active: false,
            micfail_tick: None,
            micfail_tsc: 0,
        }
    }

    pub fn opmode(&self) -> OpMode {
        self.opmode
    }

    pub fn ifname(&self) -> &str {
        &self.ifname
    }

    pub fn bss(&self) -> MacAddr {
        self.bss
    }

    /// The group cipher of the BSS; a TKIP group cipher makes every
    /// associated station subject to countermeasures.
    pub fn set_group_cipher(&mut self, cipher: Option<CipherType>) {
        self.group_cipher = cipher;
    }

    pub fn countermeasures_active(&self) -> bool {
        self.countermeasures_active
    }

    /// Cleared by higher-level policy once the lockout period has elapsed.
    pub fn clear_countermeasures(&mut self) {
        self.countermeasures_active = false;
    }
}

/// Handles a Michael MIC failure with the offending frame's TSC. Called by
/// the software TKIP engine, and callable by drivers whose hardware crypto
/// detects the failure.
pub fn michael_mic_failure<A: MlmeActions>(
    iface: &mut Iface,
    actions: &mut A,
    now: Instant,
    tsc: u64,
) {
    if iface.countermeasures_active {
        return;
    }

    error!("{}: Michael MIC failure", iface.ifname);

    // No Michael MIC failure report is sent for a single failure, against a
    // literal reading of 8.3.2.4: the reports can serve as an oracle to
    // verify CRC guesses (Beck, M. and Tews, S., "Practical attacks against
    // WEP and WPA").

    let escalate = match iface.micfail_tick {
        Some(prev) => now.duration_since(prev) < MIC_FAILURE_WINDOW,
        None => false,
    };
    if !escalate {
        iface.micfail_tick = Some(now);
        iface.micfail_tsc = tsc;
        return;
    }

    match iface.opmode {
        OpMode::Ap => {
            // Refuse new TKIP associations until the lockout is cleared.
            iface.countermeasures_active = true;

            // Deauthenticate every associated station using TKIP as its
            // pairwise cipher, or every station when the group cipher is
            // TKIP.
            for sta in actions.stations() {
                let uses_tkip = iface.group_cipher == Some(CipherType::Tkip)
                    || sta.pairwise_cipher == Some(CipherType::Tkip);
                if sta.associated && uses_tkip {
                    actions.send_deauth(sta.addr, REASON_MIC_FAILURE);
                    actions.remove_station(sta.addr);
                }
            }
        }
        OpMode::Sta => {
            // Two EAPOL-Key request frames back-to-back, carrying the
            // previous and the current failure TSC, trigger countermeasures
            // at the access point end.
            let info = EAPOL_KEY_KEYMIC | EAPOL_KEY_ERROR | EAPOL_KEY_SECURE;
            actions.send_eapol_key_req(info, iface.micfail_tsc);
            actions.send_eapol_key_req(info, tsc);

            // Leave this BSS and find another one.
            actions.send_deauth(iface.bss, REASON_MIC_FAILURE);
            actions.request_scan();
        }
    }

    iface.micfail_tick = Some(now);
    iface.micfail_tsc = tsc;
}
