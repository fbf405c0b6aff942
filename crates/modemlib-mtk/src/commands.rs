//! MediaTek proprietary command parsers and encoders.
//!
//! All functions are pure: they turn reply text into typed values (or typed
//! values into command text) without touching a port.
//!
//! # MediaTek command reference
//!
//! - `+EPINC?` -- remaining PIN1/PIN2/PUK1/PUK2 attempts.
//! - `+EGMR=0,0` -- chipset identification (`"MT6280"`, `"MT6290"`, ...).
//! - `+ERAT?` / `+ERAT=<mode>,<pref>` -- radio access technology selection.
//! - `+ECSQ` -- extended signal quality reports, one shape per chipset
//!   generation and radio technology.

use std::sync::LazyLock;

use regex::Regex;

use modemlib_core::error::{Error, Result};
use modemlib_core::helpers::normalize_signal;
use modemlib_core::types::{ModeCombination, ModemLock, ModemMode, UnlockRetries};

/// `+ERAT=` may take a while on a registered modem.
pub const ERAT_SET_TIMEOUT_SECS: u64 = 30;

/// Chipset id of the LTE-capable generation.
pub const DEVICE_MT6290: u32 = 6290;

// ---------------------------------------------------------------
// Unlock retries
// ---------------------------------------------------------------

static EPINC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+EPINC:\s*(\d+),\s*(\d+),\s*(\d+),\s*(\d+)").expect("static regex")
});

/// Parse `+EPINC: <pin1>,<pin2>,<puk1>,<puk2>`.
pub fn parse_epinc(reply: &str) -> Result<UnlockRetries> {
    let caps = EPINC_RE
        .captures(reply)
        .ok_or_else(|| Error::Parse(format!("failed to match EPINC response: {reply:?}")))?;
    let field = |i: usize| -> Result<u32> {
        caps[i]
            .parse()
            .map_err(|_| Error::Parse(format!("bad EPINC field: {reply:?}")))
    };
    Ok(UnlockRetries::new()
        .with(ModemLock::SimPin, field(1)?)
        .with(ModemLock::SimPin2, field(2)?)
        .with(ModemLock::SimPuk, field(3)?)
        .with(ModemLock::SimPuk2, field(4)?))
}

// ---------------------------------------------------------------
// Device type and supported modes
// ---------------------------------------------------------------

static EGMR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\+EGMR:\s*"MT(\d+)"#).expect("static regex"));

/// Parse the chipset number out of `+EGMR: "MT6290..."`.
pub fn parse_egmr_device_type(reply: &str) -> Result<u32> {
    EGMR_RE
        .captures(reply)
        .and_then(|caps| caps[1].parse().ok())
        .ok_or_else(|| Error::Parse(format!("failed to match EGMR response: {reply:?}")))
}

/// Mode combinations a chipset supports. Every chipset does 2G/3G; the
/// MT6290 adds the LTE combinations.
pub fn supported_modes(device_type: u32) -> Vec<ModeCombination> {
    let none = ModemMode::NONE;
    let mut modes = vec![
        ModeCombination::new(ModemMode::MODE_2G, none),
        ModeCombination::new(ModemMode::MODE_3G, none),
        ModeCombination::new(ModemMode::MODE_2G | ModemMode::MODE_3G, none),
        ModeCombination::new(ModemMode::MODE_2G | ModemMode::MODE_3G, ModemMode::MODE_3G),
    ];
    if device_type == DEVICE_MT6290 {
        modes.extend([
            ModeCombination::new(ModemMode::MODE_4G, none),
            ModeCombination::new(ModemMode::MODE_2G | ModemMode::MODE_4G, none),
            ModeCombination::new(ModemMode::MODE_3G | ModemMode::MODE_4G, none),
            ModeCombination::new(
                ModemMode::MODE_2G | ModemMode::MODE_3G | ModemMode::MODE_4G,
                none,
            ),
        ]);
    }
    modes
}

// ---------------------------------------------------------------
// ERAT
// ---------------------------------------------------------------

static ERAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\+ERAT:\s*\d+,\s*\d+,\s*(\d+),\s*(\d+)").expect("static regex")
});

fn erat_allowed(mode: u32) -> Option<ModemMode> {
    let (g2, g3, g4) = (ModemMode::MODE_2G, ModemMode::MODE_3G, ModemMode::MODE_4G);
    Some(match mode {
        0 => g2,
        1 => g3,
        2 => g2 | g3,
        3 => g4,
        4 => g2 | g4,
        5 => g3 | g4,
        6 => g2 | g3 | g4,
        _ => return None,
    })
}

fn erat_preferred(pref: u32) -> Option<ModemMode> {
    Some(match pref {
        0 => ModemMode::NONE,
        1 => ModemMode::MODE_2G,
        2 => ModemMode::MODE_3G,
        3 => ModemMode::MODE_4G,
        _ => return None,
    })
}

/// Parse `+ERAT: <curr_rat>,<gprs_status>,<rat>,<prefer_rat>`.
pub fn parse_erat(reply: &str) -> Result<ModeCombination> {
    let caps = ERAT_RE
        .captures(reply)
        .ok_or_else(|| Error::Parse(format!("couldn't parse +ERAT response: {reply:?}")))?;
    let mode: u32 = caps[1].parse().map_err(|_| Error::Parse(reply.to_string()))?;
    let pref: u32 = caps[2].parse().map_err(|_| Error::Parse(reply.to_string()))?;
    let allowed = erat_allowed(mode)
        .ok_or_else(|| Error::Parse(format!("unsupported allowed mode in +ERAT: {mode}")))?;
    let preferred = erat_preferred(pref)
        .ok_or_else(|| Error::Parse(format!("unsupported preferred mode in +ERAT: {pref}")))?;
    Ok(ModeCombination::new(allowed, preferred))
}

/// Map a mode combination to its `(<rat>, <prefer_rat>)` pair.
///
/// Only 2G|3G can carry a preference, and only for 3G.
pub fn erat_values(modes: ModeCombination) -> Result<(u32, u32)> {
    let (g2, g3, g4) = (ModemMode::MODE_2G, ModemMode::MODE_3G, ModemMode::MODE_4G);
    let none = ModemMode::NONE;
    let ModeCombination { allowed, preferred } = modes;

    let values = if allowed == g2 {
        Some((0, 0))
    } else if allowed == g3 {
        Some((1, 0))
    } else if allowed == g2 | g3 {
        match preferred {
            p if p == g3 => Some((2, 2)),
            p if p == none => Some((2, 0)),
            _ => None,
        }
    } else if preferred != none {
        None
    } else if allowed == g2 | g3 | g4 {
        Some((6, 0))
    } else if allowed == g2 | g4 {
        Some((4, 0))
    } else if allowed == g3 | g4 {
        Some((5, 0))
    } else if allowed == g4 {
        Some((3, 0))
    } else {
        None
    };

    values.ok_or_else(|| Error::Unsupported(format!("requested mode ({modes}) not supported")))
}

/// Build `AT+ERAT=<rat>,<prefer_rat>`.
pub fn cmd_set_erat(modes: ModeCombination) -> Result<String> {
    let (mode, pref) = erat_values(modes)?;
    Ok(format!("AT+ERAT={mode},{pref}"))
}

// ---------------------------------------------------------------
// ECSQ signal reports
// ---------------------------------------------------------------

/// Raw scale of an `+ECSQ` report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalScale {
    /// MT6280 RSSI, `0..=31`, `99` unknown.
    Mt6280,
    /// MT6290 GSM RSSI, `0..=63`, `99` unknown.
    Gsm,
    /// MT6290 UMTS RSCP, `0..=96`.
    Umts,
    /// MT6290 LTE RSRP, `0..=97`.
    Lte,
}

impl SignalScale {
    /// Convert a raw report to a percentage. Unknown readings map to 0.
    pub fn to_percent(self, raw: u32) -> u8 {
        let raw = i64::from(raw);
        match self {
            SignalScale::Mt6280 | SignalScale::Gsm if raw == 99 => 0,
            SignalScale::Mt6280 => normalize_signal(raw, 31),
            SignalScale::Gsm => normalize_signal(raw, 63),
            SignalScale::Umts => normalize_signal(raw, 96),
            SignalScale::Lte => normalize_signal(raw, 97),
        }
    }
}

/// The five `+ECSQ` shapes with the scale of their captured value.
///
/// MT6280 reports three or five fields; MT6290 reports eight, with `1`
/// filling the slots of the technologies not in use.
pub const ECSQ_PATTERNS: [(&str, SignalScale); 5] = [
    (
        r"\r\n\+ECSQ:\s*([0-9]*),\s*[0-9]*,\s*-[0-9]*\r\n",
        SignalScale::Mt6280,
    ),
    (
        r"\r\n\+ECSQ:\s*([0-9]*),\s*[0-9]*,\s*-[0-9]*,\s*-[0-9]*,\s*-[0-9]*\r\n",
        SignalScale::Mt6280,
    ),
    (
        r"\r\n\+ECSQ:\s*([0-9]*),\s*[0-9]*,\s*-[0-9]*,\s*1,\s*1,\s*1,\s*1,\s*[0-9]*\r\n",
        SignalScale::Gsm,
    ),
    (
        r"\r\n\+ECSQ:\s*([0-9]*),\s*[0-9]*,\s*1,\s*-[0-9]*,\s*-[0-9]*,\s*1,\s*1,\s*[0-9]*\r\n",
        SignalScale::Umts,
    ),
    (
        r"\r\n\+ECSQ:\s*[0-9]*,\s*([0-9]*),\s*1,\s*1,\s*1,\s*-[0-9]*,\s*-[0-9]*,\s*[0-9]*\r\n",
        SignalScale::Lte,
    ),
];
