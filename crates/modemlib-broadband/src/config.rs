//! Vendor profiles and per-modem configuration overrides.
//!
//! Every vendor crate ships a static [`VendorProfile`] in its `models.rs`
//! with the factory defaults for its devices. A [`ModemConfig`], usually
//! loaded from a TOML file, overrides individual knobs for one modem.
//! [`ModemConfig::resolve`] merges the two into the [`ResolvedConfig`] the
//! modem actually runs with.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use modemlib_transport::FlowControl;

/// Radio families a device supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    /// GSM/UMTS (3GPP) support.
    pub gsm_umts: bool,
    /// CDMA 1x/EVDO support.
    pub cdma: bool,
    /// LTE support.
    pub lte: bool,
}

impl Capabilities {
    /// `true` for devices that speak 3GPP at all.
    pub fn is_3gpp(&self) -> bool {
        self.gsm_umts || self.lte
    }

    /// `true` for CDMA devices without 3GPP support.
    pub fn is_cdma_only(&self) -> bool {
        self.cdma && !self.is_3gpp()
    }
}

/// Static factory defaults for a vendor's devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorProfile {
    /// Plugin name (e.g. "MTK").
    pub name: &'static str,
    pub manufacturer: &'static str,
    pub default_baud_rate: u32,
    pub flow_control: FlowControl,
    /// Delay after a successful PIN/PUK before the SIM is queried again.
    pub post_unlock_grace: Duration,
    /// Delay after power-up before the radio accepts further commands.
    pub power_up_settle: Duration,
    /// Consecutive timeouts before a port is declared unresponsive;
    /// `0` disables the check.
    pub max_consecutive_timeouts: u32,
    pub command_timeout: Duration,
    pub capabilities: Capabilities,
}

/// Profile for any 27.007-compliant modem without vendor quirks.
pub fn generic_profile() -> VendorProfile {
    VendorProfile {
        name: "Generic",
        manufacturer: "Generic",
        default_baud_rate: 115_200,
        flow_control: FlowControl::None,
        post_unlock_grace: Duration::ZERO,
        power_up_settle: Duration::ZERO,
        max_consecutive_timeouts: 10,
        command_timeout: Duration::from_secs(3),
        capabilities: Capabilities {
            gsm_umts: true,
            cdma: false,
            lte: false,
        },
    }
}

/// Per-modem overrides. Every field is optional; unset fields fall back to
/// the vendor profile or the built-in default.
///
/// Durations are expressed in milliseconds so the TOML form stays flat:
///
/// ```toml
/// baud_rate = 921600
/// flow_control = "hardware"
/// post_unlock_grace_ms = 5000
/// unlock_check_attempts = 5
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModemConfig {
    pub baud_rate: Option<u32>,
    pub flow_control: Option<FlowControl>,
    pub post_unlock_grace_ms: Option<u64>,
    pub power_up_settle_ms: Option<u64>,
    pub max_consecutive_timeouts: Option<u32>,
    pub command_timeout_ms: Option<u64>,
    pub unlock_check_attempts: Option<u32>,
    pub unlock_check_delay_ms: Option<u64>,
}

/// Default number of `+CPIN?` attempts during the unlock check.
pub const DEFAULT_UNLOCK_CHECK_ATTEMPTS: u32 = 3;

/// Default delay between unlock check attempts.
pub const DEFAULT_UNLOCK_CHECK_DELAY: Duration = Duration::from_secs(2);

/// Effective settings for one modem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub baud_rate: u32,
    pub flow_control: FlowControl,
    pub post_unlock_grace: Duration,
    pub power_up_settle: Duration,
    pub max_consecutive_timeouts: u32,
    pub command_timeout: Duration,
    pub unlock_check_attempts: u32,
    pub unlock_check_delay: Duration,
}

impl ModemConfig {
    /// Merge these overrides over `profile`.
    pub fn resolve(&self, profile: &VendorProfile) -> ResolvedConfig {
        let ms = Duration::from_millis;
        ResolvedConfig {
            baud_rate: self.baud_rate.unwrap_or(profile.default_baud_rate),
            flow_control: self.flow_control.unwrap_or(profile.flow_control),
            post_unlock_grace: self
                .post_unlock_grace_ms
                .map(ms)
                .unwrap_or(profile.post_unlock_grace),
            power_up_settle: self
                .power_up_settle_ms
                .map(ms)
                .unwrap_or(profile.power_up_settle),
            max_consecutive_timeouts: self
                .max_consecutive_timeouts
                .unwrap_or(profile.max_consecutive_timeouts),
            command_timeout: self
                .command_timeout_ms
                .map(ms)
                .unwrap_or(profile.command_timeout),
            unlock_check_attempts: self
                .unlock_check_attempts
                .unwrap_or(DEFAULT_UNLOCK_CHECK_ATTEMPTS)
                .max(1),
            unlock_check_delay: self
                .unlock_check_delay_ms
                .map(ms)
                .unwrap_or(DEFAULT_UNLOCK_CHECK_DELAY),
        }
    }
}
