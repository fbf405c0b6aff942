//! Core types used throughout modemlib.
//!
//! These types give a vendor-agnostic view of a cellular modem: the
//! capability state machines (power, lock, registration, bearer) and the
//! values they carry (access technologies, mode combinations, bands, IP
//! configuration).

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// What a port is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortRole {
    /// Serves synchronous AT transactions and most unsolicited messages.
    Primary,
    /// Auxiliary AT port; unsolicited messages only unless the primary is busy.
    Secondary,
    /// Carries the PPP/data session once a bearer is connected.
    Data,
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PortRole::Primary => "primary",
            PortRole::Secondary => "secondary",
            PortRole::Data => "data",
        };
        write!(f, "{s}")
    }
}

/// Identity of a port owned by a modem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortInfo {
    /// Device name, e.g. `"ttyUSB2"`.
    pub name: String,
    pub role: PortRole,
}

// ---------------------------------------------------------------------------
// Modes and access technologies
// ---------------------------------------------------------------------------

bitflags! {
    /// Radio generations a modem may be allowed to use.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ModemMode: u32 {
        /// Circuit-switched only (voice, SMS).
        const CS = 1 << 0;
        const MODE_2G = 1 << 1;
        const MODE_3G = 1 << 2;
        const MODE_4G = 1 << 3;
    }
}

impl ModemMode {
    /// Marker used as "no preference" in a [`ModeCombination`].
    pub const NONE: ModemMode = ModemMode::empty();
}

impl fmt::Display for ModemMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let mut parts = Vec::new();
        if self.contains(ModemMode::CS) {
            parts.push("cs");
        }
        if self.contains(ModemMode::MODE_2G) {
            parts.push("2g");
        }
        if self.contains(ModemMode::MODE_3G) {
            parts.push("3g");
        }
        if self.contains(ModemMode::MODE_4G) {
            parts.push("4g");
        }
        write!(f, "{}", parts.join("|"))
    }
}

/// Error returned when a string cannot be parsed into a [`ModemMode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseModeError(String);

impl fmt::Display for ParseModeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown modem mode: {}", self.0)
    }
}

impl std::error::Error for ParseModeError {}

impl FromStr for ModemMode {
    type Err = ParseModeError;

    /// Parses `|`-separated generations, e.g. `"2g|3g"`, or `"none"`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("none") || s.is_empty() {
            return Ok(ModemMode::NONE);
        }
        let mut mode = ModemMode::empty();
        for part in s.split('|') {
            mode |= match part.trim().to_ascii_lowercase().as_str() {
                "cs" => ModemMode::CS,
                "2g" => ModemMode::MODE_2G,
                "3g" => ModemMode::MODE_3G,
                "4g" => ModemMode::MODE_4G,
                _ => return Err(ParseModeError(s.to_string())),
            };
        }
        Ok(mode)
    }
}

/// An allowed set of modes plus the preferred one among them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModeCombination {
    pub allowed: ModemMode,
    /// [`ModemMode::NONE`] when there is no preference.
    pub preferred: ModemMode,
}

impl ModeCombination {
    pub fn new(allowed: ModemMode, preferred: ModemMode) -> Self {
        ModeCombination { allowed, preferred }
    }
}

impl fmt::Display for ModeCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "allowed: {}; preferred: {}", self.allowed, self.preferred)
    }
}

bitflags! {
    /// Access technologies the modem is currently using.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AccessTech: u32 {
        const POTS = 1 << 0;
        const GSM = 1 << 1;
        const GSM_COMPACT = 1 << 2;
        const GPRS = 1 << 3;
        const EDGE = 1 << 4;
        const UMTS = 1 << 5;
        const HSDPA = 1 << 6;
        const HSUPA = 1 << 7;
        const HSPA = 1 << 8;
        const HSPA_PLUS = 1 << 9;
        const CDMA_1XRTT = 1 << 10;
        const EVDO_0 = 1 << 11;
        const EVDO_A = 1 << 12;
        const EVDO_B = 1 << 13;
        const LTE = 1 << 14;
    }
}

impl AccessTech {
    /// Technologies reported through the 3GPP registration interface.
    pub const MASK_3GPP: AccessTech = AccessTech::GSM
        .union(AccessTech::GSM_COMPACT)
        .union(AccessTech::GPRS)
        .union(AccessTech::EDGE)
        .union(AccessTech::UMTS)
        .union(AccessTech::HSDPA)
        .union(AccessTech::HSUPA)
        .union(AccessTech::HSPA)
        .union(AccessTech::HSPA_PLUS)
        .union(AccessTech::LTE);

    /// Technologies reported through the CDMA registration interface.
    pub const MASK_CDMA: AccessTech = AccessTech::CDMA_1XRTT
        .union(AccessTech::EVDO_0)
        .union(AccessTech::EVDO_A)
        .union(AccessTech::EVDO_B);
}

impl fmt::Display for AccessTech {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "unknown");
        }
        let names: Vec<&str> = self
            .iter_names()
            .map(|(name, _)| name)
            .collect();
        write!(f, "{}", names.join(", ").to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// 3GPP (CS or PS) network registration state, as reported by `+CREG`/`+CGREG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistrationState3gpp {
    /// Not registered, not searching.
    Idle,
    /// Registered on the home network.
    Home,
    /// Not registered, searching for a network.
    Searching,
    /// Registration denied.
    Denied,
    #[default]
    Unknown,
    /// Registered on a roaming network.
    Roaming,
}

impl RegistrationState3gpp {
    /// Map the numeric `<stat>` field (0..=5) to a state.
    pub fn from_stat(stat: u8) -> Option<Self> {
        match stat {
            0 => Some(Self::Idle),
            1 => Some(Self::Home),
            2 => Some(Self::Searching),
            3 => Some(Self::Denied),
            4 => Some(Self::Unknown),
            5 => Some(Self::Roaming),
            _ => None,
        }
    }

    /// `true` when registered on home or roaming network.
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Home | Self::Roaming)
    }
}

impl fmt::Display for RegistrationState3gpp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Home => "home",
            Self::Searching => "searching",
            Self::Denied => "denied",
            Self::Unknown => "unknown",
            Self::Roaming => "roaming",
        };
        write!(f, "{s}")
    }
}

/// CDMA registration state, tracked separately for 1x and EVDO.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CdmaRegistrationState {
    #[default]
    Unknown,
    /// Registered, home/roaming not determined.
    Registered,
    Home,
    Roaming,
}

impl CdmaRegistrationState {
    pub fn is_registered(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

impl fmt::Display for CdmaRegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Registered => "registered",
            Self::Home => "home",
            Self::Roaming => "roaming",
        };
        write!(f, "{s}")
    }
}

/// Which registration family a value belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RegistrationDomain {
    /// Circuit-switched 3GPP (`+CREG`).
    Cs,
    /// Packet-switched 3GPP (`+CGREG`).
    Ps,
}

/// A fully parsed `+CREG`/`+CGREG` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationInfo {
    pub state: RegistrationState3gpp,
    /// Location area code, `0` when not reported.
    pub lac: u32,
    /// Cell id, `0` when not reported.
    pub cell_id: u32,
    /// Access technology derived from `<AcT>`, empty when not reported.
    pub access_tech: AccessTech,
    pub domain: RegistrationDomain,
}

// ---------------------------------------------------------------------------
// Power, lock, lifecycle
// ---------------------------------------------------------------------------

/// Radio power state (`+CFUN`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    #[default]
    Unknown,
    /// Radio and SIM powered off (`+CFUN=0`).
    Off,
    /// Low-power / flight mode (`+CFUN=4`).
    Low,
    /// Full functionality (`+CFUN=1`).
    On,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PowerState::Unknown => "unknown",
            PowerState::Off => "off",
            PowerState::Low => "low",
            PowerState::On => "on",
        };
        write!(f, "{s}")
    }
}

/// Error returned when a string cannot be parsed into a [`PowerState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePowerStateError(String);

impl fmt::Display for ParsePowerStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown power state: {}", self.0)
    }
}

impl std::error::Error for ParsePowerStateError {}

impl FromStr for PowerState {
    type Err = ParsePowerStateError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" => Ok(PowerState::On),
            "low" => Ok(PowerState::Low),
            "off" => Ok(PowerState::Off),
            _ => Err(ParsePowerStateError(s.to_string())),
        }
    }
}

/// Lock that must be released before the modem can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModemLock {
    #[default]
    Unknown,
    /// No lock, the SIM is ready.
    None,
    SimPin,
    SimPin2,
    SimPuk,
    SimPuk2,
    PhSpPin,
    PhSpPuk,
    PhNetPin,
    PhNetPuk,
    PhSimPin,
    PhCorpPin,
    PhCorpPuk,
    PhFsimPin,
    PhFsimPuk,
    PhNetsubPin,
    PhNetsubPuk,
}

impl fmt::Display for ModemLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModemLock::Unknown => "unknown",
            ModemLock::None => "none",
            ModemLock::SimPin => "sim-pin",
            ModemLock::SimPin2 => "sim-pin2",
            ModemLock::SimPuk => "sim-puk",
            ModemLock::SimPuk2 => "sim-puk2",
            ModemLock::PhSpPin => "ph-sp-pin",
            ModemLock::PhSpPuk => "ph-sp-puk",
            ModemLock::PhNetPin => "ph-net-pin",
            ModemLock::PhNetPuk => "ph-net-puk",
            ModemLock::PhSimPin => "ph-sim-pin",
            ModemLock::PhCorpPin => "ph-corp-pin",
            ModemLock::PhCorpPuk => "ph-corp-puk",
            ModemLock::PhFsimPin => "ph-fsim-pin",
            ModemLock::PhFsimPuk => "ph-fsim-puk",
            ModemLock::PhNetsubPin => "ph-netsub-pin",
            ModemLock::PhNetsubPuk => "ph-netsub-puk",
        };
        write!(f, "{s}")
    }
}

/// Overall lifecycle state of a modem object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModemState {
    /// A port stopped answering; the modem is unusable.
    Failed,
    #[default]
    Unknown,
    /// Waiting for a SIM PIN/PUK.
    Locked,
    Disabled,
    Disabling,
    Enabling,
    Enabled,
    Searching,
    Registered,
    Connected,
}

impl fmt::Display for ModemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ModemState::Failed => "failed",
            ModemState::Unknown => "unknown",
            ModemState::Locked => "locked",
            ModemState::Disabled => "disabled",
            ModemState::Disabling => "disabling",
            ModemState::Enabling => "enabling",
            ModemState::Enabled => "enabled",
            ModemState::Searching => "searching",
            ModemState::Registered => "registered",
            ModemState::Connected => "connected",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Bands
// ---------------------------------------------------------------------------

/// Radio frequency band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModemBand {
    Unknown,
    Egsm,
    Dcs,
    Pcs,
    G850,
    G450,
    G480,
    G750,
    Utran1,
    Utran2,
    Utran3,
    Utran4,
    Utran5,
    Utran6,
    CdmaBc0,
    CdmaBc1,
    CdmaBc2,
    CdmaBc3,
    CdmaBc4,
    CdmaBc5,
    CdmaBc6,
    CdmaBc7,
    CdmaBc8,
    CdmaBc9,
    CdmaBc10,
    CdmaBc11,
}

impl fmt::Display for ModemBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format!("{self:?}").to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Bearers
// ---------------------------------------------------------------------------

/// Connection status of a bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BearerStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl fmt::Display for BearerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BearerStatus::Disconnected => "disconnected",
            BearerStatus::Connecting => "connecting",
            BearerStatus::Connected => "connected",
            BearerStatus::Disconnecting => "disconnecting",
        };
        write!(f, "{s}")
    }
}

/// IP family requested for a packet data context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpFamily {
    #[default]
    Ipv4,
    Ipv6,
    Ipv4v6,
}

impl IpFamily {
    /// PDP type string used in `+CGDCONT`.
    pub fn pdp_type(&self) -> &'static str {
        match self {
            IpFamily::Ipv4 => "IP",
            IpFamily::Ipv6 => "IPV6",
            IpFamily::Ipv4v6 => "IPV4V6",
        }
    }
}

/// Authentication protocols allowed for a bearer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllowedAuth {
    #[default]
    Any,
    None,
    Pap,
    Chap,
}

/// How the host obtains its IP configuration once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpMethod {
    #[default]
    Unknown,
    /// Run PPP over the data port.
    Ppp,
    /// Addresses reported by the modem.
    Static,
    /// Run DHCP on the network interface.
    Dhcp,
}

/// Requested connection properties of a bearer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BearerProperties {
    /// Access point name (3GPP only).
    pub apn: Option<String>,
    pub ip_type: IpFamily,
    pub allowed_auth: AllowedAuth,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Whether the bearer may connect while roaming.
    pub allow_roaming: bool,
    /// Number to dial instead of the default.
    pub number: Option<String>,
}

/// IP configuration of a connected bearer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct IpConfig {
    pub method: IpMethod,
    pub address: Option<String>,
    pub prefix: u32,
    pub dns: Vec<String>,
    pub gateway: Option<String>,
    /// `0` when not reported.
    pub mtu: u32,
}

impl IpConfig {
    /// Configuration for a PPP session: everything is negotiated later.
    pub fn ppp() -> Self {
        IpConfig {
            method: IpMethod::Ppp,
            ..Default::default()
        }
    }
}

/// Result of a successful bearer connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ConnectResult {
    pub ipv4: Option<IpConfig>,
    pub ipv6: Option<IpConfig>,
    /// Name of the port carrying the data session.
    pub data_port: Option<String>,
}

/// Connection statistics of a bearer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct BearerStats {
    /// Duration of the current (or last) connection.
    pub duration: Duration,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    /// Connection attempts, successful or not.
    pub attempts: u32,
    pub failed_attempts: u32,
    /// Accumulated duration across all connections.
    pub total_duration: Duration,
}

// ---------------------------------------------------------------------------
// Unlock retries
// ---------------------------------------------------------------------------

/// Immutable snapshot of the remaining unlock attempts per lock kind.
///
/// Created fresh on every query; a lock missing from the snapshot was not
/// reported by the modem.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UnlockRetries {
    entries: Vec<(ModemLock, u32)>,
}

impl UnlockRetries {
    pub fn new() -> Self {
        UnlockRetries::default()
    }

    /// Builder-style insert. A second value for the same lock replaces the first.
    pub fn with(mut self, lock: ModemLock, retries: u32) -> Self {
        match self.entries.iter_mut().find(|(l, _)| *l == lock) {
            Some(entry) => entry.1 = retries,
            None => self.entries.push((lock, retries)),
        }
        self
    }

    /// Remaining attempts for `lock`, if reported.
    pub fn get(&self, lock: ModemLock) -> Option<u32> {
        self.entries
            .iter()
            .find(|(l, _)| *l == lock)
            .map(|(_, n)| *n)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ModemLock, u32)> + '_ {
        self.entries.iter().copied()
    }
}

impl fmt::Display for UnlockRetries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .entries
            .iter()
            .map(|(lock, n)| format!("{lock} ({n})"))
            .collect();
        write!(f, "{}", parts.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
