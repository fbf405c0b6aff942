//! AnyData proprietary status reports.
//!
//! AnyData CDMA modules report the 1x and EVDO radio state through
//! `*STATE?` and `*HSTATE?`. Both replies are comma separated and carry the
//! received power in dBm, which decides whether an idle radio counts as
//! registered.
//!
//! All functions are pure; the caller sends the commands.

use std::sync::LazyLock;

use regex::Regex;

use modemlib_at::parsers::strip_tag;

/// Received power at or below which an idle radio is treated as out of
/// service. Reported values range from -106 (worst) to about -20 (best).
pub const IDLE_NO_SERVICE_DBM: i32 = -105;

/// Data call and network status notifications the module emits on its own.
/// They carry nothing the modem state needs and are dropped on arrival.
pub const STATUS_URC_PATTERNS: [&str; 6] = [
    r"\r\n\*ACTIVE:(.*)\r\n",
    r"\r\n\*INACTIVE:(.*)\r\n",
    r"\r\n\*DORMANT:(.*)\r\n",
    r"\r\n\*OFFLINE:(.*)\r\n",
    r"\r\n\*REGREQ:(.*)\r\n",
    r"\r\n\*AUTHREQ:(.*)\r\n",
];

/// How a radio state code bears on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioVerdict {
    /// The radio is in service.
    Registered,
    /// No service; the coarse state is left alone.
    NoService,
    /// Code not in the table; treated as no service.
    Unknown(u32),
}

/// `*STATE: <channel>,<pn>,<sid>,<nid>,<state>,<rssi>,...`
#[derive(Debug, Clone, PartialEq)]
pub struct StateReport {
    pub channel: u32,
    pub pn: u32,
    pub sid: u32,
    pub nid: u32,
    /// 1x radio state: 0 no service, 1 idle, 2 access, 3 paging, 4 traffic.
    pub state: u32,
    pub dbm: i32,
}

/// `*HSTATE: <at state>,<session state>,<channel>,<pn>,<EcIo>,<rssi>,...`
#[derive(Debug, Clone, PartialEq)]
pub struct HstateReport {
    /// EVDO radio state: 0 no service, 1 acquisition, 2 sync, 3 idle,
    /// 4 access, 5 connect.
    pub at_state: u32,
    pub session_state: u32,
    pub channel: u32,
    pub pn: u32,
    pub ecio: String,
    pub dbm: i32,
}

static STATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*([^,)]*)\s*,")
        .expect("static regex")
});

static HSTATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*([^,)]*)\s*,\s*([^,)]*)\s*,")
        .expect("static regex")
});

/// Power is a whole number of dBm. A field that does not parse as one
/// (fractional values included) counts as 0 dBm, i.e. strong.
fn parse_dbm(field: &str) -> i32 {
    field.trim().parse().unwrap_or(0)
}

/// Parse a `*STATE?` reply. `None` when the reply has fewer fields than
/// expected.
pub fn parse_state(reply: &str) -> Option<StateReport> {
    let caps = STATE_RE.captures(strip_tag(reply.trim(), "*STATE:"))?;
    let num = |i: usize| caps[i].parse::<u32>().ok();
    Some(StateReport {
        channel: num(1)?,
        pn: num(2)?,
        sid: num(3)?,
        nid: num(4)?,
        state: num(5)?,
        dbm: parse_dbm(&caps[6]),
    })
}

/// Parse a `*HSTATE?` reply. `None` when the reply has fewer fields than
/// expected.
pub fn parse_hstate(reply: &str) -> Option<HstateReport> {
    let caps = HSTATE_RE.captures(strip_tag(reply.trim(), "*HSTATE:"))?;
    let num = |i: usize| caps[i].parse::<u32>().ok();
    Some(HstateReport {
        at_state: num(1)?,
        session_state: num(2)?,
        channel: num(3)?,
        pn: num(4)?,
        ecio: caps[5].trim().to_string(),
        dbm: parse_dbm(&caps[6]),
    })
}

impl StateReport {
    pub fn verdict(&self) -> RadioVerdict {
        match self.state {
            1 if self.dbm > IDLE_NO_SERVICE_DBM => RadioVerdict::Registered,
            1 | 0 => RadioVerdict::NoService,
            2..=4 => RadioVerdict::Registered,
            other => RadioVerdict::Unknown(other),
        }
    }
}

impl HstateReport {
    pub fn verdict(&self) -> RadioVerdict {
        match self.at_state {
            3 if self.dbm > IDLE_NO_SERVICE_DBM => RadioVerdict::Registered,
            0..=3 => RadioVerdict::NoService,
            4 | 5 => RadioVerdict::Registered,
            other => RadioVerdict::Unknown(other),
        }
    }
}
