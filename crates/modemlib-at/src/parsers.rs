//! Parsers for the standard 3GPP TS 27.007 reply grammars.
//!
//! Every parser takes the reply text returned by the port (final result code
//! already removed) and produces a typed value, or [`Error::Parse`] when the
//! text does not match the grammar.

use std::sync::LazyLock;

use regex::Regex;

use modemlib_core::error::{Error, Result};
use modemlib_core::helpers::{CSQ_UNKNOWN, csq_to_percent};
use modemlib_core::types::{
    AccessTech, CdmaRegistrationState, ModemLock, PowerState, RegistrationDomain,
    RegistrationInfo, RegistrationState3gpp,
};

// ---------------------------------------------------------------------------
// Small helpers
// ---------------------------------------------------------------------------

/// Remove a leading `tag` (if present) and any whitespace after it.
///
/// ```
/// use modemlib_at::parsers::strip_tag;
///
/// assert_eq!(strip_tag("+CSQ: 17,99", "+CSQ:"), "17,99");
/// assert_eq!(strip_tag("17,99", "+CSQ:"), "17,99");
/// ```
pub fn strip_tag<'a>(reply: &'a str, tag: &str) -> &'a str {
    reply.strip_prefix(tag).unwrap_or(reply).trim_start()
}

/// Remove one pair of surrounding double quotes.
pub fn unquote(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

/// Parse the leading digits of `s` in `radix`, after stripping quotes.
///
/// Mirrors `strtol`: trailing garbage is ignored, an empty or non-numeric
/// string yields `None`.
fn parse_leading(s: &str, radix: u32) -> Option<u32> {
    let s = s.trim().trim_start_matches('"');
    let s = s.split('"').next().unwrap_or("");
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_digit(radix))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    u32::from_str_radix(&s[..end], radix).ok()
}

// ---------------------------------------------------------------------------
// +CREG / +CGREG
// ---------------------------------------------------------------------------

const CREG1: &str = r"\+(CREG|CGREG):\s*(\d{1})";
const CREG2: &str = r"\+(CREG|CGREG):\s*(\d{1}),\s*(\d{1})";
const CREG3: &str = r"\+(CREG|CGREG):\s*(\d{1}),\s*([^,\s]*)\s*,\s*([^,\s]*)";
const CREG4: &str = r"\+(CREG|CGREG):\s*(\d{1}),\s*(\d{1})\s*,\s*([^,\s]*)\s*,\s*([^,\s]*)";
const CREG5: &str = r"\+(CREG|CGREG):\s*(\d{1})\s*,\s*([^,\s]*)\s*,\s*([^,\s]*)\s*,\s*(\d{1,2})";
const CREG6: &str =
    r"\+(CREG|CGREG):\s*(\d{1}),\s*(\d{1})\s*,\s*([^,\s]*)\s*,\s*([^,\s]*)\s*,\s*(\d{1,2})";

const CREG_SHAPES: [&str; 6] = [CREG1, CREG2, CREG3, CREG4, CREG5, CREG6];

static CREG_SOLICITED: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    CREG_SHAPES
        .iter()
        .map(|p| Regex::new(&format!("{p}$")).expect("static regex"))
        .collect()
});

/// The six `+CREG`/`+CGREG` URC shapes, framed by `<CR><LF>`, for
/// registration on an AT port.
pub fn creg_unsolicited_patterns() -> Vec<regex::bytes::Regex> {
    CREG_SHAPES
        .iter()
        .map(|p| regex::bytes::Regex::new(&format!(r"\r\n{p}\r\n")).expect("static regex"))
        .collect()
}

/// Parse a solicited `+CREG?` / `+CGREG?` reply.
pub fn parse_creg_response(reply: &str) -> Result<RegistrationInfo> {
    let reply = reply.trim();
    for re in CREG_SOLICITED.iter() {
        if let Some(caps) = re.captures(reply) {
            let groups: Vec<Option<&str>> =
                caps.iter().map(|g| g.map(|m| m.as_str())).collect();
            return parse_creg_groups(&groups);
        }
    }
    Err(Error::Parse(format!("unknown registration reply: {reply:?}")))
}

/// Interpret the capture groups of any CREG shape (group 0 first, group 1
/// the command name).
///
/// The group count identifies the shape, except for the two five-group
/// shapes `<stat>,<lac>,<ci>,<AcT>` and `<n>,<stat>,<lac>,<ci>`: there a
/// third group that is quoted or longer than one character is a LAC.
pub fn parse_creg_groups(groups: &[Option<&str>]) -> Result<RegistrationInfo> {
    let domain = match groups.get(1).copied().flatten() {
        Some(name) if name.contains("CGREG") => RegistrationDomain::Ps,
        _ => RegistrationDomain::Cs,
    };

    let (istat, ilac, ici, iact) = match groups.len() {
        3 => (2, None, None, None),
        4 => (3, None, None, None),
        5 => (2, Some(3), Some(4), None),
        6 => {
            let third = groups[3].unwrap_or("");
            if third.contains('"') || third.len() > 1 {
                (2, Some(3), Some(4), Some(5))
            } else {
                (3, Some(4), Some(5), None)
            }
        }
        7 => (3, Some(4), Some(5), Some(6)),
        n => return Err(Error::Parse(format!("unexpected CREG group count {n}"))),
    };

    let field = |i: usize| groups.get(i).copied().flatten();

    let stat = field(istat)
        .and_then(|s| parse_leading(s, 10))
        .and_then(|s| u8::try_from(s).ok())
        .and_then(RegistrationState3gpp::from_stat)
        .ok_or_else(|| Error::Parse("could not parse the registration status".into()))?;

    let in_range = |v: Option<u32>, lo: u32, hi: u32| v.filter(|v| (lo..=hi).contains(v));

    let lac = ilac
        .and_then(|i| in_range(field(i).and_then(|s| parse_leading(s, 16)), 1, 0xFFFF))
        .unwrap_or(0);
    let cell_id = ici
        .and_then(|i| in_range(field(i).and_then(|s| parse_leading(s, 16)), 1, 0x0FFF_FFFE))
        .unwrap_or(0);
    let act = iact.and_then(|i| in_range(field(i).and_then(|s| parse_leading(s, 10)), 0, 7));

    // Location and technology are meaningless while the state is unknown.
    if stat == RegistrationState3gpp::Unknown {
        return Ok(RegistrationInfo {
            state: stat,
            lac: 0,
            cell_id: 0,
            access_tech: AccessTech::empty(),
            domain,
        });
    }

    Ok(RegistrationInfo {
        state: stat,
        lac,
        cell_id,
        access_tech: act
            .map(access_tech_from_act)
            .unwrap_or_else(AccessTech::empty),
        domain,
    })
}

/// Map the 27.007 `<AcT>` field to an access technology.
pub fn access_tech_from_act(act: u32) -> AccessTech {
    match act {
        0 => AccessTech::GSM,
        1 => AccessTech::GSM_COMPACT,
        2 => AccessTech::UMTS,
        3 => AccessTech::EDGE,
        4 => AccessTech::HSDPA,
        5 => AccessTech::HSUPA,
        6 => AccessTech::HSPA,
        7 => AccessTech::LTE,
        _ => AccessTech::empty(),
    }
}

/// Better technologies first: "GPRS/EDGE" must read as EDGE.
const ACCESS_TECH_NAMES: &[(&str, AccessTech)] = &[
    ("HSPA", AccessTech::HSPA),
    ("HSDPA/HSUPA", AccessTech::HSPA),
    ("HSUPA", AccessTech::HSUPA),
    ("HSDPA", AccessTech::HSDPA),
    ("UMTS", AccessTech::UMTS),
    ("EDGE", AccessTech::EDGE),
    ("GPRS", AccessTech::GPRS),
    ("GSM", AccessTech::GSM),
];

/// Access technology named in free text, case-insensitive.
pub fn access_tech_from_string(s: &str) -> AccessTech {
    let upper = s.to_ascii_uppercase();
    ACCESS_TECH_NAMES
        .iter()
        .find(|(name, _)| upper.contains(name))
        .map(|(_, tech)| *tech)
        .unwrap_or_else(AccessTech::empty)
}

// ---------------------------------------------------------------------------
// +CSQ / +CIND
// ---------------------------------------------------------------------------

static CSQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+CSQ:\s*(\d+)\s*,\s*(\d+)").expect("static regex"));

/// Parse `+CSQ: <rssi>,<ber>` into a percentage.
///
/// An RSSI of 99 means no signal is detectable and is reported as the
/// `NO_NETWORK` equipment error.
pub fn parse_csq(reply: &str) -> Result<u8> {
    let caps = CSQ_RE
        .captures(reply)
        .ok_or_else(|| Error::Parse(format!("could not parse signal quality: {reply:?}")))?;
    let rssi: u32 = caps[1]
        .parse()
        .map_err(|_| Error::Parse("bad CSQ rssi".into()))?;
    if rssi == CSQ_UNKNOWN {
        return Err(Error::MobileEquipment(
            modemlib_core::MobileEquipmentError::NO_NETWORK,
        ));
    }
    csq_to_percent(rssi).ok_or_else(|| Error::Parse("bad CSQ rssi".into()))
}

static CIND_TEST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\(\s*"([^"]+)"\s*,\s*\(([^)]*)\)\s*\)"#).expect("static regex"));

/// Find the 1-based position of `name` in a `+CIND=?` reply.
pub fn parse_cind_test(reply: &str, name: &str) -> Option<usize> {
    CIND_TEST_RE
        .captures_iter(reply)
        .position(|caps| caps[1].eq_ignore_ascii_case(name))
        .map(|i| i + 1)
}

/// Values of a `+CIND?` reply, in indicator order.
pub fn parse_cind_query(reply: &str) -> Result<Vec<u32>> {
    let body = strip_tag(reply.trim(), "+CIND:");
    body.split(',')
        .map(|v| {
            v.trim()
                .parse()
                .map_err(|_| Error::Parse(format!("bad CIND value {v:?}")))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// +CPIN / +CFUN / +CNUM
// ---------------------------------------------------------------------------

/// Longer names first so a prefix match never picks a shorter lock.
const CPIN_LOCKS: &[(&str, ModemLock)] = &[
    ("READY", ModemLock::None),
    ("SIM PIN2", ModemLock::SimPin2),
    ("SIM PUK2", ModemLock::SimPuk2),
    ("SIM PIN", ModemLock::SimPin),
    ("SIM PUK", ModemLock::SimPuk),
    ("PH-NETSUB PIN", ModemLock::PhNetsubPin),
    ("PH-NETSUB PUK", ModemLock::PhNetsubPuk),
    ("PH-FSIM PIN", ModemLock::PhFsimPin),
    ("PH-FSIM PUK", ModemLock::PhFsimPuk),
    ("PH-CORP PIN", ModemLock::PhCorpPin),
    ("PH-CORP PUK", ModemLock::PhCorpPuk),
    ("PH-SIM PIN", ModemLock::PhSimPin),
    ("PH-NET PIN", ModemLock::PhNetPin),
    ("PH-NET PUK", ModemLock::PhNetPuk),
    ("PH-SP PIN", ModemLock::PhSpPin),
    ("PH-SP PUK", ModemLock::PhSpPuk),
];

/// Parse a `+CPIN?` reply. Unrecognized text yields [`ModemLock::Unknown`].
pub fn parse_cpin(reply: &str) -> ModemLock {
    let Some(pos) = reply.find("+CPIN: ") else {
        return ModemLock::Unknown;
    };
    let rest = &reply[pos + 7..];
    // Some phones quote the value.
    let rest = rest.strip_prefix('"').unwrap_or(rest);
    CPIN_LOCKS
        .iter()
        .find(|(prefix, _)| rest.starts_with(prefix))
        .map(|(_, lock)| *lock)
        .unwrap_or(ModemLock::Unknown)
}

/// Parse `+CFUN: <fun>`.
pub fn parse_cfun(reply: &str) -> Result<PowerState> {
    let body = strip_tag(reply.trim(), "+CFUN:");
    let fun = parse_leading(body, 10)
        .ok_or_else(|| Error::Parse(format!("could not parse power state: {reply:?}")))?;
    match fun {
        0 => Ok(PowerState::Off),
        1 => Ok(PowerState::On),
        4 => Ok(PowerState::Low),
        other => Err(Error::Parse(format!("unhandled power state {other}"))),
    }
}

static CNUM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\+CNUM:\s*(?:"[^"]*"|[^,]*)\s*,\s*"([^"]*)"\s*,\s*(\d+)"#).expect("static regex")
});

/// Numbers listed in a `+CNUM` reply, empty entries skipped.
pub fn parse_cnum(reply: &str) -> Vec<String> {
    CNUM_RE
        .captures_iter(reply)
        .map(|caps| caps[1].trim().to_string())
        .filter(|n| !n.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// CDMA
// ---------------------------------------------------------------------------

/// Parse Sprint `+SPSERVICE: <n>` into (1x, EVDO) registration states.
pub fn parse_spservice(
    reply: &str,
) -> Result<(CdmaRegistrationState, CdmaRegistrationState)> {
    use CdmaRegistrationState::{Registered, Unknown};

    let body = strip_tag(reply.trim(), "+SPSERVICE:");
    match parse_leading(body, 10) {
        Some(0) => Ok((Unknown, Unknown)),
        Some(1) => Ok((Registered, Unknown)),
        Some(2) | Some(3) => Ok((Unknown, Registered)),
        _ => Err(Error::Parse(format!("unknown service indication: {reply:?}"))),
    }
}

/// Parse `+CAD: <n>`: `true` when CDMA service is available.
pub fn parse_cad(reply: &str) -> Result<bool> {
    let body = strip_tag(reply.trim(), "+CAD:");
    parse_leading(body, 10)
        .map(|n| n == 1)
        .ok_or_else(|| Error::Parse(format!("could not parse +CAD reply: {reply:?}")))
}
