//! Novatel LTE proprietary command parsers and response processors.
//!
//! # Novatel command reference
//!
//! - `$NWMDN` -- mobile directory number, the CDMA side's own number.
//! - `$NWPINR?` -- remaining attempts for the PIN currently asked for.
//! - `$NWSYSMODE` -- free-text description of the serving technologies.
//! - `$NWBAND?` -- enabled bands as a 32-bit hexadecimal mask.

use std::sync::LazyLock;

use regex::Regex;

use modemlib_at::parsers::{parse_cnum, strip_tag};
use modemlib_at::sequence::{StepOutcome, ignore_at_errors};
use modemlib_core::error::{Error, Result};
use modemlib_core::types::{AccessTech, ModemBand, ModemLock, UnlockRetries};

// ---------------------------------------------------------------
// Own numbers
// ---------------------------------------------------------------

/// `+CNUM` step: finish with the numbers, or continue when none are listed.
pub fn cnum_ignore_at_errors(
    command: &str,
    result: Result<String>,
    last: bool,
) -> StepOutcome<Vec<String>> {
    match result {
        Ok(reply) => {
            let numbers = parse_cnum(&reply);
            if numbers.is_empty() {
                StepOutcome::Continue
            } else {
                StepOutcome::Success(Some(numbers))
            }
        }
        Err(e) => ignore_at_errors(command, e, last),
    }
}

/// `$NWMDN` step: the reply body is the number.
pub fn nwmdn_ignore_at_errors(
    command: &str,
    result: Result<String>,
    last: bool,
) -> StepOutcome<Vec<String>> {
    match result {
        Ok(reply) => {
            let mdn = strip_tag(reply.trim(), "$NWMDN:").trim().to_string();
            StepOutcome::Success(Some(vec![mdn]))
        }
        Err(e) => ignore_at_errors(command, e, last),
    }
}

// ---------------------------------------------------------------
// Unlock retries
// ---------------------------------------------------------------

static NWPINR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^PIN(\d+),\s*(\d+)").expect("static regex"));

/// Parse `$NWPINR: PIN<n>, <count>` where `n` is 1 or 2.
pub fn parse_nwpinr(reply: &str) -> Result<UnlockRetries> {
    let body = strip_tag(reply.trim(), "$NWPINR:");
    let invalid = || Error::Parse(format!("invalid unlock retries response: {body:?}"));
    let caps = NWPINR_RE.captures(body).ok_or_else(invalid)?;
    let count: u32 = caps[2].parse().map_err(|_| invalid())?;
    let lock = match &caps[1] {
        "1" => ModemLock::SimPin,
        "2" => ModemLock::SimPin2,
        _ => return Err(invalid()),
    };
    Ok(UnlockRetries::new().with(lock, count))
}

// ---------------------------------------------------------------
// Access technologies
// ---------------------------------------------------------------

/// Substrings of a `$NWSYSMODE` reply and the technology each names.
const SYSMODE_TABLE: [(&str, AccessTech); 6] = [
    ("LTE", AccessTech::LTE),
    ("WCDMA", AccessTech::UMTS),
    ("EV-DO Rev 0", AccessTech::EVDO_0),
    ("EV-DO Rev A", AccessTech::EVDO_A),
    ("CDMA 1X", AccessTech::CDMA_1XRTT),
    ("GSM", AccessTech::GSM),
];

/// Union of every technology named in a `$NWSYSMODE` reply.
pub fn parse_nwsysmode(reply: &str) -> AccessTech {
    SYSMODE_TABLE
        .iter()
        .filter(|(needle, _)| reply.contains(needle))
        .fold(AccessTech::empty(), |acc, (_, tech)| acc | *tech)
}

// ---------------------------------------------------------------
// Bands
// ---------------------------------------------------------------

/// Band for each bit of the `$NWBAND` mask, as listed by `$NWBAND=?`.
/// Bits without a matching band (P-GSM, railways, reserved) are `Unknown`.
pub const BAND_BITS: [ModemBand; 32] = [
    ModemBand::CdmaBc0, // 00 CDMA2000 BC0, A-System
    ModemBand::CdmaBc0, // 01 CDMA2000 BC0, B-System
    ModemBand::CdmaBc1,
    ModemBand::CdmaBc2,
    ModemBand::CdmaBc3,
    ModemBand::CdmaBc4,
    ModemBand::CdmaBc5,
    ModemBand::Dcs,
    ModemBand::Egsm,
    ModemBand::Unknown, // 09 P-GSM
    ModemBand::CdmaBc6,
    ModemBand::CdmaBc7,
    ModemBand::CdmaBc8,
    ModemBand::CdmaBc9,
    ModemBand::CdmaBc10,
    ModemBand::CdmaBc11,
    ModemBand::G450,
    ModemBand::G480,
    ModemBand::G750,
    ModemBand::G850,
    ModemBand::Unknown, // 20 GSM 900 railways
    ModemBand::Pcs,
    ModemBand::Utran1,
    ModemBand::Utran2,
    ModemBand::Utran3,
    ModemBand::Utran4,
    ModemBand::Utran5,
    ModemBand::Utran6,
    ModemBand::Unknown,
    ModemBand::Unknown,
    ModemBand::Unknown,
    ModemBand::Unknown,
];

/// Every band the table knows. The CDMA BC0 entry appears twice, once per
/// system.
pub fn supported_bands() -> Vec<ModemBand> {
    BAND_BITS
        .iter()
        .copied()
        .filter(|b| *b != ModemBand::Unknown)
        .collect()
}

/// Parse `$NWBAND: <hex mask>` into the enabled bands.
///
/// Parsing stops at the first non-hex character; a reply without digits is
/// an empty mask.
pub fn parse_nwband(reply: &str) -> Vec<ModemBand> {
    let body = strip_tag(reply.trim(), "$NWBAND:");
    let body = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
        .unwrap_or(body);
    let digits: String = body.chars().take_while(|c| c.is_ascii_hexdigit()).collect();
    let mask = u32::from_str_radix(&digits, 16).unwrap_or(0);

    BAND_BITS
        .iter()
        .enumerate()
        .filter(|(i, band)| mask & (1 << i) != 0 && **band != ModemBand::Unknown)
        .map(|(_, band)| *band)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use modemlib_core::error::MobileEquipmentError;

    // ===============================================================
    // Own numbers
    // ===============================================================

    #[test]
    fn cnum_processor() {
        let reply = "+CNUM: \"\",\"+15551234567\",145".to_string();
        match cnum_ignore_at_errors("+CNUM", Ok(reply), false) {
            StepOutcome::Success(Some(numbers)) => assert_eq!(numbers, vec!["+15551234567"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            cnum_ignore_at_errors("+CNUM", Ok(String::new()), false),
            StepOutcome::Continue
        ));
        let cme = Error::MobileEquipment(MobileEquipmentError::UNKNOWN);
        assert!(matches!(
            cnum_ignore_at_errors("+CNUM", Err(cme), false),
            StepOutcome::Continue
        ));
        assert!(matches!(
            cnum_ignore_at_errors("+CNUM", Err(Error::Timeout), false),
            StepOutcome::Failure(Error::Timeout)
        ));
    }

    #[test]
    fn nwmdn_processor() {
        match nwmdn_ignore_at_errors("$NWMDN", Ok("$NWMDN: 5551234567".into()), true) {
            StepOutcome::Success(Some(numbers)) => assert_eq!(numbers, vec!["5551234567"]),
            other => panic!("unexpected {other:?}"),
        }
        let cme = Error::MobileEquipment(MobileEquipmentError::UNKNOWN);
        assert!(matches!(
            nwmdn_ignore_at_errors("$NWMDN", Err(cme), true),
            StepOutcome::Failure(_)
        ));
    }

    // ===============================================================
    // NWPINR
    // ===============================================================

    #[test]
    fn nwpinr_pin1_and_pin2() {
        let retries = parse_nwpinr("$NWPINR: PIN1, 3").unwrap();
        assert_eq!(retries.get(ModemLock::SimPin), Some(3));
        assert_eq!(retries.len(), 1);

        let retries = parse_nwpinr("$NWPINR: PIN2, 2").unwrap();
        assert_eq!(retries.get(ModemLock::SimPin2), Some(2));
    }

    #[test]
    fn nwpinr_rejects_other_pins() {
        assert!(parse_nwpinr("$NWPINR: PIN3, 3").is_err());
        assert!(parse_nwpinr("$NWPINR: PUK1, 10").is_err());
        assert!(parse_nwpinr("$NWPINR: PIN1").is_err());
    }

    // ===============================================================
    // NWSYSMODE
    // ===============================================================

    #[test]
    fn sysmode_table() {
        assert_eq!(parse_nwsysmode("$NWSYSMODE: LTE"), AccessTech::LTE);
        assert_eq!(parse_nwsysmode("$NWSYSMODE: WCDMA"), AccessTech::UMTS);
        assert_eq!(
            parse_nwsysmode("$NWSYSMODE: EV-DO Rev A, CDMA 1X"),
            AccessTech::EVDO_A | AccessTech::CDMA_1XRTT
        );
        assert_eq!(parse_nwsysmode("$NWSYSMODE: EV-DO Rev 0"), AccessTech::EVDO_0);
        assert_eq!(parse_nwsysmode("$NWSYSMODE: GSM"), AccessTech::GSM);
        assert_eq!(parse_nwsysmode("$NWSYSMODE: NO SERVICE"), AccessTech::empty());
    }

    // ===============================================================
    // NWBAND
    // ===============================================================

    #[test]
    fn supported_band_list() {
        let bands = supported_bands();
        assert_eq!(bands.len(), 26);
        assert!(!bands.contains(&ModemBand::Unknown));
        assert_eq!(bands.iter().filter(|b| **b == ModemBand::CdmaBc0).count(), 2);
    }

    #[test]
    fn nwband_mask() {
        // Bits 0, 7, 22 and 26.
        let bands = parse_nwband("$NWBAND: 4400081");
        assert_eq!(
            bands,
            vec![ModemBand::CdmaBc0, ModemBand::Dcs, ModemBand::Utran1, ModemBand::Utran5]
        );
    }

    #[test]
    fn nwband_skips_unknown_bits() {
        // Bits 9, 20 and 31 have no band.
        assert!(parse_nwband("$NWBAND: 80100200").is_empty());
        assert!(parse_nwband("$NWBAND: ").is_empty());
    }
}
