//! Signal quality normalization helpers.
//!
//! Every vendor reports signal strength on its own raw scale. These helpers
//! turn a raw value into the 0..=100 percentage exposed by the modem object
//! using the same clamp-then-rescale transform everywhere, so that a given
//! raw reading always maps to the same percentage.

/// Raw value reported by `+CSQ` when the signal is not known or detectable.
pub const CSQ_UNKNOWN: u32 = 99;

/// Upper bound of the `+CSQ` `<rssi>` scale.
pub const CSQ_MAX: u32 = 31;

/// Clamp `raw` to `0..=hi` and rescale it to a percentage.
///
/// Integer arithmetic truncates, so `hi` maps to exactly 100 and values
/// just below it round down.
///
/// # Example
///
/// ```
/// use modemlib_core::normalize_signal;
///
/// assert_eq!(normalize_signal(-4, 31), 0);
/// assert_eq!(normalize_signal(31, 31), 100);
/// assert_eq!(normalize_signal(50, 31), 100);
/// assert_eq!(normalize_signal(15, 31), 48);
/// ```
pub fn normalize_signal(raw: i64, hi: i64) -> u8 {
    if hi <= 0 {
        return 0;
    }
    let clamped = raw.clamp(0, hi);
    (clamped * 100 / hi) as u8
}

/// Convert a `+CSQ` `<rssi>` value to a percentage.
///
/// Returns `None` for [`CSQ_UNKNOWN`].
pub fn csq_to_percent(rssi: u32) -> Option<u8> {
    if rssi == CSQ_UNKNOWN {
        return None;
    }
    Some(normalize_signal(i64::from(rssi), i64::from(CSQ_MAX)))
}

/// Convert a `+CIND` signal indicator (0..=5) to a percentage.
pub fn cind_to_percent(level: u32) -> u8 {
    (i64::from(level).clamp(0, 5) * 20) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_below_low_bound_is_zero() {
        assert_eq!(normalize_signal(-1, 31), 0);
        assert_eq!(normalize_signal(i64::MIN, 63), 0);
    }

    #[test]
    fn normalize_at_or_above_high_bound_is_full() {
        assert_eq!(normalize_signal(31, 31), 100);
        assert_eq!(normalize_signal(97, 97), 100);
        assert_eq!(normalize_signal(500, 96), 100);
    }

    #[test]
    fn normalize_is_monotonic() {
        for hi in [31, 63, 96, 97] {
            let mut previous = 0;
            for raw in 0..=hi {
                let pct = normalize_signal(raw, hi);
                assert!(pct >= previous, "hi={hi} raw={raw}");
                previous = pct;
            }
        }
    }

    #[test]
    fn normalize_degenerate_bound() {
        assert_eq!(normalize_signal(10, 0), 0);
    }

    #[test]
    fn csq_percentages() {
        assert_eq!(csq_to_percent(0), Some(0));
        assert_eq!(csq_to_percent(20), Some(64));
        assert_eq!(csq_to_percent(31), Some(100));
        assert_eq!(csq_to_percent(99), None);
    }

    #[test]
    fn cind_percentages() {
        assert_eq!(cind_to_percent(0), 0);
        assert_eq!(cind_to_percent(3), 60);
        assert_eq!(cind_to_percent(9), 100);
    }
}
