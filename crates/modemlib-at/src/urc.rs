//! Unsolicited result code (URC) registry and dispatch.
//!
//! Each AT port owns one [`UrcRegistry`]: an ordered list of regex patterns,
//! each with an optional handler and an enabled flag. On every inbound chunk
//! the port task calls [`UrcRegistry::process`], which
//!
//! 1. evaluates every enabled pattern, in registration order, against an
//!    immutable view of the pending bytes,
//! 2. invokes the handler once per match with the capture groups, and
//! 3. removes all matched spans from the buffer afterwards.
//!
//! Patterns are expected to be mutually exclusive; if two do overlap both
//! handlers fire and the union of their spans is removed.
//!
//! A pattern registered with no handler still consumes its matches, which is
//! how vendor-specific status noise is swallowed before it can be mistaken
//! for a command reply. Registrations are never deleted: re-adding a pattern
//! replaces its handler in place, and [`UrcRegistry::set_enabled`] toggles it.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use regex::bytes::Regex;
use tracing::{debug, trace};

/// Capture groups of one URC match, decoded as lossy UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrcMatch {
    groups: Vec<Option<String>>,
}

impl UrcMatch {
    pub fn new(groups: Vec<Option<String>>) -> Self {
        UrcMatch { groups }
    }

    /// Group `i` (0 is the whole match), if it participated.
    pub fn get(&self, i: usize) -> Option<&str> {
        self.groups.get(i).and_then(|g| g.as_deref())
    }

    /// Group `i` parsed as an unsigned integer.
    pub fn get_u32(&self, i: usize) -> Option<u32> {
        self.get(i).and_then(|s| s.trim().parse().ok())
    }

    /// All groups as borrowed strings, group 0 first.
    pub fn groups(&self) -> Vec<Option<&str>> {
        self.groups.iter().map(|g| g.as_deref()).collect()
    }

    /// Number of groups including group 0.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Callback invoked for each URC match.
///
/// Handlers run synchronously on the port task and must not block; they
/// typically push a typed update into the modem status store.
pub type UrcHandler = Arc<dyn Fn(&UrcMatch) + Send + Sync>;

struct UrcEntry {
    regex: Regex,
    handler: Option<UrcHandler>,
    enabled: bool,
}

impl fmt::Debug for UrcEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrcEntry")
            .field("pattern", &self.regex.as_str())
            .field("has_handler", &self.handler.is_some())
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Ordered set of URC registrations for one port.
#[derive(Debug, Default)]
pub struct UrcRegistry {
    entries: Vec<UrcEntry>,
}

impl UrcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `regex` with `handler`, or replace the handler of an existing
    /// registration with the same pattern. The registration is enabled.
    pub fn add_handler(&mut self, regex: Regex, handler: Option<UrcHandler>) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.regex.as_str() == regex.as_str())
        {
            Some(entry) => {
                debug!(pattern = regex.as_str(), "replacing URC handler");
                entry.handler = handler;
                entry.enabled = true;
            }
            None => {
                debug!(pattern = regex.as_str(), "adding URC handler");
                self.entries.push(UrcEntry {
                    regex,
                    handler,
                    enabled: true,
                });
            }
        }
    }

    /// Enable or disable the registration for `pattern`.
    ///
    /// Idempotent. Returns `false` if no such pattern is registered.
    pub fn set_enabled(&mut self, pattern: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.regex.as_str() == pattern) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Enabled flag of `pattern`, or `None` if it is not registered.
    pub fn is_enabled(&self, pattern: &str) -> Option<bool> {
        self.entries
            .iter()
            .find(|e| e.regex.as_str() == pattern)
            .map(|e| e.enabled)
    }

    /// Whether `pattern` currently has a handler attached.
    pub fn has_handler(&self, pattern: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.regex.as_str() == pattern && e.handler.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every enabled pattern against `buf` and invoke handlers.
    ///
    /// Returns the matched byte ranges, sorted and merged. `buf` is not
    /// modified.
    pub fn dispatch(&self, buf: &[u8]) -> Vec<Range<usize>> {
        let mut spans = Vec::new();
        for entry in self.entries.iter().filter(|e| e.enabled) {
            for caps in entry.regex.captures_iter(buf) {
                let Some(whole) = caps.get(0) else {
                    continue;
                };
                if whole.is_empty() {
                    continue;
                }
                spans.push(whole.range());
                if let Some(handler) = &entry.handler {
                    let groups = caps
                        .iter()
                        .map(|g| g.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
                        .collect();
                    trace!(pattern = entry.regex.as_str(), "URC matched");
                    handler(&UrcMatch::new(groups));
                }
            }
        }
        merge_spans(spans)
    }

    /// Dispatch and then remove the matched spans from `buf`.
    ///
    /// Returns the number of bytes removed.
    pub fn process(&self, buf: &mut Vec<u8>) -> usize {
        if self.entries.is_empty() || buf.is_empty() {
            return 0;
        }
        let spans = self.dispatch(buf);
        let mut removed = 0;
        for span in spans.iter().rev() {
            removed += span.len();
            buf.drain(span.clone());
        }
        removed
    }
}

fn merge_spans(mut spans: Vec<Range<usize>>) -> Vec<Range<usize>> {
    spans.sort_by_key(|r| r.start);
    let mut merged: Vec<Range<usize>> = Vec::with_capacity(spans.len());
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.start <= last.end => {
                last.end = last.end.max(span.end);
            }
            _ => merged.push(span),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn re(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    fn recorder() -> (UrcHandler, Arc<Mutex<Vec<Vec<Option<String>>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let handler: UrcHandler = Arc::new(move |m: &UrcMatch| {
            seen2.lock().unwrap().push(m.groups.clone());
        });
        (handler, seen)
    }

    // =======================================================================
    // Registration
    // =======================================================================

    #[test]
    fn add_handler_appends_in_order() {
        let mut reg = UrcRegistry::new();
        reg.add_handler(re(r"\r\nRING\r\n"), None);
        reg.add_handler(re(r"\r\n\+CREG: (\d)\r\n"), None);
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.is_enabled(r"\r\nRING\r\n"), Some(true));
    }

    #[test]
    fn re_adding_replaces_in_place() {
        let mut reg = UrcRegistry::new();
        let (handler, _) = recorder();
        reg.add_handler(re(r"\r\nRING\r\n"), Some(handler));
        reg.set_enabled(r"\r\nRING\r\n", false);

        reg.add_handler(re(r"\r\nRING\r\n"), None);
        assert_eq!(reg.len(), 1);
        assert!(!reg.has_handler(r"\r\nRING\r\n"));
        assert_eq!(reg.is_enabled(r"\r\nRING\r\n"), Some(true));
    }

    #[test]
    fn toggle_is_idempotent() {
        let mut reg = UrcRegistry::new();
        reg.add_handler(re("X"), None);

        for sequence in [
            vec![false, false, true],
            vec![true, false, false],
            vec![false, true, true, false],
        ] {
            for enabled in &sequence {
                assert!(reg.set_enabled("X", *enabled));
            }
            assert_eq!(reg.is_enabled("X"), sequence.last().copied());
        }
    }

    #[test]
    fn toggle_unknown_pattern() {
        let mut reg = UrcRegistry::new();
        assert!(!reg.set_enabled("nope", true));
        assert_eq!(reg.is_enabled("nope"), None);
    }

    // =======================================================================
    // Dispatch
    // =======================================================================

    #[test]
    fn process_invokes_handler_and_removes_span() {
        let mut reg = UrcRegistry::new();
        let (handler, seen) = recorder();
        reg.add_handler(re(r"\r\n\+CREG: (\d)\r\n"), Some(handler));

        let mut buf = b"\r\n+CREG: 5\r\n\r\n+CSQ: 1,2".to_vec();
        let removed = reg.process(&mut buf);

        assert_eq!(removed, 12);
        assert_eq!(buf, b"\r\n+CSQ: 1,2");
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][1].as_deref(), Some("5"));
    }

    #[test]
    fn every_match_fires() {
        let mut reg = UrcRegistry::new();
        let (handler, seen) = recorder();
        reg.add_handler(re(r"\r\nRING\r\n"), Some(handler));

        let mut buf = b"\r\nRING\r\n\r\nRING\r\n".to_vec();
        reg.process(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[test]
    fn all_matching_patterns_fire_in_registration_order() {
        let mut reg = UrcRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for tag in ["creg", "cgreg"] {
            let order = Arc::clone(&order);
            let pattern = if tag == "creg" {
                r"\r\n\+CREG: \d\r\n"
            } else {
                r"\r\n\+CGREG: \d\r\n"
            };
            let handler: UrcHandler = Arc::new(move |_: &UrcMatch| {
                order.lock().unwrap().push(tag);
            });
            reg.add_handler(re(pattern), Some(handler));
        }

        let mut buf = b"\r\n+CGREG: 1\r\n\r\n+CREG: 1\r\n".to_vec();
        reg.process(&mut buf);
        assert!(buf.is_empty());
        assert_eq!(*order.lock().unwrap(), vec!["creg", "cgreg"]);
    }

    #[test]
    fn disabled_pattern_neither_fires_nor_consumes() {
        let mut reg = UrcRegistry::new();
        let (handler, seen) = recorder();
        reg.add_handler(re(r"\r\nRING\r\n"), Some(handler));
        reg.set_enabled(r"\r\nRING\r\n", false);

        let mut buf = b"\r\nRING\r\n".to_vec();
        assert_eq!(reg.process(&mut buf), 0);
        assert_eq!(buf, b"\r\nRING\r\n");
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn pattern_without_handler_swallows() {
        let mut reg = UrcRegistry::new();
        reg.add_handler(re(r"\r\n\*DORMANT:(.*)\r\n"), None);

        let mut buf = b"\r\n*DORMANT:1\r\n\r\nOK\r\n".to_vec();
        reg.process(&mut buf);
        assert_eq!(buf, b"\r\nOK\r\n");
    }

    #[test]
    fn overlapping_spans_are_merged() {
        let mut reg = UrcRegistry::new();
        reg.add_handler(re("ABC"), None);
        reg.add_handler(re("BCD"), None);

        let spans = reg.dispatch(b"xABCDy");
        assert_eq!(spans, vec![1..5]);

        let mut buf = b"xABCDy".to_vec();
        reg.process(&mut buf);
        assert_eq!(buf, b"xy");
    }

    #[test]
    fn dispatch_leaves_buffer_untouched() {
        let mut reg = UrcRegistry::new();
        reg.add_handler(re("RING"), None);
        let buf = b"RING".to_vec();
        let spans = reg.dispatch(&buf);
        assert_eq!(spans, vec![0..4]);
        assert_eq!(buf, b"RING");
    }

    #[test]
    fn urc_match_accessors() {
        let m = UrcMatch::new(vec![Some("+X: 7".into()), None, Some(" 42 ".into())]);
        assert_eq!(m.len(), 3);
        assert_eq!(m.get(0), Some("+X: 7"));
        assert_eq!(m.get(1), None);
        assert_eq!(m.get_u32(2), Some(42));
        assert_eq!(m.get(9), None);
    }
}
