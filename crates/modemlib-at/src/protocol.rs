//! AT command framing and final result code recognition.
//!
//! A reply is complete once the accumulated bytes end with a final result
//! code: `OK`, `CONNECT`, `ERROR`, `+CME ERROR`, `+CMS ERROR`, or one of the
//! dial failures (`NO CARRIER`, `BUSY`, `NO ANSWER`, `NO DIALTONE`). Every
//! final code is framed by `<CR><LF>` on both sides. Until one is seen the
//! reply is [`DecodeResult::Incomplete`].
//!
//! The recognizer sits behind the [`ResponseParser`] trait so a vendor with
//! a non-standard terminator can plug in its own scan.

use std::sync::LazyLock;

use regex::bytes::Regex;

use modemlib_core::error::{ConnectError, Error, MobileEquipmentError, Result};

/// Carriage return that terminates every command line.
pub const CR: u8 = b'\r';

static OK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\nOK\r\n$").expect("static regex"));
static CONNECT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\nCONNECT\s*\d*\r\n$").expect("static regex"));
static CME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n\+CME ERROR:\s*([^\r\n]*)\r\n$").expect("static regex"));
static CMS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r\n\+CMS ERROR:\s*([^\r\n]*)\r\n$").expect("static regex"));
static ERROR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r\n(?:ERROR|COMMAND NOT SUPPORT)\r\n$").expect("static regex")
});
static CONNECT_FAILED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\r\n(NO CARRIER|BUSY|NO ANSWER|NO DIALTONE)\r\n$").expect("static regex")
});

/// The final result code that completed a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalResult {
    Ok,
    Connect,
    /// `+CME ERROR: <n>` or a bare `ERROR` (mapped to the unknown code).
    MobileEquipment(MobileEquipmentError),
    /// `+CMS ERROR: <n>`.
    MessageService(u16),
    ConnectFailed(ConnectError),
}

impl FinalResult {
    /// Turn the final code plus cleaned body into the caller-visible result.
    pub fn into_result(self, body: String) -> Result<String> {
        match self {
            FinalResult::Ok | FinalResult::Connect => Ok(body),
            FinalResult::MobileEquipment(e) => Err(Error::MobileEquipment(e)),
            FinalResult::MessageService(code) => Err(Error::MessageService(code)),
            FinalResult::ConnectFailed(e) => Err(Error::ConnectFailed(e)),
        }
    }
}

/// Result of scanning an accumulated reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// A final result code ends the buffer.
    Complete {
        result: FinalResult,
        /// Reply text without the final `OK` line and without the outer
        /// `<CR><LF>`. Empty for error results.
        body: String,
    },

    /// No final result code yet. More data is needed.
    Incomplete,
}

/// Recognizes the end of an AT reply.
pub trait ResponseParser: Send + Sync + 'static {
    /// Scan the whole accumulated reply (echo already removed).
    fn parse(&self, response: &[u8]) -> DecodeResult;
}

/// The V.250 / 3GPP TS 27.007 verbose result code recognizer.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultResponseParser;

impl ResponseParser for DefaultResponseParser {
    fn parse(&self, response: &[u8]) -> DecodeResult {
        if let Some(m) = OK_RE.find(response) {
            let body = clean_response(&response[..m.start()]);
            return DecodeResult::Complete {
                result: FinalResult::Ok,
                body,
            };
        }

        if CONNECT_RE.is_match(response) {
            return DecodeResult::Complete {
                result: FinalResult::Connect,
                body: clean_response(response),
            };
        }

        if let Some(caps) = CME_RE.captures(response) {
            let code = caps
                .get(1)
                .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.trim().parse::<u16>().ok())
                .map(MobileEquipmentError)
                .unwrap_or(MobileEquipmentError::UNKNOWN);
            tracing::debug!(code = code.code(), "got +CME ERROR");
            return error_result(FinalResult::MobileEquipment(code));
        }

        if let Some(caps) = CMS_RE.captures(response) {
            let code = caps
                .get(1)
                .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.trim().parse::<u16>().ok())
                .unwrap_or(500);
            tracing::debug!(code, "got +CMS ERROR");
            return error_result(FinalResult::MessageService(code));
        }

        if ERROR_RE.is_match(response) {
            return error_result(FinalResult::MobileEquipment(MobileEquipmentError::UNKNOWN));
        }

        if let Some(caps) = CONNECT_FAILED_RE.captures(response) {
            let err = match caps.get(1).map(|m| m.as_bytes()) {
                Some(b"BUSY") => ConnectError::Busy,
                Some(b"NO ANSWER") => ConnectError::NoAnswer,
                Some(b"NO DIALTONE") => ConnectError::NoDialtone,
                _ => ConnectError::NoCarrier,
            };
            tracing::debug!(error = %err, "got connect failure");
            return error_result(FinalResult::ConnectFailed(err));
        }

        DecodeResult::Incomplete
    }
}

fn error_result(result: FinalResult) -> DecodeResult {
    DecodeResult::Complete {
        result,
        body: String::new(),
    }
}

/// Strip one trailing and one leading `<CR><LF>` pair.
fn clean_response(bytes: &[u8]) -> String {
    let mut s = bytes;
    if s.ends_with(b"\r\n") {
        s = &s[..s.len() - 2];
    }
    if s.starts_with(b"\r\n") {
        s = &s[2..];
    }
    String::from_utf8_lossy(s).into_owned()
}

/// Drop anything before the first `<CR><LF>`: it is command echo or line
/// noise.
pub fn remove_echo(buf: &mut Vec<u8>) {
    if buf.len() <= 2 {
        return;
    }
    if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
        if pos > 0 {
            buf.drain(..pos);
        }
    }
}

/// Build the bytes sent for a command.
///
/// Non-raw commands get an `AT` prefix unless they already carry one, and a
/// trailing `<CR>`. Raw commands are sent verbatim.
///
/// # Examples
///
/// ```
/// use modemlib_at::protocol::frame_command;
///
/// assert_eq!(frame_command("+CSQ", false), b"AT+CSQ\r");
/// assert_eq!(frame_command("ATZ", false), b"ATZ\r");
/// assert_eq!(frame_command("+++", true), b"+++");
/// ```
pub fn frame_command(command: &str, raw: bool) -> Vec<u8> {
    if raw {
        return command.as_bytes().to_vec();
    }
    let mut out = Vec::with_capacity(command.len() + 3);
    let has_prefix = command
        .get(..2)
        .is_some_and(|p| p.eq_ignore_ascii_case("AT"));
    if !has_prefix {
        out.extend_from_slice(b"AT");
    }
    out.extend_from_slice(command.as_bytes());
    out.push(CR);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &[u8]) -> DecodeResult {
        DefaultResponseParser.parse(bytes)
    }

    // -----------------------------------------------------------------------
    // Successful replies
    // -----------------------------------------------------------------------

    #[test]
    fn parse_ok_with_body() {
        assert_eq!(
            parse(b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n"),
            DecodeResult::Complete {
                result: FinalResult::Ok,
                body: "+CSQ: 20,99".into(),
            }
        );
    }

    #[test]
    fn parse_bare_ok() {
        assert_eq!(
            parse(b"\r\nOK\r\n"),
            DecodeResult::Complete {
                result: FinalResult::Ok,
                body: String::new(),
            }
        );
    }

    #[test]
    fn parse_multiline_body_keeps_inner_lines() {
        let result = parse(b"\r\n+CGDCONT: 1,\"IP\",\"a\"\r\n+CGDCONT: 2,\"IP\",\"b\"\r\n\r\nOK\r\n");
        assert_eq!(
            result,
            DecodeResult::Complete {
                result: FinalResult::Ok,
                body: "+CGDCONT: 1,\"IP\",\"a\"\r\n+CGDCONT: 2,\"IP\",\"b\"".into(),
            }
        );
    }

    #[test]
    fn parse_connect_with_rate() {
        assert_eq!(
            parse(b"\r\nCONNECT 3600000\r\n"),
            DecodeResult::Complete {
                result: FinalResult::Connect,
                body: "CONNECT 3600000".into(),
            }
        );
    }

    #[test]
    fn parse_ok_must_be_at_end() {
        assert_eq!(parse(b"\r\nOK\r\n+CSQ"), DecodeResult::Incomplete);
    }

    // -----------------------------------------------------------------------
    // Error replies
    // -----------------------------------------------------------------------

    #[test]
    fn parse_cme_error_code() {
        assert_eq!(
            parse(b"\r\n+CME ERROR: 14\r\n"),
            DecodeResult::Complete {
                result: FinalResult::MobileEquipment(MobileEquipmentError::SIM_BUSY),
                body: String::new(),
            }
        );
    }

    #[test]
    fn parse_cme_error_verbose_is_unknown() {
        assert_eq!(
            parse(b"\r\n+CME ERROR: SIM busy\r\n"),
            DecodeResult::Complete {
                result: FinalResult::MobileEquipment(MobileEquipmentError::UNKNOWN),
                body: String::new(),
            }
        );
    }

    #[test]
    fn parse_cms_error_code() {
        assert_eq!(
            parse(b"\r\n+CMS ERROR: 321\r\n"),
            DecodeResult::Complete {
                result: FinalResult::MessageService(321),
                body: String::new(),
            }
        );
    }

    #[test]
    fn parse_bare_error() {
        assert_eq!(
            parse(b"\r\nERROR\r\n"),
            DecodeResult::Complete {
                result: FinalResult::MobileEquipment(MobileEquipmentError::UNKNOWN),
                body: String::new(),
            }
        );
    }

    #[test]
    fn parse_command_not_support() {
        assert!(matches!(
            parse(b"\r\nCOMMAND NOT SUPPORT\r\n"),
            DecodeResult::Complete {
                result: FinalResult::MobileEquipment(_),
                ..
            }
        ));
    }

    #[test]
    fn parse_connect_failures() {
        let cases: [(&[u8], ConnectError); 4] = [
            (b"\r\nNO CARRIER\r\n", ConnectError::NoCarrier),
            (b"\r\nBUSY\r\n", ConnectError::Busy),
            (b"\r\nNO ANSWER\r\n", ConnectError::NoAnswer),
            (b"\r\nNO DIALTONE\r\n", ConnectError::NoDialtone),
        ];
        for (bytes, expected) in cases {
            assert_eq!(
                parse(bytes),
                DecodeResult::Complete {
                    result: FinalResult::ConnectFailed(expected),
                    body: String::new(),
                }
            );
        }
    }

    #[test]
    fn parse_partial_is_incomplete() {
        assert_eq!(parse(b""), DecodeResult::Incomplete);
        assert_eq!(parse(b"\r\n+CSQ: 20,99\r\n"), DecodeResult::Incomplete);
        assert_eq!(parse(b"\r\n+CSQ: 20,99\r\n\r\nOK"), DecodeResult::Incomplete);
    }

    #[test]
    fn final_result_into_result() {
        assert_eq!(FinalResult::Ok.into_result("x".into()).unwrap(), "x");
        assert!(matches!(
            FinalResult::MessageService(500).into_result(String::new()),
            Err(Error::MessageService(500))
        ));
        assert!(matches!(
            FinalResult::ConnectFailed(ConnectError::Busy).into_result(String::new()),
            Err(Error::ConnectFailed(ConnectError::Busy))
        ));
    }

    // -----------------------------------------------------------------------
    // Echo and framing
    // -----------------------------------------------------------------------

    #[test]
    fn remove_echo_drops_leading_command() {
        let mut buf = b"AT+CSQ\r\r\n+CSQ: 20,99\r\n\r\nOK\r\n".to_vec();
        remove_echo(&mut buf);
        assert_eq!(buf, b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
    }

    #[test]
    fn remove_echo_keeps_clean_reply() {
        let mut buf = b"\r\nOK\r\n".to_vec();
        remove_echo(&mut buf);
        assert_eq!(buf, b"\r\nOK\r\n");
    }

    #[test]
    fn remove_echo_without_crlf_is_noop() {
        let mut buf = b"AT+CS".to_vec();
        remove_echo(&mut buf);
        assert_eq!(buf, b"AT+CS");
    }

    #[test]
    fn frame_adds_prefix_and_cr() {
        assert_eq!(frame_command("+CFUN=1", false), b"AT+CFUN=1\r");
        assert_eq!(frame_command("", false), b"AT\r");
        assert_eq!(frame_command("at+cpin?", false), b"at+cpin?\r");
        assert_eq!(frame_command("$NWBAND?", false), b"AT$NWBAND?\r");
    }

    #[test]
    fn frame_raw_is_verbatim() {
        assert_eq!(frame_command("ATD*99***1#\r", true), b"ATD*99***1#\r");
    }
}
