//! [`ModemOps`] for AnyData CDMA modules.

use std::time::Duration;

use async_trait::async_trait;
use regex::bytes::Regex;
use tracing::{debug, warn};

use modemlib_core::error::{Error, Result};
use modemlib_core::types::CdmaRegistrationState;
use modemlib_broadband::generic::Generic;
use modemlib_broadband::ops::ModemOps;

use crate::commands::{self, RadioVerdict, STATUS_URC_PATTERNS};

const STATE_TIMEOUT: Duration = Duration::from_secs(3);
const RESET_TIMEOUT: Duration = Duration::from_secs(3);

/// AnyData modem: generic CDMA behaviour plus `*STATE`/`*HSTATE` detail.
#[derive(Debug, Clone)]
pub struct AnydataModem {
    generic: Generic,
}

impl AnydataModem {
    pub fn new(generic: Generic) -> Self {
        AnydataModem { generic }
    }
}

fn apply_verdict(
    verdict: RadioVerdict,
    command: &str,
    current: CdmaRegistrationState,
) -> CdmaRegistrationState {
    match verdict {
        RadioVerdict::Registered => CdmaRegistrationState::Registered,
        RadioVerdict::NoService => current,
        RadioVerdict::Unknown(code) => {
            warn!(command, code, "unknown radio state, assuming no service");
            current
        }
    }
}

#[async_trait]
impl ModemOps for AnydataModem {
    fn generic(&self) -> &Generic {
        &self.generic
    }

    /// Refine 1x from `*STATE?` (required) and EVDO from `*HSTATE?`
    /// (optional).
    async fn get_detailed_registration_state(
        &self,
        cdma1x: CdmaRegistrationState,
        evdo: CdmaRegistrationState,
    ) -> Result<(CdmaRegistrationState, CdmaRegistrationState)> {
        let port = self.generic.primary();

        let reply = port.command("*STATE?", STATE_TIMEOUT).await?;
        let cdma1x = match commands::parse_state(&reply) {
            Some(report) => apply_verdict(report.verdict(), "*STATE", cdma1x),
            None => cdma1x,
        };

        let reply = match port.command("*HSTATE?", STATE_TIMEOUT).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "*HSTATE? not supported");
                return Ok((cdma1x, evdo));
            }
        };
        let evdo = match commands::parse_hstate(&reply) {
            Some(report) => apply_verdict(report.verdict(), "*HSTATE", evdo),
            None => evdo,
        };

        Ok((cdma1x, evdo))
    }

    async fn reset(&self) -> Result<()> {
        self.generic.primary().command("*RESET", RESET_TIMEOUT).await?;
        Ok(())
    }

    /// Generic handlers plus sinks for the module's call status reports.
    async fn setup_unsolicited_events(&self) -> Result<()> {
        self.generic.setup_unsolicited_events().await?;
        for port in self.generic.ports() {
            for pattern in STATUS_URC_PATTERNS {
                let regex = Regex::new(pattern)
                    .map_err(|e| Error::Protocol(format!("bad URC pattern: {e}")))?;
                port.add_urc_handler(regex, None).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnydataPlugin;
    use modemlib_broadband::builder::ModemBuilder;
    use modemlib_broadband::modem::Modem;
    use modemlib_core::types::{ModemLock, ModemState, PowerState};
    use modemlib_test_harness::MockTransport;

    const U: CdmaRegistrationState = CdmaRegistrationState::Unknown;
    const R: CdmaRegistrationState = CdmaRegistrationState::Registered;

    async fn build(mock: MockTransport) -> Modem {
        ModemBuilder::new(Box::new(AnydataPlugin))
            .build_with_transports(Box::new(mock), None)
            .await
            .unwrap()
    }

    // ===============================================================
    // Detailed registration
    // ===============================================================

    #[tokio::test]
    async fn state_and_hstate_refine_registration() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT*STATE?\r", b"\r\n*STATE: 384,148,4145,2,1,-82,0\r\n\r\nOK\r\n");
        mock.expect(b"AT*HSTATE?\r", b"\r\n*HSTATE: 5,1,75,148,-6,-90,0\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        let states = modem.ops().get_detailed_registration_state(U, U).await.unwrap();
        assert_eq!(states, (R, R));
    }

    #[tokio::test]
    async fn weak_idle_leaves_states_alone() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT*STATE?\r", b"\r\n*STATE: 384,148,4145,2,1,-106,0\r\n\r\nOK\r\n");
        mock.expect(b"AT*HSTATE?\r", b"\r\n*HSTATE: 3,1,75,148,-6,-105,0\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        let states = modem.ops().get_detailed_registration_state(U, U).await.unwrap();
        assert_eq!(states, (U, U));
    }

    #[tokio::test]
    async fn hstate_error_keeps_state_result() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT*STATE?\r", b"\r\n*STATE: 384,148,4145,2,4,-70,0\r\n\r\nOK\r\n");
        mock.expect(b"AT*HSTATE?\r", b"\r\nERROR\r\n");
        let modem = build(mock).await;

        let states = modem.ops().get_detailed_registration_state(U, U).await.unwrap();
        assert_eq!(states, (R, U));
    }

    #[tokio::test]
    async fn state_error_fails() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT*STATE?\r", b"\r\nERROR\r\n");
        let modem = build(mock).await;

        assert!(modem.ops().get_detailed_registration_state(U, U).await.is_err());
    }

    #[tokio::test]
    async fn unknown_state_code_treated_as_no_service() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT*STATE?\r", b"\r\n*STATE: 384,148,4145,2,9,-70,0\r\n\r\nOK\r\n");
        mock.expect(b"AT*HSTATE?\r", b"\r\n*HSTATE: 8,1,75,148,-6,-70,0\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        let states = modem.ops().get_detailed_registration_state(R, U).await.unwrap();
        assert_eq!(states, (R, U));
    }

    // ===============================================================
    // Full stack
    // ===============================================================

    #[tokio::test]
    async fn cdma_enable_polls_registration() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CAD?\r", b"\r\n+CAD: 1\r\n\r\nOK\r\n");
        mock.expect(b"AT*STATE?\r", b"\r\n*STATE: 384,148,4145,2,3,-70,0\r\n\r\nOK\r\n");
        mock.expect(b"AT*HSTATE?\r", b"\r\n*HSTATE: 4,1,75,148,-6,-80,0\r\n\r\nOK\r\n");
        mock.expect(b"AT+CSQ\r", b"\r\n+CSQ: 20,99\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        // No SIM and no power control on CDMA-only modules.
        assert_eq!(modem.initialize().await.unwrap(), ModemLock::None);
        modem.enable().await.unwrap();

        let status = modem.status();
        assert_eq!(status.state, ModemState::Registered);
        assert_eq!(status.power, PowerState::On);
        assert_eq!((status.cdma1x, status.evdo), (R, R));
        assert_eq!(status.signal_quality, 64);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn status_reports_are_swallowed() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT*RESET\r", b"\r\nOK\r\n");
        let modem = build(mock).await;
        modem.ops().setup_unsolicited_events().await.unwrap();

        handle.push_unsolicited(b"\r\n*DORMANT: 1\r\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.pending_unsolicited(), 0);

        modem.reset().await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }
}
