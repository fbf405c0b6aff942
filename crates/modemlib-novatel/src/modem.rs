//! [`ModemOps`] for Novatel LTE modems.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use modemlib_at::sequence::{AtStep, run_sequence};
use modemlib_core::error::Result;
use modemlib_core::types::{AccessTech, ModemBand, UnlockRetries};
use modemlib_broadband::generic::Generic;
use modemlib_broadband::ops::ModemOps;

use crate::commands;

const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const PINR_TIMEOUT: Duration = Duration::from_secs(20);
const POWER_DOWN_TIMEOUT: Duration = Duration::from_secs(6);

/// Novatel LTE modem: generic 3GPP behaviour plus the `$NW*` commands.
#[derive(Debug, Clone)]
pub struct NovatelModem {
    generic: Generic,
}

impl NovatelModem {
    pub fn new(generic: Generic) -> Self {
        NovatelModem { generic }
    }
}

#[async_trait]
impl ModemOps for NovatelModem {
    fn generic(&self) -> &Generic {
        &self.generic
    }

    async fn power_down(&self) -> Result<()> {
        self.generic.primary().command("+CFUN=4", POWER_DOWN_TIMEOUT).await?;
        Ok(())
    }

    async fn load_unlock_retries(&self) -> Result<UnlockRetries> {
        let reply = self.generic.primary().command("$NWPINR?", PINR_TIMEOUT).await?;
        commands::parse_nwpinr(&reply)
    }

    /// `+CNUM`, falling back to the CDMA directory number.
    async fn load_own_numbers(&self) -> Result<Vec<String>> {
        let steps = [
            AtStep::new("+CNUM", 3)
                .cached(true)
                .processor(commands::cnum_ignore_at_errors),
            AtStep::new("$NWMDN", 3)
                .cached(true)
                .processor(commands::nwmdn_ignore_at_errors),
        ];
        let numbers = run_sequence(self.generic.primary(), &steps, None).await?;
        Ok(numbers.unwrap_or_default())
    }

    async fn load_access_technologies(&self) -> Result<AccessTech> {
        let reply = self.generic.primary().command("$NWSYSMODE", QUERY_TIMEOUT).await?;
        let tech = commands::parse_nwsysmode(&reply);
        debug!(?tech, "system mode");
        Ok(tech)
    }

    async fn load_supported_bands(&self) -> Result<Vec<ModemBand>> {
        Ok(commands::supported_bands())
    }

    async fn load_current_bands(&self) -> Result<Vec<ModemBand>> {
        let reply = self.generic.primary().command("$NWBAND?", QUERY_TIMEOUT).await?;
        Ok(commands::parse_nwband(&reply))
    }

    async fn reset(&self) -> Result<()> {
        self.generic.primary().command("+CFUN=6", QUERY_TIMEOUT).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NovatelPlugin;
    use modemlib_broadband::builder::ModemBuilder;
    use modemlib_broadband::modem::Modem;
    use modemlib_core::types::{ModemLock, ModemState};
    use modemlib_test_harness::MockTransport;

    const OK: &[u8] = b"\r\nOK\r\n";

    async fn build(mock: MockTransport) -> Modem {
        ModemBuilder::new(Box::new(NovatelPlugin))
            .post_unlock_grace(Duration::ZERO)
            .build_with_transports(Box::new(mock), None)
            .await
            .unwrap()
    }

    // ===============================================================
    // SIM
    // ===============================================================

    #[tokio::test]
    async fn locked_sim_reports_nwpinr_retries() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", b"\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        mock.expect(b"AT$NWPINR?\r", b"\r\n$NWPINR: PIN1, 3\r\n\r\nOK\r\n");
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert_eq!(modem.initialize().await.unwrap(), ModemLock::SimPin);
        let status = modem.status();
        assert_eq!(status.state, ModemState::Locked);
        assert_eq!(status.unlock_retries.get(ModemLock::SimPin), Some(3));
    }

    #[tokio::test]
    async fn unexpected_nwpinr_is_a_parse_error() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT$NWPINR?\r", b"\r\n$NWPINR: PUK1, 10\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert!(modem.ops().load_unlock_retries().await.is_err());
    }

    // ===============================================================
    // Own numbers
    // ===============================================================

    #[tokio::test]
    async fn own_numbers_from_cnum() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CNUM\r", b"\r\n+CNUM: \"\",\"+15551234567\",145\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert_eq!(modem.own_numbers().await.unwrap(), vec!["+15551234567"]);
        assert_eq!(modem.status().own_numbers, vec!["+15551234567"]);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn own_numbers_fall_back_to_mdn() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CNUM\r", b"\r\n+CME ERROR: 4\r\n");
        mock.expect(b"AT$NWMDN\r", b"\r\n$NWMDN: 5551234567\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert_eq!(modem.own_numbers().await.unwrap(), vec!["5551234567"]);
    }

    #[tokio::test]
    async fn own_numbers_fail_when_mdn_fails() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CNUM\r", OK);
        mock.expect(b"AT$NWMDN\r", b"\r\n+CME ERROR: 4\r\n");
        let modem = build(mock).await;

        assert!(modem.own_numbers().await.unwrap_err().is_mobile_equipment());
    }

    // ===============================================================
    // Network
    // ===============================================================

    #[tokio::test]
    async fn access_technologies_from_sysmode() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT$NWSYSMODE\r", b"\r\n$NWSYSMODE: LTE\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert_eq!(modem.refresh_access_technologies().await.unwrap(), AccessTech::LTE);
        assert_eq!(modem.status().access_tech, AccessTech::LTE);
    }

    #[tokio::test]
    async fn current_bands_from_mask() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT$NWBAND?\r", b"\r\n$NWBAND: 0x00C00000\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert_eq!(
            modem.current_bands().await.unwrap(),
            vec![ModemBand::Utran1, ModemBand::Utran2]
        );
        assert_eq!(modem.supported_bands().await.unwrap().len(), 26);
    }

    // ===============================================================
    // Power
    // ===============================================================

    #[tokio::test]
    async fn power_down_and_reset_use_cfun() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CFUN=4\r", OK);
        mock.expect(b"AT+CFUN=6\r", OK);
        let modem = build(mock).await;

        modem.ops().power_down().await.unwrap();
        modem.reset().await.unwrap();
        assert_eq!(handle.remaining_expectations(), 0);
    }
}
