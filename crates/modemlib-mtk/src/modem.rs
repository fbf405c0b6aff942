//! [`ModemOps`] for MediaTek modems.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::bytes::Regex;
use tracing::debug;

use modemlib_at::io::AtCommand;
use modemlib_at::sequence::{AtStep, run_sequence};
use modemlib_at::urc::{UrcHandler, UrcMatch};
use modemlib_core::error::{Error, MobileEquipmentError, Result};
use modemlib_core::types::{ModeCombination, ModemLock, UnlockRetries};
use modemlib_broadband::generic::Generic;
use modemlib_broadband::ops::ModemOps;

use crate::commands::{self, ECSQ_PATTERNS, ERAT_SET_TIMEOUT_SECS, SignalScale};

const QUERY_TIMEOUT: Duration = Duration::from_secs(3);
const ECSQ_TIMEOUT_SECS: u64 = 5;
const CIMI_TIMEOUT: Duration = Duration::from_secs(10);

/// MediaTek modem: generic behaviour plus the `+E*` proprietary commands.
#[derive(Debug, Clone)]
pub struct MtkModem {
    generic: Generic,
}

impl MtkModem {
    pub fn new(generic: Generic) -> Self {
        MtkModem { generic }
    }

    fn signal_handler(&self, scale: SignalScale) -> UrcHandler {
        let status = self.generic.status().clone();
        Arc::new(move |m: &UrcMatch| {
            let Some(raw) = m.get_u32(1) else {
                return;
            };
            let percent = scale.to_percent(raw);
            debug!(?scale, raw, percent, "signal quality report");
            status.set_signal_quality(percent);
        })
    }

    async fn set_signal_handlers(&self, enable: bool) -> Result<()> {
        for port in self.generic.ports() {
            for (pattern, scale) in ECSQ_PATTERNS {
                if enable {
                    let regex = Regex::new(pattern)
                        .map_err(|e| Error::Protocol(format!("bad URC pattern: {e}")))?;
                    port.add_urc_handler(regex, Some(self.signal_handler(scale)))
                        .await?;
                } else {
                    port.set_urc_enabled(pattern, false).await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ModemOps for MtkModem {
    fn generic(&self) -> &Generic {
        &self.generic
    }

    /// Older MTK phones answer `+CPIN?` with `+CME ERROR: 100` although they
    /// only boot with the PIN entered; a readable IMSI confirms the SIM is
    /// unlocked.
    async fn load_unlock_required(&self) -> Result<ModemLock> {
        match self.generic.load_unlock_required().await {
            Err(Error::MobileEquipment(MobileEquipmentError::UNKNOWN)) => {
                debug!("+CPIN? not answered, checking IMSI");
                self.generic.primary().command("+CIMI", CIMI_TIMEOUT).await?;
                Ok(ModemLock::None)
            }
            other => other,
        }
    }

    async fn load_unlock_retries(&self) -> Result<UnlockRetries> {
        let reply = self.generic.primary().command("+EPINC?", QUERY_TIMEOUT).await?;
        commands::parse_epinc(&reply)
    }

    async fn load_supported_modes(&self) -> Result<Vec<ModeCombination>> {
        let reply = self
            .generic
            .primary()
            .command_full(AtCommand::new("+EGMR=0,0", QUERY_TIMEOUT).cached(true))
            .await?;
        let device_type = commands::parse_egmr_device_type(&reply)?;
        debug!(device_type, "MediaTek chipset");
        Ok(commands::supported_modes(device_type))
    }

    async fn load_current_modes(&self) -> Result<ModeCombination> {
        let reply = self.generic.primary().command("+ERAT?", QUERY_TIMEOUT).await?;
        commands::parse_erat(&reply)
    }

    async fn set_current_modes(&self, modes: ModeCombination) -> Result<()> {
        let command = commands::cmd_set_erat(modes)?;
        self.generic
            .primary()
            .command(&command, Duration::from_secs(ERAT_SET_TIMEOUT_SECS))
            .await?;
        Ok(())
    }

    async fn setup_unsolicited_events(&self) -> Result<()> {
        self.generic.setup_unsolicited_events().await?;
        self.set_signal_handlers(true).await
    }

    async fn cleanup_unsolicited_events(&self) -> Result<()> {
        self.set_signal_handlers(false).await?;
        self.generic.cleanup_unsolicited_events().await
    }

    /// Signal reports are best effort: a rejected `+ECSQ` leaves polling.
    async fn enable_unsolicited_events(&self) -> Result<()> {
        self.generic.enable_unsolicited_events().await?;
        let steps: [AtStep<()>; 1] = [AtStep::new("+ECSQ=2", ECSQ_TIMEOUT_SECS)];
        run_sequence(self.generic.primary(), &steps, None).await?;
        Ok(())
    }

    async fn disable_unsolicited_events(&self) -> Result<()> {
        let steps: [AtStep<()>; 1] = [AtStep::new("+ECSQ=0", ECSQ_TIMEOUT_SECS)];
        run_sequence(self.generic.primary(), &steps, None).await?;
        self.generic.disable_unsolicited_events().await
    }
}
