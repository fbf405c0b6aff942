//! The default 3GPP TS 27.007 implementation of every modem operation.
//!
//! [`Generic`] is what vendor types compose: it owns the AT ports, the
//! status store, and the resolved configuration, and answers each
//! [`ModemOps`](crate::ops::ModemOps) method with the standard command
//! sequence. Operations that have no standard command return
//! [`Error::Unsupported`].

use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use modemlib_at::io::{AtCommand, AtPort};
use modemlib_at::parsers;
use modemlib_at::sequence::{self, AtStep, run_sequence};
use modemlib_at::urc::{UrcHandler, UrcMatch};
use modemlib_core::error::{Error, MobileEquipmentError, Result};
use modemlib_core::events::ModemEvent;
use modemlib_core::helpers::cind_to_percent;
use modemlib_core::types::{
    AccessTech, CdmaRegistrationState, ConnectResult, IpConfig, IpFamily, ModeCombination,
    ModemBand, ModemLock, ModemMode, PowerState, RegistrationDomain, RegistrationInfo,
    UnlockRetries,
};

use crate::config::{Capabilities, ResolvedConfig, VendorProfile};
use crate::ops::{ConnectRequest, Registration3gpp};
use crate::status::StatusStore;

const POWER_TIMEOUT: Duration = Duration::from_secs(5);
const CONTEXT_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(180);
const HANGUP_TIMEOUT: Duration = Duration::from_secs(5);

/// `+CMTI: "<mem>",<index>` new-message indication.
pub const CMTI_PATTERN: &str = r#"\r\n\+CMTI:\s*"(\w+)"\s*,\s*(\d+)\r\n"#;

/// Everything a modem's operations share.
#[derive(Debug)]
pub struct ModemContext {
    pub primary: AtPort,
    /// Control port used while the primary carries a data session.
    pub secondary: Option<AtPort>,
    pub status: StatusStore,
    pub config: ResolvedConfig,
    pub profile: VendorProfile,
}

/// Standard implementation of every modem operation.
#[derive(Debug, Clone)]
pub struct Generic {
    ctx: Arc<ModemContext>,
}

impl Generic {
    pub fn new(ctx: ModemContext) -> Self {
        Generic { ctx: Arc::new(ctx) }
    }

    pub fn primary(&self) -> &AtPort {
        &self.ctx.primary
    }

    pub fn secondary(&self) -> Option<&AtPort> {
        self.ctx.secondary.as_ref()
    }

    /// Primary port first, then the secondary if present.
    pub fn ports(&self) -> impl Iterator<Item = &AtPort> {
        std::iter::once(&self.ctx.primary).chain(self.ctx.secondary.as_ref())
    }

    /// Port for commands that must work while a data session is up.
    pub fn control_port(&self) -> &AtPort {
        self.ctx.secondary.as_ref().unwrap_or(&self.ctx.primary)
    }

    pub fn status(&self) -> &StatusStore {
        &self.ctx.status
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.ctx.config
    }

    pub fn profile(&self) -> &VendorProfile {
        &self.ctx.profile
    }

    pub fn capabilities(&self) -> Capabilities {
        self.ctx.profile.capabilities
    }

    /// Default timeout for simple queries.
    pub fn command_timeout(&self) -> Duration {
        self.ctx.config.command_timeout
    }

    /// Send `command` on the primary port with the default timeout.
    pub async fn query(&self, command: &str) -> Result<String> {
        self.primary().command(command, self.command_timeout()).await
    }

    // -----------------------------------------------------------------------
    // Power
    // -----------------------------------------------------------------------

    pub async fn load_power_state(&self) -> Result<PowerState> {
        if self.capabilities().is_cdma_only() {
            return Ok(PowerState::On);
        }
        let reply = self.query("+CFUN?").await?;
        parsers::parse_cfun(&reply)
    }

    /// `+CFUN=1`. Errors are ignored: many modems reject it while already on.
    pub async fn power_up(&self) -> Result<()> {
        if self.capabilities().is_cdma_only() {
            return Ok(());
        }
        if let Err(e) = self.primary().command("+CFUN=1", POWER_TIMEOUT).await {
            warn!(error = %e, "ignoring power-up error");
        }
        let settle = self.config().power_up_settle;
        if !settle.is_zero() {
            debug!(?settle, "waiting for the radio to settle");
            tokio::time::sleep(settle).await;
        }
        Ok(())
    }

    pub async fn power_down(&self) -> Result<()> {
        if self.capabilities().is_cdma_only() {
            return Ok(());
        }
        self.primary().command("+CFUN=4", POWER_TIMEOUT).await?;
        Ok(())
    }

    pub async fn power_off(&self) -> Result<()> {
        if self.capabilities().is_cdma_only() {
            return Ok(());
        }
        self.primary().command("+CFUN=0", POWER_TIMEOUT).await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // SIM
    // -----------------------------------------------------------------------

    /// `+CPIN?`. A lock reported as an equipment error is read as that lock.
    pub async fn load_unlock_required(&self) -> Result<ModemLock> {
        if self.capabilities().is_cdma_only() {
            return Ok(ModemLock::None);
        }
        let reply = match self.query("+CPIN?").await {
            Ok(reply) => reply,
            Err(Error::MobileEquipment(code)) => {
                return lock_from_equipment_error(code).ok_or(Error::MobileEquipment(code));
            }
            Err(e) => return Err(e),
        };
        match parsers::parse_cpin(&reply) {
            ModemLock::Unknown => Err(Error::Parse(format!("unknown SIM lock reply: {reply:?}"))),
            lock => Ok(lock),
        }
    }

    pub async fn send_pin(&self, pin: &str) -> Result<()> {
        validate_code("PIN", pin)?;
        self.query(&format!("+CPIN=\"{pin}\"")).await?;
        Ok(())
    }

    pub async fn send_puk(&self, puk: &str, new_pin: &str) -> Result<()> {
        validate_code("PUK", puk)?;
        validate_code("PIN", new_pin)?;
        self.query(&format!("+CPIN=\"{puk}\",\"{new_pin}\"")).await?;
        Ok(())
    }

    pub async fn load_unlock_retries(&self) -> Result<UnlockRetries> {
        Err(Error::Unsupported("unlock retry counters".into()))
    }

    pub async fn after_sim_unlock(&self) -> Result<()> {
        let grace = self.config().post_unlock_grace;
        if !grace.is_zero() {
            debug!(?grace, "waiting for the SIM after unlock");
            tokio::time::sleep(grace).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Signal
    // -----------------------------------------------------------------------

    /// `+CSQ` (or the `+CSQ?` spelling some firmware wants). When both are
    /// rejected, the `signal` indicator of `+CIND` is tried instead.
    pub async fn load_signal_quality(&self) -> Result<u8> {
        let steps = [
            AtStep::new("+CSQ", 3).processor(sequence::string_ignore_at_errors),
            AtStep::new("+CSQ?", 3).processor(sequence::string_ignore_at_errors),
        ];
        match run_sequence(self.primary(), &steps, None).await {
            Ok(Some(reply)) => parsers::parse_csq(&reply),
            Ok(None) => Err(Error::Parse("empty signal quality reply".into())),
            Err(e) if e.is_mobile_equipment() => match self.load_signal_quality_cind().await {
                Ok(percent) => Ok(percent),
                Err(fallback) => {
                    debug!(error = %fallback, "CIND signal fallback failed");
                    Err(e)
                }
            },
            Err(e) => Err(e),
        }
    }

    async fn load_signal_quality_cind(&self) -> Result<u8> {
        let test = self
            .primary()
            .command_full(AtCommand::new("+CIND=?", self.command_timeout()).cached(true))
            .await?;
        let index = parsers::parse_cind_test(&test, "signal")
            .ok_or_else(|| Error::Unsupported("no signal indicator".into()))?;
        let values = parsers::parse_cind_query(&self.query("+CIND?").await?)?;
        let level = values
            .get(index - 1)
            .copied()
            .ok_or_else(|| Error::Parse(format!("signal indicator {index} missing")))?;
        Ok(cind_to_percent(level))
    }

    // -----------------------------------------------------------------------
    // Modes, bands, numbers
    // -----------------------------------------------------------------------

    pub async fn load_access_technologies(&self) -> Result<AccessTech> {
        Err(Error::Unsupported("access technology query".into()))
    }

    /// One combination: every generation the device supports, no preference.
    pub async fn load_supported_modes(&self) -> Result<Vec<ModeCombination>> {
        let caps = self.capabilities();
        let mut allowed = ModemMode::empty();
        if caps.gsm_umts || caps.cdma {
            allowed |= ModemMode::MODE_2G | ModemMode::MODE_3G;
        }
        if caps.lte {
            allowed |= ModemMode::MODE_4G;
        }
        Ok(vec![ModeCombination::new(allowed, ModemMode::NONE)])
    }

    pub async fn load_current_modes(&self) -> Result<ModeCombination> {
        Err(Error::Unsupported("current modes query".into()))
    }

    pub async fn set_current_modes(&self, _modes: ModeCombination) -> Result<()> {
        Err(Error::Unsupported("mode selection".into()))
    }

    pub async fn load_supported_bands(&self) -> Result<Vec<ModemBand>> {
        Err(Error::Unsupported("band query".into()))
    }

    pub async fn load_current_bands(&self) -> Result<Vec<ModemBand>> {
        Err(Error::Unsupported("band query".into()))
    }

    pub async fn load_own_numbers(&self) -> Result<Vec<String>> {
        let reply = self
            .primary()
            .command_full(AtCommand::new("+CNUM", self.command_timeout()).cached(true))
            .await?;
        Ok(parsers::parse_cnum(&reply))
    }

    pub async fn reset(&self) -> Result<()> {
        Err(Error::Unsupported("reset".into()))
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Poll `+CREG?` and `+CGREG?`. Fails only when both polls fail.
    pub async fn load_registration_3gpp(&self) -> Result<Registration3gpp> {
        if !self.capabilities().is_3gpp() {
            return Err(Error::Unsupported("3GPP registration".into()));
        }
        let cs = self.query_registration("+CREG?", RegistrationDomain::Cs).await;
        let ps = self.query_registration("+CGREG?", RegistrationDomain::Ps).await;
        match (cs, ps) {
            (Err(e), Err(_)) => Err(e),
            (cs, ps) => Ok(Registration3gpp {
                cs: cs.inspect_err(|e| debug!(error = %e, "CS registration poll failed")).ok(),
                ps: ps.inspect_err(|e| debug!(error = %e, "PS registration poll failed")).ok(),
            }),
        }
    }

    /// An empty reply means the registration URC handler consumed the
    /// report, so the answer is whatever it stored.
    async fn query_registration(
        &self,
        command: &str,
        domain: RegistrationDomain,
    ) -> Result<RegistrationInfo> {
        let reply = self.query(command).await?;
        if !reply.trim().is_empty() {
            return parsers::parse_creg_response(&reply);
        }
        debug!(command, "registration reply handled as unsolicited");
        let status = self.status().snapshot();
        Ok(RegistrationInfo {
            state: match domain {
                RegistrationDomain::Cs => status.registration_cs,
                RegistrationDomain::Ps => status.registration_ps,
            },
            lac: status.lac,
            cell_id: status.cell_id,
            access_tech: AccessTech::empty(),
            domain,
        })
    }

    /// `+CAD?`: CDMA service available means 1x registered.
    pub async fn load_registration_cdma(
        &self,
    ) -> Result<(CdmaRegistrationState, CdmaRegistrationState)> {
        if !self.capabilities().cdma {
            return Err(Error::Unsupported("CDMA registration".into()));
        }
        let reply = self.query("+CAD?").await?;
        if parsers::parse_cad(&reply)? {
            Ok((CdmaRegistrationState::Registered, CdmaRegistrationState::Unknown))
        } else {
            Ok((CdmaRegistrationState::Unknown, CdmaRegistrationState::Unknown))
        }
    }

    /// `+SPSERVICE?`; the inputs are returned unchanged when the modem does
    /// not answer it.
    pub async fn get_detailed_registration_state(
        &self,
        cdma1x: CdmaRegistrationState,
        evdo: CdmaRegistrationState,
    ) -> Result<(CdmaRegistrationState, CdmaRegistrationState)> {
        let detailed = match self.query("+SPSERVICE?").await {
            Ok(reply) => parsers::parse_spservice(&reply),
            Err(e) => Err(e),
        };
        match detailed {
            Ok(states) => Ok(states),
            Err(e) => {
                debug!(error = %e, "no detailed CDMA registration state");
                Ok((cdma1x, evdo))
            }
        }
    }

    // -----------------------------------------------------------------------
    // Unsolicited events
    // -----------------------------------------------------------------------

    /// Registration (`+CREG`/`+CGREG`) and new-message (`+CMTI`) handlers on
    /// every port.
    pub async fn setup_unsolicited_events(&self) -> Result<()> {
        for port in self.ports() {
            for regex in parsers::creg_unsolicited_patterns() {
                port.add_urc_handler(regex, Some(self.registration_handler()))
                    .await?;
            }
            let regex = Regex::new(CMTI_PATTERN)
                .map_err(|e| Error::Protocol(format!("bad URC pattern: {e}")))?;
            port.add_urc_handler(regex, Some(self.sms_handler())).await?;
        }
        Ok(())
    }

    pub async fn cleanup_unsolicited_events(&self) -> Result<()> {
        for port in self.ports() {
            for regex in parsers::creg_unsolicited_patterns() {
                port.set_urc_enabled(regex.as_str(), false).await?;
            }
            port.set_urc_enabled(CMTI_PATTERN, false).await?;
        }
        Ok(())
    }

    /// `+CREG=2` then `+CGREG=2`, each falling back to the `=1` form without
    /// location. A modem rejecting both still works through polling.
    pub async fn enable_unsolicited_events(&self) -> Result<()> {
        if !self.capabilities().is_3gpp() {
            return Ok(());
        }
        for name in ["+CREG", "+CGREG"] {
            let steps: [AtStep<()>; 2] = [
                AtStep::new(format!("{name}=2"), 3).processor(sequence::continue_on_error),
                AtStep::new(format!("{name}=1"), 3).processor(sequence::continue_on_error),
            ];
            // Both steps continuing means neither form was accepted.
            if let Ok(None) = run_sequence(self.primary(), &steps, None).await {
                warn!(command = name, "registration reporting not accepted");
            }
        }
        Ok(())
    }

    /// `+CREG=0` and `+CGREG=0`, errors ignored.
    pub async fn disable_unsolicited_events(&self) -> Result<()> {
        if !self.capabilities().is_3gpp() {
            return Ok(());
        }
        let steps: [AtStep<()>; 2] = [AtStep::new("+CREG=0", 3), AtStep::new("+CGREG=0", 3)];
        run_sequence(self.primary(), &steps, None).await?;
        Ok(())
    }

    fn registration_handler(&self) -> UrcHandler {
        let status = self.status().clone();
        Arc::new(move |m: &UrcMatch| match parsers::parse_creg_groups(&m.groups()) {
            Ok(info) => status.apply_registration(&info),
            Err(e) => warn!(error = %e, "ignoring malformed registration report"),
        })
    }

    fn sms_handler(&self) -> UrcHandler {
        let status = self.status().clone();
        Arc::new(move |m: &UrcMatch| {
            let (Some(storage), Some(index)) = (m.get(1), m.get_u32(2)) else {
                return;
            };
            debug!(storage, index, "new message stored");
            status.emit(ModemEvent::SmsReceived {
                storage: storage.to_string(),
                index,
            });
        })
    }

    // -----------------------------------------------------------------------
    // Bearers
    // -----------------------------------------------------------------------

    /// Define the PDP context and dial it (3GPP), or dial `#777` (CDMA).
    ///
    /// `cancel` is honoured between steps; the dial itself is never
    /// abandoned, so a caller that cancelled must tear the session down.
    pub async fn connect_bearer(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<ConnectResult> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let props = &request.properties;
        let is_3gpp = self.capabilities().is_3gpp();

        let dial = if is_3gpp {
            let apn = props.apn.as_deref().unwrap_or("");
            let define = format!(
                "+CGDCONT={},\"{}\",\"{}\"",
                request.cid,
                props.ip_type.pdp_type(),
                apn
            );
            let define = AtStep::<()>::new(define, CONTEXT_TIMEOUT.as_secs())
                .processor(sequence::no_result_continue);
            run_sequence(self.primary(), &[define], Some(cancel)).await?;
            format!("ATD*99***{}#\r", request.cid)
        } else {
            let number = props.number.as_deref().unwrap_or("#777");
            format!("ATDT{number}\r")
        };

        debug!(port = self.primary().name(), cid = request.cid, "dialing");
        let result = self
            .primary()
            .command_full(AtCommand::new(dial, DIAL_TIMEOUT).raw(true))
            .await;
        match result {
            Ok(_) => {}
            Err(e @ (Error::Timeout | Error::Cancelled)) => return Err(e),
            Err(e) if is_3gpp => return Err(self.refine_dial_error(e).await),
            Err(e) => return Err(e),
        }

        // CDMA PPP sessions are IPv4 only.
        let (ipv4, ipv6) = match props.ip_type {
            _ if !is_3gpp => (Some(IpConfig::ppp()), None),
            IpFamily::Ipv4 => (Some(IpConfig::ppp()), None),
            IpFamily::Ipv6 => (None, Some(IpConfig::ppp())),
            IpFamily::Ipv4v6 => (Some(IpConfig::ppp()), Some(IpConfig::ppp())),
        };
        Ok(ConnectResult {
            ipv4,
            ipv6,
            data_port: Some(self.primary().name().to_string()),
        })
    }

    /// Replace a dial failure with the modem's `+CEER` report when it has
    /// one.
    async fn refine_dial_error(&self, error: Error) -> Error {
        match self.control_port().command("+CEER", self.command_timeout()).await {
            Ok(reply) => match reply.trim().strip_prefix("+CEER: ") {
                Some(text) if !text.trim().is_empty() => Error::Connection(text.trim().to_string()),
                _ => error,
            },
            Err(e) => {
                debug!(error = %e, "no extended error report");
                error
            }
        }
    }

    /// `+CGACT=0,<cid>` (3GPP, errors tolerated) or `ATH` (CDMA).
    pub async fn disconnect_bearer(&self, cid: u32) -> Result<()> {
        let port = self.control_port();
        if self.capabilities().is_3gpp() {
            let command = format!("+CGACT=0,{cid}");
            if let Err(e) = port.command(&command, CONTEXT_TIMEOUT).await {
                warn!(cid, error = %e, "context deactivation failed");
            }
            return Ok(());
        }
        port.command("ATH", HANGUP_TIMEOUT).await?;
        Ok(())
    }
}

fn lock_from_equipment_error(code: MobileEquipmentError) -> Option<ModemLock> {
    match code {
        MobileEquipmentError::SIM_PIN => Some(ModemLock::SimPin),
        MobileEquipmentError::SIM_PUK => Some(ModemLock::SimPuk),
        MobileEquipmentError::SIM_PIN2 => Some(ModemLock::SimPin2),
        MobileEquipmentError::SIM_PUK2 => Some(ModemLock::SimPuk2),
        MobileEquipmentError::PH_SIM_PIN => Some(ModemLock::PhSimPin),
        _ => None,
    }
}

fn validate_code(kind: &str, code: &str) -> Result<()> {
    if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidParameter(format!("{kind} must be digits")));
    }
    Ok(())
}
