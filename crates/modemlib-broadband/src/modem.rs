//! The modem object: lifecycle, SIM unlock, polling, bearers, and messages.
//!
//! [`Modem`] drives the vendor's [`ModemOps`] through the lifecycle
//! operations (initialize, enable, disable) and keeps the shared
//! [`StatusStore`] current. All state it exposes is read from the store, so
//! values learned from URCs and from polls are indistinguishable.
//!
//! A background health task watches the event stream and moves the modem to
//! [`ModemState::Failed`] when a port is declared unresponsive.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use modemlib_at::sequence::retry_with_delay;
use modemlib_core::error::{Error, Result};
use modemlib_core::events::ModemEvent;
use modemlib_core::types::{
    AccessTech, BearerProperties, CdmaRegistrationState, ModeCombination, ModemBand, ModemLock,
    ModemState, PowerState, RegistrationDomain, RegistrationState3gpp, UnlockRetries,
};

use crate::bearer::Bearer;
use crate::ops::ModemOps;
use crate::sms::{SmsList, SmsPart};
use crate::status::{ModemStatus, StatusStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A managed modem.
pub struct Modem {
    ops: Arc<dyn ModemOps>,
    status: StatusStore,
    bearers: Mutex<Vec<Arc<Bearer>>>,
    next_bearer_id: AtomicU32,
    sms: Mutex<SmsList>,
    health: JoinHandle<()>,
}

impl std::fmt::Debug for Modem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Modem")
            .field("plugin", &self.ops.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Modem {
    /// Wrap `ops`; must be called inside a tokio runtime.
    pub fn new(ops: Arc<dyn ModemOps>) -> Self {
        let status = ops.generic().status().clone();
        let health = tokio::spawn(watch_health(status.clone(), status.subscribe()));
        Modem {
            ops,
            status,
            bearers: Mutex::new(Vec::new()),
            next_bearer_id: AtomicU32::new(0),
            sms: Mutex::new(SmsList::new()),
            health,
        }
    }

    /// The vendor operations backing this modem.
    pub fn ops(&self) -> &Arc<dyn ModemOps> {
        &self.ops
    }

    /// Plugin name.
    pub fn plugin(&self) -> &'static str {
        self.ops.name()
    }

    pub fn status(&self) -> ModemStatus {
        self.status.snapshot()
    }

    pub fn state(&self) -> ModemState {
        self.status.read(|s| s.state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.status.subscribe()
    }

    fn lifecycle(&self) -> ModemState {
        self.status.read(|s| s.lifecycle)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Register URC handlers and check the SIM.
    pub async fn initialize(&self) -> Result<ModemLock> {
        self.ops.setup_unsolicited_events().await?;
        self.status.set_lifecycle(ModemState::Disabled);
        let lock_kind = self.unlock_check().await?;
        if let Ok(power) = self.ops.load_power_state().await {
            self.status.set_power(power);
        }
        info!(plugin = self.plugin(), lock = %lock_kind, state = %self.state(), "modem initialized");
        Ok(lock_kind)
    }

    /// Query the SIM lock, retrying while the SIM does not answer.
    ///
    /// An error after the SIM was last seen unlocked is taken to mean it is
    /// still unlocked. Once the attempts are exhausted the lock is unknown.
    pub async fn unlock_check(&self) -> Result<ModemLock> {
        let config = self.ops.generic().config();
        let ops = &self.ops;
        let status = &self.status;
        let result = retry_with_delay(
            config.unlock_check_attempts,
            config.unlock_check_delay,
            move |_: &Error| status.read(|s| s.lock) != ModemLock::None,
            move |_| ops.load_unlock_required(),
        )
        .await;

        match result {
            Ok(lock_kind) => {
                debug!(lock = %lock_kind, "unlock check complete");
                self.status.set_lock(lock_kind);
                self.refresh_unlock_retries().await;
                Ok(lock_kind)
            }
            Err(e) if self.status.read(|s| s.lock) == ModemLock::None => {
                debug!(error = %e, "unlock check failed, SIM was unlocked before");
                Ok(ModemLock::None)
            }
            Err(e) => {
                warn!(error = %e, "unlock check failed, lock unknown");
                self.status.set_lock(ModemLock::Unknown);
                Ok(ModemLock::Unknown)
            }
        }
    }

    async fn refresh_unlock_retries(&self) {
        match self.ops.load_unlock_retries().await {
            Ok(retries) => self.status.set_unlock_retries(retries),
            Err(e) if e.is_unsupported() => {}
            Err(e) => debug!(error = %e, "could not load unlock retries"),
        }
    }

    /// Remaining unlock attempts, freshly loaded.
    pub async fn unlock_retries(&self) -> Result<UnlockRetries> {
        let retries = self.ops.load_unlock_retries().await?;
        self.status.set_unlock_retries(retries.clone());
        Ok(retries)
    }

    pub async fn send_pin(&self, pin: &str) -> Result<ModemLock> {
        if let Err(e) = self.ops.send_pin(pin).await {
            self.refresh_unlock_retries().await;
            return Err(e);
        }
        self.ops.after_sim_unlock().await?;
        self.unlock_check().await
    }

    pub async fn send_puk(&self, puk: &str, new_pin: &str) -> Result<ModemLock> {
        if let Err(e) = self.ops.send_puk(puk, new_pin).await {
            self.refresh_unlock_retries().await;
            return Err(e);
        }
        self.ops.after_sim_unlock().await?;
        self.unlock_check().await
    }

    /// Power up, enable URCs, and take a first look at the network.
    pub async fn enable(&self) -> Result<()> {
        match self.lifecycle() {
            ModemState::Enabled
            | ModemState::Searching
            | ModemState::Registered
            | ModemState::Connected => return Ok(()),
            ModemState::Enabling => return Err(Error::InProgress("modem is enabling".into())),
            ModemState::Locked => return Err(Error::WrongState("modem is locked".into())),
            ModemState::Failed => return Err(Error::WrongState("modem has failed".into())),
            ModemState::Disabling => {
                return Err(Error::WrongState("modem is disabling".into()));
            }
            ModemState::Unknown | ModemState::Disabled => {}
        }

        self.status.set_lifecycle(ModemState::Enabling);
        if let Err(e) = self.enable_steps().await {
            warn!(error = %e, "enabling failed");
            self.status.set_lifecycle(ModemState::Disabled);
            return Err(e);
        }
        self.status.set_lifecycle(ModemState::Enabled);

        if let Err(e) = self.refresh_registration().await {
            warn!(error = %e, "initial registration poll failed");
        }
        if let Err(e) = self.refresh_signal_quality().await {
            warn!(error = %e, "initial signal poll failed");
        }
        if let Err(e) = self.refresh_access_technologies().await {
            if !e.is_unsupported() {
                warn!(error = %e, "initial access technology poll failed");
            }
        }
        info!(state = %self.state(), "modem enabled");
        Ok(())
    }

    async fn enable_steps(&self) -> Result<()> {
        self.ops.power_up().await?;
        let power = self.ops.load_power_state().await.unwrap_or(PowerState::On);
        self.status.set_power(power);
        self.ops.enable_unsolicited_events().await
    }

    /// Disconnect every bearer, stop URCs, and power down to low.
    pub async fn disable(&self) -> Result<()> {
        match self.lifecycle() {
            ModemState::Disabled => return Ok(()),
            ModemState::Disabling => return Err(Error::InProgress("modem is disabling".into())),
            ModemState::Enabling => return Err(Error::WrongState("modem is enabling".into())),
            ModemState::Locked | ModemState::Unknown | ModemState::Failed => {
                return Err(Error::WrongState(format!(
                    "cannot disable a {} modem",
                    self.lifecycle()
                )));
            }
            _ => {}
        }

        self.status.set_lifecycle(ModemState::Disabling);
        for bearer in self.bearers() {
            if let Err(e) = bearer.disconnect().await {
                warn!(bearer = bearer.id(), error = %e, "could not disconnect bearer");
            }
        }
        if let Err(e) = self.ops.disable_unsolicited_events().await {
            warn!(error = %e, "could not disable unsolicited events");
        }
        if let Err(e) = self.ops.power_down().await {
            warn!(error = %e, "power down failed");
            self.status.set_lifecycle(ModemState::Enabled);
            return Err(e);
        }

        self.status.set_power(PowerState::Low);
        self.status
            .set_registration_3gpp(RegistrationDomain::Cs, RegistrationState3gpp::Unknown);
        self.status
            .set_registration_3gpp(RegistrationDomain::Ps, RegistrationState3gpp::Unknown);
        self.status
            .set_cdma_registration(CdmaRegistrationState::Unknown, CdmaRegistrationState::Unknown);
        self.status.set_lifecycle(ModemState::Disabled);
        info!("modem disabled");
        Ok(())
    }

    /// Change radio power. Low and off are only allowed while disabled.
    pub async fn set_power_state(&self, state: PowerState) -> Result<()> {
        let disabled = matches!(
            self.lifecycle(),
            ModemState::Disabled | ModemState::Locked | ModemState::Unknown
        );
        match state {
            PowerState::On => self.ops.power_up().await?,
            PowerState::Low if disabled => self.ops.power_down().await?,
            PowerState::Off if disabled => self.ops.power_off().await?,
            PowerState::Low | PowerState::Off => {
                return Err(Error::WrongState(format!(
                    "cannot set power {state} while {}",
                    self.lifecycle()
                )));
            }
            PowerState::Unknown => {
                return Err(Error::InvalidParameter("unknown power state".into()));
            }
        }
        self.status.set_power(state);
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.ops.reset().await
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    pub async fn refresh_signal_quality(&self) -> Result<u8> {
        let percent = self.ops.load_signal_quality().await?;
        self.status.set_signal_quality(percent);
        Ok(percent)
    }

    pub async fn refresh_access_technologies(&self) -> Result<AccessTech> {
        let access_tech = self.ops.load_access_technologies().await?;
        self.status.set_access_tech(access_tech);
        Ok(access_tech)
    }

    /// Poll every registration family the device supports. Fails only when
    /// no family could be polled.
    pub async fn refresh_registration(&self) -> Result<()> {
        let caps = self.ops.generic().capabilities();
        let mut first_error = None;
        let mut polled = false;

        if caps.is_3gpp() {
            match self.ops.load_registration_3gpp().await {
                Ok(reg) => {
                    for info in [reg.cs, reg.ps].into_iter().flatten() {
                        self.status.apply_registration(&info);
                    }
                    polled = true;
                }
                Err(e) => first_error = Some(e),
            }
        }

        if caps.cdma {
            match self.ops.load_registration_cdma().await {
                Ok((cdma1x, evdo)) => {
                    let (cdma1x, evdo) = self
                        .ops
                        .get_detailed_registration_state(cdma1x, evdo)
                        .await
                        .unwrap_or((cdma1x, evdo));
                    self.status.set_cdma_registration(cdma1x, evdo);
                    polled = true;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if !polled => Err(e),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Modes, bands, numbers
    // -----------------------------------------------------------------------

    pub async fn supported_modes(&self) -> Result<Vec<ModeCombination>> {
        self.ops.load_supported_modes().await
    }

    pub async fn current_modes(&self) -> Result<ModeCombination> {
        let modes = self.ops.load_current_modes().await?;
        self.status.set_current_modes(modes);
        Ok(modes)
    }

    /// Select `modes`; it must be one of the supported combinations.
    pub async fn set_current_modes(&self, modes: ModeCombination) -> Result<()> {
        let supported = self.ops.load_supported_modes().await?;
        if !supported.contains(&modes) {
            return Err(Error::Unsupported(format!("mode combination {modes}")));
        }
        self.ops.set_current_modes(modes).await?;
        self.status.set_current_modes(modes);
        Ok(())
    }

    pub async fn supported_bands(&self) -> Result<Vec<ModemBand>> {
        self.ops.load_supported_bands().await
    }

    pub async fn current_bands(&self) -> Result<Vec<ModemBand>> {
        self.ops.load_current_bands().await
    }

    pub async fn own_numbers(&self) -> Result<Vec<String>> {
        let numbers = self.ops.load_own_numbers().await?;
        self.status.set_own_numbers(numbers.clone());
        Ok(numbers)
    }

    // -----------------------------------------------------------------------
    // Bearers
    // -----------------------------------------------------------------------

    /// Create a disconnected bearer. Bearer `n` dials PDP context `n + 1`.
    pub fn create_bearer(&self, properties: BearerProperties) -> Arc<Bearer> {
        let id = self.next_bearer_id.fetch_add(1, Ordering::Relaxed);
        let bearer = Arc::new(Bearer::new(
            id,
            id + 1,
            properties,
            Arc::clone(&self.ops),
            self.status.clone(),
        ));
        lock(&self.bearers).push(Arc::clone(&bearer));
        debug!(bearer = id, "bearer created");
        bearer
    }

    pub fn bearers(&self) -> Vec<Arc<Bearer>> {
        lock(&self.bearers).clone()
    }

    pub fn bearer(&self, id: u32) -> Option<Arc<Bearer>> {
        lock(&self.bearers).iter().find(|b| b.id() == id).cloned()
    }

    /// Disconnect and forget bearer `id`.
    pub async fn delete_bearer(&self, id: u32) -> Result<()> {
        let bearer = self
            .bearer(id)
            .ok_or_else(|| Error::InvalidParameter(format!("no bearer {id}")))?;
        bearer.disconnect().await?;
        lock(&self.bearers).retain(|b| b.id() != id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messages
    // -----------------------------------------------------------------------

    /// File a received message part. Returns `true` once its message is
    /// complete.
    pub fn take_sms_part(&self, part: SmsPart) -> Result<bool> {
        lock(&self.sms).take_part(part)
    }

    /// Copy of the message list.
    pub fn messages(&self) -> SmsList {
        lock(&self.sms).clone()
    }

    // -----------------------------------------------------------------------
    // Shutdown
    // -----------------------------------------------------------------------

    /// Disconnect bearers, drop URC handlers, and stop the port tasks.
    pub async fn shutdown(&self) -> Result<()> {
        for bearer in self.bearers() {
            if let Err(e) = bearer.disconnect().await {
                warn!(bearer = bearer.id(), error = %e, "could not disconnect bearer");
            }
        }
        if let Err(e) = self.ops.cleanup_unsolicited_events().await {
            debug!(error = %e, "could not clean up unsolicited events");
        }
        for port in self.ops.generic().ports() {
            port.shutdown().await?;
        }
        self.health.abort();
        Ok(())
    }
}

impl Drop for Modem {
    fn drop(&mut self) {
        self.health.abort();
    }
}

async fn watch_health(status: StatusStore, mut rx: broadcast::Receiver<ModemEvent>) {
    loop {
        match rx.recv().await {
            Ok(ModemEvent::PortUnresponsive {
                port,
                consecutive_timeouts,
            }) => {
                warn!(port, consecutive_timeouts, "port unresponsive, modem failed");
                status.mark_failed();
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "health watcher lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModemBuilder;
    use crate::ops::GenericPlugin;
    use modemlib_core::types::ModemMode;
    use modemlib_test_harness::{MockHandle, MockTransport};
    use std::time::Duration;

    const READY: &[u8] = b"\r\n+CPIN: READY\r\n\r\nOK\r\n";
    const OK: &[u8] = b"\r\nOK\r\n";

    async fn build(mock: MockTransport) -> Modem {
        ModemBuilder::new(Box::new(GenericPlugin))
            .unlock_check_delay(Duration::from_millis(100))
            .build_with_transports(Box::new(mock), None)
            .await
            .unwrap()
    }

    /// Expectations for `enable()` on a generic modem registered at home.
    fn expect_enable(handle: &MockHandle) {
        handle.expect(b"AT+CFUN=1\r", OK);
        handle.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 1\r\n\r\nOK\r\n");
        handle.expect(b"AT+CREG=2\r", OK);
        handle.expect(b"AT+CGREG=2\r", OK);
        handle.expect(b"AT+CREG?\r", b"\r\n+CREG: 2,1,\"00AB\",\"1F2E\"\r\n\r\nOK\r\n");
        handle.expect(b"AT+CGREG?\r", b"\r\n+CGREG: 2,1,\"00AB\",\"1F2E\"\r\n\r\nOK\r\n");
        handle.expect(b"AT+CSQ\r", b"\r\n+CSQ: 31,99\r\n\r\nOK\r\n");
    }

    // =======================================================================
    // Initialization and unlock
    // =======================================================================

    #[tokio::test]
    async fn initialize_locked_modem() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", b"\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        assert_eq!(modem.initialize().await.unwrap(), ModemLock::SimPin);
        assert_eq!(modem.state(), ModemState::Locked);
        assert_eq!(modem.status().power, PowerState::Low);

        let err = modem.enable().await.unwrap_err();
        assert!(matches!(err, Error::WrongState(_)));
    }

    #[tokio::test]
    async fn pin_unlocks_modem() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", b"\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        mock.expect(b"AT+CPIN=\"1234\"\r", OK);
        mock.expect(b"AT+CPIN?\r", READY);
        let modem = build(mock).await;

        modem.initialize().await.unwrap();
        assert_eq!(modem.send_pin("1234").await.unwrap(), ModemLock::None);
        assert_eq!(modem.state(), ModemState::Disabled);
    }

    #[tokio::test]
    async fn wrong_pin_keeps_lock() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", b"\r\n+CPIN: SIM PIN\r\n\r\nOK\r\n");
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        mock.expect(b"AT+CPIN=\"0000\"\r", b"\r\n+CME ERROR: 16\r\n");
        let modem = build(mock).await;

        modem.initialize().await.unwrap();
        let err = modem.send_pin("0000").await.unwrap_err();
        assert!(err.is_mobile_equipment());
        assert_eq!(modem.state(), ModemState::Locked);
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_check_exhausts_attempts() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        for _ in 0..3 {
            mock.expect(b"AT+CPIN?\r", b"\r\n+CME ERROR: 14\r\n");
        }
        let modem = build(mock).await;

        assert_eq!(modem.unlock_check().await.unwrap(), ModemLock::Unknown);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unlock_check_recovers_on_retry() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", b"\r\n+CME ERROR: 14\r\n");
        mock.expect(b"AT+CPIN?\r", READY);
        let modem = build(mock).await;

        assert_eq!(modem.unlock_check().await.unwrap(), ModemLock::None);
    }

    #[tokio::test]
    async fn unlock_check_error_after_ready_means_unlocked() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CPIN?\r", READY);
        mock.expect(b"AT+CPIN?\r", b"\r\nERROR\r\n");
        let modem = build(mock).await;

        assert_eq!(modem.unlock_check().await.unwrap(), ModemLock::None);
        assert_eq!(modem.unlock_check().await.unwrap(), ModemLock::None);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    // =======================================================================
    // Enable / disable
    // =======================================================================

    #[tokio::test]
    async fn enable_and_disable() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CPIN?\r", READY);
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        expect_enable(&handle);
        let modem = build(mock).await;

        modem.initialize().await.unwrap();
        assert_eq!(modem.state(), ModemState::Disabled);

        modem.enable().await.unwrap();
        let status = modem.status();
        assert_eq!(status.state, ModemState::Registered);
        assert_eq!(status.power, PowerState::On);
        assert_eq!(status.registration_cs, RegistrationState3gpp::Home);
        assert_eq!(status.registration_ps, RegistrationState3gpp::Home);
        assert_eq!(status.lac, 0xAB);
        assert_eq!(status.signal_quality, 100);

        handle.expect(b"AT+CREG=0\r", OK);
        handle.expect(b"AT+CGREG=0\r", OK);
        handle.expect(b"AT+CFUN=4\r", OK);
        modem.disable().await.unwrap();
        let status = modem.status();
        assert_eq!(status.state, ModemState::Disabled);
        assert_eq!(status.power, PowerState::Low);
        assert_eq!(status.registration_cs, RegistrationState3gpp::Unknown);
        assert_eq!(handle.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn disable_when_disabled_is_noop() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CPIN?\r", READY);
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        let modem = build(mock).await;

        modem.initialize().await.unwrap();
        modem.disable().await.unwrap();
        assert_eq!(modem.state(), ModemState::Disabled);
    }

    #[tokio::test]
    async fn power_low_refused_while_enabled() {
        let mut mock = MockTransport::new();
        let handle = mock.handle();
        mock.expect(b"AT+CPIN?\r", READY);
        mock.expect(b"AT+CFUN?\r", b"\r\n+CFUN: 4\r\n\r\nOK\r\n");
        expect_enable(&handle);
        let modem = build(mock).await;

        modem.initialize().await.unwrap();
        modem.enable().await.unwrap();
        let err = modem.set_power_state(PowerState::Low).await.unwrap_err();
        assert!(matches!(err, Error::WrongState(_)));
    }

    // =======================================================================
    // Port health
    // =======================================================================

    #[tokio::test]
    async fn unresponsive_port_fails_modem() {
        let mut mock = MockTransport::new();
        mock.expect(b"AT+CGMI\r", b"");
        mock.expect(b"AT+CGMI\r", b"");
        let modem = ModemBuilder::new(Box::new(GenericPlugin))
            .max_consecutive_timeouts(2)
            .build_with_transports(Box::new(mock), None)
            .await
            .unwrap();
        let mut rx = modem.subscribe();

        let generic = modem.ops().generic();
        assert!(matches!(generic.query("+CGMI").await, Err(Error::Timeout)));
        assert!(matches!(generic.query("+CGMI").await, Err(Error::Timeout)));

        let failed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(ModemEvent::StateChanged { new, .. }) = rx.recv().await {
                    if new == ModemState::Failed {
                        break;
                    }
                }
            }
        })
        .await;
        assert!(failed.is_ok());
        assert_eq!(modem.state(), ModemState::Failed);
    }

    // =======================================================================
    // Modes, bearers, messages
    // =======================================================================

    #[tokio::test]
    async fn unsupported_mode_rejected() {
        let modem = build(MockTransport::new()).await;
        let modes = ModeCombination::new(ModemMode::MODE_4G, ModemMode::NONE);
        let err = modem.set_current_modes(modes).await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn bearer_registry() {
        let modem = build(MockTransport::new()).await;
        let first = modem.create_bearer(BearerProperties::default());
        let second = modem.create_bearer(BearerProperties::default());
        assert_eq!((first.id(), first.cid()), (0, 1));
        assert_eq!((second.id(), second.cid()), (1, 2));
        assert_eq!(modem.bearers().len(), 2);

        modem.delete_bearer(0).await.unwrap();
        assert!(modem.bearer(0).is_none());
        assert!(modem.delete_bearer(0).await.is_err());
        assert_eq!(modem.bearers().len(), 1);
    }

    #[tokio::test]
    async fn message_parts_filed() {
        use crate::sms::{SMS_PART_INVALID_INDEX, SmsStorage};

        let modem = build(MockTransport::new()).await;
        let part = |seq| {
            SmsPart::new(SmsStorage::Sm, SMS_PART_INVALID_INDEX).with_concat(3, 2, seq)
        };
        assert!(!modem.take_sms_part(part(1)).unwrap());
        assert!(modem.take_sms_part(part(2)).unwrap());
        assert_eq!(modem.messages().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_ports() {
        let modem = build(MockTransport::new()).await;
        modem.shutdown().await.unwrap();
        assert!(modem.ops().generic().query("+CGMI").await.is_err());
    }
}
