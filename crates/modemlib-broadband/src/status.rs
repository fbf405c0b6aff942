//! Shared modem status and change notification.
//!
//! Polls and URC handlers both write into one [`ModemStatus`] behind an
//! `Arc<std::sync::Mutex<..>>`. URC handlers run synchronously on the port
//! task, so the lock is only ever held for short, non-async sections.
//!
//! Every setter compares against the stored value and emits a
//! [`ModemEvent`] only on change. Registration and signal setters refresh
//! their observation timestamps even when the value is unchanged.
//!
//! The externally visible [`ModemState`] is derived: the lifecycle state
//! (disabled, enabling, enabled, ...) set by the modem's own operations is
//! refined into searching / registered / connected from the registration
//! states and the number of connected bearers.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::debug;

use modemlib_core::events::ModemEvent;
use modemlib_core::types::{
    AccessTech, CdmaRegistrationState, ModeCombination, ModemLock, ModemState, PowerState,
    RegistrationDomain, RegistrationInfo, RegistrationState3gpp, UnlockRetries,
};

/// Snapshot of everything known about a modem.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModemStatus {
    /// Derived, externally visible state.
    pub state: ModemState,
    /// State set by the lifecycle operations.
    pub lifecycle: ModemState,
    pub power: PowerState,
    pub lock: ModemLock,
    pub unlock_retries: UnlockRetries,
    pub registration_cs: RegistrationState3gpp,
    pub registration_ps: RegistrationState3gpp,
    pub cdma1x: CdmaRegistrationState,
    pub evdo: CdmaRegistrationState,
    pub lac: u32,
    pub cell_id: u32,
    pub access_tech: AccessTech,
    /// Signal quality in percent.
    pub signal_quality: u8,
    pub current_modes: Option<ModeCombination>,
    pub own_numbers: Vec<String>,
    pub connected_bearers: u32,
    pub registration_updated: Option<Instant>,
    pub signal_updated: Option<Instant>,
}

impl ModemStatus {
    /// Any registration family reports a registered state.
    pub fn is_registered(&self) -> bool {
        self.registration_cs.is_registered()
            || self.registration_ps.is_registered()
            || self.cdma1x.is_registered()
            || self.evdo.is_registered()
    }

    /// `true` while 3GPP registration is roaming in either domain.
    pub fn is_roaming(&self) -> bool {
        self.registration_cs == RegistrationState3gpp::Roaming
            || self.registration_ps == RegistrationState3gpp::Roaming
    }

    fn derive_state(&self) -> ModemState {
        match self.lifecycle {
            ModemState::Enabled
            | ModemState::Searching
            | ModemState::Registered
            | ModemState::Connected => {
                if self.connected_bearers > 0 {
                    ModemState::Connected
                } else if self.is_registered() {
                    ModemState::Registered
                } else if self.registration_cs == RegistrationState3gpp::Searching
                    || self.registration_ps == RegistrationState3gpp::Searching
                {
                    ModemState::Searching
                } else {
                    ModemState::Enabled
                }
            }
            other => other,
        }
    }
}

fn lock(inner: &Mutex<ModemStatus>) -> MutexGuard<'_, ModemStatus> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Cloneable writer/reader for a modem's [`ModemStatus`].
#[derive(Debug, Clone)]
pub struct StatusStore {
    inner: Arc<Mutex<ModemStatus>>,
    event_tx: broadcast::Sender<ModemEvent>,
}

impl StatusStore {
    pub fn new(event_tx: broadcast::Sender<ModemEvent>) -> Self {
        StatusStore {
            inner: Arc::new(Mutex::new(ModemStatus::default())),
            event_tx,
        }
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> ModemStatus {
        lock(&self.inner).clone()
    }

    /// Run `f` against the current status without copying it.
    pub fn read<R>(&self, f: impl FnOnce(&ModemStatus) -> R) -> R {
        f(&lock(&self.inner))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ModemEvent> {
        self.event_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<ModemEvent> {
        self.event_tx.clone()
    }

    /// Emit an event that carries no stored state.
    pub fn emit(&self, event: ModemEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Apply `f`, re-derive the visible state, then emit the collected
    /// events after the lock is released.
    fn update(&self, f: impl FnOnce(&mut ModemStatus, &mut Vec<ModemEvent>)) {
        let events = {
            let mut status = lock(&self.inner);
            let mut events = Vec::new();
            f(&mut status, &mut events);
            let derived = status.derive_state();
            if derived != status.state {
                debug!(old = %status.state, new = %derived, "modem state changed");
                events.push(ModemEvent::StateChanged {
                    old: status.state,
                    new: derived,
                });
                status.state = derived;
            }
            events
        };
        for event in events {
            let _ = self.event_tx.send(event);
        }
    }

    pub fn set_lifecycle(&self, lifecycle: ModemState) {
        self.update(|s, _| s.lifecycle = lifecycle);
    }

    pub fn set_power(&self, power: PowerState) {
        self.update(|s, events| {
            if s.power != power {
                s.power = power;
                events.push(ModemEvent::PowerStateChanged { state: power });
            }
        });
    }

    /// Record the SIM lock. A lock other than none moves an idle modem to
    /// locked; releasing it moves a locked modem to disabled.
    pub fn set_lock(&self, lock_kind: ModemLock) {
        self.update(|s, events| {
            if s.lock != lock_kind {
                s.lock = lock_kind;
                events.push(ModemEvent::LockChanged { lock: lock_kind });
            }
            match (lock_kind, s.lifecycle) {
                (ModemLock::None, ModemState::Locked) => s.lifecycle = ModemState::Disabled,
                (ModemLock::None | ModemLock::Unknown, _) => {}
                (_, ModemState::Unknown | ModemState::Disabled) => {
                    s.lifecycle = ModemState::Locked
                }
                _ => {}
            }
        });
    }

    pub fn set_unlock_retries(&self, retries: UnlockRetries) {
        self.update(|s, _| s.unlock_retries = retries);
    }

    pub fn set_registration_3gpp(&self, domain: RegistrationDomain, state: RegistrationState3gpp) {
        self.update(|s, events| {
            s.registration_updated = Some(Instant::now());
            let slot = match domain {
                RegistrationDomain::Cs => &mut s.registration_cs,
                RegistrationDomain::Ps => &mut s.registration_ps,
            };
            if *slot != state {
                *slot = state;
                events.push(ModemEvent::RegistrationChanged { domain, state });
            }
        });
    }

    /// Apply a parsed `+CREG`/`+CGREG` report: state, location, and (when
    /// reported) access technology.
    pub fn apply_registration(&self, info: &RegistrationInfo) {
        self.update(|s, events| {
            s.registration_updated = Some(Instant::now());
            let slot = match info.domain {
                RegistrationDomain::Cs => &mut s.registration_cs,
                RegistrationDomain::Ps => &mut s.registration_ps,
            };
            if *slot != info.state {
                *slot = info.state;
                events.push(ModemEvent::RegistrationChanged {
                    domain: info.domain,
                    state: info.state,
                });
            }
            if (s.lac, s.cell_id) != (info.lac, info.cell_id) {
                s.lac = info.lac;
                s.cell_id = info.cell_id;
                events.push(ModemEvent::LocationChanged {
                    lac: info.lac,
                    cell_id: info.cell_id,
                });
            }
            if !info.access_tech.is_empty() && s.access_tech != info.access_tech {
                s.access_tech = info.access_tech;
                events.push(ModemEvent::AccessTechnologiesChanged {
                    access_tech: info.access_tech,
                });
            }
        });
    }

    pub fn set_cdma_registration(
        &self,
        cdma1x: CdmaRegistrationState,
        evdo: CdmaRegistrationState,
    ) {
        self.update(|s, events| {
            s.registration_updated = Some(Instant::now());
            if (s.cdma1x, s.evdo) != (cdma1x, evdo) {
                s.cdma1x = cdma1x;
                s.evdo = evdo;
                events.push(ModemEvent::CdmaRegistrationChanged { cdma1x, evdo });
            }
        });
    }

    pub fn set_access_tech(&self, access_tech: AccessTech) {
        self.update(|s, events| {
            if s.access_tech != access_tech {
                s.access_tech = access_tech;
                events.push(ModemEvent::AccessTechnologiesChanged { access_tech });
            }
        });
    }

    pub fn set_signal_quality(&self, percent: u8) {
        self.update(|s, events| {
            s.signal_updated = Some(Instant::now());
            if s.signal_quality != percent {
                s.signal_quality = percent;
                events.push(ModemEvent::SignalQualityChanged { percent });
            }
        });
    }

    pub fn set_current_modes(&self, modes: ModeCombination) {
        self.update(|s, _| s.current_modes = Some(modes));
    }

    pub fn set_own_numbers(&self, numbers: Vec<String>) {
        self.update(|s, _| s.own_numbers = numbers);
    }

    /// Track a bearer entering (`true`) or leaving (`false`) the connected
    /// state.
    pub fn bearer_connected(&self, connected: bool) {
        self.update(|s, _| {
            if connected {
                s.connected_bearers += 1;
            } else {
                s.connected_bearers = s.connected_bearers.saturating_sub(1);
            }
        });
    }

    /// Move to the terminal failed state.
    pub fn mark_failed(&self) {
        self.update(|s, _| s.lifecycle = ModemState::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (StatusStore, broadcast::Receiver<ModemEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (StatusStore::new(tx), rx)
    }

    fn drain(rx: &mut broadcast::Receiver<ModemEvent>) -> Vec<ModemEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // =======================================================================
    // Change detection
    // =======================================================================

    #[test]
    fn same_value_emits_nothing_but_refreshes_timestamp() {
        let (store, mut rx) = store();
        store.set_registration_3gpp(RegistrationDomain::Cs, RegistrationState3gpp::Home);
        let first = store.snapshot().registration_updated;
        assert_eq!(
            drain(&mut rx),
            vec![ModemEvent::RegistrationChanged {
                domain: RegistrationDomain::Cs,
                state: RegistrationState3gpp::Home,
            }]
        );

        std::thread::sleep(std::time::Duration::from_millis(2));
        store.set_registration_3gpp(RegistrationDomain::Cs, RegistrationState3gpp::Home);
        assert!(drain(&mut rx).is_empty());
        assert!(store.snapshot().registration_updated > first);
    }

    #[test]
    fn signal_quality_events() {
        let (store, mut rx) = store();
        store.set_signal_quality(54);
        store.set_signal_quality(54);
        store.set_signal_quality(60);
        assert_eq!(
            drain(&mut rx),
            vec![
                ModemEvent::SignalQualityChanged { percent: 54 },
                ModemEvent::SignalQualityChanged { percent: 60 },
            ]
        );
    }

    #[test]
    fn apply_registration_updates_location_and_tech() {
        let (store, mut rx) = store();
        store.apply_registration(&RegistrationInfo {
            state: RegistrationState3gpp::Roaming,
            lac: 0x1A2B,
            cell_id: 0x3C4D,
            access_tech: AccessTech::UMTS,
            domain: RegistrationDomain::Ps,
        });
        let status = store.snapshot();
        assert_eq!(status.registration_ps, RegistrationState3gpp::Roaming);
        assert_eq!(status.lac, 0x1A2B);
        assert_eq!(status.access_tech, AccessTech::UMTS);
        assert!(status.is_roaming());
        assert_eq!(drain(&mut rx).len(), 3);
    }

    // =======================================================================
    // Derived state
    // =======================================================================

    #[test]
    fn lock_moves_idle_modem_to_locked_and_back() {
        let (store, _rx) = store();
        store.set_lifecycle(ModemState::Disabled);
        store.set_lock(ModemLock::SimPin);
        assert_eq!(store.snapshot().state, ModemState::Locked);
        store.set_lock(ModemLock::None);
        assert_eq!(store.snapshot().state, ModemState::Disabled);
    }

    #[test]
    fn enabled_state_follows_registration_and_bearers() {
        let (store, mut rx) = store();
        store.set_lifecycle(ModemState::Enabled);
        assert_eq!(store.snapshot().state, ModemState::Enabled);

        store.set_registration_3gpp(RegistrationDomain::Cs, RegistrationState3gpp::Searching);
        assert_eq!(store.snapshot().state, ModemState::Searching);

        store.set_registration_3gpp(RegistrationDomain::Cs, RegistrationState3gpp::Home);
        assert_eq!(store.snapshot().state, ModemState::Registered);

        store.bearer_connected(true);
        assert_eq!(store.snapshot().state, ModemState::Connected);

        store.bearer_connected(false);
        assert_eq!(store.snapshot().state, ModemState::Registered);

        let transitions: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ModemEvent::StateChanged { new, .. } => Some(new),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ModemState::Enabled,
                ModemState::Searching,
                ModemState::Registered,
                ModemState::Connected,
                ModemState::Registered,
            ]
        );
    }

    #[test]
    fn registration_ignored_while_disabled() {
        let (store, _rx) = store();
        store.set_lifecycle(ModemState::Disabled);
        store.set_registration_3gpp(RegistrationDomain::Ps, RegistrationState3gpp::Home);
        assert_eq!(store.snapshot().state, ModemState::Disabled);
    }

    #[test]
    fn cdma_registration_counts_as_registered() {
        let (store, _rx) = store();
        store.set_lifecycle(ModemState::Enabled);
        store.set_cdma_registration(
            CdmaRegistrationState::Unknown,
            CdmaRegistrationState::Registered,
        );
        assert_eq!(store.snapshot().state, ModemState::Registered);
    }

    #[test]
    fn failed_is_terminal_for_derivation() {
        let (store, _rx) = store();
        store.set_lifecycle(ModemState::Enabled);
        store.set_registration_3gpp(RegistrationDomain::Cs, RegistrationState3gpp::Home);
        store.mark_failed();
        assert_eq!(store.snapshot().state, ModemState::Failed);
    }
}
