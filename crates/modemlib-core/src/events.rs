//! Asynchronous modem event types.
//!
//! Events are emitted through a [`tokio::sync::broadcast`] channel whenever a
//! capability state machine changes value, whether the change came from a
//! poll or from an unsolicited result code. Re-observing the same value does
//! not produce an event.
//!
//! [`tokio::sync::broadcast`]: https://docs.rs/tokio/latest/tokio/sync/broadcast/index.html

use crate::types::{
    AccessTech, BearerStatus, CdmaRegistrationState, ModemLock, ModemState, PowerState,
    RegistrationDomain, RegistrationState3gpp,
};

/// An event emitted by a modem when its state changes.
///
/// Events are delivered on a best-effort basis through a bounded broadcast
/// channel; slow consumers may miss events while the modem is flooding
/// signal quality reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ModemEvent {
    /// The lifecycle state changed.
    StateChanged {
        old: ModemState,
        new: ModemState,
    },

    /// Radio power state changed.
    PowerStateChanged {
        state: PowerState,
    },

    /// The SIM lock required for operation changed.
    LockChanged {
        lock: ModemLock,
    },

    /// 3GPP registration state changed.
    RegistrationChanged {
        /// CS (`+CREG`) or PS (`+CGREG`).
        domain: RegistrationDomain,
        state: RegistrationState3gpp,
    },

    /// CDMA registration state changed.
    CdmaRegistrationChanged {
        cdma1x: CdmaRegistrationState,
        evdo: CdmaRegistrationState,
    },

    /// The serving cell location changed.
    LocationChanged {
        lac: u32,
        cell_id: u32,
    },

    /// The access technologies in use changed.
    AccessTechnologiesChanged {
        access_tech: AccessTech,
    },

    /// Signal quality changed.
    SignalQualityChanged {
        /// Normalized quality, 0..=100.
        percent: u8,
    },

    /// A bearer changed connection status.
    BearerStatusChanged {
        bearer_id: u32,
        status: BearerStatus,
    },

    /// A new SMS was stored by the modem (`+CMTI`).
    SmsReceived {
        /// Storage name, e.g. `"SM"` or `"ME"`.
        storage: String,
        index: u32,
    },

    /// A port reached the configured number of consecutive timeouts.
    PortUnresponsive {
        port: String,
        consecutive_timeouts: u32,
    },
}
