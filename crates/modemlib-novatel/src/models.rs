//! Novatel LTE device profile and plugin.

use std::sync::Arc;
use std::time::Duration;

use modemlib_broadband::config::{Capabilities, VendorProfile};
use modemlib_broadband::generic::Generic;
use modemlib_broadband::ops::{ModemOps, Plugin};
use modemlib_transport::FlowControl;

use crate::modem::NovatelModem;

/// Factory defaults for Novatel LTE data cards (USB551L and relatives).
pub fn novatel_lte() -> VendorProfile {
    VendorProfile {
        name: "Novatel LTE",
        manufacturer: "Novatel Wireless",
        default_baud_rate: 115_200,
        flow_control: FlowControl::None,
        post_unlock_grace: Duration::from_secs(3),
        power_up_settle: Duration::ZERO,
        max_consecutive_timeouts: 10,
        command_timeout: Duration::from_secs(3),
        capabilities: Capabilities {
            gsm_umts: true,
            cdma: false,
            lte: true,
        },
    }
}

/// [`Plugin`] producing [`NovatelModem`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NovatelPlugin;

impl Plugin for NovatelPlugin {
    fn profile(&self) -> VendorProfile {
        novatel_lte()
    }

    fn create(&self, generic: Generic) -> Arc<dyn ModemOps> {
        Arc::new(NovatelModem::new(generic))
    }
}
