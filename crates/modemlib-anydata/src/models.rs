//! AnyData device profile and plugin.

use std::sync::Arc;
use std::time::Duration;

use modemlib_broadband::config::{Capabilities, VendorProfile};
use modemlib_broadband::generic::Generic;
use modemlib_broadband::ops::{ModemOps, Plugin};
use modemlib_transport::FlowControl;

use crate::modem::AnydataModem;

/// Factory defaults for AnyData CDMA/EVDO modules (ADU-500A and relatives).
pub fn anydata() -> VendorProfile {
    VendorProfile {
        name: "AnyData",
        manufacturer: "AnyDATA",
        default_baud_rate: 115_200,
        flow_control: FlowControl::None,
        post_unlock_grace: Duration::ZERO,
        power_up_settle: Duration::ZERO,
        max_consecutive_timeouts: 10,
        command_timeout: Duration::from_secs(3),
        capabilities: Capabilities {
            gsm_umts: false,
            cdma: true,
            lte: false,
        },
    }
}

/// [`Plugin`] producing [`AnydataModem`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnydataPlugin;

impl Plugin for AnydataPlugin {
    fn profile(&self) -> VendorProfile {
        anydata()
    }

    fn create(&self, generic: Generic) -> Arc<dyn ModemOps> {
        Arc::new(AnydataModem::new(generic))
    }
}
