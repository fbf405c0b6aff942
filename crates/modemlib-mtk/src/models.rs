//! MediaTek device profile and plugin.
//!
//! MediaTek data cards and phones (MT6280, MT6290) share one firmware
//! command set, so a single profile covers them. The chipset generation is
//! detected at runtime through `+EGMR`.

use std::sync::Arc;
use std::time::Duration;

use modemlib_broadband::config::{Capabilities, VendorProfile};
use modemlib_broadband::generic::Generic;
use modemlib_broadband::ops::{ModemOps, Plugin};
use modemlib_transport::FlowControl;

use crate::modem::MtkModem;

/// Factory defaults for MediaTek modems.
pub fn mtk() -> VendorProfile {
    VendorProfile {
        name: "MTK",
        manufacturer: "MediaTek",
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

/// [`Plugin`] producing [`MtkModem`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct MtkPlugin;

impl Plugin for MtkPlugin {
    fn profile(&self) -> VendorProfile {
        mtk()
    }

    fn create(&self, generic: Generic) -> Arc<dyn ModemOps> {
        Arc::new(MtkModem::new(generic))
    }
}
