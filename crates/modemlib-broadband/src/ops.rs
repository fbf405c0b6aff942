//! The vendor contract: overridable modem operations.
//!
//! [`ModemOps`] lists every operation the state machines in
//! [`modem`](crate::modem) and [`bearer`](crate::bearer) need. Each method
//! has a default that delegates to the composed [`Generic`] implementation,
//! so a vendor type only overrides what its firmware does differently and
//! calls `self.generic().<op>()` explicitly where it wants the standard
//! behaviour as well.
//!
//! Vendors are plugged in through a [`Plugin`] factory that receives the
//! ready-made [`Generic`] and wraps it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use modemlib_at::protocol::{DefaultResponseParser, ResponseParser};
use modemlib_core::error::Result;
use modemlib_core::types::{
    AccessTech, BearerProperties, CdmaRegistrationState, ConnectResult, ModeCombination,
    ModemBand, ModemLock, PowerState, RegistrationInfo, UnlockRetries,
};

use crate::config::{VendorProfile, generic_profile};
use crate::generic::Generic;

/// What a bearer asks the modem to dial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub properties: BearerProperties,
    /// PDP context id used for 3GPP dialing.
    pub cid: u32,
}

/// Result of a 3GPP registration poll. A domain whose query failed is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Registration3gpp {
    pub cs: Option<RegistrationInfo>,
    pub ps: Option<RegistrationInfo>,
}

/// Overridable modem operations.
///
/// Defaults call the matching [`Generic`] method; see there for the
/// standard command sequences.
#[async_trait]
pub trait ModemOps: Send + Sync {
    /// The composed default implementation.
    fn generic(&self) -> &Generic;

    /// Plugin name, for logs and `info` output.
    fn name(&self) -> &'static str {
        self.generic().profile().name
    }

    // -- power --------------------------------------------------------------

    async fn load_power_state(&self) -> Result<PowerState> {
        self.generic().load_power_state().await
    }

    async fn power_up(&self) -> Result<()> {
        self.generic().power_up().await
    }

    async fn power_down(&self) -> Result<()> {
        self.generic().power_down().await
    }

    async fn power_off(&self) -> Result<()> {
        self.generic().power_off().await
    }

    // -- SIM ----------------------------------------------------------------

    async fn load_unlock_required(&self) -> Result<ModemLock> {
        self.generic().load_unlock_required().await
    }

    async fn send_pin(&self, pin: &str) -> Result<()> {
        self.generic().send_pin(pin).await
    }

    async fn send_puk(&self, puk: &str, new_pin: &str) -> Result<()> {
        self.generic().send_puk(puk, new_pin).await
    }

    async fn load_unlock_retries(&self) -> Result<UnlockRetries> {
        self.generic().load_unlock_retries().await
    }

    /// Wait until the SIM can be queried again after an unlock.
    async fn after_sim_unlock(&self) -> Result<()> {
        self.generic().after_sim_unlock().await
    }

    // -- radio --------------------------------------------------------------

    /// Signal quality in percent.
    async fn load_signal_quality(&self) -> Result<u8> {
        self.generic().load_signal_quality().await
    }

    async fn load_access_technologies(&self) -> Result<AccessTech> {
        self.generic().load_access_technologies().await
    }

    async fn load_supported_modes(&self) -> Result<Vec<ModeCombination>> {
        self.generic().load_supported_modes().await
    }

    async fn load_current_modes(&self) -> Result<ModeCombination> {
        self.generic().load_current_modes().await
    }

    async fn set_current_modes(&self, modes: ModeCombination) -> Result<()> {
        self.generic().set_current_modes(modes).await
    }

    async fn load_supported_bands(&self) -> Result<Vec<ModemBand>> {
        self.generic().load_supported_bands().await
    }

    async fn load_current_bands(&self) -> Result<Vec<ModemBand>> {
        self.generic().load_current_bands().await
    }

    async fn load_own_numbers(&self) -> Result<Vec<String>> {
        self.generic().load_own_numbers().await
    }

    // -- registration -------------------------------------------------------

    async fn load_registration_3gpp(&self) -> Result<Registration3gpp> {
        self.generic().load_registration_3gpp().await
    }

    /// Coarse (1x, EVDO) registration.
    async fn load_registration_cdma(
        &self,
    ) -> Result<(CdmaRegistrationState, CdmaRegistrationState)> {
        self.generic().load_registration_cdma().await
    }

    /// Refine the coarse CDMA states from [`load_registration_cdma`](Self::load_registration_cdma).
    async fn get_detailed_registration_state(
        &self,
        cdma1x: CdmaRegistrationState,
        evdo: CdmaRegistrationState,
    ) -> Result<(CdmaRegistrationState, CdmaRegistrationState)> {
        self.generic()
            .get_detailed_registration_state(cdma1x, evdo)
            .await
    }

    // -- unsolicited events -------------------------------------------------

    /// Register URC handlers on the ports.
    async fn setup_unsolicited_events(&self) -> Result<()> {
        self.generic().setup_unsolicited_events().await
    }

    /// Disable the URC handlers registered by setup.
    async fn cleanup_unsolicited_events(&self) -> Result<()> {
        self.generic().cleanup_unsolicited_events().await
    }

    /// Ask the modem to start sending URCs.
    async fn enable_unsolicited_events(&self) -> Result<()> {
        self.generic().enable_unsolicited_events().await
    }

    /// Ask the modem to stop sending URCs.
    async fn disable_unsolicited_events(&self) -> Result<()> {
        self.generic().disable_unsolicited_events().await
    }

    // -- bearers ------------------------------------------------------------

    async fn connect_bearer(
        &self,
        request: &ConnectRequest,
        cancel: &CancellationToken,
    ) -> Result<ConnectResult> {
        self.generic().connect_bearer(request, cancel).await
    }

    async fn disconnect_bearer(&self, cid: u32) -> Result<()> {
        self.generic().disconnect_bearer(cid).await
    }

    async fn reset(&self) -> Result<()> {
        self.generic().reset().await
    }
}

impl ModemOps for Generic {
    fn generic(&self) -> &Generic {
        self
    }
}

/// Factory for a vendor's [`ModemOps`].
pub trait Plugin: Send + Sync {
    /// Factory defaults for the vendor's devices.
    fn profile(&self) -> VendorProfile;

    /// Wrap the generic implementation in the vendor type.
    fn create(&self, generic: Generic) -> Arc<dyn ModemOps>;

    /// Final result code recognizer for the vendor's AT ports.
    fn response_parser(&self) -> Box<dyn ResponseParser> {
        Box::new(DefaultResponseParser)
    }
}

/// Plugin for modems without vendor quirks.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericPlugin;

impl Plugin for GenericPlugin {
    fn profile(&self) -> VendorProfile {
        generic_profile()
    }

    fn create(&self, generic: Generic) -> Arc<dyn ModemOps> {
        Arc::new(generic)
    }
}
