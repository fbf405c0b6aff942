//! ModemBuilder -- fluent builder for constructing [`Modem`] instances.
//!
//! Separates configuration from construction so that callers can pick the
//! vendor plugin, the AT ports, and per-modem overrides before any port is
//! opened.
//!
//! # Example
//!
//! ```no_run
//! use modemlib_broadband::builder::ModemBuilder;
//! use modemlib_broadband::ops::GenericPlugin;
//! use std::time::Duration;
//!
//! # async fn example() -> modemlib_core::Result<()> {
//! let modem = ModemBuilder::new(Box::new(GenericPlugin))
//!     .primary_port("/dev/ttyUSB2")
//!     .secondary_port("/dev/ttyUSB3")
//!     .command_timeout(Duration::from_secs(5))
//!     .build()
//!     .await?;
//! modem.initialize().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use tokio::sync::broadcast;
use tracing::debug;

use modemlib_at::io::{PortConfig, spawn_port_with_parser};
use modemlib_core::error::{Error, Result};
use modemlib_core::transport::Transport;
use modemlib_core::types::PortRole;
use modemlib_transport::{FlowControl, SerialConfig, SerialTransport};

use crate::config::ModemConfig;
use crate::generic::{Generic, ModemContext};
use crate::modem::Modem;
use crate::ops::Plugin;
use crate::status::StatusStore;

/// Capacity of the modem's event channel.
const EVENT_CAPACITY: usize = 256;

/// Fluent builder for [`Modem`].
///
/// Everything not set explicitly comes from the plugin's
/// [`VendorProfile`](crate::config::VendorProfile).
pub struct ModemBuilder {
    plugin: Box<dyn Plugin>,
    primary_port: Option<String>,
    secondary_port: Option<String>,
    config: ModemConfig,
}

impl ModemBuilder {
    /// Create a new builder for the given vendor plugin.
    pub fn new(plugin: Box<dyn Plugin>) -> Self {
        ModemBuilder {
            plugin,
            primary_port: None,
            secondary_port: None,
            config: ModemConfig::default(),
        }
    }

    /// Set the device path of the primary AT port (e.g. `/dev/ttyUSB2`).
    pub fn primary_port(mut self, port: &str) -> Self {
        self.primary_port = Some(port.to_string());
        self
    }

    /// Set the device path of an optional secondary AT port.
    ///
    /// URC handlers are installed on both ports, and hang-up and extended
    /// error queries prefer the secondary one.
    pub fn secondary_port(mut self, port: &str) -> Self {
        self.secondary_port = Some(port.to_string());
        self
    }

    /// Replace all overrides with `config`, typically loaded from TOML.
    ///
    /// Setters called afterwards still apply on top.
    pub fn config(mut self, config: ModemConfig) -> Self {
        self.config = config;
        self
    }

    /// Override the baud rate of both ports.
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.config.baud_rate = Some(baud);
        self
    }

    pub fn flow_control(mut self, flow_control: FlowControl) -> Self {
        self.config.flow_control = Some(flow_control);
        self
    }

    /// Set the timeout for ordinary AT commands.
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.command_timeout_ms = Some(duration_ms(timeout));
        self
    }

    /// Set the wait after a successful PIN or PUK.
    pub fn post_unlock_grace(mut self, grace: Duration) -> Self {
        self.config.post_unlock_grace_ms = Some(duration_ms(grace));
        self
    }

    /// Set the number of back-to-back timeouts that fail the modem.
    /// `0` disables the check.
    pub fn max_consecutive_timeouts(mut self, count: u32) -> Self {
        self.config.max_consecutive_timeouts = Some(count);
        self
    }

    /// Set how often the SIM is queried during an unlock check.
    pub fn unlock_check_attempts(mut self, attempts: u32) -> Self {
        self.config.unlock_check_attempts = Some(attempts);
        self
    }

    /// Set the delay between unlock check attempts.
    pub fn unlock_check_delay(mut self, delay: Duration) -> Self {
        self.config.unlock_check_delay_ms = Some(duration_ms(delay));
        self
    }

    /// Build a [`Modem`] over already-open transports.
    ///
    /// Used by tests (with a mock transport) and by callers that manage
    /// their own serial ports. Port names default to `primary` and
    /// `secondary` when no device path was set.
    pub async fn build_with_transports(
        self,
        primary: Box<dyn Transport>,
        secondary: Option<Box<dyn Transport>>,
    ) -> Result<Modem> {
        let profile = self.plugin.profile();
        let config = self.config.resolve(&profile);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let port_config = |name: Option<&String>, fallback: &str, role| {
            let mut pc = PortConfig::new(name.map_or(fallback, String::as_str), role);
            pc.max_consecutive_timeouts = config.max_consecutive_timeouts;
            pc
        };

        let primary = spawn_port_with_parser(
            primary,
            port_config(self.primary_port.as_ref(), "primary", PortRole::Primary),
            event_tx.clone(),
            self.plugin.response_parser(),
        );
        let secondary = secondary.map(|transport| {
            spawn_port_with_parser(
                transport,
                port_config(self.secondary_port.as_ref(), "secondary", PortRole::Secondary),
                event_tx.clone(),
                self.plugin.response_parser(),
            )
        });

        debug!(
            plugin = profile.name,
            primary = primary.name(),
            secondary = secondary.as_ref().map(|p| p.name()),
            "modem ports started"
        );

        let generic = Generic::new(ModemContext {
            primary,
            secondary,
            status: StatusStore::new(event_tx),
            config,
            profile,
        });
        Ok(Modem::new(self.plugin.create(generic)))
    }

    /// Open the serial ports and build the [`Modem`].
    ///
    /// Returns [`Error::InvalidParameter`] when no primary port was set.
    pub async fn build(self) -> Result<Modem> {
        let port = self
            .primary_port
            .clone()
            .ok_or_else(|| Error::InvalidParameter("primary port not set".into()))?;

        let config = self.config.resolve(&self.plugin.profile());
        let serial = SerialConfig {
            baud_rate: config.baud_rate,
            flow_control: config.flow_control,
            ..Default::default()
        };

        let primary = SerialTransport::open_with_config(&port, serial.clone()).await?;
        let secondary = match &self.secondary_port {
            Some(path) => Some(Box::new(SerialTransport::open_with_config(path, serial).await?)
                as Box<dyn Transport>),
            None => None,
        };

        self.build_with_transports(Box::new(primary), secondary).await
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
