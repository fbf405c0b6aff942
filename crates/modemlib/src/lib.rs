//! # modemlib -- Cellular Modem Management
//!
//! `modemlib` drives cellular modems over their AT command ports: it checks
//! the SIM, powers the radio up and down, tracks registration and signal
//! quality, dials data bearers, and collects SMS parts. Vendor plugins
//! override the generic 3GPP/CDMA behaviour where a chipset does things its
//! own way.
//!
//! ## Quick Start
//!
//! ```no_run
//! use modemlib::ModemBuilder;
//!
//! #[tokio::main]
//! async fn main() -> modemlib::Result<()> {
//!     let plugin = modemlib::plugin_by_name("mtk").expect("mtk feature enabled");
//!     let modem = ModemBuilder::new(plugin)
//!         .primary_port("/dev/ttyUSB2")
//!         .build()
//!         .await?;
//!
//!     modem.initialize().await?;
//!     modem.enable().await?;
//!     println!("{}: {}% signal", modem.state(), modem.status().signal_quality);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate                  | Purpose                                          |
//! |------------------------|--------------------------------------------------|
//! | `modemlib-core`        | Types, events, errors, the [`Transport`] trait   |
//! | `modemlib-transport`   | Serial transport                                 |
//! | `modemlib-at`          | AT port task, URCs, command sequences, parsers   |
//! | `modemlib-broadband`   | Generic modem, status store, bearers, SMS        |
//! | `modemlib-mtk`         | MediaTek plugin                                  |
//! | `modemlib-anydata`     | AnyData CDMA plugin                              |
//! | `modemlib-novatel`     | Novatel LTE plugin                               |
//! | **`modemlib`**         | This facade crate -- re-exports everything       |
//!
//! ## Feature Flags
//!
//! | Feature   | Enables                 | Default |
//! |-----------|-------------------------|---------|
//! | `mtk`     | [`mtk`] plugin          | yes     |
//! | `anydata` | [`anydata`] plugin      | yes     |
//! | `novatel` | [`novatel`] plugin      | yes     |
//! | `full`    | All vendor plugins      | no      |

pub use modemlib_broadband::{
    Bearer, Capabilities, Generic, GenericPlugin, Modem, ModemBuilder, ModemConfig, ModemOps,
    ModemStatus, Plugin, ResolvedConfig, Sms, SmsList, SmsPart, SmsStorage, VendorProfile,
    generic_profile,
};
pub use modemlib_core::*;

/// AT command engine: port task, URC registry, sequences, and parsers.
pub mod at {
    pub use modemlib_at::*;
}

/// Serial transport ([`SerialTransport`](serial::SerialTransport)).
pub mod serial {
    pub use modemlib_transport::*;
}

/// Generic broadband modem building blocks.
pub mod broadband {
    pub use modemlib_broadband::*;
}

/// MediaTek plugin (`+EPINC`, `+ERAT`, `+ECSQ`).
#[cfg(feature = "mtk")]
pub mod mtk {
    pub use modemlib_mtk::*;
}

/// AnyData CDMA plugin (`*STATE`, `*HSTATE`).
#[cfg(feature = "anydata")]
pub mod anydata {
    pub use modemlib_anydata::*;
}

/// Novatel LTE plugin (`$NWPINR`, `$NWSYSMODE`, `$NWBAND`).
#[cfg(feature = "novatel")]
pub mod novatel {
    pub use modemlib_novatel::*;
}

/// Profiles of every plugin compiled in, generic first.
///
/// ```
/// let names: Vec<_> = modemlib::supported_vendors().iter().map(|p| p.name).collect();
/// assert_eq!(names[0], "Generic");
/// ```
pub fn supported_vendors() -> Vec<VendorProfile> {
    plugin_names()
        .iter()
        .filter_map(|name| plugin_by_name(name))
        .map(|plugin| plugin.profile())
        .collect()
}

/// Short names accepted by [`plugin_by_name`].
pub fn plugin_names() -> Vec<&'static str> {
    let mut names = vec!["generic"];
    #[cfg(feature = "mtk")]
    names.push("mtk");
    #[cfg(feature = "anydata")]
    names.push("anydata");
    #[cfg(feature = "novatel")]
    names.push("novatel");
    names
}

/// Look up a plugin by short name, ignoring case. `None` when the name is
/// unknown or its feature is disabled.
pub fn plugin_by_name(name: &str) -> Option<Box<dyn Plugin>> {
    match name.to_ascii_lowercase().as_str() {
        "generic" => Some(Box::new(GenericPlugin)),
        #[cfg(feature = "mtk")]
        "mtk" | "mediatek" => Some(Box::new(mtk::MtkPlugin)),
        #[cfg(feature = "anydata")]
        "anydata" => Some(Box::new(anydata::AnydataPlugin)),
        #[cfg(feature = "novatel")]
        "novatel" | "novatel-lte" => Some(Box::new(novatel::NovatelPlugin)),
        _ => None,
    }
}
