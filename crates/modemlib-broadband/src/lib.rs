//! Broadband modem core for modemlib.
//!
//! This crate holds everything that is common to all cellular modems and
//! leaves only firmware quirks to the vendor crates. It provides:
//!
//! - **Generic operations** ([`generic`]) -- the standard 3GPP 27.007 command
//!   sequences for power, SIM, signal, registration, URCs, and dialing.
//! - **Vendor contract** ([`ops`]) -- the [`ModemOps`] trait whose defaults
//!   delegate to [`Generic`], and the [`Plugin`] factory.
//! - **Modem** ([`modem`]) -- the lifecycle state machine (initialize, unlock,
//!   enable, disable), polling, and the bearer and message registries.
//! - **Bearer** ([`bearer`]) -- one packet data connection with its own
//!   connect/disconnect state machine and statistics.
//! - **Messages** ([`sms`]) -- assembly of multipart SMS from their parts.
//! - **Status** ([`status`]) -- the shared state snapshot and the events
//!   emitted when it changes.
//! - **Configuration** ([`config`]) -- vendor profiles and TOML overrides.
//! - **ModemBuilder** ([`builder`]) -- wires ports, plugin, and config into a
//!   [`Modem`].

pub mod bearer;
pub mod builder;
pub mod config;
pub mod generic;
pub mod modem;
pub mod ops;
pub mod sms;
pub mod status;

pub use bearer::Bearer;
pub use builder::ModemBuilder;
pub use config::{Capabilities, ModemConfig, ResolvedConfig, VendorProfile, generic_profile};
pub use generic::{Generic, ModemContext};
pub use modem::Modem;
pub use ops::{ConnectRequest, GenericPlugin, ModemOps, Plugin, Registration3gpp};
pub use sms::{Sms, SmsList, SmsPart, SmsStorage};
pub use status::{ModemStatus, StatusStore};
