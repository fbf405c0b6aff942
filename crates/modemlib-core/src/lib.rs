//! modemlib-core: Core traits, types, and error definitions for modemlib.
//!
//! This crate defines the vendor-agnostic abstractions shared by the AT
//! engine, the generic broadband modem, and every vendor plugin.
//! Applications depend on these types without pulling in a specific vendor.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level link to a modem port
//! - [`ModemEvent`] -- asynchronous state change notifications
//! - [`Error`] / [`Result`] -- error handling, including AT final result codes
//! - [`types`] -- power, lock, registration, bearer and mode types

pub mod error;
pub mod events;
pub mod helpers;
pub mod transport;
pub mod types;

pub use error::{ConnectError, Error, MobileEquipmentError, Result};
pub use events::ModemEvent;
pub use helpers::{cind_to_percent, csq_to_percent, normalize_signal};
pub use transport::Transport;
pub use types::*;
