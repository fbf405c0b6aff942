//! Novatel LTE modem support for modemlib.
//!
//! Novatel LTE cards answer the standard 27.007 set but report unlock
//! retries, the serving system, bands, and the CDMA directory number through
//! `$NW*` commands.
//!
//! - [`commands`] -- `$NWPINR`, `$NWSYSMODE`, `$NWBAND`, and the own-number
//!   step processors.
//! - [`models`] -- the [`novatel_lte`] profile and [`NovatelPlugin`].
//! - [`modem`] -- [`NovatelModem`].
//!
//! ```
//! use modemlib_core::types::{AccessTech, ModemBand};
//! use modemlib_novatel::commands::{parse_nwband, parse_nwsysmode};
//!
//! assert_eq!(parse_nwsysmode("$NWSYSMODE: WCDMA"), AccessTech::UMTS);
//! assert_eq!(parse_nwband("$NWBAND: 200000"), vec![ModemBand::Pcs]);
//! ```

pub mod commands;
pub mod models;
pub mod modem;

pub use models::{NovatelPlugin, novatel_lte};
pub use modem::NovatelModem;
