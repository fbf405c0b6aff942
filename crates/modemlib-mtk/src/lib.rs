//! MediaTek modem support for modemlib.
//!
//! MediaTek chipsets speak standard 27.007 for most operations but replace
//! mode selection, unlock retry counters, and signal reporting with
//! proprietary `+E*` commands. This crate provides:
//!
//! - **Command parsers** ([`commands`]) -- `+EPINC`, `+EGMR`, `+ERAT`, and
//!   the five `+ECSQ` report shapes with their signal scales.
//! - **Profile** ([`models`]) -- factory defaults and the [`MtkPlugin`].
//! - **MtkModem** ([`modem`]) -- the [`ModemOps`](modemlib_broadband::ModemOps)
//!   overrides.
//!
//! # Example
//!
//! ```
//! use modemlib_core::types::{ModeCombination, ModemMode};
//! use modemlib_mtk::commands::{cmd_set_erat, parse_erat};
//!
//! let modes = ModeCombination::new(ModemMode::MODE_2G | ModemMode::MODE_3G, ModemMode::MODE_3G);
//! assert_eq!(cmd_set_erat(modes).unwrap(), "AT+ERAT=2,2");
//! assert_eq!(parse_erat("+ERAT: 2,2,2,2").unwrap(), modes);
//! ```

pub mod commands;
pub mod models;
pub mod modem;

pub use models::{MtkPlugin, mtk};
pub use modem::MtkModem;
