//! AnyData CDMA modem support for modemlib.
//!
//! AnyData modules are CDMA-only: they skip SIM and power handling and
//! report their radio state through the proprietary `*STATE?` and
//! `*HSTATE?` queries.
//!
//! - **Reports** ([`commands`]) -- `*STATE`/`*HSTATE` parsing and the
//!   registration verdict for each radio state.
//! - **Profile** ([`models`]) -- factory defaults and the [`AnydataPlugin`].
//! - **AnydataModem** ([`modem`]) -- the [`ModemOps`](modemlib_broadband::ModemOps)
//!   overrides.

pub mod commands;
pub mod models;
pub mod modem;

pub use models::{AnydataPlugin, anydata};
pub use modem::AnydataModem;
