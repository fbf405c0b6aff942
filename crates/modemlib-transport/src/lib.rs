//! Transport implementations for modemlib.
//!
//! This crate provides the serial implementation of the
//! [`Transport`](modemlib_core::Transport) trait from `modemlib-core`.
//! Cellular modems expose their AT command interfaces as USB CDC-ACM or
//! vendor serial ports (`/dev/ttyUSB*`, `/dev/ttyACM*`), so a serial stream
//! is the only physical link the library needs.
//!
//! # Example
//!
//! ```no_run
//! use modemlib_transport::SerialTransport;
//! use modemlib_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> modemlib_core::Result<()> {
//! let mut transport = SerialTransport::open("/dev/ttyUSB2", 115200).await?;
//!
//! transport.send(b"ATI\r").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(1)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;

pub use serial::{DataBits, FlowControl, Parity, SerialConfig, SerialTransport, StopBits};
