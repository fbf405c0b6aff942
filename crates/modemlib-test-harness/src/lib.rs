//! modemlib-test-harness: Test utilities and mock transports for modemlib.
//!
//! This crate provides [`MockTransport`] for deterministic testing of the AT
//! engine and vendor plugins without a real modem. A [`MockHandle`] stays
//! with the test after the transport has been moved into a port task, so the
//! test can inject unsolicited result codes and inspect what was sent.

pub mod mock_serial;

pub use mock_serial::{MockHandle, MockTransport};
