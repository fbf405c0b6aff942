//! AT command engine shared by the generic modem and every vendor plugin.
//!
//! One tokio task owns each AT port's transport and serves a FIFO request
//! queue, so transactions on a port never overlap. The same task scans every
//! inbound chunk for unsolicited result codes and strips them before the
//! reply recognizer sees the bytes.
//!
//! # Architecture
//!
//! - [`protocol`] -- command framing and final result code recognition
//! - [`urc`] -- ordered URC registrations and dispatch
//! - [`io`] -- port task, spawn, and the cloneable [`AtPort`] handle
//! - [`sequence`] -- multi-command sequences and caller-side retries
//! - [`parsers`] -- typed parsers for the standard 27.007 replies

pub mod io;
pub mod parsers;
pub mod protocol;
pub mod sequence;
pub mod urc;

pub use io::{AtCommand, AtPort, PortConfig, spawn_port, spawn_port_with_parser};
pub use protocol::{DefaultResponseParser, ResponseParser};
pub use sequence::{AtStep, ResponseProcessor, StepOutcome, retry_with_delay, run_sequence};
pub use urc::{UrcHandler, UrcMatch, UrcRegistry};
