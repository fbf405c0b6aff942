//! Error types for modemlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, AT final result
//! codes reported by the modem, reply grammar mismatches, and state machine
//! conflicts are all captured here.

use std::fmt;

/// A `+CME ERROR` code reported by the mobile equipment (3GPP TS 27.007).
///
/// Only the codes the state machines act on have named constants; any
/// other numeric code is carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MobileEquipmentError(pub u16);

impl MobileEquipmentError {
    pub const PHONE_FAILURE: Self = Self(0);
    pub const NOT_ALLOWED: Self = Self(3);
    pub const NOT_SUPPORTED: Self = Self(4);
    pub const PH_SIM_PIN: Self = Self(5);
    pub const SIM_NOT_INSERTED: Self = Self(10);
    pub const SIM_PIN: Self = Self(11);
    pub const SIM_PUK: Self = Self(12);
    pub const SIM_FAILURE: Self = Self(13);
    pub const SIM_BUSY: Self = Self(14);
    pub const SIM_WRONG: Self = Self(15);
    pub const INCORRECT_PASSWORD: Self = Self(16);
    pub const SIM_PIN2: Self = Self(17);
    pub const SIM_PUK2: Self = Self(18);
    pub const NO_NETWORK: Self = Self(30);
    pub const NETWORK_TIMEOUT: Self = Self(31);
    /// Reported for a bare `ERROR` final result and for unparseable codes.
    pub const UNKNOWN: Self = Self(100);

    /// Raw numeric code.
    pub fn code(&self) -> u16 {
        self.0
    }

    /// `true` when the SIM is still initializing and the command may
    /// succeed if retried later.
    pub fn is_sim_busy(&self) -> bool {
        *self == Self::SIM_BUSY
    }

    /// Short human-readable description of well-known codes.
    pub fn description(&self) -> &'static str {
        match self.0 {
            0 => "phone failure",
            3 => "operation not allowed",
            4 => "operation not supported",
            5 => "PH-SIM PIN required",
            10 => "SIM not inserted",
            11 => "SIM PIN required",
            12 => "SIM PUK required",
            13 => "SIM failure",
            14 => "SIM busy",
            15 => "SIM wrong",
            16 => "incorrect password",
            17 => "SIM PIN2 required",
            18 => "SIM PUK2 required",
            30 => "no network service",
            31 => "network timeout",
            _ => "unknown error",
        }
    }
}

impl fmt::Display for MobileEquipmentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description(), self.0)
    }
}

/// Failure final result codes returned by a dial command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectError {
    NoCarrier,
    Busy,
    NoAnswer,
    NoDialtone,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectError::NoCarrier => "NO CARRIER",
            ConnectError::Busy => "BUSY",
            ConnectError::NoAnswer => "NO ANSWER",
            ConnectError::NoDialtone => "NO DIALTONE",
        };
        write!(f, "{s}")
    }
}

/// The error type for all modemlib operations.
///
/// Variants separate transport failures (the modem could not be reached),
/// equipment errors (the modem answered with an error final result code),
/// parse errors (the reply did not match the expected grammar), and
/// unsupported operations (the vendor does not implement the capability).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/read/write).
    #[error("transport error: {0}")]
    Transport(String),

    /// A framing error in the AT byte stream.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A reply did not match the grammar expected by its parser.
    #[error("parse error: {0}")]
    Parse(String),

    /// Timed out waiting for a final result code from the modem.
    ///
    /// The port stays usable; the next queued command is served normally.
    #[error("timeout waiting for response")]
    Timeout,

    /// The modem answered with `+CME ERROR` or a bare `ERROR`.
    #[error("mobile equipment error: {0}")]
    MobileEquipment(MobileEquipmentError),

    /// The modem answered with `+CMS ERROR`.
    #[error("message service error: {0}")]
    MessageService(u16),

    /// A dial command was answered with a failure result code.
    #[error("connection failed: {0}")]
    ConnectFailed(ConnectError),

    /// The connection attempt failed with a message refined by the modem
    /// (for example the `+CEER` extended error report).
    #[error("connection failed: {0}")]
    Connection(String),

    /// The requested operation is not supported by this modem.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a modem operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The operation conflicts with the current state of the object.
    #[error("wrong state: {0}")]
    WrongState(String),

    /// The same operation is already running.
    #[error("operation in progress: {0}")]
    InProgress(String),

    /// The operation is not allowed by the current policy (e.g. roaming).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The operation was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// No connection to the modem port has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem port was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` if this error is a `+CME ERROR`/`ERROR` final result.
    pub fn is_mobile_equipment(&self) -> bool {
        matches!(self, Error::MobileEquipment(_))
    }

    /// `true` for errors caused by the modem not answering at all.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Transport(_)
                | Error::Timeout
                | Error::NotConnected
                | Error::ConnectionLost
                | Error::Io(_)
        )
    }

    /// `true` for the `Unsupported` variant.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Error::Unsupported(_))
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
