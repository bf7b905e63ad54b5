//! Error types for modemlib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, device-layer, and
//! registration-layer errors are all captured here so a single typed error
//! reaches the UI/IPC boundary.

use std::fmt;

/// The error type for all modemlib operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port open/configure failures).
    #[error("transport error: {0}")]
    Transport(String),

    /// The device did not finish answering a command before its timeout.
    #[error("timeout waiting for response to {command}")]
    Timeout {
        /// Name of the command that timed out.
        command: String,
    },

    /// The device answered a command with an error result code.
    #[error("device error: {0}")]
    Device(DeviceError),

    /// A response did not have the shape the caller expected.
    #[error("unexpected response: {0}")]
    ParseMismatch(String),

    /// The network rejected the registration attempt (`+CREG` status 3).
    #[error("registration denied: {0}")]
    RegistrationDenied(String),

    /// Registration did not complete before the workflow deadline.
    #[error("timed out waiting for network registration")]
    RegistrationTimeout,

    /// The device has no network information to report yet.
    #[error("network temporarily unavailable")]
    NetworkTemporarilyUnavailable,

    /// Neither the home network nor any preferred roaming partner is visible.
    #[error("no visible operator matches the SIM")]
    NoOperatorMatch,

    /// An invalid parameter was passed (bad pattern, missing port, ...).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the modem has been established, or the IO task is gone.
    #[error("not connected")]
    NotConnected,

    /// The connection to the modem was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means the network may answer differently soon.
    ///
    /// Covers [`Error::NetworkTemporarilyUnavailable`] and the device error
    /// kinds that report the same condition through `+CME ERROR`.
    pub fn is_network_transient(&self) -> bool {
        match self {
            Error::NetworkTemporarilyUnavailable => true,
            Error::Device(e) => matches!(
                e.kind,
                DeviceErrorKind::NoNetworkService | DeviceErrorKind::NetworkTimeout
            ),
            _ => false,
        }
    }
}

impl From<DeviceError> for Error {
    fn from(e: DeviceError) -> Self {
        Error::Device(e)
    }
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Which result-code family a device error was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFamily {
    /// `+CME ERROR:` (mobile equipment / SIM).
    Cme,
    /// `+CMS ERROR:` (message service).
    Cms,
    /// Bare `ERROR` or a vendor text without a family prefix.
    Generic,
}

impl fmt::Display for ErrorFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorFamily::Cme => f.write_str("CME"),
            ErrorFamily::Cms => f.write_str("CMS"),
            ErrorFamily::Generic => f.write_str("generic"),
        }
    }
}

/// Classified meaning of a device error, independent of numeric/text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorKind {
    PhoneFailure,
    OperationNotAllowed,
    OperationNotSupported,
    SimNotInserted,
    SimPinRequired,
    SimPukRequired,
    SimFailure,
    SimBusy,
    SimWrong,
    IncorrectPassword,
    SimPin2Required,
    SimPuk2Required,
    SimNotStarted,
    MemoryFull,
    InvalidIndex,
    NotFound,
    MemoryFailure,
    NoNetworkService,
    NetworkTimeout,
    NetworkNotAllowed,
    Unknown,
}

/// An error result code reported by the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceError {
    /// Result-code family.
    pub family: ErrorFamily,
    /// Numeric code, when the device reported one.
    pub code: Option<u16>,
    /// Classified meaning.
    pub kind: DeviceErrorKind,
    /// The raw text following the family prefix (or the bare result code).
    pub message: String,
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} {code} ({:?})", self.family, self.kind),
            None => write!(f, "{} {:?}: {}", self.family, self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cme(code: u16, kind: DeviceErrorKind) -> DeviceError {
        DeviceError {
            family: ErrorFamily::Cme,
            code: Some(code),
            kind,
            message: code.to_string(),
        }
    }

    #[test]
    fn error_display_timeout() {
        let e = Error::Timeout {
            command: "get_netreg_status".into(),
        };
        assert_eq!(
            e.to_string(),
            "timeout waiting for response to get_netreg_status"
        );
    }

    #[test]
    fn error_display_device_numeric() {
        let e = Error::Device(cme(10, DeviceErrorKind::SimNotInserted));
        assert_eq!(e.to_string(), "device error: CME 10 (SimNotInserted)");
    }

    #[test]
    fn error_display_device_text() {
        let e = Error::Device(DeviceError {
            family: ErrorFamily::Cme,
            code: None,
            kind: DeviceErrorKind::SimBusy,
            message: "SIM busy".into(),
        });
        assert_eq!(e.to_string(), "device error: CME SimBusy: SIM busy");
    }

    #[test]
    fn error_display_registration_variants() {
        assert_eq!(
            Error::RegistrationDenied("rejected".into()).to_string(),
            "registration denied: rejected"
        );
        assert_eq!(
            Error::RegistrationTimeout.to_string(),
            "timed out waiting for network registration"
        );
        assert_eq!(
            Error::NoOperatorMatch.to_string(),
            "no visible operator matches the SIM"
        );
    }

    #[test]
    fn network_transient_classification() {
        assert!(Error::NetworkTemporarilyUnavailable.is_network_transient());
        assert!(Error::Device(cme(30, DeviceErrorKind::NoNetworkService)).is_network_transient());
        assert!(!Error::Device(cme(14, DeviceErrorKind::SimBusy)).is_network_transient());
        assert!(!Error::RegistrationTimeout.is_network_transient());
    }

    #[test]
    fn error_from_device_error() {
        let e: Error = cme(11, DeviceErrorKind::SimPinRequired).into();
        assert!(matches!(e, Error::Device(DeviceError { code: Some(11), .. })));
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
