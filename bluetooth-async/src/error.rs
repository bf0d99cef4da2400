//! Error types for this crate.

use std::fmt::Display;

use bluetooth_platform::error::{AttError, BluetoothError};
use futures_channel::oneshot;

/// A convenience type alias for a `Result` with an `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate.
#[derive(Debug, Clone)]
pub struct Error {
    data: ErrorData,
}

/// The kind of error that occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    /// A host stack error.
    Bluetooth(BluetoothError),
    /// A Bluetooth GATT server error.
    Att(AttError),
    /// The platform reported a failure without saying why.
    Unknown,
    /// The application is not allowed to use Bluetooth.
    Unauthorized,
    /// Bluetooth is not supported on this device.
    Unavailable,
    /// The deadline for the operation elapsed.
    Timeout,
    /// The peripheral is not connected, or disconnected before the operation completed.
    Disconnected,
    /// The operation was canceled.
    Canceled,
    /// The characteristic has not been discovered on this peripheral.
    NotDiscovered,
    /// An unknown or other error.
    Other,
}

#[derive(Debug, Clone)]
enum ErrorData {
    Platform(bluetooth_platform::Error),
    Simple(ErrorKind),
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Platform(error) => error.fmt(f),
            ErrorData::Simple(kind) => kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.data {
            ErrorData::Platform(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }
}

impl From<bluetooth_platform::Error> for Error {
    fn from(error: bluetooth_platform::Error) -> Self {
        Error {
            data: ErrorData::Platform(error),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind),
        }
    }
}

impl From<bluetooth_platform::error::ErrorKind> for Error {
    fn from(kind: bluetooth_platform::error::ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind.into()),
        }
    }
}

impl From<oneshot::Canceled> for Error {
    fn from(_value: oneshot::Canceled) -> Self {
        ErrorKind::Canceled.into()
    }
}

impl Error {
    /// If this error was reported by the platform, returns a reference to it.
    pub fn get_ref(&self) -> Option<&bluetooth_platform::Error> {
        match &self.data {
            ErrorData::Platform(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }

    /// If this error was reported by the platform, returns it.
    pub fn into_inner(self) -> Option<bluetooth_platform::Error> {
        match self.data {
            ErrorData::Platform(error) => Some(error),
            ErrorData::Simple(_) => None,
        }
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Platform(error) => error.kind().into(),
            ErrorData::Simple(kind) => *kind,
        }
    }
}

impl From<bluetooth_platform::error::ErrorKind> for ErrorKind {
    fn from(kind: bluetooth_platform::error::ErrorKind) -> Self {
        match kind {
            bluetooth_platform::error::ErrorKind::Bluetooth(code) => ErrorKind::Bluetooth(code),
            bluetooth_platform::error::ErrorKind::Att(code) => ErrorKind::Att(code),
            bluetooth_platform::error::ErrorKind::Other => ErrorKind::Other,
        }
    }
}

impl TryFrom<ErrorKind> for bluetooth_platform::error::ErrorKind {
    type Error = ErrorKind;

    fn try_from(kind: ErrorKind) -> std::result::Result<Self, Self::Error> {
        match kind {
            ErrorKind::Bluetooth(code) => Ok(bluetooth_platform::error::ErrorKind::Bluetooth(code)),
            ErrorKind::Att(code) => Ok(bluetooth_platform::error::ErrorKind::Att(code)),
            ErrorKind::Other => Ok(bluetooth_platform::error::ErrorKind::Other),
            ErrorKind::Unknown
            | ErrorKind::Unauthorized
            | ErrorKind::Unavailable
            | ErrorKind::Timeout
            | ErrorKind::Disconnected
            | ErrorKind::Canceled
            | ErrorKind::NotDiscovered => Err(kind),
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Bluetooth(code) => {
                bluetooth_platform::error::ErrorKind::Bluetooth(*code).fmt(f)
            }
            ErrorKind::Att(code) => bluetooth_platform::error::ErrorKind::Att(*code).fmt(f),
            ErrorKind::Other => bluetooth_platform::error::ErrorKind::Other.fmt(f),
            ErrorKind::Unknown => f.write_str("unknown error"),
            ErrorKind::Unauthorized => f.write_str("bluetooth use is not authorized"),
            ErrorKind::Unavailable => f.write_str("bluetooth is unavailable"),
            ErrorKind::Timeout => f.write_str("timed out"),
            ErrorKind::Disconnected => f.write_str("peripheral disconnected"),
            ErrorKind::Canceled => f.write_str("canceled"),
            ErrorKind::NotDiscovered => f.write_str("characteristic not discovered"),
        }
    }
}
