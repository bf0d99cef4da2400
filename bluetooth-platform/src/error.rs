//! Errors reported by a platform Bluetooth stack.

use std::fmt::Display;
use std::sync::Arc;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone)]
pub struct Error {
    data: ErrorData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    Bluetooth(BluetoothError),
    Att(AttError),
    Other,
}

#[derive(Debug, Clone)]
enum ErrorData {
    Reported { kind: ErrorKind, message: Arc<str> },
    Simple(ErrorKind),
}

/// A host stack error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BluetoothError(pub i32);

impl BluetoothError {
    pub const UNKNOWN: Self = Self(0);
    pub const INVALID_PARAMETERS: Self = Self(1);
    pub const INVALID_HANDLE: Self = Self(2);
    pub const NOT_CONNECTED: Self = Self(3);
    pub const OUT_OF_SPACE: Self = Self(4);
    pub const OPERATION_CANCELLED: Self = Self(5);
    pub const CONNECTION_TIMEOUT: Self = Self(6);
    pub const PERIPHERAL_DISCONNECTED: Self = Self(7);
    pub const UUID_NOT_ALLOWED: Self = Self(8);
    pub const ALREADY_ADVERTISING: Self = Self(9);
    pub const CONNECTION_FAILED: Self = Self(10);
    pub const CONNECTION_LIMIT_REACHED: Self = Self(11);
    pub const UNKNOWN_DEVICE: Self = Self(12);
    pub const OPERATION_NOT_SUPPORTED: Self = Self(13);
    pub const PEER_REMOVED_PAIRING_INFORMATION: Self = Self(14);
    pub const ENCRYPTION_TIMED_OUT: Self = Self(15);
    pub const TOO_MANY_LE_PAIRED_DEVICES: Self = Self(16);
}

/// An ATT protocol error code (Bluetooth Core Specification Vol 3, Part F, §3.4.1.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttError(pub u8);

impl AttError {
    pub const SUCCESS: Self = Self(0x00);
    pub const INVALID_HANDLE: Self = Self(0x01);
    pub const READ_NOT_PERMITTED: Self = Self(0x02);
    pub const WRITE_NOT_PERMITTED: Self = Self(0x03);
    pub const INVALID_PDU: Self = Self(0x04);
    pub const INSUFFICIENT_AUTHENTICATION: Self = Self(0x05);
    pub const REQUEST_NOT_SUPPORTED: Self = Self(0x06);
    pub const INVALID_OFFSET: Self = Self(0x07);
    pub const INSUFFICIENT_AUTHORIZATION: Self = Self(0x08);
    pub const PREPARE_QUEUE_FULL: Self = Self(0x09);
    pub const ATTRIBUTE_NOT_FOUND: Self = Self(0x0a);
    pub const ATTRIBUTE_NOT_LONG: Self = Self(0x0b);
    pub const INSUFFICIENT_ENCRYPTION_KEY_SIZE: Self = Self(0x0c);
    pub const INVALID_ATTRIBUTE_VALUE_LENGTH: Self = Self(0x0d);
    pub const UNLIKELY_ERROR: Self = Self(0x0e);
    pub const INSUFFICIENT_ENCRYPTION: Self = Self(0x0f);
    pub const UNSUPPORTED_GROUP_TYPE: Self = Self(0x10);
    pub const INSUFFICIENT_RESOURCES: Self = Self(0x11);
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.data {
            ErrorData::Reported { message, .. } => f.write_str(message),
            ErrorData::Simple(kind) => kind.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            data: ErrorData::Simple(kind),
        }
    }
}

impl From<BluetoothError> for Error {
    fn from(code: BluetoothError) -> Self {
        ErrorKind::Bluetooth(code).into()
    }
}

impl From<AttError> for Error {
    fn from(code: AttError) -> Self {
        ErrorKind::Att(code).into()
    }
}

impl Error {
    /// Creates an error carrying the stack's own description of what went wrong.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            data: ErrorData::Reported {
                kind,
                message: message.into().into(),
            },
        }
    }

    /// Returns the stack-provided message, if there is one.
    pub fn message(&self) -> Option<&str> {
        match &self.data {
            ErrorData::Reported { message, .. } => Some(message),
            ErrorData::Simple(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match &self.data {
            ErrorData::Reported { kind, .. } => *kind,
            ErrorData::Simple(kind) => *kind,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Bluetooth(code) => match *code {
                BluetoothError::UNKNOWN => f.write_str("unknown"),
                BluetoothError::INVALID_PARAMETERS => f.write_str("invalid parameters"),
                BluetoothError::INVALID_HANDLE => f.write_str("invalid handle"),
                BluetoothError::NOT_CONNECTED => f.write_str("not connected"),
                BluetoothError::OUT_OF_SPACE => f.write_str("out of space"),
                BluetoothError::OPERATION_CANCELLED => f.write_str("operation cancelled"),
                BluetoothError::CONNECTION_TIMEOUT => f.write_str("connection timeout"),
                BluetoothError::PERIPHERAL_DISCONNECTED => f.write_str("peripheral disconnected"),
                BluetoothError::UUID_NOT_ALLOWED => f.write_str("UUID not allowed"),
                BluetoothError::ALREADY_ADVERTISING => f.write_str("already advertising"),
                BluetoothError::CONNECTION_FAILED => f.write_str("connection failed"),
                BluetoothError::CONNECTION_LIMIT_REACHED => f.write_str("connection limit reached"),
                BluetoothError::UNKNOWN_DEVICE => f.write_str("unknown device"),
                BluetoothError::OPERATION_NOT_SUPPORTED => f.write_str("operation not supported"),
                BluetoothError::PEER_REMOVED_PAIRING_INFORMATION => {
                    f.write_str("peer removed pairing information")
                }
                BluetoothError::ENCRYPTION_TIMED_OUT => f.write_str("encryption timed out"),
                BluetoothError::TOO_MANY_LE_PAIRED_DEVICES => {
                    f.write_str("too many LE paired devices")
                }
                _ => write!(f, "unknown bluetooth error ({})", code.0),
            },
            ErrorKind::Att(code) => match *code {
                AttError::SUCCESS => f.write_str("success"),
                AttError::INVALID_HANDLE => f.write_str("invalid handle"),
                AttError::READ_NOT_PERMITTED => f.write_str("read not permitted"),
                AttError::WRITE_NOT_PERMITTED => f.write_str("write not permitted"),
                AttError::INVALID_PDU => f.write_str("invalid PDU"),
                AttError::INSUFFICIENT_AUTHENTICATION => f.write_str("insufficient authentication"),
                AttError::REQUEST_NOT_SUPPORTED => f.write_str("request not supported"),
                AttError::INVALID_OFFSET => f.write_str("invalid offset"),
                AttError::INSUFFICIENT_AUTHORIZATION => f.write_str("insufficient authorization"),
                AttError::PREPARE_QUEUE_FULL => f.write_str("prepare queue full"),
                AttError::ATTRIBUTE_NOT_FOUND => f.write_str("attribute not found"),
                AttError::ATTRIBUTE_NOT_LONG => f.write_str("attribute not long"),
                AttError::INSUFFICIENT_ENCRYPTION_KEY_SIZE => {
                    f.write_str("insufficient encryption key size")
                }
                AttError::INVALID_ATTRIBUTE_VALUE_LENGTH => {
                    f.write_str("invalid attribute value length")
                }
                AttError::UNLIKELY_ERROR => f.write_str("unlikely error"),
                AttError::INSUFFICIENT_ENCRYPTION => f.write_str("insufficient encryption"),
                AttError::UNSUPPORTED_GROUP_TYPE => f.write_str("unsupported group type"),
                AttError::INSUFFICIENT_RESOURCES => f.write_str("insufficient resources"),
                _ => write!(f, "unknown bluetooth ATT error ({:#04x})", code.0),
            },
            ErrorKind::Other => f.write_str("other error"),
        }
    }
}
