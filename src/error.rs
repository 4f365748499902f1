use std::error::Error;
use std::fmt;
use std::io;

/// Closed set of failure classes an operation can end in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Credential did not match the one computed for the card's session.
    Authentication,
    /// Declared integrity digest did not match the uploaded archive.
    Integrity,
    /// Malformed, missing or duplicated request data.
    Protocol,
    /// No collision-free name left in the target directory.
    Exhausted,
    /// Staging, extraction or placement failed on the filesystem.
    Io,
    /// The card is not present in the configuration.
    UnknownCard,
    /// The upload ledger could not be queried or written.
    Ledger,
}

impl ErrorKind {
    fn label(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication failure",
            ErrorKind::Integrity => "integrity failure",
            ErrorKind::Protocol => "protocol violation",
            ErrorKind::Exhausted => "resource exhausted",
            ErrorKind::Io => "i/o failure",
            ErrorKind::UnknownCard => "unknown card",
            ErrorKind::Ledger => "ledger failure",
        }
    }
}

/// Failure of a single protocol operation.
///
/// The detail text is meant for the server log only; it is never sent back
/// to the card.
pub struct ServiceError {
    pub kind: ErrorKind,
    pub detail: String,
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> ServiceError {
        ServiceError {
            kind,
            detail: detail.into(),
        }
    }

    pub fn protocol(detail: impl Into<String>) -> ServiceError {
        ServiceError::new(ErrorKind::Protocol, detail)
    }

    pub fn io(detail: impl Into<String>) -> ServiceError {
        ServiceError::new(ErrorKind::Io, detail)
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}: {}", self.kind.label(), self.detail)
    }
}

impl fmt::Debug for ServiceError {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{:?}({})", self.kind, self.detail)
    }
}

impl Error for ServiceError {}

impl From<io::Error> for ServiceError {
    fn from(e: io::Error) -> ServiceError {
        ServiceError::io(e.to_string())
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(e: rusqlite::Error) -> ServiceError {
        ServiceError::new(ErrorKind::Ledger, e.to_string())
    }
}

impl From<hex::FromHexError> for ServiceError {
    fn from(e: hex::FromHexError) -> ServiceError {
        ServiceError::protocol(format!("bad hex value: {}", e))
    }
}
