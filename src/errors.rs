//! Crate-wide error type.
//!
//! The variant names mirror the `chidb` error taxonomy the B-Tree layer is
//! specified against (`ENOMEM`, `EIO`, `EPAGENO`, ...); everything else
//! (`Db`, `Schema`, `Encoding`, `LockTable`) is ambient plumbing for the
//! catalog/row layer built on top of it.
use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Allocation failure for a descriptor or buffer (`ENOMEM`).
    Mem(String),
    /// Pager-reported I/O failure (`EIO`).
    Io(std::io::Error),
    /// Invalid page number (`EPAGENO`).
    PageNo(String),
    /// Invalid cell index (`ECELLNO`).
    CellNo(String),
    /// File header does not validate (`ECORRUPTHEADER`).
    CorruptHeader(String),
    /// Key not present during a search (`ENOTFOUND`).
    NotFound(String),
    /// Insertion of an already-present key (`EDUPLICATE`).
    Duplicate(String),
    /// A helper path required at least one cell but found none (`EEMPTY`).
    Empty(String),
    /// A cell does not fit within a page; this core has no overflow chain.
    Oversized(String),
    Db(String),
    Schema(String),
    Encoding(String),
    LockTable(String),
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Mem(msg) => write!(f, "out of memory: {}", msg),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::PageNo(msg) => write!(f, "invalid page number: {}", msg),
            Error::CellNo(msg) => write!(f, "invalid cell number: {}", msg),
            Error::CorruptHeader(msg) => write!(f, "corrupt file header: {}", msg),
            Error::NotFound(msg) => write!(f, "not found: {}", msg),
            Error::Duplicate(msg) => write!(f, "duplicate key: {}", msg),
            Error::Empty(msg) => write!(f, "node is empty: {}", msg),
            Error::Oversized(msg) => write!(f, "cell too large for page: {}", msg),
            Error::Db(msg) => write!(f, "DB error: {}", msg),
            Error::Schema(msg) => write!(f, "schema error: {}", msg),
            Error::Encoding(msg) => write!(f, "encoding error: {}", msg),
            Error::LockTable(msg) => write!(f, "lock error: {}", msg),
            Error::Other(msg) => write!(f, "error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error::Io(err)
    }
}

/// Builds an `Error` variant from a format string, the way call sites
/// throughout the storage layer report context-rich failures.
///
/// ```ignore
/// return Err(err!(PageNo, "page {} is out of range (max {})", npage, max));
/// ```
#[macro_export]
macro_rules! err {
    ($variant:ident, $($arg:tt)*) => {
        $crate::errors::Error::$variant(format!($($arg)*))
    };
}
