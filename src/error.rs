/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::fmt;

/// A boxed error that is `Send` and `Sync`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by this library
///
/// NOTE: errors wrap their underlying cause; walk the `source()` chain for
/// full context (path, offset, task id).
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    source: BoxError,
}

/// General categories of session and transfer errors.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The connection is absent, disconnected, or its socket has failed
    NotConnected,

    /// The pool is at capacity and cannot produce another connection
    PoolFull,

    /// Neither the pool nor the session share map could produce a connection
    NoConnectionAvailable,

    /// Remote data object or collection not found
    NotFound,

    /// The server does not support the requested operation
    Unsupported,

    /// Local filesystem or socket I/O error
    IoError,

    /// Any other remote error, with the server error code preserved
    Remote(ErrorCode),

    /// A seek did not reach the requested offset
    SeekMismatch,

    /// Workers finished but fewer bytes than expected were transferred
    TransferIncomplete,

    /// A transfer task failed; the inner source carries the cause
    TaskFailed(usize),

    /// The operation stopped because a sibling task already failed
    OperationCancelled,

    /// Operation input validation issues
    InputInvalid,

    /// Some kind of internal runtime issue (e.g. task failure, poisoned mutex)
    RuntimeError,
}

/// A numeric error code reported by the remote server.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    /// Catalog query returned no rows
    pub const CAT_NO_ROWS_FOUND: ErrorCode = ErrorCode(-808000);
    /// Catalog has no such collection
    pub const CAT_UNKNOWN_COLLECTION: ErrorCode = ErrorCode(-814000);
    /// Catalog has no such data object
    pub const CAT_UNKNOWN_FILE: ErrorCode = ErrorCode(-816000);

    /// Whether this code means the path (object or collection) does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            *self,
            Self::CAT_NO_ROWS_FOUND | Self::CAT_UNKNOWN_COLLECTION | Self::CAT_UNKNOWN_FILE
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Error {
    /// Creates a new [`Error`] from a known kind of error as well as an
    /// arbitrary error source.
    pub fn new<E>(kind: ErrorKind, err: E) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            kind,
            source: err.into(),
        }
    }

    /// Returns the corresponding [`ErrorKind`] for this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The remote error code, if this error originated on the server.
    pub fn remote_code(&self) -> Option<ErrorCode> {
        match self.kind {
            ErrorKind::Remote(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::NotConnected => write!(f, "connection is not usable"),
            ErrorKind::PoolFull => write!(f, "connection pool is full"),
            ErrorKind::NoConnectionAvailable => write!(f, "no connection available"),
            ErrorKind::NotFound => write!(f, "data object or collection not found"),
            ErrorKind::Unsupported => write!(f, "operation not supported by the server"),
            ErrorKind::IoError => write!(f, "I/O error"),
            ErrorKind::Remote(code) => write!(f, "remote error (code {code})"),
            ErrorKind::SeekMismatch => write!(f, "seek did not reach the requested offset"),
            ErrorKind::TransferIncomplete => write!(f, "transfer incomplete"),
            ErrorKind::TaskFailed(id) => write!(f, "transfer task {id} failed"),
            ErrorKind::OperationCancelled => write!(f, "operation cancelled"),
            ErrorKind::InputInvalid => write!(f, "invalid input"),
            ErrorKind::RuntimeError => write!(f, "runtime error"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, value)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error
where
    T: Send + Sync + 'static,
{
    fn from(value: std::sync::PoisonError<T>) -> Self {
        Self::new(ErrorKind::RuntimeError, value)
    }
}

pub(crate) fn not_connected<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::NotConnected, err)
}

pub(crate) fn pool_full<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::PoolFull, err)
}

pub(crate) fn no_connection_available<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::NoConnectionAvailable, err)
}

pub(crate) fn not_found<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::NotFound, err)
}

pub(crate) fn unsupported<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::Unsupported, err)
}

pub(crate) fn io_error<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::IoError, err)
}

pub(crate) fn remote<E>(code: ErrorCode, err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::Remote(code), err)
}

pub(crate) fn seek_mismatch(path: &str, requested: i64, reached: i64) -> Error {
    Error::new(
        ErrorKind::SeekMismatch,
        format!("seek on {path:?} requested offset {requested} but reached {reached}"),
    )
}

pub(crate) fn task_failed(task_id: usize, err: Error) -> Error {
    Error::new(ErrorKind::TaskFailed(task_id), err)
}

pub(crate) fn operation_cancelled() -> Error {
    Error::new(
        ErrorKind::OperationCancelled,
        "stopping, a sibling task has already failed",
    )
}

pub(crate) fn runtime<E>(err: E) -> Error
where
    E: Into<BoxError>,
{
    Error::new(ErrorKind::RuntimeError, err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_and_source_are_preserved() {
        let err = task_failed(3, seek_mismatch("/zone/home/a.dat", 100, 0));
        assert_eq!(err.kind(), &ErrorKind::TaskFailed(3));
        let source = std::error::Error::source(&err).expect("has source");
        assert!(source.to_string().contains("seek"));
    }

    #[test]
    fn catalog_codes_map_to_not_found() {
        assert!(ErrorCode::CAT_NO_ROWS_FOUND.is_not_found());
        assert!(ErrorCode::CAT_UNKNOWN_FILE.is_not_found());
        assert!(ErrorCode::CAT_UNKNOWN_COLLECTION.is_not_found());
        assert!(!ErrorCode(-1).is_not_found());
    }

    #[test]
    fn remote_code_accessor() {
        let err = remote(ErrorCode(-818000), "access denied");
        assert_eq!(err.remote_code(), Some(ErrorCode(-818000)));
        assert_eq!(io_error("boom").remote_code(), None);
    }
}
