/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::fmt;

use serde::{Deserialize, Serialize};

/// Failures reported by a storage backend. The engine wraps these without
/// interpreting them.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum BackendError {
    DbNotFound,
    StoreNotFound,
    IndexNotFound,
    QuotaExceeded,
    DbErr(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::DbNotFound => write!(f, "database not found"),
            BackendError::StoreNotFound => write!(f, "object store not found"),
            BackendError::IndexNotFound => write!(f, "index not found"),
            BackendError::QuotaExceeded => write!(f, "quota exceeded"),
            BackendError::DbErr(err) => write!(f, "backend failure: {err}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<bincode::Error> for BackendError {
    fn from(err: bincode::Error) -> Self {
        BackendError::DbErr(format!("{err:?}"))
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// The exceptions surfaced to callers of the engine, named after the
/// `DOMException` they correspond to.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Error {
    /// A supplied key or key range is invalid in its context.
    Data(Option<String>),
    /// The owning transaction is not active.
    TransactionInactive,
    /// A mutation was attempted in a read-only transaction.
    ReadOnly,
    /// The operation is not valid in the current lifecycle stage.
    InvalidState(Option<String>),
    /// The operation is not valid for this kind of object.
    InvalidAccess(Option<String>),
    /// A named store or index does not exist or is out of scope.
    NotFound(Option<String>),
    /// A key generator ran out of keys or a uniqueness constraint failed.
    Constraint(Option<String>),
    /// Attached to every pending request of an aborted transaction.
    Abort,
    /// A requested version is older than the stored one.
    Version,
    /// A key path does not follow the key path grammar.
    Syntax(Option<String>),
    /// An argument has the wrong shape.
    Type(String),
    /// The storage backend failed.
    Backend(BackendError),
}

impl Error {
    /// The `DOMException` name of this error.
    pub fn name(&self) -> &'static str {
        match self {
            Error::Data(_) => "DataError",
            Error::TransactionInactive => "TransactionInactiveError",
            Error::ReadOnly => "ReadOnlyError",
            Error::InvalidState(_) => "InvalidStateError",
            Error::InvalidAccess(_) => "InvalidAccessError",
            Error::NotFound(_) => "NotFoundError",
            Error::Constraint(_) => "ConstraintError",
            Error::Abort => "AbortError",
            Error::Version => "VersionError",
            Error::Syntax(_) => "SyntaxError",
            Error::Type(_) => "TypeError",
            Error::Backend(BackendError::QuotaExceeded) => "QuotaExceededError",
            Error::Backend(_) => "UnknownError",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Error::Data(message) |
            Error::InvalidState(message) |
            Error::InvalidAccess(message) |
            Error::NotFound(message) |
            Error::Constraint(message) |
            Error::Syntax(message) => message.as_deref(),
            Error::Type(message) => Some(message.as_str()),
            Error::Backend(err) => return write!(f, "{}: {err}", self.name()),
            _ => None,
        };
        match message {
            Some(message) => write!(f, "{}: {message}", self.name()),
            None => f.write_str(self.name()),
        }
    }
}

impl std::error::Error for Error {}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::Backend(err)
    }
}

pub type Fallible<T> = Result<T, Error>;
