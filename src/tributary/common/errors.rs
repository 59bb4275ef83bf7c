use std::fmt::{Debug, Display};
use std::{fmt, io, result};
use std::sync::PoisonError;

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

#[derive(Debug)]
pub enum ErrorKind {
    Timeout,
    PoisonError,
    ClosedError,
    NoMasterFound,
    NoReadReplicaAvailable,
    NoCandidates,
    UnknownNode(u8),
    NotFound(u64),
    ConnectionFailure(String),
    ValidationError(String),
    AuthorizationError(String),
    PrimaryTransactionFailure(Error),
    FragmentTransactionFailure(Error),
    FailoverFailure(Error),
    StringError(String),
    IOError(io::Error),
    YAMLError(serde_yaml::Error),
    MySqlError(mysql_async::Error),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error::from_kind(ErrorKind::StringError(s.to_string()))
    }

    fn from_kind(kind: ErrorKind) -> Self {
        Error {
            err: Box::new(kind),
        }
    }

    pub fn timeout() -> Self {
        Error::from_kind(ErrorKind::Timeout)
    }

    pub fn closed() -> Self {
        Error::from_kind(ErrorKind::ClosedError)
    }

    pub fn no_master() -> Self {
        Error::from_kind(ErrorKind::NoMasterFound)
    }

    pub fn no_read_replica() -> Self {
        Error::from_kind(ErrorKind::NoReadReplicaAvailable)
    }

    pub fn no_candidates() -> Self {
        Error::from_kind(ErrorKind::NoCandidates)
    }

    pub fn unknown_node(id: u8) -> Self {
        Error::from_kind(ErrorKind::UnknownNode(id))
    }

    pub fn not_found(id: u64) -> Self {
        Error::from_kind(ErrorKind::NotFound(id))
    }

    pub fn connection<S: ToString>(s: S) -> Self {
        Error::from_kind(ErrorKind::ConnectionFailure(s.to_string()))
    }

    pub fn validation<S: ToString>(s: S) -> Self {
        Error::from_kind(ErrorKind::ValidationError(s.to_string()))
    }

    pub fn authorization<S: ToString>(s: S) -> Self {
        Error::from_kind(ErrorKind::AuthorizationError(s.to_string()))
    }

    pub fn primary_transaction(cause: Error) -> Self {
        Error::from_kind(ErrorKind::PrimaryTransactionFailure(cause))
    }

    pub fn fragment_transaction(cause: Error) -> Self {
        Error::from_kind(ErrorKind::FragmentTransactionFailure(cause))
    }

    pub fn failover(cause: Error) -> Self {
        Error::from_kind(ErrorKind::FailoverFailure(cause))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    /// The underlying error for the wrapping kinds, otherwise self.
    pub fn root_cause(&self) -> &Error {
        match self.kind() {
            ErrorKind::PrimaryTransactionFailure(e) |
            ErrorKind::FragmentTransactionFailure(e) |
            ErrorKind::FailoverFailure(e) => e.root_cause(),
            _ => self,
        }
    }

    /// Returns true for client errors that are never worth retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::ValidationError(_) | ErrorKind::AuthorizationError(_))
    }

    /// The HTTP status code a request handler should answer with for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound(_) => 404,
            ErrorKind::ValidationError(_) | ErrorKind::AuthorizationError(_) => 400,
            _ => 500,
        }
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error::from_kind(ErrorKind::StringError(String::from(err)))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error::from_kind(ErrorKind::StringError(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::from_kind(ErrorKind::IOError(err))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::from_kind(ErrorKind::YAMLError(err))
    }
}

impl From<mysql_async::Error> for Error {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Io(e) => Error::connection(e),
            e => Error::from_kind(ErrorKind::MySqlError(e)),
        }
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::timeout()
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_: PoisonError<Guard>) -> Self {
        Error::from_kind(ErrorKind::PoisonError)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl std::error::Error for Error {}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Timeout => f.write_str("operation timed out"),
            ErrorKind::ClosedError => f.write_str("connection pool is closed"),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the mutex"),
            ErrorKind::NoMasterFound => f.write_str("no master node found"),
            ErrorKind::NoReadReplicaAvailable => f.write_str("no available replica node for read operations"),
            ErrorKind::NoCandidates => f.write_str("no available nodes to promote"),
            ErrorKind::UnknownNode(id) => write!(f, "node {} not found", id),
            ErrorKind::NotFound(id) => write!(f, "no user found with id {}", id),
            ErrorKind::ConnectionFailure(s) => write!(f, "connection failure: {}", s),
            ErrorKind::ValidationError(s) => f.write_str(s),
            ErrorKind::AuthorizationError(s) => f.write_str(s),
            ErrorKind::PrimaryTransactionFailure(e) => write!(f, "primary transaction failed: {}", e),
            ErrorKind::FragmentTransactionFailure(e) => write!(f, "fragment transaction failed: {}", e),
            ErrorKind::FailoverFailure(e) => write!(f, "failover failed: {}", e),
            ErrorKind::StringError(s) => f.write_str(&s),
            ErrorKind::IOError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::YAMLError(e) => std::fmt::Display::fmt(&e, f),
            ErrorKind::MySqlError(e) => std::fmt::Display::fmt(&e, f),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}
