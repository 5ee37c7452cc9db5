//! Error types for MySQL wire-protocol operations.

use std::fmt;

/// Boxed source error carried by the struct variants.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type for all driver operations.
#[derive(Debug)]
pub enum Error {
    /// The transport could not be established (connect, DNS, TLS setup)
    Connection(ConnectionError),
    /// The byte stream is desynchronized or malformed (always fatal)
    Protocol(ProtocolError),
    /// Connection lost mid-operation or a server-reported operational failure
    Operational(OperationalError),
    /// Well-formed error packet from the server; the connection stays usable
    Database(DatabaseError),
    /// Handshake/authentication failure
    Authentication(AuthenticationError),
    /// A negotiated feature the client cannot honor
    NotSupported(String),
    /// API misuse: closed connection, stale or foreign result handle
    Interface(String),
    /// Invalid configuration
    Config(ConfigError),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<BoxError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish connection
    Connect,
    /// Connect timed out
    Timeout,
    /// SSL/TLS negotiation failed
    Ssl,
    /// DNS resolution failed
    DnsResolution,
    /// Connection refused
    Refused,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub raw_data: Option<Vec<u8>>,
    pub source: Option<BoxError>,
}

#[derive(Debug)]
pub struct OperationalError {
    /// Client (2xxx) or server error code
    pub code: u16,
    pub message: String,
    pub source: Option<BoxError>,
}

#[derive(Debug)]
pub struct DatabaseError {
    pub code: u16,
    pub sqlstate: Option<String>,
    pub message: String,
    pub kind: DatabaseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Database, table or column not found
    NotFound,
    /// Access denied
    Permission,
    /// Data too long, out of range, truncated
    Data,
    /// Deadlock detected
    Deadlock,
    /// Lock wait timeout
    LockTimeout,
    /// Other database error
    Other,
}

#[derive(Debug)]
pub struct AuthenticationError {
    /// Server error code when the failure came from an error packet
    pub code: Option<u16>,
    pub message: String,
    pub source: Option<BoxError>,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<BoxError>,
}

impl DatabaseErrorKind {
    /// Classify a MySQL server error code.
    pub fn from_code(code: u16) -> Self {
        match code {
            1062 | 1169 | 1216 | 1217 | 1451 | 1452 | 1048 | 1364 | 3819 => Self::Constraint,
            1064 | 1149 => Self::Syntax,
            1049 | 1051 | 1054 | 1146 | 1305 => Self::NotFound,
            1044 | 1045 | 1142 | 1143 | 1227 => Self::Permission,
            1264 | 1265 | 1292 | 1366 | 1406 => Self::Data,
            1213 => Self::Deadlock,
            1205 => Self::LockTimeout,
            _ => Self::Other,
        }
    }
}

impl DatabaseError {
    /// Build a database error, classifying the code.
    pub fn new(code: u16, sqlstate: Option<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            sqlstate,
            message: message.into(),
            kind: DatabaseErrorKind::from_code(code),
        }
    }

    /// Is this a duplicate-key violation?
    pub fn is_unique_violation(&self) -> bool {
        self.code == 1062
    }

    /// Is this a foreign key violation?
    pub fn is_foreign_key_violation(&self) -> bool {
        matches!(self.code, 1216 | 1217 | 1451 | 1452)
    }
}

/// First client-side error code; server codes sit below it.
const CLIENT_ERROR_MIN: u16 = 2000;

impl Error {
    /// Shorthand for an operational error without a source.
    pub fn operational(code: u16, message: impl Into<String>) -> Self {
        Error::Operational(OperationalError {
            code,
            message: message.into(),
            source: None,
        })
    }

    /// Shorthand for a protocol error without raw data.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            raw_data: None,
            source: None,
        })
    }

    /// Does this error force the connection closed?
    ///
    /// Operational errors are fatal only with a client code (2000 and up):
    /// lost link, broken pipe, out-of-sync replies. Those carrying a server
    /// code, such as an unreadable local-infile file, leave the connection
    /// usable.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connection(_) | Error::Protocol(_) | Error::Authentication(_) => true,
            Error::Operational(e) => e.code >= CLIENT_ERROR_MIN,
            _ => false,
        }
    }

    /// Numeric error code, if the error carries one.
    pub fn code(&self) -> Option<u16> {
        match self {
            Error::Operational(e) => Some(e.code),
            Error::Database(e) => Some(e.code),
            Error::Authentication(e) => e.code,
            _ => None,
        }
    }

    /// Get SQLSTATE if this is a server-reported error
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Database(e) => e.sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Is this a retryable error (deadlock, lock timeout)?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Database(DatabaseError {
                kind: DatabaseErrorKind::Deadlock | DatabaseErrorKind::LockTimeout,
                ..
            })
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Operational(e) => write!(f, "Operational error ({}): {}", e.code, e.message),
            Error::Database(e) => write!(f, "Database error: {}", e),
            Error::Authentication(e) => write!(f, "Authentication error: {}", e),
            Error::NotSupported(msg) => write!(f, "Not supported: {}", msg),
            Error::Interface(msg) => write!(f, "Interface error: {}", msg),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
        }
    }
}

fn as_dyn(source: Option<&BoxError>) -> Option<&(dyn std::error::Error + 'static)> {
    source.map(|err| err.as_ref() as &(dyn std::error::Error + 'static))
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => as_dyn(e.source.as_ref()),
            Error::Protocol(e) => as_dyn(e.source.as_ref()),
            Error::Operational(e) => as_dyn(e.source.as_ref()),
            Error::Authentication(e) => as_dyn(e.source.as_ref()),
            Error::Config(e) => as_dyn(e.source.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for OperationalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message)
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "({}, SQLSTATE {}) {}", self.code, state, self.message),
            None => write!(f, "({}) {}", self.code, self.message),
        }
    }
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "({}) {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<OperationalError> for Error {
    fn from(err: OperationalError) -> Self {
        Error::Operational(err)
    }
}

impl From<DatabaseError> for Error {
    fn from(err: DatabaseError) -> Self {
        Error::Database(err)
    }
}

impl From<AuthenticationError> for Error {
    fn from(err: AuthenticationError) -> Self {
        Error::Authentication(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_classification() {
        let dup = DatabaseError::new(1062, Some("23000".to_string()), "Duplicate entry");
        assert_eq!(dup.kind, DatabaseErrorKind::Constraint);
        assert!(dup.is_unique_violation());
        assert!(!dup.is_foreign_key_violation());

        let denied = DatabaseError::new(1045, Some("28000".to_string()), "Access denied");
        assert_eq!(denied.kind, DatabaseErrorKind::Permission);

        assert_eq!(DatabaseErrorKind::from_code(1064), DatabaseErrorKind::Syntax);
        assert_eq!(DatabaseErrorKind::from_code(1146), DatabaseErrorKind::NotFound);
        assert_eq!(DatabaseErrorKind::from_code(9999), DatabaseErrorKind::Other);
    }

    #[test]
    fn test_fatal_and_retryable_flags() {
        let db = Error::Database(DatabaseError::new(1213, None, "Deadlock found"));
        assert!(!db.is_fatal());
        assert!(db.is_retryable());
        assert_eq!(db.code(), Some(1213));

        let lost = Error::operational(2013, "Lost connection to MySQL server during query");
        assert!(lost.is_fatal());
        assert!(!lost.is_retryable());
        assert_eq!(lost.code(), Some(2013));

        assert!(Error::protocol("bad sequence").is_fatal());
        assert!(Error::operational(2014, "Command Out of Sync").is_fatal());
        assert!(!Error::operational(1017, "Can't find file 'data.csv'").is_fatal());
        assert!(!Error::Interface("closed".to_string()).is_fatal());
    }

    #[test]
    fn test_display_includes_code_and_sqlstate() {
        let err = Error::Database(DatabaseError::new(
            1045,
            Some("28000".to_string()),
            "Access denied",
        ));
        assert_eq!(
            err.to_string(),
            "Database error: (1045, SQLSTATE 28000) Access denied"
        );
        assert_eq!(err.sqlstate(), Some("28000"));
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error as _;

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err = Error::Operational(OperationalError {
            code: 2013,
            message: "Lost connection".to_string(),
            source: Some(Box::new(io)),
        });
        assert!(err.source().is_some());
        assert!(Error::NotSupported("compression".to_string()).source().is_none());
    }
}
