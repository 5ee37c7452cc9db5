//! Core types for the mywire MySQL driver.
//!
//! This crate holds the driver-agnostic vocabulary shared by the protocol crate:
//!
//! - `Error` and its per-class payloads
//! - `Value`, the dynamically typed cell produced by converters
//! - `Row` with column metadata shared across a result set

pub mod error;
pub mod row;
pub mod value;

pub use error::{
    AuthenticationError, ConfigError, ConnectionError, ConnectionErrorKind, DatabaseError,
    DatabaseErrorKind, Error, OperationalError, ProtocolError, Result,
};
pub use row::{ColumnInfo, Row};
pub use value::Value;
