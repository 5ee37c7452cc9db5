//! Blocking MySQL wire-protocol driver.
//!
//! This crate implements the client side of the MySQL protocol over plain
//! std sockets. It provides:
//!
//! - TCP, Unix-socket and caller-supplied transports with in-place TLS upgrade
//! - Packet framing with sequence numbers and 16MB chunking
//! - The connection handshake and authentication plugins
//!   (mysql_native_password, caching_sha2_password, sha256_password,
//!   mysql_clear_password, dialog, and caller-registered handlers)
//! - Command dispatch (query, init db, ping, kill, quit)
//! - Text result sets, read fully or streamed row by row
//! - A converter registry mapping column types to [`Value`]s
//!
//! # MySQL Protocol Overview
//!
//! MySQL uses a packet-based protocol with:
//! - 3-byte payload length + 1-byte sequence number header
//! - Payloads of 16MB-1 bytes or more split across several packets
//! - Sequence numbers restarting at 0 for every command
//!
//! # Example
//!
//! ```rust,no_run
//! use mywire::{MySqlConfig, MySqlConnection};
//!
//! # fn main() -> mywire::Result<()> {
//! let config = MySqlConfig::new()
//!     .host("localhost")
//!     .port(3306)
//!     .user("root")
//!     .database("mydb");
//!
//! let mut conn = MySqlConnection::connect(config)?;
//! let result = conn.query("SELECT id, name FROM users")?;
//! for row in result.rows() {
//!     println!("{:?}", row.get_by_name("name"));
//! }
//! conn.close()?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod charset;
pub mod config;
pub mod connection;
mod handshake;
pub mod protocol;
pub mod result;
pub mod tls;
pub mod transport;
pub mod types;

pub use auth::{AuthPlugin, AuthPluginHandler};
pub use charset::{Charset, Encoding};
pub use config::{MySqlConfig, SslMode, TlsConfig};
pub use connection::MySqlConnection;
pub use result::{QueryResult, UnbufferedResult};
pub use transport::{Socket, Transport};
pub use types::{Cell, ColumnDef, Converter, ConverterRegistry, FieldType};

pub use mywire_core::{ColumnInfo, Error, Result, Row, Value};
