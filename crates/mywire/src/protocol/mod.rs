//! MySQL wire protocol implementation.
//!
//! MySQL packets have a 4-byte header:
//! - 3 bytes: payload length (little-endian)
//! - 1 byte: sequence number
//!
//! Maximum packet payload is 2^24 - 1 (16MB - 1). Larger payloads
//! are split into multiple packets, and a payload that is an exact
//! multiple of the maximum is followed by an empty packet.

pub mod codec;
pub mod handshake;
pub mod packet;
pub mod reader;
pub mod writer;

pub use codec::PacketCodec;
pub use handshake::{Greeting, HandshakeResponse, build_ssl_request};
pub use packet::{Packet, ResponseKind};
pub use reader::PacketReader;
pub use writer::PacketWriter;

use mywire_core::error::DatabaseError;

/// Maximum payload size for a single MySQL packet (2^24 - 1 bytes).
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL capability flags (client and server).
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_COMPRESS: u32 = 1 << 5;
    pub const CLIENT_LOCAL_FILES: u32 = 1 << 7;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;

    /// Flags always requested by the client.
    pub const DEFAULT_CLIENT_FLAGS: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_LONG_FLAG
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_CONNECT_ATTRS;
}

/// MySQL command codes (COM_xxx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Quit connection
    Quit = 0x01,
    /// Switch database
    InitDb = 0x02,
    /// Text protocol query
    Query = 0x03,
    /// Kill a server thread
    ProcessKill = 0x0c,
    /// Ping server
    Ping = 0x0e,
}

/// MySQL server status flags.
pub mod server_status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Client-side error codes (CR_xxx).
pub mod client_error {
    pub const CR_SERVER_GONE_ERROR: u16 = 2006;
    pub const CR_SERVER_LOST: u16 = 2013;
    pub const CR_COMMANDS_OUT_OF_SYNC: u16 = 2014;
    pub const CR_AUTH_PLUGIN_CANNOT_LOAD: u16 = 2059;
    /// Server error code reused for unreadable local-infile files.
    pub const ER_FILE_NOT_FOUND: u16 = 1017;
}

/// A MySQL packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (3 bytes, max 16MB - 1)
    pub payload_length: u32,
    /// Sequence number (wraps at 255)
    pub sequence_id: u8,
}

impl PacketHeader {
    /// Total header size in bytes.
    pub const SIZE: usize = 4;

    /// Parse a packet header from 4 bytes.
    pub fn from_bytes(bytes: &[u8; 4]) -> Self {
        let payload_length =
            u32::from(bytes[0]) | (u32::from(bytes[1]) << 8) | (u32::from(bytes[2]) << 16);
        Self {
            payload_length,
            sequence_id: bytes[3],
        }
    }

    /// Encode the header to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        let len = self.payload_length.to_le_bytes();
        [len[0], len[1], len[2], self.sequence_id]
    }
}

/// Parsed OK packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OkPacket {
    /// Number of affected rows
    pub affected_rows: u64,
    /// Last insert ID
    pub last_insert_id: u64,
    /// Server status flags
    pub status_flags: u16,
    /// Number of warnings
    pub warnings: u16,
    /// Info string (if any)
    pub info: String,
}

/// Parsed Error packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    /// Error code
    pub error_code: u16,
    /// SQL state (5 characters), absent on pre-4.1 style packets
    pub sql_state: Option<String>,
    /// Error message
    pub error_message: String,
}

impl ErrPacket {
    /// Convert into the recoverable server error surfaced to callers.
    pub fn into_database_error(self) -> DatabaseError {
        DatabaseError::new(self.error_code, self.sql_state, self.error_message)
    }
}

/// Parsed EOF packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    /// Number of warnings
    pub warnings: u16,
    /// Server status flags
    pub status_flags: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_header_roundtrip() {
        let header = PacketHeader {
            payload_length: 0x0012_3456,
            sequence_id: 7,
        };
        let bytes = header.to_bytes();
        assert_eq!(bytes, [0x56, 0x34, 0x12, 7]);
        assert_eq!(PacketHeader::from_bytes(&bytes), header);
    }

    #[test]
    #[allow(clippy::cast_possible_truncation)]
    fn test_packet_header_max_size() {
        let header = PacketHeader {
            payload_length: MAX_PACKET_SIZE as u32,
            sequence_id: 255,
        };
        assert_eq!(header.to_bytes(), [0xFF, 0xFF, 0xFF, 255]);
    }

    #[test]
    fn test_err_packet_into_database_error() {
        let err = ErrPacket {
            error_code: 1452,
            sql_state: Some("23000".to_string()),
            error_message: "Cannot add or update a child row".to_string(),
        }
        .into_database_error();
        assert!(err.is_foreign_key_violation());
        assert_eq!(err.sqlstate.as_deref(), Some("23000"));
    }

    #[test]
    fn test_default_flags_exclude_compression() {
        assert_eq!(
            capabilities::DEFAULT_CLIENT_FLAGS & capabilities::CLIENT_COMPRESS,
            0
        );
        assert_ne!(
            capabilities::DEFAULT_CLIENT_FLAGS & capabilities::CLIENT_PLUGIN_AUTH,
            0
        );
    }
}
