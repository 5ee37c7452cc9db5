//! Initial handshake packets: the server greeting, the SSL request and the
//! client handshake response.

#![allow(clippy::cast_possible_truncation)]

use mywire_core::{Error, Result};

use crate::protocol::capabilities::{
    CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH,
    CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA, CLIENT_SECURE_CONNECTION,
};
use crate::protocol::{PacketReader, PacketWriter};

/// Protocol version spoken by every supported server.
pub const PROTOCOL_VERSION: u8 = 10;

/// Parsed initial handshake packet (protocol version 10).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    /// Server-assigned thread id, used by `KILL`
    pub thread_id: u32,
    /// Scramble used by password plugins (usually 20 bytes)
    pub salt: Vec<u8>,
    pub capabilities: u32,
    /// Server default collation id, when sent
    pub charset: Option<u8>,
    pub status_flags: u16,
    /// Auth plugin announced by the server, when sent
    pub auth_plugin: Option<String>,
}

impl Greeting {
    /// Parse the greeting payload.
    ///
    /// The fields after the low capability flags are optional on old
    /// servers, and the plugin name may lack its NUL terminator.
    #[allow(clippy::result_large_err)]
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(data);
        let truncated = || Error::protocol("Truncated server greeting");

        let protocol_version = reader.read_u8().ok_or_else(truncated)?;
        if protocol_version != PROTOCOL_VERSION {
            return Err(Error::protocol(format!(
                "Unsupported protocol version: {}",
                protocol_version
            )));
        }

        let server_version = reader.read_null_string();
        let thread_id = reader.read_u32_le().ok_or_else(truncated)?;
        let mut salt = reader.read_bytes(8).ok_or_else(truncated)?.to_vec();
        reader.skip(1);
        let mut capabilities = u32::from(reader.read_u16_le().ok_or_else(truncated)?);

        let mut charset = None;
        let mut status_flags = 0;
        let mut salt_len = 12;
        if reader.remaining() >= 6 {
            charset = reader.read_u8();
            status_flags = reader.read_u16_le().unwrap_or(0);
            let high = reader.read_u16_le().unwrap_or(0);
            capabilities |= u32::from(high) << 16;
            let announced = usize::from(reader.read_u8().unwrap_or(0));
            salt_len = announced.saturating_sub(9).max(12);
        }

        // Reserved
        reader.skip(10);

        if let Some(rest) = reader.read_bytes(salt_len) {
            salt.extend_from_slice(rest);
        }
        // NUL after the scramble
        reader.skip(1);

        let auth_plugin = if capabilities & CLIENT_PLUGIN_AUTH != 0 && !reader.is_empty() {
            Some(reader.read_null_string())
        } else {
            None
        };

        Ok(Self {
            protocol_version,
            server_version,
            thread_id,
            salt,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
        })
    }
}

/// Build the 32-byte SSL request: the handshake response truncated after the
/// fixed header, sent in clear text before the TLS upgrade.
pub fn build_ssl_request(client_flags: u32, max_packet_size: u32, charset: u8) -> Vec<u8> {
    let mut writer = PacketWriter::with_capacity(32);
    write_fixed_header(&mut writer, client_flags, max_packet_size, charset);
    writer.into_bytes()
}

fn write_fixed_header(writer: &mut PacketWriter, client_flags: u32, max_packet: u32, charset: u8) {
    writer.write_u32_le(client_flags);
    writer.write_u32_le(max_packet);
    writer.write_u8(charset);
    writer.write_zeros(23);
}

/// Client handshake response (protocol 4.1).
#[derive(Debug, Clone)]
pub struct HandshakeResponse<'a> {
    pub client_flags: u32,
    pub max_packet_size: u32,
    pub charset: u8,
    pub user: &'a [u8],
    pub auth_response: &'a [u8],
    pub database: Option<&'a [u8]>,
    pub auth_plugin: Option<&'a str>,
    pub attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    /// Encode the full response payload.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut writer = PacketWriter::new();
        write_fixed_header(
            &mut writer,
            self.client_flags,
            self.max_packet_size,
            self.charset,
        );
        writer.write_null_bytes(self.user);

        if self.client_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            writer.write_lenenc_bytes(self.auth_response);
        } else if self.client_flags & CLIENT_SECURE_CONNECTION != 0 {
            // Scrambles are 20 or 32 bytes
            writer.write_u8(self.auth_response.len() as u8);
            writer.write_bytes(self.auth_response);
        } else {
            writer.write_null_bytes(self.auth_response);
        }

        if self.client_flags & CLIENT_CONNECT_WITH_DB != 0 {
            if let Some(db) = self.database {
                writer.write_null_bytes(db);
            }
        }

        if self.client_flags & CLIENT_PLUGIN_AUTH != 0 {
            writer.write_null_bytes(self.auth_plugin.unwrap_or_default().as_bytes());
        }

        if self.client_flags & CLIENT_CONNECT_ATTRS != 0 {
            let mut attrs = PacketWriter::new();
            for (key, value) in self.attributes {
                attrs.write_lenenc_string(key);
                attrs.write_lenenc_string(value);
            }
            writer.write_lenenc_bytes(attrs.as_bytes());
        }

        writer.into_bytes()
    }
}
