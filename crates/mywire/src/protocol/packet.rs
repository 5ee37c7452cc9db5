//! A reassembled logical packet and its classification.

use mywire_core::{Error, Result};

use crate::protocol::{EofPacket, ErrPacket, MAX_PACKET_SIZE, OkPacket, PacketReader};

/// One logical packet: the reassembled payload plus the sequence number of
/// its first chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    payload: Vec<u8>,
    sequence_id: u8,
}

impl Packet {
    pub fn new(payload: Vec<u8>, sequence_id: u8) -> Self {
        Self {
            payload,
            sequence_id,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn sequence_id(&self) -> u8 {
        self.sequence_id
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// A reader positioned at the start of the payload.
    pub fn reader(&self) -> PacketReader<'_> {
        PacketReader::new(&self.payload)
    }

    fn first_byte(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    pub fn is_ok(&self) -> bool {
        self.first_byte() == Some(0x00) && self.payload.len() >= 7
    }

    /// Old-style EOF marker (0xFE with a short payload).
    pub fn is_eof(&self) -> bool {
        self.first_byte() == Some(0xFE) && self.payload.len() < 9
    }

    /// Auth switch request; only meaningful during the handshake.
    pub fn is_auth_switch_request(&self) -> bool {
        self.first_byte() == Some(0xFE)
    }

    /// Extra authentication data; only meaningful during the handshake.
    pub fn is_extra_auth_data(&self) -> bool {
        self.first_byte() == Some(0x01)
    }

    pub fn is_local_infile_request(&self) -> bool {
        self.first_byte() == Some(0xFB)
    }

    pub fn is_error(&self) -> bool {
        self.first_byte() == Some(0xFF)
    }

    /// Does this packet end a row stream or descriptor block?
    ///
    /// Under CLIENT_DEPRECATE_EOF the terminator is an OK packet with a 0xFE
    /// header, which is distinguished from a row by its length.
    pub fn is_result_terminator(&self, deprecate_eof: bool) -> bool {
        if deprecate_eof {
            self.first_byte() == Some(0xFE) && self.payload.len() < MAX_PACKET_SIZE
        } else {
            self.is_eof()
        }
    }

    #[allow(clippy::result_large_err)]
    pub fn parse_ok(&self) -> Result<OkPacket> {
        self.reader()
            .parse_ok_packet()
            .ok_or_else(|| malformed("OK", &self.payload))
    }

    #[allow(clippy::result_large_err)]
    pub fn parse_error(&self) -> Result<ErrPacket> {
        self.reader()
            .parse_err_packet()
            .ok_or_else(|| malformed("error", &self.payload))
    }

    #[allow(clippy::result_large_err)]
    pub fn parse_eof(&self) -> Result<EofPacket> {
        self.reader()
            .parse_eof_packet()
            .ok_or_else(|| malformed("EOF", &self.payload))
    }

    /// Turn an error packet into the recoverable server error.
    pub fn into_database_error(self) -> Error {
        match self.parse_error() {
            Ok(err) => Error::Database(err.into_database_error()),
            Err(e) => e,
        }
    }

    /// File name requested by a local-infile packet (raw bytes).
    pub fn local_infile_filename(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or_default()
    }
}

fn malformed(kind: &str, payload: &[u8]) -> Error {
    Error::Protocol(mywire_core::ProtocolError {
        message: format!("Malformed {} packet ({} bytes)", kind, payload.len()),
        raw_data: Some(payload.iter().copied().take(64).collect()),
        source: None,
    })
}

/// Classification of the first packet answering a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    /// Acknowledgement without a result set
    Ok,
    /// Server error
    Error,
    /// LOAD DATA LOCAL file request
    LocalInfile,
    /// Column count header of a result set
    ResultSet,
}

impl ResponseKind {
    pub fn classify(packet: &Packet, deprecate_eof: bool) -> Self {
        match packet.first_byte() {
            Some(0x00) => Self::Ok,
            Some(0xFE) if deprecate_eof => Self::Ok,
            Some(0xFF) => Self::Error,
            Some(0xFB) => Self::LocalInfile,
            _ => Self::ResultSet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(bytes: &[u8]) -> Packet {
        Packet::new(bytes.to_vec(), 1)
    }

    #[test]
    fn test_classification_predicates() {
        assert!(packet(&[0x00, 0, 0, 2, 0, 0, 0]).is_ok());
        assert!(!packet(&[0x00, 0, 0]).is_ok());
        assert!(packet(&[0xFE, 0, 0, 2, 0]).is_eof());
        assert!(!packet(&[0xFE; 9]).is_eof());
        assert!(packet(&[0xFE; 9]).is_auth_switch_request());
        assert!(packet(&[0x01, 0x03]).is_extra_auth_data());
        assert!(packet(b"\xFBdata.csv").is_local_infile_request());
        assert!(packet(&[0xFF, 0x15, 0x04]).is_error());
    }

    #[test]
    fn test_result_terminator_modes() {
        let eof = packet(&[0xFE, 0, 0, 2, 0]);
        let long_ok = packet(&[0xFE, 0, 0, 2, 0, 0, 0, b'i', b'n', b'f', b'o']);
        assert!(eof.is_result_terminator(false));
        assert!(!long_ok.is_result_terminator(false));
        assert!(long_ok.is_result_terminator(true));
        assert!(!packet(&[0x02, b'h', b'i']).is_result_terminator(true));
    }

    #[test]
    fn test_response_kind() {
        assert_eq!(
            ResponseKind::classify(&packet(&[0x00, 0, 0, 2, 0, 0, 0]), false),
            ResponseKind::Ok
        );
        assert_eq!(
            ResponseKind::classify(&packet(&[0xFF, 0x15, 0x04]), false),
            ResponseKind::Error
        );
        assert_eq!(
            ResponseKind::classify(&packet(b"\xFBdata.csv"), false),
            ResponseKind::LocalInfile
        );
        assert_eq!(
            ResponseKind::classify(&packet(&[0x02]), false),
            ResponseKind::ResultSet
        );
        assert_eq!(
            ResponseKind::classify(&packet(&[0xFE, 0, 0, 2, 0, 0, 0]), true),
            ResponseKind::Ok
        );
    }

    #[test]
    fn test_error_packet_to_database_error() {
        let mut data = vec![0xFF, 0x15, 0x04, b'#'];
        data.extend_from_slice(b"28000Access denied");
        let err = Packet::new(data, 2).into_database_error();
        match err {
            Error::Database(db) => {
                assert_eq!(db.code, 1045);
                assert_eq!(db.message, "Access denied");
            }
            other => panic!("expected database error, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_ok_is_protocol_error() {
        let err = packet(&[0x00, 0x01]).parse_ok().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_local_infile_filename() {
        assert_eq!(packet(b"\xFB/tmp/x.csv").local_infile_filename(), b"/tmp/x.csv");
        assert_eq!(packet(b"").local_infile_filename(), b"");
    }
}
