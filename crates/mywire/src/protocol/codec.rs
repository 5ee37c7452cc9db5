//! Packet framing with per-connection sequence tracking.
//!
//! The codec is generic over `Read`/`Write` so it can frame onto a
//! [`Transport`](crate::transport::Transport) or an in-memory buffer alike.

#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Read, Write};

use mywire_core::error::{OperationalError, ProtocolError};
use mywire_core::{Error, Result};

use crate::protocol::client_error::{CR_SERVER_GONE_ERROR, CR_SERVER_LOST};
use crate::protocol::{MAX_PACKET_SIZE, Packet, PacketHeader};

/// Frames payloads into wire packets and reassembles them.
///
/// Holds the next expected sequence number. Every chunk sent or received
/// advances it by one (mod 256); [`reset`](Self::reset) is called only at the
/// start of a new top-level command.
#[derive(Debug, Default)]
pub struct PacketCodec {
    next_seq: u8,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new command exchange at sequence 0.
    pub fn reset(&mut self) {
        self.next_seq = 0;
    }

    /// Sequence number the next chunk will carry (or must carry).
    pub fn next_sequence_id(&self) -> u8 {
        self.next_seq
    }

    /// Write one logical payload, splitting it into chunks of at most
    /// `MAX_PACKET_SIZE` bytes.
    ///
    /// The final chunk is always shorter than the maximum, so a payload whose
    /// length is an exact multiple of it (zero included) ends with an empty
    /// chunk.
    #[allow(clippy::result_large_err)]
    pub fn write_packet<W: Write + ?Sized>(&mut self, out: &mut W, payload: &[u8]) -> Result<()> {
        let mut offset = 0;
        loop {
            let end = (offset + MAX_PACKET_SIZE).min(payload.len());
            let chunk = &payload[offset..end];
            let header = PacketHeader {
                payload_length: chunk.len() as u32,
                sequence_id: self.next_seq,
            };

            let mut frame = Vec::with_capacity(PacketHeader::SIZE + chunk.len());
            frame.extend_from_slice(&header.to_bytes());
            frame.extend_from_slice(chunk);
            out.write_all(&frame).map_err(send_error)?;

            tracing::trace!(len = chunk.len(), seq = self.next_seq, "sent packet chunk");
            self.next_seq = self.next_seq.wrapping_add(1);
            offset = end;

            if chunk.len() < MAX_PACKET_SIZE {
                break;
            }
        }
        out.flush().map_err(send_error)
    }

    /// Read one logical packet, concatenating continuation chunks.
    ///
    /// A sequence number other than the expected one is fatal: the caller
    /// must close the connection.
    #[allow(clippy::result_large_err)]
    pub fn read_packet<R: Read + ?Sized>(&mut self, input: &mut R) -> Result<Packet> {
        let mut payload = Vec::new();
        let mut first_seq = None;

        loop {
            let mut header_buf = [0u8; PacketHeader::SIZE];
            input.read_exact(&mut header_buf).map_err(receive_error)?;
            let header = PacketHeader::from_bytes(&header_buf);

            if header.sequence_id != self.next_seq {
                return Err(sequence_error(header.sequence_id, self.next_seq));
            }
            self.next_seq = self.next_seq.wrapping_add(1);
            first_seq.get_or_insert(header.sequence_id);

            let len = header.payload_length as usize;
            let start = payload.len();
            payload.resize(start + len, 0);
            input
                .read_exact(&mut payload[start..])
                .map_err(receive_error)?;

            tracing::trace!(len, seq = header.sequence_id, "received packet chunk");
            if len < MAX_PACKET_SIZE {
                break;
            }
        }

        Ok(Packet::new(payload, first_seq.unwrap_or(0)))
    }
}

fn sequence_error(got: u8, expected: u8) -> Error {
    if got == 0 {
        // MariaDB announces shutdown with an unsolicited packet at sequence 0.
        return Error::Operational(OperationalError {
            code: CR_SERVER_LOST,
            message: "Lost connection to MySQL server during query".to_string(),
            source: None,
        });
    }
    Error::Protocol(ProtocolError {
        message: format!(
            "Packet sequence number wrong - got {} expected {}",
            got, expected
        ),
        raw_data: None,
        source: None,
    })
}

/// Map a receive failure to the connection-lost error.
pub(crate) fn receive_error(err: io::Error) -> Error {
    let message = match err.kind() {
        io::ErrorKind::UnexpectedEof => {
            "Lost connection to MySQL server during query".to_string()
        }
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => {
            "Lost connection to MySQL server during query (timed out)".to_string()
        }
        _ => format!("Lost connection to MySQL server during query ({})", err),
    };
    Error::Operational(OperationalError {
        code: CR_SERVER_LOST,
        message,
        source: Some(Box::new(err)),
    })
}

/// Map a send failure to the server-gone error.
pub(crate) fn send_error(err: io::Error) -> Error {
    Error::Operational(OperationalError {
        code: CR_SERVER_GONE_ERROR,
        message: format!("MySQL server has gone away ({})", err),
        source: Some(Box::new(err)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(len: usize) {
        let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut wire = Vec::new();
        let mut writer = PacketCodec::new();
        writer.write_packet(&mut wire, &payload).unwrap();

        let mut reader = PacketCodec::new();
        let packet = reader.read_packet(&mut Cursor::new(&wire)).unwrap();
        assert_eq!(packet.len(), len);
        assert!(packet.payload() == payload.as_slice(), "payload mismatch at {len}");
        assert_eq!(reader.next_sequence_id(), writer.next_sequence_id());
    }

    #[test]
    fn test_round_trip_small_and_empty() {
        round_trip(0);
        round_trip(1);
        round_trip(300);
    }

    #[test]
    fn test_round_trip_chunk_boundaries() {
        round_trip(MAX_PACKET_SIZE - 1);
        round_trip(MAX_PACKET_SIZE);
        round_trip(2 * MAX_PACKET_SIZE + 5);
    }

    #[test]
    fn test_empty_payload_is_single_empty_chunk() {
        let mut wire = Vec::new();
        let mut codec = PacketCodec::new();
        codec.write_packet(&mut wire, &[]).unwrap();
        assert_eq!(wire, [0, 0, 0, 0]);
        assert_eq!(codec.next_sequence_id(), 1);
    }

    #[test]
    fn test_exact_multiple_gets_trailing_empty_chunk() {
        let payload = vec![0xAB; MAX_PACKET_SIZE];
        let mut wire = Vec::new();
        let mut codec = PacketCodec::new();
        codec.write_packet(&mut wire, &payload).unwrap();

        assert_eq!(wire.len(), MAX_PACKET_SIZE + 8);
        assert_eq!(&wire[..4], &[0xFF, 0xFF, 0xFF, 0]);
        assert_eq!(&wire[wire.len() - 4..], &[0, 0, 0, 1]);
        assert_eq!(codec.next_sequence_id(), 2);
    }

    #[test]
    fn test_multi_chunk_sequence_numbers() {
        let payload = vec![1u8; 2 * MAX_PACKET_SIZE + 5];
        let mut wire = Vec::new();
        let mut codec = PacketCodec::new();
        codec.write_packet(&mut wire, &payload).unwrap();

        let second = MAX_PACKET_SIZE + 4;
        let third = 2 * (MAX_PACKET_SIZE + 4);
        assert_eq!(wire[3], 0);
        assert_eq!(wire[second + 3], 1);
        assert_eq!(&wire[third..third + 4], &[5, 0, 0, 2]);
    }

    #[test]
    fn test_sequence_wraps_mod_256() {
        let mut wire = Vec::new();
        let mut writer = PacketCodec::new();
        for _ in 0..300 {
            writer.write_packet(&mut wire, b"x").unwrap();
        }
        assert_eq!(writer.next_sequence_id(), (300 % 256) as u8);

        let mut reader = PacketCodec::new();
        let mut input = Cursor::new(&wire);
        for i in 0..300u32 {
            let packet = reader.read_packet(&mut input).unwrap();
            assert_eq!(u32::from(packet.sequence_id()), i % 256);
        }
    }

    #[test]
    fn test_sequence_mismatch_is_protocol_error() {
        let wire = [1, 0, 0, 5, 0x00];
        let err = PacketCodec::new()
            .read_packet(&mut Cursor::new(&wire[..]))
            .unwrap_err();
        match err {
            Error::Protocol(e) => {
                assert_eq!(e.message, "Packet sequence number wrong - got 5 expected 0");
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_sequence_zero_is_lost_connection() {
        let mut codec = PacketCodec::new();
        let mut wire = Vec::new();
        codec.write_packet(&mut wire, b"q").unwrap();

        let reply = [1, 0, 0, 0, 0xFF];
        let err = codec.read_packet(&mut Cursor::new(&reply[..])).unwrap_err();
        assert_eq!(err.code(), Some(CR_SERVER_LOST));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_short_read_is_lost_connection() {
        let wire = [10, 0, 0, 0, b'a', b'b'];
        let err = PacketCodec::new()
            .read_packet(&mut Cursor::new(&wire[..]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Operational(OperationalError {
                code: CR_SERVER_LOST,
                ..
            })
        ));
    }

    #[test]
    fn test_reset_restarts_at_zero() {
        let mut codec = PacketCodec::new();
        let mut wire = Vec::new();
        codec.write_packet(&mut wire, b"a").unwrap();
        codec.write_packet(&mut wire, b"b").unwrap();
        assert_eq!(codec.next_sequence_id(), 2);
        codec.reset();
        assert_eq!(codec.next_sequence_id(), 0);
    }
}
