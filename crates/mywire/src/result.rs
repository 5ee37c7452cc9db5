//! Result reader.
//!
//! The first packet answering a command decides the shape of the result:
//!
//! - `0x00` (or `0xFE` with `CLIENT_DEPRECATE_EOF`): OK, no rows
//! - `0xFF`: server error
//! - `0xFB`: the server asks for a local file (`LOAD DATA LOCAL INFILE`)
//! - anything else: column count, column definitions, then rows
//!
//! Rows are either read eagerly into a [`QueryResult`] or pulled one at a
//! time through an [`UnbufferedResult`].

use std::fs::File;
use std::io::{self, Read};
use std::sync::Arc;

use mywire_core::error::OperationalError;
use mywire_core::{ColumnInfo, Error, Result, Row};

use crate::charset::Encoding;
use crate::connection::MySqlConnection;
use crate::protocol::client_error::ER_FILE_NOT_FOUND;
use crate::protocol::server_status::SERVER_MORE_RESULTS_EXISTS;
use crate::protocol::{OkPacket, Packet, PacketReader, ResponseKind};
use crate::types::{ColumnDef, ConverterRegistry};

/// Largest chunk sent per packet while streaming a local file.
const LOCAL_INFILE_CHUNK: usize = 16 * 1024;

/// A fully read command result.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    affected_rows: u64,
    insert_id: u64,
    warning_count: u16,
    message: String,
    status_flags: u16,
    columns: Vec<ColumnDef>,
    rows: Vec<Row>,
}

impl QueryResult {
    fn from_ok(ok: OkPacket) -> Self {
        Self {
            affected_rows: ok.affected_rows,
            insert_id: ok.last_insert_id,
            warning_count: ok.warnings,
            message: ok.info,
            status_flags: ok.status_flags,
            ..Self::default()
        }
    }

    /// Rows changed by the statement, or rows returned for a result set.
    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn insert_id(&self) -> u64 {
        self.insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }

    /// Human-readable info string from the OK packet.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    /// Another result of a multi-statement batch is pending.
    pub fn has_next(&self) -> bool {
        self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0
    }

    /// Whether the command produced a result set (possibly empty).
    pub fn is_result_set(&self) -> bool {
        !self.columns.is_empty()
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }
}

/// Identifies which streaming result of which connection a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StreamHandle {
    pub connection_id: u64,
    pub generation: u64,
}

/// Outcome of checking a [`StreamHandle`] against its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StreamStatus {
    Active,
    /// Drained by a later command; no rows are left for this handle.
    Superseded,
}

/// A result set whose rows are still on the wire.
///
/// The connection cannot run another command until the rows are read;
/// a new command drains them first and logs a warning. All methods take the
/// owning connection explicitly and check that it is the one the result
/// came from.
#[derive(Debug)]
pub struct UnbufferedResult {
    handle: Option<StreamHandle>,
    columns: Vec<ColumnDef>,
    column_info: Arc<ColumnInfo>,
    rows_read: u64,
    affected_rows: u64,
    insert_id: u64,
    warning_count: u16,
    message: String,
    status_flags: u16,
}

impl UnbufferedResult {
    /// A result with nothing to stream (OK response).
    fn completed(result: QueryResult) -> Self {
        Self {
            handle: None,
            columns: result.columns,
            column_info: Arc::new(ColumnInfo::default()),
            rows_read: 0,
            affected_rows: result.affected_rows,
            insert_id: result.insert_id,
            warning_count: result.warning_count,
            message: result.message,
            status_flags: result.status_flags,
        }
    }

    fn streaming(handle: StreamHandle, columns: Vec<ColumnDef>, column_info: Arc<ColumnInfo>) -> Self {
        Self {
            handle: Some(handle),
            columns,
            column_info,
            rows_read: 0,
            affected_rows: 0,
            insert_id: 0,
            warning_count: 0,
            message: String::new(),
            status_flags: 0,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    /// No more rows will be produced.
    pub fn is_finished(&self) -> bool {
        self.handle.is_none()
    }

    /// Rows read so far; the final count once finished.
    pub fn affected_rows(&self) -> u64 {
        if self.handle.is_some() {
            self.rows_read
        } else {
            self.affected_rows.max(self.rows_read)
        }
    }

    pub fn insert_id(&self) -> u64 {
        self.insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn has_next(&self) -> bool {
        self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0
    }

    /// Read the next row, or `None` once the result is exhausted.
    #[allow(clippy::result_large_err)]
    pub fn fetch_one(&mut self, conn: &mut MySqlConnection) -> Result<Option<Row>> {
        let Some(packet) = self.next_row_packet(conn)? else {
            return Ok(None);
        };
        let converters = Arc::clone(&conn.config().converters);
        Ok(Some(decode_row(
            packet.payload(),
            &self.columns,
            &self.column_info,
            &converters,
            conn.charset().encoding,
        )))
    }

    /// Read every remaining row.
    #[allow(clippy::result_large_err)]
    pub fn fetch_all(&mut self, conn: &mut MySqlConnection) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one(conn)? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Discard the remaining rows, freeing the connection.
    #[allow(clippy::result_large_err)]
    pub fn finish(&mut self, conn: &mut MySqlConnection) -> Result<()> {
        while self.next_row_packet(conn)?.is_some() {}
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    fn next_row_packet(&mut self, conn: &mut MySqlConnection) -> Result<Option<Packet>> {
        let Some(handle) = self.handle else {
            return Ok(None);
        };
        if conn.stream_status(handle)? == StreamStatus::Superseded {
            self.handle = None;
            return Ok(None);
        }

        let next = self.read_row_packet(conn);
        next.map_err(|e| conn.fail(e))
    }

    #[allow(clippy::result_large_err)]
    fn read_row_packet(&mut self, conn: &mut MySqlConnection) -> Result<Option<Packet>> {
        let packet = conn.read_packet()?;
        let deprecate_eof = conn.deprecate_eof();
        if packet.is_error() {
            self.handle = None;
            conn.end_stream();
            return Err(packet.into_database_error());
        }
        if packet.is_result_terminator(deprecate_eof) {
            self.handle = None;
            conn.end_stream();
            let (status_flags, warnings) = terminator_status(&packet, deprecate_eof)?;
            self.status_flags = status_flags;
            self.warning_count = warnings;
            self.affected_rows = self.rows_read;
            conn.record_rows(self.rows_read, status_flags, warnings);
            return Ok(None);
        }

        self.rows_read += 1;
        Ok(Some(packet))
    }
}

/// What a command's response turned into.
#[derive(Debug)]
pub(crate) enum Response {
    Buffered(QueryResult),
    Streaming(UnbufferedResult),
}

impl Response {
    pub(crate) fn into_buffered(self) -> Result<QueryResult> {
        match self {
            Response::Buffered(result) => Ok(result),
            Response::Streaming(_) => Err(Error::Interface(
                "Expected a buffered result".to_string(),
            )),
        }
    }

    pub(crate) fn into_unbuffered(self) -> UnbufferedResult {
        match self {
            Response::Buffered(result) => UnbufferedResult::completed(result),
            Response::Streaming(result) => result,
        }
    }
}

/// Read the response to the command just sent. Malformed replies close
/// the connection.
#[allow(clippy::result_large_err)]
pub(crate) fn read_response(conn: &mut MySqlConnection, unbuffered: bool) -> Result<Response> {
    let response = read_response_packets(conn, unbuffered);
    response.map_err(|e| conn.fail(e))
}

#[allow(clippy::result_large_err)]
fn read_response_packets(conn: &mut MySqlConnection, unbuffered: bool) -> Result<Response> {
    let packet = conn.read_packet()?;
    match ResponseKind::classify(&packet, conn.deprecate_eof()) {
        ResponseKind::Ok => {
            let ok = packet.parse_ok()?;
            conn.record_ok(&ok);
            Ok(Response::Buffered(QueryResult::from_ok(ok)))
        }
        ResponseKind::Error => Err(packet.into_database_error()),
        ResponseKind::LocalInfile => {
            let ok = send_local_infile(conn, &packet)?;
            conn.record_ok(&ok);
            Ok(Response::Buffered(QueryResult::from_ok(ok)))
        }
        ResponseKind::ResultSet => {
            let columns = read_columns(conn, &packet)?;
            let column_info = Arc::new(ColumnInfo::new(
                columns.iter().map(|c| c.name.clone()).collect(),
            ));
            if unbuffered {
                let handle = conn.begin_stream();
                tracing::trace!(columns = columns.len(), "streaming result set");
                Ok(Response::Streaming(UnbufferedResult::streaming(
                    handle,
                    columns,
                    column_info,
                )))
            } else {
                read_rows(conn, columns, &column_info).map(Response::Buffered)
            }
        }
    }
}

/// Column count, column definitions and (without deprecate-EOF) the EOF
/// closing the definitions.
#[allow(clippy::result_large_err)]
fn read_columns(conn: &mut MySqlConnection, first: &Packet) -> Result<Vec<ColumnDef>> {
    let count = first
        .reader()
        .read_lenenc_int()
        .ok_or_else(|| Error::protocol("Invalid column count in result set header"))?;
    let encoding = conn.charset().encoding;

    let mut columns = Vec::with_capacity(usize::try_from(count).unwrap_or_default().min(4096));
    for _ in 0..count {
        let packet = conn.read_packet()?;
        columns.push(ColumnDef::parse(packet.payload(), encoding)?);
    }

    if !conn.deprecate_eof() {
        let eof = conn.read_packet()?;
        if !eof.is_eof() {
            return Err(Error::protocol(
                "Protocol error, expecting EOF after column definitions",
            ));
        }
    }
    Ok(columns)
}

#[allow(clippy::result_large_err)]
fn read_rows(
    conn: &mut MySqlConnection,
    columns: Vec<ColumnDef>,
    column_info: &Arc<ColumnInfo>,
) -> Result<QueryResult> {
    let converters = Arc::clone(&conn.config().converters);
    let encoding = conn.charset().encoding;
    let deprecate_eof = conn.deprecate_eof();

    let mut rows = Vec::new();
    loop {
        let packet = conn.read_packet()?;
        if packet.is_error() {
            return Err(packet.into_database_error());
        }
        if packet.is_result_terminator(deprecate_eof) {
            let (status_flags, warnings) = terminator_status(&packet, deprecate_eof)?;
            conn.record_rows(rows.len() as u64, status_flags, warnings);
            return Ok(QueryResult {
                affected_rows: rows.len() as u64,
                insert_id: 0,
                warning_count: warnings,
                message: String::new(),
                status_flags,
                columns,
                rows,
            });
        }
        rows.push(decode_row(
            packet.payload(),
            &columns,
            column_info,
            &converters,
            encoding,
        ));
    }
}

/// Status flags and warning count of the packet ending a row stream.
#[allow(clippy::result_large_err)]
fn terminator_status(packet: &Packet, deprecate_eof: bool) -> Result<(u16, u16)> {
    if deprecate_eof {
        let ok = packet.parse_ok()?;
        Ok((ok.status_flags, ok.warnings))
    } else {
        let eof = packet.parse_eof()?;
        Ok((eof.status_flags, eof.warnings))
    }
}

/// Decode one text-protocol row. Missing trailing cells read as NULL.
pub(crate) fn decode_row(
    payload: &[u8],
    columns: &[ColumnDef],
    column_info: &Arc<ColumnInfo>,
    converters: &ConverterRegistry,
    encoding: Encoding,
) -> Row {
    let mut reader = PacketReader::new(payload);
    let values = columns
        .iter()
        .map(|column| match reader.read_lenenc_cell() {
            Some(cell) => converters.convert(column, cell, encoding),
            None => mywire_core::Value::Null,
        })
        .collect();
    Row::with_columns(Arc::clone(column_info), values)
}

/// Answer a `0xFB <filename>` request and return the server's final OK.
#[allow(clippy::result_large_err)]
fn send_local_infile(conn: &mut MySqlConnection, request: &Packet) -> Result<OkPacket> {
    let filename = conn
        .charset()
        .encoding
        .decode(request.local_infile_filename())
        .into_owned();

    if !conn.config().local_infile {
        tracing::warn!(file = %filename, "server requested a local file but local_infile is disabled");
        conn.write_packet(&[])?;
        conn.read_packet()?;
        return Err(Error::NotSupported(
            "LOAD DATA LOCAL INFILE is disabled; enable local_infile to use it".to_string(),
        ));
    }

    tracing::debug!(file = %filename, "sending local file");
    let chunk_size = (conn.config().max_allowed_packet as usize).min(LOCAL_INFILE_CHUNK);
    let streamed = stream_file(conn, &filename, chunk_size)?;

    // The empty packet ends the file even when reading it failed
    conn.write_packet(&[])?;
    let reply = conn.read_packet()?;

    if let Err(e) = streamed {
        return Err(Error::Operational(OperationalError {
            code: ER_FILE_NOT_FOUND,
            message: format!("Can't find file '{}'", filename),
            source: Some(Box::new(e)),
        }));
    }
    if reply.is_error() {
        return Err(reply.into_database_error());
    }
    if !reply.is_ok() {
        return Err(Error::protocol("Expected OK packet after local infile data"));
    }
    reply.parse_ok()
}

/// Send the file in chunks. The outer error is a transport failure, the
/// inner one a problem with the file itself.
#[allow(clippy::result_large_err)]
fn stream_file(
    conn: &mut MySqlConnection,
    path: &str,
    chunk_size: usize,
) -> Result<io::Result<()>> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => return Ok(Err(e)),
    };
    let mut buf = vec![0u8; chunk_size.max(1)];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => return Ok(Ok(())),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Ok(Err(e)),
        };
        conn.write_packet(&buf[..n])?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FieldType;
    use mywire_core::Value;

    fn column(name: &str, column_type: FieldType, charset: u16) -> ColumnDef {
        ColumnDef {
            catalog: "def".to_string(),
            schema: "app".to_string(),
            table: "t".to_string(),
            org_table: "t".to_string(),
            name: name.to_string(),
            org_name: name.to_string(),
            charset,
            column_length: 11,
            column_type,
            flags: 0,
            decimals: 0,
        }
    }

    fn info(columns: &[ColumnDef]) -> Arc<ColumnInfo> {
        Arc::new(ColumnInfo::new(columns.iter().map(|c| c.name.clone()).collect()))
    }

    #[test]
    fn test_decode_row_with_null() {
        let columns = vec![column("id", FieldType::Long, 63), column("name", FieldType::VarString, 45)];
        let payload = [0x01, b'7', 0xFB];
        let row = decode_row(
            &payload,
            &columns,
            &info(&columns),
            &ConverterRegistry::default(),
            Encoding::Utf8,
        );
        assert_eq!(row.get(0), Some(&Value::Int(7)));
        assert_eq!(row.get_by_name("name"), Some(&Value::Null));
    }

    #[test]
    fn test_decode_short_row_pads_with_null() {
        let columns = vec![column("a", FieldType::VarString, 45), column("b", FieldType::VarString, 45)];
        let payload = [0x02, b'h', b'i'];
        let row = decode_row(
            &payload,
            &columns,
            &info(&columns),
            &ConverterRegistry::default(),
            Encoding::Utf8,
        );
        assert_eq!(row.get(0), Some(&Value::Text("hi".to_string())));
        assert_eq!(row.get(1), Some(&Value::Null));
    }

    #[test]
    fn test_binary_column_keeps_bytes() {
        let columns = vec![column("blob", FieldType::Blob, 63)];
        let payload = [0x02, 0xFF, 0x00];
        let row = decode_row(
            &payload,
            &columns,
            &info(&columns),
            &ConverterRegistry::default(),
            Encoding::Utf8,
        );
        assert_eq!(row.get(0), Some(&Value::Bytes(vec![0xFF, 0x00])));
    }

    #[test]
    fn test_query_result_from_ok() {
        let result = QueryResult::from_ok(OkPacket {
            affected_rows: 3,
            last_insert_id: 7,
            status_flags: 0x000A,
            warnings: 1,
            info: "ok".to_string(),
        });
        assert_eq!(result.affected_rows(), 3);
        assert_eq!(result.insert_id(), 7);
        assert_eq!(result.warning_count(), 1);
        assert_eq!(result.message(), "ok");
        assert!(result.has_next());
        assert!(!result.is_result_set());
        assert!(result.rows().is_empty());
    }

    #[test]
    fn test_terminator_status() {
        let eof = Packet::new(vec![0xFE, 0x02, 0x00, 0x22, 0x00], 5);
        assert_eq!(terminator_status(&eof, false).unwrap(), (0x0022, 2));

        let ok = Packet::new(vec![0xFE, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00], 5);
        assert_eq!(terminator_status(&ok, true).unwrap(), (0x0002, 0));
    }
}
