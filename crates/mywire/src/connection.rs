//! MySQL connection: lifecycle, command dispatch and connection state.
//!
//! A connection owns its transport and packet codec. Every command goes
//! through one dispatcher which drains whatever the previous command left on
//! the wire (an unread streaming result, pending multi-statement results),
//! resets the sequence number and writes the command packet. The response is
//! read by [`crate::result`].
//!
//! Transport and protocol failures close the connection before the error is
//! returned. Server error packets leave it open.

use std::sync::atomic::{AtomicU64, Ordering};

use mywire_core::{Error, Result, Row};

use crate::charset::Charset;
use crate::config::MySqlConfig;
use crate::handshake;
use crate::protocol::client_error::CR_COMMANDS_OUT_OF_SYNC;
use crate::protocol::server_status::{
    SERVER_MORE_RESULTS_EXISTS, SERVER_STATUS_AUTOCOMMIT, SERVER_STATUS_IN_TRANS,
};
use crate::protocol::capabilities::CLIENT_DEPRECATE_EOF;
use crate::protocol::{Command, Greeting, OkPacket, Packet, PacketCodec, PacketWriter};
use crate::result::{self, QueryResult, StreamHandle, StreamStatus, UnbufferedResult};
use crate::tls::validate_tls_config;
use crate::transport::Transport;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A blocking connection to a MySQL server.
pub struct MySqlConnection {
    /// Process-unique id, used to match streaming results to their connection
    id: u64,
    transport: Option<Transport>,
    codec: PacketCodec,
    config: MySqlConfig,
    charset: Charset,
    client_flags: u32,
    greeting: Greeting,
    auth_plugin: String,
    status_flags: u16,
    affected_rows: u64,
    insert_id: u64,
    warning_count: u16,
    /// Generation of the streaming result currently on the wire
    active_stream: Option<u64>,
    next_generation: u64,
    abandoned_results: u64,
}

impl std::fmt::Debug for MySqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MySqlConnection")
            .field("id", &self.id)
            .field("open", &self.is_open())
            .field("thread_id", &self.greeting.thread_id)
            .field("server_version", &self.greeting.server_version)
            .field("host", &self.config.host_info())
            .field("charset", &self.charset.name)
            .finish_non_exhaustive()
    }
}

fn closed_error() -> Error {
    Error::Interface("Connection is closed".to_string())
}

/// Quote a string as a SQL literal for the session setup statements.
fn quote_literal(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        match c {
            '\'' => quoted.push_str("\\'"),
            '\\' => quoted.push_str("\\\\"),
            '\0' => quoted.push_str("\\0"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\u{1a}' => quoted.push_str("\\Z"),
            other => quoted.push(other),
        }
    }
    quoted.push('\'');
    quoted
}

impl MySqlConnection {
    /// Connect over TCP, or over the Unix socket when one is configured.
    ///
    /// Runs the handshake, then applies `sql_mode`, `init_command` and the
    /// autocommit setting.
    #[allow(clippy::result_large_err)]
    pub fn connect(config: MySqlConfig) -> Result<Self> {
        config.validate()?;
        validate_tls_config(&config.tls)?;

        let transport = match &config.unix_socket {
            #[cfg(unix)]
            Some(path) => Transport::connect_unix(path)?,
            #[cfg(not(unix))]
            Some(_) => {
                return Err(Error::NotSupported(
                    "Unix sockets are not available on this platform".to_string(),
                ));
            }
            None => Transport::connect_tcp(&config.host, config.port, config.connect_timeout)?,
        };
        transport.set_timeouts(config.read_timeout, config.write_timeout)?;

        Self::connect_with_transport(config, transport)
    }

    /// Run the handshake over an already connected transport.
    #[allow(clippy::result_large_err)]
    pub fn connect_with_transport(config: MySqlConfig, mut transport: Transport) -> Result<Self> {
        let charset = config.resolve_charset()?;
        let mut codec = PacketCodec::new();

        let outcome = match handshake::perform(&mut transport, &mut codec, &config, charset) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(error = %e, host = %config.host_info(), "handshake failed");
                transport.close();
                return Err(e);
            }
        };

        let mut conn = Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            transport: Some(transport),
            codec,
            config,
            charset,
            client_flags: outcome.client_flags,
            status_flags: outcome.status_flags,
            greeting: outcome.greeting,
            auth_plugin: outcome.auth_plugin,
            affected_rows: 0,
            insert_id: 0,
            warning_count: 0,
            active_stream: None,
            next_generation: 0,
            abandoned_results: 0,
        };
        tracing::debug!(
            connection = conn.id,
            thread_id = conn.greeting.thread_id,
            server_version = %conn.greeting.server_version,
            auth_plugin = %conn.auth_plugin,
            "connected"
        );

        if let Err(e) = conn.setup_session() {
            conn.force_close();
            return Err(e);
        }
        Ok(conn)
    }

    #[allow(clippy::result_large_err)]
    fn setup_session(&mut self) -> Result<()> {
        if let Some(mode) = self.config.sql_mode.clone() {
            self.query(&format!("SET sql_mode={}", quote_literal(&mode)))?;
        }
        if let Some(init) = self.config.init_command.clone() {
            self.query(&init)?;
            self.commit()?;
        }
        if let Some(autocommit) = self.config.autocommit {
            if autocommit != self.autocommit_enabled() {
                self.autocommit(autocommit)?;
            }
        }
        Ok(())
    }

    /// Send COM_QUIT and close the transport. Errors while quitting are
    /// ignored.
    #[allow(clippy::result_large_err)]
    pub fn close(&mut self) -> Result<()> {
        let Some(mut transport) = self.transport.take() else {
            return Err(Error::Interface("Already closed".to_string()));
        };
        self.codec.reset();
        let _ = self.codec.write_packet(&mut transport, &[Command::Quit as u8]);
        transport.close();
        self.active_stream = None;
        tracing::debug!(connection = self.id, "connection closed");
        Ok(())
    }

    /// Drop the transport without telling the server.
    pub fn force_close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.active_stream = None;
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn server_version(&self) -> &str {
        &self.greeting.server_version
    }

    /// Server thread id, the target for [`kill`](Self::kill).
    pub fn thread_id(&self) -> u32 {
        self.greeting.thread_id
    }

    pub fn server_capabilities(&self) -> u32 {
        self.greeting.capabilities
    }

    /// Capability flags negotiated with the server.
    pub fn client_flags(&self) -> u32 {
        self.client_flags
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    pub fn status_flags(&self) -> u16 {
        self.status_flags
    }

    pub fn in_transaction(&self) -> bool {
        self.status_flags & SERVER_STATUS_IN_TRANS != 0
    }

    pub fn autocommit_enabled(&self) -> bool {
        self.status_flags & SERVER_STATUS_AUTOCOMMIT != 0
    }

    pub fn auth_plugin(&self) -> &str {
        &self.auth_plugin
    }

    pub fn host_info(&self) -> String {
        self.config.host_info()
    }

    pub fn affected_rows(&self) -> u64 {
        self.affected_rows
    }

    pub fn insert_id(&self) -> u64 {
        self.insert_id
    }

    pub fn warning_count(&self) -> u16 {
        self.warning_count
    }

    /// Streaming results that were drained by a later command instead of
    /// by their owner.
    pub fn abandoned_result_count(&self) -> u64 {
        self.abandoned_results
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Run a statement and read its whole result.
    #[allow(clippy::result_large_err)]
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        self.send_query(sql)?;
        result::read_response(self, false)?.into_buffered()
    }

    /// Run a statement and stream its rows.
    #[allow(clippy::result_large_err)]
    pub fn query_unbuffered(&mut self, sql: &str) -> Result<UnbufferedResult> {
        self.send_query(sql)?;
        Ok(result::read_response(self, true)?.into_unbuffered())
    }

    /// Read the next result of a multi-statement batch, if any.
    #[allow(clippy::result_large_err)]
    pub fn next_result(&mut self) -> Result<Option<QueryResult>> {
        if !self.prepare_next_result()? {
            return Ok(None);
        }
        result::read_response(self, false)?.into_buffered().map(Some)
    }

    /// Like [`next_result`](Self::next_result), streaming the rows.
    #[allow(clippy::result_large_err)]
    pub fn next_result_unbuffered(&mut self) -> Result<Option<UnbufferedResult>> {
        if !self.prepare_next_result()? {
            return Ok(None);
        }
        Ok(Some(result::read_response(self, true)?.into_unbuffered()))
    }

    #[allow(clippy::result_large_err)]
    fn prepare_next_result(&mut self) -> Result<bool> {
        if !self.is_open() {
            return Err(closed_error());
        }
        self.drain_active_stream()?;
        Ok(self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0)
    }

    /// Change the default database (COM_INIT_DB).
    #[allow(clippy::result_large_err)]
    pub fn select_db(&mut self, database: &str) -> Result<()> {
        let name = self.charset.encoding.encode(database).into_owned();
        self.execute_command(Command::InitDb, &name)?;
        self.read_ok_packet()?;
        self.config.database = Some(database.to_string());
        Ok(())
    }

    /// Check the connection (COM_PING).
    ///
    /// With `reconnect`, a closed connection or a failed ping is replaced by
    /// a fresh connection built from the same configuration.
    #[allow(clippy::result_large_err)]
    pub fn ping(&mut self, reconnect: bool) -> Result<()> {
        if !self.is_open() {
            if !reconnect {
                return Err(closed_error());
            }
            return self.reconnect();
        }

        let pinged = self
            .execute_command(Command::Ping, &[])
            .and_then(|()| self.read_ok_packet());
        match pinged {
            Ok(()) => Ok(()),
            Err(e) if reconnect => {
                tracing::warn!(connection = self.id, error = %e, "ping failed; reconnecting");
                self.reconnect()?;
                self.ping(false)
            }
            Err(e) => Err(e),
        }
    }

    #[allow(clippy::result_large_err)]
    fn reconnect(&mut self) -> Result<()> {
        let mut fresh = Self::connect(self.config.clone())?;
        fresh.id = self.id;
        fresh.next_generation = self.next_generation;
        fresh.abandoned_results = self.abandoned_results;
        let mut old = std::mem::replace(self, fresh);
        old.force_close();
        Ok(())
    }

    /// Ask the server to kill a thread (COM_PROCESS_KILL).
    #[allow(clippy::result_large_err)]
    pub fn kill(&mut self, thread_id: u32) -> Result<()> {
        self.execute_command(Command::ProcessKill, &thread_id.to_le_bytes())?;
        self.read_ok_packet()
    }

    /// Switch the session character set with `SET NAMES`.
    #[allow(clippy::result_large_err)]
    pub fn set_charset(&mut self, name: &str) -> Result<()> {
        let charset = Charset::by_name(name).ok_or_else(|| {
            Error::Config(mywire_core::ConfigError {
                message: format!("Unknown charset: {}", name),
                source: None,
            })
        })?;
        self.query(&format!("SET NAMES {}", charset.name))?;
        self.charset = charset;
        self.config.charset = name.to_string();
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn autocommit(&mut self, enabled: bool) -> Result<()> {
        self.query(if enabled {
            "SET AUTOCOMMIT = 1"
        } else {
            "SET AUTOCOMMIT = 0"
        })?;
        self.config.autocommit = Some(enabled);
        Ok(())
    }

    #[allow(clippy::result_large_err)]
    pub fn begin(&mut self) -> Result<()> {
        self.query("BEGIN").map(drop)
    }

    #[allow(clippy::result_large_err)]
    pub fn commit(&mut self) -> Result<()> {
        self.query("COMMIT").map(drop)
    }

    #[allow(clippy::result_large_err)]
    pub fn rollback(&mut self) -> Result<()> {
        self.query("ROLLBACK").map(drop)
    }

    /// Rows of `SHOW WARNINGS` for the previous statement.
    #[allow(clippy::result_large_err)]
    pub fn show_warnings(&mut self) -> Result<Vec<Row>> {
        Ok(self.query("SHOW WARNINGS")?.into_rows())
    }

    #[allow(clippy::result_large_err)]
    fn send_query(&mut self, sql: &str) -> Result<()> {
        let sql = self.charset.encoding.encode(sql).into_owned();
        self.execute_command(Command::Query, &sql)
    }

    /// Dispatch one command. Whatever the previous command left unread is
    /// drained first.
    #[allow(clippy::result_large_err)]
    pub(crate) fn execute_command(&mut self, command: Command, body: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(closed_error());
        }
        self.drain_active_stream()?;
        while self.status_flags & SERVER_MORE_RESULTS_EXISTS != 0 {
            tracing::debug!(connection = self.id, "discarding pending batch result");
            // A failed statement ends the batch
            if let Err(e) = result::read_response(self, false) {
                if e.is_fatal() {
                    return Err(e);
                }
                self.status_flags &= !SERVER_MORE_RESULTS_EXISTS;
            }
        }

        self.codec.reset();
        let mut writer = PacketWriter::command(command, body.len());
        writer.write_bytes(body);
        tracing::trace!(connection = self.id, ?command, len = body.len(), "sending command");
        self.write_packet(writer.as_bytes())
    }

    /// Read rows of an abandoned streaming result up to its terminator.
    /// A server error ending the abandoned result is logged and dropped.
    #[allow(clippy::result_large_err)]
    fn drain_active_stream(&mut self) -> Result<()> {
        if self.active_stream.take().is_none() {
            return Ok(());
        }
        self.abandoned_results += 1;
        tracing::warn!(
            connection = self.id,
            "previous unbuffered result was not fully read; draining it"
        );

        let drained = self.drain_rows();
        drained.map_err(|e| self.fail(e))
    }

    #[allow(clippy::result_large_err)]
    fn drain_rows(&mut self) -> Result<()> {
        let deprecate_eof = self.deprecate_eof();
        let mut drained = 0u64;
        loop {
            let packet = self.read_packet()?;
            if packet.is_error() {
                let err = packet.into_database_error();
                if err.is_fatal() {
                    return Err(err);
                }
                tracing::warn!(
                    connection = self.id,
                    rows = drained,
                    error = %err,
                    "abandoned unbuffered result ended with an error"
                );
                self.status_flags &= !SERVER_MORE_RESULTS_EXISTS;
                return Ok(());
            }
            if packet.is_result_terminator(deprecate_eof) {
                let (status_flags, warnings) = if deprecate_eof {
                    let ok = packet.parse_ok()?;
                    (ok.status_flags, ok.warnings)
                } else {
                    let eof = packet.parse_eof()?;
                    (eof.status_flags, eof.warnings)
                };
                tracing::debug!(connection = self.id, rows = drained, "drained unbuffered result");
                self.record_rows(drained, status_flags, warnings);
                return Ok(());
            }
            drained += 1;
        }
    }

    /// Expect an OK packet: the reply of INIT_DB, PING and PROCESS_KILL.
    #[allow(clippy::result_large_err)]
    fn read_ok_packet(&mut self) -> Result<()> {
        let read = self.read_ok_reply();
        read.map_err(|e| self.fail(e))
    }

    #[allow(clippy::result_large_err)]
    fn read_ok_reply(&mut self) -> Result<()> {
        let packet = self.read_packet()?;
        if packet.is_error() {
            return Err(packet.into_database_error());
        }
        if !packet.is_ok() {
            return Err(Error::operational(
                CR_COMMANDS_OUT_OF_SYNC,
                "Command Out of Sync",
            ));
        }
        let ok = packet.parse_ok()?;
        self.record_ok(&ok);
        Ok(())
    }

    /// Read one logical packet. Fatal errors close the connection.
    #[allow(clippy::result_large_err)]
    pub(crate) fn read_packet(&mut self) -> Result<Packet> {
        let transport = self.transport.as_mut().ok_or_else(closed_error)?;
        let result = self.codec.read_packet(transport);
        result.map_err(|e| self.fail(e))
    }

    /// Write one logical packet. Fatal errors close the connection.
    #[allow(clippy::result_large_err)]
    pub(crate) fn write_packet(&mut self, payload: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or_else(closed_error)?;
        let result = self.codec.write_packet(transport, payload);
        result.map_err(|e| self.fail(e))
    }

    /// Close the connection if `err` leaves it unusable, then hand the
    /// error back.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        if err.is_fatal() && self.is_open() {
            tracing::warn!(connection = self.id, error = %err, "closing connection after fatal error");
            self.force_close();
        }
        err
    }

    pub(crate) fn deprecate_eof(&self) -> bool {
        self.client_flags & CLIENT_DEPRECATE_EOF != 0
    }

    pub(crate) fn record_ok(&mut self, ok: &OkPacket) {
        self.affected_rows = ok.affected_rows;
        self.insert_id = ok.last_insert_id;
        self.warning_count = ok.warnings;
        self.status_flags = ok.status_flags;
    }

    pub(crate) fn record_rows(&mut self, rows: u64, status_flags: u16, warnings: u16) {
        self.affected_rows = rows;
        self.insert_id = 0;
        self.warning_count = warnings;
        self.status_flags = status_flags;
    }

    /// Mark a streaming result as on the wire and hand out its handle.
    pub(crate) fn begin_stream(&mut self) -> StreamHandle {
        self.next_generation += 1;
        self.active_stream = Some(self.next_generation);
        StreamHandle {
            connection_id: self.id,
            generation: self.next_generation,
        }
    }

    pub(crate) fn end_stream(&mut self) {
        self.active_stream = None;
    }

    #[allow(clippy::result_large_err)]
    pub(crate) fn stream_status(&self, handle: StreamHandle) -> Result<StreamStatus> {
        if handle.connection_id != self.id {
            return Err(Error::Interface(
                "Result belongs to a different connection".to_string(),
            ));
        }
        if !self.is_open() {
            return Err(closed_error());
        }
        if self.active_stream == Some(handle.generation) {
            Ok(StreamStatus::Active)
        } else {
            Ok(StreamStatus::Superseded)
        }
    }
}

impl Drop for MySqlConnection {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
    }
}
