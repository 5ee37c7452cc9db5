//! Connection-phase state machine: greeting, capability negotiation,
//! optional TLS upgrade, and the authentication exchange.
//!
//! ```text
//! AwaitGreeting -> Negotiated -> [TLS] -> ResponseSent -+-> OK
//!                                                       +-> Error
//!                                                       +-> AuthSwitch --+
//!                                                       +-> MoreData ----+--> (loop)
//! ```

use std::sync::Arc;

use mywire_core::error::AuthenticationError;
use mywire_core::{Error, Result};

use crate::auth::{
    self, AuthPlugin, AuthPluginHandler, SHA256_REQUEST_PUBLIC_KEY, auth_error, caching_sha2,
};
use crate::charset::Charset;
use crate::config::MySqlConfig;
use crate::protocol::capabilities::{
    CLIENT_COMPRESS, CLIENT_PLUGIN_AUTH, CLIENT_PROTOCOL_41, CLIENT_SSL,
};
use crate::protocol::client_error::CR_AUTH_PLUGIN_CANNOT_LOAD;
use crate::protocol::{Greeting, HandshakeResponse, Packet, PacketCodec, build_ssl_request};
use crate::tls::negotiate_ssl;
use crate::transport::Transport;

/// Prompt text the `dialog` plugin uses for the account password.
const DIALOG_PASSWORD_PROMPT: &[u8] = b"Password: ";

/// What the connection keeps from a successful handshake.
#[derive(Debug)]
pub(crate) struct HandshakeOutcome {
    pub greeting: Greeting,
    pub client_flags: u32,
    pub auth_plugin: String,
    pub status_flags: u16,
}

/// Run the whole connection phase over a fresh transport.
#[allow(clippy::result_large_err)]
pub(crate) fn perform(
    transport: &mut Transport,
    codec: &mut PacketCodec,
    config: &MySqlConfig,
    charset: Charset,
) -> Result<HandshakeOutcome> {
    let greeting_packet = codec.read_packet(transport)?;
    if greeting_packet.is_error() {
        let err = greeting_packet.parse_error()?;
        return Err(Error::operational(err.error_code, err.error_message));
    }
    let greeting = Greeting::parse(greeting_packet.payload())?;
    tracing::debug!(
        server_version = %greeting.server_version,
        thread_id = greeting.thread_id,
        plugin = ?greeting.auth_plugin,
        "received server greeting"
    );

    if config.compression {
        return Err(Error::NotSupported("Compression is not supported".to_string()));
    }
    if greeting.capabilities & CLIENT_PROTOCOL_41 == 0 {
        return Err(Error::NotSupported(
            "Server does not support protocol 4.1".to_string(),
        ));
    }

    let mut client_flags = config.capability_flags() & greeting.capabilities;
    if client_flags & CLIENT_COMPRESS != 0 {
        return Err(Error::NotSupported("Compression is not supported".to_string()));
    }

    if negotiate_ssl(config.ssl_mode, greeting.capabilities)? {
        let request = build_ssl_request(client_flags, config.max_allowed_packet, charset.id);
        codec.write_packet(transport, &request)?;
        transport.upgrade_to_tls(&config.tls, &config.host, config.ssl_mode)?;
        tracing::debug!("upgraded connection to TLS");
    } else {
        client_flags &= !CLIENT_SSL;
    }

    let plugin = greeting
        .auth_plugin
        .as_deref()
        .filter(|name| !name.is_empty())
        .map_or(AuthPlugin::NativePassword, AuthPlugin::from_name);

    let mut auth = Authenticator {
        transport,
        codec,
        config,
        charset,
        client_flags,
        salt: greeting.salt.clone(),
        plugin,
        server_public_key: config.server_public_key.clone(),
    };
    let status_flags = auth.run()?;
    let auth_plugin = auth.plugin.name().to_string();

    Ok(HandshakeOutcome {
        greeting,
        client_flags,
        auth_plugin,
        status_flags,
    })
}

/// Connection attributes sent with the handshake response.
fn connect_attributes(config: &MySqlConfig) -> Vec<(String, String)> {
    let mut attrs = vec![
        ("_client_name".to_string(), "mywire".to_string()),
        (
            "_client_version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        ("_pid".to_string(), std::process::id().to_string()),
    ];
    if let Some(program) = &config.program_name {
        attrs.push(("program_name".to_string(), program.clone()));
    }
    attrs.extend(
        config
            .attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    attrs
}

fn plugin_not_loaded(name: &str, detail: &str) -> Error {
    Error::operational(
        CR_AUTH_PLUGIN_CANNOT_LOAD,
        format!("Authentication plugin '{}' {}", name, detail),
    )
}

/// Per-handshake auth state: current plugin and challenge.
struct Authenticator<'a> {
    transport: &'a mut Transport,
    codec: &'a mut PacketCodec,
    config: &'a MySqlConfig,
    charset: Charset,
    client_flags: u32,
    salt: Vec<u8>,
    plugin: AuthPlugin,
    server_public_key: Option<Vec<u8>>,
}

impl Authenticator<'_> {
    fn password(&self) -> &[u8] {
        self.config.password.as_deref().unwrap_or_default().as_bytes()
    }

    fn handler(&self) -> Option<Arc<dyn AuthPluginHandler>> {
        self.config.auth_plugins.get(self.plugin.name()).cloned()
    }

    #[allow(clippy::result_large_err)]
    fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.codec.write_packet(&mut *self.transport, payload)
    }

    #[allow(clippy::result_large_err)]
    fn round_trip(&mut self, payload: &[u8]) -> Result<Packet> {
        self.send(payload)?;
        self.codec.read_packet(&mut *self.transport)
    }

    /// Send the handshake response and drive the exchange to completion.
    /// Returns the server status flags from the final OK.
    #[allow(clippy::result_large_err)]
    fn run(&mut self) -> Result<u16> {
        let auth_response = self.initial_response()?;
        let attributes = connect_attributes(self.config);
        let encoding = self.charset.encoding;
        let user = encoding.encode(&self.config.user);
        let database = self.config.database.as_deref().map(|db| encoding.encode(db));
        let plugin_name = self.plugin.name().to_string();

        let response = HandshakeResponse {
            client_flags: self.client_flags,
            max_packet_size: self.config.max_allowed_packet,
            charset: self.charset.id,
            user: user.as_ref(),
            auth_response: &auth_response,
            database: database.as_deref(),
            auth_plugin: Some(&plugin_name),
            attributes: &attributes,
        };
        let mut packet = self.round_trip(&response.to_payload())?;

        loop {
            if packet.is_ok() {
                let ok = packet.parse_ok()?;
                tracing::debug!(plugin = %self.plugin, "authentication succeeded");
                return Ok(ok.status_flags);
            }
            if packet.is_error() {
                let err = packet.parse_error()?;
                return Err(Error::Authentication(AuthenticationError {
                    code: Some(err.error_code),
                    message: err.error_message,
                    source: None,
                }));
            }
            if packet.is_auth_switch_request() {
                packet = self.switch_plugin(&packet)?;
                continue;
            }
            if packet.is_extra_auth_data() {
                packet = match self.plugin {
                    AuthPlugin::CachingSha2Password => self.caching_sha2_more_data(&packet)?,
                    AuthPlugin::Sha256Password => self.sha256_public_key(&packet)?,
                    AuthPlugin::Dialog => self.dialog(packet.payload().to_vec())?,
                    _ => {
                        return Err(auth_error(format!(
                            "Received extra packet for auth method {}",
                            self.plugin
                        )));
                    }
                };
                continue;
            }
            if self.plugin == AuthPlugin::Dialog {
                packet = self.dialog(packet.payload().to_vec())?;
                continue;
            }
            return Err(Error::protocol(format!(
                "Unexpected packet during authentication (first byte {:#04x})",
                packet.payload().first().copied().unwrap_or_default()
            )));
        }
    }

    /// Auth response carried in the handshake response packet.
    #[allow(clippy::result_large_err)]
    fn initial_response(&self) -> Result<Vec<u8>> {
        if let Some(handler) = self.handler() {
            if let Some(response) = handler.authenticate(&self.salt)? {
                return Ok(response);
            }
        }
        let password = self.password();
        Ok(match &self.plugin {
            AuthPlugin::NativePassword => auth::scramble_native_password(password, &self.salt),
            AuthPlugin::CachingSha2Password => auth::scramble_caching_sha2(password, &self.salt),
            AuthPlugin::Sha256Password => {
                if self.transport.is_secure() {
                    auth::nul_terminated(password)
                } else if password.is_empty() {
                    vec![0]
                } else if let Some(key) = &self.server_public_key {
                    auth::sha256_password_rsa(password, &self.salt, key)?
                } else {
                    vec![SHA256_REQUEST_PUBLIC_KEY]
                }
            }
            AuthPlugin::ClearPassword => self.clear_password()?,
            AuthPlugin::OldPassword => {
                return Err(Error::NotSupported(
                    "mysql_old_password authentication is not supported".to_string(),
                ));
            }
            // The server answers with a switch request or a prompt
            AuthPlugin::Dialog | AuthPlugin::Other(_) => Vec::new(),
        })
    }

    #[allow(clippy::result_large_err)]
    fn clear_password(&self) -> Result<Vec<u8>> {
        if !self.config.allow_cleartext_password {
            return Err(auth_error(
                "Server requested mysql_clear_password; set allow_cleartext_password to permit it",
            ));
        }
        Ok(auth::nul_terminated(self.password()))
    }

    /// Handle `0xFE <plugin>\0 <data>`: adopt the new plugin and challenge,
    /// answer, and return the server's next packet.
    #[allow(clippy::result_large_err)]
    fn switch_plugin(&mut self, packet: &Packet) -> Result<Packet> {
        if self.client_flags & CLIENT_PLUGIN_AUTH == 0 {
            return Err(Error::NotSupported(
                "Old-style auth switch without plugin support is not supported".to_string(),
            ));
        }

        let mut reader = packet.reader();
        reader.skip(1);
        let name = reader.read_null_string();
        self.salt = reader.read_rest().to_vec();
        self.plugin = AuthPlugin::from_name(&name);
        tracing::debug!(plugin = %self.plugin, "server requested auth switch");

        if let Some(handler) = self.handler() {
            if let Some(response) = handler.authenticate(&self.salt)? {
                return self.round_trip(&response);
            }
        }

        let password = self.password().to_vec();
        match self.plugin.clone() {
            AuthPlugin::NativePassword => {
                let scramble = auth::scramble_native_password(&password, &self.salt);
                self.round_trip(&scramble)
            }
            AuthPlugin::CachingSha2Password => {
                let scramble = auth::scramble_caching_sha2(&password, &self.salt);
                self.round_trip(&scramble)
            }
            AuthPlugin::Sha256Password => {
                if self.transport.is_secure() {
                    self.round_trip(&auth::nul_terminated(&password))
                } else if password.is_empty() {
                    self.round_trip(&[])
                } else if let Some(key) = self.server_public_key.clone() {
                    let encrypted = auth::sha256_password_rsa(&password, &self.salt, &key)?;
                    self.round_trip(&encrypted)
                } else {
                    self.round_trip(&[SHA256_REQUEST_PUBLIC_KEY])
                }
            }
            AuthPlugin::ClearPassword => {
                let response = self.clear_password()?;
                self.round_trip(&response)
            }
            AuthPlugin::Dialog => self.dialog(self.salt.clone()),
            AuthPlugin::OldPassword => Err(Error::NotSupported(
                "mysql_old_password authentication is not supported".to_string(),
            )),
            AuthPlugin::Other(name) => Err(plugin_not_loaded(&name, "not configured")),
        }
    }

    /// caching_sha2_password extra data: fast-auth result byte.
    #[allow(clippy::result_large_err)]
    fn caching_sha2_more_data(&mut self, packet: &Packet) -> Result<Packet> {
        match packet.payload().get(1).copied() {
            Some(caching_sha2::FAST_AUTH_SUCCESS) => {
                tracing::debug!("caching_sha2_password fast auth succeeded");
                self.codec.read_packet(&mut *self.transport)
            }
            Some(caching_sha2::PERFORM_FULL_AUTH) => {
                tracing::debug!(secure = self.transport.is_secure(), "caching_sha2_password full auth");
                let password = self.password().to_vec();
                if self.transport.is_secure() {
                    return self.round_trip(&auth::nul_terminated(&password));
                }
                let key = match self.server_public_key.clone() {
                    Some(key) => key,
                    None => {
                        let reply = self.round_trip(&[caching_sha2::REQUEST_PUBLIC_KEY])?;
                        if !reply.is_extra_auth_data() {
                            return Err(auth_error(
                                "caching_sha2_password: expected the server public key",
                            ));
                        }
                        let key = reply.payload()[1..].to_vec();
                        self.server_public_key = Some(key.clone());
                        key
                    }
                };
                let encrypted = auth::sha256_password_rsa(&password, &self.salt, &key)?;
                self.round_trip(&encrypted)
            }
            other => Err(auth_error(format!(
                "caching_sha2_password: unknown fast auth result {:?}",
                other
            ))),
        }
    }

    /// sha256_password extra data: the server's PEM public key.
    #[allow(clippy::result_large_err)]
    fn sha256_public_key(&mut self, packet: &Packet) -> Result<Packet> {
        let key = packet.payload()[1..].to_vec();
        self.server_public_key = Some(key.clone());
        let password = self.password().to_vec();
        if password.is_empty() {
            return self.round_trip(&[]);
        }
        let encrypted = auth::sha256_password_rsa(&password, &self.salt, &key)?;
        self.round_trip(&encrypted)
    }

    /// `dialog` prompts: `<flag> <prompt>`, answered until OK or the last
    /// prompt.
    #[allow(clippy::result_large_err)]
    fn dialog(&mut self, mut prompt_packet: Vec<u8>) -> Result<Packet> {
        loop {
            let Some((&flag, prompt)) = prompt_packet.split_first() else {
                return Err(Error::protocol("Empty dialog prompt"));
            };
            let echo = flag & 0x06 == 0x02;
            let last = flag & 0x01 == 0x01;

            let response = if prompt == DIALOG_PASSWORD_PROMPT {
                auth::nul_terminated(self.password())
            } else {
                let handler = self
                    .handler()
                    .ok_or_else(|| plugin_not_loaded(auth::plugins::DIALOG, "not configured"))?;
                let answer = handler
                    .prompt(echo, prompt)?
                    .ok_or_else(|| plugin_not_loaded(auth::plugins::DIALOG, "handler did not answer prompt"))?;
                auth::nul_terminated(&answer)
            };

            let reply = self.round_trip(&response)?;
            if reply.is_error() || reply.is_ok() || last {
                return Ok(reply);
            }
            prompt_packet = reply.into_payload();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{self, Cursor, Read, Write};
    use std::sync::Mutex;

    use crate::protocol::PacketReader;
    use crate::protocol::capabilities::DEFAULT_CLIENT_FLAGS;

    /// Scripted server bytes in, client bytes captured.
    #[derive(Debug)]
    struct Scripted {
        input: Cursor<Vec<u8>>,
        output: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Scripted {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Scripted {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes()[..3].to_vec();
        out.push(seq);
        out.extend_from_slice(payload);
        out
    }

    fn salt() -> Vec<u8> {
        (1..=20).collect()
    }

    fn greeting(plugin: &str, caps: u32) -> Vec<u8> {
        let mut data = vec![10];
        data.extend_from_slice(b"8.0.36\0");
        data.extend_from_slice(&9u32.to_le_bytes());
        data.extend_from_slice(&salt()[..8]);
        data.push(0);
        data.extend_from_slice(&(caps as u16).to_le_bytes());
        data.push(45);
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend_from_slice(&((caps >> 16) as u16).to_le_bytes());
        data.push(21);
        data.extend_from_slice(&[0; 10]);
        data.extend_from_slice(&salt()[8..]);
        data.push(0);
        data.extend_from_slice(plugin.as_bytes());
        data.push(0);
        data
    }

    const OK: &[u8] = &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00];

    fn run(config: &MySqlConfig, server: Vec<u8>) -> (Result<HandshakeOutcome>, Vec<Vec<u8>>) {
        let output = Arc::new(Mutex::new(Vec::new()));
        let mut transport = Transport::from_socket(Scripted {
            input: Cursor::new(server),
            output: Arc::clone(&output),
        });
        let mut codec = PacketCodec::new();
        let result = perform(&mut transport, &mut codec, config, Charset::default());

        let written = output.lock().unwrap().clone();
        let mut packets = Vec::new();
        let mut cursor = Cursor::new(written);
        while (cursor.position() as usize) < cursor.get_ref().len() {
            let mut header = [0u8; 4];
            cursor.read_exact(&mut header).unwrap();
            let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
            let mut body = vec![0u8; len];
            cursor.read_exact(&mut body).unwrap();
            packets.push(body);
        }
        (result, packets)
    }

    fn caps() -> u32 {
        DEFAULT_CLIENT_FLAGS | CLIENT_SSL
    }

    #[test]
    fn test_native_password_handshake() {
        let config = MySqlConfig::new().user("root").password("secret");
        let mut server = frame(0, &greeting("mysql_native_password", caps()));
        server.extend(frame(2, OK));

        let (result, packets) = run(&config, server);
        let outcome = result.unwrap();
        assert_eq!(outcome.auth_plugin, "mysql_native_password");
        assert_eq!(outcome.status_flags, 0x0002);
        assert_eq!(outcome.greeting.thread_id, 9);
        assert_eq!(outcome.client_flags & CLIENT_SSL, 0);

        let mut reader = PacketReader::new(&packets[0]);
        reader.skip(32);
        assert_eq!(reader.read_null_string(), "root");
        assert_eq!(
            reader.read_lenenc_bytes().unwrap(),
            auth::scramble_native_password(b"secret", &salt()).as_slice()
        );
        assert_eq!(reader.read_null_string(), "mysql_native_password");
    }

    #[test]
    fn test_caching_sha2_fast_auth() {
        let config = MySqlConfig::new().user("app").password("secret");
        let mut server = frame(0, &greeting("caching_sha2_password", caps()));
        server.extend(frame(2, &[0x01, caching_sha2::FAST_AUTH_SUCCESS]));
        server.extend(frame(3, OK));

        let (result, packets) = run(&config, server);
        assert_eq!(result.unwrap().auth_plugin, "caching_sha2_password");
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_auth_switch_to_native() {
        let config = MySqlConfig::new().user("app").password("secret");
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"mysql_native_password\0");
        switch.extend_from_slice(&[7u8; 20]);
        switch.push(0);

        let mut server = frame(0, &greeting("caching_sha2_password", caps()));
        server.extend(frame(2, &switch));
        server.extend(frame(4, OK));

        let (result, packets) = run(&config, server);
        assert_eq!(result.unwrap().auth_plugin, "mysql_native_password");
        assert_eq!(packets[1], auth::scramble_native_password(b"secret", &[7u8; 20]));
    }

    #[test]
    fn test_server_error_is_authentication_error() {
        let config = MySqlConfig::new().user("app").password("wrong");
        let mut err = vec![0xFF];
        err.extend_from_slice(&1045u16.to_le_bytes());
        err.extend_from_slice(b"#28000Access denied");

        let mut server = frame(0, &greeting("mysql_native_password", caps()));
        server.extend(frame(2, &err));

        let (result, _) = run(&config, server);
        match result.unwrap_err() {
            Error::Authentication(e) => {
                assert_eq!(e.code, Some(1045));
                assert_eq!(e.message, "Access denied");
            }
            other => panic!("expected authentication error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_greeting_is_operational() {
        let mut err = vec![0xFF];
        err.extend_from_slice(&1040u16.to_le_bytes());
        err.extend_from_slice(b"Too many connections");
        let (result, _) = run(&MySqlConfig::new(), frame(0, &err));
        let err = result.unwrap_err();
        assert!(matches!(err, Error::Operational(_)));
        assert_eq!(err.code(), Some(1040));
    }

    #[test]
    fn test_compression_rejected() {
        let config = MySqlConfig::new().compression(true);
        let (result, _) = run(&config, frame(0, &greeting("mysql_native_password", caps())));
        assert!(matches!(result, Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_required_ssl_without_server_support() {
        let config = MySqlConfig::new().ssl_mode(crate::config::SslMode::Required);
        let (result, packets) = run(
            &config,
            frame(0, &greeting("mysql_native_password", DEFAULT_CLIENT_FLAGS)),
        );
        assert!(matches!(result, Err(Error::Connection(_))));
        assert!(packets.is_empty());
    }

    #[test]
    fn test_clear_password_requires_opt_in() {
        let config = MySqlConfig::new().user("u").password("pw");
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"mysql_clear_password\0");
        let mut server = frame(0, &greeting("mysql_native_password", caps()));
        server.extend(frame(2, &switch));

        let (result, _) = run(&config, server.clone());
        assert!(matches!(result, Err(Error::Authentication(_))));

        let allowed = config.allow_cleartext_password(true);
        server.extend(frame(4, OK));
        let (result, packets) = run(&allowed, server);
        assert!(result.is_ok());
        assert_eq!(packets[1], b"pw\0");
    }

    #[test]
    fn test_unknown_plugin_without_handler() {
        let config = MySqlConfig::new().user("u");
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"auth_gssapi_client\0");
        let mut server = frame(0, &greeting("mysql_native_password", caps()));
        server.extend(frame(2, &switch));

        let (result, _) = run(&config, server);
        let err = result.unwrap_err();
        assert_eq!(err.code(), Some(CR_AUTH_PLUGIN_CANNOT_LOAD));
    }

    #[test]
    fn test_registered_handler_answers_switch() {
        #[derive(Debug)]
        struct Token;
        impl AuthPluginHandler for Token {
            fn authenticate(&self, _challenge: &[u8]) -> Result<Option<Vec<u8>>> {
                Ok(Some(b"token".to_vec()))
            }
        }

        let config = MySqlConfig::new()
            .user("u")
            .auth_plugin("auth_token", Arc::new(Token));
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"auth_token\0challenge");
        let mut server = frame(0, &greeting("mysql_native_password", caps()));
        server.extend(frame(2, &switch));
        server.extend(frame(4, OK));

        let (result, packets) = run(&config, server);
        assert_eq!(result.unwrap().auth_plugin, "auth_token");
        assert_eq!(packets[1], b"token");
    }

    #[test]
    fn test_dialog_prompts() {
        #[derive(Debug)]
        struct Otp;
        impl AuthPluginHandler for Otp {
            fn prompt(&self, echo: bool, prompt: &[u8]) -> Result<Option<Vec<u8>>> {
                assert!(echo);
                assert_eq!(prompt, b"OTP: ");
                Ok(Some(b"123456".to_vec()))
            }
        }

        let config = MySqlConfig::new()
            .user("u")
            .password("pw")
            .auth_plugin("dialog", Arc::new(Otp));
        let mut switch = vec![0xFE];
        switch.extend_from_slice(b"dialog\0");
        switch.push(0x04);
        switch.extend_from_slice(b"Password: ");

        let mut second = vec![0x03];
        second.extend_from_slice(b"OTP: ");

        let mut server = frame(0, &greeting("mysql_native_password", caps()));
        server.extend(frame(2, &switch));
        server.extend(frame(4, &second));
        server.extend(frame(6, OK));

        let (result, packets) = run(&config, server);
        assert_eq!(result.unwrap().auth_plugin, "dialog");
        assert_eq!(packets[1], b"pw\0");
        assert_eq!(packets[2], b"123456\0");
    }

    #[test]
    fn test_connect_attributes_include_program_name() {
        let config = MySqlConfig::new().program_name("billing").attribute("team", "ops");
        let attrs = connect_attributes(&config);
        let keys: Vec<_> = attrs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["_client_name", "_client_version", "_pid", "program_name", "team"]
        );
    }
}
