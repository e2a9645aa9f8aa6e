//! Connection state machine and request operations.
//!
//! A [`Connection`] owns the TCP socket, the session state, the
//! negotiated packet size and capabilities, the server environment, and
//! the prepared-statement registry. All operations take the connection
//! by exclusive borrow; a connection is a single-session value and is
//! not meant to be shared across tasks.

use bytes::{Bytes, BytesMut};
use std::time::Duration;
use tokio::net::TcpSocket;
use tokio::time::timeout;

use tds5_protocol::login::LoginRequest;
use tds5_protocol::packet::PacketType;
use tds5_protocol::token::{
    Capability, Dynamic, DynamicFlags, DynamicOp, EnvChange, LoginStatus, ParamsFormat, TdsVersion,
    Token, TokenParser, encode_dynamic, encode_language, encode_logout, encode_params,
};
use tds5_protocol::value::Value;

use crate::config::{Config, TimeoutConfig};
use crate::env::{EnvKey, Environment};
use crate::error::{Error, Result};
use crate::reply::{Disposition, QueryResult, handle_done};
use crate::state::SessionState;
use crate::statements::StatementRegistry;
use crate::transport::Transport;

/// Server identity reported in the login acknowledgement.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Server program name.
    pub name: String,
    /// Server program version bytes.
    pub version: [u8; 4],
}

/// Capability bitmasks exchanged at login.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// The request mask this client sent.
    pub requested: Bytes,
    /// The response mask the server returned.
    pub responded: Bytes,
}

/// A decoded reply: the results plus the side tokens the request layer
/// needs (prepare acknowledgement and parameter format).
#[derive(Debug, Default)]
struct Reply {
    results: Vec<QueryResult>,
    dynamic_ack: Option<Dynamic>,
    params_format: Option<ParamsFormat>,
}

/// An async TDS 5.0 connection.
pub struct Connection {
    transport: Option<Transport<tokio::net::TcpStream>>,
    state: SessionState,
    packet_size: u32,
    tds_version: Option<TdsVersion>,
    server: Option<ServerIdentity>,
    capabilities: Capabilities,
    env: Environment,
    statements: StatementRegistry,
    timeouts: TimeoutConfig,
}

impl Connection {
    /// Connect and log in to a server.
    ///
    /// On success the session is in the `Connected` state and, when the
    /// configuration names a database, a `use <database>` has been
    /// issued.
    pub async fn connect(config: Config) -> Result<Self> {
        let mut conn = Self::from_config(&config);
        match conn.open_session().await {
            Ok(()) => Ok(conn),
            Err(err) => {
                conn.force_close();
                Err(err)
            }
        }
    }

    fn from_config(config: &Config) -> Self {
        Self {
            transport: None,
            state: SessionState::Disconnected,
            packet_size: config.packet_size,
            tds_version: None,
            server: None,
            capabilities: Capabilities::default(),
            env: Environment::from_config(config),
            statements: StatementRegistry::new(),
            timeouts: config.timeouts.clone(),
        }
    }

    /// Gracefully close the session: send a logout token, drain the
    /// reply under the default command timeout, and close the socket.
    ///
    /// Always returns the session environment so the caller can
    /// reconnect with the same parameters.
    pub async fn disconnect(self) -> Environment {
        let command_timeout = self.timeouts.command_timeout;
        self.disconnect_with_timeout(command_timeout).await
    }

    /// [`disconnect`](Self::disconnect) with an explicit drain timeout.
    /// A zero timeout skips the logout exchange and just closes.
    pub async fn disconnect_with_timeout(mut self, drain_timeout: Duration) -> Environment {
        if self.state.is_connected() && !drain_timeout.is_zero() {
            if let Some(transport) = self.transport.as_mut() {
                let mut body = BytesMut::new();
                encode_logout(&mut body);
                let sent = transport
                    .send_message(PacketType::Query, body.freeze(), self.packet_size as usize)
                    .await;
                match sent {
                    Ok(()) => {
                        if let Err(err) = transport.read_message(drain_timeout).await {
                            tracing::debug!(error = %err, "logout drain failed");
                        }
                    }
                    Err(err) => tracing::debug!(error = %err, "logout send failed"),
                }
            }
        }
        self.force_close();
        tracing::info!("disconnected");
        self.env
    }

    /// Close and re-establish the session using the saved environment.
    ///
    /// Prepared statements do not survive; the registry is cleared.
    pub async fn reconnect(&mut self) -> Result<()> {
        tracing::info!("reconnecting");
        self.force_close();
        self.statements.clear();
        self.open_session().await
    }

    /// Run a SQL text and decode the reply into results.
    ///
    /// On a disconnected session this performs one reconnect first.
    pub async fn sql_query(&mut self, sql: &str) -> Result<Vec<QueryResult>> {
        let command_timeout = self.timeouts.command_timeout;
        self.sql_query_with_timeout(sql, command_timeout).await
    }

    /// [`sql_query`](Self::sql_query) with an explicit per-receive
    /// timeout.
    pub async fn sql_query_with_timeout(
        &mut self,
        sql: &str,
        per_read_timeout: Duration,
    ) -> Result<Vec<QueryResult>> {
        self.ensure_connected().await?;
        self.run_language_query(sql, per_read_timeout).await
    }

    /// Prepare a statement under the given identifier.
    ///
    /// The statement is installed server-side as a procedure; the
    /// parameter format the server returns is registered for later
    /// executes.
    pub async fn prepare(&mut self, stmt_id: &str, sql: &str) -> Result<()> {
        let command_timeout = self.timeouts.command_timeout;
        self.prepare_with_timeout(stmt_id, sql, command_timeout)
            .await
    }

    /// [`prepare`](Self::prepare) with an explicit per-receive timeout.
    pub async fn prepare_with_timeout(
        &mut self,
        stmt_id: &str,
        sql: &str,
        per_read_timeout: Duration,
    ) -> Result<()> {
        self.ensure_connected().await?;

        let mut body = BytesMut::new();
        encode_dynamic(
            &mut body,
            DynamicOp::Prepare,
            DynamicFlags::empty(),
            stmt_id,
            &format!("create proc {stmt_id} as {sql}"),
        );
        let reply = self
            .request(PacketType::Query, body.freeze(), per_read_timeout)
            .await?;

        let ack = reply.dynamic_ack.ok_or_else(|| {
            Error::Protocol("prepare reply carried no dynamic acknowledgement".to_string())
        })?;
        let format = reply.params_format.unwrap_or_default();
        self.statements.insert(ack.id, format);
        Ok(())
    }

    /// Execute a prepared statement.
    ///
    /// With arguments, the parameter format registered at prepare time
    /// is replayed ahead of the values so the server can decode them.
    /// Without arguments the registry is not consulted.
    pub async fn execute(&mut self, stmt_id: &str, args: &[Value]) -> Result<Vec<QueryResult>> {
        let command_timeout = self.timeouts.command_timeout;
        self.execute_with_timeout(stmt_id, args, command_timeout)
            .await
    }

    /// [`execute`](Self::execute) with an explicit per-receive timeout.
    pub async fn execute_with_timeout(
        &mut self,
        stmt_id: &str,
        args: &[Value],
        per_read_timeout: Duration,
    ) -> Result<Vec<QueryResult>> {
        self.ensure_connected().await?;

        let mut body = BytesMut::new();
        if args.is_empty() {
            encode_dynamic(
                &mut body,
                DynamicOp::Execute,
                DynamicFlags::empty(),
                stmt_id,
                "",
            );
        } else {
            let format = self
                .statements
                .get(stmt_id)
                .ok_or_else(|| Error::StatementNotPrepared(stmt_id.to_string()))?;
            encode_dynamic(
                &mut body,
                DynamicOp::Execute,
                DynamicFlags::HAS_ARGS,
                stmt_id,
                "",
            );
            format.encode_raw(&mut body);
            encode_params(&mut body, format, args)?;
        }

        let reply = self
            .request(PacketType::Query, body.freeze(), per_read_timeout)
            .await?;
        Ok(reply.results)
    }

    /// Current session state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Currently negotiated packet size.
    #[must_use]
    pub fn packet_size(&self) -> u32 {
        self.packet_size
    }

    /// TDS version selected by the server, once logged in.
    #[must_use]
    pub fn tds_version(&self) -> Option<TdsVersion> {
        self.tds_version
    }

    /// Server identity, once logged in.
    #[must_use]
    pub fn server(&self) -> Option<&ServerIdentity> {
        self.server.as_ref()
    }

    /// Capability masks exchanged at login.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// The session environment.
    #[must_use]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Check whether a statement identifier is registered.
    #[must_use]
    pub fn is_prepared(&self, stmt_id: &str) -> bool {
        self.statements.contains(stmt_id)
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        if !self.state.is_connected() {
            self.reconnect().await?;
        }
        Ok(())
    }

    async fn open_session(&mut self) -> Result<()> {
        let host = self
            .env
            .get(EnvKey::Host)
            .ok_or_else(|| Error::Config("host missing from environment".to_string()))?
            .to_string();
        let port: u16 = self
            .env
            .get(EnvKey::Port)
            .ok_or_else(|| Error::Config("port missing from environment".to_string()))?
            .parse()
            .map_err(|_| Error::Config("invalid port in environment".to_string()))?;

        tracing::info!(host = %host, port, "connecting");

        let addr = tokio::net::lookup_host((host.as_str(), port))
            .await?
            .next()
            .ok_or_else(|| Error::Connection(format!("no address found for {host}")))?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        // Size the OS receive buffer from the current packet size; a
        // later packet-size envchange takes effect here on reconnect.
        socket.set_recv_buffer_size(self.packet_size.saturating_mul(4))?;

        let stream = timeout(self.timeouts.connect_timeout, socket.connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout)?
            .map_err(Error::from)?;
        stream.set_nodelay(true)?;
        self.transport = Some(Transport::new(stream));

        let mut body = BytesMut::new();
        self.login_request().encode(&mut body);
        self.capabilities = Capabilities {
            requested: Capability::request_default().request,
            responded: Bytes::new(),
        };

        let connect_timeout = self.timeouts.connect_timeout;
        self.request(PacketType::Login, body.freeze(), connect_timeout)
            .await?;

        match self.state {
            SessionState::Connected => {}
            SessionState::AuthNegotiate => {
                self.force_close();
                return Err(Error::AuthNegotiate);
            }
            SessionState::Disconnected => {
                self.force_close();
                return Err(Error::Connection("login rejected".to_string()));
            }
        }

        tracing::info!(
            server = self.server.as_ref().map(|s| s.name.as_str()),
            tds_version = %self.tds_version.unwrap_or(TdsVersion::V5_0),
            packet_size = self.packet_size,
            "session established"
        );

        let database = self
            .env
            .get(EnvKey::Database)
            .filter(|db| !db.is_empty())
            .map(str::to_string);
        if let Some(database) = database {
            let command_timeout = self.timeouts.command_timeout;
            self.run_language_query(&format!("use {database}"), command_timeout)
                .await?;
        }

        Ok(())
    }

    fn login_request(&self) -> LoginRequest {
        let get = |key| self.env.get(key).unwrap_or_default().to_string();
        LoginRequest {
            hostname: std::env::var("HOSTNAME").unwrap_or_default(),
            username: get(EnvKey::User),
            password: get(EnvKey::Password),
            host_process: std::process::id().to_string(),
            app_name: get(EnvKey::AppName),
            server_name: get(EnvKey::Host),
            lib_name: get(EnvKey::LibName),
            language: get(EnvKey::Language),
            char_set: get(EnvKey::CharSet),
            packet_size: self.packet_size,
        }
    }

    async fn run_language_query(
        &mut self,
        sql: &str,
        per_read_timeout: Duration,
    ) -> Result<Vec<QueryResult>> {
        tracing::debug!(sql, "language query");
        let mut body = BytesMut::new();
        encode_language(&mut body, sql);
        let reply = self
            .request(PacketType::Query, body.freeze(), per_read_timeout)
            .await?;
        Ok(reply.results)
    }

    /// One send-then-receive cycle: fragment and write the request,
    /// reassemble the reply, and run it through the token consumer.
    ///
    /// Transport failures force-close the connection; the caller's next
    /// operation will reconnect.
    async fn request(
        &mut self,
        packet_type: PacketType,
        body: Bytes,
        per_read_timeout: Duration,
    ) -> Result<Reply> {
        let packet_size = self.packet_size as usize;
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;

        if let Err(err) = transport.send_message(packet_type, body, packet_size).await {
            self.force_close();
            return Err(err);
        }
        let payload = match transport.read_message(per_read_timeout).await {
            Ok(payload) => payload,
            Err(err) => {
                self.force_close();
                return Err(err);
            }
        };

        self.apply_reply(payload)
    }

    /// The token-stream consumer: pull tokens from the payload, apply
    /// side-effect tokens to the connection, buffer data tokens, and
    /// let done tokens partition the buffer into results.
    fn apply_reply(&mut self, payload: Bytes) -> Result<Reply> {
        let mut parser = TokenParser::new(payload);
        let mut buffer: Vec<Token> = Vec::new();
        let mut reply = Reply::default();

        while let Some(token) = parser.next_token()? {
            match token {
                Token::LoginAck(ack) => {
                    self.state = match ack.status {
                        LoginStatus::Succeeded => SessionState::Connected,
                        LoginStatus::Negotiate => SessionState::AuthNegotiate,
                        LoginStatus::Failed => SessionState::Disconnected,
                    };
                    tracing::debug!(status = ?ack.status, server = %ack.server_name, "login acknowledgement");
                    self.tds_version = Some(ack.tds_version);
                    self.server = Some(ServerIdentity {
                        name: ack.server_name,
                        version: ack.server_version,
                    });
                }
                Token::Capability(capability) => {
                    if !capability.request.is_empty() {
                        self.capabilities.requested = capability.request;
                    }
                    if !capability.response.is_empty() {
                        self.capabilities.responded = capability.response;
                    }
                }
                Token::EnvChange(change) => self.apply_env_change(change)?,
                Token::Done(done) => {
                    match handle_done(&done, &mut buffer, &mut reply.results)? {
                        Disposition::KeepBuffering => {}
                        Disposition::Completed => buffer.clear(),
                    }
                }
                other => {
                    match &other {
                        Token::Dynamic(dynamic) if dynamic.op == DynamicOp::Ack => {
                            reply.dynamic_ack = Some(dynamic.clone());
                        }
                        Token::ParamsFormat(format) => {
                            reply.params_format = Some(format.clone());
                        }
                        _ => {}
                    }
                    buffer.push(other);
                }
            }
        }

        Ok(reply)
    }

    fn apply_env_change(&mut self, change: EnvChange) -> Result<()> {
        for update in change.changes {
            match EnvKey::from_change(update.kind) {
                Some(EnvKey::PacketSize) => {
                    let size: u32 = update.new_value.parse().map_err(|_| {
                        Error::Protocol(format!(
                            "unparseable packet size in envchange: {:?}",
                            update.new_value
                        ))
                    })?;
                    tracing::debug!(
                        old = %update.old_value,
                        new = size,
                        "server renegotiated packet size"
                    );
                    self.packet_size = size;
                    self.env.set(EnvKey::PacketSize, update.new_value);
                }
                Some(key) => {
                    tracing::debug!(key = %key, value = %update.new_value, "environment change");
                    self.env.set(key, update.new_value);
                }
                None => {
                    tracing::trace!(kind = ?update.kind, "ignoring environment change");
                }
            }
        }
        Ok(())
    }

    fn force_close(&mut self) {
        if self.transport.take().is_some() {
            tracing::debug!("closing connection");
        }
        self.state = SessionState::Disconnected;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("packet_size", &self.packet_size)
            .field("server", &self.server)
            .field("prepared_statements", &self.statements.len())
            .finish_non_exhaustive()
    }
}
