//! Scripted mock TDS 5.0 server.
//!
//! The server accepts connections sequentially. On each session it
//! answers the login message with a configurable login reply, then
//! answers each request message with the next scripted reply. When the
//! script runs dry it falls back to an empty completion so housekeeping
//! queries (like the post-login `use <database>`) succeed without
//! explicit scripting.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tds5_protocol::packet::{PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType};
use tds5_protocol::token::{DoneStatus, LoginStatus};

use crate::reply::ReplyBuilder;

/// Error type for mock server operations.
#[derive(Debug, Error)]
pub enum MockServerError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One scripted action taken in response to a request message.
#[derive(Debug, Clone)]
enum ScriptItem {
    /// Send a reply payload.
    Reply(Bytes),
    /// Close the connection without replying.
    DropConnection,
}

/// Builder for [`MockTdsServer`].
#[derive(Debug)]
pub struct MockTdsServerBuilder {
    packet_size: usize,
    login_reply: Option<Bytes>,
    script: VecDeque<ScriptItem>,
}

impl MockTdsServerBuilder {
    /// Set the packet size the server fragments replies into.
    #[must_use]
    pub fn packet_size(mut self, packet_size: usize) -> Self {
        self.packet_size = packet_size;
        self
    }

    /// Override the reply sent for login messages. The default is a
    /// successful login acknowledgement with a capability response.
    #[must_use]
    pub fn login_reply(mut self, reply: Bytes) -> Self {
        self.login_reply = Some(reply);
        self
    }

    /// Script the reply for the next request message.
    #[must_use]
    pub fn reply(mut self, reply: Bytes) -> Self {
        self.script.push_back(ScriptItem::Reply(reply));
        self
    }

    /// Script a dropped connection for the next request message.
    #[must_use]
    pub fn drop_connection(mut self) -> Self {
        self.script.push_back(ScriptItem::DropConnection);
        self
    }

    /// Bind a listener and start serving sessions.
    pub async fn start(self) -> Result<MockTdsServer, MockServerError> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let login_reply = self.login_reply.unwrap_or_else(default_login_reply);
        let script = Arc::new(Mutex::new(self.script));
        let packet_size = self.packet_size;

        let handle = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        tracing::debug!(error = %err, "mock accept failed");
                        return;
                    }
                };
                tracing::debug!(%peer, "mock session started");
                if let Err(err) =
                    serve_session(stream, &login_reply, &script, packet_size).await
                {
                    tracing::debug!(error = %err, "mock session ended with error");
                }
            }
        });

        Ok(MockTdsServer {
            addr,
            handle,
        })
    }
}

/// A running mock server. Dropping it stops the accept loop.
#[derive(Debug)]
pub struct MockTdsServer {
    addr: SocketAddr,
    handle: tokio::task::JoinHandle<()>,
}

impl MockTdsServer {
    /// Start building a mock server.
    #[must_use]
    pub fn builder() -> MockTdsServerBuilder {
        MockTdsServerBuilder {
            packet_size: 512,
            login_reply: None,
            script: VecDeque::new(),
        }
    }

    /// The address the server is listening on.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Host string for client configuration.
    #[must_use]
    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Port for client configuration.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl Drop for MockTdsServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn default_login_reply() -> Bytes {
    ReplyBuilder::new()
        .login_ack(LoginStatus::Succeeded)
        .capability()
        .done(DoneStatus::empty(), 0)
        .build()
}

fn empty_completion() -> Bytes {
    ReplyBuilder::new().done(DoneStatus::COUNT, 0).build()
}

async fn serve_session(
    mut stream: TcpStream,
    login_reply: &Bytes,
    script: &Arc<Mutex<VecDeque<ScriptItem>>>,
    packet_size: usize,
) -> std::io::Result<()> {
    // Login handshake.
    let Some(_login) = read_message(&mut stream).await? else {
        return Ok(());
    };
    write_message(&mut stream, login_reply, packet_size).await?;

    // Request loop.
    loop {
        let Some(request) = read_message(&mut stream).await? else {
            return Ok(());
        };
        // A logout token gets an empty final reply before close.
        if request.first() == Some(&0x71) {
            write_message(&mut stream, &empty_completion(), packet_size).await?;
            return Ok(());
        }
        let item = script
            .lock()
            .expect("script lock poisoned")
            .pop_front()
            .unwrap_or_else(|| ScriptItem::Reply(empty_completion()));
        match item {
            ScriptItem::Reply(reply) => {
                write_message(&mut stream, &reply, packet_size).await?;
            }
            ScriptItem::DropConnection => {
                tracing::debug!("mock dropping connection per script");
                return Ok(());
            }
        }
    }
}

/// Read one logical message: packets up to and including the LAST flag.
/// Returns `None` on a cleanly closed connection.
async fn read_message(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let mut payload = Vec::new();
    loop {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        match stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err),
        }
        let length = u16::from_be_bytes([header[2], header[3]]) as usize;
        let mut body = vec![0u8; length.saturating_sub(PACKET_HEADER_SIZE)];
        stream.read_exact(&mut body).await?;
        payload.extend_from_slice(&body);
        if header[1] & PacketStatus::LAST.bits() != 0 {
            tracing::trace!(
                message_type = header[0],
                payload_len = payload.len(),
                "mock received message"
            );
            return Ok(Some(payload));
        }
    }
}

/// Write one payload as a run of response packets.
async fn write_message(
    stream: &mut TcpStream,
    payload: &Bytes,
    packet_size: usize,
) -> std::io::Result<()> {
    let max_payload = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);
    let mut chunks: Vec<&[u8]> = payload.chunks(max_payload).collect();
    if chunks.is_empty() {
        chunks.push(&[]);
    }
    let last = chunks.len() - 1;

    let mut out = BytesMut::new();
    for (index, chunk) in chunks.into_iter().enumerate() {
        let status = if index == last {
            PacketStatus::LAST
        } else {
            PacketStatus::NORMAL
        };
        let mut header = PacketHeader::new(
            PacketType::Response,
            status,
            (PACKET_HEADER_SIZE + chunk.len()) as u16,
        );
        header.packet_number = (index % 256) as u8;
        header.encode(&mut out);
        out.extend_from_slice(chunk);
    }
    stream.write_all(&out).await?;
    stream.flush().await
}
