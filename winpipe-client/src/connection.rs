//! Connection to the server and the `hello` exchange.

use tokio::time;
use tracing::info;

use winpipe_core::{Capabilities, Connection, Packet, PacketCodec};

use crate::config::ClientConfig;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A connected server whose `hello` has been received.
pub struct ServerConnection {
    conn: Connection,
    server: Capabilities,
}

impl ServerConnection {
    /// Connect to the configured server and exchange capabilities.
    ///
    /// Both the TCP connect and the wait for the server's `hello` are
    /// bounded by `network.timeout_ms`.
    pub async fn connect(config: &ClientConfig) -> Result<Self, BoxError> {
        let info = config.server_info()?;
        let timeout = config.timeout();

        info!("connecting to server at {info}");
        let codec = PacketCodec::new().with_max_packet_size(config.network.max_packet_size);
        let conn = time::timeout(timeout, Connection::connect_with(&info, codec)).await??;
        Self::handshake(conn, config).await
    }

    /// Exchange `hello` packets on an already open connection.
    pub async fn handshake(mut conn: Connection, config: &ClientConfig) -> Result<Self, BoxError> {
        let caps = config.to_capabilities();
        if caps.encodings.is_empty() {
            return Err("no decodable encoding configured".into());
        }
        conn.send(Packet::Hello(caps)).await?;

        let server = match time::timeout(config.timeout(), conn.recv()).await {
            Ok(Some(Packet::Hello(server))) => server,
            Ok(Some(Packet::Disconnect { reason })) => {
                return Err(format!("server refused: {reason}").into());
            }
            Ok(Some(other)) => {
                return Err(format!("expected hello, got {}", other.packet_type()).into());
            }
            Ok(None) => return Err("server closed the connection".into()),
            Err(_) => return Err("server sent no hello".into()),
        };
        info!(
            version = %server.version,
            encodings = ?server.encodings,
            "server hello"
        );
        Ok(Self { conn, server })
    }

    /// What the server announced.
    pub fn server(&self) -> &Capabilities {
        &self.server
    }

    pub fn into_inner(self) -> Connection {
        self.conn
    }
}
