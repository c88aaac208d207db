use std::fmt;
use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::wire::{Packet, PacketCodec};

/// Packets buffered in each direction.
const CHANNEL_CAPACITY: usize = 100;

/// Handle for queueing packets on a connection from other tasks.
pub type ConnectionSender = mpsc::Sender<Packet>;

/// A packet connection to one peer.
///
/// A writer task drains the outgoing channel into the socket and a reader
/// task forwards decoded packets. A protocol error ends the reader, which
/// closes the incoming channel; [`recv`](Self::recv) then returns `None`.
#[derive(Debug)]
pub struct Connection {
    tx: ConnectionSender,
    rx: mpsc::Receiver<Packet>,
    peer: Option<SocketAddr>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self::with_codec(stream, PacketCodec::new())
    }

    pub fn with_codec(stream: TcpStream, codec: PacketCodec) -> Self {
        let peer = stream.peer_addr().ok();
        disable_nagle(&stream);
        let (mut net_writer, mut net_reader) = Framed::new(stream, codec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::channel::<Packet>(CHANNEL_CAPACITY);

        // Network -> User
        let (network_tx, user_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(async move {
            while let Some(packet) = network_rx.recv().await {
                let kind = packet.packet_type();
                if let Err(e) = net_writer.send(packet).await {
                    warn!(?peer, packet = kind, error = %e, "network write failed");
                    break;
                }
            }
            let _ = net_writer.close().await;
            debug!(?peer, "writer finished");
        });

        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(packet) => {
                        if network_tx.send(packet).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(?peer, error = %e, "closing connection on protocol error");
                        break;
                    }
                }
            }
            debug!(?peer, "reader finished");
        });

        Self {
            tx: user_tx,
            rx: user_rx,
            peer,
        }
    }

    pub async fn connect(info: &ConnectionInfo) -> Result<Self, std::io::Error> {
        Self::connect_with(info, PacketCodec::new()).await
    }

    pub async fn connect_with(
        info: &ConnectionInfo,
        codec: PacketCodec,
    ) -> Result<Self, std::io::Error> {
        let stream = TcpStream::connect(info.to_string()).await?;
        Ok(Self::with_codec(stream, codec))
    }

    pub async fn send(&self, packet: Packet) -> Result<(), mpsc::error::SendError<Packet>> {
        self.tx.send(packet).await
    }

    pub async fn recv(&mut self) -> Option<Packet> {
        self.rx.recv().await
    }

    pub fn sender(&self) -> ConnectionSender {
        self.tx.clone()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Separate the halves so reading and writing can live in different tasks.
    pub fn split(self) -> (ConnectionSender, mpsc::Receiver<Packet>) {
        (self.tx, self.rx)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Turn off Nagle, logging instead of failing when the socket refuses.
fn disable_nagle(stream: &TcpStream) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!(error = %e, "could not set TCP_NODELAY");
    }
}
