//! The client's packet loop.
//!
//! Windows are opened, resized and closed as the server announces them.
//! Every `draw` goes through the window's resequencer and decoders, and
//! each painted draw is acknowledged with a `damage-sequence` packet.

use std::future::Future;
use std::path::PathBuf;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use winpipe_core::{ClientWindows, ConnectionSender, Packet, WindowId};

use crate::connection::{BoxError, ServerConnection};
use crate::display::Display;

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server sent `disconnect`.
    Disconnected(String),
    /// The connection closed without a `disconnect`.
    ConnectionClosed,
    /// The local shutdown signal fired.
    Shutdown,
}

/// Counters for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub windows: u64,
    pub draws: u64,
    pub failed_draws: u64,
    /// PNG files written for closed windows.
    pub dumps: Vec<PathBuf>,
}

pub struct ClientSession {
    tx: ConnectionSender,
    rx: mpsc::Receiver<Packet>,
    windows: ClientWindows,
    display: Display,
    summary: SessionSummary,
}

impl ClientSession {
    pub fn new(server: ServerConnection, display: Display) -> Self {
        let (tx, rx) = server.into_inner().split();
        Self {
            tx,
            rx,
            windows: ClientWindows::new(),
            display,
            summary: SessionSummary::default(),
        }
    }

    /// Process packets until the server leaves or `shutdown` completes.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(SessionEnd, SessionSummary), BoxError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let end = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    let _ = self
                        .tx
                        .send(Packet::Disconnect { reason: "client exit".into() })
                        .await;
                    break SessionEnd::Shutdown;
                }
                packet = self.rx.recv() => match packet {
                    Some(Packet::Disconnect { reason }) => {
                        info!(%reason, "server disconnected");
                        break SessionEnd::Disconnected(reason);
                    }
                    Some(packet) => self.handle(packet).await?,
                    None => {
                        info!("connection closed");
                        break SessionEnd::ConnectionClosed;
                    }
                },
            }
        };

        let remaining: Vec<_> = self.windows.iter().map(|w| w.wid()).collect();
        for wid in remaining {
            self.retire(wid);
        }
        info!(
            windows = self.summary.windows,
            draws = self.summary.draws,
            failed = self.summary.failed_draws,
            "session ended"
        );
        Ok((end, self.summary))
    }

    async fn handle(&mut self, packet: Packet) -> Result<(), BoxError> {
        match packet {
            Packet::NewWindow(window) => {
                self.summary.windows += 1;
                self.windows.open(&window);
            }
            Packet::WindowResized { wid, width, height } => {
                if let Err(e) = self.windows.resize(wid, width, height) {
                    warn!(wid, width, height, error = %e, "resize failed");
                }
            }
            Packet::Draw(draw) => {
                let wid = draw.wid;
                let acks = self.windows.draw(draw);
                if acks.is_empty() {
                    return Ok(());
                }
                for ack in acks {
                    self.summary.draws += 1;
                    if ack.failed() {
                        self.summary.failed_draws += 1;
                    }
                    self.tx.send(Packet::DamageSequence(ack)).await?;
                }
                if let Some(window) = self.windows.get(wid) {
                    self.display.present(window);
                }
            }
            Packet::LostWindow { wid } => self.retire(wid),
            Packet::Hello(_) => warn!("repeated hello ignored"),
            other => debug!(packet = other.packet_type(), "unexpected packet from server"),
        }
        Ok(())
    }

    fn retire(&mut self, wid: WindowId) {
        let Some(window) = self.windows.close(wid) else {
            debug!(wid, "lost-window for unknown window");
            return;
        };
        if let Some(path) = self.display.retire(&window) {
            self.summary.dumps.push(path);
        }
    }
}
