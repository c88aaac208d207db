//! Server service core logic.
//!
//! Accepts clients on a TCP listener. Each client gets its own session:
//! a `hello` exchange picks the encoding, then every configured window
//! is announced with `new-window` and streamed by its own pipeline worker.
//! Acks coming back are routed to the worker owning the window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use winpipe_core::capture::open_source;
use winpipe_core::codec::Encoding;
use winpipe_core::wire::{Options, Value};
use winpipe_core::{
    AckPacket, Capabilities, Connection, ConnectionSender, NewWindowPacket, Packet, PacketCodec,
    PipelineError, PixelFormat, StreamConfig, WindowHandle, WindowId, WindowSource, WindowStats,
    PROTOCOL_VERSION,
};

use crate::config::ServerConfig;

/// How long a client has to send its `hello`.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// How often finished window workers are reaped.
const REAP_INTERVAL: Duration = Duration::from_millis(100);

type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ── WinpipeServer ────────────────────────────────────────────────

/// The top-level server service.
pub struct WinpipeServer {
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
}

impl WinpipeServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown: CancellationToken::new(),
        }
    }

    /// A token that stops the service, and every session, when cancelled.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Bind the configured address and serve until stopped.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        self.serve(listener).await
    }

    /// Serve clients from an already bound listener until stopped.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        info!("winpipe server listening on {}", listener.local_addr()?);
        let mut sessions = tokio::task::JoinSet::new();

        loop {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = self.shutdown.cancelled() => break,
            };
            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            info!("client connected from {peer}");

            let config = Arc::clone(&self.config);
            let cancel = self.shutdown.child_token();
            sessions.spawn(async move {
                if let Err(e) = Session::start(stream, config, cancel).await {
                    warn!("session with {peer} failed: {e}");
                }
                info!("session with {peer} ended");
            });

            // Reap sessions that already ended.
            while sessions.try_join_next().is_some() {}
        }

        while sessions.join_next().await.is_some() {}
        info!("winpipe server stopped");
        Ok(())
    }
}

// ── Negotiation ──────────────────────────────────────────────────

/// Capabilities the server announces.
pub fn server_capabilities(config: &ServerConfig) -> Capabilities {
    Capabilities {
        version: PROTOCOL_VERSION.to_owned(),
        encodings: Encoding::builtin()
            .into_iter()
            .map(|e| e.name().to_owned())
            .collect(),
        rgb_formats: Vec::new(),
        zlib: config.encoding.zlib.min(9),
        max_packet_size: config.network.max_packet_size as u32,
    }
}

/// Fit the configured stream settings to what the client can decode.
///
/// The configured encoding is kept when the client lists it; otherwise
/// the first listed encoding the server can produce is used. Returns
/// `None` when there is no encoding in common.
pub fn negotiate(config: &ServerConfig, client: &Capabilities) -> Option<StreamConfig> {
    let mut stream = config.to_stream_config();
    let offered: Vec<Encoding> = client
        .encodings
        .iter()
        .filter_map(|name| Encoding::parse(name).ok())
        .filter(|e| e.has_builtin_codec())
        .collect();
    if !offered.contains(&stream.encoding) {
        stream.encoding = *offered.first()?;
    }
    stream.settings.rgb_formats = client
        .rgb_formats
        .iter()
        .filter_map(|name| PixelFormat::from_name(name))
        .filter(|f| !f.is_planar())
        .collect();
    if client.zlib > 0 {
        stream.settings.zlib = client.zlib;
    }
    Some(stream)
}

// ── Session ──────────────────────────────────────────────────────

/// One connected client and the window workers streaming to it.
struct Session {
    tx: ConnectionSender,
    rx: mpsc::Receiver<Packet>,
    windows: HashMap<WindowId, WindowHandle>,
    cancel: CancellationToken,
}

impl Session {
    async fn start(
        stream: TcpStream,
        config: Arc<ServerConfig>,
        cancel: CancellationToken,
    ) -> Result<(), BoxError> {
        let codec = PacketCodec::new().with_max_packet_size(config.network.max_packet_size);
        let (tx, rx) = Connection::with_codec(stream, codec).split();
        let mut session = Self {
            tx,
            rx,
            windows: HashMap::new(),
            cancel,
        };

        session.tx.send(Packet::Hello(server_capabilities(&config))).await?;
        let Some(client) = session.wait_for_hello().await? else {
            return Ok(());
        };
        info!(
            version = %client.version,
            encodings = ?client.encodings,
            "client hello"
        );

        let Some(stream_config) = negotiate(&config, &client) else {
            warn!(encodings = ?client.encodings, "no encoding in common");
            session.disconnect("no common encoding").await;
            return Ok(());
        };
        info!(encoding = %stream_config.encoding, "encoding negotiated");

        let result = match session.open_windows(&config, &stream_config).await {
            Ok(()) => session.serve().await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    async fn wait_for_hello(&mut self) -> Result<Option<Capabilities>, BoxError> {
        let packet = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(None),
            received = time::timeout(HELLO_TIMEOUT, self.rx.recv()) => received,
        };
        match packet {
            Ok(Some(Packet::Hello(caps))) => Ok(Some(caps)),
            Ok(Some(Packet::Disconnect { reason })) => {
                info!(%reason, "client left before hello");
                Ok(None)
            }
            Ok(Some(other)) => {
                self.disconnect("expected hello").await;
                Err(format!("expected hello, got {}", other.packet_type()).into())
            }
            Ok(None) => Ok(None),
            Err(_) => {
                self.disconnect("hello timeout").await;
                Err("client sent no hello".into())
            }
        }
    }

    async fn open_windows(
        &mut self,
        config: &ServerConfig,
        stream_config: &StreamConfig,
    ) -> Result<(), BoxError> {
        for (index, spec) in config.source_specs().iter().enumerate() {
            let source = match open_source(spec) {
                Ok(source) => source,
                Err(e) => {
                    error!(?spec, error = %e, "cannot open capture source");
                    continue;
                }
            };
            let wid = index as WindowId + 1;
            let worker = WindowSource::new(wid, source, stream_config.clone(), self.tx.clone());
            let (width, height) = worker.size();
            self.tx
                .send(Packet::NewWindow(NewWindowPacket {
                    wid,
                    x: 40 * index as i32,
                    y: 40 * index as i32,
                    width,
                    height,
                    metadata: window_metadata(wid),
                    client_properties: None,
                    override_redirect: false,
                }))
                .await?;
            self.windows.insert(wid, worker.spawn());
        }
        if self.windows.is_empty() {
            self.disconnect("no windows").await;
            return Err("no capture source could be opened".into());
        }
        Ok(())
    }

    async fn serve(&mut self) -> Result<(), BoxError> {
        let mut reaper = time::interval(REAP_INTERVAL);
        reaper.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.disconnect("server shutdown").await;
                    return Ok(());
                }
                packet = self.rx.recv() => match packet {
                    Some(Packet::DamageSequence(ack)) => self.route_ack(ack).await,
                    Some(Packet::Disconnect { reason }) => {
                        info!(%reason, "client disconnected");
                        return Ok(());
                    }
                    Some(Packet::Hello(_)) => warn!("repeated hello ignored"),
                    Some(other) => warn!(packet = other.packet_type(), "unexpected packet from client"),
                    None => {
                        info!("connection closed");
                        return Ok(());
                    }
                },
                _ = reaper.tick() => {
                    self.reap().await?;
                    if self.windows.is_empty() {
                        self.disconnect("all windows closed").await;
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn route_ack(&mut self, ack: AckPacket) {
        let Some(window) = self.windows.get(&ack.wid) else {
            debug!(wid = ack.wid, sequence = ack.sequence, "ack for unknown window dropped");
            return;
        };
        if window.deliver(ack).await.is_err() {
            debug!(wid = window.wid(), "ack for finished window dropped");
        }
    }

    /// Collect workers that ended by themselves and tell the client.
    async fn reap(&mut self) -> Result<(), BoxError> {
        let finished: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(wid, _)| *wid)
            .collect();
        for wid in finished {
            let Some(handle) = self.windows.remove(&wid) else {
                continue;
            };
            log_outcome(wid, handle.join().await);
            self.tx.send(Packet::LostWindow { wid }).await?;
        }
        Ok(())
    }

    /// Stop every worker. Late acks for these windows are then dropped.
    async fn close(&mut self) {
        for (wid, handle) in self.windows.drain() {
            log_outcome(wid, handle.destroy().await);
        }
    }

    async fn disconnect(&self, reason: &str) {
        let _ = self
            .tx
            .send(Packet::Disconnect {
                reason: reason.to_owned(),
            })
            .await;
    }
}

fn window_metadata(wid: WindowId) -> Options {
    let mut metadata = Options::new();
    metadata.insert("title".into(), Value::from(format!("winpipe window {wid}")));
    metadata
}

fn log_outcome(wid: WindowId, outcome: Result<WindowStats, PipelineError>) {
    match outcome {
        Ok(stats) => info!(
            wid,
            frames = stats.frames,
            draws = stats.draws,
            bytes = stats.bytes,
            dropped = stats.dropped,
            failed_acks = stats.failed_acks,
            "window closed"
        ),
        Err(e) => warn!(wid, error = %e, "window stream failed"),
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client(encodings: &[&str]) -> Capabilities {
        Capabilities {
            version: PROTOCOL_VERSION.to_owned(),
            encodings: encodings.iter().map(|s| s.to_string()).collect(),
            rgb_formats: vec!["RGBX".into(), "YUV420P".into(), "bogus".into()],
            zlib: 0,
            max_packet_size: 0,
        }
    }

    #[test]
    fn service_creates_with_defaults() {
        let svc = WinpipeServer::new(ServerConfig::default());
        assert!(!svc.is_stopped());
        svc.stop();
        assert!(svc.is_stopped());
        assert!(svc.shutdown_handle().is_cancelled());
    }

    #[test]
    fn negotiation_keeps_configured_encoding() {
        let config = ServerConfig::default();
        let stream = negotiate(&config, &client(&["png", "yuvz"])).unwrap();
        assert_eq!(stream.encoding, Encoding::Yuvz);
        assert_eq!(stream.settings.rgb_formats, vec![PixelFormat::Rgbx]);
    }

    #[test]
    fn negotiation_falls_back_to_client_order() {
        let config = ServerConfig::default();
        let stream = negotiate(&config, &client(&["h264", "vpx", "rgb24", "png"])).unwrap();
        assert_eq!(stream.encoding, Encoding::Rgb24);
    }

    #[test]
    fn negotiation_fails_without_common_encoding() {
        let config = ServerConfig::default();
        assert!(negotiate(&config, &client(&["h264", "vp8", "webp"])).is_none());
        assert!(negotiate(&config, &client(&[])).is_none());
    }

    #[test]
    fn client_zlib_request_wins() {
        let config = ServerConfig::default();
        let mut caps = client(&["rgb32"]);
        caps.zlib = 3;
        assert_eq!(negotiate(&config, &caps).unwrap().settings.zlib, 3);
    }

    #[test]
    fn capabilities_list_builtin_encodings() {
        let caps = server_capabilities(&ServerConfig::default());
        assert!(caps.encodings.iter().any(|e| e == "yuvz"));
        assert!(!caps.encodings.iter().any(|e| e == "h264"));
        assert_eq!(caps.version, PROTOCOL_VERSION);
    }
}
