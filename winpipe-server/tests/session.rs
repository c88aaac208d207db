//! Integration tests: a real server on localhost driven by a minimal client.

use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use winpipe_core::capture::CaptureSource;
use winpipe_core::{
    AckPacket, Capabilities, ClientWindows, Connection, ConnectionInfo, Packet, SyntheticSource,
    PROTOCOL_VERSION,
};
use winpipe_server::config::ServerConfig;
use winpipe_server::service::WinpipeServer;

// ── Helpers ──────────────────────────────────────────────────────

type ServerTask = JoinHandle<Result<(), Box<dyn std::error::Error + Send + Sync>>>;

fn config(encoding: &str, windows: u32, max_frames: u64) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.capture.windows = windows;
    config.capture.width = 32;
    config.capture.height = 24;
    config.capture.fps = 100;
    config.capture.max_frames = max_frames;
    config.encoding.encoding = encoding.into();
    config.flow.adaptive = false;
    config
}

async fn start(config: ServerConfig) -> (ConnectionInfo, CancellationToken, ServerTask) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = WinpipeServer::new(config);
    let stop = server.shutdown_handle();
    let task = tokio::spawn(async move { server.serve(listener).await });
    (ConnectionInfo::new(addr.ip().to_string(), addr.port()), stop, task)
}

fn hello(encodings: &[&str]) -> Packet {
    Packet::Hello(Capabilities {
        version: PROTOCOL_VERSION.to_owned(),
        encodings: encodings.iter().map(|s| s.to_string()).collect(),
        rgb_formats: vec!["BGRX".into()],
        zlib: 0,
        max_packet_size: 1 << 20,
    })
}

async fn connect(info: &ConnectionInfo, encodings: &[&str]) -> Connection {
    let mut conn = Connection::connect(info).await.unwrap();
    let Some(Packet::Hello(server)) = conn.recv().await else {
        panic!("server did not open with hello");
    };
    assert_eq!(server.version, PROTOCOL_VERSION);
    assert!(server.encodings.iter().any(|e| e == "png"));
    conn.send(hello(encodings)).await.unwrap();
    conn
}

/// What the client saw until the server said goodbye.
struct Transcript {
    windows: ClientWindows,
    lost: Vec<u32>,
    acks: u64,
    reason: String,
}

async fn follow(mut conn: Connection, mut windows: ClientWindows) -> Transcript {
    let mut lost = Vec::new();
    let mut acks = 0;
    loop {
        let packet = tokio::time::timeout(Duration::from_secs(10), conn.recv())
            .await
            .expect("server went quiet")
            .expect("connection closed without disconnect");
        match packet {
            Packet::NewWindow(window) => windows.open(&window),
            Packet::WindowResized { wid, width, height } => {
                windows.resize(wid, width, height).unwrap()
            }
            Packet::Draw(draw) => {
                for ack in windows.draw(draw) {
                    assert!(!ack.failed(), "{:?}", ack.message);
                    acks += 1;
                    conn.send(Packet::DamageSequence(ack)).await.unwrap();
                }
            }
            Packet::LostWindow { wid } => lost.push(wid),
            Packet::Disconnect { reason } => {
                return Transcript {
                    windows,
                    lost,
                    acks,
                    reason,
                };
            }
            Packet::Hello(_) => panic!("second hello"),
            Packet::DamageSequence(_) => panic!("server sent an ack"),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_streams_every_window_until_it_ends() {
    let (info, stop, server) = start(config("png", 2, 3)).await;
    let conn = connect(&info, &["yuvz", "png"]).await;

    // Acks for windows the server never opened are ignored.
    conn.send(Packet::DamageSequence(AckPacket {
        sequence: 0,
        wid: 99,
        width: 1,
        height: 1,
        decode_time: 0,
        message: None,
    }))
    .await
    .unwrap();

    let transcript = follow(conn, ClientWindows::new()).await;
    assert_eq!(transcript.reason, "all windows closed");
    let mut lost = transcript.lost.clone();
    lost.sort_unstable();
    assert_eq!(lost, vec![1, 2]);
    assert!(transcript.acks >= 6);

    let mut expected = SyntheticSource::new(32, 24).unwrap();
    for _ in 0..3 {
        expected.refresh().unwrap();
    }
    let expected = expected.grab_full().unwrap().tight_bytes();
    assert_eq!(transcript.windows.len(), 2);
    for window in transcript.windows.iter() {
        assert_eq!(window.surface().pixels(), expected, "window {}", window.wid());
    }

    stop.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_configured_encoding_yields_to_client_list() {
    let (info, stop, server) = start(config("yuvz", 1, 2)).await;
    let conn = connect(&info, &["rgb32"]).await;
    let transcript = follow(conn, ClientWindows::new()).await;

    assert_eq!(transcript.lost, vec![1]);
    let window = transcript.windows.get(1).unwrap();
    assert_eq!(window.surface().size(), (32, 24));
    assert!(window.surface().paints() >= 2);

    stop.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_no_common_encoding_disconnects() {
    let (info, stop, server) = start(config("png", 1, 0)).await;
    let conn = connect(&info, &["h264", "vp8"]).await;
    let transcript = follow(conn, ClientWindows::new()).await;
    assert_eq!(transcript.reason, "no common encoding");
    assert!(transcript.windows.is_empty());

    stop.cancel();
    server.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_says_goodbye() {
    let (info, stop, server) = start(config("png", 1, 0)).await;
    let mut conn = connect(&info, &["png"]).await;
    let Some(Packet::NewWindow(window)) = conn.recv().await else {
        panic!("expected new-window");
    };
    assert_eq!((window.width, window.height), (32, 24));
    let mut windows = ClientWindows::new();
    windows.open(&window);

    stop.cancel();
    let transcript = follow(conn, windows).await;
    assert_eq!(transcript.reason, "server shutdown");
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
