//! Integration tests: the client against a real server and against
//! scripted servers built from core connections.

use std::path::PathBuf;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;

use winpipe_client::config::ClientConfig;
use winpipe_client::connection::ServerConnection;
use winpipe_client::display::Display;
use winpipe_client::session::{ClientSession, SessionEnd};
use winpipe_core::wire::{Options, Value};
use winpipe_core::{
    Capabilities, Connection, DrawPacket, NewWindowPacket, Packet, PROTOCOL_VERSION,
};
use winpipe_server::config::ServerConfig;
use winpipe_server::service::WinpipeServer;

// ── Helpers ──────────────────────────────────────────────────────

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("winpipe-client-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn client_config(port: u16) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.network.server = format!("127.0.0.1:{port}");
    config.network.timeout_ms = 5000;
    config
}

/// A listener for a scripted server, and the config pointing at it.
async fn scripted() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, client_config(port))
}

/// Accept one client and answer its `hello`.
async fn accept_client(listener: &TcpListener) -> Connection {
    let (stream, _) = listener.accept().await.unwrap();
    let mut conn = Connection::new(stream);
    let Some(Packet::Hello(client)) = conn.recv().await else {
        panic!("client did not open with hello");
    };
    assert!(client.encodings.iter().any(|e| e == "rgb32"));
    conn.send(Packet::Hello(Capabilities {
        version: PROTOCOL_VERSION.to_owned(),
        encodings: vec!["rgb32".into()],
        rgb_formats: Vec::new(),
        zlib: 0,
        max_packet_size: 1 << 20,
    }))
    .await
    .unwrap();
    conn
}

fn new_window(wid: u32) -> Packet {
    Packet::NewWindow(NewWindowPacket {
        wid,
        x: 0,
        y: 0,
        width: 2,
        height: 2,
        metadata: Options::new(),
        client_properties: None,
        override_redirect: false,
    })
}

fn draw(wid: u32, sequence: u64, shade: u8) -> Packet {
    let mut options = Options::new();
    options.insert("rgb_format".into(), Value::from("BGRX"));
    Packet::Draw(DrawPacket {
        wid,
        x: 0,
        y: 0,
        width: 2,
        height: 2,
        encoding: "rgb32".into(),
        data: vec![shade; 16],
        sequence,
        rowstride: 8,
        options,
    })
}

async fn recv(conn: &mut Connection) -> Packet {
    tokio::time::timeout(Duration::from_secs(5), conn.recv())
        .await
        .expect("client went quiet")
        .expect("client hung up")
}

// ── Tests ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_mirrors_a_real_server_and_dumps_windows() {
    let mut server_config = ServerConfig::default();
    server_config.capture.windows = 2;
    server_config.capture.width = 24;
    server_config.capture.height = 16;
    server_config.capture.fps = 100;
    server_config.capture.max_frames = 3;
    server_config.encoding.encoding = "png".into();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = WinpipeServer::new(server_config);
    let stop = server.shutdown_handle();
    let server_task = tokio::spawn(async move { server.serve(listener).await });

    let dir = scratch_dir("mirror");
    let mut config = client_config(port);
    config.display.dump_dir = dir.to_string_lossy().into_owned();

    let conn = ServerConnection::connect(&config).await.unwrap();
    assert!(conn.server().encodings.iter().any(|e| e == "png"));
    let session = ClientSession::new(conn, Display::new(config.dump_dir()));
    let (end, summary) = tokio::time::timeout(
        Duration::from_secs(10),
        session.run(std::future::pending()),
    )
    .await
    .expect("session did not end")
    .unwrap();

    assert_eq!(end, SessionEnd::Disconnected("all windows closed".into()));
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.failed_draws, 0);
    assert!(summary.draws >= 6);
    assert_eq!(summary.dumps.len(), 2);
    for path in &summary.dumps {
        let bytes = std::fs::read(path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    stop.cancel();
    server_task.await.unwrap().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn test_paints_in_order_and_acks_each_draw() {
    let (listener, config) = scripted().await;
    let script = tokio::spawn(async move {
        let mut conn = accept_client(&listener).await;
        conn.send(new_window(4)).await.unwrap();
        conn.send(draw(4, 1, 0x22)).await.unwrap();
        conn.send(draw(4, 0, 0x11)).await.unwrap();
        conn.send(draw(9, 0, 0x33)).await.unwrap();

        let mut acks = Vec::new();
        for _ in 0..3 {
            let Packet::DamageSequence(ack) = recv(&mut conn).await else {
                panic!("expected an ack");
            };
            acks.push((ack.wid, ack.sequence, ack.failed()));
        }
        conn.send(Packet::Disconnect {
            reason: "done".into(),
        })
        .await
        .unwrap();
        acks
    });

    let conn = ServerConnection::connect(&config).await.unwrap();
    let session = ClientSession::new(conn, Display::new(None));
    let (end, summary) = session.run(std::future::pending()).await.unwrap();

    assert_eq!(end, SessionEnd::Disconnected("done".into()));
    assert_eq!(summary.draws, 3);
    assert_eq!(summary.failed_draws, 1);
    assert!(summary.dumps.is_empty());
    assert_eq!(
        script.await.unwrap(),
        vec![(4, 0, false), (4, 1, false), (9, 0, true)]
    );
}

#[tokio::test]
async fn test_refused_handshake_is_an_error() {
    let (listener, config) = scripted().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut conn = Connection::new(stream);
        let _ = conn.recv().await;
        conn.send(Packet::Disconnect {
            reason: "no common encoding".into(),
        })
        .await
        .unwrap();
        // Keep the socket open until the client has read the refusal.
        let _ = conn.recv().await;
    });

    let err = match ServerConnection::connect(&config).await {
        Ok(_) => panic!("handshake should fail"),
        Err(e) => e,
    };
    assert!(err.to_string().contains("no common encoding"), "{err}");
}

#[tokio::test]
async fn test_local_shutdown_sends_disconnect() {
    let (listener, config) = scripted().await;
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let script = tokio::spawn(async move {
        let mut conn = accept_client(&listener).await;
        conn.send(new_window(1)).await.unwrap();
        conn.send(draw(1, 0, 0x40)).await.unwrap();
        let Packet::DamageSequence(ack) = recv(&mut conn).await else {
            panic!("expected an ack");
        };
        assert_eq!(ack.sequence, 0);
        let _ = stop_tx.send(());
        recv(&mut conn).await
    });

    let dir = scratch_dir("shutdown");
    let mut config = config;
    config.display.dump_dir = dir.to_string_lossy().into_owned();
    let conn = ServerConnection::connect(&config).await.unwrap();
    let session = ClientSession::new(conn, Display::new(config.dump_dir()));
    let (end, summary) = session
        .run(async {
            let _ = stop_rx.await;
        })
        .await
        .unwrap();

    assert_eq!(end, SessionEnd::Shutdown);
    assert_eq!(summary.dumps, vec![dir.join("window-1.png")]);
    assert!(summary.dumps[0].exists());
    assert_eq!(
        script.await.unwrap(),
        Packet::Disconnect {
            reason: "client exit".into()
        }
    );
    let _ = std::fs::remove_dir_all(&dir);
}
