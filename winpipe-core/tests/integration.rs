//! Integration tests: framed codec reassembly over mock I/O and full
//! window streams between a server worker and a client over localhost TCP.

use std::time::Duration;

use bytes::BytesMut;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use winpipe_core::capture::CaptureSource;
use winpipe_core::wire::{Options, Value};
use winpipe_core::{
    AckPacket, Capabilities, ClientWindows, PipelineError, PixelBuffer, Rect, Connection, ConnectionInfo, DrawPacket, EncoderSettings, Encoding,
    NewWindowPacket, Packet, PacketCodec, ProtocolError, StreamConfig, SyntheticSource, WindowSource, WindowStats,
};

// ── Helpers ──────────────────────────────────────────────────────

async fn ephemeral_listener() -> (TcpListener, ConnectionInfo) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let info = ConnectionInfo::new(addr.ip().to_string(), addr.port());
    (listener, info)
}

fn encode(packets: Vec<Packet>) -> Vec<u8> {
    let mut codec = PacketCodec::new();
    let mut buf = BytesMut::new();
    for packet in packets {
        codec.encode(packet, &mut buf).unwrap();
    }
    buf.to_vec()
}

fn big_draw(sequence: u64) -> Packet {
    let mut options = Options::new();
    options.insert("rgb_format".into(), Value::from("BGRX"));
    Packet::Draw(DrawPacket {
        wid: 2,
        x: 0,
        y: 0,
        width: 50,
        height: 50,
        encoding: "rgb32".into(),
        data: (0..10_000).map(|i| (i % 251) as u8).collect(),
        sequence,
        rowstride: 200,
        options,
    })
}

/// What the client saw of one window stream.
struct ClientResult {
    pixels: Vec<u8>,
    acks: u64,
    failed: u64,
}

/// A client loop: open windows, paint draws, ack them, stop on `lost-window`.
async fn run_client(info: ConnectionInfo) -> ClientResult {
    let conn = Connection::connect(&info).await.unwrap();
    let (tx, mut rx) = conn.split();
    let mut windows = ClientWindows::new();
    let mut acks = 0;
    let mut failed = 0;
    while let Some(packet) = rx.recv().await {
        match packet {
            Packet::NewWindow(window) => windows.open(&window),
            Packet::WindowResized { wid, width, height } => {
                windows.resize(wid, width, height).unwrap()
            }
            Packet::Draw(draw) => {
                for ack in windows.draw(draw) {
                    acks += 1;
                    failed += u64::from(ack.failed());
                    tx.send(Packet::DamageSequence(ack)).await.unwrap();
                }
            }
            Packet::LostWindow { wid } => {
                let window = windows.close(wid).unwrap();
                return ClientResult {
                    pixels: window.surface().pixels(),
                    acks,
                    failed,
                };
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }
    panic!("connection closed before lost-window");
}

/// Stream `frames` synthetic frames of one window and return both ends.
async fn stream_window(config: StreamConfig, frames: u64) -> (WindowStats, ClientResult, Vec<u8>) {
    let source = Box::new(SyntheticSource::new(64, 48).unwrap());
    let (stats, client) = stream_source(source, config, frames).await;
    let mut expected = SyntheticSource::new(64, 48).unwrap();
    for _ in 0..frames {
        expected.refresh().unwrap();
    }
    (stats, client, expected.grab_full().unwrap().tight_bytes())
}

/// A synthetic source whose `fail_at`-th refresh fails without
/// advancing the picture.
struct FlakySource {
    inner: SyntheticSource,
    refreshes: u32,
    fail_at: u32,
}

impl CaptureSource for FlakySource {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn size(&self) -> (u32, u32) {
        self.inner.size()
    }

    fn refresh(&mut self) -> Result<(), PipelineError> {
        self.refreshes += 1;
        if self.refreshes == self.fail_at {
            return Err(PipelineError::Capture("device busy".into()));
        }
        self.inner.refresh()
    }

    fn grab(&mut self, region: Rect) -> Result<PixelBuffer, PipelineError> {
        self.inner.grab(region)
    }
}

async fn stream_source(
    source: Box<dyn CaptureSource>,
    config: StreamConfig,
    frames: u64,
) -> (WindowStats, ClientResult) {
    let (listener, info) = ephemeral_listener().await;
    let client = tokio::spawn(run_client(info));

    let (stream, _) = listener.accept().await.unwrap();
    let (tx, mut rx) = Connection::new(stream).split();

    let config = StreamConfig {
        max_frames: Some(frames),
        ..config
    };
    let worker = WindowSource::new(7, source, config, tx.clone());
    let (width, height) = worker.size();
    tx.send(Packet::NewWindow(NewWindowPacket {
        wid: 7,
        x: 10,
        y: 10,
        width,
        height,
        metadata: Options::new(),
        client_properties: None,
        override_redirect: false,
    }))
    .await
    .unwrap();
    let handle = worker.spawn();

    while !handle.is_finished() {
        match tokio::time::timeout(Duration::from_millis(20), rx.recv()).await {
            Ok(Some(Packet::DamageSequence(ack))) => {
                let _ = handle.deliver(ack).await;
            }
            Ok(Some(other)) => panic!("unexpected packet {other:?}"),
            Ok(None) => break,
            Err(_) => {}
        }
    }
    let stats = handle.join().await.unwrap();
    tx.send(Packet::LostWindow { wid: 7 }).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(10), client)
        .await
        .expect("client timed out")
        .unwrap();
    (stats, result)
}

// ── Codec over mock I/O ──────────────────────────────────────────

#[tokio::test]
async fn test_reassembles_packets_split_across_reads() {
    let bytes = encode(vec![big_draw(0), Packet::LostWindow { wid: 2 }]);
    let mock = tokio_test::io::Builder::new()
        .read(&bytes[..5])
        .read(&bytes[5..4100])
        .read(&bytes[4100..])
        .build();
    let mut framed = FramedRead::new(mock, PacketCodec::new());

    assert_eq!(framed.next().await.unwrap().unwrap(), big_draw(0));
    assert_eq!(
        framed.next().await.unwrap().unwrap(),
        Packet::LostWindow { wid: 2 }
    );
    assert!(framed.next().await.is_none());
}

#[tokio::test]
async fn test_truncated_stream_is_an_error() {
    let bytes = encode(vec![Packet::WindowResized {
        wid: 1,
        width: 10,
        height: 20,
    }]);
    let mock = tokio_test::io::Builder::new()
        .read(&bytes[..bytes.len() - 2])
        .build();
    let mut framed = FramedRead::new(mock, PacketCodec::new());
    assert!(framed.next().await.unwrap().is_err());
}

#[tokio::test]
async fn test_gibberish_is_fatal() {
    let mock = tokio_test::io::Builder::new()
        .read(b"GET / HTTP/1.1\r\n\r\n")
        .build();
    let mut framed = FramedRead::new(mock, PacketCodec::new());
    assert!(framed.next().await.unwrap().is_err());
}

/// Decode one frame sequence and re-encode the packet it yields.
fn reencode(wire: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut codec = PacketCodec::new().with_max_packet_size(1 << 20);
    let mut buf = BytesMut::from(wire);
    let packet = codec.decode(&mut buf)?.expect("a whole packet");
    assert!(buf.is_empty());
    let mut out = BytesMut::new();
    codec.encode(packet, &mut out)?;
    Ok(out.to_vec())
}

fn main_frame(payload: &[u8]) -> Vec<u8> {
    let mut wire = vec![b'P', 0, 0, 0];
    wire.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    wire.extend_from_slice(payload);
    wire
}

#[test]
fn test_every_packet_type_reencodes_to_the_same_bytes() {
    let mut metadata = Options::new();
    metadata.insert("title".into(), Value::from("terminal"));
    let mut props = Options::new();
    props.insert("workspace".into(), Value::Int(2));
    let packets = vec![
        Packet::Hello(Capabilities {
            version: "0.1.0".into(),
            encodings: vec!["yuvz".into(), "png".into(), "rgb32".into()],
            rgb_formats: vec!["BGRX".into(), "RGB".into()],
            zlib: 3,
            max_packet_size: 65536,
        }),
        big_draw(4),
        Packet::Draw(DrawPacket {
            wid: 1,
            x: -8,
            y: 3,
            width: 2,
            height: 1,
            encoding: "rgb24".into(),
            data: vec![1, 2, 3, 4, 5, 6],
            sequence: 0,
            rowstride: 6,
            options: Options::new(),
        }),
        Packet::DamageSequence(AckPacket {
            sequence: 4,
            wid: 2,
            width: 50,
            height: 50,
            decode_time: 3,
            message: None,
        }),
        Packet::DamageSequence(AckPacket {
            sequence: 5,
            wid: 2,
            width: 50,
            height: 50,
            decode_time: -1,
            message: Some("corrupt payload".into()),
        }),
        Packet::NewWindow(NewWindowPacket {
            wid: 3,
            x: 0,
            y: 0,
            width: 640,
            height: 480,
            metadata: metadata.clone(),
            client_properties: Some(props),
            override_redirect: false,
        }),
        Packet::NewWindow(NewWindowPacket {
            wid: 4,
            x: 5,
            y: 5,
            width: 80,
            height: 20,
            metadata,
            client_properties: None,
            override_redirect: true,
        }),
        Packet::WindowResized {
            wid: 3,
            width: 800,
            height: 600,
        },
        Packet::LostWindow { wid: 3 },
        Packet::Disconnect {
            reason: "server shutdown".into(),
        },
    ];
    for packet in packets {
        let wire = encode(vec![packet.clone()]);
        assert_eq!(reencode(&wire).unwrap(), wire, "{packet:?}");
    }
}

#[test]
fn test_non_canonical_packets_are_refused() {
    // Disconnect reason as a byte string.
    assert!(matches!(
        reencode(&main_frame(b"l10:disconnect3:byee")),
        Err(ProtocolError::FieldType { index: 1, .. })
    ));
    // Draw without its options dict.
    assert!(matches!(
        reencode(&main_frame(b"l4:drawi1ei0ei0ei1ei1e5:rgb243:abci0ei3ee")),
        Err(ProtocolError::MissingField { index: 10, .. })
    ));
    // Encoding as text.
    assert!(matches!(
        reencode(&main_frame(b"l4:drawi1ei0ei0ei1ei1eu5:rgb243:abci0ei3edee")),
        Err(ProtocolError::FieldType { index: 6, .. })
    ));
    // Trailing field.
    assert!(matches!(
        reencode(&main_frame(b"l11:lost-windowi1ei2ee")),
        Err(ProtocolError::TrailingFields { .. })
    ));
    // The same draw, canonical, is accepted as is.
    let canonical = main_frame(b"l4:drawi1ei0ei0ei1ei1e5:rgb243:abci0ei3edee");
    assert_eq!(reencode(&canonical).unwrap(), canonical);
}

#[test]
fn test_large_inline_field_is_refused() {
    let mut payload = b"l4:drawi1ei0ei0ei64ei16e5:rgb325000:".to_vec();
    payload.extend(std::iter::repeat_n(0u8, 5000));
    payload.extend_from_slice(b"i0ei256edee");
    assert!(matches!(
        reencode(&main_frame(&payload)),
        Err(ProtocolError::ChunkLayout { index: 7, .. })
    ));
}

// ── Connection round trip ────────────────────────────────────────

#[tokio::test]
async fn test_acks_cross_the_connection() {
    let (listener, info) = ephemeral_listener().await;
    let client = tokio::spawn(async move { Connection::connect(&info).await.unwrap() });
    let (stream, _) = listener.accept().await.unwrap();
    let mut server = Connection::new(stream);
    let mut client = client.await.unwrap();

    server.send(big_draw(3)).await.unwrap();
    let Some(Packet::Draw(draw)) = client.recv().await else {
        panic!("expected a draw");
    };
    assert_eq!(draw.data.len(), 10_000);

    let ack = AckPacket {
        sequence: draw.sequence,
        wid: draw.wid,
        width: draw.width,
        height: draw.height,
        decode_time: 4,
        message: None,
    };
    client.send(Packet::DamageSequence(ack.clone())).await.unwrap();
    let received = tokio::time::timeout(Duration::from_secs(5), server.recv())
        .await
        .expect("timeout");
    assert_eq!(received, Some(Packet::DamageSequence(ack)));
}

// ── Window streams ───────────────────────────────────────────────

#[tokio::test]
async fn test_raw_stream_reproduces_source_exactly() {
    let config = StreamConfig {
        encoding: Encoding::Rgb32,
        fps: 200,
        adaptive: false,
        tile_size: 16,
        ..StreamConfig::default()
    };
    let (stats, client, expected) = stream_window(config, 6).await;

    assert_eq!(stats.frames, 6);
    assert!(stats.draws >= 6);
    assert_eq!(client.acks, stats.draws);
    assert_eq!(client.failed, 0);
    assert_eq!(client.pixels, expected);
}

#[tokio::test]
async fn test_png_stream_reproduces_source_exactly() {
    let config = StreamConfig {
        encoding: Encoding::Png,
        fps: 200,
        ..StreamConfig::default()
    };
    let (stats, client, expected) = stream_window(config, 4).await;
    assert_eq!(client.failed, 0);
    assert_eq!(client.acks, stats.draws);
    assert_eq!(client.pixels, expected);
}

#[tokio::test]
async fn test_rgb24_with_zlib_reproduces_source_exactly() {
    let config = StreamConfig {
        encoding: Encoding::Rgb24,
        settings: EncoderSettings {
            zlib: 6,
            ..EncoderSettings::default()
        },
        fps: 200,
        tile_size: 8,
        ..StreamConfig::default()
    };
    let (stats, client, expected) = stream_window(config, 4).await;
    assert_eq!(client.failed, 0);
    assert_eq!(client.acks, stats.draws);
    assert_eq!(client.pixels, expected);
}

#[tokio::test]
async fn test_video_stream_stays_close_to_source() {
    let config = StreamConfig {
        encoding: Encoding::Yuvz,
        settings: EncoderSettings {
            quality: 100,
            ..EncoderSettings::default()
        },
        fps: 200,
        adaptive: false,
        ..StreamConfig::default()
    };
    let (stats, client, expected) = stream_window(config, 5).await;

    assert_eq!(stats.frames, 5);
    assert_eq!(client.failed, 0);
    assert_eq!(client.acks, stats.draws);
    assert_eq!(client.pixels.len(), expected.len());
    for (i, (got, want)) in client.pixels.iter().zip(&expected).enumerate() {
        if i % 4 == 3 {
            continue;
        }
        assert!(
            (i16::from(*got) - i16::from(*want)).abs() <= 4,
            "byte {i}: {got} vs {want}"
        );
    }
}

#[tokio::test]
async fn test_capture_failure_drops_one_frame() {
    let config = StreamConfig {
        encoding: Encoding::Rgb32,
        fps: 200,
        adaptive: false,
        ..StreamConfig::default()
    };
    let source = Box::new(FlakySource {
        inner: SyntheticSource::new(64, 48).unwrap(),
        refreshes: 0,
        fail_at: 2,
    });
    let (stats, client) = stream_source(source, config, 5).await;

    assert_eq!(stats.frames, 5);
    assert_eq!(stats.dropped, 1);
    assert_eq!(client.failed, 0);
    assert_eq!(client.acks, stats.draws);

    // Four refreshes reached the picture.
    let mut expected = SyntheticSource::new(64, 48).unwrap();
    for _ in 0..4 {
        expected.refresh().unwrap();
    }
    assert_eq!(client.pixels, expected.grab_full().unwrap().tight_bytes());
}
