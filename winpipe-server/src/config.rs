//! Configuration for the winpipe server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use winpipe_core::codec::{Encoding, EncoderSettings};
use winpipe_core::{SourceSpec, StreamConfig};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener settings.
    pub network: NetworkConfig,
    /// What the windows show.
    pub capture: CaptureConfig,
    /// Picture encoding.
    pub encoding: EncodingConfig,
    /// Ack-driven flow control.
    pub flow: FlowConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the TCP listener on.
    pub bind: String,
    pub port: u16,
    /// Largest main packet accepted from a client, in bytes.
    pub max_packet_size: usize,
}

/// Kind of capture source backing each window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Synthetic,
    Y4m,
}

/// Capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub source: SourceKind,
    /// Windows offered to every client.
    pub windows: u32,
    /// Size of synthetic windows.
    pub width: u32,
    pub height: u32,
    /// Capture rate per window.
    pub fps: u32,
    /// Clip replayed by `y4m` sources.
    pub y4m_path: PathBuf,
    /// Restart the clip when it ends.
    pub looping: bool,
    /// Stop each window after this many captures, 0 for never.
    pub max_frames: u64,
}

/// Encoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Preferred encoding. The client's list decides if it lacks this one.
    pub encoding: String,
    /// 0-100; higher keeps more detail.
    pub quality: u8,
    /// 0-100; higher spends less time per frame.
    pub speed: u8,
    /// zlib level for raw pixel data, 0 for none.
    pub zlib: u8,
    /// Frames between video keyframes.
    pub keyframe_interval: u32,
}

/// Flow control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Draws a window may have in flight before capture pauses.
    pub max_unacked: usize,
    pub ack_timeout_ms: u64,
    pub target_latency_ms: u64,
    /// Adjust quality and speed from measured ack latency.
    pub adaptive: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 10000,
            max_packet_size: winpipe_core::wire::DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Synthetic,
            windows: 1,
            width: 640,
            height: 480,
            fps: 25,
            y4m_path: PathBuf::from("capture.y4m"),
            looping: true,
            max_frames: 0,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        let settings = EncoderSettings::default();
        Self {
            encoding: Encoding::Yuvz.name().into(),
            quality: settings.quality,
            speed: settings.speed,
            zlib: settings.zlib,
            keyframe_interval: settings.keyframe_interval,
        }
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        let stream = StreamConfig::default();
        Self {
            max_unacked: stream.max_unacked,
            ack_timeout_ms: stream.ack_timeout.as_millis() as u64,
            target_latency_ms: stream.target_latency.as_millis() as u64,
            adaptive: stream.adaptive,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Address the listener binds to.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.bind, self.network.port)
    }

    /// The configured encoding, or the default one if the name is unknown.
    pub fn preferred_encoding(&self) -> Encoding {
        Encoding::parse(&self.encoding.encoding)
            .ok()
            .filter(|e| e.has_builtin_codec())
            .unwrap_or_else(|| {
                tracing::warn!(
                    "encoding {:?} cannot be produced; using {}",
                    self.encoding.encoding,
                    Encoding::Yuvz
                );
                Encoding::Yuvz
            })
    }

    /// Convert the encoding and flow sections into a `StreamConfig`.
    pub fn to_stream_config(&self) -> StreamConfig {
        StreamConfig {
            encoding: self.preferred_encoding(),
            settings: EncoderSettings {
                quality: self.encoding.quality.min(100),
                speed: self.encoding.speed.min(100),
                zlib: self.encoding.zlib.min(9),
                rgb_formats: Vec::new(),
                keyframe_interval: self.encoding.keyframe_interval.max(1),
            },
            fps: self.capture.fps.clamp(1, 120),
            max_unacked: self.flow.max_unacked.max(1),
            ack_timeout: Duration::from_millis(self.flow.ack_timeout_ms.max(1)),
            target_latency: Duration::from_millis(self.flow.target_latency_ms.max(1)),
            adaptive: self.flow.adaptive,
            max_frames: (self.capture.max_frames > 0).then_some(self.capture.max_frames),
            ..StreamConfig::default()
        }
    }

    /// One source description per offered window.
    pub fn source_specs(&self) -> Vec<SourceSpec> {
        let spec = match self.capture.source {
            SourceKind::Synthetic => SourceSpec::Synthetic {
                width: self.capture.width,
                height: self.capture.height,
            },
            SourceKind::Y4m => SourceSpec::Y4m {
                path: self.capture.y4m_path.clone(),
                looping: self.capture.looping,
            },
        };
        vec![spec; self.capture.windows as usize]
    }
}

// ── Tests ────────────────────────────────────────────────────────
