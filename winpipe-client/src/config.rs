//! Client configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use winpipe_core::codec::Encoding;
use winpipe_core::{Capabilities, ConnectionInfo, PixelFormat, PROTOCOL_VERSION};

/// Top-level configuration for the client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// What the client asks the server for.
    pub encoding: EncodingConfig,
    /// Display settings.
    pub display: DisplayConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server address as `host:port`.
    pub server: String,
    /// Connect and handshake timeout in milliseconds.
    pub timeout_ms: u64,
    /// Largest main packet accepted from the server, in bytes.
    pub max_packet_size: usize,
}

/// Encoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingConfig {
    /// Accepted encodings, preferred first.
    pub encodings: Vec<String>,
    /// Packed layouts accepted for raw pixel data.
    pub rgb_formats: Vec<String>,
    /// zlib level requested for raw pixel data, 0 to leave it to the server.
    pub zlib: u8,
}

/// Display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Directory closed windows are written to as PNG. Empty disables dumps.
    pub dump_dir: String,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server: "127.0.0.1:10000".into(),
            timeout_ms: 5000,
            max_packet_size: 4 * 1024 * 1024,
        }
    }
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            encodings: Encoding::builtin()
                .into_iter()
                .map(|e| e.name().to_owned())
                .collect(),
            rgb_formats: [PixelFormat::Bgrx, PixelFormat::Rgbx, PixelFormat::Rgb, PixelFormat::Bgr]
                .into_iter()
                .map(|f| f.name().to_owned())
                .collect(),
            zlib: 0,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            dump_dir: String::new(),
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

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
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

    /// Parse `network.server` into host and port.
    pub fn server_info(&self) -> Result<ConnectionInfo, String> {
        let address = self.network.server.trim();
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| format!("server address {address:?} lacks a port"))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("server address {address:?}: bad port: {e}"))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(format!("server address {address:?} lacks a host"));
        }
        Ok(ConnectionInfo::new(host, port))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms.max(1))
    }

    pub fn dump_dir(&self) -> Option<PathBuf> {
        (!self.display.dump_dir.is_empty()).then(|| PathBuf::from(&self.display.dump_dir))
    }

    /// The `hello` capabilities announced to the server.
    ///
    /// Encodings this client cannot decode are left out.
    pub fn to_capabilities(&self) -> Capabilities {
        let encodings = self
            .encoding
            .encodings
            .iter()
            .filter_map(|name| match Encoding::parse(name) {
                Ok(e) if e.has_builtin_codec() => Some(e.name().to_owned()),
                _ => {
                    tracing::warn!("encoding {name:?} cannot be decoded; not offered");
                    None
                }
            })
            .collect();
        Capabilities {
            version: PROTOCOL_VERSION.to_owned(),
            encodings,
            rgb_formats: self.encoding.rgb_formats.clone(),
            zlib: self.encoding.zlib.min(9),
            max_packet_size: u32::try_from(self.network.max_packet_size).unwrap_or(u32::MAX),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(text.contains("server"));
        assert!(text.contains("dump_dir"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.server, "127.0.0.1:10000");
        assert_eq!(parsed.encoding.encodings[0], "yuvz");
        assert!(parsed.dump_dir().is_none());
    }

    #[test]
    fn server_address_parsing() {
        let mut cfg = ClientConfig::default();
        let info = cfg.server_info().unwrap();
        assert_eq!((info.host(), info.port()), ("127.0.0.1", 10000));

        cfg.network.server = "[::1]:9000".into();
        assert_eq!(cfg.server_info().unwrap().host(), "::1");

        cfg.network.server = "localhost".into();
        assert!(cfg.server_info().is_err());
        cfg.network.server = ":80".into();
        assert!(cfg.server_info().is_err());
        cfg.network.server = "host:99999".into();
        assert!(cfg.server_info().is_err());
    }

    #[test]
    fn capabilities_skip_undecodable_encodings() {
        let mut cfg = ClientConfig::default();
        cfg.encoding.encodings = vec!["h264".into(), "x264".into(), "png".into(), "webp".into()];
        cfg.encoding.zlib = 15;
        let caps = cfg.to_capabilities();
        assert_eq!(caps.encodings, vec!["png".to_string()]);
        assert_eq!(caps.zlib, 9);
        assert_eq!(caps.version, PROTOCOL_VERSION);
    }
}
