//! Typed packets.
//!
//! On the wire a packet is a bencoded list whose first element names the
//! packet type; the remaining elements are positional fields.

use std::collections::BTreeMap;

use crate::error::{PipelineError, ProtocolError};
use crate::wire::value::Value;

pub type WindowId = u32;
pub type Options = BTreeMap<String, Value>;

/// Decode time reported in an ack when the frame could not be painted.
pub const DECODE_FAILED: i64 = -1;

// ── Packet bodies ────────────────────────────────────────────────

/// Capabilities exchanged in `hello`.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    pub version: String,
    /// Encodings the sender can decode, preferred first.
    pub encodings: Vec<String>,
    /// Packed layouts the sender accepts for raw encodings.
    pub rgb_formats: Vec<String>,
    /// zlib level applied to raw pixel data, 0 for none.
    pub zlib: u8,
    pub max_packet_size: u32,
}

impl Capabilities {
    fn to_dict(&self) -> Options {
        let list = |items: &[String]| {
            Value::List(items.iter().map(|s| Value::Bytes(s.as_bytes().to_vec())).collect())
        };
        let mut caps = Options::new();
        caps.insert("version".into(), Value::from(self.version.as_str()));
        caps.insert("encodings".into(), list(&self.encodings));
        caps.insert("rgb_formats".into(), list(&self.rgb_formats));
        caps.insert("zlib".into(), Value::Int(self.zlib.into()));
        caps.insert("max_packet_size".into(), Value::from(self.max_packet_size));
        caps
    }

    /// Only the exact key set and value kinds [`Self::to_dict`] writes.
    fn from_dict(caps: Options) -> Result<Self, ProtocolError> {
        const KEYS: [&str; 5] = ["encodings", "max_packet_size", "rgb_formats", "version", "zlib"];
        let wrong = |expected| ProtocolError::FieldType {
            packet: "hello",
            index: 1,
            expected,
        };
        if caps.len() != KEYS.len() || !KEYS.iter().all(|k| caps.contains_key(*k)) {
            return Err(wrong("a dict of the five capability keys"));
        }
        let names = |key: &str| -> Result<Vec<String>, ProtocolError> {
            let Some(Value::List(items)) = caps.get(key) else {
                return Err(wrong("a list of byte-string names"));
            };
            items
                .iter()
                .map(|item| match item {
                    Value::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| wrong("utf-8 names")),
                    _ => Err(wrong("a list of byte-string names")),
                })
                .collect()
        };
        let int = |key: &str| caps.get(key).and_then(Value::as_int);
        let Some(Value::Str(version)) = caps.get("version") else {
            return Err(wrong("a text version"));
        };
        Ok(Self {
            version: version.clone(),
            encodings: names("encodings")?,
            rgb_formats: names("rgb_formats")?,
            zlib: int("zlib")
                .filter(|n| (0..=9).contains(n))
                .ok_or_else(|| wrong("a zlib level from 0 to 9"))? as u8,
            max_packet_size: int("max_packet_size")
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| wrong("a 32-bit packet size"))?,
        })
    }
}

/// Encoded pixels for one region of a window.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawPacket {
    pub wid: WindowId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub encoding: String,
    pub data: Vec<u8>,
    pub sequence: u64,
    pub rowstride: u32,
    pub options: Options,
}

impl DrawPacket {
    /// Reject draws that no decoder could produce pixels for.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.width == 0 || self.height == 0 {
            return Err(PipelineError::InvalidBuffer(format!(
                "draw {} for window {} is {}x{}",
                self.sequence, self.wid, self.width, self.height
            )));
        }
        Ok(())
    }
}

/// Acknowledgement of one `draw` (`damage-sequence`).
#[derive(Debug, Clone, PartialEq)]
pub struct AckPacket {
    pub sequence: u64,
    pub wid: WindowId,
    pub width: u32,
    pub height: u32,
    /// Milliseconds spent decoding, or [`DECODE_FAILED`].
    pub decode_time: i64,
    pub message: Option<String>,
}

impl AckPacket {
    pub fn failed(&self) -> bool {
        self.decode_time < 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewWindowPacket {
    pub wid: WindowId,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub metadata: Options,
    pub client_properties: Option<Options>,
    /// Sent as `new-override-redirect` (menus, tooltips).
    pub override_redirect: bool,
}

// ── Packet ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Hello(Capabilities),
    Draw(DrawPacket),
    DamageSequence(AckPacket),
    NewWindow(NewWindowPacket),
    WindowResized {
        wid: WindowId,
        width: u32,
        height: u32,
    },
    LostWindow {
        wid: WindowId,
    },
    Disconnect {
        reason: String,
    },
}

impl Packet {
    pub fn packet_type(&self) -> &'static str {
        match self {
            Packet::Hello(_) => "hello",
            Packet::Draw(_) => "draw",
            Packet::DamageSequence(_) => "damage-sequence",
            Packet::NewWindow(w) if w.override_redirect => "new-override-redirect",
            Packet::NewWindow(_) => "new-window",
            Packet::WindowResized { .. } => "window-resized",
            Packet::LostWindow { .. } => "lost-window",
            Packet::Disconnect { .. } => "disconnect",
        }
    }

    /// The wire form: a list headed by the packet type.
    pub fn into_value(self) -> Value {
        let mut fields = vec![Value::Bytes(self.packet_type().as_bytes().to_vec())];
        match self {
            Packet::Hello(caps) => fields.push(Value::Dict(caps.to_dict())),
            Packet::Draw(d) => fields.extend([
                Value::from(d.wid),
                Value::from(d.x),
                Value::from(d.y),
                Value::from(d.width),
                Value::from(d.height),
                Value::Bytes(d.encoding.into_bytes()),
                Value::Bytes(d.data),
                Value::Int(d.sequence as i64),
                Value::from(d.rowstride),
                Value::Dict(d.options),
            ]),
            Packet::DamageSequence(a) => {
                fields.extend([
                    Value::Int(a.sequence as i64),
                    Value::from(a.wid),
                    Value::from(a.width),
                    Value::from(a.height),
                    Value::Int(a.decode_time),
                ]);
                if let Some(message) = a.message {
                    fields.push(Value::from(message));
                }
            }
            Packet::NewWindow(w) => {
                fields.extend([
                    Value::from(w.wid),
                    Value::from(w.x),
                    Value::from(w.y),
                    Value::from(w.width),
                    Value::from(w.height),
                    Value::Dict(w.metadata),
                ]);
                if let Some(props) = w.client_properties {
                    fields.push(Value::Dict(props));
                }
            }
            Packet::WindowResized { wid, width, height } => {
                fields.extend([Value::from(wid), Value::from(width), Value::from(height)])
            }
            Packet::LostWindow { wid } => fields.push(Value::from(wid)),
            Packet::Disconnect { reason } => fields.push(Value::from(reason)),
        }
        Value::List(fields)
    }

    /// Parse the wire form, taking ownership so pixel data is not copied.
    ///
    /// Only the shape [`Packet::into_value`] produces is accepted: field
    /// count, string kinds and optional fields must all match, so that
    /// re-encoding a parsed packet gives back the same value.
    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::List(items) = value else {
            return Err(ProtocolError::NotAPacket);
        };
        let packet_type = match items.first() {
            Some(Value::Bytes(b)) => String::from_utf8(b.clone()).map_err(|_| ProtocolError::NotAPacket)?,
            _ => return Err(ProtocolError::NotAPacket),
        };

        let packet = match packet_type.as_str() {
            "hello" => {
                let mut f = Fields::new("hello", items, 2, 2)?;
                Packet::Hello(Capabilities::from_dict(f.dict(1)?)?)
            }
            "draw" => {
                let mut f = Fields::new("draw", items, 11, 11)?;
                Packet::Draw(DrawPacket {
                    wid: f.int(1)?,
                    x: f.int(2)?,
                    y: f.int(3)?,
                    width: f.int(4)?,
                    height: f.int(5)?,
                    encoding: f.name(6)?,
                    data: f.bytes(7)?,
                    sequence: f.int(8)?,
                    rowstride: f.int(9)?,
                    options: f.dict(10)?,
                })
            }
            "damage-sequence" => {
                let mut f = Fields::new("damage-sequence", items, 6, 7)?;
                Packet::DamageSequence(AckPacket {
                    sequence: f.int(1)?,
                    wid: f.int(2)?,
                    width: f.int(3)?,
                    height: f.int(4)?,
                    decode_time: f.int(5)?,
                    message: f.optional(6, Fields::text)?,
                })
            }
            "new-window" | "new-override-redirect" => {
                let name = if packet_type == "new-window" {
                    "new-window"
                } else {
                    "new-override-redirect"
                };
                let mut f = Fields::new(name, items, 7, 8)?;
                Packet::NewWindow(NewWindowPacket {
                    wid: f.int(1)?,
                    x: f.int(2)?,
                    y: f.int(3)?,
                    width: f.int(4)?,
                    height: f.int(5)?,
                    metadata: f.dict(6)?,
                    client_properties: f.optional(7, Fields::dict)?,
                    override_redirect: name == "new-override-redirect",
                })
            }
            "window-resized" => {
                let f = Fields::new("window-resized", items, 4, 4)?;
                Packet::WindowResized {
                    wid: f.int(1)?,
                    width: f.int(2)?,
                    height: f.int(3)?,
                }
            }
            "lost-window" => {
                let f = Fields::new("lost-window", items, 2, 2)?;
                Packet::LostWindow { wid: f.int(1)? }
            }
            "disconnect" => {
                let mut f = Fields::new("disconnect", items, 2, 2)?;
                Packet::Disconnect { reason: f.text(1)? }
            }
            _ => return Err(ProtocolError::UnknownPacketType(packet_type)),
        };
        Ok(packet)
    }
}

// ── Field extraction ─────────────────────────────────────────────

struct Fields {
    packet: &'static str,
    items: Vec<Value>,
}

impl Fields {
    /// `min` and `max` count the packet type too.
    fn new(packet: &'static str, items: Vec<Value>, min: usize, max: usize) -> Result<Self, ProtocolError> {
        if items.len() < min {
            return Err(ProtocolError::MissingField {
                packet,
                index: items.len(),
            });
        }
        if items.len() > max {
            return Err(ProtocolError::TrailingFields {
                packet,
                fields: items.len(),
                max,
            });
        }
        Ok(Self { packet, items })
    }

    fn get(&self, index: usize) -> Result<&Value, ProtocolError> {
        self.items.get(index).ok_or(ProtocolError::MissingField {
            packet: self.packet,
            index,
        })
    }

    fn wrong(&self, index: usize, expected: &'static str) -> ProtocolError {
        ProtocolError::FieldType {
            packet: self.packet,
            index,
            expected,
        }
    }

    /// An integer that must fit the target type.
    fn int<T: TryFrom<i64>>(&self, index: usize) -> Result<T, ProtocolError> {
        let n = self
            .get(index)?
            .as_int()
            .ok_or_else(|| self.wrong(index, "an integer"))?;
        T::try_from(n).map_err(|_| self.wrong(index, "an integer in range"))
    }

    fn take(&mut self, index: usize) -> Result<Value, ProtocolError> {
        self.get(index)?;
        Ok(std::mem::replace(&mut self.items[index], Value::Int(0)))
    }

    fn bytes(&mut self, index: usize) -> Result<Vec<u8>, ProtocolError> {
        match self.take(index)? {
            Value::Bytes(b) => Ok(b),
            _ => Err(self.wrong(index, "a byte string")),
        }
    }

    /// A name sent as a byte string, such as an encoding.
    fn name(&mut self, index: usize) -> Result<String, ProtocolError> {
        let bytes = self.bytes(index)?;
        String::from_utf8(bytes).map_err(|_| self.wrong(index, "a utf-8 byte string"))
    }

    /// Free text, sent as a text value.
    fn text(&mut self, index: usize) -> Result<String, ProtocolError> {
        match self.take(index)? {
            Value::Str(s) => Ok(s),
            _ => Err(self.wrong(index, "a text string")),
        }
    }

    fn dict(&mut self, index: usize) -> Result<Options, ProtocolError> {
        match self.take(index)? {
            Value::Dict(map) => Ok(map),
            _ => Err(self.wrong(index, "a dict")),
        }
    }

    fn optional<T>(
        &mut self,
        index: usize,
        field: fn(&mut Self, usize) -> Result<T, ProtocolError>,
    ) -> Result<Option<T>, ProtocolError> {
        if index >= self.items.len() {
            return Ok(None);
        }
        field(self, index).map(Some)
    }
}

// ── Tests ────────────────────────────────────────────────────────
