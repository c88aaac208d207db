//! Bencoded field values.
//!
//! ```text
//! integer      i<decimal>e          no leading zeros, no "-0"
//! byte string  <len>:<bytes>
//! text         u<len>:<utf-8>
//! list         l<value>*e
//! dict         d(<byte string key><value>)*e   keys strictly ascending
//! ```
//!
//! The decoder only accepts the canonical form the encoder writes, so
//! re-encoding a decoded value reproduces the input bytes exactly.

use std::collections::BTreeMap;

use crate::error::ProtocolError;

/// Nesting limit for lists and dicts.
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<Value>),
    Dict(BTreeMap<String, Value>),
}

impl Value {
    // ── Encoding ─────────────────────────────────────────────────

    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(n) => {
                out.push(b'i');
                out.extend_from_slice(n.to_string().as_bytes());
                out.push(b'e');
            }
            Value::Bytes(b) => encode_bytes(b, out),
            Value::Str(s) => {
                out.push(b'u');
                encode_bytes(s.as_bytes(), out);
            }
            Value::List(items) => {
                out.push(b'l');
                for item in items {
                    item.encode(out);
                }
                out.push(b'e');
            }
            Value::Dict(map) => {
                out.push(b'd');
                for (key, value) in map {
                    encode_bytes(key.as_bytes(), out);
                    value.encode(out);
                }
                out.push(b'e');
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    // ── Decoding ─────────────────────────────────────────────────

    /// Decode exactly one value spanning all of `data`.
    pub fn decode(data: &[u8]) -> Result<Value, ProtocolError> {
        let mut parser = Parser { data, pos: 0 };
        let value = parser.value(0)?;
        if parser.pos != data.len() {
            return Err(parser.error("trailing bytes after value"));
        }
        Ok(value)
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Raw bytes of a byte string or a text value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            Value::Str(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Text of a text value, or of a byte string holding valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Dict(map) => Some(map),
            _ => None,
        }
    }

    /// Short type name for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bytes(_) => "bytes",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
        }
    }
}

fn encode_bytes(b: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(b.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(b);
}

// ── Conversions ──────────────────────────────────────────────────

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n.into())
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n.into())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(b.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Dict(map)
    }
}

// ── Parser ───────────────────────────────────────────────────────

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &'static str) -> ProtocolError {
        ProtocolError::Malformed {
            offset: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Result<u8, ProtocolError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| self.error("truncated"))
    }

    fn value(&mut self, depth: usize) -> Result<Value, ProtocolError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let n = self.integer(b'e')?;
                Ok(Value::Int(n))
            }
            b'0'..=b'9' => Ok(Value::Bytes(self.byte_string()?.to_vec())),
            b'u' => {
                self.pos += 1;
                let start = self.pos;
                let raw = self.byte_string()?;
                let text = std::str::from_utf8(raw).map_err(|_| ProtocolError::Malformed {
                    offset: start,
                    reason: "text is not valid utf-8",
                })?;
                Ok(Value::Str(text.to_owned()))
            }
            b'l' => {
                self.pos += 1;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value(depth + 1)?);
                }
                self.pos += 1;
                Ok(Value::List(items))
            }
            b'd' => {
                self.pos += 1;
                let mut map = BTreeMap::new();
                let mut last: Option<&[u8]> = None;
                while self.peek()? != b'e' {
                    if !self.peek()?.is_ascii_digit() {
                        return Err(self.error("dict key is not a byte string"));
                    }
                    let key_at = self.pos;
                    let key = self.byte_string()?;
                    if last.is_some_and(|prev| prev >= key) {
                        return Err(ProtocolError::Malformed {
                            offset: key_at,
                            reason: "dict keys not in ascending order",
                        });
                    }
                    last = Some(key);
                    let key_text = std::str::from_utf8(key).map_err(|_| ProtocolError::Malformed {
                        offset: key_at,
                        reason: "dict key is not valid utf-8",
                    })?;
                    let value = self.value(depth + 1)?;
                    map.insert(key_text.to_owned(), value);
                }
                self.pos += 1;
                Ok(Value::Dict(map))
            }
            _ => Err(self.error("unknown type marker")),
        }
    }

    /// Canonical decimal terminated by `end`.
    fn integer(&mut self, end: u8) -> Result<i64, ProtocolError> {
        let data = self.data;
        let start = self.pos;
        let rest = &data[start..];
        let len = rest
            .iter()
            .position(|&c| c == end)
            .ok_or_else(|| self.error("truncated"))?;
        let digits = &rest[..len];
        let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);
        if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
            return Err(self.error("not a decimal number"));
        }
        if unsigned[0] == b'0' && (unsigned.len() > 1 || unsigned.len() != digits.len()) {
            return Err(self.error("non-canonical number"));
        }
        let text = std::str::from_utf8(digits).map_err(|_| self.error("not a decimal number"))?;
        let n = text.parse::<i64>().map_err(|_| self.error("number out of range"))?;
        self.pos = start + len + 1;
        Ok(n)
    }

    fn byte_string(&mut self) -> Result<&'a [u8], ProtocolError> {
        if self.peek()? == b'-' {
            return Err(self.error("negative length"));
        }
        let len = self.integer(b':')?;
        let len = usize::try_from(len).map_err(|_| self.error("negative length"))?;
        let data = self.data;
        let start = self.pos;
        let end = start.checked_add(len).ok_or_else(|| self.error("length overflow"))?;
        if end > data.len() {
            return Err(self.error("truncated"));
        }
        self.pos = end;
        Ok(&data[start..end])
    }
}

// ── Tests ────────────────────────────────────────────────────────
