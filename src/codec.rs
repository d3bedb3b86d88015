//! Canonical binary encoder.
//!
//! Wire bytes are produced by explicit byte extraction, never by
//! reinterpreting host memory. Big-endian is normative. Strings are UTF-8
//! with a u32 length prefix, optionals are a single presence byte (0 absent,
//! 1 present), and hash hex output is lowercase, fixed-width, unprefixed.
//! The encoder's output is the sole input to any hash associated with a
//! record, so it copies rather than aliasing caller buffers.

use anyhow::{anyhow, Result};

/// Append-only canonical byte writer.
#[derive(Debug, Default, Clone)]
pub struct CanonicalEncoder {
    buf: Vec<u8>,
}

impl CanonicalEncoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Finish encoding, taking ownership of the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16_be(&mut self, v: u16) {
        self.buf.push((v >> 8) as u8);
        self.buf.push(v as u8);
    }

    pub fn put_u32_be(&mut self, v: u32) {
        for shift in [24u32, 16, 8, 0] {
            self.buf.push((v >> shift) as u8);
        }
    }

    pub fn put_u64_be(&mut self, v: u64) {
        for shift in [56u32, 48, 40, 32, 24, 16, 8, 0] {
            self.buf.push((v >> shift) as u8);
        }
    }

    pub fn put_i32_be(&mut self, v: i32) {
        self.put_u32_be(v as u32);
    }

    pub fn put_i64_be(&mut self, v: i64) {
        self.put_u64_be(v as u64);
    }

    /// Raw bytes, copied.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// UTF-8 string with u32 big-endian length prefix.
    pub fn put_string(&mut self, s: &str) {
        let bytes = s.as_bytes();
        self.put_u32_be(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    /// Presence byte: 0 when absent, 1 followed by the encoded value.
    pub fn put_optional<T>(&mut self, value: Option<T>, encode: impl FnOnce(&mut Self, T)) {
        match value {
            None => self.put_u8(0),
            Some(v) => {
                self.put_u8(1);
                encode(self, v);
            }
        }
    }
}

/// Lowercase hex of a 32-byte hash: exactly 64 characters, no prefix.
pub fn hex_hash(hash: &[u8; 32]) -> String {
    hex::encode(hash)
}

/// Parse a 64-character lowercase hex hash.
pub fn parse_hex_hash(s: &str) -> Result<[u8; 32]> {
    if s.len() != 64 {
        return Err(anyhow!(
            "invalid hash hex length: expected 64 chars, got {}",
            s.len()
        ));
    }
    let bytes = hex::decode(s).map_err(|e| anyhow!("invalid hash hex: {}", e))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Big-endian u64 reader for decoders.
pub fn read_u64_be(bytes: &[u8]) -> Result<(u64, &[u8])> {
    if bytes.len() < 8 {
        return Err(anyhow!("truncated u64: {} bytes remain", bytes.len()));
    }
    let mut v = 0u64;
    for &b in &bytes[..8] {
        v = (v << 8) | b as u64;
    }
    Ok((v, &bytes[8..]))
}

/// Big-endian u32 reader for decoders.
pub fn read_u32_be(bytes: &[u8]) -> Result<(u32, &[u8])> {
    if bytes.len() < 4 {
        return Err(anyhow!("truncated u32: {} bytes remain", bytes.len()));
    }
    let mut v = 0u32;
    for &b in &bytes[..4] {
        v = (v << 8) | b as u32;
    }
    Ok((v, &bytes[4..]))
}

/// Canonical JSON: sorted keys, compact separators, no floats.
///
/// `serde_json::Map` is backed by a BTreeMap, so serializing a `Value` built
/// here yields sorted keys without a post-pass. Callers quantize any float
/// before insertion; this function rejects floating-point values outright.
pub fn canonical_json(value: &serde_json::Value) -> Result<String> {
    ensure_no_floats(value)?;
    Ok(serde_json::to_string(value)?)
}

fn ensure_no_floats(value: &serde_json::Value) -> Result<()> {
    match value {
        serde_json::Value::Number(n) => {
            if n.as_i64().is_none() && n.as_u64().is_none() {
                return Err(anyhow!(
                    "canonical json forbids floating-point numbers: {}",
                    n
                ));
            }
            Ok(())
        }
        serde_json::Value::Array(items) => items.iter().try_for_each(ensure_no_floats),
        serde_json::Value::Object(map) => map.values().try_for_each(ensure_no_floats),
        _ => Ok(()),
    }
}
