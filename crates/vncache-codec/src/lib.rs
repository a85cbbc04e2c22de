//! Pluggable object serialization, with a compact JSON codec as the default.

use std::cell::RefCell;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("buffer capacity exceeded: wrote {written}, capacity {capacity}")]
    BufferFull { written: usize, capacity: usize },
}

/// A write sink a `Serializer` appends encoded bytes to. Abstracts over a
/// growable `Vec<u8>` and a caller-owned fixed-capacity buffer so callers
/// that already hold a scratch buffer don't need to allocate again.
pub trait BufferWriter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), CodecError>;
}

impl BufferWriter for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        self.extend_from_slice(bytes);
        Ok(())
    }
}

/// Fixed-capacity buffer writer over caller-owned storage.
pub struct FixedBufferWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> FixedBufferWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    #[must_use]
    pub fn written(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl BufferWriter for FixedBufferWriter<'_> {
    fn write(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        let end = self.len + bytes.len();
        if end > self.buf.len() {
            return Err(CodecError::BufferFull {
                written: end,
                capacity: self.buf.len(),
            });
        }
        self.buf[self.len..end].copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }
}

/// Object serializer interface. The default implementation is `JsonCodec`;
/// embedders may supply an alternate `Serializer` (e.g. a binary format)
/// through the same seam.
pub trait Serializer<T> {
    fn serialize(&self, value: &T, writer: &mut dyn BufferWriter) -> Result<(), CodecError>;
    /// Decode `bytes` into a value. Returns `Ok(None)` for empty input
    /// rather than treating it as a parse error.
    fn deserialize(&self, bytes: &[u8]) -> Result<Option<T>, CodecError>;
}

thread_local! {
    static SCRATCH: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

/// Compact, camelCase-friendly JSON codec. Wire DTOs opt into camelCase via
/// `#[serde(rename_all = "camelCase")]`; unknown fields on read are ignored
/// (the `serde_json` default), so older/newer peers can add fields without
/// breaking decode.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<T> Serializer<T> for JsonCodec
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    fn serialize(&self, value: &T, writer: &mut dyn BufferWriter) -> Result<(), CodecError> {
        SCRATCH.with(|scratch| {
            let mut buf = scratch.borrow_mut();
            buf.clear();
            serde_json::to_writer(&mut *buf, value)?;
            writer.write(&buf)
        })
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Option<T>, CodecError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(bytes)?))
    }
}
