use crate::header::HeaderTag;
use std::collections::BTreeMap;

/// A header/body frame sent as a single WebSocket binary message.
///
/// Encoding is `[header_count: u8] ([tag: u8][len: u32 BE][value bytes])* [body: remaining bytes]`.
/// This layout is this crate's own concrete choice for the framed-binary
/// transport the protocol assumes; only the header tag bytes themselves
/// are part of the wire contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    headers: BTreeMap<u8, Vec<u8>>,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated")]
    Truncated,
    #[error("header value exceeds {0} bytes")]
    HeaderTooLarge(usize),
}

const MAX_HEADER_VALUE_LEN: usize = u32::MAX as usize;

impl Frame {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_header(&mut self, tag: HeaderTag, value: impl Into<Vec<u8>>) {
        self.headers.insert(tag as u8, value.into());
    }

    #[must_use]
    pub fn header(&self, tag: HeaderTag) -> Option<&[u8]> {
        self.headers.get(&(tag as u8)).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.headers.clear();
        self.body.clear();
    }

    pub fn set_action(&mut self, action: crate::Action) {
        self.set_header(HeaderTag::Action, action.as_str().as_bytes().to_vec());
    }

    #[must_use]
    pub fn action(&self) -> Option<crate::Action> {
        let raw = self.header(HeaderTag::Action)?;
        crate::Action::from_str(std::str::from_utf8(raw).ok()?)
    }

    pub fn set_status(&mut self, status: crate::Status) {
        self.set_header(HeaderTag::Status, status.as_str().as_bytes().to_vec());
    }

    #[must_use]
    pub fn status(&self) -> Option<crate::Status> {
        let raw = self.header(HeaderTag::Status)?;
        crate::Status::from_str(std::str::from_utf8(raw).ok()?)
    }

    #[must_use]
    pub fn header_str(&self, tag: HeaderTag) -> Option<&str> {
        std::str::from_utf8(self.header(tag)?).ok()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(self.body.len() + 16);
        let count = u8::try_from(self.headers.len()).map_err(|_| FrameError::HeaderTooLarge(255))?;
        out.push(count);
        for (tag, value) in &self.headers {
            if value.len() > MAX_HEADER_VALUE_LEN {
                return Err(FrameError::HeaderTooLarge(MAX_HEADER_VALUE_LEN));
            }
            out.push(*tag);
            out.extend_from_slice(&(value.len() as u32).to_be_bytes());
            out.extend_from_slice(value);
        }
        out.extend_from_slice(&self.body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut cursor = 0usize;
        let count = *bytes.first().ok_or(FrameError::Truncated)? as usize;
        cursor += 1;
        let mut headers = BTreeMap::new();
        for _ in 0..count {
            let tag = *bytes.get(cursor).ok_or(FrameError::Truncated)?;
            cursor += 1;
            let len_bytes: [u8; 4] = bytes
                .get(cursor..cursor + 4)
                .ok_or(FrameError::Truncated)?
                .try_into()
                .map_err(|_| FrameError::Truncated)?;
            cursor += 4;
            let len = u32::from_be_bytes(len_bytes) as usize;
            let value = bytes.get(cursor..cursor + len).ok_or(FrameError::Truncated)?;
            cursor += len;
            headers.insert(tag, value.to_vec());
        }
        let body = bytes.get(cursor..).unwrap_or_default().to_vec();
        Ok(Self { headers, body })
    }
}
