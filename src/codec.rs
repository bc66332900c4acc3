use serde::de::DeserializeOwned;

use crate::{LichessError, Result};

/// JSON decoding configuration shared by the transport and stream decoder.
///
/// Built once from [`ClientOptions`](crate::ClientOptions) when the client is
/// constructed and never changed afterwards.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct JsonCodec {
    max_line_bytes: usize,
}

impl JsonCodec {
    pub fn new(max_line_bytes: usize) -> Self {
        Self { max_line_bytes }
    }

    pub fn max_line_bytes(&self) -> usize {
        self.max_line_bytes
    }

    /// Decodes a complete response body.
    pub fn decode_body<T: DeserializeOwned>(&self, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body).map_err(|err| {
            LichessError::Decode(format!(
                "invalid response JSON: {err}; body: {}",
                String::from_utf8_lossy(body)
            ))
        })
    }

    /// Decodes one NDJSON line without its terminator.
    ///
    /// Returns `None` for heartbeat lines (empty or whitespace only).
    pub fn decode_line<T: DeserializeOwned>(&self, line: &[u8]) -> Option<Result<T>> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(serde_json::from_slice(line).map_err(|err| {
            LichessError::Decode(format!(
                "invalid NDJSON line: {err}; line: {}",
                String::from_utf8_lossy(line)
            ))
        }))
    }
}
