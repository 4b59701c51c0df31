//! Incremental SSE record decoder for the upstream chat stream.
//!
//! Network reads arrive at arbitrary byte boundaries: one read may hold several
//! records, and one record may span several reads. The decoder keeps the
//! undelimited tail in a pending buffer and only parses records once their
//! blank-line separator has been seen.

use bytes::BytesMut;
use memchr::memmem;
use std::sync::LazyLock;

use crate::error::BridgeError;
use crate::protocol::chat::ChatStreamChunk;

/// Separator written between outbound records.
pub const RECORD_SEPARATOR: &[u8] = b"\n\n";
/// Field prefix of a data line.
pub const DATA_PREFIX: &str = "data: ";
/// Payload of the end-of-stream record.
pub const DONE_MARKER: &str = "[DONE]";

/// One decoded upstream record.
#[derive(Debug, Clone, PartialEq)]
pub enum SseRecord {
    /// The `[DONE]` end-of-stream marker.
    Terminal,
    /// A chat-delta event.
    Event(ChatStreamChunk),
}

/// Pending-buffer state machine splitting a byte stream into [`SseRecord`]s.
#[derive(Debug, Default)]
pub struct SseRecordDecoder {
    pending: BytesMut,
    scan_from: usize,
}

impl SseRecordDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: BytesMut::with_capacity(4096),
            scan_from: 0,
        }
    }

    /// Bytes received but not yet closed by a record separator.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Append one network chunk and push every fully delimited record to `out`.
    ///
    /// Records decoded before a malformed one are still pushed.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] on invalid UTF-8 or an unparsable event payload.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<SseRecord>) -> Result<(), BridgeError> {
        self.pending.extend_from_slice(chunk);
        loop {
            let Some((record_end, separator_len)) =
                find_record_separator_from(&self.pending, self.scan_from)
            else {
                // Keep a small overlap so a separator split across reads is still found.
                self.scan_from = self.pending.len().saturating_sub(3);
                return Ok(());
            };
            let raw = self.pending.split_to(record_end + separator_len);
            self.scan_from = 0;
            if let Some(record) = parse_record(&raw[..record_end])? {
                out.push(record);
            }
        }
    }

    /// Flush the undelimited tail left when the upstream closes.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] if the tail is a malformed record.
    pub fn finish(&mut self, out: &mut Vec<SseRecord>) -> Result<(), BridgeError> {
        self.scan_from = 0;
        if self.pending.is_empty() {
            return Ok(());
        }
        let raw = self.pending.split();
        if let Some(record) = parse_record(&raw)? {
            out.push(record);
        }
        Ok(())
    }
}

#[inline]
fn find_record_separator_from(buffer: &[u8], scan_from: usize) -> Option<(usize, usize)> {
    static LF_LF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\n\n"));
    static CRLF_CRLF_FINDER: LazyLock<memmem::Finder<'static>> =
        LazyLock::new(|| memmem::Finder::new(b"\r\n\r\n"));

    let scan_from = scan_from.min(buffer.len());
    let haystack = &buffer[scan_from..];
    let lf_lf_pos = LF_LF_FINDER.find(haystack).map(|rel| scan_from + rel);
    let crlf_crlf_pos = CRLF_CRLF_FINDER.find(haystack).map(|rel| scan_from + rel);

    match (lf_lf_pos, crlf_crlf_pos) {
        (Some(lf_pos), Some(crlf_pos)) => {
            if lf_pos <= crlf_pos {
                Some((lf_pos, 2))
            } else {
                Some((crlf_pos, 4))
            }
        }
        (Some(lf_pos), None) => Some((lf_pos, 2)),
        (None, Some(crlf_pos)) => Some((crlf_pos, 4)),
        (None, None) => None,
    }
}

/// Parse one record (without its separator).
///
/// Returns `Ok(None)` for records carrying no `data:` field, such as
/// keep-alive comments or stray blank lines.
///
/// # Errors
///
/// Returns [`BridgeError::Decode`] on invalid UTF-8 or an unparsable payload.
pub fn parse_record(raw: &[u8]) -> Result<Option<SseRecord>, BridgeError> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| BridgeError::Decode(format!("upstream record is not UTF-8: {e}")))?;

    let mut data: Option<String> = None;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let Some(value) = line.strip_prefix("data:") else {
            // event:/id:/retry: carry nothing we forward.
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(buf) => {
                buf.push('\n');
                buf.push_str(value);
            }
            None => data = Some(value.to_owned()),
        }
    }

    let Some(data) = data else {
        return Ok(None);
    };
    if data.trim() == DONE_MARKER {
        return Ok(Some(SseRecord::Terminal));
    }
    serde_json::from_str::<ChatStreamChunk>(&data)
        .map(|chunk| Some(SseRecord::Event(chunk)))
        .map_err(|e| BridgeError::Decode(format!("invalid upstream event payload: {e}")))
}
