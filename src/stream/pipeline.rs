use crate::error::BridgeError;

use super::sse::{SseRecord, SseRecordDecoder};
use super::translator::{push_error_record, translate_record_into, RecordOutcome, StreamState};

/// Whether the outbound stream is still open after a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Open,
    Terminated,
}

/// Decoder plus translator for one response: one upstream chunk in, at most
/// one outbound buffer out.
#[derive(Debug, Default)]
pub struct TranslationPipeline {
    decoder: SseRecordDecoder,
    state: StreamState,
    records: Vec<SseRecord>,
}

impl TranslationPipeline {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: SseRecordDecoder::new(),
            state: StreamState::new(),
            records: Vec::with_capacity(4),
        }
    }

    #[must_use]
    pub fn state(&self) -> &StreamState {
        &self.state
    }

    /// Feed one upstream network chunk and append the translated bytes to `out`.
    ///
    /// Records decoded ahead of a malformed one are translated before the
    /// error is returned. A terminal seen ahead of the malformed record wins.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Decode`] for malformed upstream records and
    /// [`BridgeError::Internal`] if an outbound chunk cannot be encoded.
    pub fn push_chunk(
        &mut self,
        chunk: &[u8],
        out: &mut Vec<u8>,
    ) -> Result<PipelineStatus, BridgeError> {
        if self.state.is_terminated() {
            return Ok(PipelineStatus::Terminated);
        }
        let decoded = self.decoder.feed(chunk, &mut self.records);
        let status = self.drain_records(out)?;
        if status == PipelineStatus::Terminated {
            return Ok(status);
        }
        decoded.map(|()| status)
    }

    /// Flush whatever the upstream left undelimited at EOF.
    ///
    /// # Errors
    ///
    /// Same as [`TranslationPipeline::push_chunk`].
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<PipelineStatus, BridgeError> {
        if self.state.is_terminated() {
            return Ok(PipelineStatus::Terminated);
        }
        let decoded = self.decoder.finish(&mut self.records);
        let status = self.drain_records(out)?;
        if status == PipelineStatus::Terminated {
            return Ok(status);
        }
        decoded.map(|()| status)
    }

    /// Close the stream with a single error record.
    pub fn push_error(&mut self, err: &BridgeError, out: &mut Vec<u8>) {
        push_error_record(&err.client_message(), &mut self.state, out);
    }

    fn drain_records(&mut self, out: &mut Vec<u8>) -> Result<PipelineStatus, BridgeError> {
        for record in self.records.drain(..) {
            if translate_record_into(record, &mut self.state, out)? == RecordOutcome::Terminal {
                break;
            }
        }
        self.records.clear();
        if self.state.is_terminated() {
            Ok(PipelineStatus::Terminated)
        } else {
            Ok(PipelineStatus::Open)
        }
    }
}
