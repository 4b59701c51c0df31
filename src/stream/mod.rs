pub mod pipeline;
pub mod sse;
pub mod translator;

pub use pipeline::{PipelineStatus, TranslationPipeline};
pub use sse::{SseRecord, SseRecordDecoder};
pub use translator::{translate_event, StreamState};
