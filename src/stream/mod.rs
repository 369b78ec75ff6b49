pub mod emitter;
pub mod sse;

pub use emitter::{ChatFrame, SseEmitter};
pub use sse::SseDecoder;
