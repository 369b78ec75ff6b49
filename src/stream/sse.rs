//! SSE frame decoding and encoding.
//!
//! The decoder turns an upstream chunked response body into complete `data`
//! payloads, buffering partial lines so that a frame split across two reads
//! (including mid-way through a multi-byte UTF-8 sequence) is reassembled
//! intact. The encoding helpers produce the `data: <json>\n\n` frames the
//! downstream client consumes.

use memchr::memchr;

/// Terminal sentinel closing every stream, in both directions.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Incremental byte-level SSE decoder.
///
/// Feed raw body chunks in arrival order; complete `data` payloads are
/// appended to the caller's buffer. Field semantics follow the SSE spec:
/// - `data:` lines accumulate (multiple lines joined with `\n`), one leading
///   space after the colon is stripped
/// - an empty line dispatches the accumulated payload
/// - `:` comment lines are ignored
/// - other field names (`event:`, `id:`, `retry:`) are ignored, the upstream
///   chat protocol only uses unnamed data frames
#[derive(Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
    has_data: bool,
}

impl SseDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; push every completed `data` payload onto `out`.
    pub fn feed(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(rel_pos) = memchr(b'\n', &self.buffer[consumed..]) {
            let line_end = consumed + rel_pos;
            let mut line = &self.buffer[consumed..line_end];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            Self::process_line(line, &mut self.data, &mut self.has_data, out);
            consumed = line_end + 1;
        }

        // Keep the unterminated tail for the next read.
        self.buffer.drain(..consumed);
    }

    fn process_line(line: &[u8], data: &mut String, has_data: &mut bool, out: &mut Vec<String>) {
        if line.is_empty() {
            // Empty line = dispatch frame
            if *has_data {
                out.push(std::mem::take(data));
                *has_data = false;
            }
            return;
        }

        if line.starts_with(b":") {
            return;
        }

        if let Some(mut value) = line.strip_prefix(b"data:") {
            if value.first() == Some(&b' ') {
                value = &value[1..];
            }
            if *has_data {
                data.push('\n');
            } else {
                *has_data = true;
            }
            data.push_str(&String::from_utf8_lossy(value));
        }
    }
}

/// Check for the terminal `[DONE]` payload.
#[must_use]
pub fn is_done(data: &str) -> bool {
    data.trim() == "[DONE]"
}

/// Format one outbound SSE frame (no event type, just data).
#[must_use]
pub fn data_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}
