//! Buffered decoder for newline-delimited JSON model streams.
//!
//! Ollama streams one JSON object per line, and a line may be split across
//! several network chunks.

use serde_json::Value;

/// Splits an NDJSON byte stream into parsed lines.
///
/// Bytes are buffered until a newline arrives, so both JSON objects and
/// multi-byte characters may straddle chunk boundaries. Lines that are not
/// valid JSON are skipped.
///
/// # Example
///
/// ```
/// use llm_prompt_fn::streaming::StreamingDecoder;
///
/// let mut decoder = StreamingDecoder::new();
/// assert!(decoder.decode(b"{\"message\":").is_empty());
///
/// let values = decoder.decode(b"{\"content\":\"hi\"}}\n");
/// assert_eq!(values[0]["message"]["content"], "hi");
/// ```
#[derive(Debug)]
pub struct StreamingDecoder {
    buffer: Vec<u8>,
}

impl StreamingDecoder {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed a raw chunk and return every line it completed.
    pub fn decode(&mut self, chunk: &[u8]) -> Vec<Value> {
        self.buffer.extend_from_slice(chunk);

        let mut values = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(value) = parse_line(&line) {
                values.push(value);
            }
        }
        values
    }

    /// Parse whatever is left in the buffer once the stream has ended.
    ///
    /// A truncated trailing line is dropped: its tokens were never complete.
    pub fn flush(&mut self) -> Option<Value> {
        let remaining = std::mem::take(&mut self.buffer);
        parse_line(&remaining)
    }
}

fn parse_line(line: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    serde_json::from_str(text).ok()
}

impl Default for StreamingDecoder {
    fn default() -> Self {
        Self::new()
    }
}
