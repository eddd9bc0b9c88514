//! Streaming predictions
//!
//! The REST streaming surface answers with one JSON array whose elements
//! arrive incrementally. [`StreamingPrediction`] owns the connection and
//! splits the byte stream into complete top-level objects as they land,
//! yielding one typed record per chunk. Dropping it closes the connection.

use crate::error::{Error, Result};
use futures::Stream;
use serde_json::Value;

/// One record of a streaming prediction
#[derive(Debug, Clone)]
pub struct StreamingPredictionResponse {
    /// Concatenated text content of this chunk
    pub text: String,
    /// Citation metadata, when the server attaches it
    pub citations: Option<Value>,
    /// Full chunk message
    pub raw: Value,
}

impl StreamingPredictionResponse {
    fn from_chunk(raw: Value) -> Self {
        let text = extract_text(&raw);
        let citations = extract_citations(&raw);
        Self {
            text,
            citations,
            raw,
        }
    }
}

/// Pull the text content out of a chunk message
///
/// Chunks either carry the tensor shape (`outputs[].structVal.content
/// .stringVal[]`) or a flattened `content` field.
fn extract_text(chunk: &Value) -> String {
    if let Some(outputs) = chunk.get("outputs").and_then(|o| o.as_array()) {
        let mut text = String::new();
        for output in outputs {
            let strings = output
                .get("structVal")
                .and_then(|s| s.get("content"))
                .and_then(|c| c.get("stringVal"))
                .and_then(|v| v.as_array());
            if let Some(strings) = strings {
                for s in strings {
                    if let Some(s) = s.as_str() {
                        text.push_str(s);
                    }
                }
            }
        }
        return text;
    }
    chunk
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string()
}

fn extract_citations(chunk: &Value) -> Option<Value> {
    if let Some(metadata) = chunk.get("metadata") {
        if let Some(c) = metadata.get("citationMetadata") {
            return Some(c.clone());
        }
    }
    chunk.get("citationMetadata").cloned()
}

// ============================================================================
// Incremental array splitting
// ============================================================================

/// Splits an incrementally-arriving JSON array into its top-level elements
///
/// Tracks nesting depth and string state byte by byte, so element
/// boundaries are found without waiting for the array to finish.
struct ArraySplitter {
    buffer: Vec<u8>,
    scan_pos: usize,
    depth: i32,
    in_string: bool,
    escaped: bool,
    element_start: Option<usize>,
}

impl ArraySplitter {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            scan_pos: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            element_start: None,
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Scan forward and return the next complete element, if one is buffered
    fn next_element(&mut self) -> Result<Option<Value>> {
        while self.scan_pos < self.buffer.len() {
            let byte = self.buffer[self.scan_pos];
            self.scan_pos += 1;

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => {
                    // Depth 1 is inside the enclosing array; an element
                    // begins at depth 2
                    if self.depth == 1 && self.element_start.is_none() {
                        self.element_start = Some(self.scan_pos - 1);
                    }
                    self.depth += 1;
                }
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 1 {
                        if let Some(start) = self.element_start.take() {
                            let element = serde_json::from_slice(&self.buffer[start..self.scan_pos])
                                .map_err(|e| {
                                    Error::Internal(format!("malformed stream chunk: {}", e))
                                })?;
                            // Drop consumed bytes to keep the buffer bounded
                            self.buffer.drain(..self.scan_pos);
                            self.scan_pos = 0;
                            return Ok(Some(element));
                        }
                    }
                    if self.depth < 0 {
                        return Err(Error::Internal("unbalanced stream body".into()));
                    }
                }
                _ => {}
            }
        }
        Ok(None)
    }
}

/// A live server-streaming prediction
///
/// Finite and non-restartable. `next()` suspends at each record boundary;
/// `None` means the stream finished cleanly, including the zero-record
/// case.
pub struct StreamingPrediction {
    response: Option<reqwest::Response>,
    splitter: ArraySplitter,
}

impl std::fmt::Debug for StreamingPrediction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPrediction").finish_non_exhaustive()
    }
}

impl StreamingPrediction {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        Self {
            response: Some(response),
            splitter: ArraySplitter::new(),
        }
    }

    /// Await the next record
    pub async fn next(&mut self) -> Option<Result<StreamingPredictionResponse>> {
        loop {
            match self.splitter.next_element() {
                Ok(Some(chunk)) => {
                    return Some(Ok(StreamingPredictionResponse::from_chunk(chunk)));
                }
                Ok(None) => {}
                Err(e) => {
                    self.response = None;
                    return Some(Err(e));
                }
            }

            let response = self.response.as_mut()?;
            match response.chunk().await {
                Ok(Some(bytes)) => self.splitter.push(&bytes),
                Ok(None) => {
                    self.response = None;
                    return None;
                }
                Err(e) => {
                    self.response = None;
                    return Some(Err(Error::Internal(format!(
                        "streaming read failed: {}",
                        e
                    ))));
                }
            }
        }
    }

    /// Collect every remaining record
    pub async fn collect_all(mut self) -> Result<Vec<StreamingPredictionResponse>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await {
            records.push(record?);
        }
        Ok(records)
    }

    /// Adapt into a [`futures::Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Result<StreamingPredictionResponse>> {
        futures::stream::unfold(self, |mut this| async move {
            this.next().await.map(|record| (record, this))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn split_all(splitter: &mut ArraySplitter) -> Vec<Value> {
        let mut elements = Vec::new();
        while let Some(element) = splitter.next_element().unwrap() {
            elements.push(element);
        }
        elements
    }

    #[test]
    fn test_splitter_single_feed() {
        let mut splitter = ArraySplitter::new();
        splitter.push(br#"[{"content": "A"}, {"content": "B"}]"#);
        let elements = split_all(&mut splitter);
        assert_eq!(elements, vec![json!({"content": "A"}), json!({"content": "B"})]);
    }

    #[test]
    fn test_splitter_boundary_inside_string() {
        let mut splitter = ArraySplitter::new();
        splitter.push(br#"[{"content": "hel"#);
        assert!(split_all(&mut splitter).is_empty());
        splitter.push(br#"lo {\" }"}]"#);
        let elements = split_all(&mut splitter);
        assert_eq!(elements, vec![json!({"content": "hello {\" }"})]);
    }

    #[test]
    fn test_splitter_nested_structures() {
        let mut splitter = ArraySplitter::new();
        splitter.push(br#"[{"outputs": [{"structVal": {"content": {"stringVal": ["A"]}}}]}]"#);
        let elements = split_all(&mut splitter);
        assert_eq!(elements.len(), 1);
    }

    #[test]
    fn test_splitter_empty_array() {
        let mut splitter = ArraySplitter::new();
        splitter.push(b"[]");
        assert!(split_all(&mut splitter).is_empty());
    }

    #[test]
    fn test_extract_text_tensor_shape() {
        let chunk = json!({
            "outputs": [{"structVal": {"content": {"stringVal": ["A", "B"]}}}],
        });
        assert_eq!(extract_text(&chunk), "AB");
    }

    #[test]
    fn test_extract_text_flat_shape() {
        assert_eq!(extract_text(&json!({"content": "hello"})), "hello");
        assert_eq!(extract_text(&json!({"other": 1})), "");
    }

    #[test]
    fn test_extract_citations() {
        let chunk = json!({
            "metadata": {"citationMetadata": {"citations": [{"uri": "https://example.com"}]}},
        });
        let citations = extract_citations(&chunk).unwrap();
        assert_eq!(citations["citations"][0]["uri"], json!("https://example.com"));

        assert!(extract_citations(&json!({"content": "A"})).is_none());
    }
}
