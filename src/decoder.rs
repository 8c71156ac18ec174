use crate::error::DecodeError;
use serde_json::Value;
use tracing::trace;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Values recovered from one chunk, in wire order.
///
/// `error` is the failure that stopped decoding; everything in `values`
/// preceded it on the wire.
#[derive(Debug, Default)]
pub struct Decoded {
    pub values: Vec<Value>,
    pub error: Option<DecodeError>,
}

/// Reassembles JSON values from arbitrarily split response chunks.
///
/// Values may be newline-delimited or simply concatenated. A chunk can carry
/// several values, and a value can span several chunks. Bytes are scanned
/// once; only complete values are handed to `serde_json`.
pub struct FrameDecoder {
    buf: Vec<u8>,
    // Scanner position within `buf`, kept across pushes.
    scanned: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    failed: bool,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            failed: false,
            max_frame_bytes,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Decoded {
        let mut decoded = Decoded::default();
        if self.failed {
            decoded.error = Some(DecodeError::Malformed(
                "decoder already failed".to_string(),
            ));
            return decoded;
        }

        self.buf.extend_from_slice(chunk);
        let mut consumed = 0;

        while self.scanned < self.buf.len() {
            let byte = self.buf[self.scanned];
            self.scanned += 1;

            if self.depth == 0 {
                match byte {
                    b'{' | b'[' => self.depth = 1,
                    b if b.is_ascii_whitespace() => consumed = self.scanned,
                    other => {
                        decoded.error = Some(DecodeError::Malformed(format!(
                            "unexpected byte {:?} between frames",
                            char::from(other)
                        )));
                        break;
                    }
                }
                continue;
            }

            if self.in_string {
                match byte {
                    _ if self.escaped => self.escaped = false,
                    b'\\' => self.escaped = true,
                    b'"' => self.in_string = false,
                    _ => {}
                }
                continue;
            }

            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        match serde_json::from_slice(&self.buf[consumed..self.scanned]) {
                            Ok(value) => decoded.values.push(value),
                            Err(err) => {
                                decoded.error = Some(DecodeError::Malformed(err.to_string()));
                                break;
                            }
                        }
                        consumed = self.scanned;
                    }
                }
                _ => {}
            }
        }

        if decoded.error.is_some() {
            self.failed = true;
            return decoded;
        }

        self.buf.drain(..consumed);
        self.scanned -= consumed;

        if self.buf.len() > self.max_frame_bytes {
            self.failed = true;
            decoded.error = Some(DecodeError::FrameTooLarge {
                len: self.buf.len(),
                limit: self.max_frame_bytes,
            });
        }

        trace!(
            values = decoded.values.len(),
            pending = self.buf.len(),
            "decoded chunk"
        );
        decoded
    }

    /// Checks that the stream did not stop in the middle of a value.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.depth > 0 {
            return Err(DecodeError::Truncated(self.buf.len()));
        }
        Ok(())
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(decoded: Decoded) -> Vec<Value> {
        assert_eq!(decoded.error, None);
        decoded.values
    }

    #[test]
    fn one_value_per_chunk() {
        let mut decoder = FrameDecoder::default();
        let decoded = values(decoder.push(br#"{"event":"done"}"#));
        assert_eq!(decoded, vec![json!({"event": "done"})]);
        decoder.finish().unwrap();
    }

    #[test]
    fn reassembles_values_split_across_chunks() {
        let mut decoder = FrameDecoder::default();
        assert!(values(decoder.push(br#"{"event":"data","data":{"story_"#)).is_empty());
        assert!(values(decoder.push(br#"content":"Hel"#)).is_empty());
        let decoded = values(decoder.push(b"lo\"}}\n"));
        assert_eq!(
            decoded,
            vec![json!({"event": "data", "data": {"story_content": "Hello"}})]
        );
        decoder.finish().unwrap();
    }

    #[test]
    fn splits_merged_chunks() {
        let mut decoder = FrameDecoder::default();
        let decoded = values(
            decoder.push(b"{\"event\":\"data\"}\n{\"event\":\"data\"}{\"event\":\"done\"}\n\n"),
        );
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2], json!({"event": "done"}));
    }

    #[test]
    fn brackets_inside_strings_are_ignored() {
        let mut decoder = FrameDecoder::default();
        assert!(values(decoder.push(br#"{"data":{"title":"a } \" ]"#)).is_empty());
        let decoded = values(decoder.push(br#" {"}}"#));
        assert_eq!(decoded, vec![json!({"data": {"title": "a } \" ] {"}})]);
    }

    #[test]
    fn splits_inside_multibyte_characters() {
        let text = "{\"data\":{\"title\":\"Café\"}}".as_bytes();
        let cut = text.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = FrameDecoder::default();
        assert!(values(decoder.push(&text[..cut])).is_empty());
        let decoded = values(decoder.push(&text[cut..]));
        assert_eq!(decoded, vec![json!({"data": {"title": "Café"}})]);
    }

    #[test]
    fn values_before_a_malformed_frame_are_kept() {
        let mut decoder = FrameDecoder::default();
        let decoded = decoder.push(b"{\"id\":\"1\"}\n{\"event\": oops}\n{\"id\":\"2\"}\n");
        assert_eq!(decoded.values, vec![json!({"id": "1"})]);
        assert!(matches!(decoded.error, Some(DecodeError::Malformed(_))));

        let later = decoder.push(b"{}");
        assert!(later.values.is_empty());
        assert!(later.error.is_some());
    }

    #[test]
    fn stray_bytes_between_frames_are_malformed() {
        let mut decoder = FrameDecoder::default();
        let decoded = decoder.push(b"{}\nnull\n");
        assert_eq!(decoded.values, vec![json!({})]);
        assert!(matches!(decoded.error, Some(DecodeError::Malformed(_))));
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut decoder = FrameDecoder::new(16);
        let decoded = decoder.push(br#"{"data":{"story_content":"a very long story"#);
        assert!(matches!(
            decoded.error,
            Some(DecodeError::FrameTooLarge { limit: 16, .. })
        ));
    }

    #[test]
    fn large_frame_in_small_chunks() {
        let story = "x".repeat(64 * 1024);
        let frame = serde_json::to_vec(&json!({"data": {"story_content": story}})).unwrap();
        let mut decoder = FrameDecoder::default();
        let mut decoded = Vec::new();
        for chunk in frame.chunks(7) {
            decoded.extend(values(decoder.push(chunk)));
        }
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0]["data"]["story_content"].as_str().map(str::len), Some(64 * 1024));
    }

    #[test]
    fn truncated_stream_is_reported_on_finish() {
        let mut decoder = FrameDecoder::default();
        values(decoder.push(br#"{"event":"da"#));
        assert!(matches!(decoder.finish(), Err(DecodeError::Truncated(_))));

        let mut decoder = FrameDecoder::default();
        values(decoder.push(b"{}\n  \r\n"));
        decoder.finish().unwrap();
    }
}
