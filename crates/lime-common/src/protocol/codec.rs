//! Envelope framing codec
//!
//! This module implements the stream framing for LIME envelopes. Each
//! envelope is one compact JSON object; the decoder bounds frames on the
//! closing brace of the top-level object and tolerates any whitespace
//! between envelopes (the encoder terminates each one with a newline).
//!
//! ## Frame Format
//!
//! ```text
//! {"id":"...","state":"new"}\n{"id":"...","state":"negotiating",...}\n
//! ```
//!
//! The decoder enforces a maximum bytes-per-frame ceiling so a flood of
//! unterminated JSON cannot exhaust memory.

use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::document::DocumentRegistry;
use crate::error::{LimeError, Result};
use crate::protocol::envelope::Envelope;
use crate::protocol::{RawEnvelope, DEFAULT_READ_LIMIT};

/// Codec for encoding and decoding LIME envelopes
///
/// This codec handles:
/// - Self-delimited JSON framing with inter-envelope whitespace
/// - Read-limit enforcement
/// - Two-phase envelope deserialization through the document registry
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    /// Registry resolving document payload types
    registry: Arc<DocumentRegistry>,
    /// Maximum allowed frame size
    read_limit: usize,
}

impl EnvelopeCodec {
    /// Create a new codec with default settings
    pub fn new(registry: Arc<DocumentRegistry>) -> Self {
        Self {
            registry,
            read_limit: DEFAULT_READ_LIMIT,
        }
    }

    /// Create a codec with a custom read limit
    pub fn with_read_limit(mut self, read_limit: usize) -> Self {
        self.read_limit = read_limit;
        self
    }

    pub fn read_limit(&self) -> usize {
        self.read_limit
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new(Arc::new(DocumentRegistry::new()))
    }
}

/// Result of scanning the buffer for one complete JSON object
enum Scan {
    /// A complete object occupies the first `n` bytes
    Complete(usize),
    /// The object is not closed yet
    Partial,
    /// The buffer does not start with an object
    Invalid(u8),
}

/// Find the end of the first top-level JSON object in `buf`
///
/// Tracks brace depth outside of strings; the first byte must be `{`.
fn scan_object(buf: &[u8]) -> Scan {
    if buf[0] != b'{' {
        return Scan::Invalid(buf[0]);
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in buf.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Scan::Complete(i + 1);
                    }
                }
                _ => {}
            }
        }
    }

    Scan::Partial
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = LimeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Envelope>> {
        // Skip inter-envelope whitespace, including the trailing newline
        // the encoder emits after each entry
        while let Some(&b) = src.first() {
            if b.is_ascii_whitespace() {
                src.advance(1);
            } else {
                break;
            }
        }

        if src.is_empty() {
            return Ok(None);
        }

        match scan_object(src) {
            Scan::Complete(len) => {
                if len > self.read_limit {
                    return Err(LimeError::FrameTooLarge {
                        size: len,
                        limit: self.read_limit,
                    });
                }

                let frame = src.split_to(len);
                let raw: RawEnvelope = serde_json::from_slice(&frame)?;
                Envelope::from_raw(raw, &self.registry).map(Some)
            }
            Scan::Partial => {
                if src.len() > self.read_limit {
                    return Err(LimeError::FrameTooLarge {
                        size: src.len(),
                        limit: self.read_limit,
                    });
                }
                src.reserve(1);
                Ok(None)
            }
            Scan::Invalid(byte) => Err(LimeError::MalformedEnvelope(format!(
                "expected '{{' at frame start, got byte {byte:#04x}"
            ))),
        }
    }
}

impl<'a> Encoder<&'a Envelope> for EnvelopeCodec {
    type Error = LimeError;

    fn encode(&mut self, item: &'a Envelope, dst: &mut BytesMut) -> Result<()> {
        let raw = item.to_raw()?;
        let payload = serde_json::to_vec(&raw)?;

        if payload.len() > self.read_limit {
            return Err(LimeError::FrameTooLarge {
                size: payload.len(),
                limit: self.read_limit,
            });
        }

        dst.reserve(payload.len() + 1);
        dst.put_slice(&payload);
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::Message;
    use crate::protocol::session::{Session, SessionState};

    fn codec() -> EnvelopeCodec {
        EnvelopeCodec::default()
    }

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = codec();
        let mut buf = BytesMut::new();

        let mut session = Session::new(SessionState::New);
        session.header = session.header.id("c1");
        let envelope = Envelope::Session(session);

        codec.encode(&envelope, &mut buf).unwrap();
        assert_eq!(buf.last(), Some(&b'\n'));

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, envelope);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = codec();
        let mut buf = BytesMut::new();

        let envelope = Envelope::Message(Message::new("Hello world"));
        let mut full_buf = BytesMut::new();
        codec.encode(&envelope, &mut full_buf).unwrap();

        // Feed a prefix only
        buf.extend_from_slice(&full_buf[..10]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        // Feed the rest
        buf.extend_from_slice(&full_buf[10..]);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), envelope);
    }

    #[test]
    fn test_codec_two_envelopes_whitespace_delimited() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"  {\"event\":\"received\"} \r\n {\"event\":\"consumed\"}\n");

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Envelope::Notification(_)));
        assert!(matches!(second, Envelope::Notification(_)));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_codec_braces_inside_strings() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(
            br#"{"type":"text/plain","content":"braces } and \" quote {"}"#,
        );

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        let Envelope::Message(m) = decoded else {
            panic!("wrong envelope kind");
        };
        assert_eq!(
            m.content,
            crate::document::Document::Plain("braces } and \" quote {".to_string())
        );
    }

    #[test]
    fn test_codec_frame_too_large() {
        let mut codec = codec().with_read_limit(64);
        let mut buf = BytesMut::new();

        // 65 bytes of an unterminated object: one byte above the limit
        buf.extend_from_slice(b"{\"content\":\"");
        buf.extend_from_slice(&vec![b'a'; 53]);
        assert_eq!(buf.len(), 65);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(LimeError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_codec_complete_frame_over_limit() {
        let mut codec = codec().with_read_limit(16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(br#"{"event":"received"}"#);

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(LimeError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_codec_malformed_start() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"[1,2,3]");

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(LimeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_codec_empty_buffer() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"  \n ");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
