//! Line-delimited JSON framing over a byte stream.
//!
//! The bridge's transmitter always appends `\n`; foreign transmitters may
//! not. The framer accepts both: it drains every newline-delimited message
//! first, then, if the remaining bytes parse in full as a JSON value, emits
//! that value too. Anything else stays buffered for the next read.

use serde_json::Value;
use thiserror::Error;

/// Receive-buffer cap. A peer that exceeds it without producing a complete
/// message is dropped.
pub const MAX_BUFFER_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("receive buffer exceeded {max} bytes without a complete message")]
    BufferOverflow { max: usize },
}

/// One extraction from the stream.
#[derive(Debug)]
pub enum Frame {
    Message(Value),
    /// A complete newline-delimited candidate that failed to parse. The
    /// stream continues at the next newline.
    Malformed {
        raw: String,
        error: serde_json::Error,
    },
}

/// Stateful per-connection framer.
#[derive(Debug)]
pub struct FramedConnection {
    buffer: Vec<u8>,
    max_buffer: usize,
}

impl Default for FramedConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl FramedConnection {
    pub fn new() -> Self {
        Self::with_buffer_limit(MAX_BUFFER_BYTES)
    }

    pub fn with_buffer_limit(max_buffer: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_buffer,
        }
    }

    /// Append `bytes` and extract every complete message now available.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(bytes);

        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let candidate = String::from_utf8_lossy(&line);
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            match serde_json::from_str(candidate) {
                Ok(value) => frames.push(Frame::Message(value)),
                Err(error) => frames.push(Frame::Malformed {
                    raw: candidate.to_string(),
                    error,
                }),
            }
        }

        // A trailing message may arrive without its newline. Only emit it if
        // the whole remainder parses; a prefix of a longer message stays put.
        if !self.buffer.is_empty() {
            let tail = String::from_utf8_lossy(&self.buffer);
            let tail = tail.trim();
            if tail.is_empty() {
                self.buffer.clear();
            } else if let Ok(value) = serde_json::from_str::<Value>(tail) {
                frames.push(Frame::Message(value));
                self.buffer.clear();
            }
        }

        if self.buffer.len() > self.max_buffer {
            self.buffer.clear();
            return Err(FrameError::BufferOverflow {
                max: self.max_buffer,
            });
        }

        Ok(frames)
    }

    /// Bytes held back awaiting completion.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn messages(frames: Vec<Frame>) -> Vec<Value> {
        frames
            .into_iter()
            .map(|f| match f {
                Frame::Message(v) => v,
                Frame::Malformed { raw, error } => panic!("malformed '{raw}': {error}"),
            })
            .collect()
    }

    #[test]
    fn round_trips_at_arbitrary_chunk_boundaries() {
        let originals = vec![
            json!({"command": "menu.execute", "id": "1", "params": {"menuItem": "File/Save"}}),
            json!({"status": "success", "result": {"success": true}, "id": "1"}),
            json!({"event": "compile", "payload": {"errors": 0, "note": "日本語も通る"}}),
        ];
        let mut stream = String::new();
        for value in &originals {
            stream.push_str(&value.to_string());
            stream.push('\n');
        }
        let bytes = stream.as_bytes();

        for chunk_size in [1, 2, 3, 5, 7, 16, bytes.len()] {
            let mut framer = FramedConnection::new();
            let mut received = Vec::new();
            for chunk in bytes.chunks(chunk_size) {
                received.extend(messages(framer.feed(chunk).unwrap()));
            }
            assert_eq!(received, originals, "chunk_size {chunk_size}");
            assert_eq!(framer.buffered_len(), 0);
        }
    }

    #[test]
    fn final_message_without_newline_is_emitted() {
        let mut framer = FramedConnection::new();
        let frames = framer
            .feed(br#"{"a":1}
{"status":"success","id":"9"}"#)
            .unwrap();
        let received = messages(frames);
        assert_eq!(received.len(), 2);
        assert_eq!(received[1]["id"], "9");
        assert_eq!(framer.buffered_len(), 0);
    }

    #[test]
    fn incomplete_tail_is_held_for_next_feed() {
        let mut framer = FramedConnection::new();
        let frames = framer.feed(br#"{"id":"1","status"#).unwrap();
        assert!(frames.is_empty());
        assert!(framer.buffered_len() > 0);

        let frames = framer.feed(b"\":\"success\"}\n").unwrap();
        let received = messages(frames);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["status"], "success");
    }

    #[test]
    fn malformed_line_reported_and_stream_continues() {
        let mut framer = FramedConnection::new();
        let frames = framer.feed(b"not json at all\n{\"ok\":true}\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], Frame::Malformed { raw, .. } if raw == "not json at all"));
        assert!(matches!(&frames[1], Frame::Message(v) if v["ok"] == true));
    }

    #[test]
    fn empty_and_whitespace_lines_are_discarded() {
        let mut framer = FramedConnection::new();
        let frames = framer.feed(b"\n  \r\n{\"ok\":1}\n\n").unwrap();
        let received = messages(frames);
        assert_eq!(received, vec![json!({"ok": 1})]);
    }

    #[test]
    fn multibyte_character_split_across_feeds() {
        let value = json!({"deviceName": "编辑器"});
        let line = format!("{value}\n");
        let bytes = line.as_bytes();
        // Split inside a UTF-8 sequence.
        let split = bytes.len() - 4;

        let mut framer = FramedConnection::new();
        assert!(framer.feed(&bytes[..split]).unwrap().is_empty());
        let received = messages(framer.feed(&bytes[split..]).unwrap());
        assert_eq!(received, vec![value]);
    }

    #[test]
    fn oversized_buffer_is_an_error() {
        let mut framer = FramedConnection::with_buffer_limit(64);
        let blob = vec![b'x'; 65];
        match framer.feed(&blob) {
            Err(FrameError::BufferOverflow { max }) => assert_eq!(max, 64),
            other => panic!("expected overflow, got {other:?}"),
        }
        // The connection-owner drops the socket; the framer itself resets.
        assert_eq!(framer.buffered_len(), 0);
    }
}
