use tracing::{debug, warn};

use crate::event::SseEvent;

const DATA_PREFIX: &str = "data: ";
const DONE_SENTINEL: &str = "[DONE]";

/// Incremental decoder from raw response bytes to [`SseEvent`]s.
///
/// Bytes are buffered until a `\n` arrives. Because `\n` never occurs inside
/// a multi-byte UTF-8 sequence, characters split across network reads are
/// reassembled before any text decoding happens.
#[derive(Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    skipped: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns the events of every line it completed.
    ///
    /// The carry-over never holds a `\n`, so only the new bytes are scanned
    /// and consumed lines are drained once per call.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let scan_from = self.buf.len();
        let mut buf = std::mem::take(&mut self.buf);
        buf.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut line_start = 0;
        for (offset, byte) in buf[scan_from..].iter().enumerate() {
            if *byte == b'\n' {
                let end = scan_from + offset;
                self.decode_into(&buf[line_start..end], &mut events);
                line_start = end + 1;
            }
        }
        buf.drain(..line_start);
        self.buf = buf;
        events
    }

    /// Flushes the carry-over at end of stream as if it were a final line.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buf);
        let mut events = Vec::new();
        if !line.is_empty() {
            self.decode_into(&line, &mut events);
        }
        events
    }

    /// Number of malformed frames skipped so far.
    pub fn skipped_frames(&self) -> usize {
        self.skipped
    }

    fn decode_into(&mut self, line: &[u8], events: &mut Vec<SseEvent>) {
        let text = String::from_utf8_lossy(line);
        match decode_line(&text) {
            Some(Ok(event)) => events.push(event),
            Some(Err(err)) => {
                self.skipped += 1;
                warn!(error = %err, line = %text.trim(), "skipping malformed stream frame");
            }
            None => {}
        }
    }
}

/// Decodes a single line.
///
/// Returns `None` for lines that are not `data: ` frames and for the
/// `[DONE]` sentinel.
pub fn decode_line(line: &str) -> Option<Result<SseEvent, serde_json::Error>> {
    let payload = line.trim().strip_prefix(DATA_PREFIX)?.trim();
    if payload == DONE_SENTINEL {
        debug!("stream sent [DONE] sentinel");
        return None;
    }
    Some(serde_json::from_str(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = concat!(
        "data: {\"type\":\"start\"}\n",
        ": keep-alive comment\n",
        "data: {\"type\":\"chunk\",\"content\":\"héllo \"}\n",
        "\n",
        "data: {\"type\":\"chunk\",\"content\":\"wörld ✓\"}\r\n",
        "data: [DONE]\n",
        "data: {\"type\":\"complete\"}\n",
    );

    fn decode_all(chunks: &[&[u8]]) -> Vec<SseEvent> {
        let mut decoder = EventDecoder::new();
        let mut out = Vec::new();
        for chunk in chunks {
            out.extend(decoder.push_chunk(chunk));
        }
        out.extend(decoder.finish());
        out
    }

    #[test]
    fn decodes_frames_in_order() {
        let events = decode_all(&[PAYLOAD.as_bytes()]);
        assert_eq!(
            events,
            vec![
                SseEvent::Start { session_id: None },
                SseEvent::Chunk {
                    content: "héllo ".into()
                },
                SseEvent::Chunk {
                    content: "wörld ✓".into()
                },
                SseEvent::Complete { session_id: None },
            ]
        );
    }

    #[test]
    fn chunk_boundaries_do_not_change_the_event_sequence() {
        let bytes = PAYLOAD.as_bytes();
        let expected = decode_all(&[bytes]);
        for size in 1..=bytes.len() {
            let chunks: Vec<&[u8]> = bytes.chunks(size).collect();
            assert_eq!(decode_all(&chunks), expected, "chunk size {size}");
        }
        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(decode_all(&[a, b]), expected, "split at {split}");
        }
    }

    #[test]
    fn partial_line_is_held_back() {
        let mut decoder = EventDecoder::new();
        assert!(
            decoder
                .push_chunk(b"data: {\"type\":\"chunk\",\"content\":\"hel")
                .is_empty()
        );
        let events = decoder.push_chunk(b"lo\"}\n");
        assert_eq!(
            events,
            vec![SseEvent::Chunk {
                content: "hello".into()
            }]
        );
    }

    #[test]
    fn done_sentinel_never_produces_an_event() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push_chunk(b"data: [DONE]\n").is_empty());
        assert!(decoder.push_chunk(b"  data:   [DONE]  \n").is_empty());
        assert_eq!(decoder.skipped_frames(), 0);
    }

    #[test]
    fn malformed_frame_is_skipped_and_decoding_continues() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push_chunk(
            b"data: {not json\ndata: {\"type\":\"chunk\",\"content\":\"ok\"}\n",
        );
        assert_eq!(
            events,
            vec![SseEvent::Chunk {
                content: "ok".into()
            }]
        );
        assert_eq!(decoder.skipped_frames(), 1);
    }

    #[test]
    fn long_line_in_single_byte_reads() {
        let content = "x".repeat(4096);
        let line = format!("data: {{\"type\":\"chunk\",\"content\":\"{content}\"}}\ndata: {{\"type\":\"complete\"}}\n");
        let mut decoder = EventDecoder::new();
        let mut events = Vec::new();
        for byte in line.as_bytes() {
            events.extend(decoder.push_chunk(std::slice::from_ref(byte)));
        }
        assert_eq!(
            events,
            vec![
                SseEvent::Chunk { content },
                SseEvent::Complete { session_id: None }
            ]
        );
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn frames_with_loosely_typed_fields_are_kept() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push_chunk(concat!(
            "data: {\"type\":\"message\",\"role\":\"assistant\",\"content\":\"hello\",\"timestamp\":1700000000}\n",
            "data: {\"type\":\"tool_result\",\"status\":\"success\",\"output\":{\"files\":[\"a\"]}}\n",
            "data: {\"type\":\"chunk\",\"content\":null}\n",
        ).as_bytes());
        let kinds: Vec<_> = events.iter().filter_map(SseEvent::kind).collect();
        assert_eq!(kinds, vec!["message", "tool_result", "chunk"]);
        assert_eq!(decoder.skipped_frames(), 0);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push_chunk(b"event: chunk\nid: 7\ndata:{\"type\":\"chunk\"}\n");
        assert!(events.is_empty());
        assert_eq!(decoder.skipped_frames(), 0);
    }

    #[test]
    fn finish_flushes_unterminated_last_line() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push_chunk(b"data: {\"type\":\"complete\"}").is_empty());
        assert_eq!(
            decoder.finish(),
            vec![SseEvent::Complete { session_id: None }]
        );
        assert!(decoder.finish().is_empty());
    }
}
