//! Decoding of the newline-delimited JSON body returned by `POST /api/chat`.
//!
//! The transport hands us byte chunks whose boundaries have nothing to do with
//! line boundaries. [`EventDecoder`] buffers bytes until a full line is
//! available and parses each line on its own; [`decode_stream`] drives it from
//! an async byte stream.

use crate::error::{ChatError, Result};
use crate::models::{ConversationId, ServerMessage};
use futures::{stream, Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

/// One decoded record from the chat response body.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Meta {
        #[serde(default)]
        conversation_id: Option<ConversationId>,
        #[serde(default)]
        user_message: Option<ServerMessage>,
    },
    Content {
        content: String,
    },
    Done {
        ai_message: ServerMessage,
    },
    Error {
        content: String,
    },
}

#[derive(Debug, Default)]
pub struct EventDecoder {
    buffer: Vec<u8>,
    skipped: usize,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns every event completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(event) = self.parse_line(start, end) {
                events.push(event);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);
        events
    }

    /// Ends decoding. An unterminated trailing line cannot be a complete
    /// record and is dropped; returns the number of bytes dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffer.len();
        if self.buffer.iter().any(|b| !b.is_ascii_whitespace()) {
            log::warn!("Discarding {} bytes of unterminated stream data", dropped);
        }
        self.buffer.clear();
        dropped
    }

    /// Number of non-blank lines that failed to decode so far.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }

    fn parse_line(&mut self, start: usize, end: usize) -> Option<StreamEvent> {
        let line = self.buffer[start..end].trim_ascii();
        if line.is_empty() {
            return None;
        }
        match serde_json::from_slice::<StreamEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                self.skipped += 1;
                log::warn!(
                    "Skipping malformed stream line: {} - Data: {}",
                    e,
                    String::from_utf8_lossy(line)
                );
                None
            }
        }
    }
}

struct DecodeState<S> {
    bytes: S,
    decoder: EventDecoder,
    ready: VecDeque<StreamEvent>,
    finished: bool,
    idle_timeout: Option<Duration>,
}

/// Turns a byte stream into a stream of events.
///
/// A transport error ends the stream after yielding it. When `idle_timeout` is
/// set and no chunk arrives within it, a [`ChatError::StreamIdle`] is yielded
/// and the stream ends.
pub fn decode_stream<S, B>(bytes: S, idle_timeout: Option<Duration>) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        bytes,
        decoder: EventDecoder::new(),
        ready: VecDeque::new(),
        finished: false,
        idle_timeout,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(event) = st.ready.pop_front() {
                return Some((Ok(event), st));
            }
            if st.finished {
                return None;
            }

            let next = match st.idle_timeout {
                Some(limit) => match tokio::time::timeout(limit, st.bytes.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        log::error!("No stream data received for {:?}, giving up", limit);
                        st.finished = true;
                        return Some((Err(ChatError::StreamIdle(limit)), st));
                    }
                },
                None => st.bytes.next().await,
            };

            match next {
                Some(Ok(chunk)) => {
                    let events = st.decoder.push(chunk.as_ref());
                    log::debug!("Decoded {} events from chunk", events.len());
                    st.ready.extend(events);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(e), st));
                }
                None => {
                    st.decoder.finish();
                    st.finished = true;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    const META: &str = r#"{"type":"meta","conversation_id":7,"user_message":{"id":42,"content":"hi","timestamp":"2024-05-01T10:00:00"}}"#;

    fn content(text: &str) -> StreamEvent {
        StreamEvent::Content {
            content: text.to_string(),
        }
    }

    #[test]
    fn keeps_partial_line_across_chunks() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(br#"{"type":"content","#).is_empty());
        let events = decoder.push(b"\"content\":\"Hel\"}\n{\"type\":\"content\",\"content\":\"lo\"}\n");
        assert_eq!(events, vec![content("Hel"), content("lo")]);
    }

    #[test]
    fn parses_meta_with_naive_timestamp() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(format!("{}\n", META).as_bytes());
        match &events[..] {
            [StreamEvent::Meta {
                conversation_id: Some(7),
                user_message: Some(msg),
            }] => assert_eq!(msg.id, 42),
            other => panic!("unexpected events: {:?}", other),
        }
    }

    #[test]
    fn skips_malformed_and_blank_lines() {
        let mut decoder = EventDecoder::new();
        let events = decoder.push(
            b"not json\n\n   \n{\"type\":\"content\",\"content\":\"a\"}\r\n{\"type\":\"bogus\"}\n{\"type\":\"error\",\"content\":\"boom\"}\n",
        );
        assert_eq!(
            events,
            vec![
                content("a"),
                StreamEvent::Error {
                    content: "boom".to_string()
                }
            ]
        );
        assert_eq!(decoder.skipped_lines(), 2);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let line = "{\"type\":\"content\",\"content\":\"héllo\"}\n".as_bytes();
        let split = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(&line[..split]).is_empty());
        assert_eq!(decoder.push(&line[split..]), vec![content("héllo")]);
    }

    #[test]
    fn finish_discards_unterminated_tail() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(br#"{"type":"content","content":"x"}"#).is_empty());
        assert_eq!(decoder.finish(), 32);
        assert!(decoder.push(b"\n").is_empty());
    }

    #[tokio::test]
    async fn decode_stream_yields_events_then_ends() {
        let chunks = vec![
            Ok(b"{\"type\":\"content\",\"con".to_vec()),
            Ok(b"tent\":\"Hel\"}\n{\"type\":\"content\",\"content\":\"lo\"}\n".to_vec()),
            Ok(b"{\"type\":\"content\",\"content\":\"tail\"}".to_vec()),
        ];
        let events: Vec<_> = decode_stream(stream::iter(chunks), None).collect().await;
        let events: Vec<_> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(events, vec![content("Hel"), content("lo")]);
    }

    #[tokio::test]
    async fn transport_error_ends_stream_after_pending_events() {
        let chunks: Vec<Result<Vec<u8>>> = vec![
            Ok(b"{\"type\":\"content\",\"content\":\"a\"}\n".to_vec()),
            Err(ChatError::Incomplete),
            Ok(b"{\"type\":\"content\",\"content\":\"b\"}\n".to_vec()),
        ];
        let events: Vec<_> = decode_stream(stream::iter(chunks), None).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].as_ref().unwrap(), &content("a"));
        assert!(matches!(events[1], Err(ChatError::Incomplete)));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_stream_times_out() {
        let first = stream::iter(vec![Ok(b"{\"type\":\"content\",\"content\":\"a\"}\n".to_vec())]);
        let bytes = first.chain(stream::pending::<Result<Vec<u8>>>());
        let events: Vec<_> = decode_stream(Box::pin(bytes), Some(Duration::from_secs(5)))
            .collect()
            .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Err(ChatError::StreamIdle(d)) if d == Duration::from_secs(5)));
    }
}
