//! SSE (Server-Sent Events) line parser and AG-UI event decoding.
//!
//! Converts a response body into a `Stream<Item = SseEvent>`.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

use proverbs_core::error::{ProverbsError, Result};
use proverbs_core::protocol::Event;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    /// Decode the data field as an AG-UI event.
    pub fn decode(&self) -> Result<Event> {
        serde_json::from_str(&self.data)
            .map_err(|e| ProverbsError::Protocol(format!("malformed event: {e}")))
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, String>> + Send>>;

/// Parse a reqwest response body as an SSE stream.
pub fn parse_response(response: reqwest::Response) -> impl Stream<Item = Result<SseEvent>> {
    parse_sse_stream(response.bytes_stream())
}

/// Parse any byte stream as SSE.
pub fn parse_sse_stream<S, E>(stream: S) -> impl Stream<Item = Result<SseEvent>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + 'static,
{
    let byte_stream: ByteStream = Box::pin(stream.map(|chunk| chunk.map_err(|e| e.to_string())));

    // Partial lines accumulate across chunks as bytes, so a multi-byte
    // character split between chunks survives.
    futures::stream::unfold(
        SseState {
            byte_stream,
            buffer: Vec::new(),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
        },
        |mut state| async move {
            loop {
                if let Some(newline_pos) = state.buffer.iter().position(|b| *b == b'\n') {
                    let raw: Vec<u8> = state.buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&raw[..newline_pos]);
                    let line = line.trim_end_matches('\r');

                    if line.is_empty() {
                        // Empty line = dispatch event
                        if let Some(event) = state.take_event() {
                            return Some((Ok(event), state));
                        }
                        continue;
                    }

                    if line.starts_with(':') {
                        continue;
                    }

                    let (field, value) = match line.split_once(':') {
                        Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                        None => (line, ""),
                    };
                    match field {
                        "event" => state.current_event = Some(value.to_string()),
                        "data" => state.current_data.push(value.to_string()),
                        "id" => state.current_id = Some(value.to_string()),
                        // retry and unknown fields
                        _ => {}
                    }
                    continue;
                }

                match state.byte_stream.next().await {
                    Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(ProverbsError::Protocol(format!("SSE stream error: {e}"))),
                            state,
                        ));
                    }
                    None => {
                        // Stream ended. A final unterminated line still counts.
                        if !state.buffer.is_empty() {
                            state.buffer.push(b'\n');
                            continue;
                        }
                        let last = state.take_event();
                        return last.map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

/// Decode AG-UI events from SSE, skipping frames that are not valid events.
pub fn decode_events<S>(events: S) -> impl Stream<Item = Result<Event>>
where
    S: Stream<Item = Result<SseEvent>>,
{
    events.filter_map(|item| match item {
        Ok(sse) => match sse.decode() {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, "Skipping undecodable event");
                None
            }
        },
        Err(e) => Some(Err(e)),
    })
}

struct SseState {
    byte_stream: ByteStream,
    buffer: Vec<u8>,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}

impl SseState {
    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            self.current_event = None;
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}
