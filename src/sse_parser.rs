//! Incremental Server-Sent Events decoder.
//!
//! Wraps a byte stream (typically `reqwest::Response::bytes_stream`) and
//! yields one [`SseEvent`] per dispatched event. Framing follows the SSE
//! wire format: fields accumulate until a blank line dispatches the
//! event, `:`-prefixed comment lines are skipped, a trailing `\r` is
//! stripped from each line, and multiple `data:` lines are joined with
//! newlines. An incomplete event at end of stream is discarded.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;

/// A single dispatched event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the server sent no `event:` field.
    pub event: String,
    /// Event payload, with multiple `data:` lines joined by `\n`.
    pub data: String,
}

/// Streaming SSE decoder over a chunked byte source.
pub struct SseParser<S> {
    inner: S,
    buffer: Vec<u8>,
    event_name: Option<String>,
    data_lines: Vec<String>,
    done: bool,
}

impl<S> SseParser<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: Vec::new(),
            event_name: None,
            data_lines: Vec::new(),
            done: false,
        }
    }

    /// Consumes one complete line from the buffer, handling the blank
    /// line dispatch rule. Returns an event when one is dispatched.
    fn process_line(&mut self, end: usize) -> Option<SseEvent> {
        let mut line_end = end;
        if line_end > 0 && self.buffer[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        let line = String::from_utf8_lossy(&self.buffer[..line_end]).into_owned();
        self.buffer.drain(..=end);

        if line.is_empty() {
            // Blank line: dispatch, unless nothing was accumulated.
            if self.data_lines.is_empty() {
                self.event_name = None;
                return None;
            }
            let event = self
                .event_name
                .take()
                .unwrap_or_else(|| "message".to_string());
            let data = std::mem::take(&mut self.data_lines).join("\n");
            return Some(SseEvent { event, data });
        }

        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_str(), ""),
        };
        match field {
            "event" => self.event_name = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // id and retry have no meaning for this proxy.
            _ => {}
        }
        None
    }
}

impl<S, E> Stream for SseParser<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        loop {
            if let Some(pos) = this.buffer.iter().position(|&b| b == b'\n') {
                if let Some(event) = this.process_line(pos) {
                    return Poll::Ready(Some(Ok(event)));
                }
                continue;
            }

            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => this.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    // Anything still buffered never completed an event.
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::convert::Infallible;

    async fn collect_events(chunks: Vec<&'static str>) -> Vec<SseEvent> {
        let stream = futures::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from(c))),
        );
        SseParser::new(stream)
            .map(|r| r.unwrap())
            .collect::<Vec<_>>()
            .await
    }

    #[tokio::test]
    async fn test_named_event() {
        let events =
            collect_events(vec!["event: endpoint\ndata: /message?sessionId=abc\n\n"]).await;
        assert_eq!(
            events,
            vec![SseEvent {
                event: "endpoint".to_string(),
                data: "/message?sessionId=abc".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_default_event_name_is_message() {
        let events = collect_events(vec!["data: {\"a\":1}\n\n"]).await;
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[tokio::test]
    async fn test_event_split_across_chunks() {
        let events = collect_events(vec!["da", "ta: hel", "lo\n", "\n"]).await;
        assert_eq!(events[0].data, "hello");
    }

    #[tokio::test]
    async fn test_multiple_data_lines_joined() {
        let events = collect_events(vec!["data: a\ndata: b\n\n"]).await;
        assert_eq!(events[0].data, "a\nb");
    }

    #[tokio::test]
    async fn test_comments_are_ignored() {
        let events = collect_events(vec![": keep-alive\ndata: x\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[tokio::test]
    async fn test_crlf_line_endings() {
        let events = collect_events(vec!["data: x\r\n\r\n"]).await;
        assert_eq!(events[0].data, "x");
    }

    #[tokio::test]
    async fn test_incomplete_event_at_eof_is_discarded() {
        let events = collect_events(vec!["data: x"]).await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_blank_line_without_data_dispatches_nothing() {
        let events = collect_events(vec!["event: foo\n\ndata: y\n\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "y");
    }

    #[tokio::test]
    async fn test_transport_errors_pass_through() {
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from("data: x\n\n")),
            Err(std::io::Error::other("boom")),
        ]);
        let mut parser = SseParser::new(stream);
        assert!(parser.next().await.unwrap().is_ok());
        assert!(parser.next().await.unwrap().is_err());
    }
}
