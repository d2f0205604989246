//! Live rewriting of event-stream responses.
//!
//! Each rewritten stream gets its own task: it reads upstream events, feeds
//! them through a [`StreamRewriter`] that owns all per-stream state, and writes
//! the results into a bounded in-memory pipe whose other end becomes the new
//! response body.

use serde_json::Value;
use switchyard_observability::{record_stream_passthrough, stream_span};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tracing::{debug, warn, Instrument};

use crate::error::Result;
use crate::payload::ProviderResponse;
use crate::sse::{SseEvent, SseReader, SseWriter};

/// Capacity of the pipe between the rewriting task and the client body.
pub const PIPE_CAPACITY: usize = 16 * 1024;

/// Per-stream event rewriting state machine.
pub trait StreamRewriter: Send + 'static {
    /// Maps one upstream event to zero or more downstream events.
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent>;

    /// Called once after the upstream ends cleanly.
    fn finish(&mut self) -> Vec<SseEvent> {
        Vec::new()
    }
}

/// Replaces the body of `response` with a stream rewritten by `rewriter`.
///
/// Must be called from within a tokio runtime.
pub fn rewrite_event_stream<W>(
    response: ProviderResponse,
    transformer: &str,
    rewriter: W,
) -> ProviderResponse
where
    W: StreamRewriter,
{
    let (head, body) = response.into_parts();
    let (client_end, task_end) = tokio::io::duplex(PIPE_CAPACITY);

    let span = stream_span(transformer);
    let name = transformer.to_string();
    tokio::spawn(
        async move {
            pump(body.into_reader(), task_end, rewriter, &name).await;
        }
        .instrument(span),
    );

    head.with_event_stream(client_end)
}

async fn pump<R, S, W>(source: R, sink: S, mut rewriter: W, transformer: &str)
where
    R: AsyncRead + Unpin,
    S: AsyncWrite + Unpin,
    W: StreamRewriter,
{
    let mut reader = SseReader::new(BufReader::new(source));
    let mut writer = SseWriter::new(sink);

    loop {
        match reader.read_event().await {
            Ok(Some(event)) => {
                let out = rewriter.rewrite(event);
                if write_all(&mut writer, &out).await.is_err() {
                    debug!(transformer, "downstream closed, stopping stream rewrite");
                    reader.close();
                    return;
                }
            }
            Ok(None) => {
                let tail = rewriter.finish();
                if write_all(&mut writer, &tail).await.is_err() {
                    debug!(transformer, "downstream closed before stream tail was written");
                }
                break;
            }
            Err(e) => {
                warn!(transformer, error = %e, "error reading upstream event stream");
                break;
            }
        }
    }

    reader.close();
    if let Err(e) = writer.close().await {
        debug!(transformer, error = %e, "failed to close rewritten stream");
    }
}

async fn write_all<S>(writer: &mut SseWriter<S>, events: &[SseEvent]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    for event in events {
        writer.write_event(event).await?;
    }
    Ok(())
}

/// Parses an event's JSON payload, logging events that are passed through raw.
pub fn parse_event_json(event: &SseEvent, transformer: &str) -> Option<Value> {
    match serde_json::from_str(&event.data) {
        Ok(value) => Some(value),
        Err(_) => {
            record_stream_passthrough(transformer, "payload is not JSON");
            None
        }
    }
}

/// Rewriter applying a stateless per-chunk edit to every JSON event.
///
/// `[DONE]` and non-JSON events are forwarded unchanged.
pub struct ChunkMap<F> {
    transformer: &'static str,
    edit: F,
}

impl<F> ChunkMap<F>
where
    F: FnMut(&mut Value) + Send + 'static,
{
    pub fn new(transformer: &'static str, edit: F) -> Self {
        Self { transformer, edit }
    }
}

impl<F> StreamRewriter for ChunkMap<F>
where
    F: FnMut(&mut Value) + Send + 'static,
{
    fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
        if event.is_done() {
            return vec![event];
        }
        match parse_event_json(&event, self.transformer) {
            Some(mut chunk) => {
                (self.edit)(&mut chunk);
                vec![SseEvent {
                    data: chunk.to_string(),
                    ..event
                }]
            }
            None => vec![event],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    impl StreamRewriter for Upper {
        fn rewrite(&mut self, event: SseEvent) -> Vec<SseEvent> {
            vec![SseEvent::data(event.data.to_uppercase())]
        }

        fn finish(&mut self) -> Vec<SseEvent> {
            vec![SseEvent::done()]
        }
    }

    #[tokio::test]
    async fn test_rewrites_and_appends_tail() {
        let upstream = ProviderResponse::event_stream(&b"data: a\n\ndata: b\n\n"[..]);
        let response = rewrite_event_stream(upstream, "upper", Upper);

        assert!(response.is_event_stream());
        assert!(response.headers.get(http::header::CONTENT_LENGTH).is_none());
        assert_eq!(
            response.text().await.unwrap(),
            "data: A\n\ndata: B\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_read_error_closes_pipe_without_tail() {
        let failing = tokio_test::io::Builder::new()
            .read(b"data: a\n\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let response = rewrite_event_stream(ProviderResponse::event_stream(failing), "upper", Upper);

        assert_eq!(response.text().await.unwrap(), "data: A\n\n");
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_task() {
        let (mut upstream_tx, upstream_rx) = tokio::io::duplex(64);
        let response = rewrite_event_stream(ProviderResponse::event_stream(upstream_rx), "upper", Upper);
        drop(response);

        use tokio::io::AsyncWriteExt;
        upstream_tx.write_all(b"data: a\n\n").await.unwrap();
        // The task observes the closed pipe and drops its upstream end.
        let mut closed = false;
        for _ in 0..50 {
            if upstream_tx.write_all(&[b'\n'; 64]).await.is_err() {
                closed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(closed);
    }

    #[tokio::test]
    async fn test_chunk_map_edits_json_only() {
        let mut map = ChunkMap::new("test", |chunk: &mut Value| {
            chunk["seen"] = json!(true);
        });

        let out = map.rewrite(SseEvent::data(r#"{"a":1}"#).with_event("x"));
        assert_eq!(out[0].parse_json().unwrap(), json!({"a": 1, "seen": true}));
        assert_eq!(out[0].event.as_deref(), Some("x"));

        assert_eq!(map.rewrite(SseEvent::data("oops")), vec![SseEvent::data("oops")]);
        assert_eq!(map.rewrite(SseEvent::done()), vec![SseEvent::done()]);
    }
}
