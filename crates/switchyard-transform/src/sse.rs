//! Server-Sent Events reader and writer.
//!
//! The reader yields one [`SseEvent`] per blank-line-delimited block and keeps
//! end of stream (`Ok(None)`) apart from transport errors. The writer emits
//! fields in the fixed order `event`, `id`, `retry`, `data` and flushes after
//! every event.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, TransformError};

pub const DONE: &str = "[DONE]";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub retry: Option<u64>,
    pub data: String,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::data(value.to_string())
    }

    pub fn done() -> Self {
        Self::data(DONE)
    }

    pub fn with_event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE
    }

    /// Parses the data payload as JSON.
    pub fn parse_json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }

    fn is_empty(&self) -> bool {
        self.event.is_none() && self.id.is_none() && self.retry.is_none()
    }

    /// Renders the event in wire format, including the terminating blank line.
    pub fn to_wire(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 16);
        if let Some(event) = self.event.as_deref().filter(|e| !e.is_empty()) {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = self.id.as_deref().filter(|id| !id.is_empty()) {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = self.retry {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
        if !self.data.is_empty() {
            for line in self.data.split('\n') {
                out.push_str("data: ");
                out.push_str(line);
                out.push('\n');
            }
        }
        out.push('\n');
        out
    }
}

pub struct SseReader<R> {
    inner: R,
    line: String,
    closed: bool,
}

impl<R: AsyncBufRead + Unpin> SseReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            line: String::new(),
            closed: false,
        }
    }

    /// Reads the next event. `Ok(None)` means the source is exhausted.
    pub async fn read_event(&mut self) -> Result<Option<SseEvent>> {
        if self.closed {
            return Err(TransformError::Closed("sse reader"));
        }

        let mut event = SseEvent::default();
        let mut data_lines: Vec<String> = Vec::new();

        loop {
            self.line.clear();
            let read = self.inner.read_line(&mut self.line).await?;
            if read == 0 {
                if data_lines.is_empty() && event.is_empty() {
                    return Ok(None);
                }
                event.data = data_lines.join("\n");
                return Ok(Some(event));
            }

            let line = self.line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                if data_lines.is_empty() && event.is_empty() {
                    continue;
                }
                event.data = data_lines.join("\n");
                return Ok(Some(event));
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => event.event = Some(value.to_string()),
                "data" => data_lines.push(value.to_string()),
                "id" => event.id = Some(value.to_string()),
                "retry" => {
                    if let Ok(ms) = value.trim().parse() {
                        event.retry = Some(ms);
                    }
                }
                _ => {}
            }
        }
    }

    /// Closes the reader. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

pub struct SseWriter<W> {
    inner: W,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> SseWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub async fn write_event(&mut self, event: &SseEvent) -> Result<()> {
        if self.closed {
            return Err(TransformError::Closed("sse writer"));
        }
        self.inner.write_all(event.to_wire().as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Flushes and shuts down the sink. Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn read_all(input: &str) -> Vec<SseEvent> {
        let mut reader = SseReader::new(BufReader::new(input.as_bytes()));
        let mut events = Vec::new();
        while let Some(event) = reader.read_event().await.unwrap() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_reads_fields_and_joins_data() {
        let events = read_all(
            "event: message_start\nid: 7\nretry: 1500\ndata: first\ndata: second\n\n: comment\ndata: {\"x\":1}\n\n",
        )
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("message_start"));
        assert_eq!(events[0].id.as_deref(), Some("7"));
        assert_eq!(events[0].retry, Some(1500));
        assert_eq!(events[0].data, "first\nsecond");
        assert_eq!(events[1].data, r#"{"x":1}"#);
        assert_eq!(events[1].event, None);
    }

    #[tokio::test]
    async fn test_handles_crlf_and_missing_space() {
        let events = read_all("data:tight\r\n\r\n\r\n\r\ndata: [DONE]\r\n\r\n").await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "tight");
        assert!(events[1].is_done());
    }

    #[tokio::test]
    async fn test_trailing_event_without_blank_line() {
        let events = read_all("data: last").await;
        assert_eq!(events, vec![SseEvent::data("last")]);
    }

    #[tokio::test]
    async fn test_eof_is_distinct_from_errors() {
        let mut reader = SseReader::new(BufReader::new(&b""[..]));
        assert!(reader.read_event().await.unwrap().is_none());

        let failing = tokio_test::io::Builder::new()
            .read(b"data: partial\n")
            .read_error(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset"))
            .build();
        let mut reader = SseReader::new(BufReader::new(failing));
        assert!(matches!(reader.read_event().await, Err(TransformError::Io(_))));
    }

    #[tokio::test]
    async fn test_writer_field_order_and_multiline() {
        let mut writer = SseWriter::new(Vec::new());
        let event = SseEvent {
            event: Some("delta".into()),
            id: Some("42".into()),
            retry: Some(3000),
            data: "a\nb".into(),
        };
        writer.write_event(&event).await.unwrap();
        writer.write_event(&SseEvent::done()).await.unwrap();

        let out = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            out,
            "event: delta\nid: 42\nretry: 3000\ndata: a\ndata: b\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let mut writer = SseWriter::new(Vec::new());
        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(matches!(
            writer.write_event(&SseEvent::data("x")).await,
            Err(TransformError::Closed(_))
        ));

        let mut reader = SseReader::new(BufReader::new(&b"data: x\n\n"[..]));
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        assert!(matches!(reader.read_event().await, Err(TransformError::Closed(_))));
    }
}
