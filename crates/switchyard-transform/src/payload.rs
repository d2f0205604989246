//! Request and response envelopes flowing through a transformer chain.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use crate::error::Result;

pub const EVENT_STREAM: &str = "text/event-stream";
pub const APPLICATION_JSON: &str = "application/json";

/// Outbound request settings a transformer may want to influence besides the body.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestConfig {
    pub body: Value,
    pub url: Option<String>,
    pub method: Option<Method>,
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl RequestConfig {
    pub fn new(body: Value) -> Self {
        Self {
            body,
            url: None,
            method: None,
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.insert(name, HeaderValue::from_static(value));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A request at some stage of the pipeline.
///
/// Every transformer accepts either form, so a stage that needs to set headers
/// can upgrade a bare body and later stages keep working on the same body.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Body(Value),
    Config(RequestConfig),
}

impl RequestPayload {
    pub fn body(&self) -> &Value {
        match self {
            RequestPayload::Body(body) => body,
            RequestPayload::Config(config) => &config.body,
        }
    }

    pub fn body_mut(&mut self) -> &mut Value {
        match self {
            RequestPayload::Body(body) => body,
            RequestPayload::Config(config) => &mut config.body,
        }
    }

    pub fn into_body(self) -> Value {
        match self {
            RequestPayload::Body(body) => body,
            RequestPayload::Config(config) => config.body,
        }
    }

    pub fn config(&self) -> Option<&RequestConfig> {
        match self {
            RequestPayload::Body(_) => None,
            RequestPayload::Config(config) => Some(config),
        }
    }

    /// Converts into a [`RequestConfig`], wrapping a bare body with empty settings.
    pub fn into_config(self) -> RequestConfig {
        match self {
            RequestPayload::Body(body) => RequestConfig::new(body),
            RequestPayload::Config(config) => config,
        }
    }

    /// Replaces the body, keeping any request settings already attached.
    pub fn map_body<F>(self, f: F) -> Result<Self>
    where
        F: FnOnce(Value) -> Result<Value>,
    {
        match self {
            RequestPayload::Body(body) => Ok(RequestPayload::Body(f(body)?)),
            RequestPayload::Config(mut config) => {
                config.body = f(config.body)?;
                Ok(RequestPayload::Config(config))
            }
        }
    }
}

impl From<Value> for RequestPayload {
    fn from(body: Value) -> Self {
        RequestPayload::Body(body)
    }
}

impl From<RequestConfig> for RequestPayload {
    fn from(config: RequestConfig) -> Self {
        RequestPayload::Config(config)
    }
}

pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Body of a provider response: fully buffered or still streaming.
pub enum ResponseBody {
    Full(Bytes),
    Reader(BodyReader),
}

impl ResponseBody {
    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        ResponseBody::Reader(Box::new(reader))
    }

    /// Adapts a chunked byte stream such as an HTTP client body.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + Unpin + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let stream = stream.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        ResponseBody::Reader(Box::new(StreamReader::new(stream)))
    }

    pub async fn collect(self) -> std::io::Result<Bytes> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Reader(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }

    pub fn into_reader(self) -> BodyReader {
        match self {
            ResponseBody::Full(bytes) => Box::new(std::io::Cursor::new(bytes)),
            ResponseBody::Reader(reader) => reader,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            ResponseBody::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

/// Status line and headers of a response whose body has been taken out.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl ResponseHead {
    pub fn with_bytes(mut self, bytes: Bytes) -> ProviderResponse {
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        ProviderResponse {
            status: self.status,
            headers: self.headers,
            body: ResponseBody::Full(bytes),
        }
    }

    pub fn with_json(mut self, value: &Value) -> Result<ProviderResponse> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        Ok(self.with_bytes(bytes))
    }

    /// Attaches a live event stream. The length is unknown from here on.
    pub fn with_event_stream(mut self, reader: impl AsyncRead + Send + Unpin + 'static) -> ProviderResponse {
        self.headers.remove(CONTENT_LENGTH);
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(EVENT_STREAM));
        ProviderResponse {
            status: self.status,
            headers: self.headers,
            body: ResponseBody::from_reader(reader),
        }
    }
}

/// An HTTP response travelling back through the chain.
#[derive(Debug)]
pub struct ProviderResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ProviderResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn json(status: StatusCode, value: &Value) -> Result<Self> {
        ResponseHead {
            status,
            headers: HeaderMap::new(),
        }
        .with_json(value)
    }

    pub fn event_stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        ResponseHead {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
        }
        .with_event_stream(reader)
    }

    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains(EVENT_STREAM))
            .unwrap_or(false)
    }

    pub fn into_parts(self) -> (ResponseHead, ResponseBody) {
        (
            ResponseHead {
                status: self.status,
                headers: self.headers,
            },
            self.body,
        )
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> std::io::Result<Bytes> {
        self.body.collect().await
    }

    pub async fn text(self) -> std::io::Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Buffers the body and applies `edit` to it as JSON.
    ///
    /// Error statuses and bodies that do not parse are returned unchanged.
    pub async fn map_json<F>(self, transformer: &str, edit: F) -> Result<Self>
    where
        F: FnOnce(Value) -> Value,
    {
        let (head, body) = self.into_parts();
        let bytes = body.collect().await?;
        if !head.status.is_success() {
            return Ok(head.with_bytes(bytes));
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => head.with_json(&edit(value)),
            Err(e) => {
                tracing::debug!(transformer, error = %e, "response body is not JSON, passing through");
                Ok(head.with_bytes(bytes))
            }
        }
    }
}
