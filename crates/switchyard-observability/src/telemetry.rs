//! 转换链路的 span 与结果记录

use std::fmt::Display;
use std::time::Duration;

use tracing::Span;

/// 转换方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Request => "request",
            Direction::Response => "response",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 生成新的 trace id
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 创建一次链式转换的 span
pub fn transform_span(provider: &str, direction: Direction) -> Span {
    tracing::info_span!(
        "transform",
        provider = %provider,
        direction = %direction,
        trace_id = %new_trace_id(),
    )
}

/// 创建流式改写任务的 span，provider 信息由父 span 提供
pub fn stream_span(transformer: &str) -> Span {
    tracing::debug_span!("sse_stream", transformer = %transformer)
}

/// 记录一次链式转换的结果
///
/// 日志与指标都是尽力而为，不会影响转换本身。
pub fn record_transform_outcome<E: Display>(
    provider: &str,
    direction: Direction,
    elapsed: Duration,
    outcome: std::result::Result<(), &E>,
) {
    let status = if outcome.is_ok() { "ok" } else { "error" };
    metrics::counter!(
        "switchyard_transform_total",
        "provider" => provider.to_string(),
        "direction" => direction.as_str(),
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "switchyard_transform_duration_seconds",
        "provider" => provider.to_string(),
        "direction" => direction.as_str()
    )
    .record(elapsed.as_secs_f64());

    match outcome {
        Ok(()) => tracing::debug!(
            target: "switchyard_transform",
            provider,
            direction = direction.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "transformation applied"
        ),
        Err(e) => tracing::warn!(
            target: "switchyard_transform",
            provider,
            direction = direction.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            error = %e,
            "transformation failed"
        ),
    }
}

/// 记录流式改写过程中被跳过的事件
pub fn record_stream_passthrough(transformer: &str, reason: &str) {
    metrics::counter!(
        "switchyard_stream_passthrough_total",
        "transformer" => transformer.to_string()
    )
    .increment(1);
    tracing::debug!(target: "switchyard_transform", transformer, reason, "event passed through unchanged");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_spans() {
        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let span = transform_span("gemini", Direction::Request);
            assert_eq!(span.metadata().unwrap().name(), "transform");

            let span = stream_span("deepseek");
            assert_eq!(span.metadata().unwrap().name(), "sse_stream");
        });
    }

    #[test]
    fn test_trace_ids_are_unique() {
        let a = new_trace_id();
        let b = new_trace_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_outcome_without_subscriber() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        record_transform_outcome::<std::io::Error>("openai", Direction::Request, Duration::from_millis(3), Ok(()));
        record_transform_outcome("openai", Direction::Response, Duration::from_millis(3), Err(&err));
        assert_eq!(Direction::Response.to_string(), "response");
    }
}
