//! # Switchyard Observability
//!
//! 为转换引擎提供统一的日志与遥测：
//!
//! - 基于 tracing 的结构化日志（纯文本或 JSON，可输出到文件）
//! - 运行时动态调整日志级别
//! - 转换链路 span 与结果指标
//!
//! ```rust,no_run
//! use switchyard_config::LoggingConfig;
//! use switchyard_observability::LogManager;
//!
//! let manager = LogManager::init(&LoggingConfig::default())?;
//! # Ok::<(), switchyard_observability::ObservabilityError>(())
//! ```

pub mod error;
pub mod logging;
pub mod telemetry;

pub use error::{ObservabilityError, Result};
pub use logging::{build_filter, LogManager};
pub use telemetry::{
    new_trace_id, record_stream_passthrough, record_transform_outcome, stream_span,
    transform_span, Direction,
};
