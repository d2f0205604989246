//! 结构化日志模块
//!
//! 提供基于 tracing 的结构化日志功能。

use std::path::Path;

use switchyard_config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::MakeWriter,
    layer::{Layered, SubscriberExt},
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

use crate::error::{ObservabilityError, Result};

/// 日志级别重新加载句柄类型
type ReloadHandle = Handle<EnvFilter, Registry>;

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;

type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

/// 日志管理器
pub struct LogManager {
    config: LoggingConfig,

    /// 过滤器重新加载句柄
    reload_handle: ReloadHandle,

    /// 文件输出的后台写入线程，drop 时刷新剩余日志
    _file_guard: Option<WorkerGuard>,
}

impl std::fmt::Debug for LogManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogManager")
            .field("config", &self.config)
            .field("file_output", &self._file_guard.is_some())
            .finish()
    }
}

impl LogManager {
    /// 初始化全局日志系统
    ///
    /// 每个进程只能成功调用一次，再次调用返回 [`ObservabilityError::Init`]。
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let filter = build_filter(config)?;
        let (filter, reload_handle) = reload::Layer::new(filter);

        let mut layers: Vec<BoxedLayer> = vec![fmt_layer(config, std::io::stdout, config.ansi_colors)];

        let mut file_guard = None;
        if let Some(file) = &config.file {
            let path = switchyard_config::expand_tilde(file)
                .ok_or_else(|| ObservabilityError::config(format!("Invalid log file path: {}", file)))?;
            let (writer, guard) = file_writer(&path)?;
            layers.push(fmt_layer(config, writer, false));
            file_guard = Some(guard);
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| ObservabilityError::init(format!("Failed to install subscriber: {}", e)))?;

        tracing::info!(
            target: "switchyard_observability",
            "Log manager initialized with level: {}",
            config.level.as_str()
        );

        Ok(Self {
            config: config.clone(),
            reload_handle,
            _file_guard: file_guard,
        })
    }

    /// 动态更新日志级别，保留模块级别配置
    pub fn update_level(&mut self, level: &str) -> Result<()> {
        let mut next = self.config.clone();
        next.level = level.parse()?;
        let new_filter = build_filter(&next)?;

        self.reload_handle
            .modify(|filter| *filter = new_filter)
            .map_err(|e| ObservabilityError::logging(format!("Failed to update log level: {}", e)))?;

        self.config = next;
        tracing::info!(
            target: "switchyard_observability",
            "Log level updated to: {}",
            level
        );
        Ok(())
    }

    /// 获取当前配置
    pub fn config(&self) -> &LoggingConfig {
        &self.config
    }
}

/// 构建环境过滤器
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(config.level.as_str())
        .map_err(|e| ObservabilityError::logging(format!("Invalid log level: {}", e)))?;

    for (module, level) in &config.module_levels {
        filter = filter.add_directive(
            format!("{}={}", module, level)
                .parse()
                .map_err(|e| ObservabilityError::logging(format!("Invalid directive: {}", e)))?,
        );
    }

    Ok(filter)
}

fn fmt_layer<W>(config: &LoggingConfig, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_id)
        .with_line_number(config.include_line_number)
        .with_ansi(ansi);

    if config.json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| ObservabilityError::config(format!("Log path has no file name: {:?}", path)))?;

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::never(dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}
