//! 观测性错误类型

/// 观测性错误类型
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    /// 配置错误
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// 日志错误
    #[error("Logging error: {message}")]
    Logging { message: String },

    /// 初始化错误
    #[error("Initialization error: {message}")]
    Init { message: String },

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ObservabilityError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn logging(message: impl Into<String>) -> Self {
        Self::Logging {
            message: message.into(),
        }
    }

    pub fn init(message: impl Into<String>) -> Self {
        Self::Init {
            message: message.into(),
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Logging { .. } => "logging",
            Self::Init { .. } => "init",
            Self::Io(_) => "io",
        }
    }
}

impl From<switchyard_config::ConfigError> for ObservabilityError {
    fn from(e: switchyard_config::ConfigError) -> Self {
        Self::config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ObservabilityError>;
