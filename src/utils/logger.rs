//! 日志系统模块
//!
//! 基于 tracing 生态输出流水线日志。控制台日志写到 stderr，stdout 留给命令输出；
//! 可选的文件日志异步写入并按时间轮转。
//!
//! 解析器和构造器的日志都带结构化字段（`module`、`path`、`cache_key`），
//! 排查配置传播问题时可以单独打开：
//!
//! ```text
//! RUST_LOG=chips_pipeline::module::resolver=debug chips-pipeline rank.print_config
//! ```
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_pipeline::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .directive("chips_pipeline::module::builder=trace")
//!         .build();
//!
//!     let _guard = Logger::init(config)?;
//!
//!     tracing::info!(module = "index/simple", path = "searcher.index", "构造模块实例");
//!     Ok(())
//! }
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::utils::{CoreError, Result};

/// 日志文件名前缀
const FILE_PREFIX: &str = "chips-pipeline";

/// 开发模式下额外打开的过滤指令
const DEV_DIRECTIVE: &str = "chips_pipeline::module=debug";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 单个日志文件
    Never,
    /// 每小时
    Hourly,
    /// 每天
    #[default]
    Daily,
}

impl RotationStrategy {
    /// 解析配置文件中的轮转策略，无法识别时按每天轮转
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RotationStrategy::Never => "never",
            RotationStrategy::Hourly => "hourly",
            RotationStrategy::Daily => "daily",
        }
    }

    fn rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认级别（trace / debug / info / warn / error），`RUST_LOG` 优先
    pub level: String,
    /// JSON 格式输出
    pub json_format: bool,
    /// 输出到 stderr
    pub console_output: bool,
    /// 文件输出目录
    pub file_output: Option<PathBuf>,
    pub rotation: RotationStrategy,
    /// 控制台显示线程 ID
    pub show_thread_ids: bool,
    /// 控制台显示源码位置
    pub show_file_line: bool,
    /// 追加的 EnvFilter 指令，如 `chips_pipeline::module::resolver=trace`
    pub directives: Vec<String>,
    /// 控制台 ANSI 颜色
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            rotation: RotationStrategy::Daily,
            show_thread_ids: false,
            show_file_line: false,
            directives: Vec::new(),
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从流水线配置中的 [`LogConfig`] 创建
    ///
    /// 只有 `file_output` 打开且给出了目录时才写文件。
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: log_config
                .log_dir
                .clone()
                .filter(|_| log_config.file_output),
            rotation: RotationStrategy::parse(&log_config.rotation),
            ..Self::default()
        }
    }

    /// 开发模式：显示线程和源码位置，打开解析与构造的调试日志
    pub fn with_dev_mode(mut self) -> Self {
        self.show_thread_ids = true;
        self.show_file_line = true;
        self.directives.push(DEV_DIRECTIVE.to_string());
        self
    }

    fn env_filter(&self) -> EnvFilter {
        let base = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(normalize_level(&self.level)));
        self.directives
            .iter()
            .map(|d| d.trim())
            .filter(|d| !d.is_empty())
            .filter_map(|d| d.parse::<Directive>().ok())
            .fold(base, |filter, directive| filter.add_directive(directive))
    }

    fn layer(&self, writer: NonBlocking, console: bool) -> BoxedLayer {
        let layer = fmt::layer()
            .with_writer(writer)
            .with_thread_ids(console && self.show_thread_ids)
            .with_file(console && self.show_file_line)
            .with_line_number(console && self.show_file_line);
        if self.json_format {
            layer.json().with_ansi(false).boxed()
        } else {
            layer.with_ansi(console && self.ansi_colors).boxed()
        }
    }
}

/// 无法识别的级别按 info 处理
fn normalize_level(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" => "error",
        _ => "info",
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 写文件日志到该目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 追加一条过滤指令
    pub fn directive(mut self, directive: impl Into<String>) -> Self {
        self.config.directives.push(directive.into());
        self
    }

    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    pub fn dev_mode(mut self) -> Self {
        self.config = self.config.with_dev_mode();
        self
    }

    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志系统
// ============================================================================

/// 日志守卫
///
/// 持有非阻塞写入器的 WorkerGuard，丢弃时刷出挂起的日志。
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化全局日志订阅者
    ///
    /// 返回的 [`LogGuard`] 必须存活到程序退出。
    ///
    /// # Errors
    ///
    /// 已经初始化过，或全局订阅者已被其他代码设置时返回 `InitFailed`。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if INITIALIZED.swap(true, Ordering::SeqCst) {
            return Err(CoreError::InitFailed("日志系统已初始化".to_string()));
        }

        let mut guards = Vec::new();
        let mut layers: Vec<BoxedLayer> = Vec::new();

        if config.console_output {
            let (writer, guard) = tracing_appender::non_blocking(io::stderr());
            guards.push(guard);
            layers.push(config.layer(writer, true));
        }
        if let Some(dir) = &config.file_output {
            let appender = RollingFileAppender::new(
                config.rotation.rotation(),
                dir,
                format!("{}.log", FILE_PREFIX),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            layers.push(config.layer(writer, false));
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(config.env_filter())
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        Ok(LogGuard { _guards: guards })
    }

    /// 初始化日志系统，失败时返回空守卫（测试中多次调用）
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }
}
