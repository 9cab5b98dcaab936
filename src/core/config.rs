//! 流水线配置
//!
//! 定义流水线进程级配置（存储目录、日志）及其加载逻辑。
//! 模块级配置走覆盖树，见 [`crate::module::overrides`]。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 结果目录环境变量
pub const ENV_RESULTS_DIR: &str = "CHIPS_PIPELINE_RESULTS";

/// 缓存目录环境变量
pub const ENV_CACHE_DIR: &str = "CHIPS_PIPELINE_CACHE";

/// 存储配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// 任务结果输出根目录
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// 模块制品（索引等）缓存根目录
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("./results")
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: false,
            log_dir: None,
            json_format: false,
            rotation: default_rotation(),
        }
    }
}

/// 流水线配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 存储配置
    #[serde(default)]
    pub storage: StorageConfig,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl PipelineConfig {
    /// 创建配置构建器
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// 扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> crate::utils::Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await?;
        let mut config = Self::from_str_with_format(&content, is_json(&path))?;
        config.config_path = Some(path);
        Ok(config)
    }

    /// 从字符串解析配置
    pub fn from_str_with_format(content: &str, json: bool) -> crate::utils::Result<Self> {
        let config = if json {
            serde_json::from_str(content)?
        } else {
            serde_yaml::from_str(content)?
        };
        Ok(config)
    }

    /// 应用环境变量覆盖（存储目录）
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// 使用自定义查找函数应用环境变量覆盖
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_RESULTS_DIR).filter(|v| !v.is_empty()) {
            self.storage.results_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.storage.cache_dir = PathBuf::from(dir);
        }
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: PipelineConfig) {
        // 只覆盖非默认值的配置
        if other.storage.results_dir != default_results_dir() {
            self.storage.results_dir = other.storage.results_dir;
        }
        if other.storage.cache_dir != default_cache_dir() {
            self.storage.cache_dir = other.storage.cache_dir;
        }
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        if other.logging.json_format {
            self.logging.json_format = true;
        }
        if other.dev_mode {
            self.dev_mode = true;
        }
    }
}

fn is_json(path: &std::path::Path) -> bool {
    path.extension().map(|e| e == "json").unwrap_or(false)
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
        }
    }

    /// 设置结果目录
    pub fn results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.results_dir = dir.into();
        self
    }

    /// 设置缓存目录
    pub fn cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.storage.cache_dir = dir.into();
        self
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> PipelineConfig {
        self.config
    }
}
