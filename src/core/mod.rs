//! 核心模块
//!
//! 包含流水线进程级配置。

pub mod config;

pub use config::{LogConfig, PipelineConfig, PipelineConfigBuilder, StorageConfig};
