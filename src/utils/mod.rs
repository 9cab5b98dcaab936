//! 工具模块
//!
//! 包含错误类型、摘要生成、日志系统和制品物化等通用工具。

pub mod artifact;
pub mod error;
pub mod id;
pub mod logger;

// 重导出常用类型
pub use error::{error_code, exit_code, CoreError, Result};
pub use id::{digest_id, is_valid_digest};
pub use logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
