//! # Chips Pipeline - 薯片流水线
//!
//! 声明式的模块组合框架。每个模块声明自己的配置项和依赖，
//! 引擎负责：
//!
//! - **依赖发现**: 从根模块出发展开完整的依赖图
//! - **配置传播**: 按作用域合并覆盖配置、共享配置和默认值，并做类型检查
//! - **结构校验**: 在构造任何实例之前发现循环、缺失值和类型错误
//! - **实例缓存**: 每个不同的有效配置只构造一次实例
//! - **实例共享**: 兄弟模块通过 `provide_this` / `provide_children` 透明共享依赖
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_pipeline::{builtin, Engine, OverrideMap, PipelineConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(builtin::registry()?, PipelineConfig::default());
//!
//!     let overrides = OverrideMap::parse(["searcher.index.stemmer=porter"])?;
//!     let mut task = engine.task("rank", overrides)?;
//!     let result = task.run(Some("searcheval"))?;
//!     println!("{}", result);
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 描述符、注册表、解析器、构造器和实例缓存
//! - `api` - 引擎与任务
//! - `core` - 流水线配置
//! - `utils` - 错误类型、日志、摘要和制品物化
//! - `builtin` - 内置演示模块

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod builtin;
pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{Engine, Task, TaskState};

pub use module::{
    CacheKey, ConfigOption, ConfigValue, DependencySpec, InstanceCache, Module, ModuleContext,
    ModuleDescriptor, ModuleInstance, ModuleRegistry, OverrideMap, ProvidedInstances,
    RegistryBuilder, ResolvedConfig, ValueType,
};

pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use utils::{error_code, exit_code, CoreError, Result};

pub use core::config::{LogConfig, PipelineConfig, PipelineConfigBuilder, StorageConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
