//! 模块组合引擎
//!
//! 包含依赖解析与配置传播的核心组件：
//! - [`descriptor`]：模块声明（配置项、依赖、工厂、任务命令）
//! - [`registry`]：两阶段注册表
//! - [`overrides`]：覆盖配置树与点分语法
//! - [`resolver`]：配置合并、类型检查与共享传播
//! - [`builder`]：实例图构造
//! - [`instance`]：缓存键、模块实例与实例缓存
//! - [`graph`]：依赖关系图

pub mod builder;
pub mod descriptor;
pub mod graph;
pub mod instance;
pub mod overrides;
pub mod registry;
pub mod resolver;
pub mod value;

// 重导出常用类型
pub use builder::{shared_configs, GraphBuilder, ProvidedInstances};
pub use descriptor::{
    CommandContext, ConfigOption, DefaultValue, DependencySpec, Module, ModuleContext,
    ModuleDescriptor, ModuleFactory, ModuleId, TaskSpec, FILE_KEY, HELP_COMMANDS, NAME_KEY,
};
pub use graph::DependencyGraph;
pub use instance::{CacheKey, CacheStats, InstanceCache, ModuleInstance};
pub use overrides::{OverrideMap, OverrideValue};
pub use registry::{ModuleRegistry, RegistryBuilder};
pub use resolver::{Binding, ConfigResolver, ResolvedConfig, ResolvedDependency, SharedConfigs};
pub use value::{ConfigValue, ValueType};
