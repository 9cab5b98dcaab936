//! 薯片流水线错误类型定义
//!
//! 本模块定义了解析引擎中使用的所有错误类型。
//! 所有结构性错误都在解析阶段抛出，早于任何耗时的领域操作。

use thiserror::Error;

/// 薯片流水线核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 注册表错误 ====================

    /// 注册表中不存在该模块
    #[error("未知模块: {module_type}/{module_name}")]
    UnknownModule {
        module_type: String,
        module_name: String,
    },

    /// 模块重复注册
    #[error("模块重复注册: {module_type}/{module_name}")]
    DuplicateRegistration {
        module_type: String,
        module_name: String,
    },

    /// 模块描述符无效
    #[error("无效的模块描述符: {0}")]
    InvalidDescriptor(String),

    // ==================== 配置错误 ====================

    /// 必填配置项缺失
    #[error("缺少必填配置项: '{0}'")]
    MissingConfig(String),

    /// 配置值类型不匹配
    #[error("配置值类型错误: '{path}' 需要 {expected}, 实际为 {got}")]
    InvalidConfigType {
        path: String,
        expected: String,
        got: String,
    },

    /// 覆盖配置中出现未声明的键
    #[error("未知配置键: '{0}'")]
    UnknownConfigKey(String),

    /// 覆盖配置语法错误
    #[error("覆盖配置格式无效: {0}")]
    InvalidOverride(String),

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    // ==================== 依赖图错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    /// 外部提供的实例类型与依赖声明不一致
    #[error("依赖 '{key}' 需要 {expected} 类型的实例, 但提供的是 {found}")]
    ProvidedInstanceTypeMismatch {
        key: String,
        expected: String,
        found: String,
    },

    /// 模块工厂构造失败
    #[error("模块构造失败 '{path}': {source}")]
    ModuleFactoryFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    /// 制品构建失败
    #[error("制品构建失败 '{path}': {source}")]
    ArtifactBuildFailed {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    // ==================== 任务错误 ====================

    /// 任务不支持该命令
    #[error("任务 '{task}' 不支持命令 '{command}', 可用命令: {available:?}")]
    UnknownCommand {
        task: String,
        command: String,
        available: Vec<String>,
    },

    /// 命令执行失败
    #[error("命令执行失败 '{task}.{command}': {source}")]
    CommandFailed {
        task: String,
        command: String,
        #[source]
        source: anyhow::Error,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),
}

/// 流水线操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 进程退出码常量
pub mod exit_code {
    /// 成功
    pub const OK: i32 = 0;

    /// 未分类错误
    pub const FAILURE: i32 = 1;

    /// 配置错误（缺失、类型、未知键、语法）
    pub const CONFIG: i32 = 2;

    /// 结构错误（未知模块、循环依赖、实例类型不匹配、未知命令）
    pub const STRUCTURE: i32 = 3;

    /// 领域模块执行失败
    pub const MODULE: i32 = 4;
}

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_UNKNOWN: &str = "MODULE-001";
    pub const MODULE_DUPLICATE: &str = "MODULE-002";
    pub const MODULE_INVALID_DESCRIPTOR: &str = "MODULE-003";
    pub const MODULE_FACTORY_FAILED: &str = "MODULE-004";
    pub const MODULE_CIRCULAR_DEPENDENCY: &str = "MODULE-005";
    pub const MODULE_PROVIDED_TYPE_MISMATCH: &str = "MODULE-006";
    pub const MODULE_ARTIFACT_FAILED: &str = "MODULE-007";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_MISSING: &str = "CONFIG-001";
    pub const CONFIG_INVALID_TYPE: &str = "CONFIG-002";
    pub const CONFIG_UNKNOWN_KEY: &str = "CONFIG-003";
    pub const CONFIG_INVALID_OVERRIDE: &str = "CONFIG-004";
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-005";

    // 任务错误 (TASK-xxx)
    pub const TASK_UNKNOWN_COMMAND: &str = "TASK-001";
    pub const TASK_COMMAND_FAILED: &str = "TASK-002";

    // 核心错误 (CORE-xxx)
    pub const CORE_IO: &str = "CORE-001";
    pub const CORE_SERIALIZATION: &str = "CORE-002";
    pub const CORE_INTERNAL: &str = "CORE-003";
    pub const CORE_INIT_FAILED: &str = "CORE-004";
}

impl CoreError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UnknownModule { .. } => error_code::MODULE_UNKNOWN,
            CoreError::DuplicateRegistration { .. } => error_code::MODULE_DUPLICATE,
            CoreError::InvalidDescriptor(_) => error_code::MODULE_INVALID_DESCRIPTOR,
            CoreError::ModuleFactoryFailed { .. } => error_code::MODULE_FACTORY_FAILED,
            CoreError::DependencyCycle(_) => error_code::MODULE_CIRCULAR_DEPENDENCY,
            CoreError::ProvidedInstanceTypeMismatch { .. } => {
                error_code::MODULE_PROVIDED_TYPE_MISMATCH
            }
            CoreError::ArtifactBuildFailed { .. } => error_code::MODULE_ARTIFACT_FAILED,
            CoreError::MissingConfig(_) => error_code::CONFIG_MISSING,
            CoreError::InvalidConfigType { .. } => error_code::CONFIG_INVALID_TYPE,
            CoreError::UnknownConfigKey(_) => error_code::CONFIG_UNKNOWN_KEY,
            CoreError::InvalidOverride(_) => error_code::CONFIG_INVALID_OVERRIDE,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::UnknownCommand { .. } => error_code::TASK_UNKNOWN_COMMAND,
            CoreError::CommandFailed { .. } => error_code::TASK_COMMAND_FAILED,
            CoreError::Io(_) => error_code::CORE_IO,
            CoreError::Json(_) | CoreError::Yaml(_) => error_code::CORE_SERIALIZATION,
            CoreError::Internal(_) => error_code::CORE_INTERNAL,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
        }
    }

    /// 获取进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::MissingConfig(_)
            | CoreError::InvalidConfigType { .. }
            | CoreError::UnknownConfigKey(_)
            | CoreError::InvalidOverride(_)
            | CoreError::ConfigLoadFailed(_) => exit_code::CONFIG,
            CoreError::UnknownModule { .. }
            | CoreError::DuplicateRegistration { .. }
            | CoreError::InvalidDescriptor(_)
            | CoreError::DependencyCycle(_)
            | CoreError::ProvidedInstanceTypeMismatch { .. }
            | CoreError::UnknownCommand { .. } => exit_code::STRUCTURE,
            CoreError::ModuleFactoryFailed { .. }
            | CoreError::ArtifactBuildFailed { .. }
            | CoreError::CommandFailed { .. } => exit_code::MODULE,
            _ => exit_code::FAILURE,
        }
    }

    /// 是否为解析阶段（构造任何实例之前）即可发现的错误
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            CoreError::UnknownModule { .. }
                | CoreError::MissingConfig(_)
                | CoreError::InvalidConfigType { .. }
                | CoreError::UnknownConfigKey(_)
                | CoreError::InvalidOverride(_)
                | CoreError::DependencyCycle(_)
                | CoreError::ProvidedInstanceTypeMismatch { .. }
        )
    }
}
