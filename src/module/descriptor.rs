//! 模块描述符定义
//!
//! 每个模块通过 [`ModuleDescriptor`] 声明：
//! - 模块类型与名称（注册表主键）
//! - 配置项列表 [`ConfigOption`]
//! - 依赖列表 [`DependencySpec`]
//! - 工厂函数：由解析后的配置和依赖实例构造模块对象
//! - （可选）任务命令 [`TaskSpec`]
//!
//! 引擎只通过这些声明与领域模块交互，不检查模块对象的内部状态。

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use super::instance::{CacheKey, ModuleInstance};
use super::resolver::ResolvedConfig;
use super::value::ValueType;
use crate::utils::{CoreError, Result};

/// 覆盖配置中表示模块名称的保留键
pub const NAME_KEY: &str = "name";

/// 命令行中表示“从文件加载覆盖配置”的保留键
pub const FILE_KEY: &str = "file";

fn is_reserved(key: &str) -> bool {
    key == NAME_KEY || key == FILE_KEY
}

/// 任务内置的帮助命令
pub const HELP_COMMANDS: &[&str] = &["describe", "print_config", "print_paths", "print_pipeline"];

/// 模块标识：(模块类型, 模块名称)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    /// 模块类型，如 "index"
    pub module_type: String,
    /// 模块名称，如 "simple"
    pub module_name: String,
}

impl ModuleId {
    pub fn new(module_type: impl Into<String>, module_name: impl Into<String>) -> Self {
        Self {
            module_type: module_type.into(),
            module_name: module_name.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module_type, self.module_name)
    }
}

/// 默认值：具体值或“必填”标记
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    /// 默认值
    Value(Value),
    /// 必须由覆盖配置提供
    Required,
}

/// 配置项声明
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigOption {
    /// 配置键，在同一描述符内唯一
    pub key: String,
    /// 默认值
    pub default: DefaultValue,
    /// 值类型
    pub value_type: ValueType,
    /// 说明
    pub description: String,
}

impl ConfigOption {
    /// 创建带默认值的配置项，值类型由默认值推断
    ///
    /// 无法推断时（如数组）按字符串处理，应配合 [`ConfigOption::with_type`] 使用。
    pub fn new(key: impl Into<String>, default: impl Into<Value>, description: impl Into<String>) -> Self {
        let default = default.into();
        let value_type = ValueType::infer(&default).unwrap_or(ValueType::String);
        Self {
            key: key.into(),
            default: DefaultValue::Value(default),
            value_type,
            description: description.into(),
        }
    }

    /// 创建必填配置项
    pub fn required(
        key: impl Into<String>,
        value_type: ValueType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            default: DefaultValue::Required,
            value_type,
            description: description.into(),
        }
    }

    /// 显式指定值类型
    pub fn with_type(mut self, value_type: ValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// 是否为必填项
    pub fn is_required(&self) -> bool {
        matches!(self.default, DefaultValue::Required)
    }

    /// 默认值（必填项返回 None）
    pub fn default_value(&self) -> Option<&Value> {
        match &self.default {
            DefaultValue::Value(v) => Some(v),
            DefaultValue::Required => None,
        }
    }
}

/// 依赖声明
#[derive(Debug, Clone, PartialEq)]
pub struct DependencySpec {
    /// 依赖键，在同一描述符内唯一，也是覆盖配置中的命名空间
    pub key: String,
    /// 依赖的模块类型
    pub module_type: String,
    /// 默认模块名称
    pub default_name: String,
    /// 构造完成后把该依赖实例提供给后续兄弟依赖
    pub provide_this: bool,
    /// 把该依赖自身的这些子依赖提供给后续兄弟依赖
    pub provide_children: Vec<String>,
}

impl DependencySpec {
    pub fn new(
        key: impl Into<String>,
        module_type: impl Into<String>,
        default_name: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            module_type: module_type.into(),
            default_name: default_name.into(),
            provide_this: false,
            provide_children: Vec::new(),
        }
    }

    /// 设置 provide_this
    pub fn provide_this(mut self) -> Self {
        self.provide_this = true;
        self
    }

    /// 设置 provide_children
    pub fn provide_children<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.provide_children = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// 任务命令声明
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    /// 任务自身的命令
    pub commands: Vec<String>,
    /// 未指定命令时执行的命令
    pub default_command: String,
}

impl TaskSpec {
    /// 所有可用命令（自身命令 + 帮助命令）
    pub fn available_commands(&self) -> Vec<String> {
        self.commands
            .iter()
            .cloned()
            .chain(HELP_COMMANDS.iter().map(|c| c.to_string()))
            .collect()
    }

    /// 是否支持该命令
    pub fn supports(&self, command: &str) -> bool {
        self.commands.iter().any(|c| c == command) || HELP_COMMANDS.contains(&command)
    }
}

/// 模块对象
///
/// 由工厂构造，构造完成后不可变。领域模块通过 [`Module::as_any`]
/// 向下转型访问具体类型。
pub trait Module: Any + Send + Sync {
    /// 向下转型入口
    fn as_any(&self) -> &dyn Any;

    /// 执行任务命令（只有任务模块需要实现）
    fn run_command(&self, command: &str, _ctx: &CommandContext<'_>) -> anyhow::Result<Value> {
        anyhow::bail!("模块不支持命令 '{}'", command)
    }
}

/// 工厂构造上下文
pub struct ModuleContext<'a> {
    /// 模块在依赖树中的键路径，根模块为空字符串
    pub path: &'a str,
    /// 解析后的配置
    pub config: &'a ResolvedConfig,
    /// 已构造的依赖实例
    pub dependencies: &'a BTreeMap<String, Arc<ModuleInstance>>,
    /// 缓存键
    pub cache_key: &'a CacheKey,
    /// 由缓存键派生的制品目录（不保证已创建）
    pub artifact_dir: &'a Path,
}

impl<'a> ModuleContext<'a> {
    /// 获取依赖实例
    pub fn dependency(&self, key: &str) -> anyhow::Result<Arc<ModuleInstance>> {
        self.dependencies
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("依赖 '{}' 不存在", key))
    }
}

/// 任务命令执行上下文
pub struct CommandContext<'a> {
    /// 任务实例
    pub instance: &'a ModuleInstance,
    /// 由缓存键派生的结果目录（不保证已创建）
    pub results_dir: &'a Path,
}

impl<'a> CommandContext<'a> {
    /// 获取任务的依赖实例
    pub fn dependency(&self, key: &str) -> anyhow::Result<&'a Arc<ModuleInstance>> {
        self.instance
            .dependency(key)
            .ok_or_else(|| anyhow::anyhow!("依赖 '{}' 不存在", key))
    }
}

/// 模块工厂函数
pub type ModuleFactory =
    Arc<dyn Fn(&ModuleContext<'_>) -> anyhow::Result<Arc<dyn Module>> + Send + Sync>;

/// 模块描述符
///
/// 注册后由注册表独占持有，不可变。
#[derive(Clone)]
pub struct ModuleDescriptor {
    /// 模块标识
    pub id: ModuleId,
    /// 说明
    pub description: String,
    /// 配置项（有序）
    pub config_spec: Vec<ConfigOption>,
    /// 依赖（有序）
    pub dependencies: Vec<DependencySpec>,
    /// 任务命令（仅任务模块）
    pub task: Option<TaskSpec>,
    /// 工厂函数
    pub factory: ModuleFactory,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.id)
            .field("config_spec", &self.config_spec)
            .field("dependencies", &self.dependencies)
            .field("task", &self.task)
            .finish_non_exhaustive()
    }
}

impl ModuleDescriptor {
    /// 创建描述符
    ///
    /// # Example
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use chips_pipeline::module::{ConfigOption, DependencySpec, Module, ModuleDescriptor};
    ///
    /// struct Searcher;
    /// impl Module for Searcher {
    ///     fn as_any(&self) -> &dyn std::any::Any { self }
    /// }
    ///
    /// let descriptor = ModuleDescriptor::new("searcher", "BM25", |_ctx| Ok(Arc::new(Searcher)))
    ///     .option(ConfigOption::new("k1", 0.9, "词频饱和参数"))
    ///     .dependency(DependencySpec::new("index", "index", "simple"));
    ///
    /// assert_eq!(descriptor.id.to_string(), "searcher/BM25");
    /// assert!(descriptor.validate().is_ok());
    /// ```
    pub fn new<F>(module_type: impl Into<String>, module_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ModuleContext<'_>) -> anyhow::Result<Arc<dyn Module>> + Send + Sync + 'static,
    {
        Self {
            id: ModuleId::new(module_type, module_name),
            description: String::new(),
            config_spec: Vec::new(),
            dependencies: Vec::new(),
            task: None,
            factory: Arc::new(factory),
        }
    }

    /// 设置说明
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 添加配置项
    pub fn option(mut self, option: ConfigOption) -> Self {
        self.config_spec.push(option);
        self
    }

    /// 添加依赖
    pub fn dependency(mut self, dependency: DependencySpec) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 声明为任务模块
    pub fn task(mut self, commands: &[&str], default_command: impl Into<String>) -> Self {
        self.task = Some(TaskSpec {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            default_command: default_command.into(),
        });
        self
    }

    /// 模块类型
    pub fn module_type(&self) -> &str {
        &self.id.module_type
    }

    /// 模块名称
    pub fn module_name(&self) -> &str {
        &self.id.module_name
    }

    /// 查找配置项
    pub fn find_option(&self, key: &str) -> Option<&ConfigOption> {
        self.config_spec.iter().find(|o| o.key == key)
    }

    /// 查找依赖
    pub fn find_dependency(&self, key: &str) -> Option<&DependencySpec> {
        self.dependencies.iter().find(|d| d.key == key)
    }

    /// 验证描述符自身的一致性
    ///
    /// 收集全部问题后一次性返回 `InvalidDescriptor`。
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if !is_valid_ident(&self.id.module_type) {
            errors.push(format!("模块类型 '{}' 格式无效", self.id.module_type));
        }
        if !is_valid_ident(&self.id.module_name) {
            errors.push(format!("模块名称 '{}' 格式无效", self.id.module_name));
        }

        let mut keys = HashSet::new();
        for option in &self.config_spec {
            if !is_valid_ident(&option.key) || is_reserved(&option.key) {
                errors.push(format!("配置键 '{}' 无效或为保留键", option.key));
            }
            if !keys.insert(option.key.as_str()) {
                errors.push(format!("配置键 '{}' 重复", option.key));
            }
            if let Some(default) = option.default_value() {
                if let Err(got) = option.value_type.coerce(default) {
                    errors.push(format!(
                        "配置项 '{}' 的默认值 {} 不是 {} 类型",
                        option.key, got, option.value_type
                    ));
                }
            }
        }

        for dep in &self.dependencies {
            if !is_valid_ident(&dep.key) || is_reserved(&dep.key) {
                errors.push(format!("依赖键 '{}' 无效或为保留键", dep.key));
            }
            if !keys.insert(dep.key.as_str()) {
                errors.push(format!("依赖键 '{}' 与其他键重复", dep.key));
            }
            if !is_valid_ident(&dep.module_type) || !is_valid_ident(&dep.default_name) {
                errors.push(format!(
                    "依赖 '{}' 的目标 {}/{} 格式无效",
                    dep.key, dep.module_type, dep.default_name
                ));
            }
        }

        if let Some(task) = &self.task {
            let mut seen = HashSet::new();
            for command in &task.commands {
                if HELP_COMMANDS.contains(&command.as_str()) || !seen.insert(command.as_str()) {
                    errors.push(format!("任务命令 '{}' 重复或与帮助命令冲突", command));
                }
            }
            if !task.supports(&task.default_command) {
                errors.push(format!("默认命令 '{}' 未声明", task.default_command));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidDescriptor(format!(
                "{}: {}",
                self.id,
                errors.join("; ")
            )))
        }
    }
}

/// 标识符只允许字母、数字、下划线和连字符
pub(crate) fn is_valid_ident(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
