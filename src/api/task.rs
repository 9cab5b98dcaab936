//! 任务
//!
//! 任务是带命令的顶层模块。两种状态：
//! - `Unresolved`：配置已解析、已校验，实例尚未构造
//! - `Resolved`：实例树已构造
//!
//! 帮助命令（`describe`、`print_config`、`print_paths`、`print_pipeline`）
//! 只读取配置，不触发实例构造；任务自身的命令在首次执行时构造实例。

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::engine::Engine;
use crate::module::builder::ProvidedInstances;
use crate::module::descriptor::{CommandContext, ModuleDescriptor, TaskSpec};
use crate::module::graph::DependencyGraph;
use crate::module::instance::ModuleInstance;
use crate::module::resolver::{Binding, ResolvedConfig};
use crate::utils::{CoreError, Result};

/// 任务模块的类型名
pub const TASK_TYPE: &str = "task";

/// 任务状态
#[derive(Debug, Clone)]
pub enum TaskState {
    /// 未构造实例
    Unresolved,
    /// 实例树已构造
    Resolved(Arc<ModuleInstance>),
}

/// 任务
pub struct Task<'e> {
    engine: &'e Engine,
    descriptor: Arc<ModuleDescriptor>,
    spec: TaskSpec,
    config: Arc<ResolvedConfig>,
    provided: ProvidedInstances,
    state: TaskState,
}

impl<'e> Task<'e> {
    pub(crate) fn new(
        engine: &'e Engine,
        descriptor: Arc<ModuleDescriptor>,
        config: Arc<ResolvedConfig>,
        provided: ProvidedInstances,
    ) -> Result<Self> {
        let spec = descriptor.task.clone().ok_or_else(|| {
            CoreError::InvalidDescriptor(format!("{} 没有声明任务命令", descriptor.id))
        })?;
        Ok(Self {
            engine,
            descriptor,
            spec,
            config,
            provided,
            state: TaskState::Unresolved,
        })
    }

    /// 任务名称
    pub fn name(&self) -> &str {
        self.descriptor.module_name()
    }

    /// 全部可用命令（任务命令 + 帮助命令）
    pub fn commands(&self) -> Vec<String> {
        self.spec.available_commands()
    }

    pub fn default_command(&self) -> &str {
        &self.spec.default_command
    }

    /// 解析后的配置
    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.config
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, TaskState::Resolved(_))
    }

    /// 已构造的任务实例
    pub fn instance(&self) -> Option<&Arc<ModuleInstance>> {
        match &self.state {
            TaskState::Resolved(instance) => Some(instance),
            TaskState::Unresolved => None,
        }
    }

    /// 结果目录（由缓存键派生）
    pub fn results_dir(&self) -> PathBuf {
        self.engine.results_dir(&self.config)
    }

    /// 构造实例树（幂等）
    pub fn resolve(&mut self) -> Result<Arc<ModuleInstance>> {
        if let TaskState::Resolved(instance) = &self.state {
            return Ok(Arc::clone(instance));
        }
        let instance = self.engine.build(&self.config, &self.provided)?;
        debug!(task = %self.name(), cache_key = %instance.cache_key(), "任务实例已构造");
        self.state = TaskState::Resolved(Arc::clone(&instance));
        Ok(instance)
    }

    /// 执行命令，未指定时执行默认命令
    ///
    /// # Errors
    ///
    /// - `UnknownCommand`：任务不支持该命令
    /// - `CommandFailed`：任务命令返回错误
    /// - 构造实例时的任何错误
    pub fn run(&mut self, command: Option<&str>) -> Result<Value> {
        let command = command.unwrap_or(&self.spec.default_command).to_string();
        if !self.spec.supports(&command) {
            return Err(CoreError::UnknownCommand {
                task: self.name().to_string(),
                command,
                available: self.commands(),
            });
        }

        info!(task = %self.name(), command = %command, "执行任务命令");
        match command.as_str() {
            "describe" => Ok(Value::String(self.describe())),
            "print_config" => Ok(self.config.to_json()),
            "print_paths" => Ok(self.paths()),
            "print_pipeline" => self.pipeline(),
            _ => self.run_task_command(&command),
        }
    }

    fn run_task_command(&mut self, command: &str) -> Result<Value> {
        let instance = self.resolve()?;
        let results_dir = self.results_dir();
        let ctx = CommandContext {
            instance: &instance,
            results_dir: &results_dir,
        };
        instance
            .module()
            .run_command(command, &ctx)
            .map_err(|source| CoreError::CommandFailed {
                task: self.name().to_string(),
                command: command.to_string(),
                source,
            })
    }

    /// 模块树、配置值及说明
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{} - {}", self.config.id, self.descriptor.description);
        let _ = writeln!(out, "  命令: {}", self.commands().join(", "));
        let _ = writeln!(out, "  默认命令: {}", self.spec.default_command);
        self.describe_node(&self.config, 1, &mut out);
        out
    }

    fn describe_node(&self, config: &ResolvedConfig, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let descriptor = self.engine.registry().lookup_id(&config.id).ok();

        for (key, value) in &config.options {
            let description = descriptor
                .as_ref()
                .and_then(|d| d.find_option(key))
                .map(|o| o.description.as_str())
                .unwrap_or_default();
            if description.is_empty() {
                let _ = writeln!(out, "{}{} = {}", indent, key, value);
            } else {
                let _ = writeln!(out, "{}{} = {}  # {}", indent, key, value, description);
            }
        }

        for (key, dep) in &config.dependencies {
            let shared = if dep.binding == Binding::Shared {
                " (共享)"
            } else {
                ""
            };
            let _ = writeln!(out, "{}{}: {}{}", indent, key, dep.config.id, shared);
            self.describe_node(&dep.config, depth + 1, out);
        }
    }

    /// 结果目录和每个模块的制品目录
    pub fn paths(&self) -> Value {
        let mut artifacts = Map::new();
        self.config.walk(&mut |path, config| {
            let label = if path.is_empty() {
                config.id.to_string()
            } else {
                path.to_string()
            };
            artifacts.insert(
                label,
                Value::String(self.engine.artifact_dir(config).display().to_string()),
            );
        });

        json!({
            "results": self.results_dir().display().to_string(),
            "artifacts": artifacts,
        })
    }

    /// 实例构造顺序（依赖先于依赖方）
    pub fn pipeline(&self) -> Result<Value> {
        let order = DependencyGraph::from_resolved(&self.config).topological_sort()?;
        Ok(Value::Array(order.into_iter().map(Value::String).collect()))
    }
}

impl std::fmt::Debug for Task<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name())
            .field("cache_key", &self.config.cache_key)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
