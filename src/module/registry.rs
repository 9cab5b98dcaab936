//! 模块注册表
//!
//! 注册分两个阶段：
//! 1. 初始化阶段：通过 [`RegistryBuilder`] 注册全部模块描述符
//! 2. 冻结：[`RegistryBuilder::build`] 做跨描述符校验，得到只读的 [`ModuleRegistry`]
//!
//! 冻结后的注册表被显式传给解析器和构造器，解析期间不再变化。

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::descriptor::{ModuleDescriptor, ModuleId};
use super::graph::DependencyGraph;
use crate::utils::{CoreError, Result};

/// 注册表构建器
#[derive(Default)]
pub struct RegistryBuilder {
    modules: BTreeMap<ModuleId, ModuleDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模块描述符
    ///
    /// # Errors
    ///
    /// - `DuplicateRegistration`：同一 (类型, 名称) 已注册
    /// - `InvalidDescriptor`：描述符自身不一致
    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<()> {
        if self.modules.contains_key(&descriptor.id) {
            return Err(CoreError::DuplicateRegistration {
                module_type: descriptor.id.module_type,
                module_name: descriptor.id.module_name,
            });
        }
        descriptor.validate()?;

        debug!(module = %descriptor.id, "注册模块");
        self.modules.insert(descriptor.id.clone(), descriptor);
        Ok(())
    }

    /// 已注册数量
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 冻结注册表
    ///
    /// 检查每个 `provide_children` 键是否由默认依赖模块声明，
    /// 收集全部问题后一次性返回。依赖的模块类型尚未注册、默认依赖图存在
    /// 循环只记录告警，因为覆盖配置可能选择其他模块。
    pub fn build(self) -> Result<ModuleRegistry> {
        let mut errors = Vec::new();

        for descriptor in self.modules.values() {
            for dep in &descriptor.dependencies {
                let has_type = self
                    .modules
                    .keys()
                    .any(|id| id.module_type == dep.module_type);
                if !has_type {
                    warn!(
                        module = %descriptor.id,
                        dependency = %dep.key,
                        module_type = %dep.module_type,
                        "依赖的模块类型尚无任何注册"
                    );
                    continue;
                }

                let default_id = ModuleId::new(dep.module_type.clone(), dep.default_name.clone());
                let Some(default) = self.modules.get(&default_id) else {
                    warn!(
                        module = %descriptor.id,
                        dependency = %dep.key,
                        default = %default_id,
                        "默认依赖模块未注册"
                    );
                    continue;
                };

                for child_key in &dep.provide_children {
                    if default.find_dependency(child_key).is_none() {
                        errors.push(format!(
                            "{}: 依赖 '{}' 的默认模块 {} 没有子依赖 '{}'",
                            descriptor.id, dep.key, default_id, child_key
                        ));
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(CoreError::InvalidDescriptor(errors.join("; ")));
        }

        let registry = ModuleRegistry {
            modules: self
                .modules
                .into_iter()
                .map(|(id, descriptor)| (id, Arc::new(descriptor)))
                .collect(),
        };

        if let Some(cycle) = registry.default_graph().find_cycle() {
            warn!(cycle = %cycle.join(" -> "), "默认依赖图存在循环");
        }

        info!(modules = registry.len(), "模块注册表已冻结");
        Ok(registry)
    }
}

/// 只读模块注册表
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<ModuleId, Arc<ModuleDescriptor>>,
}

impl ModuleRegistry {
    /// 创建注册表构建器
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// 查找模块描述符
    ///
    /// # Errors
    ///
    /// 未注册时返回 `UnknownModule`。
    pub fn lookup(&self, module_type: &str, module_name: &str) -> Result<Arc<ModuleDescriptor>> {
        self.lookup_id(&ModuleId::new(module_type, module_name))
    }

    /// 按模块标识查找
    pub fn lookup_id(&self, id: &ModuleId) -> Result<Arc<ModuleDescriptor>> {
        self.modules
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownModule {
                module_type: id.module_type.clone(),
                module_name: id.module_name.clone(),
            })
    }

    /// 是否已注册
    pub fn contains(&self, module_type: &str, module_name: &str) -> bool {
        self.modules
            .contains_key(&ModuleId::new(module_type, module_name))
    }

    /// 按 (类型, 名称) 顺序列出全部模块
    pub fn list_modules(&self) -> impl Iterator<Item = &Arc<ModuleDescriptor>> {
        self.modules.values()
    }

    /// 全部模块类型（去重、有序）
    pub fn module_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .modules
            .keys()
            .map(|id| id.module_type.as_str())
            .collect();
        types.dedup();
        types
    }

    /// 某一类型下的全部模块名称
    pub fn names_of(&self, module_type: &str) -> Vec<&str> {
        self.modules
            .keys()
            .filter(|id| id.module_type == module_type)
            .map(|id| id.module_name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// 按默认依赖名称连边得到的模块图
    pub fn default_graph(&self) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        for descriptor in self.modules.values() {
            let id = descriptor.id.to_string();
            graph.add_module(&id);
            for dep in &descriptor.dependencies {
                let target = ModuleId::new(dep.module_type.clone(), dep.default_name.clone());
                if self.modules.contains_key(&target) {
                    graph.add_dependency(&id, &target.to_string());
                }
            }
        }
        graph
    }
}
