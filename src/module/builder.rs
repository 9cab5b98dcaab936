//! 实例图构造
//!
//! 按解析后的配置树自底向上构造模块实例：
//! - 每个节点先查缓存，命中时整棵子树不再构造；缓存实例的共享依赖
//!   必须正是当前作用域中的实例，否则单独构造一个不入缓存的实例
//! - `Shared` 绑定直接使用作用域中的共享实例，不递归
//! - `provide_this` / `provide_children` 把已构造的实例暴露给后续兄弟依赖
//! - 工厂只在全部依赖构造完成后调用，错误带上模块键路径

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::descriptor::{ModuleContext, ModuleId};
use super::instance::{artifact_dir_for, InstanceCache, ModuleInstance};
use super::overrides::join_path;
use super::registry::ModuleRegistry;
use super::resolver::{Binding, ResolvedConfig, SharedConfigs};
use crate::utils::{CoreError, Result};

/// 调用方提供的实例：依赖键 -> 实例
pub type ProvidedInstances = BTreeMap<String, Arc<ModuleInstance>>;

/// 提取提供实例的配置，作为解析阶段的共享配置
pub fn shared_configs(provided: &ProvidedInstances) -> SharedConfigs {
    provided
        .iter()
        .map(|(key, instance)| (key.clone(), Arc::clone(instance.config())))
        .collect()
}

/// 实例图构造器
pub struct GraphBuilder<'a> {
    registry: &'a ModuleRegistry,
    cache: &'a InstanceCache,
    cache_dir: &'a Path,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(registry: &'a ModuleRegistry, cache: &'a InstanceCache, cache_dir: &'a Path) -> Self {
        Self {
            registry,
            cache,
            cache_dir,
        }
    }

    /// 构造实例树
    ///
    /// `provided` 必须与解析 `config` 时使用的共享配置一致。
    pub fn build(
        &self,
        config: &Arc<ResolvedConfig>,
        provided: &ProvidedInstances,
    ) -> Result<Arc<ModuleInstance>> {
        let mut ancestry = Vec::new();
        self.build_node(config, provided, "", &mut ancestry)
    }

    fn build_node(
        &self,
        config: &Arc<ResolvedConfig>,
        provided: &ProvidedInstances,
        path: &str,
        ancestry: &mut Vec<ModuleId>,
    ) -> Result<Arc<ModuleInstance>> {
        if let Some(pos) = ancestry.iter().position(|id| id == &config.id) {
            let mut cycle: Vec<String> = ancestry[pos..].iter().map(ToString::to_string).collect();
            cycle.push(config.id.to_string());
            return Err(CoreError::DependencyCycle(cycle));
        }

        let instance = self.cache.get_or_create(&config.cache_key, || {
            self.construct(config, provided, path, ancestry)
        })?;
        if self.wired_to(&instance, config, provided) {
            return Ok(instance);
        }

        warn!(
            module = %config.id,
            path = %path,
            cache_key = %config.cache_key,
            "缓存实例的共享依赖与当前提供的实例不同，单独构造"
        );
        self.construct(config, provided, path, ancestry)
    }

    fn construct(
        &self,
        config: &Arc<ResolvedConfig>,
        provided: &ProvidedInstances,
        path: &str,
        ancestry: &mut Vec<ModuleId>,
    ) -> Result<Arc<ModuleInstance>> {
        let descriptor = self.registry.lookup_id(&config.id)?;

        ancestry.push(config.id.clone());
        let dependencies = self.build_dependencies(config, provided, path, ancestry);
        ancestry.pop();
        let dependencies = dependencies?;

        let artifact_dir = artifact_dir_for(self.cache_dir, config);
        let label = if path.is_empty() {
            config.id.to_string()
        } else {
            path.to_string()
        };

        let ctx = ModuleContext {
            path,
            config,
            dependencies: &dependencies,
            cache_key: &config.cache_key,
            artifact_dir: &artifact_dir,
        };
        let module = (descriptor.factory)(&ctx).map_err(|source| {
            CoreError::ModuleFactoryFailed {
                path: label.clone(),
                source,
            }
        })?;

        info!(
            module = %config.id,
            path = %label,
            cache_key = %config.cache_key,
            "构造模块实例"
        );
        Ok(Arc::new(ModuleInstance::new(
            descriptor,
            Arc::clone(config),
            dependencies,
            artifact_dir,
            module,
        )))
    }

    /// 实例树中每条 `Shared` 边是否指向 `provided` 作用域中的同一个实例
    ///
    /// 作用域按构造时的规则逐层扩展，`Owned` 子树递归检查。
    fn wired_to(
        &self,
        instance: &ModuleInstance,
        config: &ResolvedConfig,
        provided: &ProvidedInstances,
    ) -> bool {
        let Ok(descriptor) = self.registry.lookup_id(&config.id) else {
            return false;
        };
        let mut scope = provided.clone();

        for dep in &descriptor.dependencies {
            let (Some(resolved), Some(actual)) =
                (config.dependencies.get(&dep.key), instance.dependency(&dep.key))
            else {
                return false;
            };
            let consistent = match resolved.binding {
                Binding::Shared => scope
                    .get(&dep.key)
                    .is_some_and(|expected| Arc::ptr_eq(expected, actual)),
                Binding::Owned => self.wired_to(actual, &resolved.config, &scope),
            };
            if !consistent {
                return false;
            }

            if dep.provide_this {
                scope.insert(dep.key.clone(), Arc::clone(actual));
            }
            for child_key in &dep.provide_children {
                match actual.dependency(child_key) {
                    Some(child) => {
                        scope.insert(child_key.clone(), Arc::clone(child));
                    }
                    None => return false,
                }
            }
        }
        true
    }

    fn build_dependencies(
        &self,
        config: &ResolvedConfig,
        provided: &ProvidedInstances,
        path: &str,
        ancestry: &mut Vec<ModuleId>,
    ) -> Result<BTreeMap<String, Arc<ModuleInstance>>> {
        let descriptor = self.registry.lookup_id(&config.id)?;
        let mut scope = provided.clone();
        let mut dependencies = BTreeMap::new();

        for dep in &descriptor.dependencies {
            let key_path = join_path(path, &dep.key);
            let resolved = config.dependencies.get(&dep.key).ok_or_else(|| {
                CoreError::Internal(format!("配置树缺少依赖 '{}'", key_path))
            })?;

            let instance = match resolved.binding {
                Binding::Shared => {
                    let instance = scope.get(&dep.key).cloned().ok_or_else(|| {
                        CoreError::Internal(format!("共享依赖 '{}' 未提供实例", key_path))
                    })?;
                    if instance.module_type() != dep.module_type {
                        return Err(CoreError::ProvidedInstanceTypeMismatch {
                            key: key_path,
                            expected: dep.module_type.clone(),
                            found: instance.module_type().to_string(),
                        });
                    }
                    debug!(path = %key_path, module = %instance.id(), "使用共享实例");
                    instance
                }
                Binding::Owned => self.build_node(&resolved.config, &scope, &key_path, ancestry)?,
            };

            if dep.provide_this {
                scope.insert(dep.key.clone(), Arc::clone(&instance));
            }
            for child_key in &dep.provide_children {
                let child = instance.dependency(child_key).ok_or_else(|| {
                    CoreError::InvalidDescriptor(format!(
                        "{}: 依赖 '{}' ({}) 没有可提供的子依赖 '{}'",
                        config.id,
                        dep.key,
                        instance.id(),
                        child_key
                    ))
                })?;
                scope.insert(child_key.clone(), Arc::clone(child));
            }

            dependencies.insert(dep.key.clone(), instance);
        }

        Ok(dependencies)
    }
}
