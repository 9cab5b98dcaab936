//! 流水线引擎
//!
//! 对外的主入口：持有冻结的注册表、实例缓存和流水线配置，
//! 把解析器和构造器串起来。
//!
//! # 示例
//!
//! ```rust
//! use chips_pipeline::{builtin, Engine, OverrideMap, PipelineConfig, ProvidedInstances};
//!
//! let registry = builtin::registry().unwrap();
//! let engine = Engine::new(registry, PipelineConfig::default());
//!
//! let overrides = OverrideMap::parse(["hits=5"]).unwrap();
//! let config = engine
//!     .resolve("searcher", "termmatch", &overrides, &ProvidedInstances::new())
//!     .unwrap();
//! assert_eq!(config.get_int("hits"), Some(5));
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use super::task::{Task, TASK_TYPE};
use crate::core::config::PipelineConfig;
use crate::module::builder::{shared_configs, GraphBuilder, ProvidedInstances};
use crate::module::descriptor::NAME_KEY;
use crate::module::instance::{artifact_dir_for, results_dir_for, InstanceCache, ModuleInstance};
use crate::module::overrides::OverrideMap;
use crate::module::registry::ModuleRegistry;
use crate::module::resolver::{ConfigResolver, ResolvedConfig};
use crate::utils::{CoreError, Result};

// ============================================================================
// Engine
// ============================================================================

/// 流水线引擎
///
/// 可以在多个线程间共享（`&Engine` 即可并发调用 `create`）。
#[derive(Debug)]
pub struct Engine {
    /// 流水线配置
    config: PipelineConfig,

    /// 冻结的模块注册表
    registry: Arc<ModuleRegistry>,

    /// 实例缓存
    cache: Arc<InstanceCache>,
}

impl Engine {
    /// 创建引擎，使用新的实例缓存
    pub fn new(registry: ModuleRegistry, config: PipelineConfig) -> Self {
        Self::with_cache(Arc::new(registry), Arc::new(InstanceCache::new()), config)
    }

    /// 使用已有的注册表和缓存创建引擎（多个引擎共享实例）
    pub fn with_cache(
        registry: Arc<ModuleRegistry>,
        cache: Arc<InstanceCache>,
        config: PipelineConfig,
    ) -> Self {
        info!(
            modules = registry.len(),
            results_dir = %config.storage.results_dir.display(),
            cache_dir = %config.storage.cache_dir.display(),
            "流水线引擎已创建"
        );
        Self {
            config,
            registry,
            cache,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &InstanceCache {
        &self.cache
    }

    /// 解析模块配置，不构造任何实例
    ///
    /// 根作用域中的 `name` 覆盖优先于 `module_name` 参数。
    ///
    /// # Errors
    ///
    /// 全部结构性错误（未知模块、缺失/错误配置、循环依赖、共享实例类型不符）。
    pub fn resolve(
        &self,
        module_type: &str,
        module_name: &str,
        overrides: &OverrideMap,
        provided: &ProvidedInstances,
    ) -> Result<Arc<ResolvedConfig>> {
        let module_name = match overrides.value(NAME_KEY) {
            None => module_name,
            Some(Value::String(name)) => name.as_str(),
            Some(other) => {
                return Err(CoreError::InvalidConfigType {
                    path: NAME_KEY.to_string(),
                    expected: "string".to_string(),
                    got: other.to_string(),
                })
            }
        };
        debug!(module_type, module_name, "解析模块配置");
        let descriptor = self.registry.lookup(module_type, module_name)?;
        ConfigResolver::new(&self.registry).resolve(&descriptor, overrides, &shared_configs(provided))
    }

    /// 按解析后的配置构造实例
    ///
    /// `provided` 必须与解析时使用的相同。
    pub fn build(
        &self,
        config: &Arc<ResolvedConfig>,
        provided: &ProvidedInstances,
    ) -> Result<Arc<ModuleInstance>> {
        GraphBuilder::new(&self.registry, &self.cache, &self.config.storage.cache_dir)
            .build(config, provided)
    }

    /// 创建（或从缓存取得）模块实例
    ///
    /// 相同的 (类型, 名称, 有效配置) 总是得到同一个实例。
    ///
    /// # Arguments
    ///
    /// * `module_type` - 模块类型
    /// * `module_name` - 模块名称
    /// * `overrides` - 覆盖配置
    /// * `provided` - 调用方提供的实例，按依赖键向整棵子树传播
    pub fn create(
        &self,
        module_type: &str,
        module_name: &str,
        overrides: &OverrideMap,
        provided: &ProvidedInstances,
    ) -> Result<Arc<ModuleInstance>> {
        let config = self.resolve(module_type, module_name, overrides, provided)?;
        self.build(&config, provided)
    }

    /// 创建任务
    ///
    /// 配置在这里完成解析，结构性错误立即返回；实例在首次执行需要实例的命令时构造。
    pub fn task(&self, name: &str, overrides: OverrideMap) -> Result<Task<'_>> {
        self.task_with_provided(name, overrides, ProvidedInstances::new())
    }

    /// 创建带外部提供实例的任务
    pub fn task_with_provided(
        &self,
        name: &str,
        overrides: OverrideMap,
        provided: ProvidedInstances,
    ) -> Result<Task<'_>> {
        let config = self.resolve(TASK_TYPE, name, &overrides, &provided)?;
        let descriptor = self.registry.lookup_id(&config.id)?;
        Task::new(self, descriptor, config, provided)
    }

    /// 模块的制品目录
    pub fn artifact_dir(&self, config: &ResolvedConfig) -> PathBuf {
        artifact_dir_for(&self.config.storage.cache_dir, config)
    }

    /// 模块的结果目录
    pub fn results_dir(&self, config: &ResolvedConfig) -> PathBuf {
        results_dir_for(&self.config.storage.results_dir, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin;
    use crate::utils::CoreError;

    fn engine() -> (tempfile::TempDir, Engine) {
        let temp = tempfile::TempDir::new().unwrap();
        let config = PipelineConfig::builder()
            .results_dir(temp.path().join("results"))
            .cache_dir(temp.path().join("cache"))
            .build();
        (temp, Engine::new(builtin::registry().unwrap(), config))
    }

    #[test]
    fn test_create_is_idempotent() {
        let (_temp, engine) = engine();
        let overrides = OverrideMap::parse(["hits=3"]).unwrap();
        let none = ProvidedInstances::new();

        let a = engine.create("searcher", "termmatch", &overrides, &none).unwrap();
        let b = engine.create("searcher", "termmatch", &overrides, &none).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_root_name_override() {
        let (_temp, engine) = engine();
        let overrides = OverrideMap::parse(["name=missing"]).unwrap();
        let err = engine
            .resolve("searcher", "termmatch", &overrides, &ProvidedInstances::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownModule { ref module_name, .. } if module_name == "missing"));
    }

    #[test]
    fn test_paths_derive_from_cache_key() {
        let (temp, engine) = engine();
        let config = engine
            .resolve("index", "simple", &OverrideMap::new(), &ProvidedInstances::new())
            .unwrap();
        let artifact = engine.artifact_dir(&config);
        assert!(artifact.starts_with(temp.path().join("cache").join("index").join("simple")));
        assert!(artifact.ends_with(config.cache_key.digest()));
        assert!(engine
            .results_dir(&config)
            .starts_with(temp.path().join("results").join("index-simple")));
    }

    #[test]
    fn test_task_requires_task_module() {
        let (_temp, engine) = engine();
        let err = engine.task("missing", OverrideMap::new()).unwrap_err();
        assert!(matches!(err, CoreError::UnknownModule { .. }));
    }
}
