//! 配置解析
//!
//! 把覆盖配置、外部提供的共享配置和模块默认值合并为一棵完全解析、
//! 类型检查过的配置树。所有结构性错误（未知模块、缺失必填项、类型错误、
//! 未知键、循环依赖、共享实例类型不符）都在这里发现，早于任何实例构造。
//!
//! 优先级（从高到低）：
//! 1. 调用方对该键路径的显式覆盖
//! 2. 由 `provide_this` / `provide_children` 或调用方提供的共享配置
//! 3. 模块声明的默认值

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::descriptor::{ModuleDescriptor, ModuleId, NAME_KEY};
use super::instance::CacheKey;
use super::overrides::{join_path, OverrideMap, OverrideValue};
use super::registry::ModuleRegistry;
use super::value::ConfigValue;
use crate::utils::{CoreError, Result};

/// 作用域内可共享的配置：依赖键 -> 已解析配置
pub type SharedConfigs = BTreeMap<String, Arc<ResolvedConfig>>;

/// 依赖的绑定方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// 按本配置构造（或从缓存取得）
    Owned,
    /// 直接使用作用域中的共享实例
    Shared,
}

/// 已解析的依赖
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDependency {
    pub config: Arc<ResolvedConfig>,
    pub binding: Binding,
}

/// 完全解析的模块配置
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    /// 模块标识
    pub id: ModuleId,
    /// 全部配置项的最终值
    pub options: BTreeMap<String, ConfigValue>,
    /// 依赖键 -> 依赖配置
    pub dependencies: BTreeMap<String, ResolvedDependency>,
    /// 由以上内容派生的缓存键
    pub cache_key: CacheKey,
}

impl ResolvedConfig {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.options.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ConfigValue::as_str)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ConfigValue::as_int)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ConfigValue::as_float)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ConfigValue::as_bool)
    }

    pub fn get_path(&self, key: &str) -> Option<&Path> {
        self.get(key).and_then(ConfigValue::as_path)
    }

    pub fn get_str_list(&self, key: &str) -> Option<&[String]> {
        self.get(key).and_then(ConfigValue::as_str_list)
    }

    pub fn get_int_list(&self, key: &str) -> Option<&[i64]> {
        self.get(key).and_then(ConfigValue::as_int_list)
    }

    pub fn get_float_list(&self, key: &str) -> Option<&[f64]> {
        self.get(key).and_then(ConfigValue::as_float_list)
    }

    /// 依赖配置
    pub fn dependency(&self, key: &str) -> Option<&Arc<ResolvedConfig>> {
        self.dependencies.get(key).map(|d| &d.config)
    }

    /// 依赖的绑定方式
    pub fn binding(&self, key: &str) -> Option<Binding> {
        self.dependencies.get(key).map(|d| d.binding)
    }

    /// 嵌套 JSON 形式：`{"name": ..., <option>: ..., <dep>: {...}}`
    ///
    /// 输出可以直接作为覆盖配置重新输入，得到相同的缓存键。
    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(NAME_KEY.to_string(), Value::String(self.id.module_name.clone()));
        for (key, value) in &self.options {
            object.insert(key.clone(), value.to_json());
        }
        for (key, dep) in &self.dependencies {
            object.insert(key.clone(), dep.config.to_json());
        }
        Value::Object(object)
    }

    /// 深度优先遍历整棵配置树（依赖先于依赖方），回调参数为键路径和配置
    pub fn walk<F>(&self, visit: &mut F)
    where
        F: FnMut(&str, &ResolvedConfig),
    {
        self.walk_at("", visit);
    }

    fn walk_at<F>(&self, path: &str, visit: &mut F)
    where
        F: FnMut(&str, &ResolvedConfig),
    {
        for (key, dep) in &self.dependencies {
            dep.config.walk_at(&join_path(path, key), visit);
        }
        visit(path, self);
    }
}

/// 配置解析器
pub struct ConfigResolver<'r> {
    registry: &'r ModuleRegistry,
}

impl<'r> ConfigResolver<'r> {
    pub fn new(registry: &'r ModuleRegistry) -> Self {
        Self { registry }
    }

    /// 解析模块配置
    ///
    /// # Arguments
    ///
    /// * `descriptor` - 根模块描述符
    /// * `overrides` - 以根模块为作用域的覆盖配置
    /// * `shared` - 根作用域中可共享的配置（通常来自调用方提供的实例）
    ///
    /// # Errors
    ///
    /// 任何结构性错误，错误信息中带有出错的键路径。
    pub fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
        overrides: &OverrideMap,
        shared: &SharedConfigs,
    ) -> Result<Arc<ResolvedConfig>> {
        let mut ancestry = Vec::new();
        let config = self.resolve_node(descriptor, overrides, None, shared, "", &mut ancestry)?;
        debug!(
            module = %config.id,
            cache_key = %config.cache_key,
            "配置解析完成"
        );
        Ok(config)
    }

    fn resolve_node(
        &self,
        descriptor: &ModuleDescriptor,
        overrides: &OverrideMap,
        inherited: Option<&ResolvedConfig>,
        shared: &SharedConfigs,
        path: &str,
        ancestry: &mut Vec<ModuleId>,
    ) -> Result<Arc<ResolvedConfig>> {
        if let Some(pos) = ancestry.iter().position(|id| id == &descriptor.id) {
            let mut cycle: Vec<String> = ancestry[pos..].iter().map(ToString::to_string).collect();
            cycle.push(descriptor.id.to_string());
            return Err(CoreError::DependencyCycle(cycle));
        }

        check_keys(descriptor, overrides, path)?;
        let options = resolve_options(descriptor, overrides, inherited, path)?;

        ancestry.push(descriptor.id.clone());
        let dependencies = self.resolve_dependencies(descriptor, overrides, shared, path, ancestry);
        ancestry.pop();
        let dependencies = dependencies?;

        let cache_key = CacheKey::derive(
            &descriptor.id,
            &options,
            dependencies.iter().map(|(k, d)| (k, &d.config.cache_key)),
        );

        Ok(Arc::new(ResolvedConfig {
            id: descriptor.id.clone(),
            options,
            dependencies,
            cache_key,
        }))
    }

    fn resolve_dependencies(
        &self,
        descriptor: &ModuleDescriptor,
        overrides: &OverrideMap,
        shared: &SharedConfigs,
        path: &str,
        ancestry: &mut Vec<ModuleId>,
    ) -> Result<BTreeMap<String, ResolvedDependency>> {
        // 本作用域的共享配置：继承自上层，并由兄弟依赖按声明顺序补充
        let mut scope = shared.clone();
        let mut dependencies = BTreeMap::new();

        for dep in &descriptor.dependencies {
            let key_path = join_path(path, &dep.key);
            let child_overrides = overrides.scope(&dep.key).unwrap_or_default();
            let available = scope.get(&dep.key).cloned();

            if let Some(available) = &available {
                if available.id.module_type != dep.module_type {
                    return Err(CoreError::ProvidedInstanceTypeMismatch {
                        key: key_path,
                        expected: dep.module_type.clone(),
                        found: available.id.module_type.clone(),
                    });
                }
            }

            let resolved = match available {
                Some(available) if child_overrides.is_empty() => {
                    debug!(path = %key_path, module = %available.id, "使用共享依赖");
                    ResolvedDependency {
                        config: available,
                        binding: Binding::Shared,
                    }
                }
                available => {
                    if let Some(displaced) = &available {
                        warn!(
                            path = %key_path,
                            module = %displaced.id,
                            "显式覆盖优先于共享依赖，将单独解析"
                        );
                    }

                    let name = match child_overrides.value(NAME_KEY) {
                        Some(Value::String(name)) => name.clone(),
                        Some(other) => {
                            return Err(CoreError::InvalidConfigType {
                                path: join_path(&key_path, NAME_KEY),
                                expected: "string".to_string(),
                                got: other.to_string(),
                            })
                        }
                        None => available
                            .as_ref()
                            .map(|a| a.id.module_name.clone())
                            .unwrap_or_else(|| dep.default_name.clone()),
                    };

                    let child = self.registry.lookup(&dep.module_type, &name)?;
                    let inherited = available.as_deref().filter(|a| a.id == child.id);
                    debug!(path = %key_path, module = %child.id, "解析依赖");
                    let config = self.resolve_node(
                        &child,
                        &child_overrides,
                        inherited,
                        &scope,
                        &key_path,
                        ancestry,
                    )?;
                    ResolvedDependency {
                        config,
                        binding: Binding::Owned,
                    }
                }
            };

            if dep.provide_this {
                scope.insert(dep.key.clone(), Arc::clone(&resolved.config));
            }
            for child_key in &dep.provide_children {
                let child = resolved.config.dependency(child_key).ok_or_else(|| {
                    CoreError::InvalidDescriptor(format!(
                        "{}: 依赖 '{}' ({}) 没有可提供的子依赖 '{}'",
                        descriptor.id, dep.key, resolved.config.id, child_key
                    ))
                })?;
                scope.insert(child_key.clone(), Arc::clone(child));
            }

            dependencies.insert(dep.key.clone(), resolved);
        }

        Ok(dependencies)
    }
}

/// 覆盖配置中只允许出现配置项、依赖键和 `name`
fn check_keys(descriptor: &ModuleDescriptor, overrides: &OverrideMap, path: &str) -> Result<()> {
    for (key, value) in overrides.iter() {
        if key == NAME_KEY {
            if let OverrideValue::Map(_) = value {
                return Err(CoreError::InvalidConfigType {
                    path: join_path(path, key),
                    expected: "string".to_string(),
                    got: "嵌套配置".to_string(),
                });
            }
            continue;
        }
        if descriptor.find_option(key).is_none() && descriptor.find_dependency(key).is_none() {
            return Err(CoreError::UnknownConfigKey(join_path(path, key)));
        }
    }
    Ok(())
}

fn resolve_options(
    descriptor: &ModuleDescriptor,
    overrides: &OverrideMap,
    inherited: Option<&ResolvedConfig>,
    path: &str,
) -> Result<BTreeMap<String, ConfigValue>> {
    let mut options = BTreeMap::new();

    for option in &descriptor.config_spec {
        let key_path = join_path(path, &option.key);
        let type_error = |got: String| CoreError::InvalidConfigType {
            path: key_path.clone(),
            expected: option.value_type.to_string(),
            got,
        };

        let value = match overrides.get(&option.key) {
            Some(OverrideValue::Value(raw)) => option.value_type.coerce(raw).map_err(type_error)?,
            Some(OverrideValue::Map(_)) => return Err(type_error("嵌套配置".to_string())),
            None => match inherited.and_then(|c| c.get(&option.key)) {
                Some(value) => value.clone(),
                None => match option.default_value() {
                    Some(default) => option.value_type.coerce(default).map_err(type_error)?,
                    None => return Err(CoreError::MissingConfig(key_path)),
                },
            },
        };
        options.insert(option.key.clone(), value);
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::descriptor::{ConfigOption, DependencySpec, Module};
    use crate::module::value::ValueType;
    use std::any::Any;

    struct Dummy;

    impl Module for Dummy {
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn module(module_type: &str, name: &str) -> ModuleDescriptor {
        ModuleDescriptor::new(module_type, name, |_| Ok(Arc::new(Dummy)))
    }

    fn registry() -> ModuleRegistry {
        let mut builder = ModuleRegistry::builder();
        builder
            .register(module("collection", "robust04").option(ConfigOption::new("lang", "en", "")))
            .unwrap();
        builder
            .register(module("collection", "antique").option(ConfigOption::new("lang", "en", "")))
            .unwrap();
        builder
            .register(
                module("index", "simple")
                    .option(ConfigOption::new("stemmer", "none", ""))
                    .option(ConfigOption::new("x", 1, ""))
                    .dependency(DependencySpec::new("collection", "collection", "robust04")),
            )
            .unwrap();
        builder
            .register(
                module("searcher", "bm25")
                    .option(ConfigOption::new("hits", 1000, ""))
                    .option(ConfigOption::new("b", 0.4, "").with_type(ValueType::FloatList))
                    .dependency(DependencySpec::new("index", "index", "simple")),
            )
            .unwrap();
        builder
            .register(
                module("benchmark", "demo")
                    .dependency(DependencySpec::new("collection", "collection", "robust04")),
            )
            .unwrap();
        builder
            .register(
                module("task", "rank")
                    .dependency(
                        DependencySpec::new("benchmark", "benchmark", "demo")
                            .provide_this()
                            .provide_children(["collection"]),
                    )
                    .dependency(DependencySpec::new("searcher", "searcher", "bm25")),
            )
            .unwrap();
        builder
            .register(module("fold", "s1").option(ConfigOption::required(
                "split",
                ValueType::Path,
                "",
            )))
            .unwrap();
        builder.build().unwrap()
    }

    fn resolve(registry: &ModuleRegistry, t: &str, n: &str, args: &[&str]) -> Result<Arc<ResolvedConfig>> {
        let descriptor = registry.lookup(t, n)?;
        let overrides = OverrideMap::parse(args)?;
        ConfigResolver::new(registry).resolve(&descriptor, &overrides, &SharedConfigs::new())
    }

    #[test]
    fn test_defaults_and_overrides() {
        let registry = registry();
        let config = resolve(&registry, "index", "simple", &[]).unwrap();
        assert_eq!(config.get_int("x"), Some(1));

        let config = resolve(&registry, "index", "simple", &["x=2"]).unwrap();
        assert_eq!(config.get_int("x"), Some(2));
    }

    #[test]
    fn test_nested_override_path() {
        let registry = registry();
        let config = resolve(&registry, "searcher", "bm25", &["index.stemmer=porter", "b=0.4..0.8,0.2"]).unwrap();
        let index = config.dependency("index").unwrap();
        assert_eq!(index.get_str("stemmer"), Some("porter"));
        assert_eq!(config.get_float_list("b").unwrap().len(), 3);
    }

    #[test]
    fn test_name_override_selects_module() {
        let registry = registry();
        let config = resolve(&registry, "index", "simple", &["collection=antique"]).unwrap();
        assert_eq!(
            config.dependency("collection").unwrap().id,
            ModuleId::new("collection", "antique")
        );
    }

    #[test]
    fn test_missing_required_names_path() {
        let registry = registry();
        let err = resolve(&registry, "fold", "s1", &[]).unwrap_err();
        assert!(matches!(err, CoreError::MissingConfig(ref p) if p == "split"));
    }

    #[test]
    fn test_invalid_type_names_path() {
        let registry = registry();
        let err = resolve(&registry, "searcher", "bm25", &["hits=many"]).unwrap_err();
        match err {
            CoreError::InvalidConfigType { path, expected, .. } => {
                assert_eq!(path, "hits");
                assert_eq!(expected, "int");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = resolve(&registry, "searcher", "bm25", &["index.x.y=1"]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfigType { ref path, .. } if path == "index.x"));
    }

    #[test]
    fn test_unknown_key_and_module() {
        let registry = registry();
        let err = resolve(&registry, "searcher", "bm25", &["index.stemer=porter"]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownConfigKey(ref p) if p == "index.stemer"));

        let err = resolve(&registry, "searcher", "bm25", &["index=missing"]).unwrap_err();
        assert!(matches!(err, CoreError::UnknownModule { .. }));
    }

    #[test]
    fn test_provide_children_shares_config() {
        let registry = registry();
        let config = resolve(&registry, "task", "rank", &["benchmark.collection=antique"]).unwrap();

        let benchmark = config.dependency("benchmark").unwrap();
        let index = config
            .dependency("searcher")
            .unwrap()
            .dependency("index")
            .unwrap();
        assert_eq!(index.binding("collection"), Some(Binding::Shared));
        assert!(Arc::ptr_eq(
            index.dependency("collection").unwrap(),
            benchmark.dependency("collection").unwrap()
        ));
        assert_eq!(index.dependency("collection").unwrap().id.module_name, "antique");
    }

    #[test]
    fn test_explicit_override_beats_shared() {
        let registry = registry();
        let config = resolve(
            &registry,
            "task",
            "rank",
            &["benchmark.collection=antique", "searcher.index.collection.lang=de"],
        )
        .unwrap();

        let collection = config
            .dependency("searcher")
            .unwrap()
            .dependency("index")
            .unwrap()
            .dependency("collection")
            .unwrap();
        // 名称来自共享配置，显式覆盖的值优先
        assert_eq!(collection.id.module_name, "antique");
        assert_eq!(collection.get_str("lang"), Some("de"));
    }

    #[test]
    fn test_to_json_round_trip_keeps_cache_key() {
        let registry = registry();
        let config = resolve(&registry, "task", "rank", &["searcher.hits=10"]).unwrap();
        let overrides = OverrideMap::from_json(&config.to_json()).unwrap();
        let descriptor = registry.lookup("task", "rank").unwrap();
        let again = ConfigResolver::new(&registry)
            .resolve(&descriptor, &overrides, &SharedConfigs::new())
            .unwrap();
        assert_eq!(config.cache_key, again.cache_key);
    }

    #[test]
    fn test_walk_visits_dependencies_first() {
        let registry = registry();
        let config = resolve(&registry, "searcher", "bm25", &[]).unwrap();
        let mut seen = Vec::new();
        config.walk(&mut |path, c| seen.push((path.to_string(), c.id.module_type.clone())));
        assert_eq!(
            seen,
            vec![
                ("index.collection".to_string(), "collection".to_string()),
                ("index".to_string(), "index".to_string()),
                (String::new(), "searcher".to_string()),
            ]
        );
    }

    #[test]
    fn test_cycle_detected() {
        let mut builder = ModuleRegistry::builder();
        builder
            .register(module("a", "a").dependency(DependencySpec::new("b", "b", "b")))
            .unwrap();
        builder
            .register(module("b", "b").dependency(DependencySpec::new("a", "a", "a")))
            .unwrap();
        let registry = builder.build().unwrap();

        let err = resolve(&registry, "a", "a", &[]).unwrap_err();
        match err {
            CoreError::DependencyCycle(path) => assert_eq!(path, vec!["a/a", "b/b", "a/a"]),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
