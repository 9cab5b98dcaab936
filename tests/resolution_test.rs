//! 配置解析集成测试
//!
//! 覆盖优先级、键路径错误、类型检查、循环检测和缓存键的确定性

use std::any::Any;
use std::sync::Arc;

use chips_pipeline::module::{Binding, ConfigValue, ValueType};
use chips_pipeline::{
    ConfigOption, CoreError, DependencySpec, Engine, Module, ModuleDescriptor, ModuleRegistry,
    OverrideMap, PipelineConfig, ProvidedInstances,
};
use tempfile::TempDir;

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
        .register(module("widget", "basic").option(ConfigOption::new("x", 1, "测试值")))
        .unwrap();
    builder
        .register(module("collection", "robust04").option(ConfigOption::new("lang", "en", "")))
        .unwrap();
    builder
        .register(module("collection", "antique").option(ConfigOption::new("lang", "en", "")))
        .unwrap();
    builder
        .register(
            module("index", "simple")
                .option(ConfigOption::new("stemmer", "none", "词干提取器"))
                .option(ConfigOption::new("indexstops", false, "是否保留停用词"))
                .dependency(DependencySpec::new("collection", "collection", "robust04")),
        )
        .unwrap();
    builder
        .register(
            module("searcher", "bm25")
                .option(ConfigOption::new("k1", 0.9, ""))
                .option(ConfigOption::new("b", 0.4, ""))
                .option(ConfigOption::new("hits", 1000, ""))
                .option(ConfigOption::new("fields", "title", "").with_type(ValueType::StrList))
                .dependency(DependencySpec::new("index", "index", "simple")),
        )
        .unwrap();
    builder
        .register(
            module("searcher", "grid")
                .option(ConfigOption::new("k1", "0.9", "").with_type(ValueType::FloatList))
                .option(ConfigOption::new("depths", "10", "").with_type(ValueType::IntList))
                .dependency(DependencySpec::new("index", "index", "simple")),
        )
        .unwrap();
    builder
        .register(module("split", "fold").option(ConfigOption::required("fold", ValueType::Path, "折文件")))
        .unwrap();
    builder
        .register(
            module("experiment", "main")
                .dependency(DependencySpec::new("split", "split", "fold"))
                .dependency(DependencySpec::new("searcher", "searcher", "bm25")),
        )
        .unwrap();
    builder
        .register(module("a", "a").dependency(DependencySpec::new("b", "b", "b")))
        .unwrap();
    builder
        .register(module("b", "b").dependency(DependencySpec::new("a", "a", "a")))
        .unwrap();
    builder.build().unwrap()
}

fn engine() -> (TempDir, Engine) {
    let temp = TempDir::new().unwrap();
    let config = PipelineConfig::builder()
        .results_dir(temp.path().join("results"))
        .cache_dir(temp.path().join("cache"))
        .build();
    (temp, Engine::new(registry(), config))
}

fn overrides(assignments: &[&str]) -> OverrideMap {
    OverrideMap::parse(assignments).unwrap()
}

/// 默认值与显式覆盖
#[test]
fn test_override_beats_default() {
    let (_temp, engine) = engine();
    let none = ProvidedInstances::new();

    let default = engine.resolve("widget", "basic", &OverrideMap::new(), &none).unwrap();
    assert_eq!(default.get_int("x"), Some(1));

    let overridden = engine.resolve("widget", "basic", &overrides(&["x=2"]), &none).unwrap();
    assert_eq!(overridden.get_int("x"), Some(2));
    assert_ne!(default.cache_key, overridden.cache_key);
}

/// 覆盖按依赖键命名空间传递
#[test]
fn test_nested_overrides() {
    let (_temp, engine) = engine();
    let config = engine
        .resolve(
            "searcher",
            "bm25",
            &overrides(&["k1=1.2", "index.stemmer=porter", "index.collection=antique"]),
            &ProvidedInstances::new(),
        )
        .unwrap();

    assert_eq!(config.get_float("k1"), Some(1.2));
    assert_eq!(config.get_float("b"), Some(0.4));
    assert_eq!(config.get_str_list("fields"), Some(&["title".to_string()][..]));

    let index = config.dependency("index").unwrap();
    assert_eq!(index.get_str("stemmer"), Some("porter"));
    assert_eq!(index.get_bool("indexstops"), Some(false));
    assert_eq!(index.binding("collection"), Some(Binding::Owned));
    assert_eq!(index.dependency("collection").unwrap().id.module_name, "antique");
}

/// 列表值支持区间写法
#[test]
fn test_list_options() {
    let (_temp, engine) = engine();
    let config = engine
        .resolve(
            "searcher",
            "grid",
            &overrides(&["k1=0.4..1,0.2", "depths=10,100"]),
            &ProvidedInstances::new(),
        )
        .unwrap();

    assert_eq!(config.get_float_list("k1"), Some(&[0.4, 0.6, 0.8, 1.0][..]));
    assert_eq!(config.get_int_list("depths"), Some(&[10, 100][..]));

    // 标量默认值包装为单元素列表
    let default = engine
        .resolve("searcher", "grid", &OverrideMap::new(), &ProvidedInstances::new())
        .unwrap();
    assert_eq!(default.get("k1"), Some(&ConfigValue::FloatList(vec![0.9])));
}

/// 缺失必填项时报告完整键路径
#[test]
fn test_missing_config_names_key_path() {
    let (_temp, engine) = engine();
    let err = engine
        .resolve("experiment", "main", &OverrideMap::new(), &ProvidedInstances::new())
        .unwrap_err();
    assert!(matches!(&err, CoreError::MissingConfig(path) if path == "split.fold"));

    let config = engine
        .resolve(
            "experiment",
            "main",
            &overrides(&["split.fold=/data/folds.json"]),
            &ProvidedInstances::new(),
        )
        .unwrap();
    let split = config.dependency("split").unwrap();
    assert_eq!(
        split.get_path("fold"),
        Some(std::path::Path::new("/data/folds.json"))
    );
}

/// 类型错误带上期望类型和实际值
#[test]
fn test_invalid_type() {
    let (_temp, engine) = engine();
    let err = engine
        .resolve(
            "experiment",
            "main",
            &overrides(&["split.fold=f", "searcher.hits=abc"]),
            &ProvidedInstances::new(),
        )
        .unwrap_err();

    match err {
        CoreError::InvalidConfigType {
            path,
            expected,
            got,
        } => {
            assert_eq!(path, "searcher.hits");
            assert_eq!(expected, "int");
            assert_eq!(got, "\"abc\"");
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// 未声明的键和未注册的模块在构造前被拒绝
#[test]
fn test_unknown_key_and_module() {
    let (_temp, engine) = engine();
    let none = ProvidedInstances::new();

    let err = engine
        .resolve("searcher", "bm25", &overrides(&["index.bogus=1"]), &none)
        .unwrap_err();
    assert!(matches!(&err, CoreError::UnknownConfigKey(path) if path == "index.bogus"));
    assert_eq!(err.error_code(), "CONFIG-003");

    let err = engine
        .resolve("searcher", "bm25", &overrides(&["index=missing"]), &none)
        .unwrap_err();
    assert!(matches!(
        &err,
        CoreError::UnknownModule { module_type, module_name }
            if module_type == "index" && module_name == "missing"
    ));

    let err = engine
        .create("searcher", "bm25", &overrides(&["index=missing"]), &none)
        .unwrap_err();
    assert!(matches!(err, CoreError::UnknownModule { .. }));
    assert!(engine.cache().is_empty());
}

/// A -> B -> A 在解析阶段失败
#[test]
fn test_cycle_rejected() {
    let (_temp, engine) = engine();
    let err = engine
        .create("a", "a", &OverrideMap::new(), &ProvidedInstances::new())
        .unwrap_err();

    match &err {
        CoreError::DependencyCycle(path) => {
            assert_eq!(path, &vec!["a/a".to_string(), "b/b".to_string(), "a/a".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.to_string(), "检测到循环依赖: a/a -> b/b -> a/a");
    assert!(engine.cache().is_empty());
}

/// 等价的覆盖写法得到相同的缓存键
#[test]
fn test_equivalent_overrides_share_cache_key() {
    let (_temp, engine) = engine();
    let none = ProvidedInstances::new();
    let resolve = |assignments: &[&str]| {
        engine
            .resolve("searcher", "bm25", &overrides(assignments), &none)
            .unwrap()
            .cache_key
            .clone()
    };

    let plain = resolve(&[]);
    assert_eq!(plain, resolve(&["k1=0.9", "hits=1000"]));
    assert_eq!(plain, resolve(&["index.collection.name=robust04"]));
    assert_eq!(resolve(&["index.collection=antique"]), resolve(&["index.collection.name=antique"]));
    assert_ne!(plain, resolve(&["index.collection=antique"]));

    let yaml = OverrideMap::from_yaml_str("k1: 1.5\nindex:\n  stemmer: porter\n").unwrap();
    let from_yaml = engine.resolve("searcher", "bm25", &yaml, &none).unwrap();
    assert_eq!(from_yaml.cache_key, resolve(&["k1=1.5", "index.stemmer=porter"]));
}

/// print_config 的输出可以作为覆盖配置重新输入
#[test]
fn test_to_json_round_trip() {
    let (_temp, engine) = engine();
    let none = ProvidedInstances::new();
    let config = engine
        .resolve(
            "searcher",
            "bm25",
            &overrides(&["k1=1.1", "index.collection=antique"]),
            &none,
        )
        .unwrap();

    let json = config.to_json();
    assert_eq!(json["name"], "bm25");
    assert_eq!(json["index"]["collection"]["name"], "antique");

    let replay = OverrideMap::from_json(&json).unwrap();
    let again = engine.resolve("searcher", "bm25", &replay, &none).unwrap();
    assert_eq!(again.cache_key, config.cache_key);
    assert_eq!(again.as_ref(), config.as_ref());
}

/// 根作用域的 name 覆盖选择根模块
#[test]
fn test_root_name_override() {
    let (_temp, engine) = engine();
    let config = engine
        .resolve(
            "collection",
            "robust04",
            &overrides(&["name=antique"]),
            &ProvidedInstances::new(),
        )
        .unwrap();
    assert_eq!(config.id.module_name, "antique");
}

/// 根作用域的 name 必须是字符串，与嵌套作用域一致
#[test]
fn test_root_name_must_be_string() {
    let (_temp, engine) = engine();
    let typed = OverrideMap::from_json(&serde_json::json!({ "name": 3 })).unwrap();

    let err = engine
        .resolve("collection", "robust04", &typed, &ProvidedInstances::new())
        .unwrap_err();
    match err {
        CoreError::InvalidConfigType {
            path,
            expected,
            got,
        } => {
            assert_eq!(path, "name");
            assert_eq!(expected, "string");
            assert_eq!(got, "3");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(engine.cache().is_empty());
}
