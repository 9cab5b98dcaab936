//! 覆盖配置
//!
//! 覆盖配置是一棵按依赖键分层的树，叶子是原始 JSON 值，类型转换
//! 推迟到解析阶段按配置项声明进行。
//!
//! 来源：
//! - 点分赋值：`searcher.index.stemmer=porter`
//! - YAML / JSON 文件：嵌套映射
//!
//! 依赖名称简写：`searcher=BM25` 等价于 `searcher.name=BM25`，
//! 同一作用域可以同时出现简写和嵌套键。

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use super::descriptor::NAME_KEY;
use crate::utils::{CoreError, Result};

/// 点分赋值的语法：`key(.key)*=value`
const ASSIGNMENT_PATTERN: &str = r"^(?s)([A-Za-z0-9_-]+(?:\.[A-Za-z0-9_-]+)*)=(.*)$";

/// 覆盖树节点
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    /// 叶子值
    Value(Value),
    /// 子作用域
    Map(OverrideMap),
}

/// 覆盖配置树
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideMap {
    entries: BTreeMap<String, OverrideValue>,
}

impl OverrideMap {
    /// 创建空覆盖配置
    pub fn new() -> Self {
        Self::default()
    }

    /// 解析一组点分赋值
    ///
    /// # Example
    ///
    /// ```rust
    /// use chips_pipeline::module::OverrideMap;
    ///
    /// let overrides = OverrideMap::parse(["searcher=BM25", "searcher.index.stemmer=porter"]).unwrap();
    /// let searcher = overrides.child("searcher").unwrap();
    /// assert_eq!(searcher.name(), Some("BM25"));
    /// assert!(searcher.child("index").is_some());
    /// ```
    pub fn parse<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pattern = Regex::new(ASSIGNMENT_PATTERN)
            .map_err(|e| CoreError::Internal(format!("覆盖配置语法编译失败: {}", e)))?;

        let mut map = Self::new();
        for assignment in assignments {
            let assignment = assignment.as_ref().trim();
            if assignment.is_empty() {
                continue;
            }
            let captures = pattern.captures(assignment).ok_or_else(|| {
                CoreError::InvalidOverride(format!("'{}' 不是 key=value 形式", assignment))
            })?;
            let key = &captures[1];
            let value = captures[2].trim();
            map.set(key, Value::String(value.to_string()))?;
        }
        Ok(map)
    }

    /// 解析以空白分隔的点分赋值串
    pub fn parse_str(text: &str) -> Result<Self> {
        Self::parse(text.split_whitespace())
    }

    /// 从嵌套 JSON 对象构造
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Object(object) => Self::from_object(object, ""),
            Value::Null => Ok(Self::new()),
            other => Err(CoreError::InvalidOverride(format!(
                "覆盖配置顶层必须是映射, 实际为 {}",
                other
            ))),
        }
    }

    fn from_object(object: &Map<String, Value>, path: &str) -> Result<Self> {
        let mut map = Self::new();
        for (key, value) in object {
            let key_path = join_path(path, key);
            if !is_valid_segment(key) {
                return Err(CoreError::InvalidOverride(format!("键 '{}' 格式无效", key_path)));
            }
            let entry = match value {
                Value::Object(child) => OverrideValue::Map(Self::from_object(child, &key_path)?),
                Value::Null => {
                    return Err(CoreError::InvalidOverride(format!("键 '{}' 的值为空", key_path)))
                }
                leaf => OverrideValue::Value(leaf.clone()),
            };
            map.insert(key.clone(), entry);
        }
        Ok(map)
    }

    /// 解析 YAML 文本
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(content)?;
        Self::from_json(&value)
    }

    /// 从文件加载，扩展名为 `.json` 时按 JSON 解析，否则按 YAML 解析
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            CoreError::ConfigLoadFailed(format!("读取 {} 失败: {}", path.display(), e))
        })?;
        let map = if path.extension().map(|e| e == "json").unwrap_or(false) {
            let value: Value = serde_json::from_str(&content)?;
            Self::from_json(&value)?
        } else {
            Self::from_yaml_str(&content)?
        };
        debug!(path = %path.display(), keys = map.len(), "已加载覆盖配置文件");
        Ok(map)
    }

    /// 按点分路径设置值
    pub fn set(&mut self, dotted: &str, value: impl Into<Value>) -> Result<()> {
        let segments: Vec<&str> = dotted.split('.').collect();
        if segments.iter().any(|s| !is_valid_segment(s)) {
            return Err(CoreError::InvalidOverride(format!("键 '{}' 格式无效", dotted)));
        }
        self.set_path(&segments, value.into());
        Ok(())
    }

    fn set_path(&mut self, segments: &[&str], value: Value) {
        match segments {
            [] => {}
            [last] => self.insert((*last).to_string(), OverrideValue::Value(value)),
            [first, rest @ ..] => {
                let mut scope = OverrideMap::new();
                scope.set_path(rest, value);
                self.insert((*first).to_string(), OverrideValue::Map(scope));
            }
        }
    }

    /// 只含名称的作用域
    fn named(name: Value) -> Self {
        let mut scope = Self::new();
        scope
            .entries
            .insert(NAME_KEY.to_string(), OverrideValue::Value(name));
        scope
    }

    /// 插入节点
    ///
    /// 叶子与作用域相遇时按名称简写合并：叶子成为作用域的 `name`。
    fn insert(&mut self, key: String, value: OverrideValue) {
        let merged = match (self.entries.remove(&key), value) {
            (Some(OverrideValue::Map(mut scope)), OverrideValue::Value(leaf)) => {
                scope
                    .entries
                    .insert(NAME_KEY.to_string(), OverrideValue::Value(leaf));
                OverrideValue::Map(scope)
            }
            (Some(OverrideValue::Map(mut scope)), OverrideValue::Map(other)) => {
                scope.merge(other);
                OverrideValue::Map(scope)
            }
            (Some(OverrideValue::Value(leaf)), OverrideValue::Map(other)) => {
                let mut scope = Self::named(leaf);
                scope.merge(other);
                OverrideValue::Map(scope)
            }
            (_, value) => value,
        };
        self.entries.insert(key, merged);
    }

    /// 合并另一份覆盖配置，`other` 中的值优先
    pub fn merge(&mut self, other: OverrideMap) {
        for (key, value) in other.entries {
            self.insert(key, value);
        }
    }

    /// 获取节点
    pub fn get(&self, key: &str) -> Option<&OverrideValue> {
        self.entries.get(key)
    }

    /// 获取叶子值
    pub fn value(&self, key: &str) -> Option<&Value> {
        match self.entries.get(key) {
            Some(OverrideValue::Value(v)) => Some(v),
            _ => None,
        }
    }

    /// 获取子作用域（叶子返回 None，见 [`OverrideMap::scope`]）
    pub fn child(&self, key: &str) -> Option<&OverrideMap> {
        match self.entries.get(key) {
            Some(OverrideValue::Map(m)) => Some(m),
            _ => None,
        }
    }

    /// 获取依赖键对应的子作用域，叶子按名称简写展开
    pub fn scope(&self, key: &str) -> Option<OverrideMap> {
        match self.entries.get(key)? {
            OverrideValue::Map(m) => Some(m.clone()),
            OverrideValue::Value(v) => Some(Self::named(v.clone())),
        }
    }

    /// 本作用域的模块名称覆盖（仅当值为字符串）
    pub fn name(&self) -> Option<&str> {
        self.value(NAME_KEY).and_then(Value::as_str)
    }

    /// 所有键
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// 遍历节点
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OverrideValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 转换为嵌套 JSON
    pub fn to_json(&self) -> Value {
        let object: Map<String, Value> = self
            .entries
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    OverrideValue::Value(v) => v.clone(),
                    OverrideValue::Map(m) => m.to_json(),
                };
                (k.clone(), value)
            })
            .collect();
        Value::Object(object)
    }

    /// 转换回点分赋值形式（按键排序）
    pub fn to_assignments(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_assignments("", &mut out);
        out
    }

    fn collect_assignments(&self, prefix: &str, out: &mut Vec<String>) {
        for (key, value) in &self.entries {
            let path = join_path(prefix, key);
            match value {
                OverrideValue::Value(Value::String(s)) => out.push(format!("{}={}", path, s)),
                OverrideValue::Value(v) => out.push(format!("{}={}", path, v)),
                OverrideValue::Map(m) => m.collect_assignments(&path, out),
            }
        }
    }
}

/// 拼接键路径，根路径为空字符串
pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    super::descriptor::is_valid_ident(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_nested() {
        let map = OverrideMap::parse(["searcher.index.stemmer=porter", "hits=5"]).unwrap();
        assert_eq!(map.value("hits"), Some(&json!("5")));
        let index = map.child("searcher").unwrap().child("index").unwrap();
        assert_eq!(index.value("stemmer"), Some(&json!("porter")));
    }

    #[test]
    fn test_parse_value_may_contain_equals_and_dots() {
        let map = OverrideMap::parse(["query=a=b", "b=0.4..1,0.2"]).unwrap();
        assert_eq!(map.value("query"), Some(&json!("a=b")));
        assert_eq!(map.value("b"), Some(&json!("0.4..1,0.2")));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["noequals", "=x", "a..b=1", "a b=1", ".a=1"] {
            let err = OverrideMap::parse([bad]).unwrap_err();
            assert!(matches!(err, CoreError::InvalidOverride(_)), "{}", bad);
        }
    }

    #[test]
    fn test_name_shorthand_before_nested() {
        let map = OverrideMap::parse(["searcher=BM25", "searcher.k1=1.2"]).unwrap();
        let searcher = map.child("searcher").unwrap();
        assert_eq!(searcher.name(), Some("BM25"));
        assert_eq!(searcher.value("k1"), Some(&json!("1.2")));
    }

    #[test]
    fn test_name_shorthand_after_nested() {
        let map = OverrideMap::parse(["searcher.k1=1.2", "searcher=BM25"]).unwrap();
        let searcher = map.child("searcher").unwrap();
        assert_eq!(searcher.name(), Some("BM25"));
        assert_eq!(searcher.value("k1"), Some(&json!("1.2")));
    }

    #[test]
    fn test_scope_expands_leaf() {
        let map = OverrideMap::parse(["searcher=BM25"]).unwrap();
        assert!(map.child("searcher").is_none());
        assert_eq!(map.scope("searcher").unwrap().name(), Some("BM25"));
        assert!(map.scope("index").is_none());
    }

    #[test]
    fn test_later_assignment_wins() {
        let map = OverrideMap::parse(["hits=5", "hits=10"]).unwrap();
        assert_eq!(map.value("hits"), Some(&json!("10")));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = "searcher:\n  name: BM25\n  index:\n    stemmer: porter\nb: [0.4, 0.6]\n";
        let map = OverrideMap::from_yaml_str(yaml).unwrap();
        assert_eq!(map.value("b"), Some(&json!([0.4, 0.6])));
        let searcher = map.child("searcher").unwrap();
        assert_eq!(searcher.name(), Some("BM25"));
        assert_eq!(
            searcher.child("index").unwrap().value("stemmer"),
            Some(&json!("porter"))
        );
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(OverrideMap::from_json(&json!(["a"])).is_err());
        assert!(OverrideMap::from_json(&json!({"a": null})).is_err());
        assert!(OverrideMap::from_json(&json!({"a b": 1})).is_err());
        assert!(OverrideMap::from_json(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_merge_command_line_over_file() {
        let mut file = OverrideMap::from_json(&json!({
            "searcher": {"name": "BM25", "k1": 0.9},
            "hits": 100
        }))
        .unwrap();
        let cli = OverrideMap::parse(["searcher.k1=1.2", "searcher=QL"]).unwrap();
        file.merge(cli);

        let searcher = file.child("searcher").unwrap();
        assert_eq!(searcher.name(), Some("QL"));
        assert_eq!(searcher.value("k1"), Some(&json!("1.2")));
        assert_eq!(file.value("hits"), Some(&json!(100)));
    }

    #[test]
    fn test_merge_map_onto_leaf() {
        let mut base = OverrideMap::parse(["searcher=BM25"]).unwrap();
        base.merge(OverrideMap::parse(["searcher.k1=1.2"]).unwrap());
        let searcher = base.child("searcher").unwrap();
        assert_eq!(searcher.name(), Some("BM25"));
        assert_eq!(searcher.value("k1"), Some(&json!("1.2")));
    }

    #[test]
    fn test_to_json_and_assignments() {
        let map = OverrideMap::parse(["searcher.index.stemmer=porter", "hits=5"]).unwrap();
        assert_eq!(
            map.to_json(),
            json!({"hits": "5", "searcher": {"index": {"stemmer": "porter"}}})
        );
        assert_eq!(
            map.to_assignments(),
            vec!["hits=5".to_string(), "searcher.index.stemmer=porter".to_string()]
        );
    }

    #[tokio::test]
    async fn test_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let yaml = temp.path().join("overrides.yaml");
        tokio::fs::write(&yaml, "searcher:\n  hits: 3\n").await.unwrap();
        let map = OverrideMap::from_file(&yaml).await.unwrap();
        assert_eq!(
            map.child("searcher").unwrap().value("hits"),
            Some(&json!(3))
        );

        let json_path = temp.path().join("overrides.json");
        tokio::fs::write(&json_path, r#"{"hits": 7}"#).await.unwrap();
        let map = OverrideMap::from_file(&json_path).await.unwrap();
        assert_eq!(map.value("hits"), Some(&json!(7)));

        let missing = OverrideMap::from_file(temp.path().join("nope.yaml")).await;
        assert!(matches!(missing, Err(CoreError::ConfigLoadFailed(_))));
    }
}
