//! 配置值类型与类型转换
//!
//! 覆盖配置可能来自命令行（全是文本）或 YAML/JSON 文件（带类型），
//! 这里统一把原始值转换为声明的 [`ValueType`]。

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 数值区间展开的最大元素数
const MAX_RANGE_LEN: usize = 10_000;

/// 浮点区间元素保留的有效数字位数
const RANGE_SIGNIFICANT_DIGITS: usize = 12;

/// 配置值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// 字符串
    String,
    /// 64 位整数
    Int,
    /// 双精度浮点数
    Float,
    /// 布尔值
    Bool,
    /// 文件系统路径
    Path,
    /// 字符串列表（逗号分隔）
    StrList,
    /// 整数列表，支持 `start..stop,step` 区间写法
    IntList,
    /// 浮点数列表，支持 `start..stop,step` 区间写法
    FloatList,
}

impl ValueType {
    /// 类型名称
    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Bool => "bool",
            ValueType::Path => "path",
            ValueType::StrList => "strlist",
            ValueType::IntList => "intlist",
            ValueType::FloatList => "floatlist",
        }
    }

    /// 是否为列表类型
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            ValueType::StrList | ValueType::IntList | ValueType::FloatList
        )
    }

    /// 根据 JSON 值推断类型（用于未显式声明类型的默认值）
    pub fn infer(value: &Value) -> Option<ValueType> {
        match value {
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(ValueType::Int),
            Value::Number(_) => Some(ValueType::Float),
            Value::String(_) => Some(ValueType::String),
            _ => None,
        }
    }

    /// 将原始值转换为本类型
    ///
    /// 失败时返回实际值的文本表示，由调用方包装为带路径的错误。
    pub fn coerce(&self, raw: &Value) -> Result<ConfigValue, String> {
        let got = || describe_raw(raw);
        match self {
            ValueType::String => scalar_text(raw).map(ConfigValue::Str).ok_or_else(got),
            ValueType::Int => coerce_int(raw).map(ConfigValue::Int).ok_or_else(got),
            ValueType::Float => coerce_float(raw).map(ConfigValue::Float).ok_or_else(got),
            ValueType::Bool => coerce_bool(raw).map(ConfigValue::Bool).ok_or_else(got),
            ValueType::Path => match raw {
                Value::String(s) if !s.trim().is_empty() => {
                    Ok(ConfigValue::Path(PathBuf::from(s.trim())))
                }
                _ => Err(got()),
            },
            ValueType::StrList => list_items(raw)
                .and_then(|items| items.iter().map(scalar_text).collect::<Option<Vec<_>>>())
                .map(ConfigValue::StrList)
                .ok_or_else(got),
            ValueType::IntList => coerce_int_list(raw)
                .map(ConfigValue::IntList)
                .ok_or_else(got),
            ValueType::FloatList => coerce_float_list(raw)
                .map(ConfigValue::FloatList)
                .ok_or_else(got),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 已类型化的配置值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// 字符串
    Str(String),
    /// 整数
    Int(i64),
    /// 浮点数（保证有限）
    Float(f64),
    /// 布尔值
    Bool(bool),
    /// 路径
    Path(PathBuf),
    /// 字符串列表
    StrList(Vec<String>),
    /// 整数列表
    IntList(Vec<i64>),
    /// 浮点数列表
    FloatList(Vec<f64>),
}

impl ConfigValue {
    /// 值的类型
    pub fn value_type(&self) -> ValueType {
        match self {
            ConfigValue::Str(_) => ValueType::String,
            ConfigValue::Int(_) => ValueType::Int,
            ConfigValue::Float(_) => ValueType::Float,
            ConfigValue::Bool(_) => ValueType::Bool,
            ConfigValue::Path(_) => ValueType::Path,
            ConfigValue::StrList(_) => ValueType::StrList,
            ConfigValue::IntList(_) => ValueType::IntList,
            ConfigValue::FloatList(_) => ValueType::FloatList,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            ConfigValue::Path(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            ConfigValue::StrList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            ConfigValue::IntList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float_list(&self) -> Option<&[f64]> {
        match self {
            ConfigValue::FloatList(v) => Some(v),
            _ => None,
        }
    }

    /// 转为 JSON 值
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<T: fmt::Display>(items: &[T]) -> String {
            items
                .iter()
                .map(|i| i.to_string())
                .collect::<Vec<_>>()
                .join(",")
        }

        match self {
            ConfigValue::Str(s) => f.write_str(s),
            ConfigValue::Int(v) => write!(f, "{}", v),
            ConfigValue::Float(v) => write!(f, "{}", v),
            ConfigValue::Bool(v) => write!(f, "{}", v),
            ConfigValue::Path(p) => write!(f, "{}", p.display()),
            ConfigValue::StrList(v) => f.write_str(&join(v)),
            ConfigValue::IntList(v) => f.write_str(&join(v)),
            ConfigValue::FloatList(v) => f.write_str(&join(v)),
        }
    }
}

fn describe_raw(raw: &Value) -> String {
    match raw {
        Value::String(s) => format!("\"{}\"", s),
        other => other.to_string(),
    }
}

fn scalar_text(raw: &Value) -> Option<String> {
    match raw {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn coerce_int(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn coerce_float(raw: &Value) -> Option<f64> {
    let v = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }?;
    v.is_finite().then_some(v)
}

fn coerce_bool(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// 把列表输入拆成元素：JSON 数组、逗号分隔文本或单个标量
fn list_items(raw: &Value) -> Option<Vec<Value>> {
    match raw {
        Value::Array(items) => Some(items.clone()),
        Value::String(s) => Some(
            s.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        ),
        Value::Number(_) | Value::Bool(_) => Some(vec![raw.clone()]),
        _ => None,
    }
}

/// 拆分 `start..stop,step` 区间写法，不是区间时返回 None
fn split_range(text: &str) -> Option<(&str, &str, Option<&str>)> {
    let (start, rest) = text.split_once("..")?;
    match rest.split_once(',') {
        Some((stop, step)) => Some((start.trim(), stop.trim(), Some(step.trim()))),
        None => Some((start.trim(), rest.trim(), None)),
    }
}

fn coerce_int_list(raw: &Value) -> Option<Vec<i64>> {
    if let Value::String(s) = raw {
        if let Some((start, stop, step)) = split_range(s) {
            let start: i64 = start.parse().ok()?;
            let stop: i64 = stop.parse().ok()?;
            let step: i64 = match step {
                Some(step) => step.parse().ok()?,
                None => 1,
            };
            if step <= 0 || stop < start {
                return None;
            }
            let len = usize::try_from(stop.checked_sub(start)? / step)
                .ok()?
                .checked_add(1)?;
            if len > MAX_RANGE_LEN {
                return None;
            }
            return (0..len as i64)
                .map(|i| i.checked_mul(step).and_then(|offset| start.checked_add(offset)))
                .collect();
        }
    }
    list_items(raw)?.iter().map(coerce_int).collect()
}

fn coerce_float_list(raw: &Value) -> Option<Vec<f64>> {
    if let Value::String(s) = raw {
        if let Some((start, stop, step)) = split_range(s) {
            let start: f64 = start.parse().ok()?;
            let stop: f64 = stop.parse().ok()?;
            let step: f64 = step?.parse().ok()?;
            if !(start.is_finite() && stop.is_finite() && step.is_finite())
                || step <= 0.0
                || stop < start
            {
                return None;
            }
            let steps = ((stop - start) / step + 1e-9).floor();
            if steps >= MAX_RANGE_LEN as f64 {
                return None;
            }
            let len = steps as usize + 1;
            let values: Vec<f64> = (0..len)
                .map(|i| trim_drift(start + i as f64 * step))
                .collect::<Option<_>>()?;
            // 步长小于保留精度时相邻元素会重合
            if values.windows(2).any(|pair| pair[0] >= pair[1]) {
                return None;
            }
            return Some(values);
        }
    }
    list_items(raw)?.iter().map(coerce_float).collect()
}

/// 按有效数字消除累加误差：0.4 + 0.2 * 1 应为 0.6 而不是 0.6000000000000001
///
/// 保留 [`RANGE_SIGNIFICANT_DIGITS`] 位有效数字，与数量级无关。
fn trim_drift(value: f64) -> Option<f64> {
    let trimmed: f64 = format!("{:.*e}", RANGE_SIGNIFICANT_DIGITS - 1, value)
        .parse()
        .ok()?;
    trimmed.is_finite().then_some(trimmed)
}
