//! 依赖关系图
//!
//! 节点是字符串标签（模块标识或实例标签），边表示“依赖于”。
//! 用于两处：
//! - 注册表冻结时检查默认依赖图中的循环（只告警，覆盖配置可能绕开）
//! - `print_pipeline` 输出实例构造顺序
//!
//! ```rust
//! use chips_pipeline::module::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency("task/rank", "searcher/bm25");
//! graph.add_dependency("searcher/bm25", "index/simple");
//!
//! let order = graph.topological_sort().unwrap();
//! assert_eq!(order, vec!["index/simple", "searcher/bm25", "task/rank"]);
//! ```

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use super::resolver::ResolvedConfig;
use crate::utils::{CoreError, Result};

/// 依赖关系图
///
/// 使用有序映射存储，遍历和排序结果是确定的。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：节点 -> 它依赖的节点
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：节点 -> 依赖它的节点
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由解析后的配置树构造实例图
    ///
    /// 节点标签为 `type/name@digest`，相同缓存键的节点只出现一次。
    pub fn from_resolved(config: &ResolvedConfig) -> Self {
        let mut graph = Self::new();
        config.walk(&mut |_, node| {
            let label = instance_label(node);
            graph.add_module(&label);
            for dep in node.dependencies.values() {
                graph.add_dependency(&label, &instance_label(&dep.config));
            }
        });
        graph
    }

    /// 添加节点（已存在时忽略）
    pub fn add_module(&mut self, module_id: &str) {
        self.edges.entry(module_id.to_string()).or_default();
        self.reverse_edges.entry(module_id.to_string()).or_default();
    }

    /// 添加依赖关系：`module_id` 依赖 `dependency_id`
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        self.add_module(module_id);
        self.add_module(dependency_id);

        self.edges
            .entry(module_id.to_string())
            .or_default()
            .insert(dependency_id.to_string());
        self.reverse_edges
            .entry(dependency_id.to_string())
            .or_default()
            .insert(module_id.to_string());
    }

    /// 直接依赖
    pub fn get_dependencies(&self, module_id: &str) -> Vec<String> {
        self.edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 直接依赖方
    pub fn get_dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找一个循环，返回闭合路径（首尾相同）
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = BTreeSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut BTreeSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(start) = path.iter().position(|n| n == node) {
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_util(neighbor, visited, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        None
    }

    /// 拓扑排序（Kahn 算法），依赖先于依赖方
    ///
    /// # Errors
    ///
    /// 存在循环时返回 `CoreError::DependencyCycle`。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreError::DependencyCycle(cycle));
        }

        // 入度 = 该节点依赖的节点数
        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(node) = queue.pop_front() {
            result.push(node.to_string());
            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            return Err(CoreError::Internal("无法完成拓扑排序".to_string()));
        }
        Ok(result)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }
}

/// 实例标签：`type/name@digest`
pub fn instance_label(config: &ResolvedConfig) -> String {
    format!("{}@{}", config.id, config.cache_key.digest())
}
