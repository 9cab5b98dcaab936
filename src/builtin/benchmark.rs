//! 演示评测集：查询与相关性判断

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context;

use super::collection::Collection;
use crate::module::descriptor::{DependencySpec, Module, ModuleDescriptor};

const TOPICS: &[(&str, &str, &[&str])] = &[
    ("q1", "fox", &["d1", "d3"]),
    ("q2", "rust data races", &["d2"]),
    ("q3", "inverted index documents", &["d5", "d4"]),
];

/// 查询集合与相关文档
#[derive(Debug, Clone)]
pub struct Benchmark {
    queries: BTreeMap<String, String>,
    qrels: BTreeMap<String, BTreeSet<String>>,
}

impl Benchmark {
    pub fn queries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.queries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 某个查询的相关文档
    pub fn relevant(&self, qid: &str) -> Option<&BTreeSet<String>> {
        self.qrels.get(qid)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

impl Module for Benchmark {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("benchmark", "dummy", |ctx| {
        let collection = ctx.dependency("collection")?;
        let collection = collection
            .downcast::<Collection>()
            .context("collection 依赖不是 Collection")?;

        // 只保留集合中存在的相关文档
        let qrels = TOPICS
            .iter()
            .map(|(qid, _, docs)| {
                let relevant = docs
                    .iter()
                    .filter(|d| collection.document(d).is_some())
                    .map(|d| d.to_string())
                    .collect();
                (qid.to_string(), relevant)
            })
            .collect();
        let queries = TOPICS
            .iter()
            .map(|(qid, text, _)| (qid.to_string(), text.to_string()))
            .collect();

        Ok(Arc::new(Benchmark { queries, qrels }))
    })
    .describe("三个查询的演示评测集")
    .dependency(DependencySpec::new("collection", "collection", "dummy"))
}
