//! 演示检索器：按匹配词项数打分

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;

use super::index::Index;
use crate::module::descriptor::{ConfigOption, DependencySpec, Module, ModuleDescriptor};
use crate::module::instance::ModuleInstance;

/// 词项匹配检索器
#[derive(Debug)]
pub struct Searcher {
    hits: usize,
    index: Arc<ModuleInstance>,
}

impl Searcher {
    /// 检索，返回按分数降序、文档 ID 升序排列的 (文档, 分数)
    pub fn search(&self, query: &str) -> anyhow::Result<Vec<(String, u32)>> {
        let index = self
            .index
            .downcast::<Index>()
            .context("index 依赖不是 Index")?;

        let mut scores: BTreeMap<&str, u32> = BTreeMap::new();
        for term in index.analyze(query) {
            if let Some(docs) = index.postings(&term) {
                for doc in docs {
                    *scores.entry(doc.as_str()).or_default() += 1;
                }
            }
        }

        let mut ranked: Vec<(String, u32)> = scores
            .into_iter()
            .map(|(doc, score)| (doc.to_string(), score))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.hits);
        Ok(ranked)
    }

    pub fn hits(&self) -> usize {
        self.hits
    }
}

impl Module for Searcher {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("searcher", "termmatch", |ctx| {
        let hits = ctx.config.get_int("hits").unwrap_or(1000);
        let hits = usize::try_from(hits)
            .ok()
            .filter(|h| *h > 0)
            .with_context(|| format!("hits 必须为正数: {}", hits))?;
        let index = ctx.dependency("index")?;
        if index.downcast::<Index>().is_none() {
            anyhow::bail!("index 依赖不是 Index");
        }
        Ok(Arc::new(Searcher { hits, index }))
    })
    .describe("按匹配词项数排序的检索器")
    .option(ConfigOption::new("hits", 1000, "每个查询返回的文档数"))
    .dependency(DependencySpec::new("index", "index", "simple"))
}
