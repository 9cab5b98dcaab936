//! 演示倒排索引
//!
//! 首次构造时把倒排表写到制品目录，之后从制品目录加载。

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::collection::Collection;
use crate::module::descriptor::{ConfigOption, DependencySpec, Module, ModuleDescriptor};
use crate::utils::artifact;

const POSTINGS_FILE: &str = "postings.json";

const STOPWORDS: &[&str] = &["a", "an", "and", "are", "by", "of", "over", "the", "to"];

/// 词干处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stemmer {
    None,
    /// 去掉常见英文后缀
    Porter,
}

impl Stemmer {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Stemmer::None),
            "porter" => Some(Stemmer::Porter),
            _ => None,
        }
    }

    fn stem(&self, term: &str) -> String {
        match self {
            Stemmer::None => term.to_string(),
            Stemmer::Porter => ["ing", "es", "s"]
                .iter()
                .find_map(|suffix| {
                    term.strip_suffix(suffix)
                        .filter(|stem| stem.len() >= 3)
                })
                .unwrap_or(term)
                .to_string(),
        }
    }
}

/// 分词：小写、按非字母数字切分、可选去停用词、词干处理
pub fn analyze(text: &str, stemmer: Stemmer, keep_stops: bool) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| keep_stops || !STOPWORDS.contains(&t.as_str()))
        .map(|t| stemmer.stem(&t))
        .collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct PostingsFile {
    postings: BTreeMap<String, BTreeSet<String>>,
}

/// 倒排索引
#[derive(Debug)]
pub struct Index {
    stemmer: Stemmer,
    keep_stops: bool,
    postings: BTreeMap<String, BTreeSet<String>>,
    path: PathBuf,
}

impl Index {
    /// 按本索引的分析设置处理查询
    pub fn analyze(&self, text: &str) -> Vec<String> {
        analyze(text, self.stemmer, self.keep_stops)
    }

    /// 包含该词项的文档
    pub fn postings(&self, term: &str) -> Option<&BTreeSet<String>> {
        self.postings.get(term)
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// 制品目录
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Module for Index {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn build_postings(collection: &Collection, stemmer: Stemmer, keep_stops: bool) -> PostingsFile {
    let mut postings: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (docid, text) in collection.documents() {
        for term in analyze(text, stemmer, keep_stops) {
            postings.entry(term).or_default().insert(docid.to_string());
        }
    }
    PostingsFile { postings }
}

pub(crate) fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("index", "simple", |ctx| {
        let stemmer_name = ctx.config.get_str("stemmer").unwrap_or("none");
        let stemmer = Stemmer::parse(stemmer_name)
            .with_context(|| format!("不支持的词干处理方式: {}", stemmer_name))?;
        let keep_stops = ctx.config.get_bool("indexstops").unwrap_or(false);

        let collection = ctx.dependency("collection")?;
        let collection = collection
            .downcast::<Collection>()
            .context("collection 依赖不是 Collection")?;

        let dir = artifact::materialize(ctx.artifact_dir, |staging| {
            let file = build_postings(collection, stemmer, keep_stops);
            fs::write(staging.join(POSTINGS_FILE), serde_json::to_vec(&file)?)?;
            Ok(())
        })?;

        let content = fs::read(dir.join(POSTINGS_FILE))
            .with_context(|| format!("读取倒排表失败: {}", dir.display()))?;
        let file: PostingsFile = serde_json::from_slice(&content)?;

        Ok(Arc::new(Index {
            stemmer,
            keep_stops,
            postings: file.postings,
            path: dir,
        }))
    })
    .describe("内存倒排索引，倒排表持久化到制品目录")
    .option(ConfigOption::new("stemmer", "none", "词干处理: none 或 porter"))
    .option(ConfigOption::new("indexstops", false, "是否索引停用词"))
    .dependency(DependencySpec::new("collection", "collection", "dummy"))
}
