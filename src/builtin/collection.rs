//! 演示文档集合

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::module::descriptor::{ConfigOption, Module, ModuleDescriptor};

const DOCUMENTS: &[(&str, &str)] = &[
    ("d1", "The quick brown fox jumps over the lazy dog"),
    ("d2", "Rust ownership rules prevent data races"),
    ("d3", "Foxes are small omnivorous mammals"),
    ("d4", "Search engines rank documents by relevance"),
    ("d5", "An inverted index maps terms to documents"),
];

/// 内存文档集合
#[derive(Debug, Clone)]
pub struct Collection {
    lang: String,
    documents: BTreeMap<String, String>,
}

impl Collection {
    /// 从文档列表构造
    pub fn new<I, K, V>(lang: impl Into<String>, documents: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            lang: lang.into(),
            documents: documents
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn lang(&self) -> &str {
        &self.lang
    }

    /// 按文档 ID 有序遍历
    pub fn documents(&self) -> impl Iterator<Item = (&str, &str)> {
        self.documents.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn document(&self, docid: &str) -> Option<&str> {
        self.documents.get(docid).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl Module for Collection {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("collection", "dummy", |ctx| {
        let lang = ctx.config.get_str("lang").unwrap_or("en");
        Ok(Arc::new(Collection::new(lang, DOCUMENTS.iter().copied())))
    })
    .describe("五篇文档的内存集合")
    .option(ConfigOption::new("lang", "en", "文档语言"))
}
