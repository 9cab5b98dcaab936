//! 演示排序任务
//!
//! 命令：
//! - `search`：对评测集的每个查询检索，结果写入结果目录
//! - `evaluate`：读取检索结果并计算指标
//! - `searcheval`：依次执行以上两步

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde_json::{json, Value};
use tracing::info;

use super::benchmark::Benchmark;
use super::searcher::Searcher;
use crate::module::descriptor::{
    CommandContext, ConfigOption, DependencySpec, Module, ModuleDescriptor,
};
use crate::module::value::ValueType;
use crate::utils::artifact;

const RUN_DIR: &str = "searcher";
const RUN_FILE: &str = "run.json";

/// 支持的指标
const METRICS: &[&str] = &["P_1", "recall"];

/// 检索结果：查询 -> 排好序的文档
type Run = BTreeMap<String, Vec<String>>;

/// 排序任务
#[derive(Debug)]
pub struct Rank {
    metrics: Vec<String>,
}

impl Rank {
    fn search(&self, ctx: &CommandContext<'_>) -> anyhow::Result<Value> {
        let benchmark = benchmark(ctx)?;
        let searcher = ctx
            .dependency("searcher")?
            .downcast::<Searcher>()
            .context("searcher 依赖不是 Searcher")?;

        let dir = artifact::materialize(&ctx.results_dir.join(RUN_DIR), |staging| {
            let mut run = Run::new();
            for (qid, query) in benchmark.queries() {
                let ranked = searcher.search(query)?;
                run.insert(qid.to_string(), ranked.into_iter().map(|(doc, _)| doc).collect());
            }
            fs::write(staging.join(RUN_FILE), serde_json::to_vec_pretty(&run)?)?;
            Ok(())
        })?;

        let run_path = dir.join(RUN_FILE);
        info!(run = %run_path.display(), "检索完成");
        Ok(json!({
            "run": run_path.display().to_string(),
            "queries": benchmark.len(),
        }))
    }

    fn evaluate(&self, ctx: &CommandContext<'_>) -> anyhow::Result<Value> {
        let benchmark = benchmark(ctx)?;
        let run_path = run_path(ctx.results_dir);
        if !artifact::is_materialized(&ctx.results_dir.join(RUN_DIR)) {
            anyhow::bail!("检索结果不存在，请先执行 search: {}", run_path.display());
        }
        let content = fs::read(&run_path)
            .with_context(|| format!("读取检索结果失败: {}", run_path.display()))?;
        let run: Run = serde_json::from_slice(&content)?;

        let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
        let mut judged = 0usize;
        for (qid, _) in benchmark.queries() {
            let Some(relevant) = benchmark.relevant(qid).filter(|r| !r.is_empty()) else {
                continue;
            };
            judged += 1;
            let ranked = run.get(qid).map(Vec::as_slice).unwrap_or_default();
            for metric in &self.metrics {
                let score = match metric.as_str() {
                    "P_1" => ranked
                        .first()
                        .map(|d| f64::from(u8::from(relevant.contains(d))))
                        .unwrap_or(0.0),
                    "recall" => {
                        let found = ranked.iter().filter(|d| relevant.contains(*d)).count();
                        found as f64 / relevant.len() as f64
                    }
                    other => anyhow::bail!("未知指标: {}", other),
                };
                *totals.entry(metric.as_str()).or_default() += score;
            }
        }

        let mut scores = serde_json::Map::new();
        for (metric, total) in totals {
            let mean = if judged == 0 { 0.0 } else { total / judged as f64 };
            scores.insert(metric.to_string(), json!(mean));
        }
        info!(queries = judged, "评测完成");
        Ok(json!({ "queries": judged, "metrics": scores }))
    }
}

fn benchmark<'a>(ctx: &CommandContext<'a>) -> anyhow::Result<&'a Benchmark> {
    ctx.dependency("benchmark")?
        .downcast::<Benchmark>()
        .context("benchmark 依赖不是 Benchmark")
}

fn run_path(results_dir: &Path) -> PathBuf {
    results_dir.join(RUN_DIR).join(RUN_FILE)
}

impl Module for Rank {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn run_command(&self, command: &str, ctx: &CommandContext<'_>) -> anyhow::Result<Value> {
        match command {
            "search" => self.search(ctx),
            "evaluate" => self.evaluate(ctx),
            "searcheval" => {
                let search = self.search(ctx)?;
                let evaluate = self.evaluate(ctx)?;
                Ok(json!({ "search": search, "evaluate": evaluate }))
            }
            other => anyhow::bail!("模块不支持命令 '{}'", other),
        }
    }
}

pub(crate) fn descriptor() -> ModuleDescriptor {
    ModuleDescriptor::new("task", "rank", |ctx| {
        let metrics = ctx
            .config
            .get_str_list("metrics")
            .map(<[String]>::to_vec)
            .unwrap_or_default();
        if let Some(unknown) = metrics.iter().find(|m| !METRICS.contains(&m.as_str())) {
            anyhow::bail!("未知指标: {} (支持 {:?})", unknown, METRICS);
        }
        Ok(Arc::new(Rank { metrics }))
    })
    .describe("检索并评测一个评测集")
    .option(
        ConfigOption::new("metrics", "P_1,recall", "评测指标")
            .with_type(ValueType::StrList),
    )
    .dependency(
        DependencySpec::new("benchmark", "benchmark", "dummy")
            .provide_this()
            .provide_children(["collection"]),
    )
    .dependency(DependencySpec::new("searcher", "searcher", "termmatch"))
    .task(&["search", "evaluate", "searcheval"], "describe")
}
