//! Chips Pipeline 命令行入口
//!
//! # 命令概览
//!
//! - `<task>[.<command>] [with k=v ...]` - 执行任务命令
//! - `list-modules` - 列出已注册的模块
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 执行任务的默认命令（describe）
//! chips-pipeline rank
//!
//! # 检索并评测，覆盖嵌套配置
//! chips-pipeline rank.searcheval with searcher.index.stemmer=porter searcher.hits=3
//!
//! # 从文件加载覆盖配置（`file` 是保留键），命令行赋值优先
//! chips-pipeline rank.print_config with file=overrides.yaml searcher.hits=10
//!
//! # 查看版本
//! chips-pipeline version
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};

use chips_pipeline::module::FILE_KEY;
use chips_pipeline::{
    builtin, exit_code, CoreError, Engine, LogGuard, Logger, LoggerConfig, OverrideMap,
    PipelineConfig, Result,
};

/// 任务参数与覆盖配置之间的分隔词
const WITH_KEYWORD: &str = "with";

/// Chips Pipeline - 薯片流水线
///
/// 声明式模块组合与配置传播引擎。
#[derive(Parser)]
#[command(name = "chips-pipeline")]
#[command(version, about = "声明式模块组合流水线", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "pipeline.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（显示线程和源码位置）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 列出已注册的模块
    ListModules,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 查看版本信息
    Version,

    /// 执行任务命令：`<task>[.<command>] [with k=v ...]`
    #[command(external_subcommand)]
    Task(Vec<String>),
}

/// 解析后的任务调用
#[derive(Debug, PartialEq)]
struct TaskInvocation {
    task: String,
    command: Option<String>,
    files: Vec<PathBuf>,
    assignments: Vec<String>,
}

/// 解析 `<task>[.<command>] [with] k=v ...`
fn parse_invocation(args: &[String]) -> Result<TaskInvocation> {
    let (head, rest) = args
        .split_first()
        .ok_or_else(|| CoreError::InvalidOverride("缺少任务名称".to_string()))?;

    let (task, command) = match head.split_once('.') {
        Some((task, command)) if !command.is_empty() => (task.to_string(), Some(command.to_string())),
        Some((task, _)) => (task.to_string(), None),
        None => (head.clone(), None),
    };

    let rest = match rest.split_first() {
        Some((first, tail)) if first == WITH_KEYWORD => tail,
        _ => rest,
    };

    let mut files = Vec::new();
    let mut assignments = Vec::new();
    for arg in rest {
        match arg.split_once('=') {
            Some((FILE_KEY, path)) => files.push(PathBuf::from(path)),
            _ => assignments.push(arg.clone()),
        }
    }

    Ok(TaskInvocation {
        task,
        command,
        files,
        assignments,
    })
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(config_path: &Path, cli: &Cli) -> Result<PipelineConfig> {
    let mut config = if config_path.exists() {
        let config = PipelineConfig::from_file(config_path).await?;
        debug!("已加载配置文件: {}", config_path.display());
        config
    } else {
        PipelineConfig::default()
    };
    config.apply_env();
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.dev {
        config.dev_mode = true;
    }
    Ok(config)
}

/// 初始化日志系统
fn init_logging(config: &PipelineConfig) -> Result<LogGuard> {
    let logger_config = LoggerConfig::from_log_config(&config.logging);
    if config.dev_mode {
        Logger::init(logger_config.with_dev_mode())
    } else {
        Logger::init(logger_config)
    }
}

/// 输出命令结果：字符串原样输出，其余按 JSON 格式化
fn print_value(value: &Value) -> Result<()> {
    match value {
        Value::String(text) => println!("{}", text.trim_end()),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

/// 执行任务命令
async fn run_task(args: &[String], config: PipelineConfig) -> Result<()> {
    let invocation = parse_invocation(args)?;

    let mut overrides = OverrideMap::new();
    for file in &invocation.files {
        overrides.merge(OverrideMap::from_file(file).await?);
    }
    overrides.merge(OverrideMap::parse(&invocation.assignments)?);

    let engine = Engine::new(builtin::registry()?, config);
    let mut task = engine.task(&invocation.task, overrides)?;
    let result = task.run(invocation.command.as_deref())?;
    print_value(&result)?;

    let stats = engine.cache().stats();
    info!(
        task = %invocation.task,
        instances = stats.entries,
        cache_hits = stats.hits,
        "任务完成"
    );
    Ok(())
}

/// 列出已注册的模块
fn list_modules() -> Result<()> {
    let registry = builtin::registry()?;

    println!();
    println!("已注册模块");
    println!("═══════════════════════════════════════");
    for descriptor in registry.list_modules() {
        println!();
        println!("  {}  {}", descriptor.id, descriptor.description);
        for option in &descriptor.config_spec {
            let default = option
                .default_value()
                .map(ToString::to_string)
                .unwrap_or_else(|| "<必填>".to_string());
            println!(
                "    {} ({}) = {}  {}",
                option.key, option.value_type, default, option.description
            );
        }
        for dep in &descriptor.dependencies {
            println!(
                "    {} -> {}/{}",
                dep.key, dep.module_type, dep.default_name
            );
        }
        if let Some(task) = &descriptor.task {
            println!("    命令: {}", task.available_commands().join(", "));
        }
    }
    println!("═══════════════════════════════════════");
    println!();
    Ok(())
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<()> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&PipelineConfig::default());
        return Ok(());
    }

    let mut config = PipelineConfig::from_file(path)
        .await
        .map_err(|e| CoreError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
    config.apply_env();
    println!("✅ 配置文件有效！");
    println!();
    print_config(&config);
    Ok(())
}

fn print_config(config: &PipelineConfig) {
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [存储配置]");
    println!("    结果目录:       {}", config.storage.results_dir.display());
    println!("    缓存目录:       {}", config.storage.cache_dir.display());
    println!();
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", if config.logging.file_output { "是" } else { "否" });
    println!("    JSON 格式:      {}", if config.logging.json_format { "是" } else { "否" });
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", if config.dev_mode { "是" } else { "否" });
    println!("────────────────────────────────────────");
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Chips Pipeline - 薯片流水线");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", chips_pipeline::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Version => {
            print_version();
            Ok(())
        }
        Commands::CheckConfig { config } => {
            let path = config.as_deref().unwrap_or(&cli.config);
            check_config(path).await
        }
        Commands::ListModules => list_modules(),
        Commands::Task(args) => {
            let config = load_config(&cli.config, &cli).await?;
            let _guard = init_logging(&config)?;
            run_task(args, config).await
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("错误 [{}]: {}", e.error_code(), e);
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  原因: {}", cause);
                source = cause.source();
            }
            ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(exit_code::FAILURE as u8))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_invocation() {
        let invocation = parse_invocation(&args(&[
            "rank.searcheval",
            "with",
            "file=base.yaml",
            "searcher.hits=3",
        ]))
        .unwrap();
        assert_eq!(
            invocation,
            TaskInvocation {
                task: "rank".to_string(),
                command: Some("searcheval".to_string()),
                files: vec![PathBuf::from("base.yaml")],
                assignments: vec!["searcher.hits=3".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_invocation_defaults() {
        let invocation = parse_invocation(&args(&["rank"])).unwrap();
        assert_eq!(invocation.task, "rank");
        assert_eq!(invocation.command, None);
        assert!(invocation.assignments.is_empty());

        // `with` 可以省略
        let invocation = parse_invocation(&args(&["rank.", "searcher=termmatch"])).unwrap();
        assert_eq!(invocation.command, None);
        assert_eq!(invocation.assignments, vec!["searcher=termmatch".to_string()]);
    }

    #[test]
    fn test_parse_invocation_requires_task() {
        assert!(parse_invocation(&[]).is_err());
    }
}
