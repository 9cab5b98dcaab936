//! API 模块
//!
//! 对外的引擎与任务接口。
//!
//! # 模块概览
//!
//! - `engine`: [`Engine`]，解析配置、构造实例、创建任务
//! - `task`: [`Task`]，任务状态机与命令分发
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_pipeline::{builtin, Engine, OverrideMap, PipelineConfig};
//!
//! let engine = Engine::new(builtin::registry().unwrap(), PipelineConfig::default());
//! let mut task = engine.task("rank", OverrideMap::new()).unwrap();
//!
//! // 未指定命令时执行默认命令
//! let description = task.run(None).unwrap();
//! println!("{}", description.as_str().unwrap_or_default());
//! ```

pub mod engine;
pub mod task;

// 重导出主要类型
pub use engine::Engine;
pub use task::{Task, TaskState, TASK_TYPE};
