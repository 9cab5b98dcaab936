//! 内置演示模块
//!
//! 一条最小的检索流水线，用于命令行演示和集成测试：
//!
//! ```text
//! task/rank
//! ├── benchmark/dummy   (provide_this, provide_children: collection)
//! │   └── collection/dummy
//! └── searcher/termmatch
//!     └── index/simple
//!         └── collection/dummy   (与 benchmark 共享)
//! ```
//!
//! 领域逻辑刻意保持简单。

pub mod benchmark;
pub mod collection;
pub mod index;
pub mod rank;
pub mod searcher;

use crate::module::registry::{ModuleRegistry, RegistryBuilder};
use crate::utils::Result;

pub use benchmark::Benchmark;
pub use collection::Collection;
pub use index::Index;
pub use rank::Rank;
pub use searcher::Searcher;

/// 注册全部内置模块
pub fn register_all(builder: &mut RegistryBuilder) -> Result<()> {
    builder.register(collection::descriptor())?;
    builder.register(benchmark::descriptor())?;
    builder.register(index::descriptor())?;
    builder.register(searcher::descriptor())?;
    builder.register(rank::descriptor())?;
    Ok(())
}

/// 只包含内置模块的冻结注册表
pub fn registry() -> Result<ModuleRegistry> {
    let mut builder = ModuleRegistry::builder();
    register_all(&mut builder)?;
    builder.build()
}
