//! 制品物化
//!
//! 领域模块（索引构建、数据准备等）把产物写到由缓存键派生的目录中。
//! [`materialize`] 保证“先检查、后构建”：目录中已有完成标记时直接返回，
//! 否则在临时目录中构建，写入完成标记后整体改名到目标位置。
//! 并发调用时只有一个改名会成功，其余调用看到完成标记后视为成功。

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::utils::{CoreError, Result};

/// 完成标记文件名
pub const DONE_MARKER: &str = "done";

/// 检查制品目录是否已完成物化
pub fn is_materialized(dir: &Path) -> bool {
    dir.join(DONE_MARKER).is_file()
}

/// 幂等地物化一个制品目录
///
/// # Arguments
///
/// * `dir` - 目标目录
/// * `build` - 构建函数，接收一个空的临时目录并在其中写入制品
///
/// # Returns
///
/// 目标目录路径。目录已物化时不会调用 `build`。
///
/// # Errors
///
/// - 构建函数返回的错误（临时目录会被清理）
/// - 文件系统错误
pub fn materialize<F>(dir: &Path, build: F) -> Result<PathBuf>
where
    F: FnOnce(&Path) -> anyhow::Result<()>,
{
    if is_materialized(dir) {
        debug!(path = %dir.display(), "制品已存在，跳过构建");
        return Ok(dir.to_path_buf());
    }

    let parent = dir
        .parent()
        .ok_or_else(|| CoreError::Internal(format!("制品目录没有父目录: {}", dir.display())))?;
    fs::create_dir_all(parent)?;

    let file_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let staging = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));
    fs::create_dir_all(&staging)?;

    if let Err(source) = build(&staging) {
        let _ = fs::remove_dir_all(&staging);
        return Err(CoreError::ArtifactBuildFailed {
            path: dir.display().to_string(),
            source,
        });
    }
    fs::write(staging.join(DONE_MARKER), "done\n")?;

    // 目标位置可能残留一个未完成的目录（上次构建中断）
    if dir.exists() && !is_materialized(dir) {
        warn!(path = %dir.display(), "清理未完成的制品目录");
        let _ = fs::remove_dir_all(dir);
    }

    match fs::rename(&staging, dir) {
        Ok(()) => {
            info!(path = %dir.display(), "制品构建完成");
            Ok(dir.to_path_buf())
        }
        Err(e) => {
            let _ = fs::remove_dir_all(&staging);
            if is_materialized(dir) {
                debug!(path = %dir.display(), "其他调用已完成构建");
                Ok(dir.to_path_buf())
            } else {
                Err(CoreError::Io(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_materialize_builds_once() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("index").join("abc");
        let calls = AtomicUsize::new(0);

        let build = |dir: &Path| {
            calls.fetch_add(1, Ordering::SeqCst);
            fs::write(dir.join("postings.json"), "{}")?;
            Ok(())
        };

        let path = materialize(&target, build).unwrap();
        assert_eq!(path, target);
        assert!(is_materialized(&target));
        assert!(target.join("postings.json").exists());

        // 再次调用是空操作
        materialize(&target, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_materialize_failure_leaves_nothing() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("broken");

        let result = materialize(&target, |_| {
            Err(anyhow::anyhow!("磁盘已满").context("写入倒排表"))
        });
        match result {
            Err(CoreError::ArtifactBuildFailed { path, source }) => {
                assert_eq!(path, target.display().to_string());
                assert_eq!(source.to_string(), "写入倒排表");
                assert_eq!(source.root_cause().to_string(), "磁盘已满");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!target.exists());

        let leftovers: Vec<_> = fs::read_dir(temp.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_materialize_replaces_incomplete_dir() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("partial");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("half-written"), "x").unwrap();

        materialize(&target, |dir| {
            fs::write(dir.join("complete"), "y")?;
            Ok(())
        })
        .unwrap();

        assert!(is_materialized(&target));
        assert!(target.join("complete").exists());
        assert!(!target.join("half-written").exists());
    }

    #[test]
    fn test_materialize_concurrent() {
        let temp = TempDir::new().unwrap();
        let target = Arc::new(temp.path().join("shared"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let target = Arc::clone(&target);
                std::thread::spawn(move || {
                    materialize(&target, |dir| {
                        fs::write(dir.join("writer"), format!("{}", i))?;
                        Ok(())
                    })
                })
            })
            .collect();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }
        assert!(is_materialized(&target));
    }
}
