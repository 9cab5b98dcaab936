//! 模块实例与实例缓存
//!
//! - [`CacheKey`]：由 (模块类型, 模块名称, 解析后配置) 确定性派生的规范键
//! - [`ModuleInstance`]：构造完成、不可变的模块实例
//! - [`InstanceCache`]：按缓存键记忆化，每个不同的有效配置最多一个实例

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, trace};

use super::descriptor::{Module, ModuleDescriptor, ModuleId};
use super::resolver::ResolvedConfig;
use super::value::ConfigValue;
use crate::utils::{digest_id, Result};

// ==================== 缓存键 ====================

/// 规范缓存键
///
/// 规范形式是一个键有序的 JSON 文档，包含模块类型、名称、全部配置值
/// 以及每个依赖的规范形式。只要有效配置相同，无论覆盖配置写得多啰嗦，
/// 得到的键都相同。
#[derive(Clone)]
pub struct CacheKey {
    tree: Arc<Value>,
    canonical: Arc<str>,
    digest: Arc<str>,
}

impl CacheKey {
    /// 从模块标识、配置值和依赖的缓存键派生
    pub fn derive<'a, I>(id: &ModuleId, options: &BTreeMap<String, ConfigValue>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a CacheKey)>,
    {
        let options: Map<String, Value> = options
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        let dependencies: Map<String, Value> = dependencies
            .into_iter()
            .map(|(k, key)| (k.clone(), (*key.tree).clone()))
            .collect();

        let tree = json!({
            "type": id.module_type,
            "name": id.module_name,
            "options": options,
            "dependencies": dependencies,
        });
        // serde_json 的 Map 按键排序，序列化结果是确定的
        let canonical = tree.to_string();
        let digest = digest_id(&canonical);

        Self {
            tree: Arc::new(tree),
            canonical: canonical.into(),
            digest: digest.into(),
        }
    }

    /// 规范字符串
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// 62 进制短摘要，用于目录命名
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// 规范 JSON 形式
    pub fn as_json(&self) -> &Value {
        &self.tree
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for CacheKey {}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.digest)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

/// 制品目录：`<cache_dir>/<type>/<name>/<digest>`
pub fn artifact_dir_for(cache_dir: &Path, config: &ResolvedConfig) -> PathBuf {
    cache_dir
        .join(&config.id.module_type)
        .join(&config.id.module_name)
        .join(config.cache_key.digest())
}

/// 结果目录：`<results_dir>/<type>-<name>/<digest>`
pub fn results_dir_for(results_dir: &Path, config: &ResolvedConfig) -> PathBuf {
    results_dir
        .join(format!("{}-{}", config.id.module_type, config.id.module_name))
        .join(config.cache_key.digest())
}

// ==================== 模块实例 ====================

/// 模块实例
///
/// 构造后不可变；依赖实例通过 `Arc` 共享，缓存是所有实例的最终持有者。
pub struct ModuleInstance {
    descriptor: Arc<ModuleDescriptor>,
    config: Arc<ResolvedConfig>,
    dependencies: BTreeMap<String, Arc<ModuleInstance>>,
    artifact_dir: PathBuf,
    module: Arc<dyn Module>,
    created_at: DateTime<Utc>,
}

impl ModuleInstance {
    pub(crate) fn new(
        descriptor: Arc<ModuleDescriptor>,
        config: Arc<ResolvedConfig>,
        dependencies: BTreeMap<String, Arc<ModuleInstance>>,
        artifact_dir: PathBuf,
        module: Arc<dyn Module>,
    ) -> Self {
        Self {
            descriptor,
            config,
            dependencies,
            artifact_dir,
            module,
            created_at: Utc::now(),
        }
    }

    /// 模块标识
    pub fn id(&self) -> &ModuleId {
        &self.descriptor.id
    }

    pub fn module_type(&self) -> &str {
        self.descriptor.module_type()
    }

    pub fn module_name(&self) -> &str {
        self.descriptor.module_name()
    }

    /// 模块描述符
    pub fn descriptor(&self) -> &Arc<ModuleDescriptor> {
        &self.descriptor
    }

    /// 解析后的配置
    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.config
    }

    /// 缓存键
    pub fn cache_key(&self) -> &CacheKey {
        &self.config.cache_key
    }

    /// 依赖实例
    pub fn dependency(&self, key: &str) -> Option<&Arc<ModuleInstance>> {
        self.dependencies.get(key)
    }

    /// 全部依赖实例
    pub fn dependencies(&self) -> &BTreeMap<String, Arc<ModuleInstance>> {
        &self.dependencies
    }

    /// 制品目录
    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// 模块对象
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// 向下转型为具体模块类型
    pub fn downcast<T: Module>(&self) -> Option<&T> {
        self.module.as_any().downcast_ref::<T>()
    }

    /// 构造时间
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", self.id())
            .field("cache_key", self.cache_key())
            .field("dependencies", &self.dependencies.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ==================== 实例缓存 ====================

type Slot = Arc<Mutex<Option<Arc<ModuleInstance>>>>;

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// 命中次数
    pub hits: u64,
    /// 未命中（触发构造）次数
    pub misses: u64,
    /// 当前存活实例数
    pub entries: usize,
}

/// 模块实例缓存
///
/// 每个缓存键对应一个独立的槽位锁：同一键的并发请求只构造一次，
/// 不同键之间互不阻塞。构造失败不会写入槽位，后续请求会重新尝试。
#[derive(Default)]
pub struct InstanceCache {
    slots: Mutex<HashMap<CacheKey, Slot>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InstanceCache {
    /// 创建空缓存
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取或构造实例
    ///
    /// 槽位锁在 `build` 执行期间保持，`build` 内部可以为其他键调用本方法。
    pub fn get_or_create<F>(&self, key: &CacheKey, build: F) -> Result<Arc<ModuleInstance>>
    where
        F: FnOnce() -> Result<Arc<ModuleInstance>>,
    {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let mut guard = lock(&slot);
        if let Some(instance) = guard.as_ref() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(cache_key = %key, "实例缓存命中");
            return Ok(Arc::clone(instance));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(cache_key = %key, "实例缓存未命中，开始构造");
        let instance = build()?;
        *guard = Some(Arc::clone(&instance));
        Ok(instance)
    }

    /// 查询已存在的实例
    pub fn get(&self, key: &CacheKey) -> Option<Arc<ModuleInstance>> {
        let slot = lock(&self.slots).get(key).cloned()?;
        let guard = lock(&slot);
        guard.clone()
    }

    /// 是否包含该键的实例
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.get(key).is_some()
    }

    /// 存活实例数
    pub fn len(&self) -> usize {
        let slots: Vec<Slot> = lock(&self.slots).values().cloned().collect();
        slots.iter().filter(|slot| lock(slot).is_some()).count()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 清空缓存（结束一个显式作用域）
    ///
    /// 已被外部持有的实例不受影响，只是后续请求会重新构造。
    pub fn clear(&self) {
        lock(&self.slots).clear();
    }

    /// 统计信息
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl fmt::Debug for InstanceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceCache")
            .field("stats", &self.stats())
            .finish()
    }
}
