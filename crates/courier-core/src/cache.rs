//! ProcessCache - プロセス共有の key-value
//!
//! 外部トリガーやシグナルハンドラなど別の呼び出し経路から scheduler を
//! 見つけられるよう、live な scheduler handle を置いておく。
//! 期限切れ・追い出しはなく、明示的に消すまで残る。

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// cache のキー（固定集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// polling scheduler の制御 handle
    SchedulerHandle,
}

impl CacheKey {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheKey::SchedulerHandle => "scheduler_handle",
        }
    }
}

type CacheValue = Arc<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ProcessCache {
    entries: RwLock<HashMap<CacheKey, CacheValue>>,
}

impl ProcessCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// プロセス全体で共有する cache
    pub fn global() -> Arc<ProcessCache> {
        static GLOBAL: OnceLock<Arc<ProcessCache>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(ProcessCache::new())).clone()
    }

    /// `key` の値。なければ（型が違っても）`default`
    pub fn get<T>(&self, key: CacheKey, default: T) -> T
    where
        T: Any + Clone + Send + Sync,
    {
        self.try_get(key).unwrap_or(default)
    }

    pub fn try_get<T>(&self, key: CacheKey) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(&key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// 無条件に上書きする
    pub fn set<T>(&self, key: CacheKey, value: T)
    where
        T: Any + Send + Sync,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key, Arc::new(value));
    }

    /// エントリを空にして、直前の値を返す
    pub fn take<T>(&self, key: CacheKey) -> Option<T>
    where
        T: Any + Clone + Send + Sync,
    {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .remove(&key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    pub fn contains(&self, key: CacheKey) -> bool {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_default_when_absent() {
        let cache = ProcessCache::new();
        assert_eq!(cache.get(CacheKey::SchedulerHandle, 7u32), 7);
        assert!(!cache.contains(CacheKey::SchedulerHandle));
    }

    #[test]
    fn set_overwrites_unconditionally() {
        let cache = ProcessCache::new();
        cache.set(CacheKey::SchedulerHandle, String::from("first"));
        cache.set(CacheKey::SchedulerHandle, String::from("second"));
        assert_eq!(
            cache.try_get::<String>(CacheKey::SchedulerHandle).as_deref(),
            Some("second")
        );
    }

    #[test]
    fn wrong_type_reads_as_absent() {
        let cache = ProcessCache::new();
        cache.set(CacheKey::SchedulerHandle, 1u8);
        assert_eq!(cache.try_get::<String>(CacheKey::SchedulerHandle), None);
        assert_eq!(cache.get(CacheKey::SchedulerHandle, 0u64), 0);
    }

    #[test]
    fn take_empties_the_entry() {
        let cache = ProcessCache::new();
        cache.set(CacheKey::SchedulerHandle, 5i32);
        assert_eq!(cache.take::<i32>(CacheKey::SchedulerHandle), Some(5));
        assert_eq!(cache.take::<i32>(CacheKey::SchedulerHandle), None);
        assert!(!cache.contains(CacheKey::SchedulerHandle));
    }

    #[test]
    fn global_is_shared() {
        assert!(Arc::ptr_eq(&ProcessCache::global(), &ProcessCache::global()));
    }
}
