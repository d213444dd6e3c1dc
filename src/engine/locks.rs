// ==========================================
// 排放核算引擎 - 键级互斥 / 取消标志
// ==========================================
// 同一数据条目的计算、同一因子的批量重算在进程内串行；
// 不同键之间互不阻塞
// ==========================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

// ==========================================
// KeyedLocks - 按键互斥
// ==========================================
#[derive(Default)]
pub struct KeyedLocks {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 阻塞直到获得 `key` 的独占权；guard drop 时释放
    pub fn acquire(&self, key: &str) -> KeyedLockGuard<'_> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        while held.contains(key) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(key.to_string());
        KeyedLockGuard {
            locks: self,
            key: key.to_string(),
        }
    }

    /// 非阻塞尝试
    pub fn try_acquire(&self, key: &str) -> Option<KeyedLockGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(KeyedLockGuard {
            locks: self,
            key: key.to_string(),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(key)
    }
}

pub struct KeyedLockGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.locks.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.key);
        drop(held);
        self.locks.released.notify_all();
    }
}

// ==========================================
// CancellationFlag - 协作式取消
// ==========================================
// 批量重算在条目之间检查；已开始的条目总会完整提交或回滚
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
