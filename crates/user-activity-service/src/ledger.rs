//! 已处理事件账本
//!
//! 按 eventId 去重、按写入顺序保存的内存账本。进程启动时显式创建，
//! 通过 `Arc` 共享给消费端与 HTTP 查询端，随进程结束销毁。

use std::collections::HashMap;

use activity_shared::events::UserEvent;
use parking_lot::RwLock;

#[derive(Default)]
struct LedgerInner {
    /// eventId -> 在 `ordered` 中的位置
    index: HashMap<String, usize>,
    ordered: Vec<UserEvent>,
}

/// 已处理事件账本
///
/// 索引与有序序列由同一把读写锁保护，任何操作看到的两者始终一致：
/// 一个 eventId 在序列中至多出现一次，且当且仅当它在索引中。
#[derive(Default)]
pub struct Ledger {
    inner: RwLock<LedgerInner>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// 原子地检查并插入，返回是否发生了插入
    pub fn add_if_new(&self, event: &UserEvent) -> bool {
        let mut inner = self.inner.write();
        if inner.index.contains_key(event.event_id()) {
            return false;
        }

        let position = inner.ordered.len();
        inner.index.insert(event.event_id().to_string(), position);
        inner.ordered.push(event.clone());
        true
    }

    /// 按写入顺序返回快照副本
    pub fn get_all(&self) -> Vec<UserEvent> {
        self.inner.read().ordered.clone()
    }

    pub fn has(&self, event_id: &str) -> bool {
        self.inner.read().index.contains_key(event_id)
    }

    pub fn get(&self, event_id: &str) -> Option<UserEvent> {
        let inner = self.inner.read();
        inner
            .index
            .get(event_id)
            .and_then(|&position| inner.ordered.get(position))
            .cloned()
    }

    /// 清空账本，仅用于测试与运维重置
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.index.clear();
        inner.ordered.clear();
    }

    pub fn count(&self) -> usize {
        self.inner.read().ordered.len()
    }
}
