//! 预算表：在 [`SlottedLayout`] 之上为每个预算维护一条 64 字节记录。
//!
//! # 记录布局（What）
//! | 偏移 | 字段        | 写入者                     |
//! |------|-------------|----------------------------|
//! | 0    | `budget_id` | 所属分片的 creditor        |
//! | 8    | `remaining` | creditor 加、debitor 减    |
//! | 16   | `watchers`  | debitor 置位/清位          |
//! | 24.. | 保留        | -                          |
//!
//! 记录占满一条缓存行，相邻预算的热点字段互不干扰。

use std::sync::Arc;

use tracing::{debug, warn};

use super::BudgetId;
use crate::{
    error::{FlowError, Result},
    layout::{RecordLayout, SlotIndex, SlottedLayout},
    observability::targets,
    sync::spin_loop,
};

pub const BUDGET_ID_OFFSET: usize = 0;
pub const REMAINING_OFFSET: usize = 8;
pub const WATCHERS_OFFSET: usize = 16;
pub const BUDGET_RECORD_BYTES: usize = 64;

/// 预算记录几何。
pub const BUDGET_RECORD: RecordLayout = RecordLayout::with_words(BUDGET_RECORD_BYTES / 8);

const MIN_RECORD_BYTES: usize = WATCHERS_OFFSET + 8;

/// 预算表句柄，可廉价克隆并在分片之间共享。
///
/// # 教案式说明
/// - **意图 (Why)**：把“按标识分配/查找/释放”与“字段级原子操作”收敛到一处，
///   creditor 与 debitor 都只通过本类型触碰共享内存。
/// - **逻辑 (How)**：标识经过散列得到起始槽位，随后环绕线性探测；释放只清空 `budget_id`，
///   不留墓碑，因此查找必须扫描完整一圈而不能在空槽处停止。
/// - **契约 (What)**：
///   - 只有所属分片的 creditor 调用 [`BudgetTable::allocate`] 与 [`BudgetTable::free`]；
///   - 任何分片都可以 [`BudgetTable::find`]；
///   - `allocate` 先写 `remaining`/`watchers`，最后以 Release 发布 `budget_id`，
///     查找者看到标识时必然看到清零后的字段。
/// - **风险 (Trade-offs)**：未命中的查找代价为 O(capacity)；预算表通常只有数百条记录，
///   查找只发生在 acquire 与 `credit_by_id` 上，不在领取热路径。
#[derive(Clone, Debug)]
pub struct BudgetTable {
    layout: Arc<SlottedLayout>,
}

impl BudgetTable {
    /// 在已有布局上构建预算表，记录至少要容纳三个字段。
    pub fn new(layout: Arc<SlottedLayout>) -> Result<Self> {
        let record_bytes = layout.record().record_bytes();
        if record_bytes < MIN_RECORD_BYTES {
            return Err(FlowError::InvalidRecord {
                record_bytes,
                reason: "budget records need budget_id, remaining and watchers fields",
            });
        }
        Ok(Self { layout })
    }

    /// 分配一个容纳 `entries` 条预算的堆表。
    pub fn heap(entries: usize) -> Self {
        Self {
            layout: Arc::new(SlottedLayout::heap(entries, BUDGET_RECORD)),
        }
    }

    pub fn layout(&self) -> &Arc<SlottedLayout> {
        &self.layout
    }

    pub fn capacity(&self) -> usize {
        self.layout.capacity()
    }

    /// 为 `budget_id` 预留空闲记录，写入 `remaining = 0`、`watchers = 0`。
    pub fn allocate(&self, budget_id: BudgetId) -> Result<SlotIndex> {
        if budget_id.is_none() {
            return Err(FlowError::InvalidBudgetId);
        }

        let free = self
            .layout
            .slots_from(self.home(budget_id))
            .find(|slot| self.budget_id(*slot).is_none());
        let Some(slot) = free else {
            warn!(
                target: targets::BUDGET,
                budget_id = %budget_id,
                capacity = self.capacity(),
                label = self.layout.label(),
                "budget table exhausted"
            );
            return Err(FlowError::OutOfSlots {
                capacity: self.capacity(),
            });
        };

        self.layout.put_long_volatile(slot, REMAINING_OFFSET, 0);
        self.layout.put_long_volatile(slot, WATCHERS_OFFSET, 0);
        self.layout
            .put_long_volatile(slot, BUDGET_ID_OFFSET, budget_id.to_bits());
        debug!(target: targets::BUDGET, budget_id = %budget_id, slot = %slot, "budget allocated");
        Ok(slot)
    }

    /// 查找 `budget_id` 所在记录。
    pub fn find(&self, budget_id: BudgetId) -> Option<SlotIndex> {
        if budget_id.is_none() {
            return None;
        }
        self.layout
            .slots_from(self.home(budget_id))
            .find(|slot| self.budget_id(*slot) == budget_id)
    }

    /// 将记录标记为可复用。
    pub fn free(&self, slot: SlotIndex) {
        let budget_id = self.budget_id(slot);
        self.layout.put_long_volatile(slot, BUDGET_ID_OFFSET, 0);
        debug!(target: targets::BUDGET, budget_id = %budget_id, slot = %slot, "budget freed");
    }

    pub fn budget_id(&self, slot: SlotIndex) -> BudgetId {
        BudgetId::from_bits(self.layout.get_long(slot, BUDGET_ID_OFFSET))
    }

    pub fn remaining(&self, slot: SlotIndex) -> i64 {
        self.layout.get_long(slot, REMAINING_OFFSET)
    }

    pub fn watchers(&self, slot: SlotIndex) -> u64 {
        self.layout.get_long(slot, WATCHERS_OFFSET) as u64
    }

    pub(crate) fn add_remaining(&self, slot: SlotIndex, delta: i64) -> i64 {
        self.layout.get_and_add_long(slot, REMAINING_OFFSET, delta)
    }

    pub(crate) fn exchange_remaining(
        &self,
        slot: SlotIndex,
        expected: i64,
        value: i64,
    ) -> core::result::Result<i64, i64> {
        self.layout
            .compare_exchange_long(slot, REMAINING_OFFSET, expected, value)
    }

    /// 以 CAS 循环把 `bits` 并入 `watchers`，返回更新后的掩码。
    pub(crate) fn watch(&self, slot: SlotIndex, bits: u64) -> u64 {
        self.update_watchers(slot, |current| current | bits)
    }

    /// 以 CAS 循环从 `watchers` 中清除 `bits`，返回更新后的掩码。
    pub(crate) fn unwatch(&self, slot: SlotIndex, bits: u64) -> u64 {
        self.update_watchers(slot, |current| current & !bits)
    }

    /// 释放前清空额度与观察者。
    pub(crate) fn reset(&self, slot: SlotIndex) {
        self.layout.put_long_volatile(slot, REMAINING_OFFSET, 0);
        self.layout.put_long_volatile(slot, WATCHERS_OFFSET, 0);
    }

    fn update_watchers(&self, slot: SlotIndex, update: impl Fn(u64) -> u64) -> u64 {
        let mut current = self.watchers(slot);
        loop {
            let next = update(current);
            if next == current {
                return current;
            }
            match self.layout.compare_exchange_long(
                slot,
                WATCHERS_OFFSET,
                current as i64,
                next as i64,
            ) {
                Ok(_) => return next,
                Err(actual) => {
                    current = actual as u64;
                    spin_loop();
                }
            }
        }
    }

    fn home(&self, budget_id: BudgetId) -> usize {
        let capacity = self.capacity();
        if capacity == 0 {
            return 0;
        }
        let raw = budget_id.get();
        let mixed = (raw ^ (raw >> 29)).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        (mixed % capacity as u64) as usize
    }
}
