//! 预算的单写者角色：分配记录、追加额度并通知观察者。

use std::sync::Arc;

use tracing::{debug, trace};

use super::{BudgetId, BudgetTable};
use crate::{
    error::{FlowError, Result},
    layout::SlotIndex,
    observability::targets,
};

/// creditor 侧的唤醒回调。
///
/// # 教案式说明
/// - **意图 (Why)**：`credit` 发现有观察者时需要“通知它们所在的分片”，但本 crate 不认识调度器；
///   以单方法 trait 注入，测试中可直接替换为闭包计数器。
/// - **契约 (What)**：`watchers` 为调用时刻的观察者掩码（每位代表一个观察分片）；
///   实现负责把信号送达对应分片，最终驱动那里的 [`super::BudgetDebitor::flush`]。
///   回调在 `credit` 内同步执行，不应阻塞。
pub trait BudgetFlusher: Send + Sync {
    fn flush(&self, trace_id: u64, budget_id: BudgetId, watchers: u64);
}

impl<F> BudgetFlusher for F
where
    F: Fn(u64, BudgetId, u64) + Send + Sync,
{
    fn flush(&self, trace_id: u64, budget_id: BudgetId, watchers: u64) {
        self(trace_id, budget_id, watchers)
    }
}

/// creditor 持有的记录句柄，携带分配时的预算标识以识别过期索引。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CreditorIndex {
    slot: SlotIndex,
    budget_id: BudgetId,
}

impl CreditorIndex {
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub fn budget_id(&self) -> BudgetId {
        self.budget_id
    }
}

/// 预算 creditor：每个分片一个，独占本分片预算表的分配与释放。
///
/// # 教案式说明
/// - **意图 (Why)**：下游连接的发送窗口由拥有该连接的绑定授予；creditor 把窗口换算为共享记录里的
///   `remaining`，让其他分片上的 debitor 无锁领取。
/// - **逻辑 (How)**：
///   1. `acquire` 先查找同标识的已有记录（可重入），否则分配新记录；
///   2. `credit` 以原子加法追加额度，随后读取 `watchers`，非零时恰好调用一次 [`BudgetFlusher`]；
///   3. `release` 先清空额度与观察者，再释放记录。
/// - **契约 (What)**：
///   - 同一预算只允许一个 creditor；
///   - 预算标识必须归属本分片（[`BudgetId::owner_index`]），否则 debitor 无法定位；
///   - `credit` 返回追加前的额度，绑定可借此识别 “0 → 正数” 的边沿。
/// - **风险 (Trade-offs)**：`watchers` 读取发生在加法之后，与 debitor 的置位存在窄窗口竞争；
///   协议依赖 debitor 在每次唤醒后重新领取，因此偶发的空唤醒或延迟唤醒都不影响正确性。
pub struct BudgetCreditor {
    shard_index: usize,
    table: BudgetTable,
    flusher: Arc<dyn BudgetFlusher>,
    acquired: usize,
}

impl BudgetCreditor {
    pub fn new(shard_index: usize, table: BudgetTable, flusher: Arc<dyn BudgetFlusher>) -> Self {
        Self {
            shard_index,
            table,
            flusher,
            acquired: 0,
        }
    }

    pub fn shard_index(&self) -> usize {
        self.shard_index
    }

    pub fn table(&self) -> &BudgetTable {
        &self.table
    }

    /// 当前持有的预算数量。
    pub fn acquired(&self) -> usize {
        self.acquired
    }

    /// 为 `budget_id` 取得（或重新取得）一条记录。
    pub fn acquire(&mut self, budget_id: BudgetId) -> Result<CreditorIndex> {
        if budget_id.is_none() {
            return Err(FlowError::InvalidBudgetId);
        }
        if budget_id.owner_index() != self.shard_index {
            return Err(FlowError::ForeignBudget {
                budget_id,
                shard_index: self.shard_index,
            });
        }

        if let Some(slot) = self.table.find(budget_id) {
            return Ok(CreditorIndex { slot, budget_id });
        }

        let slot = self.table.allocate(budget_id)?;
        self.acquired += 1;
        debug!(
            target: targets::BUDGET,
            shard = self.shard_index,
            budget_id = %budget_id,
            acquired = self.acquired,
            "creditor acquired budget"
        );
        Ok(CreditorIndex { slot, budget_id })
    }

    /// 清空并释放记录；之后该标识无法再被 debitor 解析。
    pub fn release(&mut self, index: CreditorIndex) -> Result<()> {
        self.verify(index)?;
        self.table.reset(index.slot);
        self.table.free(index.slot);
        self.acquired = self.acquired.saturating_sub(1);
        debug!(
            target: targets::BUDGET,
            shard = self.shard_index,
            budget_id = %index.budget_id,
            acquired = self.acquired,
            "creditor released budget"
        );
        Ok(())
    }

    pub fn budget_id(&self, index: CreditorIndex) -> BudgetId {
        self.table.budget_id(index.slot)
    }

    pub fn available(&self, index: CreditorIndex) -> i64 {
        self.table.remaining(index.slot)
    }

    /// 追加额度，返回追加前的 `remaining`。
    pub fn credit(&self, trace_id: u64, index: CreditorIndex, amount: i64) -> Result<i64> {
        self.verify(index)?;
        let previous = self.table.add_remaining(index.slot, amount);
        let watchers = self.table.watchers(index.slot);
        trace!(
            target: targets::BUDGET,
            trace_id,
            budget_id = %index.budget_id,
            previous,
            amount,
            watchers,
            "budget credited"
        );
        if watchers != 0 {
            self.flusher.flush(trace_id, index.budget_id, watchers);
        }
        Ok(previous)
    }

    /// 按标识追加额度；未知标识是调用方错误，不会静默忽略。
    pub fn credit_by_id(&self, trace_id: u64, budget_id: BudgetId, amount: i64) -> Result<i64> {
        let slot = self
            .table
            .find(budget_id)
            .ok_or(FlowError::UnknownBudget { budget_id })?;
        self.credit(trace_id, CreditorIndex { slot, budget_id }, amount)
    }

    fn verify(&self, index: CreditorIndex) -> Result<()> {
        if self.table.budget_id(index.slot) == index.budget_id {
            Ok(())
        } else {
            Err(FlowError::UnknownBudget {
                budget_id: index.budget_id,
            })
        }
    }
}

impl core::fmt::Debug for BudgetCreditor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BudgetCreditor")
            .field("shard_index", &self.shard_index)
            .field("acquired", &self.acquired)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}
