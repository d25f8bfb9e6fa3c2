//! 预算的领取者角色：解析共享记录、以 CAS 领取额度、登记并回放观察者。

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::{BudgetId, BudgetTable, MAX_WORKERS};
use crate::{
    error::{FlowError, Result},
    layout::SlotIndex,
    observability::targets,
    sync::spin_loop,
};

/// debitor 侧的单观察者唤醒回调，参数为触发唤醒的 `trace_id`。
pub type WatcherFlusher = Box<dyn FnMut(u64) + Send>;

/// debitor 持有的本地句柄。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DebitorIndex {
    slot: SlotIndex,
    budget_id: BudgetId,
}

impl DebitorIndex {
    pub fn slot(&self) -> SlotIndex {
        self.slot
    }

    pub fn budget_id(&self) -> BudgetId {
        self.budget_id
    }
}

struct Watcher {
    flusher: WatcherFlusher,
    waiting: bool,
}

struct Attachment {
    slot: SlotIndex,
    watchers: BTreeMap<u64, Watcher>,
}

impl Attachment {
    fn any_waiting(&self) -> bool {
        self.watchers.values().any(|watcher| watcher.waiting)
    }
}

/// 预算 debitor：每个“观察分片 × 所属分片”一个。
///
/// # 教案式说明
/// - **意图（Why）**：流的生产者需要按下游窗口限速写出，而窗口可能由另一个分片的 creditor 授予；
///   debitor 直接在共享记录上领取，热路径不经过任何跨分片消息。
/// - **逻辑（How）**：
///   - 共享 `watchers` 掩码中的一位代表**一个观察分片**（`watcher_index`），而不是单条流；
///   - 同一分片内部有哪些流在等待，由本地的 `watcher_id → flusher` 表记录；
///   - `claim` 不足时登记本地观察者并置位；完全满足时注销，只有本地再无等待者才清位，
///     否则其他流的唤醒会丢失；
///   - `flush` 先摘下本地等待集合并清位，再逐个调用回调，使回调中安排的重新领取能够再次置位。
/// - **契约（What）**：
///   - 预算必须已由所属分片的 creditor 创建，否则 `acquire` 返回 [`FlowError::UnknownBudget`]；
///   - 部分领取是正常返回值；调用方在每次唤醒后都必须重新 `claim`，不能假设额度已经到位；
///   - 回调在 `flush` 内同步执行，且此时 debitor 处于可变借用中，回调只能排队工作，不能重入。
/// - **风险/设计取舍（Trade-offs）**：单个预算最多区分 64 个观察分片，对应 [`MAX_WORKERS`]；
///   观察者数量在分片内部不受掩码宽度限制。
pub struct BudgetDebitor {
    watcher_index: usize,
    owner_index: usize,
    table: BudgetTable,
    attachments: HashMap<BudgetId, Attachment>,
}

impl BudgetDebitor {
    /// 构造观察分片 `watcher_index` 上、指向 `owner_index` 预算表的 debitor。
    pub fn new(watcher_index: usize, owner_index: usize, table: BudgetTable) -> Result<Self> {
        if watcher_index >= MAX_WORKERS {
            return Err(FlowError::UnknownShard {
                shard_index: watcher_index,
                workers: MAX_WORKERS,
            });
        }
        Ok(Self {
            watcher_index,
            owner_index,
            table,
            attachments: HashMap::new(),
        })
    }

    pub fn watcher_index(&self) -> usize {
        self.watcher_index
    }

    pub fn owner_index(&self) -> usize {
        self.owner_index
    }

    /// 当前附着的预算数量。
    pub fn acquired(&self) -> usize {
        self.attachments.len()
    }

    /// 附着到 `budget_id` 并为 `watcher_id` 登记唤醒回调；重复登记会替换旧回调。
    pub fn acquire<F>(
        &mut self,
        budget_id: BudgetId,
        watcher_id: u64,
        flusher: F,
    ) -> Result<DebitorIndex>
    where
        F: FnMut(u64) + Send + 'static,
    {
        if budget_id.is_none() {
            return Err(FlowError::InvalidBudgetId);
        }
        if budget_id.owner_index() != self.owner_index {
            return Err(FlowError::ForeignBudget {
                budget_id,
                shard_index: self.owner_index,
            });
        }

        let stale = self
            .attachments
            .get(&budget_id)
            .is_some_and(|attachment| self.table.budget_id(attachment.slot) != budget_id);
        if stale {
            self.attachments.remove(&budget_id);
        }

        if !self.attachments.contains_key(&budget_id) {
            let slot = self
                .table
                .find(budget_id)
                .ok_or(FlowError::UnknownBudget { budget_id })?;
            self.attachments.insert(
                budget_id,
                Attachment {
                    slot,
                    watchers: BTreeMap::new(),
                },
            );
            debug!(
                target: targets::BUDGET,
                shard = self.watcher_index,
                budget_id = %budget_id,
                slot = %slot,
                "debitor attached"
            );
        }

        let attachment = self
            .attachments
            .get_mut(&budget_id)
            .ok_or(FlowError::UnknownBudget { budget_id })?;
        let waiting = attachment
            .watchers
            .get(&watcher_id)
            .is_some_and(|watcher| watcher.waiting);
        attachment.watchers.insert(
            watcher_id,
            Watcher {
                flusher: Box::new(flusher),
                waiting,
            },
        );

        Ok(DebitorIndex {
            slot: attachment.slot,
            budget_id,
        })
    }

    /// 注销 `watcher_id`；本地最后一个观察者离开时丢弃句柄。返回是否确实注销了登记。
    pub fn release(&mut self, index: DebitorIndex, watcher_id: u64) -> bool {
        let bit = self.watcher_bit();
        let Some(attachment) = self.attachments.get_mut(&index.budget_id) else {
            return false;
        };
        let Some(removed) = attachment.watchers.remove(&watcher_id) else {
            return false;
        };

        let live = self.table.budget_id(attachment.slot) == index.budget_id;
        if removed.waiting && !attachment.any_waiting() && live {
            self.table.unwatch(attachment.slot, bit);
        }
        if attachment.watchers.is_empty() {
            self.attachments.remove(&index.budget_id);
            debug!(
                target: targets::BUDGET,
                shard = self.watcher_index,
                budget_id = %index.budget_id,
                "debitor detached"
            );
        }
        true
    }

    /// 在 `[minimum, maximum]` 区间内领取额度。
    pub fn claim(
        &mut self,
        index: DebitorIndex,
        watcher_id: u64,
        minimum: i32,
        maximum: i32,
    ) -> Result<i32> {
        self.claim_traced(0, index, watcher_id, minimum, maximum)
    }

    /// 与 [`BudgetDebitor::claim`] 相同，额外把 `trace_id` 写入追踪日志。
    pub fn claim_traced(
        &mut self,
        trace_id: u64,
        index: DebitorIndex,
        watcher_id: u64,
        minimum: i32,
        maximum: i32,
    ) -> Result<i32> {
        if minimum < 0 || minimum > maximum {
            return Err(FlowError::InvalidClaim { minimum, maximum });
        }
        let budget_id = index.budget_id;
        let bit = self.watcher_bit();
        let table = &self.table;
        let attachment = self
            .attachments
            .get_mut(&budget_id)
            .ok_or(FlowError::UnknownBudget { budget_id })?;
        if table.budget_id(attachment.slot) != budget_id {
            return Err(FlowError::UnknownBudget { budget_id });
        }
        if !attachment.watchers.contains_key(&watcher_id) {
            return Err(FlowError::UnknownWatcher {
                budget_id,
                watcher_id,
            });
        }
        let slot = attachment.slot;

        let mut remaining = table.remaining(slot);
        let claimed = loop {
            let claimed = if remaining >= i64::from(minimum) {
                remaining.clamp(0, i64::from(maximum))
            } else {
                0
            };
            if claimed == 0 {
                break 0;
            }
            match table.exchange_remaining(slot, remaining, remaining - claimed) {
                Ok(_) => break claimed,
                Err(actual) => {
                    remaining = actual;
                    spin_loop();
                }
            }
        };
        let claimed = claimed as i32;

        let watcher = attachment
            .watchers
            .get_mut(&watcher_id)
            .ok_or(FlowError::UnknownWatcher {
                budget_id,
                watcher_id,
            })?;
        if claimed < maximum {
            watcher.waiting = true;
            table.watch(slot, bit);
        } else {
            watcher.waiting = false;
            if !attachment.any_waiting() {
                table.unwatch(slot, bit);
            }
        }

        trace!(
            target: targets::BUDGET,
            trace_id,
            shard = self.watcher_index,
            budget_id = %budget_id,
            watcher_id,
            minimum,
            maximum,
            claimed,
            remaining = table.remaining(slot),
            "budget claimed"
        );
        Ok(claimed)
    }

    /// 唤醒 `budget_id` 上本地登记的全部等待者，返回回调次数。
    pub fn flush(&mut self, trace_id: u64, budget_id: BudgetId) -> usize {
        let bit = self.watcher_bit();
        let Some(attachment) = self.attachments.get_mut(&budget_id) else {
            return 0;
        };

        let mut woken = Vec::new();
        for (watcher_id, watcher) in attachment.watchers.iter_mut() {
            if watcher.waiting {
                watcher.waiting = false;
                woken.push(*watcher_id);
            }
        }
        if self.table.budget_id(attachment.slot) == budget_id {
            self.table.unwatch(attachment.slot, bit);
        }

        for watcher_id in &woken {
            if let Some(watcher) = attachment.watchers.get_mut(watcher_id) {
                (watcher.flusher)(trace_id);
            }
        }

        trace!(
            target: targets::BUDGET,
            trace_id,
            shard = self.watcher_index,
            budget_id = %budget_id,
            woken = woken.len(),
            "budget flushed"
        );
        woken.len()
    }

    pub fn available(&self, index: DebitorIndex) -> i64 {
        self.table.remaining(index.slot)
    }

    pub fn watchers(&self, index: DebitorIndex) -> u64 {
        self.table.watchers(index.slot)
    }

    pub fn budget_id(&self, index: DebitorIndex) -> BudgetId {
        self.table.budget_id(index.slot)
    }

    /// `watcher_id` 是否正在等待更多额度。
    pub fn is_waiting(&self, index: DebitorIndex, watcher_id: u64) -> bool {
        self.attachments
            .get(&index.budget_id)
            .and_then(|attachment| attachment.watchers.get(&watcher_id))
            .is_some_and(|watcher| watcher.waiting)
    }

    fn watcher_bit(&self) -> u64 {
        1u64 << self.watcher_index
    }
}

impl core::fmt::Debug for BudgetDebitor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BudgetDebitor")
            .field("watcher_index", &self.watcher_index)
            .field("owner_index", &self.owner_index)
            .field("acquired", &self.attachments.len())
            .finish_non_exhaustive()
    }
}
