//! worker 分片上的预算胶水。
//!
//! # 教案式说明
//! - **意图（Why）**：每个分片运行一个单线程 reactor，需要同时扮演三种角色：
//!   本分片预算的 creditor、其他分片预算的 debitor、以及 Flush 信号的接收方。
//!   [`BudgetShard`] 把这三者放在一起，绑定只需持有一个对象。
//! - **逻辑（How）**：
//!   - 预算表布局来自 [`LayoutSource`]：所属分片 `create`，其他分片在首次需要时 `attach`；
//!   - debitor 按所属分片惰性创建，一个 owner 对应一个 debitor；
//!   - 收件箱中的 [`FlushSignal`] 按预算标识的 owner 路由到对应 debitor 的 `flush`。
//! - **契约（What）**：分片索引必须小于 [`MAX_WORKERS`]；`group` 构造的所有分片共享同一个
//!   [`FlushFanout`]，因此任一分片 `credit` 都能唤醒其他分片上的等待者。

use std::{collections::BTreeMap, sync::Arc};

#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
use std::path::{Path, PathBuf};

use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

use super::{
    BudgetCreditor, BudgetDebitor, BudgetFlusher, BudgetId, BudgetIdSupplier, BudgetTable,
    FlushFanout, FlushSignal, MAX_WORKERS, table::BUDGET_RECORD,
};
use crate::{
    config::{FlowConfig, StorageKind},
    error::{FlowError, Result},
    layout::SlottedLayout,
    observability::targets,
    stream::ReplyPacer,
};

/// 分片获取预算表布局的方式。
pub trait LayoutSource: Send + Sync {
    /// 由所属分片调用，创建自己的预算表布局。
    fn create(&self, owner_index: usize) -> Result<Arc<SlottedLayout>>;

    /// 由其他分片调用，附着到 `owner_index` 已创建的布局。
    fn attach(&self, owner_index: usize) -> Result<Arc<SlottedLayout>>;
}

/// 进程内堆布局：每个分片一张表，所有分片共享同一组 `Arc`。
#[derive(Debug)]
pub struct HeapLayouts {
    layouts: Vec<Arc<SlottedLayout>>,
}

impl HeapLayouts {
    pub fn new(workers: usize, entries: usize) -> Self {
        let layouts = (0..workers)
            .map(|_| Arc::new(SlottedLayout::heap(entries, BUDGET_RECORD)))
            .collect();
        Self { layouts }
    }

    fn get(&self, owner_index: usize) -> Result<Arc<SlottedLayout>> {
        self.layouts
            .get(owner_index)
            .cloned()
            .ok_or(FlowError::UnknownShard {
                shard_index: owner_index,
                workers: self.layouts.len(),
            })
    }
}

impl LayoutSource for HeapLayouts {
    fn create(&self, owner_index: usize) -> Result<Arc<SlottedLayout>> {
        self.get(owner_index)
    }

    fn attach(&self, owner_index: usize) -> Result<Arc<SlottedLayout>> {
        self.get(owner_index)
    }
}

/// 文件映射布局：分片 `N` 的预算表位于 `<directory>/budgets<N>`。
#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
#[derive(Debug)]
pub struct MmapLayouts {
    directory: PathBuf,
    workers: usize,
    entries: usize,
}

#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
impl MmapLayouts {
    pub fn new(directory: impl Into<PathBuf>, workers: usize, entries: usize) -> Self {
        Self {
            directory: directory.into(),
            workers,
            entries,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// 分片 `owner_index` 的预算表文件路径。
    pub fn path(&self, owner_index: usize) -> PathBuf {
        self.directory.join(format!("budgets{owner_index}"))
    }

    fn check(&self, owner_index: usize) -> Result<()> {
        if owner_index < self.workers {
            Ok(())
        } else {
            Err(FlowError::UnknownShard {
                shard_index: owner_index,
                workers: self.workers,
            })
        }
    }
}

#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
impl LayoutSource for MmapLayouts {
    fn create(&self, owner_index: usize) -> Result<Arc<SlottedLayout>> {
        use super::table::BUDGET_RECORD_BYTES;
        use crate::layout::MmapStorage;

        self.check(owner_index)?;
        let storage =
            MmapStorage::create(&self.path(owner_index), self.entries * BUDGET_RECORD_BYTES)?;
        Ok(Arc::new(SlottedLayout::new(storage, BUDGET_RECORD)))
    }

    fn attach(&self, owner_index: usize) -> Result<Arc<SlottedLayout>> {
        use crate::layout::MmapStorage;

        self.check(owner_index)?;
        let storage = MmapStorage::attach(&self.path(owner_index))?;
        Ok(Arc::new(SlottedLayout::new(storage, BUDGET_RECORD)))
    }
}

/// 单个 worker 分片的预算上下文。
pub struct BudgetShard {
    index: usize,
    layouts: Arc<dyn LayoutSource>,
    creditor: BudgetCreditor,
    debitors: BTreeMap<usize, BudgetDebitor>,
    ids: BudgetIdSupplier,
    inbox: UnboundedReceiver<FlushSignal>,
    min_claim: i32,
}

impl BudgetShard {
    /// 创建分片 `index` 的上下文，并立即创建其所属预算表。
    pub fn new(
        index: usize,
        layouts: Arc<dyn LayoutSource>,
        flusher: Arc<dyn BudgetFlusher>,
        inbox: UnboundedReceiver<FlushSignal>,
    ) -> Result<Self> {
        if index >= MAX_WORKERS {
            return Err(FlowError::UnknownShard {
                shard_index: index,
                workers: MAX_WORKERS,
            });
        }
        let table = BudgetTable::new(layouts.create(index)?)?;
        Ok(Self {
            index,
            layouts,
            creditor: BudgetCreditor::new(index, table, flusher),
            debitors: BTreeMap::new(),
            ids: BudgetIdSupplier::new(index),
            inbox,
            min_claim: FlowConfig::DEFAULT_MIN_CLAIM,
        })
    }

    /// 按配置构造全部分片，分片之间通过共享的 [`FlushFanout`] 互相唤醒。
    pub fn group(config: &FlowConfig) -> Result<Vec<BudgetShard>> {
        config.validate()?;
        let layouts = layout_source(config)?;

        let (inboxes, receivers): (Vec<_>, Vec<_>) = (0..config.workers)
            .map(|_| mpsc::unbounded_channel())
            .unzip();
        let fanout: Arc<dyn BudgetFlusher> = Arc::new(FlushFanout::new(inboxes));

        let shards = receivers
            .into_iter()
            .enumerate()
            .map(|(index, inbox)| {
                BudgetShard::new(index, Arc::clone(&layouts), Arc::clone(&fanout), inbox)
                    .map(|shard| shard.with_min_claim(config.min_claim))
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(
            target: targets::BUDGET,
            workers = config.workers,
            entries = config.budget_entries,
            storage = config.storage.as_str(),
            min_claim = config.min_claim,
            "budget shards ready"
        );
        Ok(shards)
    }

    /// 覆盖本分片 reply 流的领取下限，至少为 1。
    pub fn with_min_claim(mut self, min_claim: i32) -> Self {
        self.min_claim = min_claim.max(1);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn min_claim(&self) -> i32 {
        self.min_claim
    }

    /// 为本分片上的一条 reply 流创建限速器，沿用分片的领取下限。
    pub fn reply_pacer(&self, watcher_id: u64) -> ReplyPacer {
        ReplyPacer::new(watcher_id, self.min_claim)
    }

    pub fn creditor(&self) -> &BudgetCreditor {
        &self.creditor
    }

    pub fn creditor_mut(&mut self) -> &mut BudgetCreditor {
        &mut self.creditor
    }

    /// 产出一个归属本分片的新预算标识。
    pub fn supply_budget_id(&mut self) -> BudgetId {
        self.ids.next_id()
    }

    /// 返回（必要时创建）面向 `budget_id` 所属分片的 debitor。
    pub fn supply_debitor(&mut self, budget_id: BudgetId) -> Result<&mut BudgetDebitor> {
        let owner_index = budget_id.owner_index();
        if !self.debitors.contains_key(&owner_index) {
            let table = if owner_index == self.index {
                self.creditor.table().clone()
            } else {
                BudgetTable::new(self.layouts.attach(owner_index)?)?
            };
            let debitor = BudgetDebitor::new(self.index, owner_index, table)?;
            self.debitors.insert(owner_index, debitor);
        }
        self.debitors
            .get_mut(&owner_index)
            .ok_or(FlowError::UnknownShard {
                shard_index: owner_index,
                workers: MAX_WORKERS,
            })
    }

    /// 已创建的、面向 `owner_index` 的 debitor。
    pub fn debitor(&mut self, owner_index: usize) -> Option<&mut BudgetDebitor> {
        self.debitors.get_mut(&owner_index)
    }

    /// 处理一条 Flush 信号，返回被唤醒的流数量。
    pub fn on_flush(&mut self, signal: FlushSignal) -> usize {
        self.debitors
            .get_mut(&signal.budget_id.owner_index())
            .map_or(0, |debitor| debitor.flush(signal.trace_id, signal.budget_id))
    }

    /// 处理针对本分片预算的系统 Window：把额度追加到对应预算。
    pub fn on_window(&self, trace_id: u64, budget_id: BudgetId, credit: i64) -> Result<i64> {
        self.creditor.credit_by_id(trace_id, budget_id, credit)
    }

    /// 非阻塞地处理收件箱中全部待处理信号，返回被唤醒的流总数。
    pub fn drain_flushes(&mut self) -> usize {
        let mut woken = 0;
        while let Ok(signal) = self.inbox.try_recv() {
            woken += self.on_flush(signal);
        }
        woken
    }

    /// 异步等待下一条 Flush 信号，供基于 Tokio 的 reactor 使用。
    pub async fn next_flush(&mut self) -> Option<FlushSignal> {
        self.inbox.recv().await
    }
}

impl core::fmt::Debug for BudgetShard {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BudgetShard")
            .field("index", &self.index)
            .field("min_claim", &self.min_claim)
            .field("creditor", &self.creditor)
            .field("debitors", &self.debitors.len())
            .finish_non_exhaustive()
    }
}

fn layout_source(config: &FlowConfig) -> Result<Arc<dyn LayoutSource>> {
    match config.storage {
        StorageKind::Heap => Ok(Arc::new(HeapLayouts::new(
            config.workers,
            config.budget_entries,
        ))),
        #[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
        StorageKind::Mmap => {
            let directory = config
                .directory
                .clone()
                .ok_or_else(|| FlowError::config("mmap storage requires a directory"))?;
            Ok(Arc::new(MmapLayouts::new(
                directory,
                config.workers,
                config.budget_entries,
            )))
        }
        #[cfg(not(all(unix, feature = "mmap", not(any(loom, spark_loom)))))]
        StorageKind::Mmap => Err(FlowError::config(
            "mmap storage is not available in this build",
        )),
    }
}
