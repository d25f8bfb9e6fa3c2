//! 信用流控（budget）。
//!
//! # 设计总览（Why）
//! - 一个预算由唯一的 creditor 授予额度，任意多个（可能位于其他分片的）debitor 以 CAS 领取；
//! - 领取不足时 debitor 在共享记录的 `watchers` 掩码上置位，creditor 下一次 `credit`
//!   看到非零掩码就通过 [`BudgetFlusher`] 通知这些分片，分片再调用本地 debitor 的 `flush`
//!   回放等待中的流。
//!
//! # 模块结构（How）
//! - [`table`]：共享记录的分配、查找与释放；
//! - [`creditor`] / [`debitor`]：两种角色的算法；
//! - [`fanout`]：把观察者掩码扇出为逐分片的 Flush 信号；
//! - [`shard`]：每个 worker 分片上的胶水，统一持有 creditor、各 owner 的 debitor 与收件箱。

pub mod creditor;
pub mod debitor;
pub mod fanout;
mod id;
pub mod shard;
pub mod table;

pub use creditor::{BudgetCreditor, BudgetFlusher, CreditorIndex};
pub use debitor::{BudgetDebitor, DebitorIndex, WatcherFlusher};
pub use fanout::{FlushFanout, FlushSignal};
pub use id::{BudgetId, BudgetIdSupplier};
pub use shard::{BudgetShard, HeapLayouts, LayoutSource};
#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
pub use shard::MmapLayouts;
pub use table::BudgetTable;

/// 单个引擎允许的最大 worker 分片数，等于 `watchers` 掩码的位宽。
pub const MAX_WORKERS: usize = u64::BITS as usize;
