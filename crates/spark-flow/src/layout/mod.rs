//! 定长记录共享区域（SlottedLayout）。
//!
//! # 设计总览（Why）
//! - 预算表需要被所有 worker 分片（乃至多个进程）同时访问，因此抽象出一块“定容量、定记录尺寸”
//!   的区域，只提供 64 位字段级别的原子操作，不携带任何上层语义；
//! - 存储后端通过 [`LayoutStorage`] 注入：进程内测试与单进程引擎使用 [`HeapStorage`]，
//!   跨进程部署使用 `MAP_SHARED` 文件映射（`mmap` Feature）。
//!
//! # 契约说明（What）
//! - 容量在创建时固定：`capacity = 存储字节数 / 记录字节数`，余数被忽略；
//! - [`SlottedLayout::slot`] 对越界索引返回 [`FlowError::OutOfSlots`]，校验后的 [`SlotIndex`]
//!   访问字段不会失败；
//! - 读取为 Acquire，`put_long_volatile` 为 Release，CAS 与加法为 AcqRel，所有操作都不阻塞。

mod heap;
#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
mod mmap;

use core::fmt;

use tracing::debug;

pub use heap::HeapStorage;
#[cfg(all(unix, feature = "mmap", not(any(loom, spark_loom))))]
pub use mmap::MmapStorage;

use crate::{
    error::{FlowError, Result},
    observability::targets,
    sync::{AtomicI64, Ordering},
};

const WORD_BYTES: usize = 8;

/// 布局存储后端：以 64 位原子字切片的形式暴露整块区域。
///
/// # 教案式说明
/// - **意图 (Why)**：让 [`SlottedLayout`] 不关心内存来源（堆、文件映射或其他共享段）。
/// - **契约 (What)**：`words()` 在存储生命周期内必须返回同一块内存；实现需保证 `Send + Sync`，
///   因为同一布局会被多个分片线程共享。
pub trait LayoutStorage: Send + Sync + 'static {
    /// 整块区域的原子字视图。
    fn words(&self) -> &[AtomicI64];

    /// 用于日志的人类可读标签，例如文件路径。
    fn label(&self) -> &str;
}

/// 记录几何：每条记录占用的字节数。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordLayout {
    record_words: usize,
}

impl RecordLayout {
    /// 以 64 位字为单位构造记录几何，`words` 必须为正。
    pub const fn with_words(words: usize) -> Self {
        assert!(words > 0, "record must hold at least one word");
        Self {
            record_words: words,
        }
    }

    /// 以字节为单位构造，要求为 8 的正整数倍。
    pub fn new(record_bytes: usize) -> Result<Self> {
        if record_bytes == 0 {
            return Err(FlowError::InvalidRecord {
                record_bytes,
                reason: "record size must be positive",
            });
        }
        if record_bytes % WORD_BYTES != 0 {
            return Err(FlowError::InvalidRecord {
                record_bytes,
                reason: "record size must be a multiple of 8",
            });
        }
        Ok(Self {
            record_words: record_bytes / WORD_BYTES,
        })
    }

    pub const fn record_bytes(&self) -> usize {
        self.record_words * WORD_BYTES
    }

    pub const fn record_words(&self) -> usize {
        self.record_words
    }
}

/// 经过边界校验的记录索引。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(usize);

impl SlotIndex {
    pub const fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 固定容量、固定记录尺寸的原子共享区域。
///
/// # 教案式说明
/// - **意图 (Why)**：为预算表提供“纯机制”的底座，上层语义（预算标识、剩余额度、观察者掩码）
///   全部通过字段偏移表达。
/// - **逻辑 (How)**：字段地址 = `slot * record_words + offset / 8`；所有访问都落在
///   [`AtomicI64`] 上，因此跨分片的读写天然无撕裂。
/// - **契约 (What)**：
///   - `field_offset` 必须 8 字节对齐且位于记录内部（调试构建下断言）；
///   - [`SlotIndex`] 只能来自同一布局的 [`SlottedLayout::slot`]，混用不同布局的索引属于编程错误，
///     越界时直接 panic；
///   - CAS 重试由调用方以 [`SlottedLayout::compare_exchange_long`] 驱动。
pub struct SlottedLayout {
    storage: Box<dyn LayoutStorage>,
    record: RecordLayout,
    capacity: usize,
}

impl SlottedLayout {
    /// 在给定存储之上按记录几何切分区域。
    pub fn new(storage: impl LayoutStorage, record: RecordLayout) -> Self {
        let capacity = storage.words().len() / record.record_words();
        debug!(
            target: targets::LAYOUT,
            label = storage.label(),
            capacity,
            record_bytes = record.record_bytes(),
            "slotted layout mapped"
        );
        Self {
            storage: Box::new(storage),
            record,
            capacity,
        }
    }

    /// 分配恰好容纳 `records` 条记录的堆区域。
    pub fn heap(records: usize, record: RecordLayout) -> Self {
        Self::new(
            HeapStorage::with_bytes(records * record.record_bytes()),
            record,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn record(&self) -> RecordLayout {
        self.record
    }

    pub fn label(&self) -> &str {
        self.storage.label()
    }

    /// 校验记录索引。
    pub fn slot(&self, index: usize) -> Result<SlotIndex> {
        if index < self.capacity {
            Ok(SlotIndex(index))
        } else {
            Err(FlowError::OutOfSlots {
                capacity: self.capacity,
            })
        }
    }

    /// 从 `start` 开始环绕遍历全部记录。
    pub fn slots_from(&self, start: usize) -> impl Iterator<Item = SlotIndex> + '_ {
        let capacity = self.capacity;
        (0..capacity).map(move |step| SlotIndex((start + step) % capacity))
    }

    pub fn get_long(&self, slot: SlotIndex, field_offset: usize) -> i64 {
        self.word(slot, field_offset).load(Ordering::Acquire)
    }

    pub fn put_long_volatile(&self, slot: SlotIndex, field_offset: usize, value: i64) {
        self.word(slot, field_offset).store(value, Ordering::Release);
    }

    /// 单次强 CAS，成功返回 `true`。
    pub fn compare_and_set_long(
        &self,
        slot: SlotIndex,
        field_offset: usize,
        expected: i64,
        value: i64,
    ) -> bool {
        self.word(slot, field_offset)
            .compare_exchange(expected, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 供重试循环使用的弱 CAS：失败时返回当前值，可能伪失败。
    pub fn compare_exchange_long(
        &self,
        slot: SlotIndex,
        field_offset: usize,
        expected: i64,
        value: i64,
    ) -> core::result::Result<i64, i64> {
        self.word(slot, field_offset).compare_exchange_weak(
            expected,
            value,
            Ordering::AcqRel,
            Ordering::Acquire,
        )
    }

    /// 原子加法，返回加之前的值。
    pub fn get_and_add_long(&self, slot: SlotIndex, field_offset: usize, delta: i64) -> i64 {
        self.word(slot, field_offset)
            .fetch_add(delta, Ordering::AcqRel)
    }

    fn word(&self, slot: SlotIndex, field_offset: usize) -> &AtomicI64 {
        debug_assert!(
            field_offset % WORD_BYTES == 0,
            "field offset must be 8-byte aligned"
        );
        debug_assert!(
            field_offset < self.record.record_bytes(),
            "field offset must lie inside the record"
        );
        let index = slot.0 * self.record.record_words() + field_offset / WORD_BYTES;
        &self.storage.words()[index]
    }
}

impl fmt::Debug for SlottedLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlottedLayout")
            .field("label", &self.label())
            .field("capacity", &self.capacity)
            .field("record", &self.record)
            .finish()
    }
}
