use super::{LayoutStorage, WORD_BYTES};
use crate::sync::AtomicI64;

/// 进程内堆存储，零初始化。
///
/// 单进程引擎的所有分片共享同一个 `Arc<SlottedLayout>` 时使用；Loom 模型下同样可用。
pub struct HeapStorage {
    words: Box<[AtomicI64]>,
    label: String,
}

impl HeapStorage {
    /// 分配 `bytes` 字节（向下取整到 8 的倍数）的零初始化区域。
    pub fn with_bytes(bytes: usize) -> Self {
        let words = (0..bytes / WORD_BYTES).map(|_| AtomicI64::new(0)).collect();
        Self {
            words,
            label: String::from("heap"),
        }
    }

    /// 替换日志标签。
    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl LayoutStorage for HeapStorage {
    fn words(&self) -> &[AtomicI64] {
        &self.words
    }

    fn label(&self) -> &str {
        &self.label
    }
}
