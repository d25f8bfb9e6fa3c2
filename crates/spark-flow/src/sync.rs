//! 原子原语的统一入口：常规构建使用 `core`，模型检查构建切换到 Loom。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use core::hint::spin_loop;
#[cfg(not(any(loom, spark_loom)))]
pub(crate) use core::sync::atomic::{AtomicI64, Ordering};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::hint::spin_loop;
#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::atomic::{AtomicI64, Ordering};
