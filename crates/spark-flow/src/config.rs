//! 流控配置。
//!
//! # 设计背景（Why）
//! - 嵌入引擎在启动时决定分片数量、每张预算表的容量以及共享内存的来源；
//!   把这些参数集中在一个可反序列化的结构里，便于从引擎的 TOML 配置片段直接装载。
//!
//! # 契约说明（What）
//! - `workers` 必须位于 `1..=MAX_WORKERS`，上限由 `watchers` 掩码宽度决定；
//! - `budget_entries` 必须为正，文件映射时每个分片占用 `budget_entries * 64` 字节；
//! - `storage = "mmap"` 时必须提供 `directory`；
//! - `min_claim` 为 reply 侧限速器的最小领取量，必须为正。
//!
//! # 示例
//! ```toml
//! workers = 4
//! budget_entries = 1024
//! storage = "mmap"
//! directory = "/dev/shm/engine"
//! ```

use std::path::PathBuf;

use serde::Deserialize;

use crate::{
    budget::{MAX_WORKERS, table::BUDGET_RECORD_BYTES},
    error::{FlowError, Result},
};

/// 预算表存储来源。
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// 进程内堆区域，所有分片在同一进程。
    #[default]
    Heap,
    /// `MAP_SHARED` 文件映射，允许多进程共享。
    Mmap,
}

impl StorageKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Heap => "heap",
            StorageKind::Mmap => "mmap",
        }
    }
}

/// 流控核心配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FlowConfig {
    pub workers: usize,
    pub budget_entries: usize,
    pub storage: StorageKind,
    pub directory: Option<PathBuf>,
    pub min_claim: i32,
}

impl FlowConfig {
    pub const DEFAULT_BUDGET_ENTRIES: usize = 512;
    pub const DEFAULT_MIN_CLAIM: i32 = 1;

    /// 解析 TOML 文本并校验。
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FlowConfig =
            toml::from_str(text).map_err(|err| FlowError::config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// 校验取值范围与字段组合。
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(FlowError::config(format!(
                "workers must be within 1..={MAX_WORKERS}, got {}",
                self.workers
            )));
        }
        if self.budget_entries == 0 {
            return Err(FlowError::config("budget_entries must be positive"));
        }
        if self.min_claim <= 0 {
            return Err(FlowError::config(format!(
                "min_claim must be positive, got {}",
                self.min_claim
            )));
        }
        if self.storage == StorageKind::Mmap && self.directory.is_none() {
            return Err(FlowError::config("mmap storage requires a directory"));
        }
        Ok(())
    }

    /// 单个分片预算表所需的字节数。
    pub fn layout_bytes(&self) -> usize {
        self.budget_entries * BUDGET_RECORD_BYTES
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            budget_entries: Self::DEFAULT_BUDGET_ENTRIES,
            storage: StorageKind::Heap,
            directory: None,
            min_claim: Self::DEFAULT_MIN_CLAIM,
        }
    }
}
