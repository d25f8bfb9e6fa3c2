//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为预算表、creditor/debitor、布局存储与配置装载提供集中定义的错误域；
//! - 每个变体对应一个稳定错误码，协议绑定可据此决定拒绝流、重置流或上报告警。
//!
//! ## 设计要求（What）
//! - 所有错误均派生 [`thiserror::Error`]，可直接以 `?` 传播；
//! - 部分额度（`claimed < maximum`）是正常的背压信号，**不是**错误，不在本枚举中出现；
//! - 本 crate 内部从不重试，重试策略由调用方决定。

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::{budget::BudgetId, stream::FrameViolation};

/// 稳定错误码集合，遵循 `<域>.<子域>.<语义>` 命名。
pub mod codes {
    /// 预算表已无空闲记录。
    pub const BUDGET_OUT_OF_SLOTS: &str = "flow.budget.out_of_slots";
    /// 引用的预算不存在或已被释放。
    pub const BUDGET_UNKNOWN: &str = "flow.budget.unknown";
    /// 预算标识为保留值 `0`。
    pub const BUDGET_INVALID_ID: &str = "flow.budget.invalid_id";
    /// 预算标识归属于其他分片。
    pub const BUDGET_FOREIGN: &str = "flow.budget.foreign_owner";
    /// debitor 未登记的观察者。
    pub const BUDGET_UNKNOWN_WATCHER: &str = "flow.budget.unknown_watcher";
    /// 领取区间非法。
    pub const CLAIM_INVALID_RANGE: &str = "flow.claim.invalid_range";
    /// 分片索引超出引擎范围。
    pub const SHARD_UNKNOWN: &str = "flow.shard.unknown";
    /// 记录几何参数非法。
    pub const LAYOUT_INVALID_RECORD: &str = "flow.layout.invalid_record";
    /// 布局存储（文件映射）失败。
    pub const LAYOUT_STORAGE: &str = "flow.layout.storage";
    /// 配置非法。
    pub const CONFIG_INVALID: &str = "flow.config.invalid";
    /// 帧违反半流状态或窗口约束。
    pub const STREAM_FRAME_VIOLATION: &str = "flow.stream.frame_violation";
}

/// 流控核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：把“容量耗尽”“引用失效”“调用方违约”三类失败显式区分，替代哨兵返回值，
///   避免与合法的零额度领取混淆。
/// - **契约 (What)**：
///   - [`FlowError::OutOfSlots`] 对请求操作是致命的，调用方应向上暴露（例如拒绝该流）；
///   - [`FlowError::UnknownBudget`] 等属于绑定层的编程/协议错误，见 [`FlowError::is_programming_error`]；
///   - 其余变体来自存储、配置或帧校验。
/// - **风险 (Trade-offs)**：`Storage` 携带 [`io::Error`]，因此整个枚举不实现 `Clone`。
#[derive(Debug, Error)]
pub enum FlowError {
    /// 预算表（或底层布局）已无可用记录。
    #[error("budget table exhausted: all {capacity} slots are in use")]
    OutOfSlots { capacity: usize },

    /// 预算标识没有对应的、由 creditor 创建的记录。
    #[error("budget {budget_id} is not allocated")]
    UnknownBudget { budget_id: BudgetId },

    /// `0` 被保留为“无预算”，不可分配。
    #[error("budget id 0 is reserved for streams without a budget")]
    InvalidBudgetId,

    /// 预算标识的所属分片与当前表不一致。
    #[error("budget {budget_id} is owned by shard {}, not shard {shard_index}", .budget_id.owner_index())]
    ForeignBudget {
        budget_id: BudgetId,
        shard_index: usize,
    },

    /// 在 debitor 上对未登记的观察者执行领取。
    #[error("watcher {watcher_id} is not registered on budget {budget_id}")]
    UnknownWatcher { budget_id: BudgetId, watcher_id: u64 },

    /// 领取区间必须满足 `0 <= minimum <= maximum`。
    #[error("invalid claim range: minimum {minimum}, maximum {maximum}")]
    InvalidClaim { minimum: i32, maximum: i32 },

    /// 分片索引不在引擎范围内。
    #[error("shard {shard_index} is outside the engine (workers = {workers})")]
    UnknownShard { shard_index: usize, workers: usize },

    /// 记录尺寸不满足对齐或最小字段要求。
    #[error("invalid record layout of {record_bytes} bytes: {reason}")]
    InvalidRecord {
        record_bytes: usize,
        reason: &'static str,
    },

    /// 创建或附着共享文件失败。
    #[error("layout storage `{}` failed: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// 配置解析或校验失败。
    #[error("invalid flow configuration: {reason}")]
    InvalidConfig { reason: String },

    /// 帧违反半流状态或窗口约束。
    #[error(transparent)]
    Frame(#[from] FrameViolation),
}

impl FlowError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::OutOfSlots { .. } => codes::BUDGET_OUT_OF_SLOTS,
            FlowError::UnknownBudget { .. } => codes::BUDGET_UNKNOWN,
            FlowError::InvalidBudgetId => codes::BUDGET_INVALID_ID,
            FlowError::ForeignBudget { .. } => codes::BUDGET_FOREIGN,
            FlowError::UnknownWatcher { .. } => codes::BUDGET_UNKNOWN_WATCHER,
            FlowError::InvalidClaim { .. } => codes::CLAIM_INVALID_RANGE,
            FlowError::UnknownShard { .. } => codes::SHARD_UNKNOWN,
            FlowError::InvalidRecord { .. } => codes::LAYOUT_INVALID_RECORD,
            FlowError::Storage { .. } => codes::LAYOUT_STORAGE,
            FlowError::InvalidConfig { .. } => codes::CONFIG_INVALID,
            FlowError::Frame(_) => codes::STREAM_FRAME_VIOLATION,
        }
    }

    /// 是否属于绑定层违约（引用不存在的预算、越界的领取区间等）。
    ///
    /// 这类错误不应重试，通常意味着绑定的状态与共享表不同步。
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            FlowError::UnknownBudget { .. }
                | FlowError::InvalidBudgetId
                | FlowError::ForeignBudget { .. }
                | FlowError::UnknownWatcher { .. }
                | FlowError::InvalidClaim { .. }
                | FlowError::UnknownShard { .. }
        )
    }

    pub(crate) fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        FlowError::Storage {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        FlowError::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// 统一的结果别名。
pub type Result<T, E = FlowError> = core::result::Result<T, E>;
