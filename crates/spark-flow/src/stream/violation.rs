use thiserror::Error;

use super::{FrameKind, HalfPhase, StreamHalf};
use crate::budget::BudgetId;

/// 帧违反半流状态或窗口约束。
///
/// # 教案式说明
/// - **意图 (Why)**：绑定在作用于一帧之前先交给 [`super::StreamFlow`] 校验，违约时拿到结构化原因，
///   据此决定向对端发送 Reset（入站违约）或 Abort（自身逻辑错误）。
/// - **契约 (What)**：校验失败时流状态与窗口记账都保持不变；每个变体携带足够定位问题的上下文。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameViolation {
    /// 帧与半流当前阶段不兼容，例如在 `CLOSED` 半流上收到 Data。
    #[error("{kind} frame is not permitted while the {half} half is {phase}")]
    IllegalFrame {
        kind: FrameKind,
        half: StreamHalf,
        phase: HalfPhase,
    },

    /// 帧属于另一条流。
    #[error("frame for stream {actual} delivered to stream {expected}")]
    StreamMismatch { expected: u64, actual: u64 },

    /// 序号回退。
    #[error("{half} sequence moved backwards from {previous} to {sequence}")]
    SequenceRegressed {
        half: StreamHalf,
        previous: i64,
        sequence: i64,
    },

    /// 确认位置超过已发送序号。
    #[error("{half} acknowledge {acknowledge} is ahead of sequence {sequence}")]
    AcknowledgeAhead {
        half: StreamHalf,
        acknowledge: i64,
        sequence: i64,
    },

    /// 确认位置回退。
    #[error("{half} acknowledge moved backwards from {previous} to {acknowledge}")]
    AcknowledgeRegressed {
        half: StreamHalf,
        previous: i64,
        acknowledge: i64,
    },

    /// 通告窗口缩小。
    #[error("{half} window shrank from {previous} to {maximum}")]
    WindowShrunk {
        half: StreamHalf,
        previous: i32,
        maximum: i32,
    },

    /// 帧声明的占用量或载荷长度为负，或载荷长度超过占用量。
    #[error("{half} {kind} frame declares reserved {reserved} with length {length}")]
    InvalidLength {
        kind: FrameKind,
        half: StreamHalf,
        reserved: i32,
        length: i32,
    },

    /// 在途数据超过通告窗口。
    #[error("{half} data up to {sequence} exceeds the advertised window ending at {limit}")]
    WindowExceeded {
        half: StreamHalf,
        sequence: i64,
        limit: i64,
    },

    /// 半流已绑定预算后，Window 试图更换为另一个预算。
    #[error("{half} budget changed from {previous} to {budget_id}")]
    BudgetChanged {
        half: StreamHalf,
        previous: BudgetId,
        budget_id: BudgetId,
    },

    /// 流对已完全关闭。
    #[error("stream {stream_id} is closed")]
    StreamClosed { stream_id: u64 },
}

impl FrameViolation {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            FrameViolation::IllegalFrame { .. } => "flow.stream.illegal_frame",
            FrameViolation::StreamMismatch { .. } => "flow.stream.mismatch",
            FrameViolation::SequenceRegressed { .. } => "flow.stream.sequence_regressed",
            FrameViolation::AcknowledgeAhead { .. } => "flow.stream.acknowledge_ahead",
            FrameViolation::AcknowledgeRegressed { .. } => "flow.stream.acknowledge_regressed",
            FrameViolation::WindowShrunk { .. } => "flow.stream.window_shrunk",
            FrameViolation::InvalidLength { .. } => "flow.stream.invalid_length",
            FrameViolation::WindowExceeded { .. } => "flow.stream.window_exceeded",
            FrameViolation::BudgetChanged { .. } => "flow.stream.budget_changed",
            FrameViolation::StreamClosed { .. } => "flow.stream.closed",
        }
    }
}
