use tracing::trace;

use super::{FrameKind, FrameViolation, StreamFlow, StreamHalf};
use crate::{
    budget::{BudgetDebitor, DebitorIndex},
    config::FlowConfig,
    error::{FlowError, Result},
    observability::targets,
};

/// 一次限速决策：`reserved` 为写入 Data 帧的窗口占用，`length` 为可发送的负载字节数。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Reservation {
    pub reserved: i32,
    pub length: i32,
}

impl Reservation {
    /// 无可用额度，或调用方没有负载要发送。
    pub const IDLE: Reservation = Reservation {
        reserved: 0,
        length: 0,
    };

    /// 非空闲的预留总是携带至少一个负载字节。
    pub fn is_idle(&self) -> bool {
        self.length == 0
    }
}

/// reply 半流的发送限速器。
///
/// # 教案式说明
/// - **意图（Why）**：绑定写出 reply 数据时要同时满足两道闸门：对端为本流通告的窗口，
///   以及窗口所携带预算（通常代表底层连接的共享发送窗口）的剩余额度。
/// - **逻辑（How）**：
///   1. `length == 0` 直接返回空闲，不触碰预算；
///   2. `reserved = min(窗口剩余, length + padding)`；若不足以覆盖 padding 则空闲；
///   3. 若 reply 窗口绑定了预算，则以 `minimum = min(reserved, max(min_claim, padding + 1))`
///      向 debitor 领取，领取结果即本次可用的 `reserved`；
///   4. 领取为 0 时 debitor 已登记观察者，调用方停止写出，等待 flusher 回调后重试。
/// - **契约（What）**：
///   - 收到首个带预算的 reply Window 后调用 [`ReplyPacer::on_window`] 附着 debitor；
///   - 流对进入终态（或 reply 半流关闭）后调用 [`ReplyPacer::detach`]，确保过期回调不会再触发；
///   - 领取到的额度一定覆盖 padding，不会出现“扣了预算却发不出负载”的情况。
#[derive(Debug)]
pub struct ReplyPacer {
    watcher_id: u64,
    min_claim: i32,
    attached: Option<DebitorIndex>,
}

impl ReplyPacer {
    pub fn new(watcher_id: u64, min_claim: i32) -> Self {
        Self {
            watcher_id,
            min_claim: min_claim.max(1),
            attached: None,
        }
    }

    /// 以 [`FlowConfig::min_claim`] 作为领取下限。
    pub fn from_config(watcher_id: u64, config: &FlowConfig) -> Self {
        Self::new(watcher_id, config.min_claim)
    }

    pub fn min_claim(&self) -> i32 {
        self.min_claim
    }

    pub fn watcher_id(&self) -> u64 {
        self.watcher_id
    }

    pub fn attached(&self) -> Option<DebitorIndex> {
        self.attached
    }

    /// 收到 reply Window 之后调用：窗口首次携带预算时附着 debitor。
    pub fn on_window<F>(
        &mut self,
        flow: &StreamFlow,
        debitor: &mut BudgetDebitor,
        flusher: F,
    ) -> Result<Option<DebitorIndex>>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let budget_id = flow.reply().budget_id;
        if self.attached.is_none() && !budget_id.is_none() {
            self.attached = Some(debitor.acquire(budget_id, self.watcher_id, flusher)?);
        }
        Ok(self.attached)
    }

    /// 为最多 `length` 字节的负载预留额度。
    pub fn reserve(
        &mut self,
        trace_id: u64,
        flow: &StreamFlow,
        debitor: Option<&mut BudgetDebitor>,
        length: i32,
    ) -> Result<Reservation> {
        let state = flow.state();
        if !state.reply_opening() || state.reply_closed() {
            return Err(FlowError::Frame(FrameViolation::IllegalFrame {
                kind: FrameKind::Data,
                half: StreamHalf::Reply,
                phase: state.reply_phase(),
            }));
        }

        let window = flow.reply();
        let length = length.max(0);
        if length == 0 {
            return Ok(Reservation::IDLE);
        }
        let padding = window.padding.max(0);
        let wanted = i64::from(length) + i64::from(padding);
        let reserved = wanted.min(window.room()).min(i64::from(i32::MAX)) as i32;
        if reserved <= padding {
            return Ok(Reservation::IDLE);
        }

        let reserved = match self.attached {
            Some(index) => {
                let debitor = debitor.ok_or(FlowError::UnknownBudget {
                    budget_id: index.budget_id(),
                })?;
                let minimum = reserved.min(self.min_claim.max(padding + 1));
                debitor.claim_traced(trace_id, index, self.watcher_id, minimum, reserved)?
            }
            None => reserved,
        };

        let payload = (reserved - padding).clamp(0, length);
        trace!(
            target: targets::STREAM,
            trace_id,
            stream_id = flow.reply_id(),
            length,
            reserved,
            payload,
            "reply reserved"
        );
        Ok(Reservation {
            reserved,
            length: payload,
        })
    }

    /// 从 debitor 注销本流，返回是否确实注销。
    pub fn detach(&mut self, debitor: &mut BudgetDebitor) -> bool {
        match self.attached.take() {
            Some(index) => debitor.release(index, self.watcher_id),
            None => false,
        }
    }
}
