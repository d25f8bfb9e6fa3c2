use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use super::{BudgetFlusher, BudgetId};
use crate::observability::targets;

/// 发往观察分片的系统 Flush 信号。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushSignal {
    pub trace_id: u64,
    pub budget_id: BudgetId,
}

/// 按观察者掩码把 Flush 信号扇出到各分片收件箱的 [`BudgetFlusher`]。
///
/// # 教案式说明
/// - **意图 (Why)**：creditor 只知道“哪些分片在等”，具体是哪些流由各分片自己的 debitor 记录；
///   扇出器把掩码中每个置位翻译为一条发往该分片的 [`FlushSignal`]。
/// - **逻辑 (How)**：逐位取最低置位（`trailing_zeros`），找到对应收件箱后 `send`；
///   `UnboundedSender::send` 不需要运行中的 Tokio 运行时，可在任意 reactor 线程上调用。
/// - **契约 (What)**：收件箱缺失或已关闭只记录 `debug` 日志并跳过；
///   等待者会在下一次 `credit` 时再次被通知，协议本身是电平触发的。
#[derive(Clone, Debug)]
pub struct FlushFanout {
    inboxes: Vec<UnboundedSender<FlushSignal>>,
}

impl FlushFanout {
    /// `inboxes[i]` 为分片 `i` 的收件箱。
    pub fn new(inboxes: Vec<UnboundedSender<FlushSignal>>) -> Self {
        Self { inboxes }
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }
}

impl BudgetFlusher for FlushFanout {
    fn flush(&self, trace_id: u64, budget_id: BudgetId, watchers: u64) {
        let signal = FlushSignal {
            trace_id,
            budget_id,
        };
        let mut pending = watchers;
        while pending != 0 {
            let shard = pending.trailing_zeros() as usize;
            pending &= pending - 1;

            match self.inboxes.get(shard) {
                Some(inbox) => {
                    if inbox.send(signal).is_err() {
                        debug!(
                            target: targets::BUDGET,
                            shard,
                            budget_id = %budget_id,
                            "flush inbox closed"
                        );
                    } else {
                        trace!(
                            target: targets::BUDGET,
                            trace_id,
                            shard,
                            budget_id = %budget_id,
                            "flush signalled"
                        );
                    }
                }
                None => debug!(
                    target: targets::BUDGET,
                    shard,
                    budget_id = %budget_id,
                    "flush targets unknown shard"
                ),
            }
        }
    }
}
