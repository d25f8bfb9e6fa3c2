use core::fmt;

use tracing::debug;

use super::{Frame, FrameHeader, FrameKind, FrameViolation, HalfPhase, StreamState, frame::Window};
use crate::{budget::BudgetId, observability::targets};

/// 流对的一个方向。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamHalf {
    /// 由对端发起、本端接收数据的方向。
    Initial,
    /// 由本端回应、本端发送数据的方向。
    Reply,
}

impl StreamHalf {
    pub const fn as_str(&self) -> &'static str {
        match self {
            StreamHalf::Initial => "initial",
            StreamHalf::Reply => "reply",
        }
    }
}

impl fmt::Display for StreamHalf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 单个半流的窗口记账。
///
/// `sequence` 由发送方推进，`acknowledge`/`maximum`/`padding`/`budget_id` 来自接收方的 Window。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HalfWindow {
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub padding: i32,
    pub budget_id: BudgetId,
}

impl HalfWindow {
    /// 通告窗口的右边界，溢出时饱和到 `i64::MAX`。
    pub fn limit(&self) -> i64 {
        self.acknowledge.saturating_add(i64::from(self.maximum))
    }

    /// 发送方还能占用的额度。
    pub fn room(&self) -> i64 {
        self.limit().saturating_sub(self.sequence).max(0)
    }
}

/// 流对的生命周期与窗口校验器。
///
/// # 教案式说明
/// - **意图（Why）**：每个协议绑定在作用于一帧之前都要回答同一个问题：这帧此刻合法吗？
///   把 [`StreamState`] 与两半流的窗口记账放在一起，绑定只需 `on_received` / `on_emitted`。
/// - **逻辑（How）**：
///   - 入站的数据流帧（Begin/Data/Flush/End/Abort）作用于 initial 半流，入站的节流帧
///     （Window/Reset）作用于 reply 半流；出站方向恰好相反；
///   - Begin 要求该半流尚未 opening；Data/Flush/End/Abort 要求 opening 且未 closed；
///   - Data/Flush 推进 `sequence`，不得越过 `acknowledge + maximum`；
///   - 首个 Window 把半流推进到 opened，之后的 Window 不得回退确认位置、不得缩小窗口、
///     不得更换预算；
///   - End/Abort/Reset 关闭对应半流。
/// - **契约（What）**：
///   - 校验失败返回 [`FrameViolation`]，状态与记账保持不变；
///   - 节流帧与对端的 End/Abort 存在天然交错，已关闭半流上的 Window/Reset 被当作无操作接受；
///   - Signal 只要流对未完全关闭即合法。
/// - **风险/设计取舍（Trade-offs）**：本类型不持有预算；reply 半流的预算领取由
///   [`super::ReplyPacer`] 基于这里的窗口记账完成。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamFlow {
    initial_id: u64,
    reply_id: u64,
    state: StreamState,
    initial: HalfWindow,
    reply: HalfWindow,
}

impl StreamFlow {
    /// 以约定的 `reply_id = initial_id ^ 1` 构造流对。
    pub fn new(initial_id: u64) -> Self {
        Self::with_ids(initial_id, initial_id ^ 1)
    }

    pub fn with_ids(initial_id: u64, reply_id: u64) -> Self {
        Self {
            initial_id,
            reply_id,
            state: StreamState::new(),
            initial: HalfWindow::default(),
            reply: HalfWindow::default(),
        }
    }

    pub fn initial_id(&self) -> u64 {
        self.initial_id
    }

    pub fn reply_id(&self) -> u64 {
        self.reply_id
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn initial(&self) -> &HalfWindow {
        &self.initial
    }

    pub fn reply(&self) -> &HalfWindow {
        &self.reply
    }

    /// 两半流均已关闭。
    pub fn is_terminal(&self) -> bool {
        self.state.closed()
    }

    /// 校验并应用一条从对端收到的帧。
    pub fn on_received(&mut self, frame: &Frame) -> Result<StreamState, FrameViolation> {
        let half = if frame.is_throttle() {
            StreamHalf::Reply
        } else {
            StreamHalf::Initial
        };
        self.apply(half, frame).inspect_err(|violation| {
            debug!(
                target: targets::STREAM,
                stream_id = frame.header().stream_id,
                trace_id = frame.header().trace_id,
                kind = frame.kind().as_str(),
                code = violation.code(),
                %violation,
                "received frame rejected"
            );
        })
    }

    /// 校验并应用一条即将发往对端的帧。
    pub fn on_emitted(&mut self, frame: &Frame) -> Result<StreamState, FrameViolation> {
        let half = if frame.is_throttle() {
            StreamHalf::Initial
        } else {
            StreamHalf::Reply
        };
        self.apply(half, frame).inspect_err(|violation| {
            debug!(
                target: targets::STREAM,
                stream_id = frame.header().stream_id,
                trace_id = frame.header().trace_id,
                kind = frame.kind().as_str(),
                code = violation.code(),
                %violation,
                "emitted frame rejected"
            );
        })
    }

    fn apply(&mut self, half: StreamHalf, frame: &Frame) -> Result<StreamState, FrameViolation> {
        if let Frame::Signal(signal) = frame {
            return self.signal(&signal.header);
        }
        self.check_stream(half, frame.header())?;

        match frame {
            Frame::Begin(begin) => self.begin(half, &begin.header),
            Frame::Data(_) | Frame::Flush(_) => self.advance(half, frame),
            Frame::End(_) | Frame::Abort(_) => self.finish(half, frame),
            Frame::Window(window) => self.window(half, window),
            Frame::Reset(_) => self.reset(half),
            Frame::Signal(_) => Ok(self.state),
        }
    }

    fn begin(
        &mut self,
        half: StreamHalf,
        header: &FrameHeader,
    ) -> Result<StreamState, FrameViolation> {
        if self.opening(half) {
            return Err(self.illegal(FrameKind::Begin, half));
        }
        if header.acknowledge > header.sequence {
            return Err(FrameViolation::AcknowledgeAhead {
                half,
                acknowledge: header.acknowledge,
                sequence: header.sequence,
            });
        }

        let window = self.window_mut(half);
        window.sequence = header.sequence;
        window.acknowledge = header.acknowledge;
        self.state = match half {
            StreamHalf::Initial => self.state.opening_initial(),
            StreamHalf::Reply => self.state.opening_reply(),
        };
        Ok(self.state)
    }

    fn advance(
        &mut self,
        half: StreamHalf,
        frame: &Frame,
    ) -> Result<StreamState, FrameViolation> {
        self.require_open(frame.kind(), half)?;
        Self::check_lengths(half, frame)?;
        let header = frame.header();
        let window = self.window_ref(half);
        Self::check_sequence(half, window, header)?;

        let limit = window.limit();
        let end = header
            .sequence
            .checked_add(i64::from(frame.reserved()))
            .filter(|end| *end <= limit)
            .ok_or(FrameViolation::WindowExceeded {
                half,
                sequence: header.sequence.saturating_add(i64::from(frame.reserved())),
                limit,
            })?;

        self.window_mut(half).sequence = end;
        Ok(self.state)
    }

    fn finish(
        &mut self,
        half: StreamHalf,
        frame: &Frame,
    ) -> Result<StreamState, FrameViolation> {
        self.require_open(frame.kind(), half)?;
        Self::check_sequence(half, self.window_ref(half), frame.header())?;

        self.window_mut(half).sequence = frame.header().sequence;
        self.state = match half {
            StreamHalf::Initial => self.state.close_initial(),
            StreamHalf::Reply => self.state.close_reply(),
        };
        Ok(self.state)
    }

    fn window(
        &mut self,
        half: StreamHalf,
        frame: &Window,
    ) -> Result<StreamState, FrameViolation> {
        if !self.opening(half) {
            return Err(self.illegal(FrameKind::Window, half));
        }
        if self.closed(half) {
            return Ok(self.state);
        }

        let header = &frame.header;
        let current = self.window_ref(half);
        if header.acknowledge > current.sequence {
            return Err(FrameViolation::AcknowledgeAhead {
                half,
                acknowledge: header.acknowledge,
                sequence: current.sequence,
            });
        }
        if header.acknowledge < current.acknowledge {
            return Err(FrameViolation::AcknowledgeRegressed {
                half,
                previous: current.acknowledge,
                acknowledge: header.acknowledge,
            });
        }
        if header.maximum < current.maximum {
            return Err(FrameViolation::WindowShrunk {
                half,
                previous: current.maximum,
                maximum: header.maximum,
            });
        }
        if !current.budget_id.is_none() && frame.budget_id != current.budget_id {
            return Err(FrameViolation::BudgetChanged {
                half,
                previous: current.budget_id,
                budget_id: frame.budget_id,
            });
        }

        let window = self.window_mut(half);
        window.acknowledge = header.acknowledge;
        window.maximum = header.maximum;
        window.padding = frame.padding;
        window.budget_id = frame.budget_id;
        if !self.opened(half) {
            self.state = match half {
                StreamHalf::Initial => self.state.open_initial(),
                StreamHalf::Reply => self.state.open_reply(),
            };
        }
        Ok(self.state)
    }

    fn reset(&mut self, half: StreamHalf) -> Result<StreamState, FrameViolation> {
        if !self.opening(half) {
            return Err(self.illegal(FrameKind::Reset, half));
        }
        self.state = match half {
            StreamHalf::Initial => self.state.close_initial(),
            StreamHalf::Reply => self.state.close_reply(),
        };
        Ok(self.state)
    }

    fn signal(&self, header: &FrameHeader) -> Result<StreamState, FrameViolation> {
        if header.stream_id != self.initial_id && header.stream_id != self.reply_id {
            return Err(FrameViolation::StreamMismatch {
                expected: self.initial_id,
                actual: header.stream_id,
            });
        }
        if self.state.closed() {
            return Err(FrameViolation::StreamClosed {
                stream_id: header.stream_id,
            });
        }
        Ok(self.state)
    }

    fn check_stream(&self, half: StreamHalf, header: &FrameHeader) -> Result<(), FrameViolation> {
        let expected = match half {
            StreamHalf::Initial => self.initial_id,
            StreamHalf::Reply => self.reply_id,
        };
        if header.stream_id == expected {
            Ok(())
        } else {
            Err(FrameViolation::StreamMismatch {
                expected,
                actual: header.stream_id,
            })
        }
    }

    fn check_sequence(
        half: StreamHalf,
        window: &HalfWindow,
        header: &FrameHeader,
    ) -> Result<(), FrameViolation> {
        if header.sequence < window.sequence {
            return Err(FrameViolation::SequenceRegressed {
                half,
                previous: window.sequence,
                sequence: header.sequence,
            });
        }
        if header.acknowledge > header.sequence {
            return Err(FrameViolation::AcknowledgeAhead {
                half,
                acknowledge: header.acknowledge,
                sequence: header.sequence,
            });
        }
        Ok(())
    }

    /// 占用量非负；Data 的载荷长度位于 `[0, reserved]`。
    fn check_lengths(half: StreamHalf, frame: &Frame) -> Result<(), FrameViolation> {
        let (reserved, length) = match frame {
            Frame::Data(data) => (data.reserved, data.length),
            _ => (frame.reserved(), 0),
        };
        if reserved < 0 || length < 0 || length > reserved {
            return Err(FrameViolation::InvalidLength {
                kind: frame.kind(),
                half,
                reserved,
                length,
            });
        }
        Ok(())
    }

    fn require_open(&self, kind: FrameKind, half: StreamHalf) -> Result<(), FrameViolation> {
        if self.opening(half) && !self.closed(half) {
            Ok(())
        } else {
            Err(self.illegal(kind, half))
        }
    }

    fn illegal(&self, kind: FrameKind, half: StreamHalf) -> FrameViolation {
        FrameViolation::IllegalFrame {
            kind,
            half,
            phase: self.phase(half),
        }
    }

    fn phase(&self, half: StreamHalf) -> HalfPhase {
        match half {
            StreamHalf::Initial => self.state.initial_phase(),
            StreamHalf::Reply => self.state.reply_phase(),
        }
    }

    fn opening(&self, half: StreamHalf) -> bool {
        match half {
            StreamHalf::Initial => self.state.initial_opening(),
            StreamHalf::Reply => self.state.reply_opening(),
        }
    }

    fn opened(&self, half: StreamHalf) -> bool {
        match half {
            StreamHalf::Initial => self.state.initial_opened(),
            StreamHalf::Reply => self.state.reply_opened(),
        }
    }

    fn closed(&self, half: StreamHalf) -> bool {
        match half {
            StreamHalf::Initial => self.state.initial_closed(),
            StreamHalf::Reply => self.state.reply_closed(),
        }
    }

    fn window_ref(&self, half: StreamHalf) -> &HalfWindow {
        match half {
            StreamHalf::Initial => &self.initial,
            StreamHalf::Reply => &self.reply,
        }
    }

    fn window_mut(&mut self, half: StreamHalf) -> &mut HalfWindow {
        match half {
            StreamHalf::Initial => &mut self.initial,
            StreamHalf::Reply => &mut self.reply,
        }
    }
}
