//! 帧的类型化视图。
//!
//! 编解码器（外部协作者）把二进制帧解码为这里的结构体；本 crate 只读取与生命周期、
//! 窗口和预算相关的字段，负载本身以长度表示。

use core::fmt;

use crate::budget::BudgetId;

/// 所有帧共有的头部字段。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameHeader {
    pub stream_id: u64,
    pub sequence: i64,
    pub acknowledge: i64,
    pub maximum: i32,
    pub trace_id: u64,
}

impl FrameHeader {
    pub const fn new(stream_id: u64, sequence: i64, acknowledge: i64, maximum: i32) -> Self {
        Self {
            stream_id,
            sequence,
            acknowledge,
            maximum,
            trace_id: 0,
        }
    }

    #[must_use]
    pub const fn traced(mut self, trace_id: u64) -> Self {
        self.trace_id = trace_id;
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Begin {
    pub header: FrameHeader,
    pub affinity: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Data {
    pub header: FrameHeader,
    pub flags: u8,
    pub budget_id: BudgetId,
    /// 该帧占用的窗口额度（负载长度加 padding）。
    pub reserved: i32,
    pub length: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct End {
    pub header: FrameHeader,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Abort {
    pub header: FrameHeader,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Flush {
    pub header: FrameHeader,
    pub budget_id: BudgetId,
    pub reserved: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reset {
    pub header: FrameHeader,
}

/// 反向的窗口帧：推进确认位置、通告最大在途量与预算。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub header: FrameHeader,
    pub budget_id: BudgetId,
    pub padding: i32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signal {
    pub header: FrameHeader,
    pub signal_id: i32,
}

/// 帧种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Begin,
    Data,
    End,
    Abort,
    Flush,
    Reset,
    Window,
    Signal,
}

impl FrameKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Begin => "begin",
            FrameKind::Data => "data",
            FrameKind::End => "end",
            FrameKind::Abort => "abort",
            FrameKind::Flush => "flush",
            FrameKind::Reset => "reset",
            FrameKind::Window => "window",
            FrameKind::Signal => "signal",
        }
    }

    /// 逆流方向的节流帧（Window、Reset）作用于对端发出的那一半流。
    pub const fn is_throttle(&self) -> bool {
        matches!(self, FrameKind::Window | FrameKind::Reset)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任意一种帧。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Begin(Begin),
    Data(Data),
    End(End),
    Abort(Abort),
    Flush(Flush),
    Reset(Reset),
    Window(Window),
    Signal(Signal),
}

impl Frame {
    pub const fn kind(&self) -> FrameKind {
        match self {
            Frame::Begin(_) => FrameKind::Begin,
            Frame::Data(_) => FrameKind::Data,
            Frame::End(_) => FrameKind::End,
            Frame::Abort(_) => FrameKind::Abort,
            Frame::Flush(_) => FrameKind::Flush,
            Frame::Reset(_) => FrameKind::Reset,
            Frame::Window(_) => FrameKind::Window,
            Frame::Signal(_) => FrameKind::Signal,
        }
    }

    pub const fn header(&self) -> &FrameHeader {
        match self {
            Frame::Begin(frame) => &frame.header,
            Frame::Data(frame) => &frame.header,
            Frame::End(frame) => &frame.header,
            Frame::Abort(frame) => &frame.header,
            Frame::Flush(frame) => &frame.header,
            Frame::Reset(frame) => &frame.header,
            Frame::Window(frame) => &frame.header,
            Frame::Signal(frame) => &frame.header,
        }
    }

    pub const fn is_throttle(&self) -> bool {
        self.kind().is_throttle()
    }

    /// 帧在窗口中占用的额度；只有 Data 与 Flush 会推进序号。
    pub const fn reserved(&self) -> i32 {
        match self {
            Frame::Data(frame) => frame.reserved,
            Frame::Flush(frame) => frame.reserved,
            _ => 0,
        }
    }
}

macro_rules! frame_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Frame {
                fn from(frame: $variant) -> Self {
                    Frame::$variant(frame)
                }
            }
        )*
    };
}

frame_from!(Begin, Data, End, Abort, Flush, Reset, Window, Signal);
