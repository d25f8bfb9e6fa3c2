use core::fmt;

const REPLY_OPENING: i32 = 0x01;
const REPLY_OPENED: i32 = 0x02;
const REPLY_CLOSING: i32 = 0x04;
const REPLY_CLOSED: i32 = 0x08;
const INITIAL_OPENING: i32 = 0x10;
const INITIAL_OPENED: i32 = 0x20;
const INITIAL_CLOSING: i32 = 0x40;
const INITIAL_CLOSED: i32 = 0x80;

const ALL_CLOSED: i32 = INITIAL_CLOSED | REPLY_CLOSED;

/// 流对的半流生命周期状态，打包在一个 `i32` 中。
///
/// # 教案式说明
/// - **意图（Why）**：所有协议绑定都要判断“这一半流能否收发某种帧”；统一的位状态避免每个绑定
///   各写一套枚举，同时每条流只占一个整数、零分配。
/// - **逻辑（How）**：低四位描述 reply 半流，高四位描述 initial 半流，依次为
///   `OPENING / OPENED / CLOSING / CLOSED`。`open_*` 同时置 `OPENING|OPENED`，
///   `close_*` 同时置 `CLOSING|CLOSED`，因此格关系 `OPENED ⟹ OPENING`、`CLOSED ⟹ CLOSING`
///   由构造保证。
/// - **契约（What）**：所有转换只会置位，从不清位；两半流都 `CLOSED` 时 [`StreamState::closed`]
///   为真，绑定据此释放预算观察者并回收资源。本类型不阻止非法转换，合法性校验由
///   [`super::StreamFlow`] 完成。
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StreamState(i32);

impl StreamState {
    /// 新流对：两半流都未开始。
    pub const fn new() -> Self {
        Self(0)
    }

    /// 从绑定持久化的整数恢复。
    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    #[must_use]
    pub const fn opening_initial(self) -> Self {
        Self(self.0 | INITIAL_OPENING)
    }

    #[must_use]
    pub const fn open_initial(self) -> Self {
        Self(self.0 | INITIAL_OPENING | INITIAL_OPENED)
    }

    #[must_use]
    pub const fn closing_initial(self) -> Self {
        Self(self.0 | INITIAL_CLOSING)
    }

    #[must_use]
    pub const fn close_initial(self) -> Self {
        Self(self.0 | INITIAL_CLOSING | INITIAL_CLOSED)
    }

    #[must_use]
    pub const fn opening_reply(self) -> Self {
        Self(self.0 | REPLY_OPENING)
    }

    #[must_use]
    pub const fn open_reply(self) -> Self {
        Self(self.0 | REPLY_OPENING | REPLY_OPENED)
    }

    #[must_use]
    pub const fn closing_reply(self) -> Self {
        Self(self.0 | REPLY_CLOSING)
    }

    #[must_use]
    pub const fn close_reply(self) -> Self {
        Self(self.0 | REPLY_CLOSING | REPLY_CLOSED)
    }

    pub const fn initial_opening(self) -> bool {
        self.0 & INITIAL_OPENING != 0
    }

    pub const fn initial_opened(self) -> bool {
        self.0 & INITIAL_OPENED != 0
    }

    pub const fn initial_closing(self) -> bool {
        self.0 & INITIAL_CLOSING != 0
    }

    pub const fn initial_closed(self) -> bool {
        self.0 & INITIAL_CLOSED != 0
    }

    pub const fn reply_opening(self) -> bool {
        self.0 & REPLY_OPENING != 0
    }

    pub const fn reply_opened(self) -> bool {
        self.0 & REPLY_OPENED != 0
    }

    pub const fn reply_closing(self) -> bool {
        self.0 & REPLY_CLOSING != 0
    }

    pub const fn reply_closed(self) -> bool {
        self.0 & REPLY_CLOSED != 0
    }

    /// 两半流均已关闭，流对可以被拆除。
    pub const fn closed(self) -> bool {
        self.0 & ALL_CLOSED == ALL_CLOSED
    }

    /// initial 半流所处阶段。
    pub const fn initial_phase(self) -> HalfPhase {
        HalfPhase::of(
            self.initial_opening(),
            self.initial_opened(),
            self.initial_closing(),
            self.initial_closed(),
        )
    }

    /// reply 半流所处阶段。
    pub const fn reply_phase(self) -> HalfPhase {
        HalfPhase::of(
            self.reply_opening(),
            self.reply_opened(),
            self.reply_closing(),
            self.reply_closed(),
        )
    }
}

impl fmt::Debug for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamState")
            .field("initial", &self.initial_phase())
            .field("reply", &self.reply_phase())
            .finish()
    }
}

/// 单个半流的最高已达阶段，用于诊断信息。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HalfPhase {
    Idle,
    Opening,
    Opened,
    Closing,
    Closed,
}

impl HalfPhase {
    const fn of(opening: bool, opened: bool, closing: bool, closed: bool) -> Self {
        if closed {
            HalfPhase::Closed
        } else if closing {
            HalfPhase::Closing
        } else if opened {
            HalfPhase::Opened
        } else if opening {
            HalfPhase::Opening
        } else {
            HalfPhase::Idle
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            HalfPhase::Idle => "idle",
            HalfPhase::Opening => "opening",
            HalfPhase::Opened => "opened",
            HalfPhase::Closing => "closing",
            HalfPhase::Closed => "closed",
        }
    }
}

impl fmt::Display for HalfPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
