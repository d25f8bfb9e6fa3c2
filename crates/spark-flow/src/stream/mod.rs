//! 流对生命周期。
//!
//! - [`StreamState`]：打包为 `i32` 的半流位状态，纯函数转换与谓词；
//! - [`frame`]：编解码器交给绑定的类型化帧视图；
//! - [`StreamFlow`]：在帧作用之前依据状态与窗口记账做合法性校验；
//! - [`ReplyPacer`]：reply 方向按窗口与预算限速。

pub mod frame;
mod flow;
mod pacer;
mod state;
mod violation;

pub use flow::{HalfWindow, StreamFlow, StreamHalf};
pub use frame::{Frame, FrameHeader, FrameKind};
pub use pacer::{ReplyPacer, Reservation};
pub use state::{HalfPhase, StreamState};
pub use violation::FrameViolation;
