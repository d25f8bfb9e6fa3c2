//! StreamFlow 帧合法性测试：一条完整的请求/响应流对，以及各类违约。

use spark_flow::{
    BudgetId, Frame, FrameViolation, StreamFlow, StreamHalf,
    stream::{
        HalfPhase,
        frame::{Abort, Begin, Data, End, Flush, FrameHeader, Reset, Window},
    },
};

const INITIAL: u64 = 7;
const REPLY: u64 = 6;

fn header(stream_id: u64, sequence: i64, acknowledge: i64, maximum: i32) -> FrameHeader {
    FrameHeader::new(stream_id, sequence, acknowledge, maximum)
}

fn begin(stream_id: u64) -> Frame {
    Frame::from(Begin {
        header: header(stream_id, 0, 0, 0),
        affinity: 0,
    })
}

fn data(stream_id: u64, sequence: i64, reserved: i32) -> Frame {
    Frame::from(Data {
        header: header(stream_id, sequence, 0, 0),
        flags: 0x03,
        budget_id: BudgetId::NONE,
        reserved,
        length: reserved,
    })
}

fn window(stream_id: u64, acknowledge: i64, maximum: i32, budget_id: BudgetId) -> Frame {
    Frame::from(Window {
        header: header(stream_id, 0, acknowledge, maximum),
        budget_id,
        padding: 0,
    })
}

fn end(stream_id: u64, sequence: i64) -> Frame {
    Frame::from(End {
        header: header(stream_id, sequence, 0, 0),
    })
}

#[test]
fn request_response_lifecycle_reaches_terminal_state() {
    let mut flow = StreamFlow::new(INITIAL);
    assert_eq!(flow.reply_id(), REPLY);

    let state = flow.on_received(&begin(INITIAL)).expect("begin");
    assert!(state.initial_opening() && !state.initial_opened());

    let state = flow
        .on_emitted(&window(INITIAL, 0, 1024, BudgetId::NONE))
        .expect("advertise window");
    assert!(state.initial_opened());

    flow.on_received(&data(INITIAL, 0, 512)).expect("data");
    assert_eq!(flow.initial().sequence, 512);
    flow.on_received(&end(INITIAL, 512)).expect("end");
    assert!(flow.state().initial_closed());

    flow.on_emitted(&begin(REPLY)).expect("reply begin");
    let state = flow
        .on_received(&window(REPLY, 0, 4096, BudgetId::new(3)))
        .expect("reply window");
    assert!(state.reply_opened());
    assert_eq!(flow.reply().budget_id, BudgetId::new(3));

    flow.on_emitted(&data(REPLY, 0, 100)).expect("reply data");
    let state = flow.on_emitted(&end(REPLY, 100)).expect("reply end");
    assert!(state.closed());
    assert!(flow.is_terminal());
}

#[test]
fn duplicate_begin_is_illegal() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    assert_eq!(
        flow.on_received(&begin(INITIAL)),
        Err(FrameViolation::IllegalFrame {
            kind: spark_flow::FrameKind::Begin,
            half: StreamHalf::Initial,
            phase: HalfPhase::Opening,
        })
    );
}

#[test]
fn data_after_end_is_illegal() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&window(INITIAL, 0, 64, BudgetId::NONE))
        .expect("window");
    flow.on_received(&end(INITIAL, 0)).expect("end");

    let violation = flow
        .on_received(&data(INITIAL, 0, 8))
        .expect_err("已关闭半流不得再接收数据");
    assert_eq!(violation.code(), "flow.stream.illegal_frame");
}

#[test]
fn data_beyond_advertised_window_is_rejected() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&window(INITIAL, 0, 100, BudgetId::NONE)).expect("window");

    flow.on_received(&data(INITIAL, 0, 60)).expect("within window");
    assert_eq!(
        flow.on_received(&data(INITIAL, 60, 60)),
        Err(FrameViolation::WindowExceeded {
            half: StreamHalf::Initial,
            sequence: 120,
            limit: 100,
        })
    );
    assert_eq!(flow.initial().sequence, 60, "拒绝的帧不得推进序号");
}

#[test]
fn sequence_must_not_regress() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&window(INITIAL, 0, 100, BudgetId::NONE)).expect("window");
    flow.on_received(&data(INITIAL, 0, 40)).expect("data");

    assert!(matches!(
        flow.on_received(&data(INITIAL, 10, 10)),
        Err(FrameViolation::SequenceRegressed {
            previous: 40,
            sequence: 10,
            ..
        })
    ));
}

#[test]
fn window_may_not_shrink_or_regress() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&window(INITIAL, 0, 100, BudgetId::NONE)).expect("window");
    flow.on_received(&data(INITIAL, 0, 50)).expect("data");
    flow.on_emitted(&window(INITIAL, 50, 100, BudgetId::NONE))
        .expect("acknowledge");

    assert!(matches!(
        flow.on_emitted(&window(INITIAL, 50, 80, BudgetId::NONE)),
        Err(FrameViolation::WindowShrunk { .. })
    ));
    assert!(matches!(
        flow.on_emitted(&window(INITIAL, 20, 100, BudgetId::NONE)),
        Err(FrameViolation::AcknowledgeRegressed { .. })
    ));
    assert!(matches!(
        flow.on_emitted(&window(INITIAL, 60, 100, BudgetId::NONE)),
        Err(FrameViolation::AcknowledgeAhead { .. })
    ));
}

#[test]
fn reply_budget_is_fixed_once_advertised() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_emitted(&begin(REPLY)).expect("reply begin");
    flow.on_received(&window(REPLY, 0, 100, BudgetId::new(1)))
        .expect("window");
    assert!(matches!(
        flow.on_received(&window(REPLY, 0, 100, BudgetId::new(2))),
        Err(FrameViolation::BudgetChanged { .. })
    ));
}

#[test]
fn window_before_begin_is_illegal() {
    let mut flow = StreamFlow::new(INITIAL);
    assert!(matches!(
        flow.on_received(&window(REPLY, 0, 100, BudgetId::NONE)),
        Err(FrameViolation::IllegalFrame {
            half: StreamHalf::Reply,
            phase: HalfPhase::Idle,
            ..
        })
    ));
}

#[test]
fn abort_and_reset_close_their_halves() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&begin(REPLY)).expect("reply begin");

    let state = flow
        .on_emitted(&Frame::from(Reset {
            header: header(INITIAL, 0, 0, 0),
        }))
        .expect("reset initial");
    assert!(state.initial_closed());

    let state = flow
        .on_emitted(&Frame::from(Abort {
            header: header(REPLY, 0, 0, 0),
        }))
        .expect("abort reply");
    assert!(state.reply_closed());
    assert!(state.closed());
}

#[test]
fn flush_consumes_window_like_data() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_emitted(&begin(REPLY)).expect("reply begin");
    flow.on_received(&window(REPLY, 0, 10, BudgetId::NONE))
        .expect("window");

    let flush = Frame::from(Flush {
        header: header(REPLY, 0, 0, 0),
        budget_id: BudgetId::NONE,
        reserved: 4,
    });
    flow.on_emitted(&flush).expect("flush");
    assert_eq!(flow.reply().sequence, 4);
    assert_eq!(flow.reply().room(), 6);
}

#[test]
fn negative_or_inconsistent_lengths_are_rejected() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&window(INITIAL, 0, 100, BudgetId::NONE)).expect("window");
    flow.on_received(&data(INITIAL, 0, 50)).expect("data");

    // 负占用量会把序号拉回窗口内，继而可以越过已通告的窗口。
    let rewind = Frame::from(Data {
        header: header(INITIAL, 50, 0, 0),
        flags: 0x02,
        budget_id: BudgetId::NONE,
        reserved: -80,
        length: 0,
    });
    let before = flow.clone();
    let err = flow.on_received(&rewind).expect_err("负占用量必须拒绝");
    assert_eq!(err.code(), "flow.stream.invalid_length");
    assert_eq!(flow, before);
    assert_eq!(flow.initial().sequence, 50);

    let oversized = Frame::from(Data {
        header: header(INITIAL, 50, 0, 0),
        flags: 0x02,
        budget_id: BudgetId::NONE,
        reserved: 10,
        length: 11,
    });
    assert!(matches!(
        flow.on_received(&oversized),
        Err(FrameViolation::InvalidLength {
            reserved: 10,
            length: 11,
            ..
        })
    ));

    let negative = Frame::from(Data {
        header: header(INITIAL, 50, 0, 0),
        flags: 0x02,
        budget_id: BudgetId::NONE,
        reserved: 10,
        length: -1,
    });
    assert!(matches!(
        flow.on_received(&negative),
        Err(FrameViolation::InvalidLength { length: -1, .. })
    ));

    let flush = Frame::from(Flush {
        header: header(INITIAL, 50, 0, 0),
        budget_id: BudgetId::NONE,
        reserved: -1,
    });
    assert!(matches!(
        flow.on_received(&flush),
        Err(FrameViolation::InvalidLength { reserved: -1, .. })
    ));

    flow.on_received(&data(INITIAL, 50, 50)).expect("窗口恰好用尽");
    assert_eq!(flow.initial().sequence, 100);
}

#[test]
fn sequence_overflow_is_a_window_violation() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&begin(INITIAL)).expect("begin");
    flow.on_emitted(&window(INITIAL, 0, 100, BudgetId::NONE)).expect("window");

    let before = flow.clone();
    let err = flow
        .on_received(&data(INITIAL, i64::MAX, 1))
        .expect_err("序号加占用量溢出必须拒绝");
    assert_eq!(err.code(), "flow.stream.window_exceeded");
    assert_eq!(flow, before);
}

#[test]
fn windows_near_the_sequence_ceiling_saturate() {
    let mut flow = StreamFlow::new(INITIAL);
    flow.on_received(&Frame::from(Begin {
        header: header(INITIAL, i64::MAX - 1, i64::MAX - 1, 0),
        affinity: 0,
    }))
    .expect("begin near ceiling");
    flow.on_emitted(&window(INITIAL, i64::MAX - 1, 100, BudgetId::NONE)).expect("window");
    assert_eq!(flow.initial().limit(), i64::MAX);
    assert_eq!(flow.initial().room(), 1);

    flow.on_received(&data(INITIAL, i64::MAX - 1, 1)).expect("最后一个字节仍可占用");
    assert_eq!(flow.initial().room(), 0);
    assert!(matches!(
        flow.on_received(&data(INITIAL, i64::MAX, 1)),
        Err(FrameViolation::WindowExceeded { limit: i64::MAX, .. })
    ));
}
