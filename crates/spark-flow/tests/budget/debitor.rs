//! BudgetDebitor 领取与唤醒测试。
//!
//! # 教案级说明
//! - **Why**：`claim` 的四种区间（盈余、恰好、部分、不足）决定了背压是否正确传导；
//!   `flush` 的幂等性决定了唤醒不会被重复投递。
//! - **How**：creditor 与 debitor 共享同一张堆表，debitor 位于分片 1（观察位 `1 << 1`），
//!   以原子计数器记录每个观察者回调的触发次数与 trace。
//! - **What**：覆盖典型场景以及释放后的失效语义。

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use spark_flow::{
    BudgetCreditor, BudgetDebitor, BudgetFlusher, BudgetId, BudgetTable, DebitorIndex, FlowError,
};

struct Fixture {
    creditor: BudgetCreditor,
    debitor: BudgetDebitor,
}

fn fixture() -> Fixture {
    let table = BudgetTable::heap(8);
    let flusher: Arc<dyn BudgetFlusher> = Arc::new(|_: u64, _: BudgetId, _: u64| {});
    Fixture {
        creditor: BudgetCreditor::new(0, table.clone(), flusher),
        debitor: BudgetDebitor::new(1, 0, table).expect("debitor"),
    }
}

fn seeded(remaining: i64) -> (Fixture, DebitorIndex, Arc<Mutex<Vec<u64>>>) {
    let mut fixture = fixture();
    let index = fixture
        .creditor
        .acquire(BudgetId::new(1))
        .expect("creditor acquire");
    fixture.creditor.credit(0, index, remaining).expect("seed");

    let traces = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&traces);
    let debitor_index = fixture
        .debitor
        .acquire(BudgetId::new(1), 2, move |trace_id| {
            sink.lock().expect("traces").push(trace_id);
        })
        .expect("debitor acquire");
    (fixture, debitor_index, traces)
}

#[test]
fn partial_claim_registers_watcher_and_flush_wakes_once() {
    let (mut fixture, index, traces) = seeded(256);

    let claimed = fixture.debitor.claim(index, 2, 256, 1024).expect("claim");
    assert_eq!(claimed, 256);
    assert_eq!(fixture.debitor.available(index), 0);
    assert_eq!(fixture.debitor.watchers(index), 1 << 1);
    assert_eq!(fixture.debitor.budget_id(index), BudgetId::new(1));

    assert_eq!(fixture.debitor.flush(3, BudgetId::new(1)), 1);
    assert_eq!(traces.lock().expect("traces").as_slice(), &[3]);
    assert_eq!(fixture.debitor.watchers(index), 0, "flush 后观察位应被清除");

    assert_eq!(fixture.debitor.flush(4, BudgetId::new(1)), 0, "第二次 flush 不应再回调");
    assert_eq!(traces.lock().expect("traces").len(), 1);
}

#[test]
fn insufficient_claim_takes_nothing_but_still_watches() {
    let (mut fixture, index, traces) = seeded(256);

    let claimed = fixture.debitor.claim(index, 2, 512, 1024).expect("claim");
    assert_eq!(claimed, 0);
    assert_eq!(fixture.debitor.available(index), 256, "不足时额度不变");
    assert_eq!(fixture.debitor.watchers(index), 1 << 1);

    assert_eq!(fixture.debitor.flush(3, BudgetId::new(1)), 1);
    assert_eq!(traces.lock().expect("traces").as_slice(), &[3]);

    // 被唤醒后重新领取，仍然不足，再次登记。
    assert_eq!(fixture.debitor.claim(index, 2, 512, 1024).expect("retry"), 0);
    assert_eq!(fixture.debitor.watchers(index), 1 << 1);
}

#[test]
fn surplus_and_exact_claims_do_not_watch() {
    let (mut fixture, index, _) = seeded(2048);

    assert_eq!(fixture.debitor.claim(index, 2, 1, 1024).expect("surplus"), 1024);
    assert_eq!(fixture.debitor.watchers(index), 0);
    assert_eq!(fixture.debitor.available(index), 1024);

    assert_eq!(fixture.debitor.claim(index, 2, 1024, 1024).expect("exact"), 1024);
    assert_eq!(fixture.debitor.watchers(index), 0);
    assert_eq!(fixture.debitor.available(index), 0);
}

#[test]
fn satisfied_claim_clears_previous_registration() {
    let (mut fixture, index, traces) = seeded(10);
    assert_eq!(fixture.debitor.claim(index, 2, 100, 100).expect("claim"), 0);
    assert_eq!(fixture.debitor.watchers(index), 1 << 1);

    let budget = fixture
        .creditor
        .acquire(BudgetId::new(1))
        .expect("re-acquire");
    fixture.creditor.credit(0, budget, 200).expect("credit");
    assert_eq!(fixture.debitor.claim(index, 2, 100, 100).expect("claim"), 100);
    assert_eq!(fixture.debitor.watchers(index), 0, "完全满足后应注销观察位");
    assert_eq!(fixture.debitor.flush(9, BudgetId::new(1)), 0);
    assert!(traces.lock().expect("traces").is_empty());
}

#[test]
fn credit_wakes_watching_shard_through_flusher() {
    let table = BudgetTable::heap(4);
    let masks = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&masks);
    let flusher: Arc<dyn BudgetFlusher> =
        Arc::new(move |_: u64, budget_id: BudgetId, watchers: u64| {
            sink.lock().expect("masks").push((budget_id, watchers));
        });
    let mut creditor = BudgetCreditor::new(0, table.clone(), flusher);
    let mut debitor = BudgetDebitor::new(3, 0, table).expect("debitor");

    let budget = creditor.acquire(BudgetId::new(1)).expect("acquire");
    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wakes);
    let index = debitor
        .acquire(BudgetId::new(1), 40, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .expect("debitor acquire");

    assert_eq!(debitor.claim(index, 40, 1, 64).expect("claim"), 0);
    creditor.credit(8, budget, 64).expect("credit");
    assert_eq!(
        masks.lock().expect("masks").as_slice(),
        &[(BudgetId::new(1), 1 << 3)]
    );

    // flusher 的实现负责把信号送达分片 3，这里直接驱动其 debitor。
    assert_eq!(debitor.flush(8, BudgetId::new(1)), 1);
    assert_eq!(wakes.load(Ordering::SeqCst), 1);
    assert_eq!(debitor.claim(index, 40, 1, 64).expect("retry"), 64);
}

#[test]
fn unknown_budget_cannot_be_acquired() {
    let mut fixture = fixture();
    let err = fixture
        .debitor
        .acquire(BudgetId::new(77), 1, |_| {})
        .expect_err("预算不存在");
    assert!(matches!(err, FlowError::UnknownBudget { .. }));
    assert_eq!(fixture.debitor.acquired(), 0);
}

#[test]
fn released_budget_fails_subsequent_claims() {
    let (mut fixture, index, _) = seeded(100);
    let budget = fixture
        .creditor
        .acquire(BudgetId::new(1))
        .expect("re-acquire");
    fixture.creditor.release(budget).expect("release");

    let err = fixture
        .debitor
        .claim(index, 2, 1, 10)
        .expect_err("creditor 释放后领取必须失败");
    assert!(matches!(err, FlowError::UnknownBudget { .. }));
}

#[test]
fn release_prevents_stale_callbacks() {
    let (mut fixture, index, traces) = seeded(0);
    assert_eq!(fixture.debitor.claim(index, 2, 1, 8).expect("claim"), 0);
    assert!(fixture.debitor.release(index, 2));
    assert_eq!(fixture.debitor.watchers(index), 0);
    assert_eq!(fixture.debitor.available(index), 0, "release 不影响额度");
    assert_eq!(fixture.debitor.flush(1, BudgetId::new(1)), 0);
    assert!(traces.lock().expect("traces").is_empty());
}
