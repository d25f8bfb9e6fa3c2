//! 共享预算记录的真实线程竞争测试。
//!
//! # 教案级说明
//! - **Why**：Loom 模型只能覆盖两三个线程的小场景；生产中多个分片线程同时 credit 与 claim
//!   同一条记录，需要在真实调度下确认额度既不凭空产生也不丢失。
//! - **How**：多个 creditor 线程共享同一个 `BudgetCreditor`，多个 claimer 线程各自持有
//!   独立分片上的 `BudgetDebitor`，以 `Barrier` 同时起跑，全部结束后对账。
//! - **What**：`总追加 == 总领取 + 剩余`，任一时刻观测到的剩余额度都不为负，
//!   单次领取结果要么为 0，要么落在 `[minimum, maximum]` 之内。

use std::{
    sync::{Arc, Barrier},
    thread,
};

use spark_flow::{BudgetCreditor, BudgetDebitor, BudgetFlusher, BudgetId, BudgetTable};

const CREDITORS: usize = 4;
const CLAIMERS: usize = 4;
const ROUNDS: usize = 2_000;
const MINIMUM: i32 = 2;
const MAXIMUM: i32 = 7;

fn noop_flusher() -> Arc<dyn BudgetFlusher> {
    Arc::new(|_: u64, _: BudgetId, _: u64| {})
}

#[test]
fn concurrent_credit_and_claim_conserve_budget() {
    let table = BudgetTable::heap(4);
    let mut creditor = BudgetCreditor::new(0, table.clone(), noop_flusher());
    let budget = creditor.acquire(BudgetId::new(1)).expect("acquire");
    let creditor = Arc::new(creditor);
    let start = Arc::new(Barrier::new(CREDITORS + CLAIMERS));

    let granters: Vec<_> = (0..CREDITORS)
        .map(|worker| {
            let creditor = Arc::clone(&creditor);
            let start = Arc::clone(&start);
            let amount = worker as i64 + 1;
            thread::spawn(move || {
                start.wait();
                for round in 0..ROUNDS {
                    let previous = creditor
                        .credit(round as u64, budget, amount)
                        .expect("credit");
                    assert!(previous >= 0, "追加前的剩余额度不得为负: {previous}");
                }
                amount * ROUNDS as i64
            })
        })
        .collect();

    let claimers: Vec<_> = (1..=CLAIMERS)
        .map(|shard| {
            let mut debitor = BudgetDebitor::new(shard, 0, table.clone()).expect("debitor");
            let watcher_id = shard as u64;
            let index = debitor
                .acquire(BudgetId::new(1), watcher_id, |_| {})
                .expect("attach");
            let creditor = Arc::clone(&creditor);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut claimed = 0_i64;
                for _ in 0..ROUNDS {
                    let granted = debitor
                        .claim(index, watcher_id, MINIMUM, MAXIMUM)
                        .expect("claim");
                    assert!(
                        granted == 0 || (MINIMUM..=MAXIMUM).contains(&granted),
                        "领取结果越界: {granted}"
                    );
                    claimed += i64::from(granted);
                    assert!(creditor.available(budget) >= 0, "剩余额度出现负值");
                    thread::yield_now();
                }
                claimed
            })
        })
        .collect();

    let credited: i64 = granters
        .into_iter()
        .map(|handle| handle.join().expect("creditor 线程必须平稳退出"))
        .sum();
    let claimed: i64 = claimers
        .into_iter()
        .map(|handle| handle.join().expect("claimer 线程必须平稳退出"))
        .sum();

    let remaining = creditor.available(budget);
    assert!(remaining >= 0);
    assert_eq!(
        credited,
        claimed + remaining,
        "额度守恒：credited={credited} claimed={claimed} remaining={remaining}"
    );
}

#[test]
fn concurrent_claims_never_overdraw_a_fixed_grant() {
    const GRANT: i64 = 1_000;

    let table = BudgetTable::heap(4);
    let mut creditor = BudgetCreditor::new(0, table.clone(), noop_flusher());
    let budget = creditor.acquire(BudgetId::new(1)).expect("acquire");
    creditor.credit(0, budget, GRANT).expect("seed");
    let start = Arc::new(Barrier::new(CLAIMERS));

    let claimers: Vec<_> = (1..=CLAIMERS)
        .map(|shard| {
            let mut debitor = BudgetDebitor::new(shard, 0, table.clone()).expect("debitor");
            let watcher_id = shard as u64;
            let index = debitor
                .acquire(BudgetId::new(1), watcher_id, |_| {})
                .expect("attach");
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                let mut claimed = 0_i64;
                loop {
                    let granted = debitor
                        .claim(index, watcher_id, 1, MAXIMUM)
                        .expect("claim");
                    if granted == 0 {
                        break claimed;
                    }
                    claimed += i64::from(granted);
                }
            })
        })
        .collect();

    let claimed: i64 = claimers
        .into_iter()
        .map(|handle| handle.join().expect("claimer 线程必须平稳退出"))
        .sum();
    assert_eq!(claimed, GRANT, "固定额度必须被恰好领完");
    assert_eq!(creditor.available(budget), 0);
}
