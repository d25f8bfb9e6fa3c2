#![doc = r#"
# spark-flow

## 设计动机（Why）
- 代理引擎在固定数量的 worker 分片上同时承载 TCP、TLS、HTTP、Kafka 等大量多路复用流，
  分片之间不共享任何可变状态，唯一的例外是本 crate 管理的共享内存预算表。
- 信用流控（budget）允许一个 creditor 为下游连接授予发送窗口，多个跨分片的 debitor 在热路径上
  以 CAS 抢占额度，无锁且无需跨分片消息。
- 每条流的 initial/reply 两个半流都需要统一的打开/关闭握手语义，协议绑定据此判断帧是否合法。

## 核心契约（What）
- [`layout`]：固定容量、定长记录的共享区域，提供 64 位字段的原子 get/put/CAS/add；
- [`budget`]：预算表、creditor、debitor，以及跨分片 Flush 扇出与分片胶水；
- [`stream`]：打包为 `i32` 的半流状态机、帧类型视图、帧合法性校验与 reply 侧限速；
- [`config`]、[`observability`]、[`error`]：配置装载、日志目标与稳定错误码。

## 实现策略（How）
- 所有跨分片字段均为 `AtomicI64`，读取使用 Acquire、发布使用 Release、读改写使用 AcqRel；
- 等待者唤醒采用“电平触发 + 重试”协议：丢失一次唤醒只会带来延迟，不会破坏正确性；
- 在 `--cfg spark_loom` 与 `loom-model` Feature 下，原子类型切换为 Loom 实现以穷举交错。

## 风险与考量（Trade-offs）
- `watchers` 掩码宽 64 位，每位代表一个观察分片，因此单个引擎最多 64 个 worker 分片；
- 预算表只由所属分片的 creditor 分配/释放，其他分片只能查找，违反该约定将破坏发布顺序。
"#]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod budget;
pub mod config;
pub mod error;
pub mod layout;
pub mod observability;
pub mod stream;

mod sync;

pub use budget::{
    BudgetCreditor, BudgetDebitor, BudgetFlusher, BudgetId, BudgetIdSupplier, BudgetShard,
    BudgetTable, CreditorIndex, DebitorIndex, FlushFanout, FlushSignal, MAX_WORKERS,
};
pub use config::{FlowConfig, StorageKind};
pub use error::{FlowError, Result};
pub use layout::{HeapStorage, LayoutStorage, RecordLayout, SlotIndex, SlottedLayout};
pub use stream::{
    Frame, FrameKind, FrameViolation, ReplyPacer, Reservation, StreamFlow, StreamHalf,
    StreamState,
};
