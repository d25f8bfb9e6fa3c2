use core::fmt;

/// 预算标识。
///
/// # 教案式说明
/// - **意图 (Why)**：debitor 只拿到一个 `u64` 就要定位到正确分片的预算表，因此标识的最高字节
///   编码“所属分片”（owner index），其余 56 位为分片内序号。
/// - **契约 (What)**：
///   - `0` 保留为 [`BudgetId::NONE`]，表示流不受预算约束；
///   - [`BudgetId::owner_index`] 恒等于创建它的 creditor 所在分片；
///   - 标识在预算生命周期内稳定，释放后可被复用。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BudgetId(u64);

impl BudgetId {
    /// 保留的“无预算”标识。
    pub const NONE: BudgetId = BudgetId(0);
    /// 所属分片编码在最高字节。
    pub const OWNER_SHIFT: u32 = 56;
    /// 分片内序号的掩码。
    pub const SEQUENCE_MASK: u64 = (1 << Self::OWNER_SHIFT) - 1;

    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 组合所属分片与分片内序号。
    pub const fn with_owner(owner_index: usize, sequence: u64) -> Self {
        Self(((owner_index as u64) << Self::OWNER_SHIFT) | (sequence & Self::SEQUENCE_MASK))
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    pub const fn owner_index(self) -> usize {
        (self.0 >> Self::OWNER_SHIFT) as usize
    }

    pub const fn sequence(self) -> u64 {
        self.0 & Self::SEQUENCE_MASK
    }

    pub(crate) const fn to_bits(self) -> i64 {
        self.0 as i64
    }

    pub(crate) const fn from_bits(bits: i64) -> Self {
        Self(bits as u64)
    }
}

impl From<u64> for BudgetId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl From<BudgetId> for u64 {
    fn from(id: BudgetId) -> Self {
        id.0
    }
}

impl fmt::Display for BudgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// 分片内的预算标识发生器。
///
/// 序号单调递增并在 56 位空间内回绕，跳过 `0` 以免为分片 0 产出保留标识。
#[derive(Debug)]
pub struct BudgetIdSupplier {
    owner_index: usize,
    sequence: u64,
}

impl BudgetIdSupplier {
    pub fn new(owner_index: usize) -> Self {
        Self {
            owner_index,
            sequence: 0,
        }
    }

    pub fn owner_index(&self) -> usize {
        self.owner_index
    }

    pub fn next_id(&mut self) -> BudgetId {
        self.sequence = (self.sequence + 1) & BudgetId::SEQUENCE_MASK;
        if self.sequence == 0 {
            self.sequence = 1;
        }
        BudgetId::with_owner(self.owner_index, self.sequence)
    }
}
