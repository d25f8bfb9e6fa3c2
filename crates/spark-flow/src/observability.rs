//! 日志目标与订阅器安装。
//!
//! # 教案式说明
//! - **意图（Why）**：领取、追加、唤醒都发生在热路径上，默认只在 `trace` 级别输出；
//!   排障时以 `RUST_LOG=spark_flow::budget=trace` 精确打开，而不影响其他模块。
//! - **契约（What）**：
//!   - [`targets`] 中的常量是稳定的 `tracing` target，运维过滤规则可依赖它们；
//!   - 分配/释放/附着记录在 `debug`，预算表耗尽记录在 `warn`；
//!   - `subscriber` Feature 下提供 [`install_subscriber`]，组装 `EnvFilter + fmt` 并设置为全局订阅器。

/// 稳定的 `tracing` target。
pub mod targets {
    /// 预算表、creditor、debitor 与 Flush 扇出。
    pub const BUDGET: &str = "spark_flow::budget";
    /// 共享布局的创建与附着。
    pub const LAYOUT: &str = "spark_flow::layout";
    /// 半流状态与帧校验。
    pub const STREAM: &str = "spark_flow::stream";
}

#[cfg(feature = "subscriber")]
pub use subscriber::{SubscriberError, build_env_filter, install_subscriber};

#[cfg(feature = "subscriber")]
mod subscriber {
    use thiserror::Error;
    use tracing::dispatcher;
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt};

    /// 安装订阅器的失败路径。
    #[derive(Debug, Error)]
    pub enum SubscriberError {
        /// 进程内已存在全局订阅器。
        #[error("a global tracing subscriber is already installed")]
        AlreadySet,
        /// 设置全局订阅器失败。
        #[error("failed to set the global tracing subscriber: {0}")]
        SetGlobal(#[from] tracing::subscriber::SetGlobalDefaultError),
    }

    /// 从 `RUST_LOG` 构造过滤器，缺省为 `info`。
    pub fn build_env_filter() -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }

    /// 安装 `EnvFilter + fmt` 全局订阅器。
    pub fn install_subscriber() -> Result<(), SubscriberError> {
        if dispatcher::has_been_set() {
            return Err(SubscriberError::AlreadySet);
        }
        let subscriber = tracing_subscriber::registry()
            .with(build_env_filter())
            .with(fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
