//! 进程内通知分发引擎（notify-core）
//!
//! 接收通知事件，分配标识与生命周期状态，按优先级扇出到多个投递通道，
//! 并跟踪每个事件（以及每个通道）的投递结果：
//! - 数据模型（`model`）：事件、优先级、状态与通道；
//! - 状态缓存（`cache`）：按事件 ID 并发读写，按通道记录结果并聚合状态；
//! - 历史缓冲（`history`）：最近 N 条事件的有界回放日志，支持多订阅者；
//! - 通道投递（`transport` / `dispatcher`）：外部传输协议与常驻投递 worker；
//! - 优先级路由（`router`）与串行摄入管道（`pipeline`）；
//! - 失败重投（`retry`）：对 FAILED 事件做快照扫描并重新提交；
//! - 引擎（`engine`）：装配以上组件并管理后台任务的生命周期。
//!
//! 典型用法：
//! 1. 为每个通道提供 `ChannelTransport` 实现（或使用 `SimulatedTransport`）；
//! 2. 通过 `NotificationEngine::builder()` 装配并 `start()`；
//! 3. 使用返回的 `NotificationSystem` 发布事件、订阅历史、查询状态与重投失败事件。
//!
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod history;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod router;
pub mod transport;

pub use config::{ChannelConfig, NotificationConfig, RetryPolicy, SimulationProfile};
pub use engine::{NotificationEngine, NotificationSystem};
pub use error::{NotifyError, NotifyResult};
pub use model::{Channel, ChannelOutcome, NotificationEvent, NotificationStatus, Priority};
pub use transport::{ChannelTransport, SimulatedTransport};
