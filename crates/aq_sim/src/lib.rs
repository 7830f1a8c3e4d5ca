// crates/aq_sim/src/lib.rs

//! AquAssim 模拟器适配层
//!
//! 把外部水文模拟器（独立可执行文件）适配为滤波层的
//! [`aq_filter::ModelRunner`] / [`aq_filter::ForecastRunner`] 契约：
//!
//! - [`process`]: 子进程生命周期（stdout 排空、限时等待、强制终止）
//! - [`tables`]: 模拟器输出表解析（流量表、聚合值表）
//! - [`adapter`]: 每粒子私有临时目录的组织与一次运行的编排
//!
//! 并发约定：不同 `(时刻, 粒子)` 使用互不重叠的临时目录，
//! 不依赖任何共享文件锁。

#![warn(clippy::all)]

pub mod adapter;
pub mod error;
pub mod process;
pub mod tables;

pub use adapter::{Configurator, SimulatorAdapter, TextStateConfigurator};
pub use error::{SimError, SimResult};
pub use process::{ExitOutcome, ProcessHandle};
