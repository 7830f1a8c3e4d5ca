// crates/aq_foundation/src/lib.rs

//! AquAssim Foundation Layer
//!
//! 零业务依赖的基础层，提供整个项目的基础抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一基础错误类型
//! - [`stats`]: 加权序列统计（均值、标准差、逆 CDF 抽样）
//! - [`timefmt`]: 历史遗留的五种日期时间格式及解析辅助
//!
//! # 设计原则
//!
//! 1. **纯净性**：不包含滤波、预报等高层概念
//! 2. **可组合性**：上层 crate 的错误最终可转换为 [`AqError`]
//! 3. **确定性**：所有随机抽样都接受外部传入的 RNG

#![warn(clippy::all)]

pub mod error;
pub mod stats;
pub mod timefmt;

pub use error::{AqError, AqResult};
pub use stats::WeightedSeries;

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::error::{AqError, AqResult};
    pub use crate::stats::WeightedSeries;
    pub use crate::timefmt;
}
