// crates/aq_prob/src/error.rs

//! 概率层错误类型

use aq_foundation::AqError;
use thiserror::Error;

/// 统一结果类型别名
pub type ProbResult<T> = Result<T, ProbError>;

/// 概率层错误
///
/// [`ProbError::EmptyDensity`] 与 [`ProbError::BandwidthNotComputed`]
/// 属于编程错误：调用方应在求值前保证密度已填充样本并计算过带宽。
#[derive(Debug, Error)]
pub enum ProbError {
    /// 核密度没有任何样本
    #[error("核密度为空，无法求值")]
    EmptyDensity,

    /// 带宽尚未计算
    #[error("带宽尚未计算，先调用 compute_gaussian_bandwidth")]
    BandwidthNotComputed,

    /// 标准差非正
    #[error("标准差必须为正: {0}")]
    InvalidStdDev(f64),

    /// 样本维度不匹配
    #[error("样本维度不匹配: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch {
        /// 期望维度
        expected: usize,
        /// 实际维度
        actual: usize,
    },

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] AqError),
}
