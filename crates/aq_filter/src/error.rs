// crates/aq_filter/src/error.rs

//! 滤波层错误类型

use aq_foundation::AqError;
use aq_prob::ProbError;
use thiserror::Error;

/// 统一结果类型别名
pub type FilterResult<T> = Result<T, FilterError>;

/// 滤波层错误
#[derive(Debug, Error)]
pub enum FilterError {
    /// 源集合为空
    #[error("粒子集合为空")]
    EmptyEnsemble,

    /// 粒子状态维度不一致
    #[error("粒子状态维度不一致: 期望 {expected}, 实际 {actual}")]
    DimensionMismatch {
        /// 期望维度
        expected: usize,
        /// 实际维度
        actual: usize,
    },

    /// 概率层错误
    #[error(transparent)]
    Prob(#[from] ProbError),

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] AqError),
}
