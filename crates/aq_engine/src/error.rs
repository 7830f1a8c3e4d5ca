// crates/aq_engine/src/error.rs

//! 引擎层错误类型
//!
//! 传播策略：逐粒子失败从不越过滤波更新；单步失败
//! （缺观测、相对误差下零观测）上抛到活动驱动，由其重试或跳过；
//! 基础设施失败（磁盘、进程启动）一路上抛终止运行。

use aq_archive::ArchiveError;
use aq_filter::FilterError;
use aq_foundation::AqError;
use aq_prob::ProbError;
use chrono::NaiveDateTime;
use thiserror::Error;

/// 统一结果类型别名
pub type EngineResult<T> = Result<T, EngineError>;

/// 引擎错误
#[derive(Debug, Error)]
pub enum EngineError {
    /// 下一个同化时刻缺少观测
    #[error("missing observation at {0}")]
    MissingObservation(NaiveDateTime),

    /// 相对误差模式下观测为零，似然标准差退化
    #[error("zero observation in relative error mode at {0}")]
    ZeroObservationInRelativeMode(NaiveDateTime),

    /// 配置无效
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 同化步准备失败（目录创建等基础设施问题）
    #[error("model step setup failed: {0}")]
    StepSetup(String),

    /// 滤波层错误
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// 概率层错误
    #[error(transparent)]
    Prob(#[from] ProbError),

    /// 归档层错误
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] AqError),
}
