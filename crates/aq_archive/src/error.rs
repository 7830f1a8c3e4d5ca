// crates/aq_archive/src/error.rs

//! 归档层错误类型

use aq_foundation::AqError;
use chrono::NaiveDateTime;
use std::path::PathBuf;
use thiserror::Error;

/// 统一结果类型别名
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// 归档错误
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// 请求的时刻没有归档快照
    ///
    /// 调用方（活动驱动）据此触发合成路径：
    /// 读取最近的先前状态并向前预报。
    #[error("state not found: {0}")]
    StateNotFound(NaiveDateTime),

    /// 快照文件格式损坏
    #[error("malformed state file {path}: {reason}")]
    Malformed {
        /// 出错文件
        path: PathBuf,
        /// 具体原因
        reason: String,
    },

    /// IO 错误（已重试一次后仍失败）
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] AqError),
}
