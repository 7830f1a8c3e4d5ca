// crates/aq_foundation/src/error.rs

//! 基础错误类型
//!
//! 定义整个项目的基础错误类型，仅包含与基础设施相关的错误。
//! 高层错误（滤波、归档、模拟器）各自定义，并在需要时转换为本类型。

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 统一结果类型别名
pub type AqResult<T> = Result<T, AqError>;

/// Foundation 层基础错误
///
/// 包含所有基础设施级别的错误，是错误体系的根基。
#[derive(Debug, Error)]
pub enum AqError {
    /// IO 操作失败
    #[error("IO 错误: {message}")]
    Io {
        /// 描述性错误信息
        message: String,
        /// 底层 IO 错误源
        #[source]
        source: Option<io::Error>,
    },

    /// 文件不存在
    #[error("文件不存在: {path}")]
    FileNotFound {
        /// 未找到的文件路径
        path: PathBuf,
    },

    /// 输入数据验证失败
    #[error("无效的输入数据: {0}")]
    InvalidInput(String),

    /// 权重序列退化：权重全为零或含非有限值
    #[error("无效的权重序列: {0}")]
    InvalidWeights(String),

    /// 文本解析失败
    #[error("解析失败: {0}")]
    Parse(String),

    /// 内部实现错误，通常表示不变量被破坏
    #[error("内部错误: {0}")]
    Internal(String),
}

impl AqError {
    /// 创建 IO 错误
    #[inline]
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    /// 创建带源的 IO 错误
    #[inline]
    pub fn io_with_source(message: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source),
        }
    }

    /// 创建文件未找到错误
    #[inline]
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// 创建无效输入错误
    #[inline]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// 创建无效权重错误
    #[inline]
    pub fn invalid_weights(message: impl Into<String>) -> Self {
        Self::InvalidWeights(message.into())
    }

    /// 创建解析错误
    #[inline]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// 创建内部错误
    #[inline]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<io::Error> for AqError {
    fn from(err: io::Error) -> Self {
        Self::io_with_source("IO 操作失败", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AqError::io("磁盘已满");
        assert!(err.to_string().contains("IO 错误"));
    }

    #[test]
    fn test_io_error_with_source() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let err = AqError::io_with_source("读取观测文件失败", io_err);
        assert!(err.to_string().contains("读取观测文件失败"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_file_not_found() {
        let err = AqError::file_not_found("/data/obs.txt");
        assert!(err.to_string().contains("/data/obs.txt"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err: AqError = io_err.into();
        assert!(matches!(err, AqError::Io { .. }));
    }
}
