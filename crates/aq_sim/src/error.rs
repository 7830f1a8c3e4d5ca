// crates/aq_sim/src/error.rs

//! 模拟器适配层错误类型

use aq_filter::ModelError;
use aq_foundation::AqError;
use std::path::PathBuf;
use thiserror::Error;

/// 统一结果类型别名
pub type SimResult<T> = Result<T, SimError>;

/// 模拟器适配错误
#[derive(Debug, Error)]
pub enum SimError {
    /// 子进程启动失败
    #[error("failed to spawn simulator: {0}")]
    Spawn(String),

    /// 子进程超出墙钟预算
    #[error("simulator timed out after {0} ms")]
    Timeout(u64),

    /// 子进程退出码非零
    #[error("simulator exited with status {0}")]
    NonZeroExit(i32),

    /// 期望的输出文件不存在
    #[error("missing simulator output: {0}")]
    MissingOutput(PathBuf),

    /// 输出表内容无法解析
    #[error("cannot parse simulator output {path}: {reason}")]
    Parse {
        /// 出错文件
        path: PathBuf,
        /// 具体原因
        reason: String,
    },

    /// IO 错误
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] AqError),
}

impl From<SimError> for ModelError {
    /// 映射为滤波层的逐粒子失败分类
    fn from(err: SimError) -> Self {
        match err {
            SimError::Timeout(ms) => ModelError::Timeout(ms),
            SimError::NonZeroExit(code) => ModelError::NonZeroExit(code),
            SimError::MissingOutput(path) => {
                ModelError::OutputParse(format!("missing {}", path.display()))
            }
            SimError::Parse { path, reason } => {
                ModelError::OutputParse(format!("{}: {reason}", path.display()))
            }
            SimError::Io(io) => ModelError::Io(io),
            other => ModelError::Other(other.to_string()),
        }
    }
}
