// crates/aq_filter/src/model.rs

//! 外部模型调用契约
//!
//! 滤波核心通过 [`ModelRunner`] 驱动外部水文模拟器。
//! 实现方必须线程安全：预报引擎会对不同下标并发调用；
//! 约定每次调用使用独立的临时目录，互不干扰。

use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// 一次成功模型运行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRun {
    /// 运行结束时的状态向量
    pub state: Vec<f64>,
    /// 用于似然加权的标量输出（当前设计：观测时刻流量）
    pub output: f64,
}

/// 模型运行错误
///
/// 任何变体在滤波更新中都等价于"该粒子失败"：权重置 0，
/// 状态保留源状态。错误本身只记录日志，不向上传播。
#[derive(Debug, Error)]
pub enum ModelError {
    /// 子进程超出墙钟预算，已被强制终止
    #[error("simulator timed out after {0} ms")]
    Timeout(u64),

    /// 子进程以非零状态码退出
    #[error("simulator exited with status {0}")]
    NonZeroExit(i32),

    /// 输出表缺失或无法解析
    #[error("output parse failed: {0}")]
    OutputParse(String),

    /// 启动或文件操作失败
    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    /// 其他失败
    #[error("{0}")]
    Other(String),
}

/// 外部模型契约
///
/// `index` 为 1 起始的粒子序号，实现方以 `(当前时刻, index)`
/// 构造私有临时目录。实现不得保留对 `state` 切片的引用。
pub trait ModelRunner: Send + Sync {
    /// 以给定状态运行模型一个同化步
    fn run_model(&self, index: usize, state: &[f64]) -> Result<ModelRun, ModelError>;

    /// 同化步开始时由驱动调用：定位时间窗口与每步临时目录
    ///
    /// 外部进程适配器据此推导 `<models>/<时刻>/Particle i` 布局；
    /// 内存模型保持默认空实现即可。
    fn begin_step(
        &self,
        _models_dir: &Path,
        _current: NaiveDateTime,
    ) -> Result<(), ModelError> {
        Ok(())
    }
}

/// 一次预报窗口运行的时间序列输出
///
/// 各表按时间戳索引；前缀成功的运行只包含已完成的时段。
#[derive(Debug, Clone, Default)]
pub struct ForecastSeries {
    /// 流量 [L/s]
    pub streamflow: BTreeMap<NaiveDateTime, f64>,
    /// 蒸散发
    pub evaporation: BTreeMap<NaiveDateTime, f64>,
    /// 三层土壤含水量
    pub soil_moisture: BTreeMap<NaiveDateTime, [f64; 3]>,
    /// 窗口末状态向量；末状态缺失（部分成功）时为 `None`
    pub end_state: Option<Vec<f64>>,
}

/// 预报窗口模型契约
///
/// 与 [`ModelRunner`] 相同的线程安全要求；预报引擎对不同粒子
/// 并发调用。`particle_id` 用于临时目录命名，必须互不相同。
pub trait ForecastRunner: Send + Sync {
    /// 在 `[start, end]` 窗口上运行模型并收集逐时输出
    fn run_forecast(
        &self,
        particle_id: &str,
        state: &[f64],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<ForecastSeries, ModelError>;
}
