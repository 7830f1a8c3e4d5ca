// crates/aq_prob/src/kde.rs

//! 一维加权核密度估计
//!
//! 预报阶段每个 (输出变量, 时间戳) 各持有一个本类型实例，
//! 工作线程按粒子权重向其中投入样本，收尾时统一计算高斯带宽。
//!
//! 带宽采用 Silverman 规则，样本量取有效样本量
//! `n_eff = (Σw)²/Σw²`，以反映权重的集中程度。

use crate::error::{ProbError, ProbResult};
use aq_foundation::WeightedSeries;

const SQRT_2PI: f64 = 2.506_628_274_631_000_5;
const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// 单样本或退化样本集的带宽下限系数
fn minimum_bandwidth(reference: f64) -> f64 {
    1e-6 * reference.abs() + 1e-9
}

/// 一维加权核密度
#[derive(Debug, Clone, Default)]
pub struct KernelDensity {
    series: WeightedSeries,
    bandwidth: Option<f64>,
}

impl KernelDensity {
    /// 创建空密度
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加带权样本；带宽随之失效
    pub fn add_sample(&mut self, value: f64, weight: f64) {
        self.series.add(value, weight);
        self.bandwidth = None;
    }

    /// 样本数
    pub fn len(&self) -> usize {
        self.series.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// 权重和
    pub fn weight_sum(&self) -> f64 {
        self.series.weight_sum()
    }

    /// 样本 `(值, 权重)` 对，按插入顺序
    pub fn samples(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.series
            .values()
            .iter()
            .copied()
            .zip(self.series.weights().iter().copied())
    }

    /// 样本 `(值, 权重)` 对，按值升序
    pub fn sorted_samples(&self) -> Vec<(f64, f64)> {
        let mut pairs: Vec<(f64, f64)> = self.samples().collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        pairs
    }

    /// 加权均值；空密度返回 NaN
    pub fn mean(&self) -> f64 {
        self.series.mean()
    }

    /// 加权标准差；空密度返回 NaN
    pub fn st_dev(&self) -> f64 {
        self.series.st_dev_biased()
    }

    /// 当前带宽；未计算时为 `None`
    pub fn bandwidth(&self) -> Option<f64> {
        self.bandwidth
    }

    /// 按 Silverman 规则计算高斯带宽
    ///
    /// `h = σ_w · (4 / (3·n_eff))^(1/5)`。空密度得到 NaN 带宽
    /// （统计量同样为 NaN）；单样本或零散度样本集取下限
    /// `1e-6·|参考值| + 1e-9`，保证带宽严格为正。
    pub fn compute_gaussian_bandwidth(&mut self) {
        if self.series.is_empty() {
            self.bandwidth = Some(f64::NAN);
            return;
        }
        let sigma = self.series.st_dev_biased();
        let n_eff = self.series.effective_count();
        if !sigma.is_finite() || sigma <= 0.0 || n_eff <= 0.0 {
            self.bandwidth = Some(minimum_bandwidth(self.mean()));
            return;
        }
        let h = sigma * (4.0 / (3.0 * n_eff)).powf(0.2);
        self.bandwidth = Some(h.max(minimum_bandwidth(self.mean())));
    }

    fn checked_bandwidth(&self) -> ProbResult<f64> {
        if self.series.is_empty() {
            return Err(ProbError::EmptyDensity);
        }
        self.bandwidth.ok_or(ProbError::BandwidthNotComputed)
    }

    /// 概率密度
    pub fn pdf(&self, x: f64) -> ProbResult<f64> {
        let h = self.checked_bandwidth()?;
        let total = self.series.weight_sum();
        if total <= 0.0 {
            return Ok(0.0);
        }
        let sum: f64 = self
            .samples()
            .map(|(v, w)| {
                let z = (x - v) / h;
                w * (-0.5 * z * z).exp() / (h * SQRT_2PI)
            })
            .sum();
        Ok(sum / total)
    }

    /// 累积分布（密度的积分）
    pub fn cdf(&self, x: f64) -> ProbResult<f64> {
        let h = self.checked_bandwidth()?;
        let total = self.series.weight_sum();
        if total <= 0.0 {
            return Ok(0.0);
        }
        let sum: f64 = self
            .samples()
            .map(|(v, w)| {
                let z = (x - v) / (h * SQRT_2);
                w * 0.5 * (1.0 + libm::erf(z))
            })
            .sum();
        Ok(sum / total)
    }

    /// 针对标量观测的集合 CRPS
    ///
    /// 由加权样本集直接计算（不依赖带宽）：
    /// `Σᵢ wᵢ|xᵢ−y|/W − ½·ΣᵢΣⱼ wᵢwⱼ|xᵢ−xⱼ|/W²`
    pub fn ensemble_crps(&self, observation: f64) -> ProbResult<f64> {
        if self.series.is_empty() {
            return Err(ProbError::EmptyDensity);
        }
        let values = self.series.values();
        let weights = self.series.weights();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(ProbError::Foundation(
                aq_foundation::AqError::invalid_weights("权重和为零"),
            ));
        }
        let mut term1 = 0.0;
        for (v, w) in values.iter().zip(weights) {
            term1 += w * (v - observation).abs();
        }
        term1 /= total;
        let mut term2 = 0.0;
        for (i, (vi, wi)) in values.iter().zip(weights).enumerate() {
            for (vj, wj) in values.iter().zip(weights).skip(i + 1) {
                term2 += wi * wj * (vi - vj).abs();
            }
        }
        // 双重求和只遍历了上三角，补上对称部分
        term2 = 2.0 * term2 / (total * total);
        Ok((term1 - 0.5 * term2).max(0.0))
    }
}
