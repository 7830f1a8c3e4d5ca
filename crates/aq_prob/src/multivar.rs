// crates/aq_prob/src/multivar.rs

//! 多维加权核密度估计
//!
//! 粒子滤波的重采样核：对非零权重的状态样本拟合加权协方差，
//! 按 Silverman 因子缩放得到带宽矩阵，再以零均值高斯核扰动副本。
//!
//! 两种带宽模式：
//! - **完整**：加权协方差矩阵（Cholesky 分解抽样）
//! - **对角**：逐维加权方差（各维独立抽样）
//!
//! 协方差退化（无 Cholesky 分解）时完整模式回退为其对角线，
//! 记一条 `warn` 日志而不中断整个更新步。

use crate::error::{ProbError, ProbResult};
use aq_foundation::WeightedSeries;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;
use tracing::warn;

/// 带权向量样本
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedSample {
    /// 样本权重
    pub weight: f64,
    /// 状态向量
    pub values: Vec<f64>,
}

impl WeightedSample {
    /// 创建样本
    pub fn new(weight: f64, values: Vec<f64>) -> Self {
        Self { weight, values }
    }
}

/// 核带宽
#[derive(Debug, Clone)]
pub enum Bandwidth {
    /// 完整协方差矩阵
    Full(DMatrix<f64>),
    /// 逐维方差
    Diagonal(DVector<f64>),
}

/// 多维加权核密度
#[derive(Debug, Clone, Default)]
pub struct MultiVarKernelDensity {
    samples: Vec<WeightedSample>,
    bandwidth: Option<Bandwidth>,
}

impl MultiVarKernelDensity {
    /// 创建空密度
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加样本；维度必须与已有样本一致
    pub fn add_sample(&mut self, sample: WeightedSample) -> ProbResult<()> {
        if let Some(first) = self.samples.first() {
            if sample.values.len() != first.values.len() {
                return Err(ProbError::DimensionMismatch {
                    expected: first.values.len(),
                    actual: sample.values.len(),
                });
            }
        }
        self.samples.push(sample);
        self.bandwidth = None;
        Ok(())
    }

    /// 样本数
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 状态维度；空密度为 `None`
    pub fn dimension(&self) -> Option<usize> {
        self.samples.first().map(|s| s.values.len())
    }

    /// 样本切片
    pub fn samples(&self) -> &[WeightedSample] {
        &self.samples
    }

    /// 权重和
    pub fn weight_sum(&self) -> f64 {
        self.samples.iter().map(|s| s.weight).sum()
    }

    /// 当前带宽
    pub fn bandwidth(&self) -> Option<&Bandwidth> {
        self.bandwidth.as_ref()
    }

    fn effective_count(&self) -> f64 {
        let sum: f64 = self.samples.iter().map(|s| s.weight).sum();
        let sq: f64 = self.samples.iter().map(|s| s.weight * s.weight).sum();
        if sq > 0.0 {
            sum * sum / sq
        } else {
            0.0
        }
    }

    /// 多维 Silverman 缩放因子 `(4 / ((d+2)·n_eff))^(2/(d+4))`
    fn silverman_factor(&self, dim: usize) -> f64 {
        let n_eff = self.effective_count().max(1.0);
        let d = dim as f64;
        (4.0 / ((d + 2.0) * n_eff)).powf(2.0 / (d + 4.0))
    }

    fn weighted_mean(&self, dim: usize) -> ProbResult<DVector<f64>> {
        let total = self.weight_sum();
        if total <= 0.0 {
            return Err(
                aq_foundation::AqError::invalid_weights("样本权重和为零").into(),
            );
        }
        let mut mean = DVector::zeros(dim);
        for sample in &self.samples {
            for (d, v) in sample.values.iter().enumerate() {
                mean[d] += sample.weight * v;
            }
        }
        Ok(mean / total)
    }

    /// 计算完整带宽：加权协方差 × Silverman 因子
    pub fn compute_gaussian_bandwidth(&mut self) -> ProbResult<()> {
        let dim = self.dimension().ok_or(ProbError::EmptyDensity)?;
        let total = self.weight_sum();
        let mean = self.weighted_mean(dim)?;
        let mut cov = DMatrix::zeros(dim, dim);
        for sample in &self.samples {
            let x = DVector::from_column_slice(&sample.values);
            let centered = x - &mean;
            cov += sample.weight * &centered * centered.transpose();
        }
        cov /= total;
        cov *= self.silverman_factor(dim);
        self.bandwidth = Some(Bandwidth::Full(cov));
        Ok(())
    }

    /// 计算对角带宽：逐维加权方差 × Silverman 因子
    pub fn compute_gaussian_diag_bandwidth(&mut self) -> ProbResult<()> {
        let dim = self.dimension().ok_or(ProbError::EmptyDensity)?;
        let total = self.weight_sum();
        let mean = self.weighted_mean(dim)?;
        let mut var = DVector::zeros(dim);
        for sample in &self.samples {
            for (d, v) in sample.values.iter().enumerate() {
                let c = v - mean[d];
                var[d] += sample.weight * c * c;
            }
        }
        var /= total;
        var *= self.silverman_factor(dim);
        self.bandwidth = Some(Bandwidth::Diagonal(var));
        Ok(())
    }

    /// 以当前带宽构造零均值高斯核
    pub fn kernel(&self) -> ProbResult<MultiVarNormal> {
        let dim = self.dimension().ok_or(ProbError::EmptyDensity)?;
        let bandwidth = self
            .bandwidth
            .as_ref()
            .ok_or(ProbError::BandwidthNotComputed)?;
        Ok(MultiVarNormal::zero_mean(dim, bandwidth))
    }

    /// 有放回抽取 `count` 个向量
    ///
    /// 每次抽取先按权重选出中心样本，再叠加核扰动。
    pub fn sample_multiple(
        &self,
        count: usize,
        rng: &mut impl Rng,
    ) -> ProbResult<Vec<Vec<f64>>> {
        let kernel = self.kernel()?;
        let mut selector = WeightedSeries::with_capacity(self.samples.len());
        for (i, sample) in self.samples.iter().enumerate() {
            selector.add(i as f64, sample.weight);
        }
        let mut drawn = Vec::with_capacity(count);
        for _ in 0..count {
            let index = selector.sample_index(rng)?;
            let center = &self.samples[index].values;
            let offset = kernel.sample(rng);
            drawn.push(
                center
                    .iter()
                    .zip(&offset)
                    .map(|(c, o)| c + o)
                    .collect::<Vec<f64>>(),
            );
        }
        Ok(drawn)
    }
}

/// 多维正态分布
///
/// 完整协方差经 Cholesky 分解抽样；分解失败（矩阵非正定）时
/// 回退为对角近似。
#[derive(Debug, Clone)]
pub struct MultiVarNormal {
    mean: Vec<f64>,
    scale: Scale,
}

#[derive(Debug, Clone)]
enum Scale {
    /// Cholesky 下三角因子
    Lower(DMatrix<f64>),
    /// 逐维标准差
    DiagStd(Vec<f64>),
}

impl MultiVarNormal {
    /// 以给定均值与带宽协方差构造
    pub fn new(mean: Vec<f64>, bandwidth: &Bandwidth) -> Self {
        let scale = match bandwidth {
            Bandwidth::Full(cov) => match Cholesky::new(cov.clone()) {
                Some(chol) => Scale::Lower(chol.l()),
                None => {
                    warn!("带宽矩阵非正定，回退为对角近似");
                    Scale::DiagStd(
                        cov.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect(),
                    )
                }
            },
            Bandwidth::Diagonal(var) => {
                Scale::DiagStd(var.iter().map(|v| v.max(0.0).sqrt()).collect())
            }
        };
        Self { mean, scale }
    }

    /// 零均值核
    pub fn zero_mean(dim: usize, bandwidth: &Bandwidth) -> Self {
        Self::new(vec![0.0; dim], bandwidth)
    }

    /// 维度
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    /// 抽取一个向量
    pub fn sample(&self, rng: &mut impl Rng) -> Vec<f64> {
        let dim = self.mean.len();
        let z: Vec<f64> = (0..dim).map(|_| rng.sample(StandardNormal)).collect();
        match &self.scale {
            Scale::Lower(l) => {
                let zv = DVector::from_column_slice(&z);
                let scaled = l * zv;
                self.mean
                    .iter()
                    .zip(scaled.iter())
                    .map(|(m, s)| m + s)
                    .collect()
            }
            Scale::DiagStd(stds) => self
                .mean
                .iter()
                .zip(stds.iter().zip(&z))
                .map(|(m, (s, zi))| m + s * zi)
                .collect(),
        }
    }
}
