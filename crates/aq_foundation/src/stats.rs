// crates/aq_foundation/src/stats.rs

//! 加权序列统计
//!
//! 提供带权样本序列的均值、标准差与逆 CDF 有放回抽样。
//! 权重从不隐式归一化：权重和本身携带信息（例如集合对观测的解释能力），
//! 统计量在计算时才惰性地除以权重和。

use crate::error::{AqError, AqResult};
use rand::Rng;

/// 带权样本序列
///
/// 每个样本是一对 `(值, 权重)`。权重必须非负；
/// 全零或含非有限值的权重序列在抽样时返回 [`AqError::InvalidWeights`]。
#[derive(Debug, Clone, Default)]
pub struct WeightedSeries {
    values: Vec<f64>,
    weights: Vec<f64>,
}

impl WeightedSeries {
    /// 创建空序列
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建指定容量的空序列
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
        }
    }

    /// 添加权重为 1 的样本
    pub fn add_value(&mut self, value: f64) {
        self.add(value, 1.0);
    }

    /// 添加带权样本
    pub fn add(&mut self, value: f64, weight: f64) {
        self.values.push(value);
        self.weights.push(weight);
    }

    /// 样本数
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 样本值切片
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// 权重切片
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// 权重和
    pub fn weight_sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// 有效样本量 `(Σw)² / Σw²`
    ///
    /// 等权时退化为样本数；权重集中在少数样本时随之减小。
    pub fn effective_count(&self) -> f64 {
        let sum: f64 = self.weights.iter().sum();
        let sq_sum: f64 = self.weights.iter().map(|w| w * w).sum();
        if sq_sum > 0.0 {
            sum * sum / sq_sum
        } else {
            0.0
        }
    }

    /// 加权均值；空序列或零权重和时返回 NaN
    pub fn mean(&self) -> f64 {
        let sum = self.weight_sum();
        if self.values.is_empty() || sum <= 0.0 {
            return f64::NAN;
        }
        self.values
            .iter()
            .zip(&self.weights)
            .map(|(v, w)| v * w)
            .sum::<f64>()
            / sum
    }

    /// 加权标准差（有偏，除以权重和）
    pub fn st_dev_biased(&self) -> f64 {
        let sum = self.weight_sum();
        if self.values.is_empty() || sum <= 0.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        let var = self
            .values
            .iter()
            .zip(&self.weights)
            .map(|(v, w)| w * (v - mean) * (v - mean))
            .sum::<f64>()
            / sum;
        var.max(0.0).sqrt()
    }

    /// 加权标准差（无偏，可靠性权重修正）
    ///
    /// 分母为 `Σw − Σw²/Σw`；单样本或退化序列返回 NaN。
    pub fn st_dev(&self) -> f64 {
        let sum = self.weight_sum();
        if self.values.len() < 2 || sum <= 0.0 {
            return f64::NAN;
        }
        let sq_sum: f64 = self.weights.iter().map(|w| w * w).sum();
        let denom = sum - sq_sum / sum;
        if denom <= 0.0 {
            return f64::NAN;
        }
        let mean = self.mean();
        let var = self
            .values
            .iter()
            .zip(&self.weights)
            .map(|(v, w)| w * (v - mean) * (v - mean))
            .sum::<f64>()
            / denom;
        var.max(0.0).sqrt()
    }

    /// 按权重有放回抽取一个样本值
    ///
    /// 逆 CDF 抽样：在 `[0, Σw)` 上取均匀随机数，返回第一个
    /// 累积权重严格超过它的样本（累积质量相同处取首个下标）。
    pub fn sample(&self, rng: &mut impl Rng) -> AqResult<f64> {
        let index = self.sample_index(rng)?;
        Ok(self.values[index])
    }

    /// 按权重有放回抽取一个样本下标
    pub fn sample_index(&self, rng: &mut impl Rng) -> AqResult<usize> {
        if self.values.is_empty() {
            return Err(AqError::invalid_weights("序列为空"));
        }
        if self.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AqError::invalid_weights("权重含非有限值或负值"));
        }
        let total = self.weight_sum();
        if total <= 0.0 {
            return Err(AqError::invalid_weights("权重和为零"));
        }
        let target = rng.gen::<f64>() * total;
        let mut cumulative = 0.0;
        for (i, w) in self.weights.iter().enumerate() {
            cumulative += w;
            if cumulative > target {
                return Ok(i);
            }
        }
        // 浮点累加误差：返回最后一个非零权重样本
        let last = self
            .weights
            .iter()
            .rposition(|w| *w > 0.0)
            .ok_or_else(|| AqError::invalid_weights("权重和为零"))?;
        Ok(last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_series_statistics() {
        let series = WeightedSeries::new();
        assert!(series.mean().is_nan());
        assert!(series.st_dev_biased().is_nan());
    }

    #[test]
    fn test_weighted_mean() {
        let mut series = WeightedSeries::new();
        series.add(1.0, 1.0);
        series.add(3.0, 3.0);
        assert!((series.mean() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_unweighted_matches_plain_statistics() {
        let mut series = WeightedSeries::new();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            series.add_value(v);
        }
        assert!((series.mean() - 5.0).abs() < 1e-12);
        assert!((series.st_dev_biased() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_effective_count() {
        let mut series = WeightedSeries::new();
        series.add(1.0, 1.0);
        series.add(2.0, 1.0);
        series.add(3.0, 1.0);
        assert!((series.effective_count() - 3.0).abs() < 1e-12);

        let mut skewed = WeightedSeries::new();
        skewed.add(1.0, 1.0);
        skewed.add(2.0, 0.0);
        assert!((skewed.effective_count() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sample_rejects_zero_mass() {
        let mut series = WeightedSeries::new();
        series.add(1.0, 0.0);
        series.add(2.0, 0.0);
        let mut rng = StdRng::seed_from_u64(7);
        let result = series.sample(&mut rng);
        assert!(matches!(result, Err(AqError::InvalidWeights(_))));
    }

    #[test]
    fn test_sample_rejects_nan_weight() {
        let mut series = WeightedSeries::new();
        series.add(1.0, f64::NAN);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(series.sample(&mut rng).is_err());
    }

    #[test]
    fn test_sample_skips_zero_weight_entries() {
        let mut series = WeightedSeries::new();
        series.add(1.0, 0.0);
        series.add(2.0, 5.0);
        series.add(3.0, 0.0);
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            assert_eq!(series.sample(&mut rng).unwrap(), 2.0);
        }
    }

    #[test]
    fn test_sample_frequencies_follow_weights() {
        let mut series = WeightedSeries::new();
        series.add(0.0, 1.0);
        series.add(1.0, 3.0);
        let mut rng = StdRng::seed_from_u64(1234);
        let n = 20_000;
        let mut ones = 0usize;
        for _ in 0..n {
            if series.sample(&mut rng).unwrap() == 1.0 {
                ones += 1;
            }
        }
        let frac = ones as f64 / n as f64;
        assert!((frac - 0.75).abs() < 0.02, "frac = {frac}");
    }
}
