// crates/aq_prob/src/normal.rs

//! 一维正态分布
//!
//! 观测似然模型：均值为观测值，标准差由观测误差参数给出。

use crate::error::{ProbError, ProbResult};
use rand::Rng;
use rand_distr::StandardNormal;

const SQRT_2PI: f64 = 2.506_628_274_631_000_5;
const SQRT_2: f64 = std::f64::consts::SQRT_2;

/// 一维正态分布
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    mean: f64,
    st_dev: f64,
}

impl Normal {
    /// 创建正态分布；标准差必须为正且有限
    pub fn new(mean: f64, st_dev: f64) -> ProbResult<Self> {
        if !st_dev.is_finite() || st_dev <= 0.0 {
            return Err(ProbError::InvalidStdDev(st_dev));
        }
        Ok(Self { mean, st_dev })
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// 标准差
    pub fn st_dev(&self) -> f64 {
        self.st_dev
    }

    /// 概率密度
    pub fn pdf(&self, x: f64) -> f64 {
        let z = (x - self.mean) / self.st_dev;
        (-0.5 * z * z).exp() / (self.st_dev * SQRT_2PI)
    }

    /// 累积分布
    pub fn cdf(&self, x: f64) -> f64 {
        let z = (x - self.mean) / (self.st_dev * SQRT_2);
        0.5 * (1.0 + libm::erf(z))
    }

    /// 抽取一个样本
    pub fn sample(&self, rng: &mut impl Rng) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mean + self.st_dev * z
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_non_positive_st_dev() {
        assert!(matches!(Normal::new(0.0, 0.0), Err(ProbError::InvalidStdDev(_))));
        assert!(matches!(Normal::new(0.0, -1.0), Err(ProbError::InvalidStdDev(_))));
        assert!(Normal::new(0.0, f64::NAN).is_err());
    }

    #[test]
    fn test_standard_pdf() {
        let n = Normal::new(0.0, 1.0).unwrap();
        assert!((n.pdf(0.0) - 0.398_942_280_401).abs() < 1e-10);
        assert!((n.pdf(1.0) - 0.241_970_724_519).abs() < 1e-10);
    }

    #[test]
    fn test_cdf_symmetry() {
        let n = Normal::new(2.0, 0.5).unwrap();
        assert!((n.cdf(2.0) - 0.5).abs() < 1e-12);
        assert!((n.cdf(1.0) + n.cdf(3.0) - 1.0).abs() < 1e-12);
        assert!(n.cdf(-10.0) < 1e-12);
        assert!(n.cdf(10.0) > 1.0 - 1e-12);
    }

    #[test]
    fn test_sample_moments() {
        let n = Normal::new(5.0, 2.0).unwrap();
        let mut rng = StdRng::seed_from_u64(99);
        let draws: Vec<f64> = (0..50_000).map(|_| n.sample(&mut rng)).collect();
        let mean = draws.iter().sum::<f64>() / draws.len() as f64;
        let var = draws.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>()
            / draws.len() as f64;
        assert!((mean - 5.0).abs() < 0.05);
        assert!((var.sqrt() - 2.0).abs() < 0.05);
    }
}
