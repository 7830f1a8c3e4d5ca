// crates/aq_engine/src/performance.rs

//! 预报评分
//!
//! 确定性指标（Nash–Sutcliffe、平均绝对相对误差）作用于
//! 预报均值序列；概率性指标（观测密度、CRPS、稀有度）作用于
//! 逐时刻的预报分布。稀有度 `2·|CDF(obs) − 0.5|` 度量观测落在
//! 分布尾部的程度：0 为正中，1 为极端。

use crate::error::EngineResult;
use aq_foundation::WeightedSeries;
use aq_prob::KernelDensity;
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::Path;

/// 一组预报评分
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceSummary {
    /// 参与评分的观测数
    pub values: usize,
    /// Nash–Sutcliffe 效率（L2）
    pub nse_l2: f64,
    /// Nash–Sutcliffe 效率（L1）
    pub nse_l1: f64,
    /// 平均绝对相对误差
    pub mare: f64,
    /// 观测在预报密度下的平均 pdf
    pub mean_density: f64,
    /// 平均集合 CRPS
    pub mean_crps: f64,
    /// 平均稀有度
    pub mean_rarity: f64,
}

/// Nash–Sutcliffe 效率
///
/// `1 − Σ|oᵢ−mᵢ|^p / Σ|oᵢ−ō|^p`；`exponent = 2` 为经典形式，
/// `exponent = 1` 降低对峰值误差的敏感度。
pub fn nash_sutcliffe(observed: &[f64], modeled: &[f64], exponent: f64) -> f64 {
    if observed.is_empty() || observed.len() != modeled.len() {
        return f64::NAN;
    }
    let mean = observed.iter().sum::<f64>() / observed.len() as f64;
    let residual: f64 = observed
        .iter()
        .zip(modeled)
        .map(|(o, m)| (o - m).abs().powf(exponent))
        .sum();
    let variance: f64 = observed
        .iter()
        .map(|o| (o - mean).abs().powf(exponent))
        .sum();
    if variance == 0.0 {
        return f64::NAN;
    }
    1.0 - residual / variance
}

/// 平均绝对相对误差；观测为零的时刻跳过
pub fn mean_abs_relative_error(observed: &[f64], modeled: &[f64]) -> f64 {
    let mut series = WeightedSeries::new();
    for (o, m) in observed.iter().zip(modeled) {
        if *o != 0.0 {
            series.add_value((o - m).abs() / o.abs());
        }
    }
    series.mean()
}

/// 对一条分布时间序列计算全部评分
///
/// 遍历 `[start, end]` 内每个模型时间步，取观测与分布都存在的
/// 时刻。分布必须已计算带宽；空分布会使密度求值失败并中止评分。
pub fn evaluate_streamflow(
    series: &BTreeMap<NaiveDateTime, KernelDensity>,
    observations: &BTreeMap<NaiveDateTime, f64>,
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: Duration,
) -> EngineResult<PerformanceSummary> {
    let mut observed = Vec::new();
    let mut modeled = Vec::new();
    let mut density = WeightedSeries::new();
    let mut crps = WeightedSeries::new();
    let mut rarity = WeightedSeries::new();

    let mut t = start;
    while t <= end {
        if let (Some(dist), Some(&obs)) = (series.get(&t), observations.get(&t)) {
            observed.push(obs);
            modeled.push(dist.mean());
            density.add_value(dist.pdf(obs)?);
            crps.add_value(dist.ensemble_crps(obs)?);
            rarity.add_value(2.0 * (dist.cdf(obs)? - 0.5).abs());
        }
        t += step;
    }

    Ok(PerformanceSummary {
        values: observed.len(),
        nse_l2: nash_sutcliffe(&observed, &modeled, 2.0),
        nse_l1: nash_sutcliffe(&observed, &modeled, 1.0),
        mare: mean_abs_relative_error(&observed, &modeled),
        mean_density: density.mean(),
        mean_crps: crps.mean(),
        mean_rarity: rarity.mean(),
    })
}

/// 写评分文件
pub fn write_performance(path: &Path, summary: &PerformanceSummary) -> EngineResult<()> {
    let content = format!(
        "Values\t{}\nNSE_l2\t{}\nNSE_l1\t{}\nMARE\t{}\nMean CRPS\t{}\nMean density\t{}\nMean rarity\t{}\n",
        summary.values,
        summary.nse_l2,
        summary.nse_l1,
        summary.mare,
        summary.mean_crps,
        summary.mean_density,
        summary.mean_rarity,
    );
    std::fs::write(path, content)?;
    Ok(())
}
