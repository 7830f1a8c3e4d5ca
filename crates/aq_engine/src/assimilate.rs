// crates/aq_engine/src/assimilate.rs

//! 序贯同化循环
//!
//! 持有当前集合，按同化时间步推进：构造观测似然、调用滤波更新、
//! 写流量报告行、把后验集合归档。循环严格串行——一步完成后
//! 才开始下一步，t+Δ_da 的集合是 t 的集合、观测与 RNG 状态的纯函数。

use crate::config::AssimilationSettings;
use crate::error::{EngineError, EngineResult};
use aq_archive::StateArchive;
use aq_filter::{Assimilator, ModelRunner, Particle};
use aq_foundation::{timefmt, WeightedSeries};
use aq_prob::{MultiVarKernelDensity, Normal, WeightedSample};
use chrono::NaiveDateTime;
use rand::Rng;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// 流量报告文件名
pub const STREAMFLOW_FILE: &str = "Streamflow.txt";

/// 从基础状态播种目标大小的集合
///
/// 基础粒子获得 `"Root i"` 标识；数量不足时对基础状态拟合
/// 多维核密度，抽取补足的 `"Generated i"` 粒子。权重全零的
/// 基础集合按均匀权重拟合。
pub fn seed_ensemble(
    base: &[Particle],
    ensemble_size: usize,
    f_class_kernels: bool,
    rng: &mut impl Rng,
) -> EngineResult<Vec<Particle>> {
    let mut ensemble: Vec<Particle> = base
        .iter()
        .take(ensemble_size)
        .enumerate()
        .map(|(i, p)| Particle::new(format!("Root {}", i + 1), p.state.clone(), 1.0))
        .collect();

    let missing = ensemble_size.saturating_sub(ensemble.len());
    if missing > 0 {
        let uniform = base.iter().all(|p| p.weight <= 0.0);
        let mut dist = MultiVarKernelDensity::new();
        for particle in base {
            let weight = if uniform { 1.0 } else { particle.weight };
            if weight > 0.0 {
                dist.add_sample(WeightedSample::new(weight, particle.state.clone()))
                    .map_err(EngineError::Prob)?;
            }
        }
        if f_class_kernels {
            dist.compute_gaussian_bandwidth()?;
        } else {
            dist.compute_gaussian_diag_bandwidth()?;
        }
        for (i, values) in dist.sample_multiple(missing, rng)?.into_iter().enumerate() {
            ensemble.push(Particle::new(format!("Generated {}", i + 1), values, 1.0));
        }
    }
    Ok(ensemble)
}

/// 序贯同化驱动
///
/// 对一个时间区间执行逐观测的滤波更新；模型、配置与观测
/// 映射由调用方持有。
pub struct SequentialAssimilator<'a, M: ModelRunner + ?Sized> {
    model: &'a M,
    settings: &'a AssimilationSettings,
    observations: &'a BTreeMap<NaiveDateTime, f64>,
}

impl<'a, M: ModelRunner + ?Sized> SequentialAssimilator<'a, M> {
    /// 创建驱动
    pub fn new(
        model: &'a M,
        settings: &'a AssimilationSettings,
        observations: &'a BTreeMap<NaiveDateTime, f64>,
    ) -> Self {
        Self {
            model,
            settings,
            observations,
        }
    }

    /// 在 `[start, end)` 上执行同化，返回末端后验集合
    ///
    /// 每步把后验集合写入归档（按步末时刻为键），并向
    /// `<output_dir>/Streamflow.txt` 追加
    /// `(时刻, 观测, 加权均值, 加权标准差)` 一行。
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        mut ensemble: Vec<Particle>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        models_dir: &Path,
        output_dir: &Path,
        archive: &StateArchive,
        rng: &mut impl Rng,
    ) -> EngineResult<Vec<Particle>> {
        let step = self.settings.model_time_step();
        let da_step = self.settings.da_time_step();

        std::fs::create_dir_all(output_dir)?;
        let report_path = output_dir.join(STREAMFLOW_FILE);
        std::fs::write(
            &report_path,
            "Date time\tObserved\tMean streamflow\tSt. dev.\n",
        )?;

        let mut current = start;
        while current < end {
            // 观测似然
            let obs_time = current + step;
            let observed = *self
                .observations
                .get(&obs_time)
                .ok_or(EngineError::MissingObservation(obs_time))?;
            let st_dev = if self.settings.absolute_error {
                self.settings.obs_error
            } else {
                self.settings.obs_error * observed
            };
            let likelihood = Normal::new(observed, st_dev)
                .map_err(|_| EngineError::ZeroObservationInRelativeMode(obs_time))?;

            // 滤波更新
            self.model
                .begin_step(models_dir, current)
                .map_err(|e| EngineError::StepSetup(e.to_string()))?;
            info!("assimilation step {}", timefmt::format_folder(current));
            let assimilator = Assimilator::new(self.model, likelihood);
            let outcome = assimilator.assimilate(
                &ensemble,
                self.settings.ensemble_size,
                self.settings.resample,
                self.settings.perturb,
                self.settings.f_class_kernels,
                rng,
            )?;
            current += da_step;

            // 按标识前缀把阶段流量关联回后验粒子
            let mut streamflow = WeightedSeries::new();
            for particle in &outcome.particles {
                if let Some(index) = source_index(&particle.id) {
                    if let Some(&q) = outcome.outputs.get(index - 1) {
                        if q.is_finite() {
                            streamflow.add(q, particle.weight);
                        }
                    }
                }
            }
            let observed_now = self
                .observations
                .get(&current)
                .copied()
                .unwrap_or(f64::NAN);
            let mut report = std::fs::OpenOptions::new()
                .append(true)
                .open(&report_path)?;
            writeln!(
                report,
                "{}\t{}\t{}\t{}",
                timefmt::format_state_stamp(current),
                observed_now,
                streamflow.mean(),
                streamflow.st_dev_biased(),
            )?;

            archive.write(current, &outcome.particles, rng)?;
            ensemble = outcome.particles;
        }
        Ok(ensemble)
    }
}

/// 从粒子标识解析阶段序号（`"Particle 3 - resample 1"` → 3）
fn source_index(id: &str) -> Option<usize> {
    id.split_whitespace().nth(1)?.parse().ok()
}
