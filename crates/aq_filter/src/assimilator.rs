// crates/aq_filter/src/assimilator.rs

//! 单步序贯蒙特卡洛更新
//!
//! 一次更新依次执行：
//!
//! 1. 逐粒子运行模型，以观测似然加权（失败粒子权重 0）
//! 2. 权重全零时退化为均匀权重，继续运行而不中止
//! 3. `resample = false`：均匀抽取无放回子集，权重原样保留
//! 4. `resample = true`：按权重有放回抽取 N' 个下标并计数
//! 5. `perturb = false`：按计数直接复制；`perturb = true`：
//!    对非零权重粒子拟合多维核密度，以零均值核扰动副本
//!
//! 未扰动的原件始终保留原标识；副本标识追加 `" - resample k"`。

use crate::error::FilterResult;
use crate::model::ModelRunner;
use crate::particle::Particle;
use aq_foundation::WeightedSeries;
use aq_prob::{MultiVarKernelDensity, Normal, WeightedSample};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// 阶段粒子标识前缀
pub const PARTICLE_PREFIX: &str = "Particle";

/// 重采样副本标识连接符
pub const RESAMPLE_TAG: &str = " - resample ";

/// 一次更新的产物
#[derive(Debug)]
pub struct FilterOutcome {
    /// 后验集合
    pub particles: Vec<Particle>,
    /// 按源下标排列的阶段标量输出；失败粒子为 NaN
    ///
    /// 驱动层据此将流量重新关联到重采样后的粒子
    /// （通过标识前缀 `"Particle i"`）。
    pub outputs: Vec<f64>,
}

/// 粒子滤波更新器
///
/// 持有模型与当步观测似然，对一个源集合执行一次更新。
pub struct Assimilator<'a, M: ModelRunner + ?Sized> {
    model: &'a M,
    observation: Normal,
}

impl<'a, M: ModelRunner + ?Sized> Assimilator<'a, M> {
    /// 创建更新器
    pub fn new(model: &'a M, observation: Normal) -> Self {
        Self { model, observation }
    }

    /// 执行一次更新
    ///
    /// `ensemble_size` 为目标集合大小 N'。`resample = false` 时
    /// 返回 `min(N, N')` 个粒子的均匀子集（原下标序，权重保留）。
    pub fn assimilate(
        &self,
        source: &[Particle],
        ensemble_size: usize,
        resample: bool,
        perturb: bool,
        f_class_kernels: bool,
        rng: &mut impl Rng,
    ) -> FilterResult<FilterOutcome> {
        // 运行模型并计算权重
        let mut staged: Vec<Particle> = Vec::with_capacity(source.len());
        let mut outputs: Vec<f64> = Vec::with_capacity(source.len());
        let mut weight_sum = 0.0;
        for (p, particle) in source.iter().enumerate() {
            let id = format!("{} {}", PARTICLE_PREFIX, p + 1);
            match self.model.run_model(p + 1, &particle.state) {
                Ok(run) => {
                    let pdf = self.observation.pdf(run.output);
                    let weight = if pdf.is_finite() { pdf } else { 0.0 };
                    weight_sum += weight;
                    debug!("{id}: weight = {weight}");
                    staged.push(Particle::new(id, run.state, weight));
                    outputs.push(run.output);
                }
                Err(err) => {
                    warn!("{id}: {err}");
                    staged.push(Particle::new(id, particle.state.clone(), 0.0));
                    outputs.push(f64::NAN);
                }
            }
        }

        // 权重全零：退化为均匀权重
        if weight_sum == 0.0 {
            warn!("all particles failed, falling back to uniform weights");
            for particle in &mut staged {
                particle.weight = 1.0;
            }
        }

        // 无重采样分支：均匀无放回子集，保留权重与原下标序
        if !resample {
            let mut indices: Vec<usize> = (0..staged.len()).collect();
            indices.shuffle(rng);
            indices.truncate(ensemble_size.min(staged.len()));
            indices.sort_unstable();
            let particles = indices.iter().map(|&i| staged[i].clone()).collect();
            return Ok(FilterOutcome { particles, outputs });
        }

        // 按权重有放回抽取 N' 个下标并计数
        let mut selector = WeightedSeries::with_capacity(staged.len());
        for particle in &staged {
            selector.add(0.0, particle.weight);
        }
        let mut tally: BTreeMap<usize, usize> = BTreeMap::new();
        for _ in 0..ensemble_size {
            let index = selector.sample_index(rng)?;
            *tally.entry(index).or_insert(0) += 1;
        }

        // 无扰动分支：按计数复制
        if !perturb {
            let mut particles = Vec::with_capacity(ensemble_size);
            for (&index, &count) in &tally {
                let original = &staged[index];
                for r in 0..count {
                    let id = if r > 0 {
                        format!("{}{}{}", original.id, RESAMPLE_TAG, r)
                    } else {
                        original.id.clone()
                    };
                    particles.push(Particle::new(id, original.state.clone(), 1.0));
                }
            }
            return Ok(FilterOutcome { particles, outputs });
        }

        // 对非零权重粒子拟合重采样核
        let mut dist = MultiVarKernelDensity::new();
        for particle in &staged {
            if particle.weight > 0.0 {
                dist.add_sample(WeightedSample::new(
                    particle.weight,
                    particle.state.clone(),
                ))?;
            }
        }
        if f_class_kernels {
            dist.compute_gaussian_bandwidth()?;
        } else {
            dist.compute_gaussian_diag_bandwidth()?;
        }
        let kernel = dist.kernel()?;

        // 扰动分支：原件保留，副本叠加核扰动
        let mut particles = Vec::with_capacity(ensemble_size);
        for (&index, &count) in &tally {
            let original = &staged[index];
            let center = &original.state;
            particles.push(Particle::new(original.id.clone(), center.clone(), 1.0));
            for r in 1..count {
                let id = format!("{}{}{}", original.id, RESAMPLE_TAG, r);
                let offset = kernel.sample(rng);
                let values = center
                    .iter()
                    .zip(&offset)
                    .map(|(c, o)| c + o)
                    .collect::<Vec<f64>>();
                particles.push(Particle::new(id, values, 1.0));
            }
        }
        Ok(FilterOutcome { particles, outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelRun};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// 恒等模型：状态不变，输出取状态首分量
    struct IdentityModel;

    impl ModelRunner for IdentityModel {
        fn run_model(&self, _index: usize, state: &[f64]) -> Result<ModelRun, ModelError> {
            Ok(ModelRun {
                state: state.to_vec(),
                output: state[0],
            })
        }
    }

    /// 永远失败的模型
    struct FailingModel;

    impl ModelRunner for FailingModel {
        fn run_model(&self, _index: usize, _state: &[f64]) -> Result<ModelRun, ModelError> {
            Err(ModelError::Other("deliberate failure".into()))
        }
    }

    fn three_particles() -> Vec<Particle> {
        vec![
            Particle::new("Root 1", vec![1.0], 1.0),
            Particle::new("Root 2", vec![2.0], 1.0),
            Particle::new("Root 3", vec![3.0], 1.0),
        ]
    }

    #[test]
    fn test_resample_preserves_size() {
        let obs = Normal::new(2.0, 0.5).unwrap();
        let assim = Assimilator::new(&IdentityModel, obs);
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = assim
            .assimilate(&three_particles(), 3, true, false, false, &mut rng)
            .unwrap();
        assert_eq!(outcome.particles.len(), 3);
        assert!(outcome.particles.iter().all(|p| p.weight == 1.0));
    }

    #[test]
    fn test_outputs_follow_source_order() {
        let obs = Normal::new(2.0, 0.5).unwrap();
        let assim = Assimilator::new(&IdentityModel, obs);
        let mut rng = StdRng::seed_from_u64(1);
        let outcome = assim
            .assimilate(&three_particles(), 3, true, false, false, &mut rng)
            .unwrap();
        assert_eq!(outcome.outputs, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_ids_are_unique() {
        let obs = Normal::new(2.0, 0.5).unwrap();
        let assim = Assimilator::new(&IdentityModel, obs);
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = assim
            .assimilate(&three_particles(), 50, true, true, false, &mut rng)
            .unwrap();
        assert_eq!(outcome.particles.len(), 50);
        let mut ids: Vec<&str> =
            outcome.particles.iter().map(|p| p.id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn test_no_weight_is_negative_or_nan() {
        let obs = Normal::new(0.0, 0.1).unwrap();
        let assim = Assimilator::new(&IdentityModel, obs);
        let mut rng = StdRng::seed_from_u64(2);
        let outcome = assim
            .assimilate(&three_particles(), 3, false, false, false, &mut rng)
            .unwrap();
        assert!(outcome
            .particles
            .iter()
            .all(|p| p.weight.is_finite() && p.weight >= 0.0));
    }

    #[test]
    fn test_all_failed_falls_back_to_uniform() {
        let obs = Normal::new(2.0, 0.5).unwrap();
        let assim = Assimilator::new(&FailingModel, obs);
        let mut rng = StdRng::seed_from_u64(3);
        let source = three_particles();
        let outcome = assim
            .assimilate(&source, 3, true, false, false, &mut rng)
            .unwrap();
        assert_eq!(outcome.particles.len(), 3);
        assert!(outcome.particles.iter().all(|p| p.weight == 1.0));
        // 失败粒子保留源状态
        let source_states: Vec<&[f64]> =
            source.iter().map(|p| p.state.as_slice()).collect();
        assert!(outcome
            .particles
            .iter()
            .all(|p| source_states.contains(&p.state.as_slice())));
        assert!(outcome.outputs.iter().all(|q| q.is_nan()));
    }

    #[test]
    fn test_perturb_keeps_one_unperturbed_original() {
        let obs = Normal::new(2.0, 0.5).unwrap();
        let assim = Assimilator::new(&IdentityModel, obs);
        let mut rng = StdRng::seed_from_u64(21);
        let outcome = assim
            .assimilate(&three_particles(), 30, true, true, true, &mut rng)
            .unwrap();
        assert_eq!(outcome.particles.len(), 30);
        // 不带副本标记的粒子状态必须与某个阶段状态完全一致
        for particle in &outcome.particles {
            if !particle.id.contains(RESAMPLE_TAG) {
                assert!(
                    [1.0, 2.0, 3.0].contains(&particle.state[0]),
                    "unperturbed particle mutated: {:?}",
                    particle
                );
            }
        }
    }
}
