// crates/aq_engine/src/driver.rs

//! 前瞻期活动驱动
//!
//! 驱动整个回溯-预报活动：每个前瞻期维护一个进度游标，
//! 每轮循环取最早的游标确定同化窗口，加载（或合成）基准状态，
//! 执行序贯同化，再把后验集合扇出到本轮所有前瞻期的目标时刻，
//! 写报告并推进游标。
//!
//! 同一同化窗口连续失败 `max_da_retries` 次后，为驱动该窗口的
//! 前瞻期记录空行并强制推进游标，活动整体不中断；基础设施错误
//! （磁盘、归档）则直接终止运行。

use crate::assimilate::{seed_ensemble, SequentialAssimilator};
use crate::config::AssimilationSettings;
use crate::error::{EngineError, EngineResult};
use crate::forecast::ForecastEngine;
use crate::report::LeadTimeReport;
use aq_archive::{ArchiveError, StateArchive};
use aq_filter::{ForecastRunner, ModelRunner, Particle};
use aq_foundation::timefmt;
use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// 每轮同化输出目录名
pub const DA_FOLDER: &str = "Data assimilation";
/// 状态归档目录名
pub const STATES_FOLDER: &str = "Base states";
/// 状态合成临时目录名
pub const PREP_FOLDER: &str = "Preparation";

/// 活动驱动
///
/// 模型需同时实现同化步契约与预报窗口契约
/// （外部进程适配器两者都提供）。
pub struct CampaignDriver<M: ModelRunner + ForecastRunner + 'static> {
    model: Arc<M>,
    settings: AssimilationSettings,
    observations: BTreeMap<NaiveDateTime, f64>,
    variables: Vec<String>,
}

impl<M: ModelRunner + ForecastRunner + 'static> CampaignDriver<M> {
    /// 创建驱动
    pub fn new(
        model: Arc<M>,
        settings: AssimilationSettings,
        observations: BTreeMap<NaiveDateTime, f64>,
        variables: Vec<String>,
    ) -> Self {
        Self {
            model,
            settings,
            observations,
            variables,
        }
    }

    /// 执行活动
    ///
    /// `base_state` 为 `base_time` 时刻的基准集合；预报目标时刻
    /// 覆盖 `[forecast_start, forecast_end]`。重启时传入同样的
    /// 输出目录即可从既有进度续算。
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &self,
        output_dir: &Path,
        models_dir: &Path,
        base_time: NaiveDateTime,
        base_state: &[Particle],
        forecast_start: NaiveDateTime,
        forecast_end: NaiveDateTime,
        lead_times: &[Duration],
        rng: &mut impl Rng,
    ) -> EngineResult<()> {
        self.settings.validate()?;
        if lead_times.is_empty() {
            return Err(EngineError::Config("至少需要一个前瞻期".into()));
        }
        let step = self.settings.model_time_step();
        let da_step = self.settings.da_time_step();

        let mut leads = lead_times.to_vec();
        leads.sort();

        std::fs::create_dir_all(output_dir)?;
        std::fs::create_dir_all(models_dir)?;
        let da_out_root = output_dir.join(DA_FOLDER);
        std::fs::create_dir_all(&da_out_root)?;

        // 归档与基准状态
        let archive =
            StateArchive::open(models_dir.join(STATES_FOLDER), self.variables.clone())?;
        archive.write(base_time, base_state, rng)?;

        // 报告目录与进度游标
        let mut reports = Vec::with_capacity(leads.len());
        let mut progress = Vec::with_capacity(leads.len());
        for &lead in &leads {
            let report = LeadTimeReport::new(output_dir, lead);
            let cursor = match report.prepare()? {
                Some(last) => (last + step).max(forecast_start),
                None => forecast_start,
            };
            reports.push(report);
            progress.push(cursor);
        }

        let mut retries: u32 = 0;
        let mut previous_window: Option<NaiveDateTime> = None;
        loop {
            // 仍有目标的前瞻期
            let active: Vec<usize> = (0..leads.len())
                .filter(|&l| progress[l] <= forecast_end)
                .collect();
            if active.is_empty() {
                break;
            }

            // 最早游标确定同化窗口
            let da_end = active
                .iter()
                .map(|&l| progress[l] - leads[l])
                .min()
                .expect("active leads");
            let da_start = da_end - da_step;

            // 卡在同一窗口的重试记账
            if previous_window == Some(da_start) {
                retries += 1;
                if retries > self.settings.max_da_retries {
                    for &l in &active {
                        if progress[l] - leads[l] == da_end {
                            reports[l].append_null(progress[l])?;
                            progress[l] += step;
                        }
                    }
                    retries = 0;
                    previous_window = None;
                    continue;
                }
            } else {
                retries = 0;
            }
            previous_window = Some(da_start);

            let outcome = self.run_cycle(
                &archive,
                models_dir,
                &da_out_root,
                da_start,
                da_end,
                forecast_end,
                &leads,
                &active,
                &mut progress,
                &reports,
                retries,
                rng,
            );
            match outcome {
                Ok(()) => {}
                Err(
                    err @ (EngineError::MissingObservation(_)
                    | EngineError::ZeroObservationInRelativeMode(_)
                    | EngineError::Filter(_)
                    | EngineError::Prob(_)
                    | EngineError::Archive(ArchiveError::StateNotFound(_))),
                ) => {
                    warn!("assimilation cycle at {da_start} failed: {err}");
                }
                Err(infrastructure) => return Err(infrastructure),
            }
        }

        // 收尾：每个前瞻期的评分
        for report in &reports {
            match report.write_performance(
                &self.observations,
                forecast_start,
                forecast_end,
                step,
            ) {
                Ok(summary) => info!(
                    "lead time performance: {} value(s), NSE_l2 = {}",
                    summary.values, summary.nse_l2
                ),
                Err(err) => warn!("performance evaluation failed: {err}"),
            }
        }
        info!("campaign finished");
        Ok(())
    }

    /// 一轮活动：同化窗口 + 预报扇出 + 报告
    #[allow(clippy::too_many_arguments)]
    fn run_cycle(
        &self,
        archive: &StateArchive,
        models_dir: &Path,
        da_out_root: &Path,
        da_start: NaiveDateTime,
        da_end: NaiveDateTime,
        forecast_end: NaiveDateTime,
        leads: &[Duration],
        active: &[usize],
        progress: &mut [NaiveDateTime],
        reports: &[LeadTimeReport],
        retries: u32,
        rng: &mut impl Rng,
    ) -> EngineResult<()> {
        let step = self.settings.model_time_step();
        let cycle_stamp = timefmt::format_state_stamp(da_end);
        let da_out = if retries > 0 {
            da_out_root.join(format!("{cycle_stamp}_{retries}"))
        } else {
            da_out_root.join(&cycle_stamp)
        };
        let cycle_models = models_dir.join(&cycle_stamp);
        info!("assimilation window {da_start} -> {da_end}");

        // 基准状态与播种
        let base = self.load_or_synthesise(archive, models_dir, da_start, rng)?;
        let ensemble = seed_ensemble(
            &base,
            self.settings.ensemble_size,
            self.settings.f_class_kernels,
            rng,
        )?;

        // 序贯同化
        let sequential =
            SequentialAssimilator::new(&*self.model, &self.settings, &self.observations);
        let posterior = sequential.run(
            ensemble,
            da_start,
            da_end,
            &cycle_models,
            &da_out,
            archive,
            rng,
        )?;

        // 本轮各前瞻期的目标时刻
        let targets: Vec<(usize, NaiveDateTime)> = active
            .iter()
            .map(|&l| (l, da_end + leads[l]))
            .filter(|&(l, t)| t >= progress[l] && t <= forecast_end)
            .collect();
        let Some(horizon) = targets.iter().map(|&(_, t)| t).max() else {
            return Ok(());
        };

        // 预报扇出
        self.model
            .begin_step(&cycle_models, da_end)
            .map_err(|e| EngineError::StepSetup(e.to_string()))?;
        let engine = ForecastEngine::new(
            Arc::clone(&self.model),
            self.settings.thread_count,
            self.settings.forecast_time_limit_ms,
        );
        let result = engine.run(&posterior, da_end, horizon, step)?;

        // 报告与游标推进
        for (l, target) in targets {
            if reports[l].append(target, &result)? {
                progress[l] = target + step;
            }
        }

        if self.settings.remove_da_files {
            if let Err(err) = std::fs::remove_dir_all(&cycle_models) {
                warn!("could not remove {}: {err}", cycle_models.display());
            }
        }
        Ok(())
    }

    /// 读取归档状态；缺失时从最近的先前状态向前预报合成
    fn load_or_synthesise(
        &self,
        archive: &StateArchive,
        models_dir: &Path,
        time: NaiveDateTime,
        rng: &mut impl Rng,
    ) -> EngineResult<Vec<Particle>> {
        match archive.read(time) {
            Ok(particles) => {
                info!("loaded archived state ({time})");
                Ok(particles)
            }
            Err(ArchiveError::StateNotFound(_)) => {
                let prior = archive
                    .nearest_before(time)
                    .ok_or(ArchiveError::StateNotFound(time))?;
                info!("synthesising state for {time} from {prior}");
                let base = archive.read(prior)?;

                let prep_dir = self.prep_dir(models_dir, time);
                std::fs::create_dir_all(&prep_dir)?;
                self.model
                    .begin_step(&prep_dir, prior)
                    .map_err(|e| EngineError::StepSetup(e.to_string()))?;
                let engine = ForecastEngine::new(
                    Arc::clone(&self.model),
                    self.settings.thread_count,
                    self.settings.forecast_time_limit_ms,
                );
                let result = engine.run(
                    &base,
                    prior,
                    time,
                    self.settings.model_time_step(),
                )?;
                let particles = result.end_particles();
                if particles.is_empty() {
                    return Err(EngineError::Archive(ArchiveError::StateNotFound(time)));
                }
                archive.write(time, &particles, rng)?;

                if self.settings.remove_forecast_files {
                    if let Err(err) = std::fs::remove_dir_all(&prep_dir) {
                        warn!("could not remove {}: {err}", prep_dir.display());
                    }
                }
                Ok(particles)
            }
            Err(other) => Err(other.into()),
        }
    }

    fn prep_dir(&self, models_dir: &Path, time: NaiveDateTime) -> PathBuf {
        models_dir
            .join(PREP_FOLDER)
            .join(timefmt::format_state_stamp(time))
    }
}
