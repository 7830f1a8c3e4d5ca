// crates/aq_engine/tests/campaign.rs

//! 活动驱动端到端场景
//!
//! 确定性内存模型下的完整回溯-预报活动：续算、卡步空行、
//! 固定种子下归档文件的逐字节可复现。

use aq_engine::driver::{CampaignDriver, DA_FOLDER, STATES_FOLDER};
use aq_engine::report::STATS_FILE;
use aq_engine::AssimilationSettings;
use aq_filter::{
    ForecastRunner, ForecastSeries, ModelError, ModelRun, ModelRunner, Particle,
};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn stamp(hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2020, 3, 1)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// 确定性衰减模型，记录同化步调用次数
struct DecayModel {
    runs: AtomicUsize,
}

impl DecayModel {
    fn new() -> Self {
        Self {
            runs: AtomicUsize::new(0),
        }
    }
}

impl ModelRunner for DecayModel {
    fn run_model(&self, _index: usize, state: &[f64]) -> Result<ModelRun, ModelError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let next: Vec<f64> = state.iter().map(|v| v * 0.9 + 1.0).collect();
        let output = next[0];
        Ok(ModelRun {
            state: next,
            output,
        })
    }
}

impl ForecastRunner for DecayModel {
    fn run_forecast(
        &self,
        _id: &str,
        state: &[f64],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<ForecastSeries, ModelError> {
        let mut series = ForecastSeries::default();
        let mut values = state.to_vec();
        let mut t = start + ChronoDuration::hours(1);
        while t <= end {
            values = values.iter().map(|v| v * 0.95 + 0.5).collect();
            series.streamflow.insert(t, values[0]);
            series.evaporation.insert(t, 0.1 * values[0]);
            series.soil_moisture.insert(t, [0.3, 0.2, 0.1]);
            t += ChronoDuration::hours(1);
        }
        series.end_state = Some(values);
        Ok(series)
    }
}

fn settings() -> AssimilationSettings {
    AssimilationSettings {
        ensemble_size: 8,
        resample: true,
        perturb: false,
        f_class_kernels: false,
        obs_error: 1.0,
        absolute_error: true,
        model_time_step_min: 60,
        da_time_step_min: 60,
        thread_count: 2,
        forecast_time_limit_ms: 60_000,
        max_da_retries: 1,
        ..Default::default()
    }
}

fn observations(hours: u32) -> BTreeMap<NaiveDateTime, f64> {
    (0..=hours).map(|h| (stamp(h), 10.0 + 0.1 * h as f64)).collect()
}

fn base_state() -> Vec<Particle> {
    vec![
        Particle::new("Base 1", vec![5.0, 1.0], 1.0),
        Particle::new("Base 2", vec![6.0, 2.0], 1.0),
    ]
}

fn variables() -> Vec<String> {
    vec!["storage".into(), "baseflow".into()]
}

fn stats_rows(output_dir: &Path) -> Vec<String> {
    let path = output_dir.join("Lead time = PT2H").join(STATS_FILE);
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// 完整活动跑通后，重启从既有进度续算、不再触碰模型
#[test]
fn restart_skips_completed_steps() {
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("out");
    let models = root.path().join("models");

    let model = Arc::new(DecayModel::new());
    let driver = CampaignDriver::new(
        Arc::clone(&model),
        settings(),
        observations(8),
        variables(),
    );
    let mut rng = StdRng::seed_from_u64(42);
    driver
        .run(
            &out,
            &models,
            stamp(0),
            &base_state(),
            stamp(3),
            stamp(7),
            &[ChronoDuration::hours(2)],
            &mut rng,
        )
        .unwrap();

    let rows = stats_rows(&out);
    assert_eq!(rows.len(), 5, "one row per forecast hour 03..07");
    assert!(rows[0].starts_with("20200301 03-00\t"));
    assert!(rows[4].starts_with("20200301 07-00\t"));
    assert!(model.runs.load(Ordering::SeqCst) > 0);

    // 每轮同化都写了流量报告
    let da_report = out
        .join(DA_FOLDER)
        .join("20200301 01-00")
        .join("Streamflow.txt");
    let content = std::fs::read_to_string(da_report).unwrap();
    assert!(content.starts_with("Date time\tObserved\tMean streamflow\tSt. dev.\n"));
    assert_eq!(content.lines().count(), 2);

    // 重启：进度已满，模型一次都不应再被调用
    let model2 = Arc::new(DecayModel::new());
    let driver2 = CampaignDriver::new(
        Arc::clone(&model2),
        settings(),
        observations(8),
        variables(),
    );
    let mut rng2 = StdRng::seed_from_u64(43);
    driver2
        .run(
            &out,
            &models,
            stamp(0),
            &base_state(),
            stamp(3),
            stamp(7),
            &[ChronoDuration::hours(2)],
            &mut rng2,
        )
        .unwrap();

    assert_eq!(stats_rows(&out).len(), 5, "no duplicated rows after restart");
    assert_eq!(model2.runs.load(Ordering::SeqCst), 0);
}

/// 观测断供的窗口在重试耗尽后记空行并推进
#[test]
fn stuck_window_records_null_rows() {
    let root = tempfile::tempdir().unwrap();
    let out = root.path().join("out");
    let models = root.path().join("models");

    let driver = CampaignDriver::new(
        Arc::new(DecayModel::new()),
        settings(),
        observations(1), // 只有 00:00 与 01:00 有观测
        variables(),
    );
    let mut rng = StdRng::seed_from_u64(7);
    driver
        .run(
            &out,
            &models,
            stamp(0),
            &base_state(),
            stamp(3),
            stamp(5),
            &[ChronoDuration::hours(2)],
            &mut rng,
        )
        .unwrap();

    let rows = stats_rows(&out);
    assert_eq!(rows.len(), 3);
    // 03:00 有完整数据行，04:00 与 05:00 只有时间戳
    assert!(rows[0].contains('\t'));
    assert_eq!(rows[1], "20200301 04-00");
    assert_eq!(rows[2], "20200301 05-00");
}

/// 固定种子与确定性模型下，两次运行的归档文件逐字节一致
#[test]
fn fixed_seed_reproduces_archive_bytes() {
    let mut archives = Vec::new();
    for _ in 0..2 {
        let root = tempfile::tempdir().unwrap();
        let out = root.path().join("out");
        let models = root.path().join("models");
        let mut config = settings();
        config.thread_count = 1;

        let driver = CampaignDriver::new(
            Arc::new(DecayModel::new()),
            config,
            observations(8),
            variables(),
        );
        let mut rng = StdRng::seed_from_u64(42);
        driver
            .run(
                &out,
                &models,
                stamp(0),
                &base_state(),
                stamp(3),
                stamp(7),
                &[ChronoDuration::hours(2)],
                &mut rng,
            )
            .unwrap();

        let snapshot = models.join(STATES_FOLDER).join("20200301 01-00.txt");
        archives.push(std::fs::read(snapshot).unwrap());
        // tempdir 在此释放，文件内容已读出
    }
    assert_eq!(archives[0], archives[1]);
}
