// apps/aq_cli/src/commands/run.rs

//! 运行同化-预报活动
//!
//! 装配顺序：配置 → 观测 → 基准状态 → 模拟器适配器 → 活动驱动。
//! 时刻参数统一使用状态文件格式 `yyyyMMdd HH-mm`，
//! 前瞻期使用 ISO 时长（`PT6H`）。

use anyhow::{Context, Result};
use aq_archive::load_snapshot;
use aq_engine::observations::load_observations;
use aq_engine::report::parse_iso_duration;
use aq_engine::{AssimilationSettings, CampaignDriver};
use aq_foundation::timefmt;
use aq_sim::{SimulatorAdapter, TextStateConfigurator};
use clap::Args;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// 运行活动参数
#[derive(Args)]
pub struct RunArgs {
    /// 配置文件路径 (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// 外部模拟器可执行文件
    #[arg(long)]
    pub exec: PathBuf,

    /// 模拟器配置文件模板（可选）
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// 观测文件（每行一个数值）
    #[arg(long)]
    pub obs: PathBuf,

    /// 首行观测对应的时刻 (yyyyMMdd HH-mm)
    #[arg(long)]
    pub obs_start: String,

    /// 基准状态快照文件
    #[arg(long)]
    pub base_state: PathBuf,

    /// 基准状态对应的时刻 (yyyyMMdd HH-mm)
    #[arg(long)]
    pub base_time: String,

    /// 预报目标区间起点 (yyyyMMdd HH-mm)
    #[arg(long)]
    pub forecast_start: String,

    /// 预报目标区间终点 (yyyyMMdd HH-mm)
    #[arg(long)]
    pub forecast_end: String,

    /// 前瞻期列表，逗号分隔 (如 PT6H,PT24H)
    #[arg(long, value_delimiter = ',')]
    pub lead_times: Vec<String>,

    /// 报告输出目录
    #[arg(short, long, default_value = "output")]
    pub output: PathBuf,

    /// 模型临时目录
    #[arg(short, long, default_value = "models")]
    pub models: PathBuf,

    /// RNG 种子
    #[arg(long, default_value = "42")]
    pub seed: u64,
}

/// 执行运行命令
pub fn execute(args: RunArgs) -> Result<()> {
    info!("=== AquAssim 活动启动 ===");

    // 配置
    let settings = AssimilationSettings::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    info!(
        "配置: N={}, resample={}, perturb={}, 线程={}",
        settings.ensemble_size, settings.resample, settings.perturb,
        settings.thread_count
    );

    // 时刻与前瞻期
    let obs_start = timefmt::parse_state_stamp(&args.obs_start)?;
    let base_time = timefmt::parse_state_stamp(&args.base_time)?;
    let forecast_start = timefmt::parse_state_stamp(&args.forecast_start)?;
    let forecast_end = timefmt::parse_state_stamp(&args.forecast_end)?;
    let mut lead_times = Vec::new();
    for text in &args.lead_times {
        lead_times.push(parse_iso_duration(text)?);
    }

    // 观测与基准状态
    let observations =
        load_observations(&args.obs, obs_start, settings.model_time_step())
            .with_context(|| format!("加载观测失败: {}", args.obs.display()))?;
    let (variables, base_state) = load_snapshot(&args.base_state)
        .with_context(|| format!("加载基准状态失败: {}", args.base_state.display()))?;
    info!(
        "基准状态: {} 个粒子, {} 维",
        base_state.len(),
        variables.len()
    );

    // 模拟器适配器
    let configurator = match &args.template {
        Some(path) => {
            let template = std::fs::read_to_string(path)
                .with_context(|| format!("读取模板失败: {}", path.display()))?;
            TextStateConfigurator::with_template(template)
        }
        None => TextStateConfigurator::new(),
    };
    let adapter = SimulatorAdapter::new(
        &args.exec,
        configurator,
        settings.model_time_step(),
        settings.da_time_step(),
    )
    .with_budgets(settings.sim_max_time_ms, settings.forecast_sim_max_time_ms)
    .with_cleanup(settings.remove_da_files, settings.remove_forecast_files);

    // 活动驱动
    let driver = CampaignDriver::new(
        Arc::new(adapter),
        settings,
        observations,
        variables,
    );
    let mut rng = StdRng::seed_from_u64(args.seed);
    driver
        .run(
            &args.output,
            &args.models,
            base_time,
            &base_state,
            forecast_start,
            forecast_end,
            &lead_times,
            &mut rng,
        )
        .context("活动运行失败")?;

    info!("=== 活动完成 ===");
    Ok(())
}
