// apps/aq_cli/src/commands/validate.rs

//! 验证配置命令

use anyhow::{Context, Result};
use aq_engine::observations::load_observations;
use aq_engine::AssimilationSettings;
use aq_foundation::timefmt;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

/// 验证配置参数
#[derive(Args)]
pub struct ValidateArgs {
    /// 配置文件路径 (JSON)
    #[arg(short, long)]
    pub config: PathBuf,

    /// 观测文件（可选，一并检查）
    #[arg(long)]
    pub obs: Option<PathBuf>,

    /// 首行观测对应的时刻 (yyyyMMdd HH-mm)，与 --obs 搭配
    #[arg(long)]
    pub obs_start: Option<String>,
}

/// 执行验证命令
pub fn execute(args: ValidateArgs) -> Result<()> {
    let settings = AssimilationSettings::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    info!("配置有效: {}", args.config.display());
    info!(
        "  N={}, Δ={} min, Δ_da={} min, 线程={}",
        settings.ensemble_size,
        settings.model_time_step_min,
        settings.da_time_step_min,
        settings.thread_count
    );

    if let Some(obs_path) = &args.obs {
        let start_text = args
            .obs_start
            .as_deref()
            .context("--obs 需要同时给出 --obs-start")?;
        let start = timefmt::parse_state_stamp(start_text)?;
        let observations =
            load_observations(obs_path, start, settings.model_time_step())
                .with_context(|| format!("加载观测失败: {}", obs_path.display()))?;
        info!("观测有效: {} 条记录", observations.len());
    }
    Ok(())
}
