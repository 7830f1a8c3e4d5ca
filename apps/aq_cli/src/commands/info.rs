// apps/aq_cli/src/commands/info.rs

//! 显示信息命令

use anyhow::{Context, Result};
use aq_archive::StateArchive;
use aq_engine::driver::STATES_FOLDER;
use aq_foundation::timefmt;
use clap::Args;
use std::path::PathBuf;
use tracing::info;

/// 显示信息参数
#[derive(Args)]
pub struct InfoArgs {
    /// 模型临时目录（其下的状态归档会被列出）
    #[arg(short, long, default_value = "models")]
    pub models: PathBuf,
}

/// 执行信息命令
pub fn execute(args: InfoArgs) -> Result<()> {
    let states_dir = args.models.join(STATES_FOLDER);
    if !states_dir.exists() {
        info!("尚无状态归档: {}", states_dir.display());
        return Ok(());
    }
    let archive = StateArchive::open(&states_dir, Vec::new())
        .with_context(|| format!("打开归档失败: {}", states_dir.display()))?;
    let timestamps = archive.timestamps();
    info!("归档目录: {}", states_dir.display());
    info!("快照数: {}", timestamps.len());
    if let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) {
        info!(
            "时间范围: {} .. {}",
            timefmt::format_state_stamp(*first),
            timefmt::format_state_stamp(*last)
        );
    }
    Ok(())
}
