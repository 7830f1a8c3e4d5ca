// crates/aq_engine/src/observations.rs

//! 观测文件加载
//!
//! 观测文件每行一个数值，从调用方给定的起始时刻起按模型时间步
//! 递增排列，读入为 `时刻 → 观测值` 映射。

use crate::error::{EngineError, EngineResult};
use aq_foundation::AqError;
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// 加载观测序列
///
/// `start` 为首行数值对应的时刻，`step` 为行间时间步。
/// 空行跳过；无法解析的行视为输入错误。
pub fn load_observations(
    path: &Path,
    start: NaiveDateTime,
    step: Duration,
) -> EngineResult<BTreeMap<NaiveDateTime, f64>> {
    let content = std::fs::read_to_string(path)?;
    let mut observations = BTreeMap::new();
    let mut stamp = start;
    for (row, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let value: f64 = trimmed.parse().map_err(|e| {
            EngineError::Foundation(AqError::parse(format!(
                "{} 第 {} 行: {e}",
                path.display(),
                row + 1
            )))
        })?;
        observations.insert(stamp, value);
        stamp += step;
    }
    info!(
        "loaded {} observation(s) from {}",
        observations.len(),
        path.display()
    );
    Ok(observations)
}
