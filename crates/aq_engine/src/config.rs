// crates/aq_engine/src/config.rs

//! 驱动配置
//!
//! 所有时间量以分钟/毫秒等标量存储，便于 JSON 序列化；
//! 访问器转换为 `chrono::Duration`。

use crate::error::{EngineError, EngineResult};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 同化-预报驱动识别的全部配置项
///
/// JSON 键沿用历史配置名（`ensembleSize`、`fClassKernels` 等）。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssimilationSettings {
    /// 目标集合大小 N
    #[serde(rename = "ensembleSize")]
    pub ensemble_size: usize,
    /// 是否按权重重采样
    pub resample: bool,
    /// 重采样后是否核扰动副本
    pub perturb: bool,
    /// 完整带宽矩阵 (true) 或对角带宽 (false)
    #[serde(rename = "fClassKernels")]
    pub f_class_kernels: bool,
    /// 观测误差尺度
    #[serde(rename = "obsError")]
    pub obs_error: f64,
    /// true: 标准差 = obs_error；false: 标准差 = obs_error × 观测值
    #[serde(rename = "absoluteError")]
    pub absolute_error: bool,
    /// 模型时间步 Δ [分钟]
    #[serde(rename = "modelTimeStep")]
    pub model_time_step_min: i64,
    /// 同化时间步 Δ_da [分钟]，须为 Δ 的整数倍
    #[serde(rename = "daTimeStep")]
    pub da_time_step_min: i64,
    /// 同化步子进程墙钟预算 [毫秒]
    #[serde(rename = "simMaxTime")]
    pub sim_max_time_ms: u64,
    /// 预报子进程墙钟预算 [毫秒]
    #[serde(rename = "forecastSimMaxTime")]
    pub forecast_sim_max_time_ms: u64,
    /// 整个预报扇出的墙钟预算 [毫秒]
    #[serde(rename = "forecastTimeLimit")]
    pub forecast_time_limit_ms: u64,
    /// 预报工作线程数 C
    #[serde(rename = "threadCount")]
    pub thread_count: usize,
    /// 同化步结束后删除模型临时文件
    #[serde(rename = "removeDAFiles")]
    pub remove_da_files: bool,
    /// 预报结束后删除模型临时文件
    #[serde(rename = "removeForecastFiles")]
    pub remove_forecast_files: bool,
    /// 同一同化时刻卡住时的最大重试次数
    #[serde(rename = "maxDARetries")]
    pub max_da_retries: u32,
}

impl Default for AssimilationSettings {
    fn default() -> Self {
        Self {
            ensemble_size: 30,
            resample: true,
            perturb: true,
            f_class_kernels: false,
            obs_error: 0.1,
            absolute_error: false,
            model_time_step_min: 60,
            da_time_step_min: 60,
            sim_max_time_ms: 60_000,
            forecast_sim_max_time_ms: 600_000,
            forecast_time_limit_ms: 3_600_000,
            thread_count: 4,
            remove_da_files: false,
            remove_forecast_files: false,
            max_da_retries: 2,
        }
    }
}

impl AssimilationSettings {
    /// 模型时间步 Δ
    pub fn model_time_step(&self) -> Duration {
        Duration::minutes(self.model_time_step_min)
    }

    /// 同化时间步 Δ_da
    pub fn da_time_step(&self) -> Duration {
        Duration::minutes(self.da_time_step_min)
    }

    /// 校验配置一致性
    pub fn validate(&self) -> EngineResult<()> {
        if self.ensemble_size == 0 {
            return Err(EngineError::Config("ensemble_size 必须大于 0".into()));
        }
        if !self.obs_error.is_finite() || self.obs_error <= 0.0 {
            return Err(EngineError::Config(format!(
                "obs_error 必须为正: {}",
                self.obs_error
            )));
        }
        if self.model_time_step_min <= 0 {
            return Err(EngineError::Config("model_time_step_min 必须为正".into()));
        }
        if self.da_time_step_min <= 0
            || self.da_time_step_min % self.model_time_step_min != 0
        {
            return Err(EngineError::Config(format!(
                "da_time_step_min ({}) 必须是 model_time_step_min ({}) 的整数倍",
                self.da_time_step_min, self.model_time_step_min
            )));
        }
        if self.thread_count == 0 {
            return Err(EngineError::Config("thread_count 必须大于 0".into()));
        }
        Ok(())
    }

    /// 从 JSON 文件加载
    pub fn load(path: &Path) -> EngineResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&json)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        settings.validate()?;
        Ok(settings)
    }

    /// 保存为 JSON 文件
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        assert!(AssimilationSettings::default().validate().is_ok());
    }

    #[test]
    fn test_da_step_must_be_multiple() {
        let settings = AssimilationSettings {
            model_time_step_min: 60,
            da_time_step_min: 90,
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_zero_ensemble_rejected() {
        let settings = AssimilationSettings {
            ensemble_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = AssimilationSettings {
            ensemble_size: 12,
            obs_error: 0.05,
            absolute_error: true,
            ..Default::default()
        };
        settings.save(&path).unwrap();
        let loaded = AssimilationSettings::load(&path).unwrap();
        assert_eq!(loaded.ensemble_size, 12);
        assert!(loaded.absolute_error);
        assert!((loaded.obs_error - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"ensembleSize": 5}"#).unwrap();
        let loaded = AssimilationSettings::load(&path).unwrap();
        assert_eq!(loaded.ensemble_size, 5);
        assert_eq!(loaded.thread_count, 4);
    }
}
