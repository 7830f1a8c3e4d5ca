// crates/aq_sim/src/adapter.rs

//! 模拟器适配器
//!
//! 把"以配置文件为参数、以临时目录为工作目录"的外部模拟器
//! 编排为滤波层契约。一次运行：
//!
//! 1. 在 `(时刻, 粒子)` 私有的临时目录写入状态与配置文件
//! 2. 启动子进程并限时等待（超时强制终止）
//! 3. 解析输出表，取观测时刻流量作为加权标量
//! 4. 由配置器读回结束状态向量
//! 5. 按开关删除临时目录；删不掉的目录进入待删集合，下次重试
//!
//! 状态向量与模拟器输入/输出之间的翻译交给 [`Configurator`]，
//! 具体水文模型的配置器属于外部协作者。

use crate::error::{SimError, SimResult};
use crate::process::{ExitOutcome, ProcessHandle};
use crate::tables::{self, AGGREGATED_FILE, STREAMFLOW_FILE};
use aq_filter::{
    ForecastRunner, ForecastSeries, ModelError, ModelRun, ModelRunner,
};
use aq_foundation::timefmt;
use chrono::{Duration as ChronoDuration, NaiveDateTime};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// 参数到模拟器输入的翻译契约（外部协作者）
pub trait Configurator: Send + Sync {
    /// 将状态向量写为一次运行的输入文件，返回配置文件路径
    ///
    /// 调用时 `run_dir` 已存在且为空；实现方自行创建
    /// `state/`、`output/` 等子目录。
    fn write_inputs(
        &self,
        state: &[f64],
        run_dir: &Path,
        start: NaiveDateTime,
        end: NaiveDateTime,
        step: ChronoDuration,
    ) -> SimResult<PathBuf>;

    /// 从输出目录读回 `end` 时刻的状态向量
    fn read_end_state(&self, run_dir: &Path, end: NaiveDateTime) -> SimResult<Vec<f64>>;
}

/// 文本状态配置器
///
/// 通用的纯文本契约：状态写入 `state/State.txt`（每行一个分量），
/// 结束状态从 `output/End.State` 读回。配置文件取给定模板，
/// 未给模板时生成最小的键值对配置。
#[derive(Debug, Clone, Default)]
pub struct TextStateConfigurator {
    template: Option<String>,
}

impl TextStateConfigurator {
    /// 创建默认配置器
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用给定的配置文件模板
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            template: Some(template.into()),
        }
    }
}

impl Configurator for TextStateConfigurator {
    fn write_inputs(
        &self,
        state: &[f64],
        run_dir: &Path,
        start: NaiveDateTime,
        end: NaiveDateTime,
        step: ChronoDuration,
    ) -> SimResult<PathBuf> {
        let state_dir = run_dir.join("state");
        std::fs::create_dir_all(&state_dir)?;
        std::fs::create_dir_all(run_dir.join("output"))?;

        let mut lines = String::new();
        for value in state {
            lines.push_str(&value.to_string());
            lines.push('\n');
        }
        std::fs::write(state_dir.join("State.txt"), lines)?;

        let config = match &self.template {
            Some(template) => template.clone(),
            None => format!(
                "STATE\tstate/State.txt\nOUTPUT\toutput\nSTART\t{}\nEND\t{}\nSTEP\t{} min\n",
                timefmt::format_report(start),
                timefmt::format_report(end),
                step.num_minutes(),
            ),
        };
        let config_file = run_dir.join("Configuration.txt");
        std::fs::write(&config_file, config)?;
        Ok(config_file)
    }

    fn read_end_state(&self, run_dir: &Path, _end: NaiveDateTime) -> SimResult<Vec<f64>> {
        let path = run_dir.join("output").join("End.State");
        if !path.exists() {
            return Err(SimError::MissingOutput(path));
        }
        let content = std::fs::read_to_string(&path)?;
        let mut values = Vec::new();
        for (row, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            values.push(line.trim().parse().map_err(|e| SimError::Parse {
                path: path.clone(),
                reason: format!("row {}: {e}", row + 1),
            })?);
        }
        Ok(values)
    }
}

/// 外部模拟器适配器
///
/// 时间窗口与每步目录通过 [`ModelRunner::begin_step`] 由驱动注入，
/// 其余字段在构造时固定。同一预报内并发调用使用互不重叠的
/// 粒子目录，无共享文件。
pub struct SimulatorAdapter<C: Configurator> {
    exec: PathBuf,
    configurator: C,
    model_time_step: ChronoDuration,
    da_time_step: ChronoDuration,
    sim_budget_ms: u64,
    forecast_budget_ms: u64,
    remove_da_files: bool,
    remove_forecast_files: bool,
    models_dir: RwLock<PathBuf>,
    current: RwLock<Option<NaiveDateTime>>,
    pending_delete: Mutex<HashSet<PathBuf>>,
}

impl<C: Configurator> SimulatorAdapter<C> {
    /// 创建适配器
    pub fn new(
        exec: impl Into<PathBuf>,
        configurator: C,
        model_time_step: ChronoDuration,
        da_time_step: ChronoDuration,
    ) -> Self {
        Self {
            exec: exec.into(),
            configurator,
            model_time_step,
            da_time_step,
            sim_budget_ms: 60_000,
            forecast_budget_ms: 600_000,
            remove_da_files: false,
            remove_forecast_files: false,
            models_dir: RwLock::new(PathBuf::new()),
            current: RwLock::new(None),
            pending_delete: Mutex::new(HashSet::new()),
        }
    }

    /// 设置子进程墙钟预算（毫秒）：同化步 / 预报窗口
    pub fn with_budgets(mut self, sim_ms: u64, forecast_ms: u64) -> Self {
        self.sim_budget_ms = sim_ms;
        self.forecast_budget_ms = forecast_ms;
        self
    }

    /// 设置临时目录清理开关：同化步 / 预报
    pub fn with_cleanup(mut self, remove_da: bool, remove_forecast: bool) -> Self {
        self.remove_da_files = remove_da;
        self.remove_forecast_files = remove_forecast;
        self
    }

    fn current_or_err(&self) -> Result<NaiveDateTime, ModelError> {
        (*self.current.read())
            .ok_or_else(|| ModelError::Other("begin_step was never called".into()))
    }

    fn prepare_run_dir(&self, run_dir: &Path) -> SimResult<()> {
        if run_dir.exists() {
            std::fs::remove_dir_all(run_dir)?;
        }
        std::fs::create_dir_all(run_dir)?;
        Ok(())
    }

    fn launch(
        &self,
        run_dir: &Path,
        config_file: &Path,
        budget_ms: u64,
    ) -> SimResult<()> {
        let config_arg = config_file.to_string_lossy().into_owned();
        let handle = ProcessHandle::spawn(&self.exec, &[&config_arg], run_dir)?;
        match handle.wait_with_timeout(Duration::from_millis(budget_ms))? {
            ExitOutcome::TimedOut => Err(SimError::Timeout(budget_ms)),
            ExitOutcome::Exited(Some(code)) if code != 0 => {
                Err(SimError::NonZeroExit(code))
            }
            ExitOutcome::Exited(_) => Ok(()),
        }
    }

    /// 删除一次运行的临时目录，连带重试历史欠账
    ///
    /// 模拟器的句柄有时比进程晚释放，删除失败的目录进入
    /// 待删集合，下次清理时再试。
    fn cleanup(&self, run_dir: &Path) {
        let mut pending = self.pending_delete.lock();
        pending.insert(run_dir.to_path_buf());
        pending.retain(|dir| {
            if !dir.exists() {
                return false;
            }
            match std::fs::remove_dir_all(dir) {
                Ok(()) => false,
                Err(err) => {
                    debug!("deferred cleanup of {}: {err}", dir.display());
                    true
                }
            }
        });
    }
}

impl<C: Configurator> ModelRunner for SimulatorAdapter<C> {
    fn run_model(&self, index: usize, state: &[f64]) -> Result<ModelRun, ModelError> {
        let start = self.current_or_err()?;
        let end = start + self.da_time_step;
        let run_dir = self
            .models_dir
            .read()
            .join(timefmt::format_folder(start))
            .join(format!("Particle {index}"));

        let result = self.run_da_window(&run_dir, state, start, end);
        if self.remove_da_files {
            self.cleanup(&run_dir);
        }
        result.map_err(Into::into)
    }

    fn begin_step(
        &self,
        models_dir: &Path,
        current: NaiveDateTime,
    ) -> Result<(), ModelError> {
        std::fs::create_dir_all(models_dir).map_err(ModelError::Io)?;
        *self.models_dir.write() = models_dir.to_path_buf();
        *self.current.write() = Some(current);
        Ok(())
    }
}

impl<C: Configurator> SimulatorAdapter<C> {
    fn run_da_window(
        &self,
        run_dir: &Path,
        state: &[f64],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> SimResult<ModelRun> {
        self.prepare_run_dir(run_dir)?;
        let config_file = self.configurator.write_inputs(
            state,
            run_dir,
            start,
            end,
            self.model_time_step,
        )?;
        self.launch(run_dir, &config_file, self.sim_budget_ms)?;

        let flow_path = run_dir.join("output").join(STREAMFLOW_FILE);
        let streamflow = tables::read_streamflow(&flow_path)?;
        let output = *streamflow.get(&end).ok_or_else(|| SimError::Parse {
            path: flow_path,
            reason: format!("no discharge at {end}"),
        })?;
        let end_state = self.configurator.read_end_state(run_dir, end)?;
        Ok(ModelRun {
            state: end_state,
            output,
        })
    }
}

impl<C: Configurator> ForecastRunner for SimulatorAdapter<C> {
    fn run_forecast(
        &self,
        particle_id: &str,
        state: &[f64],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<ForecastSeries, ModelError> {
        let run_dir = self
            .models_dir
            .read()
            .join("Forecasts")
            .join(particle_id);

        let result = self.run_forecast_window(&run_dir, state, start, end);
        if self.remove_forecast_files {
            self.cleanup(&run_dir);
        }
        result.map_err(Into::into)
    }
}

impl<C: Configurator> SimulatorAdapter<C> {
    fn run_forecast_window(
        &self,
        run_dir: &Path,
        state: &[f64],
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> SimResult<ForecastSeries> {
        self.prepare_run_dir(run_dir)?;
        let config_file = self.configurator.write_inputs(
            state,
            run_dir,
            start,
            end,
            self.model_time_step,
        )?;
        let launch_result = self.launch(run_dir, &config_file, self.forecast_budget_ms);

        // 中途失败的运行仍可能留下可用的输出前缀
        let output_dir = run_dir.join("output");
        let streamflow = match tables::read_streamflow(&output_dir.join(STREAMFLOW_FILE))
        {
            Ok(table) if !table.is_empty() => table,
            Ok(_) | Err(_) => {
                launch_result?;
                return Err(SimError::MissingOutput(
                    output_dir.join(STREAMFLOW_FILE),
                ));
            }
        };
        if let Err(err) = &launch_result {
            warn!("partial forecast for {}: {err}", run_dir.display());
        }

        let mut series = ForecastSeries {
            streamflow,
            ..Default::default()
        };
        if let Ok(aggregated) = tables::read_aggregated(&output_dir.join(AGGREGATED_FILE))
        {
            for (stamp, row) in aggregated {
                series.evaporation.insert(stamp, row.evaporation);
                series.soil_moisture.insert(stamp, row.soil_moisture);
            }
        }
        series.end_state = match self.configurator.read_end_state(run_dir, end) {
            Ok(values) => Some(values),
            Err(err) => {
                warn!("no end state in {}: {err}", run_dir.display());
                None
            }
        };
        Ok(series)
    }
}
