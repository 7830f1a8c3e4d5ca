// crates/aq_engine/src/report.rs

//! 前瞻期报告
//!
//! 每个前瞻期一个目录 `<out>/Lead time = <ISO 时长>/`，包含：
//!
//! - `Stats.txt`: 每个预报时刻一行，五个变量的均值与标准差
//! - `Q.txt` / `Ev.txt` / `SM1.txt` / `SM2.txt` / `SM3.txt`:
//!   每行 `时刻\tv₁\tv₂\t…`（按值升序的加权样本）
//! - `W.txt`: 与 `Q.txt` 同形，值换为对应权重
//! - `Performance.txt`: 运行结束时的六项评分
//!
//! `Stats.txt` 的末行时间戳同时充当续算游标：重启时从
//! `t_last + Δ` 继续，已完成的步不再执行。

use crate::error::{EngineError, EngineResult};
use crate::forecast::ForecastResult;
use crate::performance::{self, PerformanceSummary};
use aq_foundation::timefmt;
use aq_prob::KernelDensity;
use chrono::{Duration, NaiveDateTime};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 统计文件名
pub const STATS_FILE: &str = "Stats.txt";
/// 流量值文件名
pub const Q_FILE: &str = "Q.txt";
/// 蒸散发值文件名
pub const EV_FILE: &str = "Ev.txt";
/// 土壤含水量一层文件名
pub const SM1_FILE: &str = "SM1.txt";
/// 土壤含水量二层文件名
pub const SM2_FILE: &str = "SM2.txt";
/// 土壤含水量三层文件名
pub const SM3_FILE: &str = "SM3.txt";
/// 权重文件名
pub const W_FILE: &str = "W.txt";
/// 评分文件名
pub const PERFORMANCE_FILE: &str = "Performance.txt";

/// ISO-8601 时长表示（`PT6H`、`PT30M`、`PT6H30M`）
pub fn format_iso_duration(duration: Duration) -> String {
    let total_minutes = duration.num_minutes();
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    match (hours, minutes) {
        (0, m) => format!("PT{m}M"),
        (h, 0) => format!("PT{h}H"),
        (h, m) => format!("PT{h}H{m}M"),
    }
}

/// 解析 `PT6H` / `PT30M` / `PT6H30M` 形式的时长
pub fn parse_iso_duration(text: &str) -> EngineResult<Duration> {
    let rest = text
        .strip_prefix("PT")
        .ok_or_else(|| EngineError::Config(format!("无效的时长: {text}")))?;
    let mut minutes: i64 = 0;
    let mut digits = String::new();
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'H' | 'h' => {
                let h: i64 = digits
                    .parse()
                    .map_err(|_| EngineError::Config(format!("无效的时长: {text}")))?;
                minutes += h * 60;
                digits.clear();
            }
            'M' | 'm' => {
                let m: i64 = digits
                    .parse()
                    .map_err(|_| EngineError::Config(format!("无效的时长: {text}")))?;
                minutes += m;
                digits.clear();
            }
            _ => return Err(EngineError::Config(format!("无效的时长: {text}"))),
        }
    }
    if !digits.is_empty() || minutes <= 0 {
        return Err(EngineError::Config(format!("无效的时长: {text}")));
    }
    Ok(Duration::minutes(minutes))
}

/// 单个前瞻期的报告目录
pub struct LeadTimeReport {
    dir: PathBuf,
    lead_time: Duration,
}

impl LeadTimeReport {
    /// 绑定输出目录与前瞻期
    pub fn new(output_dir: &Path, lead_time: Duration) -> Self {
        let dir = output_dir.join(format!(
            "Lead time = {}",
            format_iso_duration(lead_time)
        ));
        Self { dir, lead_time }
    }

    /// 前瞻期
    pub fn lead_time(&self) -> Duration {
        self.lead_time
    }

    /// 报告目录
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    /// 初始化目录；已有进度时返回末行时间戳
    ///
    /// 目录已存在则解析 `Stats.txt` 的最后一行作为续算游标；
    /// 否则创建目录并写入全部表头。
    pub fn prepare(&self) -> EngineResult<Option<NaiveDateTime>> {
        if self.dir.exists() {
            let resumed = self.last_stats_stamp()?;
            if let Some(stamp) = resumed {
                info!(
                    "resuming lead time {} after {}",
                    format_iso_duration(self.lead_time),
                    stamp
                );
            }
            return Ok(resumed);
        }
        std::fs::create_dir_all(&self.dir)?;
        let headers: [(&str, &str); 7] = [
            (
                STATS_FILE,
                "Date-time\tQ_Mean\tQ_stDev\tEv_Mean\tEv_stDev\tSM1_Mean\tSM1_stDev\
                 \tSM2_Mean\tSM2_stDev\tSM3_Mean\tSM3_stDev",
            ),
            (Q_FILE, "Date-time\tStreamflow values"),
            (EV_FILE, "Date-time\tEvaporation values"),
            (SM1_FILE, "Date-time\tSoil moisture values (layer 1)"),
            (SM2_FILE, "Date-time\tSoil moisture values (layer 2)"),
            (SM3_FILE, "Date-time\tSoil moisture values (layer 3)"),
            (W_FILE, "Date-time\tParticle weights"),
        ];
        for (file, header) in headers {
            std::fs::write(self.dir.join(file), format!("{header}\n"))?;
        }
        Ok(None)
    }

    fn last_stats_stamp(&self) -> EngineResult<Option<NaiveDateTime>> {
        let content = std::fs::read_to_string(self.dir.join(STATS_FILE))?;
        let Some(last) = content.lines().filter(|l| !l.trim().is_empty()).last()
        else {
            return Ok(None);
        };
        if last.starts_with("Date-time") {
            return Ok(None);
        }
        let token = last.split('\t').next().unwrap_or_default();
        Ok(Some(timefmt::parse_state_stamp(token)?))
    }

    /// 追加一个预报时刻的完整行
    ///
    /// 流量、蒸散发或一层土壤含水量的桶为空时不写任何行并返回
    /// `false`（该时刻视为未取得进展，由驱动重试）。
    pub fn append(
        &self,
        time: NaiveDateTime,
        result: &ForecastResult,
    ) -> EngineResult<bool> {
        let Some(q) = result.streamflow.get(&time) else {
            return Ok(false);
        };
        let Some(ev) = result.evaporation.get(&time) else {
            return Ok(false);
        };
        let sm: Vec<&KernelDensity> = result
            .soil_moisture
            .iter()
            .filter_map(|layer| layer.get(&time))
            .collect();
        if q.is_empty() || ev.is_empty() || sm.len() < 3 || sm[0].is_empty() {
            return Ok(false);
        }

        let stamp = timefmt::format_state_stamp(time);
        let stats_row = format!(
            "{stamp}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            q.mean(),
            q.st_dev(),
            ev.mean(),
            ev.st_dev(),
            sm[0].mean(),
            sm[0].st_dev(),
            sm[1].mean(),
            sm[1].st_dev(),
            sm[2].mean(),
            sm[2].st_dev(),
        );
        self.append_line(STATS_FILE, &stats_row)?;

        // Q 与 W 按同一排序对齐
        let pairs = q.sorted_samples();
        let mut q_row = stamp.clone();
        let mut w_row = stamp.clone();
        for (value, weight) in &pairs {
            q_row.push_str(&format!("\t{value}"));
            w_row.push_str(&format!("\t{weight}"));
        }
        self.append_line(Q_FILE, &q_row)?;
        self.append_line(W_FILE, &w_row)?;

        for (file, kde) in [
            (EV_FILE, ev),
            (SM1_FILE, sm[0]),
            (SM2_FILE, sm[1]),
            (SM3_FILE, sm[2]),
        ] {
            let mut row = stamp.clone();
            for (value, _) in kde.sorted_samples() {
                row.push_str(&format!("\t{value}"));
            }
            self.append_line(file, &row)?;
        }
        Ok(true)
    }

    /// 为无法取得结果的时刻追加空行（仅时间戳）
    pub fn append_null(&self, time: NaiveDateTime) -> EngineResult<()> {
        let stamp = timefmt::format_state_stamp(time);
        warn!(
            "recording null row at {stamp} for lead time {}",
            format_iso_duration(self.lead_time)
        );
        for file in [STATS_FILE, Q_FILE, W_FILE, EV_FILE, SM1_FILE, SM2_FILE, SM3_FILE] {
            self.append_line(file, &stamp)?;
        }
        Ok(())
    }

    fn append_line(&self, file: &str, line: &str) -> EngineResult<()> {
        let mut handle = std::fs::OpenOptions::new()
            .append(true)
            .open(self.dir.join(file))?;
        writeln!(handle, "{line}")?;
        Ok(())
    }

    /// 读回值/权重文件，重建逐时刻分布并写评分文件
    ///
    /// 空行（null 行）跳过；评分窗口为 `(start, end]` 内有观测的
    /// 时刻。
    pub fn write_performance(
        &self,
        observations: &BTreeMap<NaiveDateTime, f64>,
        start: NaiveDateTime,
        end: NaiveDateTime,
        step: Duration,
    ) -> EngineResult<PerformanceSummary> {
        let values = std::fs::read_to_string(self.dir.join(Q_FILE))?;
        let weights = std::fs::read_to_string(self.dir.join(W_FILE))?;

        let mut series: BTreeMap<NaiveDateTime, KernelDensity> = BTreeMap::new();
        for (v_line, w_line) in values.lines().skip(1).zip(weights.lines().skip(1)) {
            let v_tokens: Vec<&str> = v_line.split('\t').collect();
            let w_tokens: Vec<&str> = w_line.split('\t').collect();
            if v_tokens.len() < 2 {
                continue; // null 行
            }
            let stamp = timefmt::parse_state_stamp(v_tokens[0])?;
            if stamp <= start || stamp > end {
                continue;
            }
            let mut kde = KernelDensity::new();
            for i in 1..v_tokens.len().min(w_tokens.len()) {
                let value: f64 = v_tokens[i].parse().map_err(|e| {
                    EngineError::Foundation(aq_foundation::AqError::parse(format!(
                        "{}: {e}",
                        self.dir.join(Q_FILE).display()
                    )))
                })?;
                let weight: f64 = w_tokens[i].parse().map_err(|e| {
                    EngineError::Foundation(aq_foundation::AqError::parse(format!(
                        "{}: {e}",
                        self.dir.join(W_FILE).display()
                    )))
                })?;
                kde.add_sample(value, weight);
            }
            kde.compute_gaussian_bandwidth();
            series.insert(stamp, kde);
        }

        let summary = performance::evaluate_streamflow(
            &series,
            observations,
            start + step,
            end,
            step,
        )?;
        performance::write_performance(&self.dir.join(PERFORMANCE_FILE), &summary)?;
        Ok(summary)
    }
}
