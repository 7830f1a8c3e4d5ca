// crates/aq_sim/src/tables.rs

//! 模拟器输出表解析
//!
//! 两张空白符分隔的表：
//!
//! - `output/Stream.Flow`：时间戳 `MM.dd.yyyy-HH:mm:ss`，
//!   第 5 列为流量 [m³/h]，读入时除以 3.6 换算为 [L/s]
//! - `output/Aggregated.Values`：时间戳 `MM/dd/yyyy-HH:mm:ss`，
//!   第 9 列为蒸散发，第 31–33 列为三层土壤含水量
//!
//! 模拟器中途被终止会留下截断的表。解析在第一个坏行处停止并
//! 返回已读出的前缀——部分成功的运行只贡献它完成的时段。

use crate::error::{SimError, SimResult};
use aq_foundation::timefmt;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

/// 流量表文件名
pub const STREAMFLOW_FILE: &str = "Stream.Flow";

/// 聚合值表文件名
pub const AGGREGATED_FILE: &str = "Aggregated.Values";

/// m³/h 到 L/s 的换算除数
const DISCHARGE_DIVISOR: f64 = 3.6;

/// 聚合值表的一行
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatedRow {
    /// 蒸散发
    pub evaporation: f64,
    /// 三层土壤含水量
    pub soil_moisture: [f64; 3],
}

/// 读取流量表，换算为 L/s
pub fn read_streamflow(path: &Path) -> SimResult<BTreeMap<NaiveDateTime, f64>> {
    if !path.exists() {
        return Err(SimError::MissingOutput(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let mut table = BTreeMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let parsed = parse_flow_row(&tokens);
        match parsed {
            Some((stamp, discharge)) => {
                table.insert(stamp, discharge / DISCHARGE_DIVISOR);
            }
            None => {
                warn!(
                    "truncated row in {}, keeping {} parsed row(s)",
                    path.display(),
                    table.len()
                );
                break;
            }
        }
    }
    Ok(table)
}

fn parse_flow_row(tokens: &[&str]) -> Option<(NaiveDateTime, f64)> {
    let stamp = timefmt::parse_flow_stamp(tokens.first()?).ok()?;
    let discharge: f64 = tokens.get(4)?.parse().ok()?;
    Some((stamp, discharge))
}

/// 读取聚合值表
pub fn read_aggregated(
    path: &Path,
) -> SimResult<BTreeMap<NaiveDateTime, AggregatedRow>> {
    if !path.exists() {
        return Err(SimError::MissingOutput(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let mut table = BTreeMap::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match parse_aggregated_row(&tokens) {
            Some((stamp, row)) => {
                table.insert(stamp, row);
            }
            None => {
                warn!(
                    "truncated row in {}, keeping {} parsed row(s)",
                    path.display(),
                    table.len()
                );
                break;
            }
        }
    }
    Ok(table)
}

fn parse_aggregated_row(tokens: &[&str]) -> Option<(NaiveDateTime, AggregatedRow)> {
    let stamp = timefmt::parse_aggregate_stamp(tokens.first()?).ok()?;
    let evaporation: f64 = tokens.get(8)?.parse().ok()?;
    let sm1: f64 = tokens.get(30)?.parse().ok()?;
    let sm2: f64 = tokens.get(31)?.parse().ok()?;
    let sm3: f64 = tokens.get(32)?.parse().ok()?;
    Some((
        stamp,
        AggregatedRow {
            evaporation,
            soil_moisture: [sm1, sm2, sm3],
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stamp(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 3, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn aggregated_line(stamp: &str, evaporation: f64, sm: [f64; 3]) -> String {
        // 构造 33 列：第 9 列蒸散发，第 31–33 列土壤含水量
        let mut cols = vec!["0.0".to_string(); 33];
        cols[0] = stamp.to_string();
        cols[8] = evaporation.to_string();
        cols[30] = sm[0].to_string();
        cols[31] = sm[1].to_string();
        cols[32] = sm[2].to_string();
        cols.join(" ")
    }

    #[test]
    fn test_streamflow_conversion_to_l_per_s() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STREAMFLOW_FILE);
        std::fs::write(
            &path,
            "03.01.2020-06:00:00 1 2 3 36.0\n03.01.2020-07:00:00 1 2 3 7.2\n",
        )
        .unwrap();
        let table = read_streamflow(&path).unwrap();
        assert_eq!(table.len(), 2);
        assert!((table[&stamp(6)] - 10.0).abs() < 1e-12);
        assert!((table[&stamp(7)] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_streamflow_truncated_row_keeps_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STREAMFLOW_FILE);
        std::fs::write(
            &path,
            "03.01.2020-06:00:00 1 2 3 36.0\n03.01.2020-07:00:00 1 2\n",
        )
        .unwrap();
        let table = read_streamflow(&path).unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.contains_key(&stamp(6)));
    }

    #[test]
    fn test_missing_file_is_typed_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STREAMFLOW_FILE);
        assert!(matches!(
            read_streamflow(&path),
            Err(SimError::MissingOutput(_))
        ));
    }

    #[test]
    fn test_aggregated_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGGREGATED_FILE);
        let line = aggregated_line("03/01/2020-06:00:00", 0.125, [0.31, 0.32, 0.33]);
        std::fs::write(&path, format!("{line}\n")).unwrap();
        let table = read_aggregated(&path).unwrap();
        let row = table[&stamp(6)];
        assert!((row.evaporation - 0.125).abs() < 1e-12);
        assert_eq!(row.soil_moisture, [0.31, 0.32, 0.33]);
    }

    #[test]
    fn test_aggregated_short_row_stops_parse() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(AGGREGATED_FILE);
        let good = aggregated_line("03/01/2020-06:00:00", 0.1, [0.3, 0.3, 0.3]);
        std::fs::write(&path, format!("{good}\n03/01/2020-07:00:00 0.2\n")).unwrap();
        let table = read_aggregated(&path).unwrap();
        assert_eq!(table.len(), 1);
    }
}
