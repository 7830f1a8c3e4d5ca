// crates/aq_foundation/src/timefmt.rs

//! 日期时间格式表
//!
//! 系统各处文件交换沿用五种固定的时间戳格式：
//!
//! | 常量 | 模式 | 用途 |
//! |---|---|---|
//! | [`FMT_FOLDER`] | `2020-03-01 06.00` | 每步模型临时目录名 |
//! | [`FMT_STATE_FILE`] | `20200301 06-00` | 状态归档文件名、报告行 |
//! | [`FMT_FLOW_TABLE`] | `03.01.2020-06:00:00` | 模拟器 `Stream.Flow` 表 |
//! | [`FMT_AGGREGATE_TABLE`] | `03/01/2020-06:00:00` | 模拟器 `Aggregated.Values` 表 |
//! | [`FMT_REPORT`] | `03/01/2020 06:00` | 人读报告 |
//!
//! 文件名里的冒号非法，因此目录/文件类格式用 `.` 与 `-` 代替。

use crate::error::{AqError, AqResult};
use chrono::NaiveDateTime;

/// 每步模型目录名格式
pub const FMT_FOLDER: &str = "%Y-%m-%d %H.%M";

/// 状态归档文件名格式
pub const FMT_STATE_FILE: &str = "%Y%m%d %H-%M";

/// 流量输出表时间戳格式
pub const FMT_FLOW_TABLE: &str = "%m.%d.%Y-%H:%M:%S";

/// 聚合输出表时间戳格式
pub const FMT_AGGREGATE_TABLE: &str = "%m/%d/%Y-%H:%M:%S";

/// 报告时间戳格式
pub const FMT_REPORT: &str = "%m/%d/%Y %H:%M";

/// 格式化为目录名
pub fn format_folder(t: NaiveDateTime) -> String {
    t.format(FMT_FOLDER).to_string()
}

/// 格式化为状态文件戳
pub fn format_state_stamp(t: NaiveDateTime) -> String {
    t.format(FMT_STATE_FILE).to_string()
}

/// 格式化为报告戳
pub fn format_report(t: NaiveDateTime) -> String {
    t.format(FMT_REPORT).to_string()
}

/// 解析状态文件戳
pub fn parse_state_stamp(s: &str) -> AqResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, FMT_STATE_FILE)
        .map_err(|e| AqError::parse(format!("状态时间戳 '{s}': {e}")))
}

/// 解析流量表时间戳
pub fn parse_flow_stamp(s: &str) -> AqResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, FMT_FLOW_TABLE)
        .map_err(|e| AqError::parse(format!("流量表时间戳 '{s}': {e}")))
}

/// 解析聚合表时间戳
pub fn parse_aggregate_stamp(s: &str) -> AqResult<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, FMT_AGGREGATE_TABLE)
        .map_err(|e| AqError::parse(format!("聚合表时间戳 '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 3, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_folder_format() {
        assert_eq!(format_folder(stamp()), "2020-03-01 06.00");
    }

    #[test]
    fn test_state_stamp_round_trip() {
        let s = format_state_stamp(stamp());
        assert_eq!(s, "20200301 06-00");
        assert_eq!(parse_state_stamp(&s).unwrap(), stamp());
    }

    #[test]
    fn test_flow_stamp_parse() {
        let t = parse_flow_stamp("03.01.2020-06:00:00").unwrap();
        assert_eq!(t, stamp());
    }

    #[test]
    fn test_aggregate_stamp_parse() {
        let t = parse_aggregate_stamp("03/01/2020-06:00:00").unwrap();
        assert_eq!(t, stamp());
    }

    #[test]
    fn test_parse_error_carries_input() {
        let err = parse_state_stamp("not a stamp").unwrap_err();
        assert!(err.to_string().contains("not a stamp"));
    }
}
