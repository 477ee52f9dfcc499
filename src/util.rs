use chrono::{Duration, NaiveDate, Utc};
use chrono_tz::Asia::Shanghai;
use crate::errors::{FundHubError, Result};
use crate::models::fund::DateRange;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

// 日期转换工具
pub fn parse_date(date_str: &str) -> Result<NaiveDate> {
    let trimmed = date_str.trim();
    // 部分接口返回带时间的日期，如 "2024-01-02 00:00:00"
    let date_part = trimmed.split_whitespace().next().unwrap_or(trimmed);

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(date_part, format) {
            return Ok(date);
        }
    }

    Err(FundHubError::ValidationError(format!("Invalid date format: {}", date_str)))
}

/// 基金净值按北京时间公布，"今天" 以上海时区为准
pub fn today_in_market() -> NaiveDate {
    Utc::now().with_timezone(&Shanghai).date_naive()
}

/// 截止到 `end`、向前 `days` 天的默认抓取窗口
pub fn default_range(end: NaiveDate, days: i64) -> DateRange {
    DateRange {
        start: end - Duration::days(days),
        end,
    }
}

/// 去掉 JSONP 包装，返回第一个 '{' 到最后一个 '}' 之间的内容
pub fn strip_jsonp(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

pub fn is_valid_fund_id(fund_id: &str) -> bool {
    !fund_id.is_empty()
        && fund_id.len() <= 12
        && fund_id.chars().all(|c| c.is_ascii_alphanumeric())
}

/// 解析逗号分隔的基金代码列表，去重并保持原有顺序
///
/// 不校验单个代码，非法代码留给流水线按基金报告失败。
pub fn parse_fund_ids(list: &str) -> Result<Vec<String>> {
    let mut ids: Vec<String> = Vec::new();

    for raw in list.split(',') {
        let id = raw.trim();
        if id.is_empty() {
            continue;
        }
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    if ids.is_empty() {
        return Err(FundHubError::ConfigError("No fund ids given".to_string()));
    }

    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        assert_eq!(parse_date("2024-01-02").unwrap(), expected);
        assert_eq!(parse_date("2024/01/02").unwrap(), expected);
        assert_eq!(parse_date("20240102").unwrap(), expected);
        assert_eq!(parse_date("2024-01-02 00:00:00").unwrap(), expected);
    }

    #[test]
    fn rejects_garbage_dates() {
        assert!(parse_date("not-a-date").is_err());
        assert!(parse_date("2024-13-40").is_err());
        assert!(parse_date("").is_err());
    }

    #[test]
    fn strips_jsonp_wrappers() {
        assert_eq!(strip_jsonp("jQuery123({\"a\":1});"), Some("{\"a\":1}"));
        assert_eq!(strip_jsonp("jsonpgz({\"fundcode\":\"000001\"});"), Some("{\"fundcode\":\"000001\"}"));
        assert_eq!(strip_jsonp("{\"plain\":true}"), Some("{\"plain\":true}"));
        assert_eq!(strip_jsonp("<html>blocked</html>"), None);
    }

    #[test]
    fn fund_id_list_is_deduplicated() {
        let ids = parse_fund_ids("000001, 110022,000001,,161725").unwrap();
        assert_eq!(ids, vec!["000001", "110022", "161725"]);
    }

    #[test]
    fn fund_id_list_keeps_bad_ids_for_the_pipeline() {
        let ids = parse_fund_ids("000001,11-0022,161725").unwrap();
        assert_eq!(ids, vec!["000001", "11-0022", "161725"]);
        assert!(!is_valid_fund_id(&ids[1]));
        assert!(parse_fund_ids(" , ").is_err());
    }

    #[test]
    fn default_range_spans_requested_days() {
        let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        let range = default_range(end, 365);
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(range.end, end);
    }
}
