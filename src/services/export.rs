use crate::errors::{FundHubError, Result};
use crate::models::fund::FundRecord;
use crate::store::FundStore;
use log::info;
use std::path::Path;

const HEADER: [&str; 5] = ["fund_id", "date", "net_value", "cumulative_value", "daily_growth_pct"];

/// 导出文件的默认名称
pub fn default_export_path(fund_id: &str) -> String {
    format!("{}_data.csv", fund_id)
}

/// 将净值记录写成 CSV，空值输出为空字段
pub fn records_to_csv(records: &[FundRecord]) -> Result<String> {
    let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(vec![]);
    wtr.write_record(HEADER)?;
    for record in records {
        wtr.serialize(record)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| FundHubError::IoError(e.into_error()))?;
    String::from_utf8(data).map_err(|e| FundHubError::ParseError(format!("CSV output is not UTF-8: {}", e)))
}

/// 导出某只基金的全部历史（按日期升序），返回写出的行数
pub fn export_fund(store: &FundStore, fund_id: &str, path: &str) -> Result<usize> {
    let records = store.history(fund_id)?;
    if records.is_empty() {
        return Ok(0);
    }

    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }

    std::fs::write(path, records_to_csv(&records)?)?;
    info!("导出基金 {} 共 {} 条记录到 {}", fund_id, records.len(), path);
    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn record(date: &str, net: &str, growth: Option<&str>) -> FundRecord {
        FundRecord::new(
            "110022",
            NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            Decimal::from_str(net).unwrap(),
            Some(Decimal::from_str(net).unwrap()),
            growth.map(|g| Decimal::from_str(g).unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn csv_has_header_and_empty_optional_fields() {
        let csv = records_to_csv(&[
            record("2024-01-02", "3.4120", Some("-0.35")),
            record("2024-01-03", "3.4300", None),
        ])
        .unwrap();

        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "fund_id,date,net_value,cumulative_value,daily_growth_pct");
        assert_eq!(lines[1], "110022,2024-01-02,3.4120,3.4120,-0.35");
        assert_eq!(lines[2], "110022,2024-01-03,3.4300,3.4300,");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn empty_export_is_header_only() {
        let csv = records_to_csv(&[]).unwrap();
        assert_eq!(csv.trim_end(), "fund_id,date,net_value,cumulative_value,daily_growth_pct");
    }

    #[test]
    fn exports_stored_history_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out").join(default_export_path("110022"));
        let store = FundStore::in_memory().unwrap();
        store
            .write(&[record("2024-01-03", "3.43", None), record("2024-01-02", "3.41", None)])
            .unwrap();

        let written = export_fund(&store, "110022", out.to_str().unwrap()).unwrap();
        assert_eq!(written, 2);

        let content = std::fs::read_to_string(&out).unwrap();
        let dates: Vec<&str> = content
            .lines()
            .skip(1)
            .map(|l| l.split(',').nth(1).unwrap())
            .collect();
        assert_eq!(dates, vec!["2024-01-02", "2024-01-03"]);

        assert_eq!(export_fund(&store, "000001", out.to_str().unwrap()).unwrap(), 0);
    }
}
