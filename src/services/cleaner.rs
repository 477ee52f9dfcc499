//! 原始响应清洗：解析、过滤缺失与非法行、类型转换。

use crate::errors::{FundHubError, Result};
use crate::models::fund::FundRecord;
use crate::util;
use chrono::NaiveDate;
use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 目标字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Date,
    NetValue,
    CumulativeValue,
    DailyGrowthPct,
}

/// 列的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Date,
    Decimal,
}

#[derive(Debug, Clone)]
pub struct Column {
    pub source: &'static str,
    pub field: Field,
    pub kind: ColumnKind,
    pub required: bool,
}

/// 期望的响应结构：行数组所在位置及列映射
#[derive(Debug, Clone)]
pub struct Schema {
    pub rows_pointer: &'static str,
    pub columns: Vec<Column>,
}

impl Schema {
    /// 天天基金 lsjz 接口：FSRQ 净值日期, DWJZ 单位净值, LJJZ 累计净值, JZZZL 日增长率
    pub fn eastmoney_history() -> Self {
        Self {
            rows_pointer: "/Data/LSJZList",
            columns: vec![
                Column { source: "FSRQ", field: Field::Date, kind: ColumnKind::Date, required: true },
                Column { source: "DWJZ", field: Field::NetValue, kind: ColumnKind::Decimal, required: true },
                Column { source: "LJJZ", field: Field::CumulativeValue, kind: ColumnKind::Decimal, required: false },
                Column { source: "JZZZL", field: Field::DailyGrowthPct, kind: ColumnKind::Decimal, required: false },
            ],
        }
    }

    fn column(&self, field: Field) -> Option<&Column> {
        self.columns.iter().find(|c| c.field == field)
    }
}

/// 行被丢弃的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    MalformedRow,
    MissingField,
    NonPositiveNetValue,
    InvalidDate,
    InvalidNumber,
    DuplicateDate,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::MalformedRow => "malformed row",
            DropReason::MissingField => "missing field",
            DropReason::NonPositiveNetValue => "non-positive net value",
            DropReason::InvalidDate => "invalid date",
            DropReason::InvalidNumber => "invalid number",
            DropReason::DuplicateDate => "duplicate date",
        };
        f.write_str(s)
    }
}

/// 按原因统计的丢弃数量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DropSummary {
    pub malformed_row: usize,
    pub missing_field: usize,
    pub non_positive_net_value: usize,
    pub invalid_date: usize,
    pub invalid_number: usize,
    pub duplicate_date: usize,
}

impl DropSummary {
    pub fn record(&mut self, reason: DropReason) {
        match reason {
            DropReason::MalformedRow => self.malformed_row += 1,
            DropReason::MissingField => self.missing_field += 1,
            DropReason::NonPositiveNetValue => self.non_positive_net_value += 1,
            DropReason::InvalidDate => self.invalid_date += 1,
            DropReason::InvalidNumber => self.invalid_number += 1,
            DropReason::DuplicateDate => self.duplicate_date += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.malformed_row
            + self.missing_field
            + self.non_positive_net_value
            + self.invalid_date
            + self.invalid_number
            + self.duplicate_date
    }

    pub fn merge(&mut self, other: &DropSummary) {
        self.malformed_row += other.malformed_row;
        self.missing_field += other.missing_field;
        self.non_positive_net_value += other.non_positive_net_value;
        self.invalid_date += other.invalid_date;
        self.invalid_number += other.invalid_number;
        self.duplicate_date += other.duplicate_date;
    }
}

impl fmt::Display for DropSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            (DropReason::MalformedRow, self.malformed_row),
            (DropReason::MissingField, self.missing_field),
            (DropReason::NonPositiveNetValue, self.non_positive_net_value),
            (DropReason::InvalidDate, self.invalid_date),
            (DropReason::InvalidNumber, self.invalid_number),
            (DropReason::DuplicateDate, self.duplicate_date),
        ]
        .iter()
        .filter(|(_, n)| *n > 0)
        .map(|(reason, n)| format!("{}: {}", reason, n))
        .collect();

        if parts.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

/// 清洗结果
#[derive(Debug, Clone, Default)]
pub struct CleanOutcome {
    /// 通过校验的记录，按日期升序
    pub records: Vec<FundRecord>,
    /// 原始行数
    pub fetched: usize,
    pub drops: DropSummary,
}

/// 清洗单个响应
pub fn clean(fund_id: &str, payload: &str, schema: &Schema) -> Result<CleanOutcome> {
    clean_pages(fund_id, &[payload.to_string()], schema)
}

/// 清洗同一基金的多页响应，同一日期重复出现时保留最后一次
pub fn clean_pages(fund_id: &str, pages: &[String], schema: &Schema) -> Result<CleanOutcome> {
    if fund_id.trim().is_empty() {
        return Err(FundHubError::ValidationError("fund id is empty".to_string()));
    }

    let mut by_date: BTreeMap<NaiveDate, FundRecord> = BTreeMap::new();
    let mut drops = DropSummary::default();
    let mut fetched = 0usize;

    for page in pages {
        let rows = extract_rows(page, schema)?;
        fetched += rows.len();

        for (i, row) in rows.iter().enumerate() {
            match clean_row(fund_id, row, schema) {
                Ok(record) => {
                    if by_date.insert(record.date(), record).is_some() {
                        drops.record(DropReason::DuplicateDate);
                    }
                }
                Err(reason) => {
                    debug!("基金 {} 第 {} 行被丢弃 ({}): {}", fund_id, i, reason, row);
                    drops.record(reason);
                }
            }
        }
    }

    let records: Vec<FundRecord> = by_date.into_values().collect();

    if drops.total() > 0 {
        warn!(
            "基金 {}: {} 行中 {} 行有效, 丢弃 {} 行 ({})",
            fund_id,
            fetched,
            records.len(),
            drops.total(),
            drops
        );
    } else {
        info!("基金 {}: {} 行全部有效", fund_id, fetched);
    }

    Ok(CleanOutcome {
        records,
        fetched,
        drops,
    })
}

/// 解析响应并取出行数组；结构不符即视为接口变更
fn extract_rows(payload: &str, schema: &Schema) -> Result<Vec<Value>> {
    let json_str = util::strip_jsonp(payload).ok_or_else(|| {
        FundHubError::ParseError(format!("payload is not JSON: {}", preview(payload)))
    })?;
    let json: Value = serde_json::from_str(json_str)
        .map_err(|e| FundHubError::ParseError(format!("payload is not valid JSON: {}", e)))?;

    if let Some(code) = json.get("ErrCode").and_then(|c| c.as_i64()) {
        if code != 0 {
            let msg = json.get("ErrMsg").and_then(|m| m.as_str()).unwrap_or("unknown");
            return Err(FundHubError::ParseError(format!("provider error {}: {}", code, msg)));
        }
    }

    let rows = json
        .pointer(schema.rows_pointer)
        .and_then(|r| r.as_array())
        .ok_or_else(|| {
            FundHubError::ParseError(format!("expected array at {} not found", schema.rows_pointer))
        })?;

    // 必填列在所有行中都不存在，说明字段名已变化
    if !rows.is_empty() {
        for column in schema.columns.iter().filter(|c| c.required) {
            let present = rows
                .iter()
                .any(|r| r.as_object().map_or(false, |o| o.contains_key(column.source)));
            if !present {
                return Err(FundHubError::ParseError(format!(
                    "column {} missing from every row",
                    column.source
                )));
            }
        }
    }

    Ok(rows.clone())
}

fn clean_row(fund_id: &str, row: &Value, schema: &Schema) -> std::result::Result<FundRecord, DropReason> {
    let object = row.as_object().ok_or(DropReason::MalformedRow)?;

    // 1. 必填字段缺失
    for column in schema.columns.iter().filter(|c| c.required) {
        if raw_value(object, column.source).is_none() {
            return Err(DropReason::MissingField);
        }
    }

    // 2. 单位净值必须为正
    let net_column = schema.column(Field::NetValue).ok_or(DropReason::MissingField)?;
    let net_raw = raw_value(object, net_column.source).ok_or(DropReason::MissingField)?;
    if let Ok(net) = parse_decimal(&net_raw) {
        if net <= Decimal::ZERO {
            return Err(DropReason::NonPositiveNetValue);
        }
    }

    // 3. 日期列
    let mut date = None;
    for column in schema.columns.iter().filter(|c| c.kind == ColumnKind::Date) {
        if let Some(raw) = raw_value(object, column.source) {
            let parsed = util::parse_date(&raw).map_err(|_| DropReason::InvalidDate)?;
            if column.field == Field::Date {
                date = Some(parsed);
            }
        }
    }

    // 4. 数值列，可选列无值时为 None
    let mut net_value = None;
    let mut cumulative_value = None;
    let mut daily_growth_pct = None;
    for column in schema.columns.iter().filter(|c| c.kind == ColumnKind::Decimal) {
        if let Some(raw) = raw_value(object, column.source) {
            let value = parse_decimal(&raw).map_err(|_| DropReason::InvalidNumber)?;
            match column.field {
                Field::NetValue => net_value = Some(value),
                Field::CumulativeValue => cumulative_value = Some(value),
                Field::DailyGrowthPct => daily_growth_pct = Some(value),
                Field::Date => {}
            }
        }
    }

    let date = date.ok_or(DropReason::MissingField)?;
    let net_value = net_value.ok_or(DropReason::MissingField)?;

    FundRecord::new(fund_id, date, net_value, cumulative_value, daily_growth_pct)
        .map_err(|_| DropReason::NonPositiveNetValue)
}

/// null、空字符串与缺失的键都视为无值
fn raw_value(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || s == "--" {
                None
            } else {
                Some(s.to_string())
            }
        }
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

fn parse_decimal(raw: &str) -> std::result::Result<Decimal, rust_decimal::Error> {
    let s = raw.trim().trim_end_matches('%');
    Decimal::from_str(s).or_else(|_| Decimal::from_scientific(s))
}

fn preview(payload: &str) -> String {
    payload.chars().take(80).collect()
}
