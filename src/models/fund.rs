use crate::errors::{FundHubError, Result};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

/// 单只基金某一日的净值记录
///
/// 创建后不可修改；`net_value` 始终大于零。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundRecord {
    fund_id: String,
    date: NaiveDate,
    net_value: Decimal,
    cumulative_value: Option<Decimal>,
    daily_growth_pct: Option<Decimal>,
}

impl FundRecord {
    pub fn new(
        fund_id: &str,
        date: NaiveDate,
        net_value: Decimal,
        cumulative_value: Option<Decimal>,
        daily_growth_pct: Option<Decimal>,
    ) -> Result<Self> {
        if fund_id.trim().is_empty() {
            return Err(FundHubError::ValidationError("fund id is empty".to_string()));
        }
        if net_value <= Decimal::ZERO {
            return Err(FundHubError::ValidationError(format!(
                "net value {} for {} on {} is not positive",
                net_value, fund_id, date
            )));
        }

        Ok(Self {
            fund_id: fund_id.to_string(),
            date,
            net_value,
            cumulative_value,
            daily_growth_pct,
        })
    }

    pub fn fund_id(&self) -> &str {
        &self.fund_id
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn net_value(&self) -> Decimal {
        self.net_value
    }

    pub fn cumulative_value(&self) -> Option<Decimal> {
        self.cumulative_value
    }

    pub fn daily_growth_pct(&self) -> Option<Decimal> {
        self.daily_growth_pct
    }
}

/// 闭区间日期范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            return Err(FundHubError::ValidationError(format!(
                "start date {} is after end date {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }
}

/// 一次抓取请求，`retry_count` 为网络错误时允许的额外尝试次数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub fund_id: String,
    pub date_range: Option<DateRange>,
    pub retry_count: u32,
}

impl FetchRequest {
    pub fn new(fund_id: &str) -> Self {
        Self {
            fund_id: fund_id.trim().to_string(),
            date_range: None,
            retry_count: 0,
        }
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_retry_count(mut self, retries: u32) -> Self {
        self.retry_count = retries;
        self
    }
}

/// 基金实时估值（天天基金 fundgz 接口）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FundQuote {
    pub fund_id: String,
    pub name: String,
    pub net_value: Option<Decimal>,
    pub net_value_date: Option<NaiveDate>,
    pub estimate_value: Option<Decimal>,
    pub estimate_growth_pct: Option<Decimal>,
    pub estimate_time: Option<String>,
}
