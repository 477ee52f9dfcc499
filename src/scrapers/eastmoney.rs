use crate::config::Config;
use crate::errors::{FundHubError, Result};
use crate::models::fund::{FetchRequest, FundQuote};
use crate::scrapers::base::FundScraper;
use crate::util;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const MAX_REQUEST_DELAY: Duration = Duration::from_secs(60);
const MAX_PAGES: usize = 500;

/// 天天基金（东方财富）历史净值与实时估值抓取器
pub struct EastmoneyScraper {
    client: Client,
    endpoint: String,
    quote_endpoint: String,
    page_size: usize,
    request_interval: Mutex<Duration>,
    last_request: Mutex<Option<Instant>>,
}

impl EastmoneyScraper {
    /// 创建新的抓取器，请求头和限速参数来自配置
    pub fn new(config: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, header_value(&config.user_agent)?);
        headers.insert(REFERER, header_value(&config.referer)?);
        headers.insert(ACCEPT, header_value(&config.accept)?);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            quote_endpoint: config.quote_endpoint.trim_end_matches('/').to_string(),
            page_size: config.page_size,
            request_interval: Mutex::new(config.request_delay),
            last_request: Mutex::new(None),
        })
    }

    /// 等待请求频率限制
    async fn wait_for_rate_limit(&self) {
        let interval = self.request_delay();

        let should_wait = {
            let mut last = self.last_request.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let wait = match *last {
                Some(instant) => {
                    let next_allowed = instant + interval;
                    if next_allowed > now {
                        Some(next_allowed - now)
                    } else {
                        None
                    }
                }
                None => None,
            };
            // 预占下一个请求时间槽，并发调用也按间隔排队
            *last = Some(now + wait.unwrap_or_default());
            wait
        };

        if let Some(wait_time) = should_wait {
            debug!("等待 {:?} 以遵守频率限制", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }

    /// 发送 GET 请求并按状态码分类错误
    async fn get_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        self.wait_for_rate_limit().await;

        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::FORBIDDEN {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            return Err(FundHubError::RateLimitedError {
                status: status.as_u16(),
                retry_after,
            });
        }

        if !status.is_success() {
            return Err(FundHubError::NetworkError(format!("HTTP status {} from {}", status, url)));
        }

        Ok(response.text().await?)
    }

    async fn fetch_history_page(&self, request: &FetchRequest, page_index: usize) -> Result<String> {
        let (start, end) = match request.date_range {
            Some(range) => (
                range.start.format("%Y-%m-%d").to_string(),
                range.end.format("%Y-%m-%d").to_string(),
            ),
            None => (String::new(), String::new()),
        };

        let query = [
            ("callback", "jQuery".to_string()),
            ("fundCode", request.fund_id.clone()),
            ("pageIndex", page_index.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("startDate", start),
            ("endDate", end),
            ("_", timestamp_millis().to_string()),
        ];

        self.get_text(&format!("{}/f10/lsjz", self.endpoint), &query).await
    }
}

#[async_trait]
impl FundScraper for EastmoneyScraper {
    fn source_code(&self) -> &'static str {
        "EASTMONEY"
    }

    async fn fetch_history(&self, request: &FetchRequest) -> Result<Vec<String>> {
        info!("获取基金 {} 的历史净值", request.fund_id);

        let mut pages = Vec::new();
        let mut collected = 0usize;

        for page_index in 1..=MAX_PAGES {
            let text = self.fetch_history_page(request, page_index).await?;
            let (rows, total) = peek_page(&text);
            pages.push(text);
            collected += rows;

            debug!(
                "基金 {} 第 {} 页: {} 行, 累计 {} / {:?}",
                request.fund_id, page_index, rows, collected, total
            );

            // 服务端可能限制每页行数，有 TotalCount 时只以它为准
            let done = match total {
                Some(total) => rows == 0 || collected >= total,
                None => rows == 0 || rows < self.page_size,
            };
            if done {
                break;
            }
            if page_index == MAX_PAGES {
                warn!(
                    "基金 {} 达到最大页数 {}, 已获取 {} / {:?} 行",
                    request.fund_id, MAX_PAGES, collected, total
                );
            }
        }

        info!("基金 {} 共获取 {} 页", request.fund_id, pages.len());
        Ok(pages)
    }

    async fn fetch_quote(&self, fund_id: &str) -> Result<FundQuote> {
        info!("获取基金 {} 的实时估值", fund_id);

        let url = format!("{}/js/{}.js", self.quote_endpoint, fund_id);
        let text = self
            .get_text(&url, &[("rt", timestamp_millis().to_string())])
            .await?;

        parse_quote(fund_id, &text)
    }

    fn slow_down(&self, at_least: Option<Duration>) {
        let mut interval = self.request_interval.lock().unwrap_or_else(|e| e.into_inner());
        let doubled = (*interval * 2).max(Duration::from_secs(1));
        let next = at_least.map_or(doubled, |d| d.max(doubled)).min(MAX_REQUEST_DELAY);
        info!("请求间隔由 {:?} 调整为 {:?}", *interval, next);
        *interval = next;
    }

    fn request_delay(&self) -> Duration {
        *self.request_interval.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| FundHubError::ConfigError(format!("Invalid header value: {}", value)))
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// Retry-After 可以是秒数或 HTTP 日期
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or_default())
}

/// 读取一页中的行数和总行数，解析失败交给清洗阶段报告
fn peek_page(text: &str) -> (usize, Option<usize>) {
    let json: Option<Value> = util::strip_jsonp(text).and_then(|s| serde_json::from_str(s).ok());
    let Some(json) = json else {
        return (0, None);
    };

    let rows = json
        .pointer("/Data/LSJZList")
        .and_then(|l| l.as_array())
        .map_or(0, |l| l.len());
    let total = json
        .get("TotalCount")
        .and_then(|t| t.as_u64())
        .map(|t| t as usize);

    (rows, total)
}

fn parse_quote(fund_id: &str, text: &str) -> Result<FundQuote> {
    let json_str = util::strip_jsonp(text)
        .ok_or_else(|| FundHubError::ParseError(format!("No quote available for fund {}", fund_id)))?;
    let json: Value = serde_json::from_str(json_str)?;

    let field = |key: &str| -> Option<String> {
        json.get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    };
    let decimal = |key: &str| field(key).and_then(|s| Decimal::from_str(&s).ok());

    let code = field("fundcode")
        .ok_or_else(|| FundHubError::ParseError(format!("Quote for {} has no fundcode", fund_id)))?;

    Ok(FundQuote {
        fund_id: code,
        name: field("name").unwrap_or_default(),
        net_value: decimal("dwjz"),
        net_value_date: field("jzrq").and_then(|s| util::parse_date(&s).ok()),
        estimate_value: decimal("gsz"),
        estimate_growth_pct: decimal("gszzl"),
        estimate_time: field("gztime"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_after_accepts_seconds() {
        assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("soon"), None);
    }

    #[test]
    fn retry_after_in_the_past_is_zero() {
        assert_eq!(
            parse_retry_after("Thu, 01 Jan 1970 00:00:00 GMT"),
            Some(Duration::ZERO)
        );
    }

    #[test]
    fn peek_counts_rows_and_total() {
        let text = r#"jQuery({"Data":{"LSJZList":[{"FSRQ":"2024-01-02"},{"FSRQ":"2024-01-03"}]},"TotalCount":5});"#;
        assert_eq!(peek_page(text), (2, Some(5)));
        assert_eq!(peek_page("oops"), (0, None));
    }

    #[test]
    fn quote_fields_are_parsed() {
        let text = r#"jsonpgz({"fundcode":"110022","name":"易方达消费行业股票","jzrq":"2024-05-10","dwjz":"3.4120","gsz":"3.4301","gszzl":"0.53","gztime":"2024-05-13 15:00"});"#;
        let quote = parse_quote("110022", text).unwrap();
        assert_eq!(quote.fund_id, "110022");
        assert_eq!(quote.net_value, Some(Decimal::from_str("3.4120").unwrap()));
        assert_eq!(quote.estimate_growth_pct, Some(Decimal::from_str("0.53").unwrap()));
        assert_eq!(quote.net_value_date, util::parse_date("2024-05-10").ok());
        assert_eq!(quote.estimate_time.as_deref(), Some("2024-05-13 15:00"));
    }

    #[test]
    fn empty_quote_is_a_parse_error() {
        let err = parse_quote("999999", "jsonpgz();").unwrap_err();
        assert!(matches!(err, FundHubError::ParseError(_)));
    }

    #[test]
    fn slow_down_doubles_and_caps() {
        let scraper = EastmoneyScraper::new(&Config::new().with_request_delay(Duration::from_secs(2))).unwrap();
        scraper.slow_down(None);
        assert_eq!(scraper.request_delay(), Duration::from_secs(4));
        scraper.slow_down(Some(Duration::from_secs(30)));
        assert_eq!(scraper.request_delay(), Duration::from_secs(30));
        scraper.slow_down(Some(Duration::from_secs(600)));
        assert_eq!(scraper.request_delay(), MAX_REQUEST_DELAY);
    }
}
