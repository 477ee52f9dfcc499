use crate::config::Config;
use crate::errors::{FundHubError, Result};
use crate::models::fund::{DateRange, FetchRequest};
use crate::scrapers::base::FundScraper;
use crate::services::cleaner::{self, DropSummary, Schema};
use crate::store::{FundStore, WriteReport};
use crate::util;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use log::{error, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 单只基金一次处理的结果
#[derive(Debug)]
pub struct FundReport {
    pub fund_id: String,
    pub fetched: usize,
    pub valid: usize,
    pub drops: DropSummary,
    pub write: Option<WriteReport>,
    pub attempts: u32,
    pub error: Option<FundHubError>,
    pub skipped: bool,
}

impl FundReport {
    pub fn new(fund_id: &str) -> Self {
        Self {
            fund_id: fund_id.to_string(),
            fetched: 0,
            valid: 0,
            drops: DropSummary::default(),
            write: None,
            attempts: 0,
            error: None,
            skipped: false,
        }
    }

    pub fn failed(fund_id: &str, error: FundHubError) -> Self {
        let mut report = Self::new(fund_id);
        report.error = Some(error);
        report
    }

    pub fn skipped(fund_id: &str) -> Self {
        let mut report = Self::new(fund_id);
        report.skipped = true;
        report
    }

    /// 有有效记录且全部写入成功
    pub fn is_success(&self) -> bool {
        !self.skipped
            && self.error.is_none()
            && self.valid > 0
            && self.write.as_ref().map_or(false, |w| w.is_complete())
    }

    /// 单只基金运行的进程退出码
    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    pub fn status(&self) -> String {
        if self.skipped {
            return "skipped".to_string();
        }
        if let Some(e) = &self.error {
            return format!("failed ({})", e.kind());
        }
        match &self.write {
            None => "empty".to_string(),
            Some(w) if w.is_complete() => "ok".to_string(),
            Some(w) => format!("partial ({} of {} not stored)", w.failed, w.written + w.failed),
        }
    }
}

impl fmt::Display for FundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<8} {:<10} fetched {:>5}  valid {:>5}  dropped {:>4}",
            self.fund_id,
            self.status(),
            self.fetched,
            self.valid,
            self.drops.total()
        )?;
        if self.drops.total() > 0 {
            write!(f, " [{}]", self.drops)?;
        }
        match (&self.write, &self.error) {
            (_, Some(e)) => write!(f, "  store: not written ({})", e),
            (Some(w), None) => write!(f, "  store: {} written, {} failed", w.written, w.failed),
            (None, None) => write!(f, "  store: nothing to write"),
        }
    }
}

/// 一批基金的处理结果，顺序与输入一致
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<FundReport>,
    pub elapsed: Duration,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        !self.reports.is_empty() && self.reports.iter().all(|r| r.is_success())
    }

    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.is_success()).count()
    }

    pub fn skipped(&self) -> usize {
        self.reports.iter().filter(|r| r.skipped).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.succeeded() - self.skipped()
    }

    /// 批量运行的进程退出码：任一基金未成功即为 2
    pub fn exit_code(&self) -> i32 {
        if self.all_succeeded() {
            0
        } else {
            2
        }
    }

    pub fn report_for(&self, fund_id: &str) -> Option<&FundReport> {
        self.reports.iter().find(|r| r.fund_id == fund_id)
    }

    pub fn log_summary(&self, operation: &str) {
        info!(
            "{} 完成: total {}, success {}, failed {}, skipped {}, elapsed {:.1}s",
            operation,
            self.reports.len(),
            self.succeeded(),
            self.failed(),
            self.skipped(),
            self.elapsed.as_secs_f64()
        );
    }
}

/// 抓取 → 清洗 → 存储 流水线
pub struct FundPipeline {
    config: Config,
    scraper: Arc<dyn FundScraper + Send + Sync>,
    store: Arc<FundStore>,
    schema: Schema,
}

impl FundPipeline {
    pub fn new(config: Config, scraper: Arc<dyn FundScraper + Send + Sync>, store: Arc<FundStore>) -> Self {
        Self {
            config,
            scraper,
            store,
            schema: Schema::eastmoney_history(),
        }
    }

    pub fn store(&self) -> &FundStore {
        &self.store
    }

    /// 生成抓取请求
    ///
    /// 未指定开始日期时，从库中最新日期续抓；库中没有记录或 `full` 为真时抓取默认窗口。
    pub fn plan_request(
        &self,
        fund_id: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        full: bool,
    ) -> Result<FetchRequest> {
        if !util::is_valid_fund_id(fund_id) {
            return Err(FundHubError::ValidationError(format!("Invalid fund id: {}", fund_id)));
        }

        let end = end.unwrap_or_else(util::today_in_market);
        let start = match start {
            Some(start) => start,
            None => {
                let latest = if full { None } else { self.store.latest_date(fund_id)? };
                match latest {
                    Some(latest) => {
                        info!("基金 {} 增量更新，从 {} 开始", fund_id, latest);
                        latest.min(end)
                    }
                    None => util::default_range(end, self.config.history_days).start,
                }
            }
        };

        Ok(FetchRequest::new(fund_id)
            .with_date_range(DateRange::new(start, end)?)
            .with_retry_count(self.config.retry_limit))
    }

    /// 处理单只基金，错误记录在报告中而不是向上传播
    pub async fn process(&self, request: FetchRequest) -> FundReport {
        let started = Instant::now();
        let mut report = FundReport::new(&request.fund_id);
        info!("Processing fund: {}", request.fund_id);

        let pages = match self.fetch_with_retry(&request, &mut report).await {
            Ok(pages) => pages,
            Err(e) => {
                error!("Failed to fetch fund {}: {}", request.fund_id, e);
                report.error = Some(e);
                return report;
            }
        };

        let outcome = match cleaner::clean_pages(&request.fund_id, &pages, &self.schema) {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to parse payload for fund {}: {}", request.fund_id, e);
                report.error = Some(e);
                return report;
            }
        };

        report.fetched = outcome.fetched;
        report.valid = outcome.records.len();
        report.drops = outcome.drops;

        if outcome.records.is_empty() {
            warn!("No valid records for fund {}", request.fund_id);
            return report;
        }

        match self.store.write(&outcome.records) {
            Ok(write) => {
                if !write.is_complete() {
                    warn!("Fund {}: {} records failed to store", request.fund_id, write.failed);
                }
                report.write = Some(write);
            }
            Err(e) => {
                error!("Failed to store fund {}: {}", request.fund_id, e);
                report.error = Some(e);
            }
        }

        info!(
            "Processed fund {} in {:.2}s: {}",
            request.fund_id,
            started.elapsed().as_secs_f64(),
            report.status()
        );
        report
    }

    /// 使用默认窗口（或增量）处理一只基金
    pub async fn run_fund(&self, fund_id: &str) -> FundReport {
        match self.plan_request(fund_id, None, None, false) {
            Ok(request) => self.process(request).await,
            Err(e) => {
                error!("Cannot plan request for fund {}: {}", fund_id, e);
                FundReport::failed(fund_id, e)
            }
        }
    }

    /// 批量处理，并发数受 `max_concurrency` 限制；单只失败不影响其他基金
    pub async fn process_batch(&self, fund_ids: &[String]) -> BatchReport {
        let started = Instant::now();
        let mut unique: Vec<&str> = Vec::new();
        for id in fund_ids {
            if !unique.contains(&id.as_str()) {
                unique.push(id.as_str());
            }
        }

        let concurrency = self.config.max_concurrency.max(1);
        info!("Processing {} funds with concurrency {}", unique.len(), concurrency);

        let reports: Vec<FundReport> = stream::iter(unique)
            .map(|id| self.run_fund(id))
            .buffered(concurrency)
            .collect()
            .await;

        BatchReport {
            reports,
            elapsed: started.elapsed(),
        }
    }

    /// 网络错误按指数退避重试；限流时放慢抓取器并放弃该基金
    async fn fetch_with_retry(&self, request: &FetchRequest, report: &mut FundReport) -> Result<Vec<String>> {
        let mut attempt: u32 = 0;
        loop {
            report.attempts = attempt + 1;
            match self.scraper.fetch_history(request).await {
                Ok(pages) => return Ok(pages),
                Err(FundHubError::RateLimitedError { status, retry_after }) => {
                    warn!(
                        "Fund {} rate limited (HTTP {}), not retrying; slowing down requests",
                        request.fund_id, status
                    );
                    self.scraper.slow_down(retry_after);
                    return Err(FundHubError::RateLimitedError { status, retry_after });
                }
                Err(e) if e.is_retryable() && attempt < request.retry_count => {
                    let wait = self.backoff(attempt);
                    attempt += 1;
                    warn!(
                        "Fetch for {} failed ({}), retry {}/{} in {:?}",
                        request.fund_id, e, attempt, request.retry_count, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.config.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}
