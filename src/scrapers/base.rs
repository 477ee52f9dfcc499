use crate::models::fund::{FetchRequest, FundQuote};
use crate::errors::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Base trait for fund data scrapers
#[async_trait]
pub trait FundScraper {
    /// Get the data source code this scraper is for
    fn source_code(&self) -> &'static str;

    /// Fetch raw history payloads for one fund, one entry per page
    async fn fetch_history(&self, request: &FetchRequest) -> Result<Vec<String>>;

    /// Fetch the intraday estimate for one fund
    async fn fetch_quote(&self, fund_id: &str) -> Result<FundQuote>;

    /// Widen the inter-request delay after the remote signalled rate limiting
    fn slow_down(&self, at_least: Option<Duration>);

    /// Current inter-request delay
    fn request_delay(&self) -> Duration;
}
